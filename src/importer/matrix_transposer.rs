// ==========================================
// Ratebook ingestion - matrix transposer
// ==========================================
// Matrix layout: one row per mileage band, one column per
// deposit+term code, vehicle metadata scattered above the grid.
// transpose(): wide form, one row per mileage band
// unpivot():   long form, one source row per (band, term code) quote
// ==========================================

use crate::domain::{CellValue, RawTable, SourceRow, SourceTable, TableLayout, TableShape};
use crate::importer::cell_normalizer::to_trimmed_string;
use crate::importer::shape_detector::{contains_matrix_marker, is_term_code};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Rows above the grid searched for vehicle metadata.
pub const METADATA_SCAN_ROWS: usize = 15;

/// Wide-form header prefix; term codes follow.
pub const MATRIX_HEADERS: [&str; 9] = [
    "Make",
    "Model",
    "Variant",
    "CAP Code",
    "CAP ID",
    "BLP",
    "OTR",
    "Vehicle Description",
    "Mileage",
];

/// Columns appended by the unpivot, after the MATRIX_HEADERS prefix.
pub const UNPIVOT_HEADERS: [&str; 4] = ["Term Code", "Term", "Initial Rentals", "Rental"];

// letter run + digit run + alphanumeric tail, e.g. ALTO15SPR5HPIA
static CAP_CODE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2,}[0-9]+[A-Z0-9]{5,}$").unwrap());

// ==========================================
// TermCode - parsed deposit+term header
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermCode {
    pub code: String,
    /// Rentals paid up front (the D in D+N).
    pub upfront_rentals: i64,
    /// Contract length in months (the N in D+N).
    pub term_months: i64,
}

/// Parse `D+N` into its upfront rentals and an N-month contract term.
pub fn parse_term_code(text: &str) -> Option<TermCode> {
    let code = text.trim();
    if !is_term_code(code) {
        return None;
    }
    let (deposit, months) = code.split_once('+')?;
    let upfront_rentals: i64 = deposit.parse().ok()?;
    let monthly: i64 = months.parse().ok()?;
    Some(TermCode {
        code: code.to_string(),
        upfront_rentals,
        term_months: monthly,
    })
}

// ==========================================
// MatrixMetadata - vehicle details recovered from the header block
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixMetadata {
    pub make: CellValue,
    pub model: CellValue,
    pub variant: CellValue,
    pub cap_code: CellValue,
    pub cap_id: CellValue,
    pub basic_list_price: CellValue,
    pub otr_price: CellValue,
}

impl MatrixMetadata {
    pub fn description(&self) -> String {
        [&self.make, &self.model, &self.variant]
            .iter()
            .map(|cell| to_trimmed_string(cell))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn prefix_cells(&self, mileage: CellValue) -> Vec<CellValue> {
        vec![
            self.make.clone(),
            self.model.clone(),
            self.variant.clone(),
            self.cap_code.clone(),
            self.cap_id.clone(),
            self.basic_list_price.clone(),
            self.otr_price.clone(),
            CellValue::from(self.description()),
            mileage,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetadataLabel {
    CapCode,
    CapId,
    BasicListPrice,
    OtrPrice,
}

fn metadata_label(cell: &CellValue) -> Option<MetadataLabel> {
    let text = to_trimmed_string(cell).to_uppercase();
    match text.trim_end_matches(':').trim() {
        "CAP CODE" | "CAPCODE" => Some(MetadataLabel::CapCode),
        "CAP ID" | "CAPID" => Some(MetadataLabel::CapId),
        "BLP" | "BASIC LIST PRICE" | "BASIC" => Some(MetadataLabel::BasicListPrice),
        "OTR" | "OTR PRICE" | "ON THE ROAD" => Some(MetadataLabel::OtrPrice),
        _ => None,
    }
}

// ==========================================
// MatrixTable - wide form
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixTable {
    /// MATRIX_HEADERS followed by the term codes, left to right.
    pub headers: Vec<String>,
    pub term_codes: Vec<String>,
    /// One per mileage band; cells aligned with `headers`.
    pub rows: Vec<SourceRow>,
    pub metadata: MatrixMetadata,
}

impl MatrixTable {
    /// Long form: one row per non-blank rate cell.
    pub fn unpivot(&self) -> SourceTable {
        let prefix_len = MATRIX_HEADERS.len();
        let mut headers: Vec<String> = MATRIX_HEADERS.iter().map(|h| h.to_string()).collect();
        headers.extend(UNPIVOT_HEADERS.iter().map(|h| h.to_string()));

        let mut rows = Vec::new();
        for band in &self.rows {
            for (offset, code) in self.term_codes.iter().enumerate() {
                let rate = band.cell(prefix_len + offset);
                if rate.is_blank() {
                    continue;
                }
                let parsed = parse_term_code(code);
                let mut cells = band.cells[..prefix_len.min(band.cells.len())].to_vec();
                cells.resize(prefix_len, CellValue::Empty);
                cells.push(CellValue::text(code.clone()));
                cells.push(
                    parsed
                        .as_ref()
                        .map(|t| CellValue::from(t.term_months))
                        .unwrap_or_default(),
                );
                cells.push(
                    parsed
                        .as_ref()
                        .map(|t| CellValue::from(t.upfront_rentals))
                        .unwrap_or_default(),
                );
                cells.push(rate.clone());

                rows.push(SourceRow {
                    row_number: band.row_number,
                    label: Some(code.clone()),
                    cells,
                });
            }
        }

        SourceTable {
            layout: TableLayout::Matrix,
            headers,
            rows,
        }
    }
}

// ==========================================
// MatrixTransposer
// ==========================================
pub struct MatrixTransposer;

impl MatrixTransposer {
    /// Wide form of a matrix table. Returns None when the shape is not Matrix.
    pub fn transpose(&self, table: &RawTable, shape: &TableShape) -> Option<MatrixTable> {
        let TableShape::Matrix {
            term_row_index,
            label_row_index,
        } = *shape
        else {
            return None;
        };

        // (column index, code) in left-to-right order
        let term_columns: Vec<(usize, String)> = table
            .row(term_row_index)
            .iter()
            .enumerate()
            .filter_map(|(col, cell)| {
                let text = to_trimmed_string(cell);
                is_term_code(&text).then_some((col, text))
            })
            .collect();

        let metadata = self.extract_metadata(table, label_row_index);

        let rows: Vec<SourceRow> = (term_row_index + 1..table.len())
            .filter(|&index| table.row(index).first().is_some_and(|c| !c.is_blank()))
            .map(|index| {
                let raw = table.row(index);
                let mut cells = metadata.prefix_cells(CellValue::from(to_trimmed_string(&raw[0])));
                cells.extend(
                    term_columns
                        .iter()
                        .map(|(col, _)| raw.get(*col).cloned().unwrap_or_default()),
                );
                SourceRow {
                    row_number: index + 1,
                    label: None,
                    cells,
                }
            })
            .collect();

        let term_codes: Vec<String> = term_columns.into_iter().map(|(_, code)| code).collect();
        let mut headers: Vec<String> = MATRIX_HEADERS.iter().map(|h| h.to_string()).collect();
        headers.extend(term_codes.iter().cloned());

        debug!(
            term_codes = term_codes.len(),
            mileage_bands = rows.len(),
            cap_code = %metadata.cap_code,
            "matrix transposed"
        );

        Some(MatrixTable {
            headers,
            term_codes,
            rows,
            metadata,
        })
    }

    fn extract_metadata(&self, table: &RawTable, label_row_index: usize) -> MatrixMetadata {
        let mut metadata = MatrixMetadata::default();

        let mut vehicle = table
            .row(label_row_index)
            .iter()
            .filter(|cell| !cell.is_blank())
            .filter(|cell| !contains_matrix_marker(&to_trimmed_string(cell).to_uppercase()));
        metadata.make = vehicle.next().cloned().unwrap_or_default();
        metadata.model = vehicle.next().cloned().unwrap_or_default();
        metadata.variant = vehicle.next().cloned().unwrap_or_default();

        let scan = table.len().min(METADATA_SCAN_ROWS);
        for index in 0..scan {
            let row = table.row(index);
            for (col, cell) in row.iter().enumerate() {
                let Some(label) = metadata_label(cell) else {
                    continue;
                };
                let slot = match label {
                    MetadataLabel::CapCode => &mut metadata.cap_code,
                    MetadataLabel::CapId => &mut metadata.cap_id,
                    MetadataLabel::BasicListPrice => &mut metadata.basic_list_price,
                    MetadataLabel::OtrPrice => &mut metadata.otr_price,
                };
                if !slot.is_blank() {
                    continue;
                }
                // first non-empty cell to the right on the same row
                if let Some(value) = row[col + 1..].iter().find(|c| !c.is_blank()) {
                    *slot = value.clone();
                }
            }
        }

        if metadata.cap_code.is_blank() {
            metadata.cap_code = self
                .find_cap_code_token(table, scan)
                .map(CellValue::text)
                .unwrap_or_else(|| metadata.cap_id.clone());
        }

        metadata
    }

    fn find_cap_code_token(&self, table: &RawTable, scan: usize) -> Option<String> {
        (0..scan)
            .flat_map(|index| table.row(index).iter())
            .map(to_trimmed_string)
            .find(|text| CAP_CODE_TOKEN.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::shape_detector::ShapeDetector;

    fn row(cells: &[&str]) -> Vec<CellValue> {
        cells.iter().map(|c| CellValue::from(*c)).collect()
    }

    fn scenario_b() -> RawTable {
        RawTable::new(vec![
            row(&["CAP ID", "", "", "", "", "", "", "", "108321", "", "", "OTR", "25000"]),
            row(&["Hyundai", "Tucson", "(2024) 1.6 T-GDi Premium", "", "BASE RENTALS"]),
            row(&["", "1+23", "1+35", "1+47"]),
            row(&["5k - Non Maintained", "£344.90", "£292.07", "£292.71"]),
            row(&["8k - Non Maintained", "£361.10", "", "£305.02"]),
        ])
    }

    fn transpose(table: &RawTable) -> MatrixTable {
        let shape = ShapeDetector.detect(table);
        MatrixTransposer.transpose(table, &shape).unwrap()
    }

    #[test]
    fn test_scenario_b_wide_form() {
        let matrix = transpose(&scenario_b());

        assert_eq!(matrix.term_codes, vec!["1+23", "1+35", "1+47"]);
        assert!(matrix.headers.contains(&"Mileage".to_string()));
        assert!(matrix.headers.contains(&"1+23".to_string()));
        assert!(matrix.headers.contains(&"1+35".to_string()));

        let mileage = matrix.headers.iter().position(|h| h == "Mileage").unwrap();
        assert_eq!(matrix.rows[0].cells[mileage], CellValue::text("5k - Non Maintained"));
    }

    #[test]
    fn test_every_band_row_carries_every_term_code() {
        let matrix = transpose(&scenario_b());
        assert_eq!(matrix.rows.len(), 2);
        for band in &matrix.rows {
            assert_eq!(band.cells.len(), MATRIX_HEADERS.len() + matrix.term_codes.len());
        }
    }

    #[test]
    fn test_metadata_from_label_value_pairs() {
        let matrix = transpose(&scenario_b());
        let meta = &matrix.metadata;
        assert_eq!(meta.make, CellValue::text("Hyundai"));
        assert_eq!(meta.model, CellValue::text("Tucson"));
        assert_eq!(meta.variant, CellValue::text("(2024) 1.6 T-GDi Premium"));
        assert_eq!(meta.cap_id, CellValue::text("108321"));
        assert_eq!(meta.otr_price, CellValue::text("25000"));
        assert_eq!(meta.description(), "Hyundai Tucson (2024) 1.6 T-GDi Premium");
        // no CAP code anywhere: falls back to the CAP ID
        assert_eq!(meta.cap_code, CellValue::text("108321"));
    }

    #[test]
    fn test_cap_code_label_and_token_fallback() {
        let labelled = RawTable::new(vec![
            row(&["CAP Code:", "", "HYTU16PRM5HPTA", "BLP", "24500.00"]),
            row(&["Hyundai", "Tucson", "Premium", "BCH RATES"]),
            row(&["", "1+23", "1+35", "1+47"]),
            row(&["5k", "1", "2", "3"]),
        ]);
        let meta = transpose(&labelled).metadata;
        assert_eq!(meta.cap_code, CellValue::text("HYTU16PRM5HPTA"));
        assert_eq!(meta.basic_list_price, CellValue::text("24500.00"));

        let unlabelled = RawTable::new(vec![
            row(&["Kia Niro", "KINI16EV5HPIA"]),
            row(&["Kia", "Niro", "EV", "BCH RATES"]),
            row(&["", "1+23", "1+35", "1+47"]),
            row(&["5k", "1", "2", "3"]),
        ]);
        let meta = transpose(&unlabelled).metadata;
        assert_eq!(meta.cap_code, CellValue::text("KINI16EV5HPIA"));
    }

    #[test]
    fn test_unpivot_skips_blank_cells_and_splits_term_codes() {
        let table = transpose(&scenario_b()).unpivot();
        assert_eq!(table.layout, TableLayout::Matrix);
        // 3 + 2 non-blank rates
        assert_eq!(table.rows.len(), 5);

        let col = |name: &str| table.headers.iter().position(|h| h == name).unwrap();
        let first = &table.rows[0];
        assert_eq!(first.row_number, 4);
        assert_eq!(first.label.as_deref(), Some("1+23"));
        assert_eq!(first.cells[col("Mileage")], CellValue::text("5k - Non Maintained"));
        assert_eq!(first.cells[col("Term")], CellValue::Number(23.0));
        assert_eq!(first.cells[col("Initial Rentals")], CellValue::Number(1.0));
        assert_eq!(first.cells[col("Rental")], CellValue::text("£344.90"));
        assert_eq!(first.locator(), "Row 4 (1+23)");
    }

    #[test]
    fn test_parse_term_code() {
        assert_eq!(
            parse_term_code("3+47"),
            Some(TermCode {
                code: "3+47".to_string(),
                upfront_rentals: 3,
                term_months: 47
            })
        );
        assert_eq!(parse_term_code("47"), None);
    }

    #[test]
    fn test_flat_shape_is_not_transposed() {
        let table = RawTable::new(vec![row(&["Make", "Model"])]);
        assert!(MatrixTransposer
            .transpose(&table, &TableShape::Flat { header_row_index: 0 })
            .is_none());
    }
}
