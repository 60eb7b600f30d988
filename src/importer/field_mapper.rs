// ==========================================
// Ratebook ingestion - field mapper
// ==========================================
// SourceRow --(ColumnMapping)--> CanonicalRow --> RateRecord
// CanonicalRow is keyed by CanonicalField, built once per row, so no
// string-keyed rows travel past this point.
// ==========================================

use crate::domain::{CanonicalField, CellValue, ColumnMapping, RateRecord, SourceRow};
use crate::importer::cell_normalizer::{
    is_empty_value, parse_annual_mileage, parse_int, parse_minor_units, to_optional_string,
};
use crate::importer::matrix_transposer::parse_term_code;
use crate::importer::ratebook_importer_trait::FieldMapper;
use std::collections::BTreeMap;
use tracing::debug;

/// Placeholder for missing vehicle names; replaced by vehicle-master data when available.
pub const UNKNOWN_SENTINEL: &str = "UNKNOWN";

/// Whether a vehicle name is absent for backfill purposes.
pub fn is_unknown_text(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(text) => {
            let trimmed = text.trim();
            trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNKNOWN_SENTINEL)
        }
    }
}

// ==========================================
// FieldIndex - canonical field -> source column position
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldIndex {
    positions: BTreeMap<CanonicalField, usize>,
}

impl FieldIndex {
    /// The first column mapped to a field wins.
    pub fn build(headers: &[String], mapping: &ColumnMapping) -> Self {
        let mut positions = BTreeMap::new();
        for (position, header) in headers.iter().enumerate() {
            if let Some(field) = mapping.get(header) {
                positions.entry(field).or_insert(position);
            }
        }
        Self { positions }
    }

    pub fn position(&self, field: CanonicalField) -> Option<usize> {
        self.positions.get(&field).copied()
    }
}

// ==========================================
// CanonicalRow - typed intermediate row
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRow {
    pub row_number: usize,
    pub locator: String,
    /// Deposit+term code of an unpivoted matrix cell.
    pub term_code: Option<String>,
    values: BTreeMap<CanonicalField, CellValue>,
}

impl CanonicalRow {
    pub fn from_source(row: &SourceRow, index: &FieldIndex) -> Self {
        let values = CanonicalField::ALL
            .iter()
            .filter_map(|field| {
                index
                    .position(*field)
                    .map(|position| (*field, row.cell(position).clone()))
            })
            .collect();

        Self {
            row_number: row.row_number,
            locator: row.locator(),
            term_code: row.label.clone(),
            values,
        }
    }

    pub fn get(&self, field: CanonicalField) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.values.get(&field).unwrap_or(&EMPTY)
    }

    #[cfg(test)]
    pub fn from_pairs(row_number: usize, pairs: Vec<(CanonicalField, CellValue)>) -> Self {
        Self {
            row_number,
            locator: format!("Row {}", row_number),
            term_code: None,
            values: pairs.into_iter().collect(),
        }
    }
}

// ==========================================
// RowContext - per-import constants applied to every row
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct RowContext {
    pub provider_code: String,
    pub contract_type: String,
    pub default_term_months: i64,
    pub default_annual_mileage: i64,
}

// ==========================================
// RateRecordMapper
// ==========================================
pub struct RateRecordMapper;

impl FieldMapper for RateRecordMapper {
    fn map_row(&self, row: &CanonicalRow, context: &RowContext) -> Result<RateRecord, String> {
        let cap_code = self
            .text(row, CanonicalField::CapCode)
            .ok_or_else(|| format!("{}: missing capCode", row.locator))?;

        let term = self
            .required(row, CanonicalField::Term, parse_int)?
            .unwrap_or(context.default_term_months);
        if term <= 0 {
            return Err(format!("{}: term must be positive, got {}", row.locator, term));
        }

        let annual_mileage = self
            .required(row, CanonicalField::AnnualMileage, parse_annual_mileage)?
            .unwrap_or(context.default_annual_mileage);
        let total_rental = self
            .required(row, CanonicalField::TotalRental, parse_minor_units)?
            .unwrap_or(0);

        Ok(RateRecord {
            cap_code,
            provider_code: context.provider_code.clone(),
            contract_type: context.contract_type.clone(),
            manufacturer: self
                .text(row, CanonicalField::Manufacturer)
                .unwrap_or_else(|| UNKNOWN_SENTINEL.to_string()),
            model: self
                .text(row, CanonicalField::Model)
                .unwrap_or_else(|| UNKNOWN_SENTINEL.to_string()),
            variant: self.text(row, CanonicalField::Variant),
            model_year: self.text(row, CanonicalField::ModelYear),
            term,
            annual_mileage,
            upfront_rentals: row
                .term_code
                .as_deref()
                .and_then(parse_term_code)
                .map(|code| code.upfront_rentals),
            total_rental,
            lease_rental: self.optional(row, CanonicalField::LeaseRental, parse_minor_units),
            service_rental: self.optional(row, CanonicalField::ServiceRental, parse_minor_units),
            p11d: self.optional(row, CanonicalField::P11d, parse_minor_units),
            co2_gkm: self.optional(row, CanonicalField::Co2Gkm, parse_int),
            fuel_type: self.text(row, CanonicalField::FuelType),
            transmission: self.text(row, CanonicalField::Transmission),
            body_style: self.text(row, CanonicalField::BodyStyle),
            // pence with two decimals -> hundredths of a penny
            excess_mileage_ppm: self.optional(row, CanonicalField::ExcessMileagePpm, parse_minor_units),
            whole_life_cost: self.optional(row, CanonicalField::WholeLifeCost, parse_minor_units),
            otr_price: self.optional(row, CanonicalField::OtrPrice, parse_minor_units),
            basic_list_price: self.optional(row, CanonicalField::BasicListPrice, parse_minor_units),
            insurance_group: self.text(row, CanonicalField::InsuranceGroup),
            mpg_combined: self.optional(row, CanonicalField::MpgCombined, parse_int),
            wltp_ev_range: self.optional(row, CanonicalField::WltpEvRange, parse_int),
            euro_rating: self.text(row, CanonicalField::EuroRating),
            vehicle_id: None,
            row_number: row.row_number,
        })
    }
}

type CellParser = fn(&CellValue) -> Result<Option<i64>, String>;

impl RateRecordMapper {
    fn text(&self, row: &CanonicalRow, field: CanonicalField) -> Option<String> {
        let cell = row.get(field);
        if is_empty_value(cell) {
            None
        } else {
            to_optional_string(cell)
        }
    }

    /// Garbage in a required numeric field rejects the row.
    fn required(
        &self,
        row: &CanonicalRow,
        field: CanonicalField,
        parse: CellParser,
    ) -> Result<Option<i64>, String> {
        parse(row.get(field)).map_err(|e| format!("{}: invalid {} ({})", row.locator, field, e))
    }

    /// Garbage in an optional field is dropped.
    fn optional(&self, row: &CanonicalRow, field: CanonicalField, parse: CellParser) -> Option<i64> {
        match parse(row.get(field)) {
            Ok(value) => value,
            Err(e) => {
                debug!(row = %row.locator, field = %field, error = %e, "optional value dropped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SourceTable, TableLayout};

    fn context() -> RowContext {
        RowContext {
            provider_code: "ALD".to_string(),
            contract_type: "BCH".to_string(),
            default_term_months: 36,
            default_annual_mileage: 10000,
        }
    }

    fn map(pairs: Vec<(CanonicalField, CellValue)>) -> Result<RateRecord, String> {
        RateRecordMapper.map_row(&CanonicalRow::from_pairs(7, pairs), &context())
    }

    #[test]
    fn test_full_row() {
        let record = map(vec![
            (CanonicalField::CapCode, CellValue::text(" ALTO15SPR5HPIA ")),
            (CanonicalField::Manufacturer, CellValue::text("Alfa Romeo")),
            (CanonicalField::Model, CellValue::text("Tonale")),
            (CanonicalField::Term, CellValue::Number(24.0)),
            (CanonicalField::AnnualMileage, CellValue::text("5,000")),
            (CanonicalField::TotalRental, CellValue::text("£289.50")),
            (CanonicalField::ExcessMileagePpm, CellValue::text("8.52")),
            (CanonicalField::Co2Gkm, CellValue::Number(0.0)),
            (CanonicalField::MpgCombined, CellValue::text("52.3")),
            (CanonicalField::InsuranceGroup, CellValue::text("25E")),
            (CanonicalField::P11d, CellValue::text("N/A")),
        ])
        .unwrap();

        assert_eq!(record.cap_code, "ALTO15SPR5HPIA");
        assert_eq!(record.provider_code, "ALD");
        assert_eq!(record.term, 24);
        assert_eq!(record.annual_mileage, 5000);
        assert_eq!(record.total_rental, 28950);
        assert_eq!(record.excess_mileage_ppm, Some(852));
        assert_eq!(record.co2_gkm, Some(0));
        assert_eq!(record.mpg_combined, Some(52));
        assert_eq!(record.insurance_group.as_deref(), Some("25E"));
        assert_eq!(record.p11d, None);
        assert_eq!(record.variant, None);
        assert_eq!(record.row_number, 7);
    }

    #[test]
    fn test_missing_cap_code_is_row_error() {
        let err = map(vec![(CanonicalField::TotalRental, CellValue::Number(100.0))]).unwrap_err();
        assert_eq!(err, "Row 7: missing capCode");
        assert!(map(vec![(CanonicalField::CapCode, CellValue::text("-"))]).is_err());
    }

    #[test]
    fn test_defaults_for_missing_required_values() {
        let record = map(vec![(CanonicalField::CapCode, CellValue::text("ABCD123XYZ"))]).unwrap();
        assert_eq!(record.term, 36);
        assert_eq!(record.annual_mileage, 10000);
        assert_eq!(record.total_rental, 0);
        assert_eq!(record.manufacturer, UNKNOWN_SENTINEL);
        assert_eq!(record.model, UNKNOWN_SENTINEL);
    }

    #[test]
    fn test_garbage_required_numeric_is_row_error() {
        let err = map(vec![
            (CanonicalField::CapCode, CellValue::text("ABCD123XYZ")),
            (CanonicalField::TotalRental, CellValue::text("call us")),
        ])
        .unwrap_err();
        assert!(err.contains("invalid totalRental"), "{}", err);
    }

    #[test]
    fn test_garbage_optional_value_is_dropped() {
        let record = map(vec![
            (CanonicalField::CapCode, CellValue::text("ABCD123XYZ")),
            (CanonicalField::OtrPrice, CellValue::text("see website")),
        ])
        .unwrap();
        assert_eq!(record.otr_price, None);
    }

    #[test]
    fn test_unpivoted_matrix_row() {
        let headers: Vec<String> = ["CAP Code", "Make", "Model", "Mileage", "Term", "Rental", "Ignored"]
            .map(String::from)
            .to_vec();
        let mut mapping = ColumnMapping::new();
        mapping.insert("CAP Code", Some(CanonicalField::CapCode));
        mapping.insert("Make", Some(CanonicalField::Manufacturer));
        mapping.insert("Model", Some(CanonicalField::Model));
        mapping.insert("Mileage", Some(CanonicalField::AnnualMileage));
        mapping.insert("Term", Some(CanonicalField::Term));
        mapping.insert("Rental", Some(CanonicalField::TotalRental));
        mapping.insert("Ignored", None);

        let table = SourceTable {
            layout: TableLayout::Matrix,
            headers: headers.clone(),
            rows: vec![SourceRow {
                row_number: 4,
                label: Some("3+35".to_string()),
                cells: vec![
                    CellValue::text("108321"),
                    CellValue::text("Hyundai"),
                    CellValue::text("Tucson"),
                    CellValue::text("5k - Non Maintained"),
                    CellValue::Number(36.0),
                    CellValue::text("£292.07"),
                    CellValue::text("x"),
                ],
            }],
        };

        let index = FieldIndex::build(&table.headers, &mapping);
        let row = CanonicalRow::from_source(&table.rows[0], &index);
        let record = RateRecordMapper.map_row(&row, &context()).unwrap();

        assert_eq!(record.annual_mileage, 5000);
        assert_eq!(record.term, 36);
        assert_eq!(record.upfront_rentals, Some(3));
        assert_eq!(record.total_rental, 29207);
        assert_eq!(row.locator, "Row 4 (3+35)");
    }

    #[test]
    fn test_unknown_text() {
        assert!(is_unknown_text(None));
        assert!(is_unknown_text(Some(" unknown ")));
        assert!(is_unknown_text(Some("")));
        assert!(!is_unknown_text(Some("Kia")));
    }
}
