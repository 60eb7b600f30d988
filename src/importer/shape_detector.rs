// ==========================================
// Ratebook ingestion - table shape detector
// ==========================================
// Locates the header row of a flat table, or recognises the matrix
// layout (mileage-band rows x deposit+term columns).
// Never fails: falls back to Flat { header_row_index: 0 }.
// ==========================================

use crate::domain::{RawTable, SourceRow, SourceTable, TableLayout, TableShape};
use crate::importer::cell_normalizer::to_trimmed_string;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

/// Rows scanned for any shape signal.
pub const SHAPE_SCAN_ROWS: usize = 30;
/// Rows scanned for the max-filled header candidate.
pub const HEADER_SCAN_ROWS: usize = 15;
/// Rows scanned for header keywords.
pub const KEYWORD_SCAN_ROWS: usize = 10;
/// Filled cells needed to accept the max-filled row outright.
pub const MIN_HEADER_CELLS: usize = 5;
/// Deposit+term cells needed on a term row.
pub const MIN_TERM_CODES: usize = 3;
/// Filled cells a flat data row needs to count as a quote.
pub const MIN_DATA_CELLS: usize = 2;

const HEADER_KEYWORDS: [&str; 8] = [
    "MANUFACTURER",
    "CAP CODE",
    "MODEL",
    "RENTAL",
    "MILEAGE",
    "VARIANT",
    "DERIVATIVE",
    "MAKE",
];

const MATRIX_MARKERS: [&str; 3] = ["BASE RENTALS", "BCH RATES", "ADD VAT FOR PCH"];

static TERM_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,2}\+\d{2}$").unwrap());

/// Whether a cell text is a deposit+term code such as `3+47`.
pub fn is_term_code(text: &str) -> bool {
    TERM_CODE.is_match(text.trim())
}

/// Whether uppercased row text carries one of the matrix marker phrases.
pub fn contains_matrix_marker(upper_text: &str) -> bool {
    MATRIX_MARKERS.iter().any(|marker| upper_text.contains(marker))
}

pub struct ShapeDetector;

impl ShapeDetector {
    /// Classify a table. Matrix wins when both detectors fire.
    pub fn detect(&self, table: &RawTable) -> TableShape {
        if let Some(shape) = self.detect_matrix(table) {
            debug!(?shape, "matrix layout detected");
            return shape;
        }
        let header_row_index = self.detect_header_row(table);
        debug!(header_row_index, "flat layout detected");
        TableShape::Flat { header_row_index }
    }

    /// Flat header row: max-filled row if wide enough, else first keyword row,
    /// else the max-filled row anyway.
    pub fn detect_header_row(&self, table: &RawTable) -> usize {
        let scan = table.len().min(HEADER_SCAN_ROWS);

        let mut best_index = 0;
        let mut best_count = 0;
        for index in 0..scan {
            let count = table.filled_count(index);
            if count > best_count {
                best_index = index;
                best_count = count;
            }
        }

        if best_count >= MIN_HEADER_CELLS {
            return best_index;
        }

        let keyword_scan = table.len().min(KEYWORD_SCAN_ROWS);
        (0..keyword_scan)
            .find(|&index| {
                let text = table.row_text_upper(index);
                HEADER_KEYWORDS.iter().any(|keyword| text.contains(keyword))
            })
            .unwrap_or(best_index)
    }

    /// Matrix layout: needs both a term row and a label row; last match wins.
    pub fn detect_matrix(&self, table: &RawTable) -> Option<TableShape> {
        let scan = table.len().min(SHAPE_SCAN_ROWS);

        let mut term_row = None;
        let mut label_row = None;
        for index in 0..scan {
            let term_codes = table
                .row(index)
                .iter()
                .filter(|cell| is_term_code(&cell.to_string()))
                .count();
            if term_codes >= MIN_TERM_CODES {
                term_row = Some(index);
            }
            if contains_matrix_marker(&table.row_text_upper(index)) {
                label_row = Some(index);
            }
        }

        match (term_row, label_row) {
            (Some(term_row_index), Some(label_row_index)) => Some(TableShape::Matrix {
                term_row_index,
                label_row_index,
            }),
            _ => None,
        }
    }

    /// Header-addressed rows of a flat table.
    ///
    /// Blank headers become `Column {n}`, repeats get a `_{k}` suffix.
    /// Rows below the header with fewer than two filled cells (counts,
    /// footers, spacers) are dropped.
    pub fn split_flat(&self, table: &RawTable, header_row_index: usize) -> SourceTable {
        let header_cells = table.row(header_row_index);
        let width = (header_row_index + 1..table.len())
            .map(|index| table.row(index).len())
            .chain(std::iter::once(header_cells.len()))
            .max()
            .unwrap_or(0);

        let mut seen: HashMap<String, usize> = HashMap::new();
        let headers: Vec<String> = (0..width)
            .map(|col| {
                let raw = header_cells.get(col).map(to_trimmed_string).unwrap_or_default();
                let base = if raw.is_empty() {
                    format!("Column {}", col + 1)
                } else {
                    raw
                };
                let count = seen.entry(base.clone()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    base
                } else {
                    format!("{}_{}", base, count)
                }
            })
            .collect();

        let rows = (header_row_index + 1..table.len())
            .filter(|&index| table.filled_count(index) >= MIN_DATA_CELLS)
            .map(|index| SourceRow {
                row_number: index + 1,
                label: None,
                cells: table.row(index).to_vec(),
            })
            .collect();

        SourceTable {
            layout: TableLayout::Flat,
            headers,
            rows,
        }
    }
}
