// ==========================================
// Ratebook ingestion - ratebook domain model
// ==========================================
// RawTable: literal parse of a spreadsheet, discarded after normalization
// RateRecord: one canonical lease-rate quote, owned by an ImportBatch
// ImportBatch: one ingestion attempt with append-only counters
// ==========================================

use crate::domain::types::{CanonicalField, ImportStatus, MappingSource, TableLayout};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ==========================================
// CellValue - raw spreadsheet cell
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    /// Empty cells and whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Bool(_) | CellValue::Number(_) => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value)
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

// ==========================================
// RawTable - rows of raw cells
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawTable {
    pub rows: Vec<Vec<CellValue>>,
}

impl RawTable {
    pub fn new(rows: Vec<Vec<CellValue>>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.iter().all(CellValue::is_blank))
    }

    pub fn row(&self, index: usize) -> &[CellValue] {
        self.rows.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of non-empty cells in a row.
    pub fn filled_count(&self, index: usize) -> usize {
        self.row(index).iter().filter(|c| !c.is_blank()).count()
    }

    /// Space-joined, uppercased text of a row's non-empty cells.
    pub fn row_text_upper(&self, index: usize) -> String {
        self.row(index)
            .iter()
            .filter(|c| !c.is_blank())
            .map(|c| c.to_string().trim().to_uppercase())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ==========================================
// SourceTable - header-addressed rows ready for mapping
// ==========================================
// Produced from a RawTable by the flat header split or the matrix unpivot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTable {
    pub layout: TableLayout,
    pub headers: Vec<String>,
    pub rows: Vec<SourceRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    pub row_number: usize,        // 1-based row in the source sheet
    pub label: Option<String>,    // extra locator for error messages (matrix term code)
    pub cells: Vec<CellValue>,    // aligned with SourceTable.headers
}

impl SourceRow {
    pub fn cell(&self, index: usize) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.cells.get(index).unwrap_or(&EMPTY)
    }

    pub fn locator(&self) -> String {
        match &self.label {
            Some(label) => format!("Row {} ({})", self.row_number, label),
            None => format!("Row {}", self.row_number),
        }
    }
}

// ==========================================
// ColumnMapping - source column -> canonical field
// ==========================================
// None marks a column that is intentionally unmapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ColumnMapping {
    pub columns: BTreeMap<String, Option<CanonicalField>>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, field: Option<CanonicalField>) {
        self.columns.insert(column.into(), field);
    }

    pub fn get(&self, column: &str) -> Option<CanonicalField> {
        self.columns.get(column).copied().flatten()
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn targets(&self) -> impl Iterator<Item = CanonicalField> + '_ {
        self.columns.values().filter_map(|f| *f)
    }

    /// Required fields no column maps to, in canonical order.
    pub fn missing_required(&self) -> Vec<CanonicalField> {
        CanonicalField::REQUIRED
            .iter()
            .copied()
            .filter(|required| !self.targets().any(|t| t == *required))
            .collect()
    }
}

// ==========================================
// RateRecord - canonical lease-rate quote
// ==========================================
// Money in integer minor units; vehicle_id is a lookup-only back-reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRecord {
    pub cap_code: String,
    pub provider_code: String,
    pub contract_type: String,
    pub manufacturer: String,
    pub model: String,
    pub variant: Option<String>,
    pub model_year: Option<String>,
    pub term: i64,                       // months
    pub annual_mileage: i64,
    pub upfront_rentals: Option<i64>,    // matrix deposit months
    pub total_rental: i64,               // minor units
    pub lease_rental: Option<i64>,
    pub service_rental: Option<i64>,
    pub p11d: Option<i64>,
    pub co2_gkm: Option<i64>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub body_style: Option<String>,
    pub excess_mileage_ppm: Option<i64>, // hundredths of a penny
    pub whole_life_cost: Option<i64>,
    pub otr_price: Option<i64>,
    pub basic_list_price: Option<i64>,
    pub insurance_group: Option<String>,
    pub mpg_combined: Option<i64>,
    pub wltp_ev_range: Option<i64>,
    pub euro_rating: Option<String>,
    pub vehicle_id: Option<String>,
    pub row_number: usize,
}

// ==========================================
// VehicleMatch - vehicle master lookup result
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleMatch {
    pub cap_code: String,
    pub vehicle_id: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub variant: Option<String>,
}

// ==========================================
// Provider - finance provider registry entry
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub provider_code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ==========================================
// ImportBatch - one ingestion attempt
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub batch_id: String,
    pub import_id: String,
    pub provider_code: String,
    pub contract_type: String,
    pub source_file_name: String,
    pub content_hash: String,
    pub layout: Option<TableLayout>,
    pub is_latest: bool,
    pub total_rows: i64,
    pub success_rows: i64,
    pub error_rows: i64,
    pub unique_cap_codes: i64,
    pub status: ImportStatus,
    pub error_log: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ==========================================
// BatchProgress - counter snapshot written after each row batch
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub total_rows: i64,
    pub success_rows: i64,
    pub error_rows: i64,
    pub unique_cap_codes: i64,
}

// ==========================================
// ImportRequest - raw input for one import attempt
// ==========================================
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub provider_code: String,
    pub contract_type: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

// ==========================================
// ImportOutcome - result handed back to callers
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub success: bool,
    pub import_id: String,
    pub batch_id: Option<String>,
    pub status: Option<ImportStatus>,
    pub layout: Option<TableLayout>,
    pub mapping_source: Option<MappingSource>,
    pub total_rows: i64,
    pub success_rows: i64,
    pub error_rows: i64,
    pub unique_cap_codes: i64,
    pub errors: Vec<String>,
    /// Required fields absent from the resolved mapping (configuration failures).
    #[serde(default)]
    pub missing_fields: Vec<String>,
    pub elapsed_ms: i64,
}

impl ImportOutcome {
    /// Outcome for an attempt rejected before any row was processed.
    pub fn rejected(import_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            import_id: import_id.into(),
            batch_id: None,
            status: None,
            layout: None,
            mapping_source: None,
            total_rows: 0,
            success_rows: 0,
            error_rows: 0,
            unique_cap_codes: 0,
            errors: vec![message.into()],
            missing_fields: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// Outcome for an attempt that left a failed batch record behind
    /// without processing any row.
    pub fn failed_batch(batch: &ImportBatch, message: impl Into<String>, missing_fields: Vec<String>) -> Self {
        Self {
            batch_id: Some(batch.batch_id.clone()),
            status: Some(ImportStatus::Failed),
            layout: batch.layout,
            missing_fields,
            ..Self::rejected(batch.import_id.clone(), message)
        }
    }
}

// ==========================================
// Suggestion service payloads
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedMapping {
    pub source_column: String,
    pub target_field: Option<String>,
    pub confidence: u8,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MappingSuggestionResponse {
    pub mappings: Vec<SuggestedMapping>,
    #[serde(default)]
    pub suggested_provider_name: Option<String>,
}
