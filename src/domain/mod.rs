// ==========================================
// Ratebook ingestion - domain layer
// ==========================================
// Entities and value types only.
// No data access, no pipeline logic.
// ==========================================

pub mod ratebook;
pub mod types;

pub use ratebook::{
    BatchProgress, CellValue, ColumnMapping, ImportBatch, ImportOutcome, ImportRequest,
    MappingSuggestionResponse, Provider, RateRecord, RawTable, SourceRow, SourceTable,
    SuggestedMapping, VehicleMatch,
};
pub use types::{CanonicalField, ImportStatus, MappingSource, TableLayout, TableShape};
