// ==========================================
// Ratebook ingestion - importer traits
// ==========================================
// Seams of the import pipeline (no implementations here).
// External collaborators (vehicle master, scoring, AI suggestions)
// report failures as anyhow::Error; the pipeline decides severity.
// ==========================================

use crate::domain::{
    ImportOutcome, ImportRequest, MappingSuggestionResponse, RateRecord, RawTable, VehicleMatch,
};
use crate::importer::error::ImportResult;
use crate::importer::field_mapper::{CanonicalRow, RowContext};
use async_trait::async_trait;

// ==========================================
// RatebookImporter Trait
// ==========================================
// Implemented by: RatebookImporterImpl
#[async_trait]
pub trait RatebookImporter: Send + Sync {
    /// Import one ratebook file.
    ///
    /// # Returns
    /// - Ok(ImportOutcome): the attempt ran; row-level errors are inside the outcome
    /// - Ok(failed ImportOutcome): structural / configuration failure, nothing imported;
    ///   carries the recorded failed batch and any missing required fields
    /// - Err(DuplicateImport): identical content already imported for the provider
    /// - Err(other): the failure could not be recorded
    async fn import_file(&self, request: ImportRequest) -> ImportResult<ImportOutcome>;

    /// Import a pre-parsed table (rows already split into cells).
    ///
    /// The content hash is taken over the JSON form of the rows.
    async fn import_table(
        &self,
        provider_code: &str,
        contract_type: &str,
        source_name: &str,
        table: RawTable,
    ) -> ImportResult<ImportOutcome>;

    /// Import several files concurrently; one failure does not affect the others.
    async fn batch_import(&self, requests: Vec<ImportRequest>) -> Vec<ImportResult<ImportOutcome>>;
}

// ==========================================
// FileParser Trait
// ==========================================
// Implemented by: CsvParser, ExcelParser, UniversalFileParser
pub trait FileParser: Send + Sync {
    /// Parse raw bytes into rows of cells. The file name only selects the format.
    fn parse_bytes(&self, file_name: &str, bytes: &[u8]) -> ImportResult<RawTable>;
}

// ==========================================
// FieldMapper Trait
// ==========================================
// Implemented by: RateRecordMapper
pub trait FieldMapper: Send + Sync {
    /// Build a RateRecord from one typed row.
    ///
    /// # Returns
    /// - Err(String): row-level problem, counted and skipped by the caller
    fn map_row(&self, row: &CanonicalRow, context: &RowContext) -> Result<RateRecord, String>;
}

// ==========================================
// VehicleLookup Trait
// ==========================================
// Read-only view of the vehicle master list.
#[async_trait]
pub trait VehicleLookup: Send + Sync {
    /// Vehicles matching any of the CAP codes. Unknown codes are simply absent.
    async fn find_by_cap_codes(&self, cap_codes: &[String]) -> anyhow::Result<Vec<VehicleMatch>>;
}

// ==========================================
// ScoringService Trait
// ==========================================
// Downstream recomputation triggered after a batch finishes importing.
#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn recompute_for_batch(&self, batch_id: &str) -> anyhow::Result<()>;
}

// ==========================================
// MappingSuggestionService Trait
// ==========================================
// Optional hint source for column mappings. Never required for an import.
#[async_trait]
pub trait MappingSuggestionService: Send + Sync {
    /// Capability check (credentials configured, endpoint reachable, ...).
    fn is_available(&self) -> bool;

    async fn suggest(
        &self,
        provider_code: &str,
        columns: &[String],
        sample_rows: &[Vec<String>],
    ) -> anyhow::Result<MappingSuggestionResponse>;
}
