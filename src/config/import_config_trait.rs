// ==========================================
// Ratebook ingestion - import config reader trait
// ==========================================
// Read-only configuration needed by the importer (no implementation).
// Every key has a default; an absent key is never an error.
// ==========================================

use crate::domain::{ColumnMapping, TableLayout};
use crate::importer::error::ImportResult;
use async_trait::async_trait;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// Implemented by: ConfigManager (config_kv table)
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    // ===== Row processing =====

    /// Rows per insert sub-batch. Default: 100
    async fn get_batch_size(&self) -> ImportResult<usize>;

    /// Cap of the error log stored on the batch. Default: 100
    async fn get_max_logged_errors(&self) -> ImportResult<usize>;

    /// Cap of the error list returned to the caller. Default: 20
    async fn get_max_reported_errors(&self) -> ImportResult<usize>;

    /// Term used when a row has none. Default: 36
    async fn get_default_term_months(&self) -> ImportResult<i64>;

    /// Annual mileage used when a row has none. Default: 10000
    async fn get_default_annual_mileage(&self) -> ImportResult<i64>;

    /// Batch is `failed` when errorRows > totalRows x ratio. Default: 0.5
    async fn get_failure_error_ratio(&self) -> ImportResult<f64>;

    /// Retry a failed insert sub-batch row by row. Default: false
    async fn get_row_retry_on_insert_failure(&self) -> ImportResult<bool>;

    // ===== Column mapping =====

    /// Suggestions below this confidence are ignored. Default: 60
    async fn get_suggestion_min_confidence(&self) -> ImportResult<u8>;

    /// Stored mapping for a provider and layout, falling back to the
    /// provider-wide mapping.
    async fn get_column_mapping(
        &self,
        provider_code: &str,
        layout: TableLayout,
    ) -> ImportResult<Option<ColumnMapping>>;
}
