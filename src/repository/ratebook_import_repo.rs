// ==========================================
// Ratebook ingestion - import repository trait
// ==========================================
// Data access for providers, import batches and rate records.
// No import rules here: status verdicts, caps and defaults belong to
// the importer.
// ==========================================

use crate::domain::{BatchProgress, ImportBatch, ImportStatus, Provider, RateRecord};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;

// ==========================================
// RatebookImportRepository Trait
// ==========================================
// Implemented by: RatebookImportRepositoryImpl (rusqlite)
#[async_trait]
pub trait RatebookImportRepository: Send + Sync {
    // ===== Dedup and providers =====

    /// Earliest non-discarded batch with the same content for the provider.
    ///
    /// Failed batches without a single imported row are ignored, so a file
    /// rejected for structure or mapping can be imported again once fixed.
    async fn find_batch_by_hash(
        &self,
        provider_code: &str,
        content_hash: &str,
    ) -> RepositoryResult<Option<ImportBatch>>;

    /// Provider registry entry, created on first use.
    async fn ensure_provider(&self, provider_code: &str) -> RepositoryResult<Provider>;

    // ===== Batch lifecycle =====

    /// Demote the current latest batch for (provider, contract type) and
    /// insert `batch` as the new latest, in one transaction.
    ///
    /// # Errors
    /// - UniqueConstraintViolation: same content inserted concurrently
    async fn begin_batch(&self, batch: &ImportBatch) -> RepositoryResult<()>;

    /// Insert a batch that failed before row processing. Never touches the latest flag.
    async fn record_failed_batch(&self, batch: &ImportBatch) -> RepositoryResult<()>;

    /// Insert rate records for a batch in one transaction (all or nothing).
    async fn insert_rate_records(
        &self,
        batch_id: &str,
        records: &[RateRecord],
    ) -> RepositoryResult<usize>;

    /// Write running counters. Counters never decrease.
    async fn update_progress(
        &self,
        batch_id: &str,
        progress: BatchProgress,
        error_log: &[String],
    ) -> RepositoryResult<()>;

    /// Final counters, status and completion time.
    async fn finalize_batch(
        &self,
        batch_id: &str,
        status: ImportStatus,
        progress: BatchProgress,
        error_log: &[String],
    ) -> RepositoryResult<()>;

    // ===== Queries =====

    async fn get_batch(&self, batch_id: &str) -> RepositoryResult<Option<ImportBatch>>;

    /// Newest first; filters are optional.
    async fn list_batches(
        &self,
        provider_code: Option<&str>,
        contract_type: Option<&str>,
    ) -> RepositoryResult<Vec<ImportBatch>>;

    async fn latest_batch(
        &self,
        provider_code: &str,
        contract_type: &str,
    ) -> RepositoryResult<Option<ImportBatch>>;

    /// Rate records of one batch, or of all batches.
    async fn count_rate_records(&self, batch_id: Option<&str>) -> RepositoryResult<i64>;

    // ===== Administration =====

    /// Delete a batch and, through the foreign key cascade, its rate records.
    ///
    /// # Returns
    /// - Ok(false): no such batch
    async fn delete_batch(&self, batch_id: &str) -> RepositoryResult<bool>;
}
