// ==========================================
// Ratebook ingestion - API layer
// ==========================================
// Caller-facing entry points over the importer and repositories
// ==========================================

pub mod error;
pub mod import_api;

pub use error::{ApiError, ApiResult};
pub use import_api::{NoopScoringService, RatebookImportApi};
