// ==========================================
// Ratebook ingestion - core library
// ==========================================
// Provider ratebook files (CSV / Excel) -> canonical lease-rate records
// Stack: Rust + SQLite (rusqlite)
// ==========================================

// ==========================================
// Modules
// ==========================================

// Domain layer - entities and value types
pub mod domain;

// Repository layer - data access
pub mod repository;

// Importer layer - parse, shape, map, persist
pub mod importer;

// Config layer - import settings and stored mappings
pub mod config;

// Database infrastructure (connection setup, PRAGMAs, schema)
pub mod db;

// Logging
pub mod logging;

// API layer - caller-facing entry points
pub mod api;

// ==========================================
// Re-exports
// ==========================================

pub use domain::{
    CanonicalField, ImportBatch, ImportOutcome, ImportRequest, ImportStatus, RateRecord,
    RawTable, TableLayout,
};

pub use importer::{RatebookImporter, RatebookImporterImpl};

pub use api::{ApiError, ApiResult, RatebookImportApi};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const APP_NAME: &str = "ratebook-ingest";
