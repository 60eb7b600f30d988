// ==========================================
// Ratebook ingestion - repository layer
// ==========================================
// Data access only: no import rules.
// All queries are parameterized.
// ==========================================

pub mod error;
pub mod ratebook_import_repo;
pub mod ratebook_import_repo_impl;
pub mod vehicle_repo;

pub use error::{RepositoryError, RepositoryResult};
pub use ratebook_import_repo::RatebookImportRepository;
pub use ratebook_import_repo_impl::RatebookImportRepositoryImpl;
pub use vehicle_repo::VehicleRepository;
