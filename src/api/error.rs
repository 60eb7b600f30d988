// ==========================================
// Ratebook ingestion - API error types
// ==========================================
// Converts repository / importer errors into caller-facing messages.
// Every message names its cause explicitly.
// ==========================================

use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    // ===== Input =====
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ===== Import =====
    #[error("{0}")]
    DuplicateImport(String),

    #[error("Import failed: {0}")]
    ImportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ===== Data access =====
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Database connection failed: {0}")]
    DatabaseConnectionError(String),

    #[error("Database transaction failed: {0}")]
    DatabaseTransactionError(String),

    // ===== Generic =====
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// From RepositoryError
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{} (id={})", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("connection lock failed: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::DatabaseError(format!("unique constraint violated: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::DatabaseError(format!("foreign key violated: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("field {}: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// From ImportError
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Repository(e) => e.into(),
            ImportError::DuplicateImport { .. } => ApiError::DuplicateImport(err.to_string()),
            ImportError::ConfigValueError { .. } | ImportError::MissingRequiredFields(_) => {
                ApiError::ConfigError(err.to_string())
            }
            ImportError::InternalError(msg) => ApiError::InternalError(msg),
            ImportError::Other(e) => ApiError::Other(e),
            other => ApiError::ImportError(other.to_string()),
        }
    }
}

/// Result alias
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CanonicalField;

    #[test]
    fn test_import_errors_keep_their_category() {
        let dup: ApiError = ImportError::DuplicateImport {
            provider_code: "ALD".to_string(),
            batch_id: "b1".to_string(),
            imported_at: "2026-01-01T00:00:00Z".to_string(),
        }
        .into();
        assert!(matches!(dup, ApiError::DuplicateImport(_)));
        assert!(dup.to_string().contains("Duplicate file"));

        let missing: ApiError =
            ImportError::MissingRequiredFields(vec![CanonicalField::CapCode]).into();
        assert!(matches!(missing, ApiError::ConfigError(_)));

        let repo: ApiError = ImportError::Repository(RepositoryError::NotFound {
            entity: "ImportBatch".to_string(),
            id: "x".to_string(),
        })
        .into();
        assert!(matches!(repo, ApiError::NotFound(_)));

        let structural: ApiError = ImportError::EmptyTable.into();
        assert!(matches!(structural, ApiError::ImportError(_)));
    }
}
