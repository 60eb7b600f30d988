// ==========================================
// Ratebook ingestion - importer error types
// ==========================================
// Tool: thiserror derive
// Fatal up front: structural / configuration / duplicate.
// Row-level problems are counted, never raised as ImportError.
// ==========================================

use crate::domain::CanonicalField;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// Importer error type
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== Structural =====
    #[error("Unsupported file format: {0} (expected .csv/.xlsx/.xls/.xlsb/.ods)")]
    UnsupportedFormat(String),

    #[error("File read failed: {0}")]
    FileReadError(String),

    #[error("Spreadsheet parse failed: {0}")]
    ExcelParseError(String),

    #[error("CSV parse failed: {0}")]
    CsvParseError(String),

    #[error("File contains no rows")]
    EmptyTable,

    #[error("No data rows found below the header row")]
    NoDataRows,

    // ===== Configuration =====
    #[error("Required fields are not mapped: {}", format_fields(.0))]
    MissingRequiredFields(Vec<CanonicalField>),

    #[error("Invalid config value (key: {key}, value: {value}): {message}")]
    ConfigValueError {
        key: String,
        value: String,
        message: String,
    },

    // ===== Duplicate =====
    #[error("Duplicate file: identical content was already imported for provider {provider_code} at {imported_at} (batch {batch_id})")]
    DuplicateImport {
        provider_code: String,
        batch_id: String,
        imported_at: String,
    },

    // ===== Persistence =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    // ===== Generic =====
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    /// Structural and configuration failures leave a failed batch record behind.
    pub fn is_recordable(&self) -> bool {
        matches!(
            self,
            ImportError::UnsupportedFormat(_)
                | ImportError::FileReadError(_)
                | ImportError::ExcelParseError(_)
                | ImportError::CsvParseError(_)
                | ImportError::EmptyTable
                | ImportError::NoDataRows
                | ImportError::MissingRequiredFields(_)
        )
    }

    /// Keys of the unmapped required fields; empty for other errors.
    pub fn missing_field_keys(&self) -> Vec<String> {
        match self {
            ImportError::MissingRequiredFields(fields) => {
                fields.iter().map(|f| f.key().to_string()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn format_fields(fields: &[CanonicalField]) -> String {
    fields
        .iter()
        .map(CanonicalField::key)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::InternalError(format!("JSON serialization failed: {}", err))
    }
}

/// Result alias
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_message_lists_keys() {
        let err = ImportError::MissingRequiredFields(vec![
            CanonicalField::CapCode,
            CanonicalField::TotalRental,
        ]);
        assert_eq!(err.to_string(), "Required fields are not mapped: capCode, totalRental");
        assert_eq!(err.missing_field_keys(), vec!["capCode", "totalRental"]);
        assert!(err.is_recordable());
        assert!(ImportError::EmptyTable.missing_field_keys().is_empty());
    }

    #[test]
    fn test_duplicate_message_mentions_duplicate_file() {
        let err = ImportError::DuplicateImport {
            provider_code: "ALD".to_string(),
            batch_id: "b-1".to_string(),
            imported_at: "2026-01-01T00:00:00+00:00".to_string(),
        };
        assert!(err.to_string().starts_with("Duplicate file"));
        assert!(!err.is_recordable());
    }
}
