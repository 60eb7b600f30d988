// ==========================================
// Ratebook ingestion - config manager
// ==========================================
// Storage: config_kv table (scope_id = 'global')
// Stored column mappings: column_mapping/{provider}/{layout},
// falling back to column_mapping/{provider}
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::{CanonicalField, ColumnMapping, TableLayout};
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::error::RepositoryError;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// Config keys
// ==========================================
pub mod config_keys {
    pub const BATCH_SIZE: &str = "import.batch_size";
    pub const MAX_LOGGED_ERRORS: &str = "import.max_logged_errors";
    pub const MAX_REPORTED_ERRORS: &str = "import.max_reported_errors";
    pub const DEFAULT_TERM_MONTHS: &str = "import.default_term_months";
    pub const DEFAULT_ANNUAL_MILEAGE: &str = "import.default_annual_mileage";
    pub const FAILURE_ERROR_RATIO: &str = "import.failure_error_ratio";
    pub const ROW_RETRY_ON_INSERT_FAILURE: &str = "import.row_retry_on_insert_failure";
    pub const SUGGESTION_MIN_CONFIDENCE: &str = "mapping.suggestion_min_confidence";

    /// Prefix of stored column mappings.
    pub const COLUMN_MAPPING_PREFIX: &str = "column_mapping";
}

/// Key of a stored column mapping; `layout = None` is the provider-wide mapping.
pub fn column_mapping_key(provider_code: &str, layout: Option<TableLayout>) -> String {
    match layout {
        Some(layout) => format!(
            "{}/{}/{}",
            config_keys::COLUMN_MAPPING_PREFIX,
            provider_code.trim(),
            layout
        ),
        None => format!("{}/{}", config_keys::COLUMN_MAPPING_PREFIX, provider_code.trim()),
    }
}

// ==========================================
// ConfigManager
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// # Parameters
    /// - db_path: database file path
    pub fn new(db_path: &str) -> ImportResult<Self> {
        let conn = open_sqlite_connection(db_path).map_err(RepositoryError::from)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Share an existing connection. PRAGMAs are re-applied (idempotent).
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ImportResult<Self> {
        {
            let guard = conn.lock().map_err(RepositoryError::from)?;
            crate::db::configure_sqlite_connection(&guard).map_err(RepositoryError::from)?;
        }

        Ok(Self { conn })
    }

    /// Raw value from config_kv (scope_id='global').
    pub fn get_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        let conn = self.conn.lock().map_err(RepositoryError::from)?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(RepositoryError::from)?;
        Ok(value)
    }

    /// Insert or overwrite a global value.
    pub fn set_config_value(&self, key: &str, value: &str) -> ImportResult<()> {
        let conn = self.conn.lock().map_err(RepositoryError::from)?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    /// Store a column mapping for a provider (and optionally a single layout).
    pub fn save_column_mapping(
        &self,
        provider_code: &str,
        layout: Option<TableLayout>,
        mapping: &ColumnMapping,
    ) -> ImportResult<()> {
        let json = serde_json::to_string(mapping)?;
        self.set_config_value(&column_mapping_key(provider_code, layout), &json)
    }

    /// Parsed value, or the default when the key is absent.
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> ImportResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<T>().map_err(|e| ImportError::ConfigValueError {
                key: key.to_string(),
                value: raw.clone(),
                message: e.to_string(),
            }),
        }
    }

    fn parse_column_mapping(key: &str, raw: &str) -> ImportResult<ColumnMapping> {
        let entries: BTreeMap<String, Option<String>> =
            serde_json::from_str(raw).map_err(|e| ImportError::ConfigValueError {
                key: key.to_string(),
                value: raw.to_string(),
                message: e.to_string(),
            })?;

        let mut mapping = ColumnMapping::new();
        for (column, target) in entries {
            let field = match target.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(name) => match name.parse::<CanonicalField>() {
                    Ok(field) => Some(field),
                    Err(e) => {
                        warn!(key, column = %column, error = %e, "stored mapping target ignored");
                        None
                    }
                },
            };
            mapping.insert(column, field);
        }
        Ok(mapping)
    }
}

#[async_trait]
impl ImportConfigReader for ConfigManager {
    // ===== Row processing =====

    async fn get_batch_size(&self) -> ImportResult<usize> {
        let size = self.get_parsed_or_default(config_keys::BATCH_SIZE, 100usize)?;
        Ok(size.max(1))
    }

    async fn get_max_logged_errors(&self) -> ImportResult<usize> {
        self.get_parsed_or_default(config_keys::MAX_LOGGED_ERRORS, 100usize)
    }

    async fn get_max_reported_errors(&self) -> ImportResult<usize> {
        self.get_parsed_or_default(config_keys::MAX_REPORTED_ERRORS, 20usize)
    }

    async fn get_default_term_months(&self) -> ImportResult<i64> {
        self.get_parsed_or_default(config_keys::DEFAULT_TERM_MONTHS, 36i64)
    }

    async fn get_default_annual_mileage(&self) -> ImportResult<i64> {
        self.get_parsed_or_default(config_keys::DEFAULT_ANNUAL_MILEAGE, 10_000i64)
    }

    async fn get_failure_error_ratio(&self) -> ImportResult<f64> {
        let ratio = self.get_parsed_or_default(config_keys::FAILURE_ERROR_RATIO, 0.5f64)?;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ImportError::ConfigValueError {
                key: config_keys::FAILURE_ERROR_RATIO.to_string(),
                value: ratio.to_string(),
                message: "must be between 0 and 1".to_string(),
            });
        }
        Ok(ratio)
    }

    async fn get_row_retry_on_insert_failure(&self) -> ImportResult<bool> {
        self.get_parsed_or_default(config_keys::ROW_RETRY_ON_INSERT_FAILURE, false)
    }

    // ===== Column mapping =====

    async fn get_suggestion_min_confidence(&self) -> ImportResult<u8> {
        let value = self.get_parsed_or_default(config_keys::SUGGESTION_MIN_CONFIDENCE, 60u8)?;
        Ok(value.min(100))
    }

    async fn get_column_mapping(
        &self,
        provider_code: &str,
        layout: TableLayout,
    ) -> ImportResult<Option<ColumnMapping>> {
        for key in [
            column_mapping_key(provider_code, Some(layout)),
            column_mapping_key(provider_code, None),
        ] {
            if let Some(raw) = self.get_config_value(&key)? {
                return Ok(Some(Self::parse_column_mapping(&key, &raw)?));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_when_absent() {
        let config = manager();
        assert_eq!(config.get_batch_size().await.unwrap(), 100);
        assert_eq!(config.get_max_logged_errors().await.unwrap(), 100);
        assert_eq!(config.get_max_reported_errors().await.unwrap(), 20);
        assert_eq!(config.get_default_term_months().await.unwrap(), 36);
        assert_eq!(config.get_default_annual_mileage().await.unwrap(), 10000);
        assert_eq!(config.get_failure_error_ratio().await.unwrap(), 0.5);
        assert!(!config.get_row_retry_on_insert_failure().await.unwrap());
        assert_eq!(config.get_suggestion_min_confidence().await.unwrap(), 60);
        assert!(config
            .get_column_mapping("ALD", TableLayout::Flat)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_overrides_and_bad_values() {
        let config = manager();
        config.set_config_value(config_keys::BATCH_SIZE, "2").unwrap();
        config.set_config_value(config_keys::BATCH_SIZE, " 25 ").unwrap();
        assert_eq!(config.get_batch_size().await.unwrap(), 25);

        config.set_config_value(config_keys::FAILURE_ERROR_RATIO, "lots").unwrap();
        assert!(matches!(
            config.get_failure_error_ratio().await,
            Err(ImportError::ConfigValueError { .. })
        ));
        config.set_config_value(config_keys::FAILURE_ERROR_RATIO, "1.5").unwrap();
        assert!(config.get_failure_error_ratio().await.is_err());
    }

    #[tokio::test]
    async fn test_column_mapping_layout_then_provider_fallback() {
        let config = manager();
        let mut provider_wide = ColumnMapping::new();
        provider_wide.insert("Ref", Some(CanonicalField::CapCode));
        config.save_column_mapping("ALD", None, &provider_wide).unwrap();

        let mut matrix_only = ColumnMapping::new();
        matrix_only.insert("CAP Code", Some(CanonicalField::CapCode));
        config
            .save_column_mapping("ALD", Some(TableLayout::Matrix), &matrix_only)
            .unwrap();

        let flat = config.get_column_mapping("ALD", TableLayout::Flat).await.unwrap();
        assert_eq!(flat, Some(provider_wide));
        let matrix = config.get_column_mapping("ALD", TableLayout::Matrix).await.unwrap();
        assert_eq!(matrix, Some(matrix_only));
    }

    #[tokio::test]
    async fn test_unknown_stored_targets_become_unmapped() {
        let config = manager();
        config
            .set_config_value(
                "column_mapping/LEX",
                r#"{"CAP":"capCode","Colour":"paintColour","Notes":null,"Blank":""}"#,
            )
            .unwrap();

        let mapping = config
            .get_column_mapping("LEX", TableLayout::Flat)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mapping.get("CAP"), Some(CanonicalField::CapCode));
        assert!(mapping.contains_column("Colour"));
        assert_eq!(mapping.get("Colour"), None);
        assert_eq!(mapping.get("Blank"), None);

        config.set_config_value("column_mapping/BAD", "[1,2]").unwrap();
        assert!(config.get_column_mapping("BAD", TableLayout::Flat).await.is_err());
    }
}
