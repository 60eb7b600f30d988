// ==========================================
// Ratebook import API
// ==========================================
// Wires the concrete pipeline components onto one SQLite connection.
// Import calls always return an ImportOutcome: fatal errors become a
// rejected outcome carrying the error message.
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigManager;
use crate::db::open_and_init;
use crate::domain::{ColumnMapping, ImportBatch, ImportOutcome, ImportRequest, RawTable, TableLayout};
use crate::importer::{
    ColumnMappingResolver, MappingSuggestionService, RateRecordMapper, RatebookImporter,
    RatebookImporterImpl, ScoringService, UniversalFileParser,
};
use crate::repository::{RatebookImportRepository, RatebookImportRepositoryImpl, VehicleRepository};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

// ==========================================
// NoopScoringService
// ==========================================
/// Scoring stand-in for deployments without a scoring engine.
pub struct NoopScoringService;

#[async_trait]
impl ScoringService for NoopScoringService {
    async fn recompute_for_batch(&self, batch_id: &str) -> anyhow::Result<()> {
        info!(batch_id, "scoring recomputation skipped (no scoring service)");
        Ok(())
    }
}

type Importer = RatebookImporterImpl<RatebookImportRepositoryImpl, ConfigManager>;

/// Ratebook import API
pub struct RatebookImportApi {
    importer: Importer,
    import_repo: RatebookImportRepositoryImpl,
    config: ConfigManager,
    vehicles: VehicleRepository,
}

impl RatebookImportApi {
    /// Open (and if needed create) the database at `db_path`.
    pub fn new(db_path: &str) -> ApiResult<Self> {
        let conn = open_and_init(db_path).map_err(|e| {
            ApiError::DatabaseConnectionError(format!("cannot open {}: {}", db_path, e))
        })?;
        Self::with_services(Arc::new(Mutex::new(conn)), Box::new(NoopScoringService), None)
    }

    /// Build on an existing connection with explicit collaborators.
    ///
    /// The schema must already exist on `conn`.
    pub fn with_services(
        conn: Arc<Mutex<Connection>>,
        scoring_service: Box<dyn ScoringService>,
        suggestion_service: Option<Box<dyn MappingSuggestionService>>,
    ) -> ApiResult<Self> {
        let mapping_resolver = match suggestion_service {
            Some(service) => ColumnMappingResolver::with_suggestion_service(service),
            None => ColumnMappingResolver::new(),
        };

        let importer = RatebookImporterImpl::new(
            RatebookImportRepositoryImpl::from_connection(conn.clone()),
            ConfigManager::from_connection(conn.clone())?,
            Box::new(UniversalFileParser),
            Box::new(RateRecordMapper),
            mapping_resolver,
            Box::new(VehicleRepository::from_connection(conn.clone())),
            scoring_service,
        );

        Ok(Self {
            importer,
            import_repo: RatebookImportRepositoryImpl::from_connection(conn.clone()),
            config: ConfigManager::from_connection(conn.clone())?,
            vehicles: VehicleRepository::from_connection(conn),
        })
    }

    // ==========================================
    // Imports
    // ==========================================

    /// Import a ratebook file from disk.
    pub async fn import_file(
        &self,
        file_path: &str,
        provider_code: &str,
        contract_type: &str,
    ) -> ImportOutcome {
        let bytes = match tokio::fs::read(file_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file_path, error = %e, "cannot read import file");
                return ImportOutcome::rejected(
                    Uuid::new_v4().to_string(),
                    format!("File read failed: {}: {}", file_path, e),
                );
            }
        };

        let file_name = Path::new(file_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.to_string());

        self.import_bytes(provider_code, contract_type, &file_name, bytes)
            .await
    }

    /// Import an in-memory file buffer.
    pub async fn import_bytes(
        &self,
        provider_code: &str,
        contract_type: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> ImportOutcome {
        let request = match Self::request(provider_code, contract_type, file_name, bytes) {
            Ok(request) => request,
            Err(e) => return ImportOutcome::rejected(Uuid::new_v4().to_string(), e.to_string()),
        };
        Self::into_outcome(self.importer.import_file(request).await)
    }

    /// Import a pre-parsed table (rows already read by the caller).
    pub async fn import_table(
        &self,
        provider_code: &str,
        contract_type: &str,
        source_name: &str,
        table: RawTable,
    ) -> ImportOutcome {
        if let Err(e) = Self::validate_keys(provider_code, contract_type) {
            return ImportOutcome::rejected(Uuid::new_v4().to_string(), e.to_string());
        }
        Self::into_outcome(
            self.importer
                .import_table(provider_code.trim(), contract_type.trim(), source_name, table)
                .await,
        )
    }

    /// Import several files for one provider concurrently.
    pub async fn import_files(
        &self,
        provider_code: &str,
        contract_type: &str,
        files: Vec<(String, Vec<u8>)>,
    ) -> Vec<ImportOutcome> {
        let mut requests = Vec::with_capacity(files.len());
        let mut rejected = Vec::new();
        for (index, (file_name, bytes)) in files.into_iter().enumerate() {
            match Self::request(provider_code, contract_type, &file_name, bytes) {
                Ok(request) => requests.push(request),
                Err(e) => rejected.push((index, e.to_string())),
            }
        }

        let mut outcomes: Vec<ImportOutcome> = self
            .importer
            .batch_import(requests)
            .await
            .into_iter()
            .map(Self::into_outcome)
            .collect();

        for (index, message) in rejected {
            outcomes.insert(index, ImportOutcome::rejected(Uuid::new_v4().to_string(), message));
        }
        outcomes
    }

    // ==========================================
    // Batch queries and administration
    // ==========================================

    pub async fn get_import_status(&self, batch_id: &str) -> ApiResult<ImportBatch> {
        self.import_repo
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("ImportBatch (id={})", batch_id)))
    }

    pub async fn list_imports(
        &self,
        provider_code: Option<&str>,
        contract_type: Option<&str>,
    ) -> ApiResult<Vec<ImportBatch>> {
        Ok(self
            .import_repo
            .list_batches(provider_code, contract_type)
            .await?)
    }

    pub async fn latest_import(
        &self,
        provider_code: &str,
        contract_type: &str,
    ) -> ApiResult<Option<ImportBatch>> {
        Ok(self
            .import_repo
            .latest_batch(provider_code, contract_type)
            .await?)
    }

    /// Administrative delete; the batch's rate records go with it.
    pub async fn delete_import(&self, batch_id: &str) -> ApiResult<()> {
        if self.import_repo.delete_batch(batch_id).await? {
            info!(batch_id, "import batch deleted");
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("ImportBatch (id={})", batch_id)))
        }
    }

    pub async fn count_rate_records(&self, batch_id: Option<&str>) -> ApiResult<i64> {
        Ok(self.import_repo.count_rate_records(batch_id).await?)
    }

    // ==========================================
    // Mapping and reference data
    // ==========================================

    /// Store the authoritative column mapping for a provider.
    pub fn save_column_mapping(
        &self,
        provider_code: &str,
        layout: Option<TableLayout>,
        mapping: &ColumnMapping,
    ) -> ApiResult<()> {
        if provider_code.trim().is_empty() {
            return Err(ApiError::InvalidInput("provider code must not be empty".to_string()));
        }
        Ok(self.config.save_column_mapping(provider_code, layout, mapping)?)
    }

    pub fn set_config_value(&self, key: &str, value: &str) -> ApiResult<()> {
        Ok(self.config.set_config_value(key, value)?)
    }

    pub fn vehicles(&self) -> &VehicleRepository {
        &self.vehicles
    }

    fn validate_keys(provider_code: &str, contract_type: &str) -> ApiResult<()> {
        if provider_code.trim().is_empty() {
            return Err(ApiError::InvalidInput("provider code must not be empty".to_string()));
        }
        if contract_type.trim().is_empty() {
            return Err(ApiError::InvalidInput("contract type must not be empty".to_string()));
        }
        Ok(())
    }

    fn request(
        provider_code: &str,
        contract_type: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> ApiResult<ImportRequest> {
        Self::validate_keys(provider_code, contract_type)?;
        Ok(ImportRequest {
            provider_code: provider_code.trim().to_string(),
            contract_type: contract_type.trim().to_string(),
            file_name: file_name.to_string(),
            bytes,
        })
    }

    fn into_outcome(result: crate::importer::ImportResult<ImportOutcome>) -> ImportOutcome {
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let missing_fields = e.missing_field_keys();
                let message = ApiError::from(e).to_string();
                warn!(error = %message, "import rejected");
                ImportOutcome {
                    missing_fields,
                    ..ImportOutcome::rejected(Uuid::new_v4().to_string(), message)
                }
            }
        }
    }
}
