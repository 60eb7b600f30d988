// ==========================================
// Ratebook ingestion - importer implementation
// ==========================================
// Flow: hash -> dedup -> provider -> parse -> shape -> mapping
//       -> begin batch (latest flip) -> row batches* -> scoring -> finalize
// Duplicate content is raised. Structural / configuration failures
// are recorded as a failed batch and reported in the outcome;
// everything after the batch exists is counted, never raised.
// ==========================================

use crate::config::ImportConfigReader;
use crate::domain::{
    BatchProgress, ImportBatch, ImportOutcome, ImportRequest, ImportStatus, RateRecord, RawTable,
    SourceTable, TableLayout, TableShape,
};
use crate::importer::column_mapping::{ColumnMappingResolver, MappingResolution};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::{is_unknown_text, CanonicalRow, FieldIndex, RowContext};
use crate::importer::matrix_transposer::MatrixTransposer;
use crate::importer::ratebook_importer_trait::{
    FieldMapper, FileParser, RatebookImporter, ScoringService, VehicleLookup,
};
use crate::importer::shape_detector::ShapeDetector;
use crate::repository::RatebookImportRepository;
use chrono::Utc;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// SHA-256 of the input, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ==========================================
// ImportSettings - config snapshot for one import
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub max_logged_errors: usize,
    pub max_reported_errors: usize,
    pub default_term_months: i64,
    pub default_annual_mileage: i64,
    pub failure_error_ratio: f64,
    pub row_retry_on_insert_failure: bool,
    pub suggestion_min_confidence: u8,
}

impl ImportSettings {
    pub async fn load<C: ImportConfigReader>(config: &C) -> ImportResult<Self> {
        Ok(Self {
            batch_size: config.get_batch_size().await?.max(1),
            max_logged_errors: config.get_max_logged_errors().await?,
            max_reported_errors: config.get_max_reported_errors().await?,
            default_term_months: config.get_default_term_months().await?,
            default_annual_mileage: config.get_default_annual_mileage().await?,
            failure_error_ratio: config.get_failure_error_ratio().await?,
            row_retry_on_insert_failure: config.get_row_retry_on_insert_failure().await?,
            suggestion_min_confidence: config.get_suggestion_min_confidence().await?,
        })
    }

    /// `failed` once error rows exceed the configured share of all rows.
    pub fn verdict(&self, progress: &BatchProgress) -> ImportStatus {
        if progress.error_rows as f64 > progress.total_rows as f64 * self.failure_error_ratio {
            ImportStatus::Failed
        } else {
            ImportStatus::Completed
        }
    }
}

// ==========================================
// ProgressTracker - per-import counters
// ==========================================
// Counters only grow. The log holds at most `max_logged_errors`
// messages: row errors first, then one note per failing collaborator.
// Notes keep their slots when row errors would fill the log.
struct ProgressTracker {
    total_rows: i64,
    success_rows: i64,
    error_rows: i64,
    cap_codes: HashSet<String>,
    row_errors: Vec<String>,
    notes: Vec<(NoteSource, String)>,
    max_logged_errors: usize,
}

/// Where a non-row message came from; each source is noted once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoteSource {
    VehicleLookup,
    Scoring,
    Abort,
}

impl ProgressTracker {
    fn new(max_logged_errors: usize) -> Self {
        Self {
            total_rows: 0,
            success_rows: 0,
            error_rows: 0,
            cap_codes: HashSet::new(),
            row_errors: Vec::new(),
            notes: Vec::new(),
            max_logged_errors,
        }
    }

    fn row_error(&mut self, count: usize, message: String) {
        self.error_rows += count as i64;
        if self.row_errors.len() < self.max_logged_errors {
            self.row_errors.push(message);
        }
    }

    /// First failure of `source` is kept; repeats are dropped.
    fn note(&mut self, source: NoteSource, message: String) {
        if self.notes.iter().any(|(noted, _)| *noted == source) {
            return;
        }
        self.notes.push((source, message));
    }

    fn imported(&mut self, records: &[RateRecord]) {
        self.success_rows += records.len() as i64;
        self.cap_codes
            .extend(records.iter().map(|record| record.cap_code.clone()));
    }

    fn progress(&self) -> BatchProgress {
        BatchProgress {
            total_rows: self.total_rows,
            success_rows: self.success_rows,
            error_rows: self.error_rows,
            unique_cap_codes: self.cap_codes.len() as i64,
        }
    }

    fn error_log(&self) -> Vec<String> {
        self.first_errors(self.max_logged_errors)
    }

    /// At most `limit` messages, row errors ahead of notes.
    fn first_errors(&self, limit: usize) -> Vec<String> {
        let notes = self.notes.len().min(limit);
        let rows = self.row_errors.len().min(limit - notes);
        self.row_errors[..rows]
            .iter()
            .chain(self.notes[..notes].iter().map(|(_, message)| message))
            .cloned()
            .collect()
    }
}

/// Input of one attempt, before parsing.
enum ImportSource<'a> {
    Bytes { file_name: &'a str, bytes: &'a [u8] },
    Table(RawTable),
}

/// Parsed, shaped and mapped input, ready for row processing.
struct PreparedImport {
    source: SourceTable,
    resolution: MappingResolution,
}

// ==========================================
// RatebookImporterImpl
// ==========================================
pub struct RatebookImporterImpl<R, C>
where
    R: RatebookImportRepository,
    C: ImportConfigReader,
{
    // data access
    import_repo: R,

    // configuration
    config: C,

    // pipeline components
    file_parser: Box<dyn FileParser>,
    field_mapper: Box<dyn FieldMapper>,
    mapping_resolver: ColumnMappingResolver,
    shape_detector: ShapeDetector,
    matrix_transposer: MatrixTransposer,

    // collaborators
    vehicle_lookup: Box<dyn VehicleLookup>,
    scoring_service: Box<dyn ScoringService>,
}

impl<R, C> RatebookImporterImpl<R, C>
where
    R: RatebookImportRepository,
    C: ImportConfigReader,
{
    pub fn new(
        import_repo: R,
        config: C,
        file_parser: Box<dyn FileParser>,
        field_mapper: Box<dyn FieldMapper>,
        mapping_resolver: ColumnMappingResolver,
        vehicle_lookup: Box<dyn VehicleLookup>,
        scoring_service: Box<dyn ScoringService>,
    ) -> Self {
        Self {
            import_repo,
            config,
            file_parser,
            field_mapper,
            mapping_resolver,
            shape_detector: ShapeDetector,
            matrix_transposer: MatrixTransposer,
            vehicle_lookup,
            scoring_service,
        }
    }

    async fn run_import(
        &self,
        provider_code: &str,
        contract_type: &str,
        source_name: &str,
        content_hash: String,
        input: ImportSource<'_>,
    ) -> ImportResult<ImportOutcome> {
        let started = Instant::now();
        let import_id = Uuid::new_v4().to_string();
        info!(import_id = %import_id, provider_code, contract_type, source_name, "import started");

        let settings = ImportSettings::load(&self.config).await?;

        // === Step 1: dedup by content ===
        if let Some(existing) = self
            .import_repo
            .find_batch_by_hash(provider_code, &content_hash)
            .await?
        {
            warn!(batch_id = %existing.batch_id, "duplicate content rejected");
            return Err(ImportError::DuplicateImport {
                provider_code: provider_code.to_string(),
                batch_id: existing.batch_id,
                imported_at: existing.created_at.to_rfc3339(),
            });
        }

        // === Step 2: provider ===
        self.import_repo.ensure_provider(provider_code).await?;

        // === Step 3: parse, shape, mapping (latest flag untouched) ===
        let mut draft = ImportBatch {
            batch_id: Uuid::new_v4().to_string(),
            import_id: import_id.clone(),
            provider_code: provider_code.to_string(),
            contract_type: contract_type.to_string(),
            source_file_name: source_name.to_string(),
            content_hash,
            layout: None,
            is_latest: false,
            total_rows: 0,
            success_rows: 0,
            error_rows: 0,
            unique_cap_codes: 0,
            status: ImportStatus::Processing,
            error_log: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        };

        let prepared = self.prepare(provider_code, input, &settings, &mut draft).await;
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) if e.is_recordable() => {
                return match self.record_failure(draft, &e).await {
                    Some(failed) => {
                        let mut outcome =
                            ImportOutcome::failed_batch(&failed, e.to_string(), e.missing_field_keys());
                        outcome.elapsed_ms = started.elapsed().as_millis() as i64;
                        Ok(outcome)
                    }
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        };

        // === Step 4: new latest batch ===
        let batch = ImportBatch {
            is_latest: true,
            created_at: Utc::now(),
            ..draft
        };
        self.begin_batch(&batch).await?;
        info!(
            batch_id = %batch.batch_id,
            layout = %prepared.source.layout,
            rows = prepared.source.rows.len(),
            mapping_source = %prepared.resolution.source,
            "batch created"
        );

        // === Step 5-6: row batches ===
        let mut tracker = ProgressTracker::new(settings.max_logged_errors);
        if let Err(e) = self
            .process_rows(&batch, &prepared, &settings, &mut tracker)
            .await
        {
            error!(batch_id = %batch.batch_id, error = %e, "row processing aborted");
            tracker.note(NoteSource::Abort, format!("Import aborted: {}", e));
            let progress = tracker.progress();
            if let Err(finalize_err) = self
                .import_repo
                .finalize_batch(&batch.batch_id, ImportStatus::Failed, progress, &tracker.error_log())
                .await
            {
                error!(error = %finalize_err, "could not mark aborted batch as failed");
            }
            return Err(e);
        }

        // === Step 7: scoring (best effort) ===
        if let Err(e) = self.scoring_service.recompute_for_batch(&batch.batch_id).await {
            warn!(batch_id = %batch.batch_id, error = %e, "scoring recomputation failed");
            tracker.note(NoteSource::Scoring, format!("Scoring recomputation failed: {}", e));
        }

        // === Step 8: finalize ===
        let progress = tracker.progress();
        let status = settings.verdict(&progress);
        let error_log = tracker.error_log();
        self.import_repo
            .finalize_batch(&batch.batch_id, status, progress, &error_log)
            .await?;

        let elapsed_ms = started.elapsed().as_millis() as i64;
        info!(
            batch_id = %batch.batch_id,
            status = %status,
            total_rows = progress.total_rows,
            success_rows = progress.success_rows,
            error_rows = progress.error_rows,
            unique_cap_codes = progress.unique_cap_codes,
            elapsed_ms,
            "import finished"
        );

        Ok(ImportOutcome {
            success: status == ImportStatus::Completed,
            import_id,
            batch_id: Some(batch.batch_id),
            status: Some(status),
            layout: Some(prepared.source.layout),
            mapping_source: Some(prepared.resolution.source),
            total_rows: progress.total_rows,
            success_rows: progress.success_rows,
            error_rows: progress.error_rows,
            unique_cap_codes: progress.unique_cap_codes,
            errors: tracker.first_errors(settings.max_reported_errors.min(settings.max_logged_errors)),
            missing_fields: Vec::new(),
            elapsed_ms,
        })
    }

    /// Parse, detect shape, build the source table and resolve its mapping.
    /// Records the detected layout on `draft` as soon as it is known.
    async fn prepare(
        &self,
        provider_code: &str,
        input: ImportSource<'_>,
        settings: &ImportSettings,
        draft: &mut ImportBatch,
    ) -> ImportResult<PreparedImport> {
        let table = match input {
            ImportSource::Bytes { file_name, bytes } => self.file_parser.parse_bytes(file_name, bytes)?,
            ImportSource::Table(table) if table.is_empty() => return Err(ImportError::EmptyTable),
            ImportSource::Table(table) => table,
        };
        debug!(raw_rows = table.len(), "file parsed");

        let shape = self.shape_detector.detect(&table);
        draft.layout = Some(shape.layout());

        let source = self.build_source_table(&table, &shape);
        if source.rows.is_empty() {
            return Err(ImportError::NoDataRows);
        }

        let stored = self
            .config
            .get_column_mapping(provider_code, source.layout)
            .await?;
        let resolution = self
            .mapping_resolver
            .resolve(provider_code, &source, stored, settings.suggestion_min_confidence)
            .await;
        resolution.validate()?;

        Ok(PreparedImport { source, resolution })
    }

    fn build_source_table(&self, table: &RawTable, shape: &TableShape) -> SourceTable {
        match *shape {
            TableShape::Flat { header_row_index } => {
                self.shape_detector.split_flat(table, header_row_index)
            }
            TableShape::Matrix { .. } => match self.matrix_transposer.transpose(table, shape) {
                Some(matrix) => matrix.unpivot(),
                None => SourceTable {
                    layout: TableLayout::Matrix,
                    headers: Vec::new(),
                    rows: Vec::new(),
                },
            },
        }
    }

    async fn begin_batch(&self, batch: &ImportBatch) -> ImportResult<()> {
        match self.import_repo.begin_batch(batch).await {
            Ok(()) => Ok(()),
            // same content committed by a concurrent import since the dedup check
            Err(e) if e.is_unique_violation() => {
                let existing = self
                    .import_repo
                    .find_batch_by_hash(&batch.provider_code, &batch.content_hash)
                    .await?;
                warn!(error = %e, "duplicate content detected at batch creation");
                Err(ImportError::DuplicateImport {
                    provider_code: batch.provider_code.clone(),
                    batch_id: existing
                        .as_ref()
                        .map(|b| b.batch_id.clone())
                        .unwrap_or_default(),
                    imported_at: existing
                        .map(|b| b.created_at.to_rfc3339())
                        .unwrap_or_default(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Leave a failed, non-latest batch behind for a structural or mapping failure.
    /// Returns the batch once it is stored.
    async fn record_failure(&self, draft: ImportBatch, cause: &ImportError) -> Option<ImportBatch> {
        let batch = ImportBatch {
            status: ImportStatus::Failed,
            is_latest: false,
            error_log: vec![cause.to_string()],
            completed_at: Some(Utc::now()),
            ..draft
        };
        warn!(batch_id = %batch.batch_id, error = %cause, "import rejected before row processing");
        match self.import_repo.record_failed_batch(&batch).await {
            Ok(()) => Some(batch),
            Err(e) => {
                error!(error = %e, "could not record failed batch");
                None
            }
        }
    }

    async fn process_rows(
        &self,
        batch: &ImportBatch,
        prepared: &PreparedImport,
        settings: &ImportSettings,
        tracker: &mut ProgressTracker,
    ) -> ImportResult<()> {
        let index = FieldIndex::build(&prepared.source.headers, &prepared.resolution.mapping);
        let context = RowContext {
            provider_code: batch.provider_code.clone(),
            contract_type: batch.contract_type.clone(),
            default_term_months: settings.default_term_months,
            default_annual_mileage: settings.default_annual_mileage,
        };

        for (chunk_no, chunk) in prepared.source.rows.chunks(settings.batch_size).enumerate() {
            let mut records = Vec::with_capacity(chunk.len());
            for row in chunk {
                tracker.total_rows += 1;
                let canonical = CanonicalRow::from_source(row, &index);
                match self.field_mapper.map_row(&canonical, &context) {
                    Ok(record) => records.push(record),
                    Err(message) => {
                        debug!(error = %message, "row rejected");
                        tracker.row_error(1, message);
                    }
                }
            }

            self.cross_reference(&mut records, tracker).await;
            self.insert_chunk(&batch.batch_id, records, settings, tracker)
                .await;

            self.import_repo
                .update_progress(&batch.batch_id, tracker.progress(), &tracker.error_log())
                .await?;
            debug!(chunk_no, progress = ?tracker.progress(), "row batch processed");
        }
        Ok(())
    }

    /// Backfill vehicle ids, and names the row lacks, from the vehicle master.
    async fn cross_reference(&self, records: &mut [RateRecord], tracker: &mut ProgressTracker) {
        if records.is_empty() {
            return;
        }
        let cap_codes: Vec<String> = records
            .iter()
            .map(|r| r.cap_code.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let vehicles = match self.vehicle_lookup.find_by_cap_codes(&cap_codes).await {
            Ok(vehicles) => vehicles,
            Err(e) => {
                warn!(error = %e, "vehicle lookup failed");
                tracker.note(NoteSource::VehicleLookup, format!("Vehicle lookup failed: {}", e));
                return;
            }
        };
        let by_cap: HashMap<&str, _> = vehicles.iter().map(|v| (v.cap_code.as_str(), v)).collect();

        for record in records.iter_mut() {
            let Some(vehicle) = by_cap.get(record.cap_code.as_str()) else {
                continue;
            };
            record.vehicle_id = Some(vehicle.vehicle_id.clone());
            if is_unknown_text(Some(record.manufacturer.as_str())) && !is_unknown_text(vehicle.manufacturer.as_deref()) {
                record.manufacturer = vehicle.manufacturer.clone().unwrap_or_default();
            }
            if is_unknown_text(Some(record.model.as_str())) && !is_unknown_text(vehicle.model.as_deref()) {
                record.model = vehicle.model.clone().unwrap_or_default();
            }
            if is_unknown_text(record.variant.as_deref()) && !is_unknown_text(vehicle.variant.as_deref()) {
                record.variant = vehicle.variant.clone();
            }
        }
    }

    async fn insert_chunk(
        &self,
        batch_id: &str,
        records: Vec<RateRecord>,
        settings: &ImportSettings,
        tracker: &mut ProgressTracker,
    ) {
        if records.is_empty() {
            return;
        }

        let err = match self.import_repo.insert_rate_records(batch_id, &records).await {
            Ok(_) => {
                tracker.imported(&records);
                return;
            }
            Err(e) => e,
        };

        if !settings.row_retry_on_insert_failure {
            let first = records.first().map(|r| r.row_number).unwrap_or_default();
            let last = records.last().map(|r| r.row_number).unwrap_or_default();
            warn!(batch_id, rows = records.len(), error = %err, "bulk insert failed");
            tracker.row_error(
                records.len(),
                format!("Rows {}-{}: insert failed for {} rows: {}", first, last, records.len(), err),
            );
            return;
        }

        warn!(batch_id, rows = records.len(), error = %err, "bulk insert failed, retrying row by row");
        for record in records {
            let single = std::slice::from_ref(&record);
            match self.import_repo.insert_rate_records(batch_id, single).await {
                Ok(_) => tracker.imported(single),
                Err(e) => tracker.row_error(1, format!("Row {}: insert failed: {}", record.row_number, e)),
            }
        }
    }
}

#[async_trait::async_trait]
impl<R, C> RatebookImporter for RatebookImporterImpl<R, C>
where
    R: RatebookImportRepository + Send + Sync,
    C: ImportConfigReader + Send + Sync,
{
    #[instrument(skip(self, request), fields(provider_code = %request.provider_code, file = %request.file_name))]
    async fn import_file(&self, request: ImportRequest) -> ImportResult<ImportOutcome> {
        let hash = content_hash(&request.bytes);
        self.run_import(
            &request.provider_code,
            &request.contract_type,
            &request.file_name,
            hash,
            ImportSource::Bytes {
                file_name: &request.file_name,
                bytes: &request.bytes,
            },
        )
        .await
    }

    #[instrument(skip(self, table), fields(rows = table.len()))]
    async fn import_table(
        &self,
        provider_code: &str,
        contract_type: &str,
        source_name: &str,
        table: RawTable,
    ) -> ImportResult<ImportOutcome> {
        let hash = content_hash(&serde_json::to_vec(&table.rows)?);
        self.run_import(
            provider_code,
            contract_type,
            source_name,
            hash,
            ImportSource::Table(table),
        )
        .await
    }

    async fn batch_import(&self, requests: Vec<ImportRequest>) -> Vec<ImportResult<ImportOutcome>> {
        info!(files = requests.len(), "batch import started");
        let results = join_all(requests.into_iter().map(|request| self.import_file(request))).await;

        let succeeded = results
            .iter()
            .filter(|r| matches!(r, Ok(outcome) if outcome.success))
            .count();
        info!(succeeded, failed = results.len() - succeeded, "batch import finished");
        results
    }
}
