// ==========================================
// Ratebook ingestion - import repository implementation
// ==========================================
// rusqlite behind Arc<Mutex<Connection>>; the lock is never held
// across an await point.
// Timestamps: RFC 3339, UTC, microseconds (sortable as text).
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::{
    BatchProgress, ImportBatch, ImportStatus, Provider, RateRecord, TableLayout,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::ratebook_import_repo::RatebookImportRepository;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex};
use tracing::debug;

const BATCH_COLUMNS: &str = "batch_id, import_id, provider_code, contract_type, source_file_name, \
     content_hash, layout, is_latest, total_rows, success_rows, error_rows, unique_cap_codes, \
     status, error_log, created_at, completed_at";

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn parse_timestamp(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, format!("bad timestamp {}: {}", raw, e)))
}

fn parse_layout(index: usize, raw: Option<String>) -> rusqlite::Result<Option<TableLayout>> {
    match raw.as_deref() {
        None => Ok(None),
        Some("flat") => Ok(Some(TableLayout::Flat)),
        Some("matrix") => Ok(Some(TableLayout::Matrix)),
        Some(other) => Err(conversion_error(index, format!("unknown layout: {}", other))),
    }
}

fn map_batch_row(row: &Row) -> rusqlite::Result<ImportBatch> {
    let status: String = row.get(12)?;
    let error_log: String = row.get(13)?;
    let created_at: String = row.get(14)?;
    let completed_at: Option<String> = row.get(15)?;

    Ok(ImportBatch {
        batch_id: row.get(0)?,
        import_id: row.get(1)?,
        provider_code: row.get(2)?,
        contract_type: row.get(3)?,
        source_file_name: row.get(4)?,
        content_hash: row.get(5)?,
        layout: parse_layout(6, row.get(6)?)?,
        is_latest: row.get::<_, i64>(7)? != 0,
        total_rows: row.get(8)?,
        success_rows: row.get(9)?,
        error_rows: row.get(10)?,
        unique_cap_codes: row.get(11)?,
        status: status.parse().map_err(|e: String| conversion_error(12, e))?,
        error_log: serde_json::from_str(&error_log)
            .map_err(|e| conversion_error(13, format!("bad error log: {}", e)))?,
        created_at: parse_timestamp(14, &created_at)?,
        completed_at: completed_at
            .map(|raw| parse_timestamp(15, &raw))
            .transpose()?,
    })
}

fn error_log_json(error_log: &[String]) -> RepositoryResult<String> {
    serde_json::to_string(error_log).map_err(|e| RepositoryError::InternalError(e.to_string()))
}

// ==========================================
// RatebookImportRepositoryImpl
// ==========================================
pub struct RatebookImportRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl RatebookImportRepositoryImpl {
    /// Open a dedicated connection.
    ///
    /// # Parameters
    /// - db_path: database file path
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Share an existing connection.
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn insert_batch_tx(tx: &Transaction, batch: &ImportBatch) -> RepositoryResult<()> {
        tx.execute(
            &format!(
                "INSERT INTO import_batch ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                BATCH_COLUMNS
            ),
            params![
                batch.batch_id,
                batch.import_id,
                batch.provider_code,
                batch.contract_type,
                batch.source_file_name,
                batch.content_hash,
                batch.layout.map(|l| l.to_string()),
                batch.is_latest as i64,
                batch.total_rows,
                batch.success_rows,
                batch.error_rows,
                batch.unique_cap_codes,
                batch.status.to_string(),
                error_log_json(&batch.error_log)?,
                format_timestamp(&batch.created_at),
                batch.completed_at.as_ref().map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    fn insert_rate_records_tx(
        tx: &Transaction,
        batch_id: &str,
        records: &[RateRecord],
    ) -> RepositoryResult<usize> {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO rate_record (
                batch_id, cap_code, provider_code, contract_type, manufacturer, model,
                variant, model_year, term, annual_mileage, upfront_rentals, total_rental,
                lease_rental, service_rental, p11d, co2_gkm, fuel_type, transmission,
                body_style, excess_mileage_ppm, whole_life_cost, otr_price, basic_list_price,
                insurance_group, mpg_combined, wltp_ev_range, euro_rating, vehicle_id, source_row
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29
            )
            "#,
        )?;

        let mut count = 0;
        for record in records {
            stmt.execute(params![
                batch_id,
                record.cap_code,
                record.provider_code,
                record.contract_type,
                record.manufacturer,
                record.model,
                record.variant,
                record.model_year,
                record.term,
                record.annual_mileage,
                record.upfront_rentals,
                record.total_rental,
                record.lease_rental,
                record.service_rental,
                record.p11d,
                record.co2_gkm,
                record.fuel_type,
                record.transmission,
                record.body_style,
                record.excess_mileage_ppm,
                record.whole_life_cost,
                record.otr_price,
                record.basic_list_price,
                record.insurance_group,
                record.mpg_combined,
                record.wltp_ev_range,
                record.euro_rating,
                record.vehicle_id,
                record.row_number as i64,
            ])?;
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl RatebookImportRepository for RatebookImportRepositoryImpl {
    async fn find_batch_by_hash(
        &self,
        provider_code: &str,
        content_hash: &str,
    ) -> RepositoryResult<Option<ImportBatch>> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "SELECT {} FROM import_batch \
             WHERE provider_code = ?1 AND content_hash = ?2 AND (status <> 'failed' OR success_rows > 0) \
             ORDER BY created_at ASC LIMIT 1",
            BATCH_COLUMNS
        );
        let batch = conn
            .query_row(&sql, params![provider_code, content_hash], map_batch_row)
            .optional()?;
        Ok(batch)
    }

    async fn ensure_provider(&self, provider_code: &str) -> RepositoryResult<Provider> {
        let conn = self.conn.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO provider (provider_code, name, created_at) VALUES (?1, ?1, ?2)",
            params![provider_code, format_timestamp(&Utc::now())],
        )?;
        if inserted > 0 {
            debug!(provider_code, "provider registered");
        }

        let (code, name, created_at): (String, String, String) = conn.query_row(
            "SELECT provider_code, name, created_at FROM provider WHERE provider_code = ?1",
            params![provider_code],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(Provider {
            provider_code: code,
            name,
            created_at: parse_timestamp(2, &created_at)?,
        })
    }

    async fn begin_batch(&self, batch: &ImportBatch) -> RepositoryResult<()> {
        let mut conn = self.conn.lock()?;
        // IMMEDIATE takes the write lock up front: concurrent imports for the
        // same key serialize here instead of both seeing "no latest batch".
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let demoted = tx.execute(
            "UPDATE import_batch SET is_latest = 0 \
             WHERE provider_code = ?1 AND contract_type = ?2 AND is_latest = 1",
            params![batch.provider_code, batch.contract_type],
        )?;
        Self::insert_batch_tx(&tx, batch)?;
        tx.commit()?;

        debug!(batch_id = %batch.batch_id, demoted, "batch created as latest");
        Ok(())
    }

    async fn record_failed_batch(&self, batch: &ImportBatch) -> RepositoryResult<()> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;
        Self::insert_batch_tx(&tx, batch)?;
        tx.commit()?;
        Ok(())
    }

    async fn insert_rate_records(
        &self,
        batch_id: &str,
        records: &[RateRecord],
    ) -> RepositoryResult<usize> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;
        let count = Self::insert_rate_records_tx(&tx, batch_id, records)?;
        tx.commit()?;
        Ok(count)
    }

    async fn update_progress(
        &self,
        batch_id: &str,
        progress: BatchProgress,
        error_log: &[String],
    ) -> RepositoryResult<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            r#"
            UPDATE import_batch SET
                total_rows = MAX(total_rows, ?2),
                success_rows = MAX(success_rows, ?3),
                error_rows = MAX(error_rows, ?4),
                unique_cap_codes = MAX(unique_cap_codes, ?5),
                error_log = ?6
            WHERE batch_id = ?1
            "#,
            params![
                batch_id,
                progress.total_rows,
                progress.success_rows,
                progress.error_rows,
                progress.unique_cap_codes,
                error_log_json(error_log)?,
            ],
        )?;
        Ok(())
    }

    async fn finalize_batch(
        &self,
        batch_id: &str,
        status: ImportStatus,
        progress: BatchProgress,
        error_log: &[String],
    ) -> RepositoryResult<()> {
        let conn = self.conn.lock()?;
        let updated = conn.execute(
            r#"
            UPDATE import_batch SET
                status = ?2,
                total_rows = MAX(total_rows, ?3),
                success_rows = MAX(success_rows, ?4),
                error_rows = MAX(error_rows, ?5),
                unique_cap_codes = MAX(unique_cap_codes, ?6),
                error_log = ?7,
                completed_at = ?8
            WHERE batch_id = ?1
            "#,
            params![
                batch_id,
                status.to_string(),
                progress.total_rows,
                progress.success_rows,
                progress.error_rows,
                progress.unique_cap_codes,
                error_log_json(error_log)?,
                format_timestamp(&Utc::now()),
            ],
        )?;

        if updated == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ImportBatch".to_string(),
                id: batch_id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> RepositoryResult<Option<ImportBatch>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM import_batch WHERE batch_id = ?1", BATCH_COLUMNS);
        Ok(conn.query_row(&sql, params![batch_id], map_batch_row).optional()?)
    }

    async fn list_batches(
        &self,
        provider_code: Option<&str>,
        contract_type: Option<&str>,
    ) -> RepositoryResult<Vec<ImportBatch>> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "SELECT {} FROM import_batch \
             WHERE (?1 IS NULL OR provider_code = ?1) AND (?2 IS NULL OR contract_type = ?2) \
             ORDER BY created_at DESC",
            BATCH_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let batches = stmt
            .query_map(params![provider_code, contract_type], map_batch_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    async fn latest_batch(
        &self,
        provider_code: &str,
        contract_type: &str,
    ) -> RepositoryResult<Option<ImportBatch>> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "SELECT {} FROM import_batch \
             WHERE provider_code = ?1 AND contract_type = ?2 AND is_latest = 1",
            BATCH_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![provider_code, contract_type], map_batch_row)
            .optional()?)
    }

    async fn count_rate_records(&self, batch_id: Option<&str>) -> RepositoryResult<i64> {
        let conn = self.conn.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM rate_record WHERE (?1 IS NULL OR batch_id = ?1)",
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn delete_batch(&self, batch_id: &str) -> RepositoryResult<bool> {
        let conn = self.conn.lock()?;
        let deleted = conn.execute("DELETE FROM import_batch WHERE batch_id = ?1", params![batch_id])?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn repo() -> RatebookImportRepositoryImpl {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        RatebookImportRepositoryImpl::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn batch(batch_id: &str, hash: &str, status: ImportStatus, is_latest: bool) -> ImportBatch {
        ImportBatch {
            batch_id: batch_id.to_string(),
            import_id: format!("imp-{}", batch_id),
            provider_code: "ALD".to_string(),
            contract_type: "BCH".to_string(),
            source_file_name: "rates.csv".to_string(),
            content_hash: hash.to_string(),
            layout: Some(TableLayout::Flat),
            is_latest,
            total_rows: 0,
            success_rows: 0,
            error_rows: 0,
            unique_cap_codes: 0,
            status,
            error_log: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn record(cap_code: &str) -> RateRecord {
        RateRecord {
            cap_code: cap_code.to_string(),
            provider_code: "ALD".to_string(),
            contract_type: "BCH".to_string(),
            manufacturer: "Kia".to_string(),
            model: "Niro".to_string(),
            variant: None,
            model_year: None,
            term: 36,
            annual_mileage: 10000,
            upfront_rentals: None,
            total_rental: 29900,
            lease_rental: None,
            service_rental: None,
            p11d: None,
            co2_gkm: Some(0),
            fuel_type: None,
            transmission: None,
            body_style: None,
            excess_mileage_ppm: None,
            whole_life_cost: None,
            otr_price: None,
            basic_list_price: None,
            insurance_group: None,
            mpg_combined: None,
            wltp_ev_range: None,
            euro_rating: None,
            vehicle_id: None,
            row_number: 2,
        }
    }

    #[tokio::test]
    async fn test_begin_batch_demotes_previous_latest() {
        let repo = repo();
        repo.ensure_provider("ALD").await.unwrap();
        repo.begin_batch(&batch("b1", "h1", ImportStatus::Processing, true))
            .await
            .unwrap();
        repo.begin_batch(&batch("b2", "h2", ImportStatus::Processing, true))
            .await
            .unwrap();

        let latest = repo.latest_batch("ALD", "BCH").await.unwrap().unwrap();
        assert_eq!(latest.batch_id, "b2");
        assert!(!repo.get_batch("b1").await.unwrap().unwrap().is_latest);
    }

    #[tokio::test]
    async fn test_duplicate_content_hits_unique_index() {
        let repo = repo();
        repo.ensure_provider("ALD").await.unwrap();
        repo.begin_batch(&batch("b1", "same", ImportStatus::Processing, true))
            .await
            .unwrap();
        let err = repo
            .begin_batch(&batch("b2", "same", ImportStatus::Processing, true))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        // the failed transaction must not have demoted b1
        assert!(repo.get_batch("b1").await.unwrap().unwrap().is_latest);
    }

    #[tokio::test]
    async fn test_failed_batches_without_rows_are_not_duplicates() {
        let repo = repo();
        repo.ensure_provider("ALD").await.unwrap();
        repo.record_failed_batch(&batch("f1", "h", ImportStatus::Failed, false))
            .await
            .unwrap();
        assert!(repo.find_batch_by_hash("ALD", "h").await.unwrap().is_none());

        repo.begin_batch(&batch("b1", "h", ImportStatus::Processing, true))
            .await
            .unwrap();
        let found = repo.find_batch_by_hash("ALD", "h").await.unwrap().unwrap();
        assert_eq!(found.batch_id, "b1");
    }

    #[tokio::test]
    async fn test_records_progress_and_cascade_delete() {
        let repo = repo();
        repo.ensure_provider("ALD").await.unwrap();
        repo.begin_batch(&batch("b1", "h1", ImportStatus::Processing, true))
            .await
            .unwrap();

        let inserted = repo
            .insert_rate_records("b1", &[record("A1"), record("A2")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let progress = BatchProgress {
            total_rows: 3,
            success_rows: 2,
            error_rows: 1,
            unique_cap_codes: 2,
        };
        repo.update_progress("b1", progress, &["Row 4: missing capCode".to_string()])
            .await
            .unwrap();
        // counters never go backwards
        repo.update_progress("b1", BatchProgress::default(), &[])
            .await
            .unwrap();
        repo.finalize_batch("b1", ImportStatus::Completed, progress, &["Row 4: missing capCode".to_string()])
            .await
            .unwrap();

        let stored = repo.get_batch("b1").await.unwrap().unwrap();
        assert_eq!(stored.status, ImportStatus::Completed);
        assert_eq!(stored.success_rows, 2);
        assert_eq!(stored.error_log, vec!["Row 4: missing capCode".to_string()]);
        assert!(stored.completed_at.is_some());
        assert_eq!(repo.count_rate_records(Some("b1")).await.unwrap(), 2);

        assert!(repo.delete_batch("b1").await.unwrap());
        assert_eq!(repo.count_rate_records(None).await.unwrap(), 0);
        assert!(!repo.delete_batch("b1").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_batches_filters() {
        let repo = repo();
        repo.ensure_provider("ALD").await.unwrap();
        repo.begin_batch(&batch("b1", "h1", ImportStatus::Processing, true))
            .await
            .unwrap();
        let mut other = batch("b2", "h2", ImportStatus::Processing, true);
        other.contract_type = "PCH".to_string();
        repo.begin_batch(&other).await.unwrap();

        assert_eq!(repo.list_batches(None, None).await.unwrap().len(), 2);
        assert_eq!(repo.list_batches(Some("ALD"), Some("PCH")).await.unwrap().len(), 1);
        assert!(repo.list_batches(Some("LEX"), None).await.unwrap().is_empty());
    }
}
