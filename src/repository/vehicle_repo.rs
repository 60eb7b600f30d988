// ==========================================
// Ratebook ingestion - vehicle master repository
// ==========================================
// Read side used by the importer (VehicleLookup) plus an upsert
// for loading the master list.
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::VehicleMatch;
use crate::importer::ratebook_importer_trait::VehicleLookup;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection};
use std::sync::{Arc, Mutex};

/// Bound parameters per lookup query (SQLite's default limit is 999 on old builds).
const LOOKUP_CHUNK: usize = 500;

pub struct VehicleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl VehicleRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Insert or replace a vehicle keyed by CAP code.
    pub fn upsert(&self, vehicle: &VehicleMatch) -> RepositoryResult<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            r#"
            INSERT INTO vehicle (vehicle_id, cap_code, manufacturer, model, variant)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(cap_code) DO UPDATE SET
                vehicle_id = excluded.vehicle_id,
                manufacturer = excluded.manufacturer,
                model = excluded.model,
                variant = excluded.variant
            "#,
            params![
                vehicle.vehicle_id,
                vehicle.cap_code,
                vehicle.manufacturer,
                vehicle.model,
                vehicle.variant,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_cap_codes_sync(&self, cap_codes: &[String]) -> RepositoryResult<Vec<VehicleMatch>> {
        let conn = self.conn.lock()?;
        let mut found = Vec::new();

        for chunk in cap_codes.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT cap_code, vehicle_id, manufacturer, model, variant FROM vehicle WHERE cap_code IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok(VehicleMatch {
                    cap_code: row.get(0)?,
                    vehicle_id: row.get(1)?,
                    manufacturer: row.get(2)?,
                    model: row.get(3)?,
                    variant: row.get(4)?,
                })
            })?;
            for vehicle in rows {
                found.push(vehicle?);
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl VehicleLookup for VehicleRepository {
    async fn find_by_cap_codes(&self, cap_codes: &[String]) -> anyhow::Result<Vec<VehicleMatch>> {
        if cap_codes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.find_by_cap_codes_sync(cap_codes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    #[tokio::test]
    async fn test_lookup_returns_known_codes_only() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        let repo = VehicleRepository::from_connection(Arc::new(Mutex::new(conn)));

        repo.upsert(&VehicleMatch {
            cap_code: "KINI16EV5HPIA".to_string(),
            vehicle_id: "veh-1".to_string(),
            manufacturer: Some("Kia".to_string()),
            model: Some("Niro".to_string()),
            variant: None,
        })
        .unwrap();

        let found = repo
            .find_by_cap_codes(&["KINI16EV5HPIA".to_string(), "NOPE".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].vehicle_id, "veh-1");
        assert!(repo.find_by_cap_codes(&[]).await.unwrap().is_empty());
    }
}
