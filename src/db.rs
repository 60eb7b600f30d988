// ==========================================
// Ratebook ingestion - SQLite connection setup
// ==========================================
// Goals:
// - every Connection::open gets the same PRAGMAs (foreign keys are per connection)
// - one busy_timeout for all writers, so concurrent imports wait instead of failing
// - schema created idempotently; storage backstops for dedup and the latest flag
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;
use tracing::{info, warn};

/// Default busy_timeout (ms)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Schema version written by `init_schema`.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL DEFAULT 'global',
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS provider (
    provider_code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS import_batch (
    batch_id TEXT PRIMARY KEY,
    import_id TEXT NOT NULL,
    provider_code TEXT NOT NULL REFERENCES provider(provider_code),
    contract_type TEXT NOT NULL,
    source_file_name TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    layout TEXT,
    is_latest INTEGER NOT NULL DEFAULT 0,
    total_rows INTEGER NOT NULL DEFAULT 0,
    success_rows INTEGER NOT NULL DEFAULT 0,
    error_rows INTEGER NOT NULL DEFAULT 0,
    unique_cap_codes INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL CHECK (status IN ('processing', 'completed', 'failed')),
    error_log TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    completed_at TEXT
);

-- at most one latest batch per (provider, contract type)
CREATE UNIQUE INDEX IF NOT EXISTS ux_import_batch_latest
    ON import_batch(provider_code, contract_type) WHERE is_latest = 1;

-- same content imported twice for a provider (failed-without-rows batches excluded)
CREATE UNIQUE INDEX IF NOT EXISTS ux_import_batch_content
    ON import_batch(provider_code, content_hash) WHERE status <> 'failed' OR success_rows > 0;

CREATE INDEX IF NOT EXISTS ix_import_batch_created
    ON import_batch(provider_code, contract_type, created_at);

CREATE TABLE IF NOT EXISTS rate_record (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL REFERENCES import_batch(batch_id) ON DELETE CASCADE,
    cap_code TEXT NOT NULL,
    provider_code TEXT NOT NULL,
    contract_type TEXT NOT NULL,
    manufacturer TEXT NOT NULL,
    model TEXT NOT NULL,
    variant TEXT,
    model_year TEXT,
    term INTEGER NOT NULL,
    annual_mileage INTEGER NOT NULL,
    upfront_rentals INTEGER,
    total_rental INTEGER NOT NULL,
    lease_rental INTEGER,
    service_rental INTEGER,
    p11d INTEGER,
    co2_gkm INTEGER,
    fuel_type TEXT,
    transmission TEXT,
    body_style TEXT,
    excess_mileage_ppm INTEGER,
    whole_life_cost INTEGER,
    otr_price INTEGER,
    basic_list_price INTEGER,
    insurance_group TEXT,
    mpg_combined INTEGER,
    wltp_ev_range INTEGER,
    euro_rating TEXT,
    vehicle_id TEXT,
    source_row INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS ix_rate_record_batch ON rate_record(batch_id);
CREATE INDEX IF NOT EXISTS ix_rate_record_cap ON rate_record(cap_code);

CREATE TABLE IF NOT EXISTS vehicle (
    vehicle_id TEXT PRIMARY KEY,
    cap_code TEXT NOT NULL UNIQUE,
    manufacturer TEXT,
    model TEXT,
    variant TEXT
);
"#;

/// Apply the shared PRAGMAs to a connection.
///
/// foreign_keys and busy_timeout are per-connection settings.
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// Open a SQLite connection with the shared configuration.
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// Create all tables and indexes (idempotent) and record the schema version.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// Open a connection and make sure the schema exists.
pub fn open_and_init(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;

    match read_schema_version(&conn)? {
        Some(v) if v > CURRENT_SCHEMA_VERSION => {
            warn!(db_path, found = v, expected = CURRENT_SCHEMA_VERSION, "database schema is newer than this build");
        }
        version => info!(db_path, ?version, "database ready"),
    }
    Ok(conn)
}

/// Read schema_version (None when the table does not exist)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
