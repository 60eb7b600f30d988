// ==========================================
// Ratebook ingestion - command-line entry
// ==========================================
// Usage: ratebook-ingest <provider> <contract-type> <file>...
// Database: $RATEBOOK_DB, else <data dir>/ratebook-ingest/ratebook.db
// Prints one ImportOutcome (JSON) per file on stdout.
// ==========================================

use anyhow::{bail, Context};
use ratebook_ingest::{logging, RatebookImportApi};
use std::path::PathBuf;

const DB_ENV: &str = "RATEBOOK_DB";

fn default_db_path() -> anyhow::Result<String> {
    if let Ok(path) = std::env::var(DB_ENV) {
        if !path.trim().is_empty() {
            return Ok(path);
        }
    }

    let dir: PathBuf = dirs::data_dir()
        .context("no platform data directory; set RATEBOOK_DB")?
        .join(ratebook_ingest::APP_NAME);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create {}", dir.display()))?;

    Ok(dir.join("ratebook.db").to_string_lossy().into_owned())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        bail!("usage: ratebook-ingest <provider> <contract-type> <file>...");
    }
    let (provider_code, contract_type, files) = (&args[0], &args[1], &args[2..]);

    let db_path = default_db_path()?;
    tracing::info!(version = ratebook_ingest::VERSION, db_path = %db_path, "ratebook-ingest starting");
    let api = RatebookImportApi::new(&db_path)?;

    let mut failures = 0;
    for file in files {
        let outcome = api.import_file(file, provider_code, contract_type).await;
        if !outcome.success {
            failures += 1;
        }
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    if failures > 0 {
        bail!("{} of {} imports did not complete", failures, files.len());
    }
    Ok(())
}
