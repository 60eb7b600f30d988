// ==========================================
// Logging setup
// ==========================================
// tracing + tracing-subscriber
// Level from RUST_LOG, format from RATEBOOK_LOG_FORMAT
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// Set to `json` for one JSON object per event.
pub const LOG_FORMAT_ENV: &str = "RATEBOOK_LOG_FORMAT";

/// Initialize the global subscriber.
///
/// # Environment
/// - RUST_LOG: level filter (default: info)
///   e.g. RUST_LOG=debug or RUST_LOG=ratebook_ingest=trace
/// - RATEBOOK_LOG_FORMAT: `json` for structured output, anything else for text
///
/// # Example
/// ```no_run
/// use ratebook_ingest::logging;
/// logging::init();
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // logs go to stderr; stdout carries the import outcome
    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Test subscriber: debug level, captured by the test harness.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
