// ==========================================
// Ratebook ingestion - config layer
// ==========================================
// Storage: config_kv table
// Import settings and stored column mappings
// ==========================================

pub mod config_manager;
pub mod import_config_trait;

pub use config_manager::{column_mapping_key, config_keys, ConfigManager};
pub use import_config_trait::ImportConfigReader;
