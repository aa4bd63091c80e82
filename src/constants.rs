//! Central Configuration Constants
//!
//! Single source of truth for defaults shared by every daemon.
//! Values that can be tuned at runtime live in `logic::config`.

use std::path::{Path, PathBuf};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/ai_defender.json";

/// Default state directory (blocklist, event log, queue, agent memory)
pub const DEFAULT_STATE_DIR: &str = "/var/db/ai_defender";

/// Default lock directory for single-instance daemons
pub const DEFAULT_LOCK_DIR: &str = "/var/run";

/// Packet-filter table shared by every enforcement path
pub const DEFAULT_BLOCK_TABLE: &str = "ai_blocklist";

/// Event log size that triggers truncation (1 MB)
pub const EVENT_LOG_MAX_BYTES: u64 = 1024 * 1024;

/// Lines kept after an event log truncation
pub const EVENT_LOG_KEEP_LINES: usize = 250;

/// Deception transcript cap per session (4 KB)
pub const SESSION_TRANSCRIPT_CAP: usize = 4096;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "AI Defender";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Config file path from environment or default
pub fn get_config_path() -> String {
    std::env::var("AI_DEFENDER_CONFIG")
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// State directory: `$AI_DEFENDER_STATE_DIR`, else the system path when
/// its parent exists, else the user's local data directory
pub fn get_state_dir() -> PathBuf {
    if let Some(dir) = non_empty_env("AI_DEFENDER_STATE_DIR") {
        return PathBuf::from(dir);
    }

    let system = Path::new(DEFAULT_STATE_DIR);
    if system.parent().map_or(false, Path::exists) {
        return system.to_path_buf();
    }

    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ai_defender")
}

/// Model provider API key (never stored in the config file)
pub fn get_model_api_key() -> Option<String> {
    non_empty_env("AI_DEFENDER_API_KEY")
}

/// AbuseIPDB API key for enrichment
pub fn get_abuseipdb_key() -> Option<String> {
    non_empty_env("AI_DEFENDER_ABUSEIPDB_KEY")
}

/// AlienVault OTX API key for enrichment
pub fn get_otx_key() -> Option<String> {
    non_empty_env("AI_DEFENDER_OTX_KEY")
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
