//! Defender Configuration
//!
//! One explicit struct handed to every component at construction.
//! Loops take an `Arc` snapshot at the top of each cycle so a config
//! rewrite never tears a cycle in half.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// CONFIG TYPES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefenderConfig {
    pub paths: PathsConfig,
    pub model: ModelConfig,
    pub monitor: MonitorConfig,
    pub enrichment: EnrichmentConfig,
    pub notify: NotifyConfig,
    pub enforcement: EnforcementConfig,
    pub agents: AgentsConfig,
    pub deception: DeceptionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub state_dir: PathBuf,
    pub lock_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: constants::get_state_dir(),
            lock_dir: PathBuf::from(constants::DEFAULT_LOCK_DIR),
        }
    }
}

impl PathsConfig {
    pub fn blocklist(&self) -> PathBuf {
        self.state_dir.join("ai_blocklist.json")
    }

    pub fn event_log(&self) -> PathBuf {
        self.state_dir.join("ai_events.log")
    }

    pub fn queue_db(&self) -> PathBuf {
        self.state_dir.join("ai_queue.db")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("ai_sessions")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.state_dir.join("agents")
    }

    pub fn lock_file(&self, daemon: &str) -> PathBuf {
        self.lock_dir.join(format!("ai_{}.pid", daemon))
    }
}

/// Model provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Mistral,
    Groq,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Mistral => "mistral",
            Provider::Groq => "groq",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-1.5-flash",
            Provider::Mistral => "mistral-small-latest",
            Provider::Groq => "llama-3.1-8b-instant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: Provider,
    /// Overrides the provider default when set
    pub model: Option<String>,
    /// Overrides the provider endpoint (self-hosted proxies)
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            model: None,
            endpoint: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enable: bool,
    /// Single-event block threshold (accumulated threshold is 1.5x)
    pub threshold: f64,
    pub ttl_hours: u64,
    pub batch_size: usize,
    pub idle_backoff_secs: u64,
    pub log_sources: Vec<PathBuf>,
    pub dedup_window_secs: i64,
    pub dedup_capacity: usize,
    /// Seconds of inactivity before a risk record is dropped
    pub risk_ttl_secs: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enable: true,
            threshold: 0.7,
            ttl_hours: 24,
            batch_size: 5,
            idle_backoff_secs: 2,
            log_sources: vec![
                PathBuf::from("/var/log/filter.log"),
                PathBuf::from("/var/log/suricata/eve.json"),
                PathBuf::from("/var/log/snort/alert"),
                PathBuf::from("/var/log/ai_honeypot.log"),
            ],
            dedup_window_secs: 10,
            dedup_capacity: 1000,
            risk_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enable: bool,
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self { enable: false, timeout_secs: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub syslog: bool,
    pub webhooks: Vec<WebhookConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { syslog: true, webhooks: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub platform: WebhookPlatform,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookPlatform {
    Slack,
    Discord,
    #[default]
    Generic,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    pub pfctl: PathBuf,
    pub table: String,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            pfctl: PathBuf::from("/sbin/pfctl"),
            table: constants::DEFAULT_BLOCK_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub triager: TriagerConfig,
    pub guardian: GuardianConfig,
    pub sinkhole: SinkholeConfig,
    pub overseer: OverseerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriagerConfig {
    pub poll_secs: u64,
    pub eve_log: PathBuf,
    pub cooldown_secs: i64,
}

impl Default for TriagerConfig {
    fn default() -> Self {
        Self {
            poll_secs: 15,
            eve_log: PathBuf::from("/var/log/suricata/eve.json"),
            cooldown_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub poll_secs: u64,
    pub config_artifact: PathBuf,
    pub services: Vec<String>,
    pub system_log: PathBuf,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            poll_secs: 60,
            config_artifact: PathBuf::from("/conf/config.xml"),
            services: vec![
                "unbound".to_string(),
                "dpinger".to_string(),
                "sshd".to_string(),
            ],
            system_log: PathBuf::from("/var/log/system.log"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkholeConfig {
    pub poll_secs: u64,
    pub resolver_log: PathBuf,
    pub fragment: PathBuf,
    pub resolver_conf: PathBuf,
    pub sinkhole_ip: String,
    /// Substrings that exempt a domain from analysis
    pub allowlist: Vec<String>,
    pub min_confidence: f64,
}

impl Default for SinkholeConfig {
    fn default() -> Self {
        Self {
            poll_secs: 60,
            resolver_log: PathBuf::from("/var/log/resolver.log"),
            fragment: PathBuf::from("/var/unbound/ai_void.conf"),
            resolver_conf: PathBuf::from("/var/unbound/unbound.conf"),
            sinkhole_ip: "127.0.0.1".to_string(),
            allowlist: vec![
                "local".to_string(),
                "arpa".to_string(),
                "google.com".to_string(),
            ],
            min_confidence: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerConfig {
    pub poll_secs: u64,
    pub auth_log: PathBuf,
    pub vpn_log: PathBuf,
    pub max_speed_kmh: f64,
    pub repeat_window_secs: i64,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            poll_secs: 60,
            auth_log: PathBuf::from("/var/log/auth.log"),
            vpn_log: PathBuf::from("/var/log/openvpn.log"),
            max_speed_kmh: 900.0,
            repeat_window_secs: 300,
        }
    }
}

/// Emulated protocol behind a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorProtocol {
    Http,
    Shell,
    Banner,
}

impl MirrorProtocol {
    pub fn for_port(port: u16) -> Self {
        if port == 80 || port == 8080 {
            MirrorProtocol::Http
        } else {
            MirrorProtocol::Shell
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub port: u16,
    #[serde(default)]
    pub protocol: Option<MirrorProtocol>,
}

impl ListenerConfig {
    pub fn protocol(&self) -> MirrorProtocol {
        self.protocol.unwrap_or_else(|| MirrorProtocol::for_port(self.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeceptionConfig {
    pub bind_addr: String,
    pub listeners: Vec<ListenerConfig>,
    pub model_timeout_secs: u64,
}

impl Default for DeceptionConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            listeners: vec![
                ListenerConfig { port: 8080, protocol: None },
                ListenerConfig { port: 2323, protocol: None },
            ],
            model_timeout_secs: 30,
        }
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl DefenderConfig {
    /// Load from file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("Config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Accumulated-score block threshold
    pub fn accumulated_threshold(&self) -> f64 {
        self.monitor.threshold * 1.5
    }
}

/// Snapshot source that re-reads the file only when it changed on disk
pub struct ConfigHandle {
    path: PathBuf,
    state: Mutex<(Option<SystemTime>, Arc<DefenderConfig>)>,
}

impl ConfigHandle {
    pub fn open(path: PathBuf) -> Result<Self, ConfigError> {
        let config = DefenderConfig::load(&path)?;
        let mtime = modified(&path);
        Ok(Self {
            path,
            state: Mutex::new((mtime, Arc::new(config))),
        })
    }

    /// Fixed snapshot with no backing file
    pub fn fixed(config: DefenderConfig) -> Self {
        Self {
            path: PathBuf::new(),
            state: Mutex::new((None, Arc::new(config))),
        }
    }

    /// Current configuration. A file that became unreadable keeps the last good snapshot.
    pub fn snapshot(&self) -> Arc<DefenderConfig> {
        let mut state = self.state.lock();
        let mtime = modified(&self.path);

        if mtime.is_some() && mtime != state.0 {
            match DefenderConfig::load(&self.path) {
                Ok(config) => {
                    log::info!("Config reloaded from {}", self.path.display());
                    *state = (mtime, Arc::new(config));
                }
                Err(e) => {
                    log::warn!("Config reload failed, keeping previous: {}", e);
                    state.0 = mtime;
                }
            }
        }

        state.1.clone()
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
