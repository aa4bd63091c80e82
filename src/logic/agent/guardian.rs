//! Config & Health Guardian
//!
//! Watches the integrity of the host configuration artifact and the
//! liveness of a fixed list of services. Drift is reviewed by the model;
//! each failed service gets a restart|ignore remediation verdict.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Agent, Cycle};
use crate::logic::config::DefenderConfig;
use crate::logic::heuristics::verdict::{lenient_label, lenient_text};
use crate::logic::response::{Alert, AlertSeverity, Notifier, ServiceControl};

const DRIFT_PROMPT: &str = "A configuration change was detected on the firewall. Analyze whether it fits \
a normal maintenance pattern or looks suspicious. \
Return JSON: {\"verdict\": \"suspicious\"|\"benign\", \"reason\": \"...\"}";

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct DriftVerdict {
    #[serde(default, deserialize_with = "lenient_label")]
    pub verdict: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemediationVerdict {
    #[serde(default, deserialize_with = "lenient_label")]
    pub action: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Remediation {
    Restart,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDrift {
    pub previous: String,
    pub current: String,
    pub detected_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceFailure {
    pub since: i64,
    #[serde(default)]
    pub decision: Option<Remediation>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianMemory {
    pub last_config_hash: Option<String>,
    pub pending_drift: Option<ConfigDrift>,
    pub service_failures: BTreeMap<String, ServiceFailure>,
}

// ============================================================================
// AGENT
// ============================================================================

pub struct Guardian {
    services: Arc<dyn ServiceControl>,
    notifier: Arc<dyn Notifier>,
}

impl Guardian {
    pub fn new(services: Arc<dyn ServiceControl>, notifier: Arc<dyn Notifier>) -> Self {
        Self { services, notifier }
    }
}

/// SHA-256 of a file, hex encoded
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

impl Agent for Guardian {
    type State = GuardianMemory;

    fn name(&self) -> &'static str {
        "guardian"
    }

    fn description(&self) -> &'static str {
        "Monitors config integrity and service health, self-heals failed services"
    }

    fn poll_interval(&self, config: &DefenderConfig) -> Duration {
        Duration::from_secs(config.agents.guardian.poll_secs.max(1))
    }

    fn observe(&mut self, cx: &mut Cycle<'_, GuardianMemory>) {
        let settings = &cx.config.agents.guardian;
        let memory = &mut *cx.memory;

        match hash_file(&settings.config_artifact) {
            Ok(current) => {
                if let Some(previous) = memory.last_config_hash.as_ref().filter(|h| **h != current) {
                    log::warn!("[Agent:guardian] Config change detected in {}", settings.config_artifact.display());
                    memory.pending_drift = Some(ConfigDrift {
                        previous: previous.clone(),
                        current: current.clone(),
                        detected_at: cx.now,
                    });
                }
                memory.last_config_hash = Some(current);
            }
            Err(e) => log::debug!("[Agent:guardian] Cannot hash {}: {}", settings.config_artifact.display(), e),
        }

        for svc in &settings.services {
            if self.services.is_running(svc) {
                if memory.service_failures.remove(svc).is_some() {
                    log::info!("[Agent:guardian] Service {} recovered", svc);
                }
            } else if !memory.service_failures.contains_key(svc) {
                log::warn!("[Agent:guardian] Service {} is NOT running", svc);
                memory
                    .service_failures
                    .insert(svc.clone(), ServiceFailure { since: cx.now, decision: None });
            }
        }
    }

    fn analyze(&mut self, cx: &mut Cycle<'_, GuardianMemory>) {
        if let Some(drift) = cx.memory.pending_drift.clone() {
            let when = Utc
                .timestamp_opt(drift.detected_at, 0)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            let down: Vec<&String> = cx.memory.service_failures.keys().collect();
            let user = format!(
                "Config hash changed from {} to {} at {}. Services currently down: {:?}.",
                drift.previous, drift.current, when, down
            );

            match cx.ask_verdict::<DriftVerdict>(DRIFT_PROMPT, &user) {
                Ok(verdict) => {
                    cx.memory.pending_drift = None;
                    if let Some(v) = verdict.filter(|v| v.verdict.as_deref() == Some("suspicious")) {
                        let reason = v.reason.unwrap_or_else(|| "unexplained change".to_string());
                        log::warn!("[Agent:guardian] Suspicious config change: {}", reason);
                        self.notifier.notify(&Alert::new(
                            AlertSeverity::Warning,
                            "Suspicious configuration change",
                            &reason,
                        ));
                    }
                }
                Err(_) => return,
            }
        }

        let undecided: Vec<String> = cx
            .memory
            .service_failures
            .iter()
            .filter(|(_, f)| f.decision.is_none())
            .map(|(svc, _)| svc.clone())
            .collect();

        for svc in undecided {
            let logs = self.services.recent_logs(&svc, &cx.config.agents.guardian.system_log);
            let system = format!(
                "Service '{}' has failed. Analyze the recent logs and suggest a fix. \
                 Return JSON: {{\"action\": \"restart\"|\"ignore\", \"reason\": \"...\"}}",
                svc
            );

            let decision = match cx.ask_verdict::<RemediationVerdict>(&system, &format!("Service Logs:\n{}", logs)) {
                Ok(Some(v)) if v.action.as_deref() == Some("restart") => Remediation::Restart,
                Ok(Some(v)) => {
                    log::info!(
                        "[Agent:guardian] Leaving {} down: {}",
                        svc,
                        v.reason.as_deref().unwrap_or("model advised ignore")
                    );
                    Remediation::Ignore
                }
                Ok(None) => continue,
                Err(_) => break,
            };

            if let Some(failure) = cx.memory.service_failures.get_mut(&svc) {
                failure.decision = Some(decision);
            }
        }
    }

    fn act(&mut self, cx: &mut Cycle<'_, GuardianMemory>) {
        let restarts: Vec<String> = cx
            .memory
            .service_failures
            .iter()
            .filter(|(_, f)| f.decision == Some(Remediation::Restart))
            .map(|(svc, _)| svc.clone())
            .collect();

        for svc in restarts {
            log::warn!("[Agent:guardian] Self-healing: restarting {}", svc);
            match self.services.restart(&svc) {
                Ok(()) => {
                    cx.memory.service_failures.remove(&svc);
                }
                Err(e) => {
                    log::error!("[Agent:guardian] Restart of {} failed: {}", svc, e);
                    if let Some(failure) = cx.memory.service_failures.get_mut(&svc) {
                        failure.decision = None;
                    }
                }
            }
        }
    }
}
