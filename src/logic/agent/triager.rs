//! Alert Triager
//!
//! Reads IDS alerts from the suricata eve.json stream, asks the model to
//! separate targeted attacks from background noise, and blocks the
//! sources of real high-severity alerts. A signature is analysed at most
//! once per cooldown window.

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tail::{read_new_lines, TailCursor};
use super::{cap_front, escalate, Agent, Cycle, MAX_PENDING};
use crate::logic::config::DefenderConfig;
use crate::logic::heuristics::is_public_ipv4;
use crate::logic::heuristics::verdict::{lenient_label, lenient_text};
use crate::logic::response::Enforcer;
use crate::logic::store::EventLog;

const SYSTEM_PROMPT: &str = "Analyze this IDS alert. Is it likely a false positive given the context \
(e.g. common background noise), or a high-intent targeted attack? \
Return JSON: {\"verdict\": \"real\"|\"noise\", \"severity\": \"high\"|\"low\", \"reason\": \"...\"}";

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdsAlert {
    pub signature_id: String,
    pub signature: String,
    #[serde(default)]
    pub category: String,
    pub src_ip: String,
    #[serde(default)]
    pub dest_port: Option<u64>,
}

impl IdsAlert {
    /// An `alert` event from eve.json; every other event type is ignored
    pub fn from_eve(line: &str) -> Option<Self> {
        let event: Value = serde_json::from_str(line).ok()?;
        if event.get("event_type").and_then(Value::as_str) != Some("alert") {
            return None;
        }

        let alert = event.get("alert")?;
        let signature_id = match alert.get("signature_id")? {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => return None,
        };

        Some(Self {
            signature_id,
            signature: alert.get("signature").and_then(Value::as_str).unwrap_or("unknown").to_string(),
            category: alert.get("category").and_then(Value::as_str).unwrap_or_default().to_string(),
            src_ip: event.get("src_ip").and_then(Value::as_str)?.to_string(),
            dest_port: event.get("dest_port").and_then(Value::as_u64),
        })
    }

    fn prompt(&self) -> String {
        let port = self.dest_port.map(|p| p.to_string()).unwrap_or_else(|| "n/a".to_string());
        format!(
            "Alert: {}. Category: {}. Source: {}. Target Port: {}.",
            self.signature, self.category, self.src_ip, port
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertVerdict {
    #[serde(default, deserialize_with = "lenient_label")]
    pub verdict: Option<String>,
    #[serde(default, deserialize_with = "lenient_label")]
    pub severity: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reason: Option<String>,
}

impl AlertVerdict {
    pub fn is_actionable(&self) -> bool {
        self.verdict.as_deref() == Some("real") && self.severity.as_deref() == Some("high")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub ip: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriagerMemory {
    pub eve_path: Option<PathBuf>,
    pub cursor: Option<TailCursor>,
    /// signature id -> last time it was queued for analysis
    pub analyzed_sigs: HashMap<String, i64>,
    pub pending_alerts: Vec<IdsAlert>,
    pub escalations: Vec<Escalation>,
}

// ============================================================================
// AGENT
// ============================================================================

pub struct Triager {
    enforcer: Arc<dyn Enforcer>,
    events: Arc<EventLog>,
}

impl Triager {
    pub fn new(enforcer: Arc<dyn Enforcer>, events: Arc<EventLog>) -> Self {
        Self { enforcer, events }
    }
}

/// The configured stream, or the most recently modified per-interface one
pub fn discover_eve_log(configured: &Path) -> Option<PathBuf> {
    if configured.exists() {
        return Some(configured.to_path_buf());
    }

    let root = configured.parent()?;
    let file_name = configured.file_name()?;

    fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join(file_name))
        .filter_map(|candidate| {
            let modified = fs::metadata(&candidate).and_then(|m| m.modified()).ok()?;
            Some((modified, candidate))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

impl Agent for Triager {
    type State = TriagerMemory;

    fn name(&self) -> &'static str {
        "triager"
    }

    fn description(&self) -> &'static str {
        "Processes IDS alerts, prunes false positives and escalates targeted attacks"
    }

    fn poll_interval(&self, config: &DefenderConfig) -> Duration {
        Duration::from_secs(config.agents.triager.poll_secs.max(1))
    }

    fn observe(&mut self, cx: &mut Cycle<'_, TriagerMemory>) {
        let settings = &cx.config.agents.triager;
        let Some(path) = discover_eve_log(&settings.eve_log) else {
            return;
        };

        let memory = &mut *cx.memory;
        if memory.eve_path.as_ref() != Some(&path) {
            log::info!("[Agent:triager] Following {}", path.display());
            memory.eve_path = Some(path.clone());
            memory.cursor = None;
        }

        let lines = match read_new_lines(&path, &mut memory.cursor) {
            Ok(lines) => lines,
            Err(e) => {
                log::debug!("[Agent:triager] Cannot read {}: {}", path.display(), e);
                return;
            }
        };

        let cooldown = settings.cooldown_secs;
        let now = cx.now;
        memory.analyzed_sigs.retain(|_, last| now - *last <= cooldown);

        for alert in lines.iter().filter_map(|line| IdsAlert::from_eve(line)) {
            if memory.analyzed_sigs.contains_key(&alert.signature_id) {
                continue;
            }
            memory.analyzed_sigs.insert(alert.signature_id.clone(), now);
            memory.pending_alerts.push(alert);
        }
        cap_front(&mut memory.pending_alerts, MAX_PENDING);
    }

    fn analyze(&mut self, cx: &mut Cycle<'_, TriagerMemory>) {
        let pending = std::mem::take(&mut cx.memory.pending_alerts);
        let mut remaining = pending.into_iter();

        while let Some(alert) = remaining.next() {
            match cx.ask_verdict::<AlertVerdict>(SYSTEM_PROMPT, &alert.prompt()) {
                Ok(Some(verdict)) if verdict.is_actionable() => {
                    if !is_external(&alert.src_ip) {
                        log::warn!(
                            "[Agent:triager] Real alert from internal source {}, not blocking: {}",
                            alert.src_ip,
                            alert.signature
                        );
                        continue;
                    }
                    let reason = verdict.reason.unwrap_or_else(|| "targeted attack".to_string());
                    cx.memory.escalations.push(Escalation {
                        ip: alert.src_ip.clone(),
                        reason: format!("{} (Sig: {})", reason, alert.signature),
                    });
                }
                Ok(Some(_)) => {
                    log::info!("[Agent:triager] Pruned noise: {} from {}", alert.signature, alert.src_ip);
                }
                Ok(None) => {}
                Err(_) => {
                    // Model unreachable: keep this alert and the rest for next cycle
                    cx.memory.pending_alerts.push(alert);
                    cx.memory.pending_alerts.extend(remaining);
                    break;
                }
            }
        }
    }

    fn act(&mut self, cx: &mut Cycle<'_, TriagerMemory>) {
        for esc in std::mem::take(&mut cx.memory.escalations) {
            escalate("triager", self.enforcer.as_ref(), &self.events, &esc.ip, &esc.reason);
        }
    }
}

/// Sources outside private, loopback and link-local ranges
fn is_external(src: &str) -> bool {
    match src.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_public_ipv4(&v4),
        Ok(IpAddr::V6(v6)) => {
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || first & 0xfe00 == 0xfc00
                || first & 0xffc0 == 0xfe80)
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::agent::AgentRuntime;
    use crate::logic::config::ConfigHandle;
    use crate::logic::gateway::GatewayError;
    use crate::logic::store::EventKind;
    use crate::logic::testing::{RecordingEnforcer, ScriptedGateway};
    use std::io::Write;

    fn alert_line(sid: u64, src: &str) -> String {
        format!(
            r#"{{"event_type":"alert","src_ip":"{}","dest_port":22,"alert":{{"signature_id":{},"signature":"ET SCAN ssh","category":"Attempted Recon"}}}}"#,
            src, sid
        )
    }

    fn append(path: &Path, lines: &[String]) {
        let mut f = fs::OpenOptions::new().create(true).append(true).open(path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        eve: PathBuf,
        enforcer: Arc<RecordingEnforcer>,
        events: Arc<EventLog>,
        runtime: AgentRuntime<Triager>,
    }

    fn harness(gateway: ScriptedGateway) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let eve = dir.path().join("eve.json");
        fs::write(&eve, "").unwrap();

        let mut config = DefenderConfig::default();
        config.agents.triager.eve_log = eve.clone();

        let enforcer = Arc::new(RecordingEnforcer::default());
        let events = Arc::new(EventLog::new(dir.path().join("ai_events.log")));
        let runtime = AgentRuntime::new(
            Triager::new(enforcer.clone(), events.clone()),
            &dir.path().join("agents"),
            Arc::new(gateway),
            Arc::new(ConfigHandle::fixed(config)),
        );

        Harness { _dir: dir, eve, enforcer, events, runtime }
    }

    #[test]
    fn test_parses_only_alert_events() {
        assert!(IdsAlert::from_eve(&alert_line(2001, "203.0.113.8")).is_some());
        assert!(IdsAlert::from_eve(r#"{"event_type":"flow","src_ip":"1.2.3.4"}"#).is_none());
        assert!(IdsAlert::from_eve("garbage").is_none());
    }

    #[test]
    fn test_real_high_alert_is_escalated() {
        let mut h = harness(ScriptedGateway::replying(&[
            r#"Result: {"verdict": "real", "severity": "high", "reason": "credential stuffing"}"#,
        ]));
        h.runtime.run_cycle_at(1_000);

        append(&h.eve, &[alert_line(2001, "203.0.113.8")]);
        h.runtime.run_cycle_at(1_015);

        assert_eq!(*h.enforcer.added.lock(), vec!["203.0.113.8".to_string()]);
        let events = h.events.read_recent(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Escalation);
        assert!(events[0].reason.contains("credential stuffing"));
    }

    #[test]
    fn test_internal_source_is_never_blocked() {
        let verdict = r#"{"verdict": "real", "severity": "high", "reason": "lateral movement"}"#;
        let mut h = harness(ScriptedGateway::replying(&[verdict, verdict]));
        h.runtime.run_cycle_at(0);

        append(&h.eve, &[alert_line(31, "10.0.0.7"), alert_line(32, "fd00::12")]);
        h.runtime.run_cycle_at(15);

        assert!(h.enforcer.added.lock().is_empty());
        assert!(h.events.read_recent(10).is_empty());
        assert!(h.runtime.memory().pending_alerts.is_empty());
    }

    #[test]
    fn test_external_source_check() {
        assert!(is_external("203.0.113.8"));
        assert!(is_external("2001:db8::1"));
        assert!(!is_external("192.168.1.20"));
        assert!(!is_external("127.0.0.1"));
        assert!(!is_external("fe80::1"));
        assert!(!is_external("not-an-ip"));
    }

    #[test]
    fn test_signature_cooldown() {
        let gateway = ScriptedGateway::replying(&[
            r#"{"verdict": "noise", "severity": "low", "reason": "scanner"}"#,
            r#"{"verdict": "noise", "severity": "low", "reason": "scanner"}"#,
        ]);
        let mut h = harness(gateway);
        h.runtime.run_cycle_at(0);

        append(&h.eve, &[alert_line(7, "198.51.100.1"), alert_line(7, "198.51.100.2")]);
        h.runtime.run_cycle_at(10);
        assert!(h.enforcer.added.lock().is_empty());
        assert!(h.runtime.memory().pending_alerts.is_empty());

        append(&h.eve, &[alert_line(7, "198.51.100.3")]);
        h.runtime.run_cycle_at(600);
        assert!(h.runtime.memory().pending_alerts.is_empty());

        append(&h.eve, &[alert_line(7, "198.51.100.4")]);
        h.runtime.run_cycle_at(10 + 3_601);
        assert!(h.runtime.memory().analyzed_sigs.contains_key("7"));
        assert_eq!(h.runtime.memory().analyzed_sigs["7"], 3_611);
    }

    #[test]
    fn test_model_outage_keeps_alerts_pending() {
        let mut h = harness(ScriptedGateway::new(vec![
            Err(GatewayError::Http { status: 503 }),
            Ok(r#"{"verdict": "real", "severity": "high", "reason": "exploit"}"#.to_string()),
            Ok(r#"{"verdict": "real", "severity": "high", "reason": "exploit"}"#.to_string()),
        ]));
        h.runtime.run_cycle_at(0);

        append(&h.eve, &[alert_line(1, "203.0.113.1"), alert_line(2, "203.0.113.2")]);
        h.runtime.run_cycle_at(15);
        assert_eq!(h.runtime.memory().pending_alerts.len(), 2);
        assert!(h.enforcer.added.lock().is_empty());

        h.runtime.run_cycle_at(30);
        assert!(h.runtime.memory().pending_alerts.is_empty());
        assert_eq!(h.enforcer.added.lock().len(), 2);
    }

    #[test]
    fn test_malformed_reply_is_dropped() {
        let mut h = harness(ScriptedGateway::replying(&["the alert looks bad"]));
        h.runtime.run_cycle_at(0);
        append(&h.eve, &[alert_line(5, "203.0.113.5")]);
        h.runtime.run_cycle_at(15);

        assert!(h.runtime.memory().pending_alerts.is_empty());
        assert!(h.enforcer.added.lock().is_empty());
    }

    #[test]
    fn test_discovers_per_interface_log() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("em0");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("eve.json"), "").unwrap();

        let found = discover_eve_log(&dir.path().join("eve.json")).unwrap();
        assert_eq!(found, nested.join("eve.json"));
    }
}
