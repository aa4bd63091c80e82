//! Identity & VPN Overseer
//!
//! Tracks where each user last authenticated from. When a user's source
//! address changes, the implied travel speed between the two fixes is
//! computed; anything faster than an airliner is put to the model before
//! the new source is blocked.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::tail::{read_new_lines, TailCursor};
use super::{cap_front, escalate, Agent, Cycle, MAX_PENDING};
use crate::logic::config::DefenderConfig;
use crate::logic::external_intel::{GeoFix, GeoLocator};
use crate::logic::heuristics::verdict::{lenient_label, lenient_text};
use crate::logic::heuristics::{extract_login, haversine_km, implied_speed_kmh, is_public_ipv4, GeoPoint};
use crate::logic::response::{Alert, AlertSeverity, Enforcer, Notifier};
use crate::logic::store::EventLog;

const SYSTEM_PROMPT: &str = "Analyze this login anomaly. A user logged in from two distant locations in a \
short time. Is this impossible travel or potentially valid (e.g. VPN usage)? \
Return JSON: {\"verdict\": \"malicious\"|\"safe\", \"reason\": \"...\"}";

const GEOIP_CACHE_CAP: usize = 1000;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TravelVerdict {
    #[serde(default, deserialize_with = "lenient_label")]
    pub verdict: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginEvent {
    pub user: String,
    pub ip: String,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLocation {
    pub ip: String,
    pub ts: i64,
    pub point: GeoPoint,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelCase {
    pub user: String,
    pub ip: String,
    pub summary: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerMemory {
    pub auth_cursor: Option<TailCursor>,
    pub vpn_cursor: Option<TailCursor>,
    /// "user@ip" -> last time the pair was queued
    pub recent_logins: HashMap<String, i64>,
    pub pending_logins: Vec<LoginEvent>,
    pub users: HashMap<String, UserLocation>,
    pub geoip_cache: HashMap<String, GeoFix>,
    pub suspects: Vec<TravelCase>,
    pub threats: Vec<TravelCase>,
}

// ============================================================================
// AGENT
// ============================================================================

pub struct Overseer {
    locator: Arc<dyn GeoLocator>,
    enforcer: Arc<dyn Enforcer>,
    events: Arc<EventLog>,
    notifier: Arc<dyn Notifier>,
}

impl Overseer {
    pub fn new(
        locator: Arc<dyn GeoLocator>,
        enforcer: Arc<dyn Enforcer>,
        events: Arc<EventLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { locator, enforcer, events, notifier }
    }

    fn locate(&self, memory: &mut OverseerMemory, ip: &str) -> Option<GeoFix> {
        if let Some(fix) = memory.geoip_cache.get(ip) {
            return Some(fix.clone());
        }

        let addr: Ipv4Addr = ip.parse().ok()?;
        match self.locator.locate(&addr) {
            Ok(fix) => {
                if memory.geoip_cache.len() >= GEOIP_CACHE_CAP {
                    memory.geoip_cache.clear();
                }
                memory.geoip_cache.insert(ip.to_string(), fix.clone());
                Some(fix)
            }
            Err(e) => {
                log::debug!("[Agent:overseer] GeoIP for {} unavailable: {}", ip, e);
                None
            }
        }
    }

    /// Compare a login with the user's previous fix; returns a case when the speed is implausible
    fn check_travel(&self, memory: &mut OverseerMemory, login: &LoginEvent, max_speed: f64) -> Option<TravelCase> {
        let fix = self.locate(memory, &login.ip)?;

        let case = memory.users.get(&login.user).and_then(|prev| {
            if prev.ip == login.ip {
                return None;
            }
            let elapsed = login.ts - prev.ts;
            let distance = haversine_km(prev.point, fix.point);
            let speed = implied_speed_kmh(distance, elapsed);
            if speed <= max_speed {
                return None;
            }

            Some(TravelCase {
                user: login.user.clone(),
                ip: login.ip.clone(),
                summary: format!(
                    "Impossible travel: user '{}' moved {:.0} km in {}s ({:.0} km/h) from {} ({}) to {} ({}).",
                    login.user,
                    distance,
                    elapsed.max(1),
                    speed,
                    prev.ip,
                    prev.country.as_deref().unwrap_or("unknown"),
                    login.ip,
                    fix.country.as_deref().unwrap_or("unknown"),
                ),
            })
        });

        memory.users.insert(
            login.user.clone(),
            UserLocation { ip: login.ip.clone(), ts: login.ts, point: fix.point, country: fix.country },
        );
        case
    }
}

impl Agent for Overseer {
    type State = OverseerMemory;

    fn name(&self) -> &'static str {
        "overseer"
    }

    fn description(&self) -> &'static str {
        "Monitors VPN and auth logs for impossible travel and hijacked sessions"
    }

    fn poll_interval(&self, config: &DefenderConfig) -> Duration {
        Duration::from_secs(config.agents.overseer.poll_secs.max(1))
    }

    fn observe(&mut self, cx: &mut Cycle<'_, OverseerMemory>) {
        let settings = &cx.config.agents.overseer;
        let memory = &mut *cx.memory;
        let now = cx.now;

        let mut lines = read_new_lines(&settings.auth_log, &mut memory.auth_cursor).unwrap_or_default();
        lines.extend(read_new_lines(&settings.vpn_log, &mut memory.vpn_cursor).unwrap_or_default());

        let window = settings.repeat_window_secs;
        memory.recent_logins.retain(|_, at| now - *at < window);

        for sighting in lines.iter().filter_map(|line| extract_login(line)) {
            if !is_public_ipv4(&sighting.ip) {
                continue;
            }

            let key = format!("{}@{}", sighting.user, sighting.ip);
            if memory.recent_logins.contains_key(&key) {
                continue;
            }
            memory.recent_logins.insert(key, now);
            memory.pending_logins.push(LoginEvent {
                user: sighting.user,
                ip: sighting.ip.to_string(),
                ts: now,
            });
        }
        cap_front(&mut memory.pending_logins, MAX_PENDING);
    }

    fn analyze(&mut self, cx: &mut Cycle<'_, OverseerMemory>) {
        let max_speed = cx.config.agents.overseer.max_speed_kmh;

        for login in std::mem::take(&mut cx.memory.pending_logins) {
            if let Some(case) = self.check_travel(cx.memory, &login, max_speed) {
                log::warn!("[Agent:overseer] {}", case.summary);
                cx.memory.suspects.push(case);
            }
        }
        cap_front(&mut cx.memory.suspects, MAX_PENDING);

        let suspects = std::mem::take(&mut cx.memory.suspects);
        let mut remaining = suspects.into_iter();
        while let Some(case) = remaining.next() {
            match cx.ask_verdict::<TravelVerdict>(SYSTEM_PROMPT, &case.summary) {
                Ok(Some(v)) if v.verdict.as_deref() == Some("malicious") => {
                    let reason = v.reason.unwrap_or_else(|| case.summary.clone());
                    cx.memory.threats.push(TravelCase { summary: reason, ..case });
                }
                Ok(_) => {
                    log::info!("[Agent:overseer] Travel for '{}' judged plausible", case.user);
                }
                Err(_) => {
                    cx.memory.suspects.push(case);
                    cx.memory.suspects.extend(remaining);
                    break;
                }
            }
        }
    }

    fn act(&mut self, cx: &mut Cycle<'_, OverseerMemory>) {
        for threat in std::mem::take(&mut cx.memory.threats) {
            escalate("overseer", self.enforcer.as_ref(), &self.events, &threat.ip, &threat.summary);

            let message = format!(
                "Blocked {} from {}. Reason: {}",
                threat.user, threat.ip, threat.summary
            );
            self.notifier.notify(
                &Alert::new(AlertSeverity::Critical, "Impossible travel", &message).with_ip(&threat.ip),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::agent::AgentRuntime;
    use crate::logic::config::ConfigHandle;
    use crate::logic::testing::{RecordingEnforcer, RecordingNotifier, ScriptedGateway, StaticLocator};
    use std::io::Write;
    use std::path::{Path, PathBuf};

    const PARIS_IP: &str = "81.2.69.142";
    const NEW_YORK_IP: &str = "66.102.0.1";

    struct Harness {
        _dir: tempfile::TempDir,
        auth: PathBuf,
        gateway: Arc<ScriptedGateway>,
        enforcer: Arc<RecordingEnforcer>,
        notifier: Arc<RecordingNotifier>,
        runtime: AgentRuntime<Overseer>,
    }

    fn harness(gateway: ScriptedGateway) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let auth = dir.path().join("auth.log");
        std::fs::write(&auth, "").unwrap();

        let mut config = DefenderConfig::default();
        config.agents.overseer.auth_log = auth.clone();
        config.agents.overseer.vpn_log = dir.path().join("openvpn.log");

        let locator = StaticLocator::default()
            .with(PARIS_IP, 48.8566, 2.3522)
            .with(NEW_YORK_IP, 40.7128, -74.0060);
        let gateway = Arc::new(gateway);
        let enforcer = Arc::new(RecordingEnforcer::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let events = Arc::new(EventLog::new(dir.path().join("ai_events.log")));

        let runtime = AgentRuntime::new(
            Overseer::new(Arc::new(locator), enforcer.clone(), events, notifier.clone()),
            &dir.path().join("agents"),
            gateway.clone(),
            Arc::new(ConfigHandle::fixed(config)),
        );
        Harness { _dir: dir, auth, gateway, enforcer, notifier, runtime }
    }

    fn login(path: &Path, user: &str, ip: &str) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        writeln!(f, "sshd[4411]: Accepted publickey for {} from {} port 50122 ssh2", user, ip).unwrap();
    }

    #[test]
    fn test_fast_travel_escalates() {
        let mut h = harness(ScriptedGateway::replying(&[
            r#"{"verdict": "malicious", "reason": "session hijack"}"#,
        ]));
        h.runtime.run_cycle_at(0);

        login(&h.auth, "alice", PARIS_IP);
        h.runtime.run_cycle_at(60);
        login(&h.auth, "alice", NEW_YORK_IP);
        h.runtime.run_cycle_at(60 + 3_600);

        assert_eq!(h.gateway.call_count(), 1);
        assert_eq!(*h.enforcer.added.lock(), vec![NEW_YORK_IP.to_string()]);
        let alerts = h.notifier.alerts.lock();
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert!(alerts[0].message.contains("session hijack"));
    }

    #[test]
    fn test_plausible_travel_does_not_escalate() {
        let mut h = harness(ScriptedGateway::replying(&[]));
        h.runtime.run_cycle_at(0);

        login(&h.auth, "bob", PARIS_IP);
        h.runtime.run_cycle_at(60);
        // ~5837 km over 7 hours is ~834 km/h
        login(&h.auth, "bob", NEW_YORK_IP);
        h.runtime.run_cycle_at(60 + 7 * 3_600);

        assert_eq!(h.gateway.call_count(), 0);
        assert!(h.enforcer.added.lock().is_empty());
        assert_eq!(h.runtime.memory().users["bob"].ip, NEW_YORK_IP);
    }

    #[test]
    fn test_private_and_repeated_logins_filtered() {
        let mut h = harness(ScriptedGateway::replying(&[]));
        h.runtime.run_cycle_at(0);

        login(&h.auth, "carol", "192.168.1.50");
        login(&h.auth, "carol", PARIS_IP);
        login(&h.auth, "carol", PARIS_IP);
        h.runtime.run_cycle_at(10);
        assert_eq!(h.runtime.memory().recent_logins.len(), 1);

        login(&h.auth, "carol", PARIS_IP);
        h.runtime.run_cycle_at(100);
        assert_eq!(h.runtime.memory().recent_logins["carol@81.2.69.142"], 10);
    }

    #[test]
    fn test_geoip_cached_and_missing_fix_skipped() {
        let mut h = harness(ScriptedGateway::replying(&[]));
        h.runtime.run_cycle_at(0);

        login(&h.auth, "dave", "203.0.113.200");
        login(&h.auth, "erin", PARIS_IP);
        login(&h.auth, "frank", PARIS_IP);
        h.runtime.run_cycle_at(10);

        let memory = h.runtime.memory();
        assert!(!memory.users.contains_key("dave"));
        assert!(memory.users.contains_key("erin"));
        assert_eq!(memory.geoip_cache.len(), 1);
    }
}
