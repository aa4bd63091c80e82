//! Test doubles for the host-facing traits

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::path::Path;

use parking_lot::Mutex;

use crate::logic::external_intel::{GeoFix, GeoLocator, IntelError};
use crate::logic::gateway::{GatewayError, ModelGateway};
use crate::logic::heuristics::GeoPoint;
use crate::logic::response::{ActionError, Alert, Enforcer, Notifier, ServiceControl};

// ============================================================================
// MODEL
// ============================================================================

/// Replays queued replies in order; an empty script fails every call
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Result<String, GatewayError>>>,
    prompts: Mutex<Vec<Vec<String>>>,
}

impl ScriptedGateway {
    pub fn new(replies: Vec<Result<String, GatewayError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn prompts(&self) -> Vec<Vec<String>> {
        self.prompts.lock().clone()
    }
}

impl ModelGateway for ScriptedGateway {
    fn send_chat(&self, messages: &[String]) -> Result<String, GatewayError> {
        self.prompts.lock().push(messages.to_vec());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Network("script exhausted".to_string())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// EFFECTORS
// ============================================================================

#[derive(Default)]
pub struct RecordingEnforcer {
    pub added: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
}

impl Enforcer for RecordingEnforcer {
    fn add(&self, ip: &str) -> Result<(), ActionError> {
        self.added.lock().push(ip.to_string());
        Ok(())
    }

    fn remove(&self, ip: &str) -> Result<(), ActionError> {
        self.removed.lock().push(ip.to_string());
        Ok(())
    }

    fn ensure_table(&self) -> Result<(), ActionError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingServices {
    pub down: Mutex<HashSet<String>>,
    pub restarted: Mutex<Vec<String>>,
    pub reloads: Mutex<usize>,
}

impl RecordingServices {
    pub fn with_down(services: &[&str]) -> Self {
        let svc = Self::default();
        svc.down.lock().extend(services.iter().map(|s| s.to_string()));
        svc
    }
}

impl ServiceControl for RecordingServices {
    fn is_running(&self, service: &str) -> bool {
        !self.down.lock().contains(service)
    }

    fn restart(&self, service: &str) -> Result<(), ActionError> {
        self.restarted.lock().push(service.to_string());
        self.down.lock().remove(service);
        Ok(())
    }

    fn reload_resolver(&self, _conf: &Path) -> Result<(), ActionError> {
        *self.reloads.lock() += 1;
        Ok(())
    }

    fn recent_logs(&self, service: &str, _system_log: &Path) -> String {
        format!("{}: exited on signal 11", service)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<Alert>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }
}

// ============================================================================
// GEOIP
// ============================================================================

#[derive(Default)]
pub struct StaticLocator {
    fixes: HashMap<Ipv4Addr, GeoFix>,
    pub lookups: Mutex<usize>,
}

impl StaticLocator {
    pub fn with(mut self, ip: &str, lat: f64, lon: f64) -> Self {
        if let Ok(addr) = ip.parse() {
            self.fixes.insert(addr, GeoFix { point: GeoPoint::new(lat, lon), country: None });
        }
        self
    }
}

impl GeoLocator for StaticLocator {
    fn locate(&self, ip: &Ipv4Addr) -> Result<GeoFix, IntelError> {
        *self.lookups.lock() += 1;
        self.fixes
            .get(ip)
            .cloned()
            .ok_or_else(|| IntelError::NoData(ip.to_string()))
    }
}
