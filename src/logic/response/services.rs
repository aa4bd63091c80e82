//! Service Control
//!
//! Liveness probes and scoped restarts for the host's named services,
//! plus the resolver reload used by the DNS sinkhole.

use std::path::Path;

use super::types::{run_checked, ActionError};

pub trait ServiceControl: Send + Sync {
    fn is_running(&self, service: &str) -> bool;
    fn restart(&self, service: &str) -> Result<(), ActionError>;
    fn reload_resolver(&self, conf: &Path) -> Result<(), ActionError>;
    /// Recent system log lines mentioning the service
    fn recent_logs(&self, service: &str, system_log: &Path) -> String;
}

/// `pgrep`, `service` and `unbound-control` on the host
pub struct SystemServices;

/// Service names are passed to shell tools, so only plain identifiers are accepted
pub fn validate_service(name: &str) -> Result<&str, ActionError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(name)
    } else {
        Err(ActionError::InvalidTarget(name.to_string()))
    }
}

impl ServiceControl for SystemServices {
    fn is_running(&self, service: &str) -> bool {
        match validate_service(service) {
            Ok(name) => run_checked("pgrep", &["-f", name]).is_ok(),
            Err(_) => false,
        }
    }

    fn restart(&self, service: &str) -> Result<(), ActionError> {
        let name = validate_service(service)?;
        run_checked("service", &[name, "restart"])?;
        log::warn!("Restarted service {}", name);
        Ok(())
    }

    fn reload_resolver(&self, conf: &Path) -> Result<(), ActionError> {
        let conf = conf.to_string_lossy();
        run_checked("unbound-control", &["-c", &conf, "reload"])?;
        log::info!("Resolver reloaded");
        Ok(())
    }

    fn recent_logs(&self, service: &str, system_log: &Path) -> String {
        let content = match std::fs::read_to_string(system_log) {
            Ok(c) => c,
            Err(_) => return String::new(),
        };

        let lines: Vec<&str> = content.lines().collect();
        let tail = &lines[lines.len().saturating_sub(50)..];
        tail.iter()
            .filter(|line| line.contains(service))
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }
}
