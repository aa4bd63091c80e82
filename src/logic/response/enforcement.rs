//! Network Enforcement
//!
//! Blocks sources by membership in a named pf table. The table is shared
//! by the worker and every agent; only the worker owns the JSON blocklist.

use std::net::IpAddr;
use std::path::PathBuf;

use super::types::{run_checked, ActionError};
use crate::logic::config::EnforcementConfig;

pub trait Enforcer: Send + Sync {
    fn add(&self, ip: &str) -> Result<(), ActionError>;
    fn remove(&self, ip: &str) -> Result<(), ActionError>;
    /// Create the table when it does not exist yet
    fn ensure_table(&self) -> Result<(), ActionError>;
}

// ============================================================================
// PFCTL
// ============================================================================

pub struct PfTable {
    pfctl: PathBuf,
    table: String,
}

impl PfTable {
    pub fn from_config(config: &EnforcementConfig) -> Self {
        Self {
            pfctl: config.pfctl.clone(),
            table: config.table.clone(),
        }
    }

    fn table_op(&self, op: &str, target: Option<&str>) -> Result<String, ActionError> {
        let program = self.pfctl.to_string_lossy();
        let mut args = vec!["-t", self.table.as_str(), "-T", op];
        if let Some(target) = target {
            args.push(target);
        }
        run_checked(&program, &args)
    }
}

fn validate_ip(ip: &str) -> Result<&str, ActionError> {
    ip.parse::<IpAddr>()
        .map(|_| ip)
        .map_err(|_| ActionError::InvalidTarget(ip.to_string()))
}

impl Enforcer for PfTable {
    fn add(&self, ip: &str) -> Result<(), ActionError> {
        let ip = validate_ip(ip)?;
        self.table_op("add", Some(ip))?;
        log::warn!("Added {} to pf table <{}>", ip, self.table);
        Ok(())
    }

    fn remove(&self, ip: &str) -> Result<(), ActionError> {
        let ip = validate_ip(ip)?;
        self.table_op("delete", Some(ip))?;
        log::info!("Removed {} from pf table <{}>", ip, self.table);
        Ok(())
    }

    fn ensure_table(&self) -> Result<(), ActionError> {
        if self.table_op("show", None).is_ok() {
            return Ok(());
        }
        self.table_op("create", None)?;
        log::info!("Created pf table <{}>", self.table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_ip_targets() {
        let table = PfTable::from_config(&EnforcementConfig {
            pfctl: PathBuf::from("/nonexistent/pfctl"),
            table: "ai_blocklist".to_string(),
        });

        assert!(matches!(
            table.add("1.2.3.4; rm -rf /"),
            Err(ActionError::InvalidTarget(_))
        ));
        assert!(matches!(table.add("203.0.113.4"), Err(ActionError::Spawn { .. })));
        assert!(table.ensure_table().is_err());
    }
}
