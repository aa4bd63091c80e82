//! IP Reputation Enrichment
//!
//! Summaries from AbuseIPDB and AlienVault OTX appended to the worker's
//! model prompt. A provider without an API key is simply not built.

use std::time::Duration;

use serde_json::Value;

use super::{map_ureq, IntelError};
use crate::constants;

// ============================================================================
// CONSTANTS
// ============================================================================

const ABUSEIPDB_URL: &str = "https://api.abuseipdb.com/api/v2/check";
const OTX_BASE: &str = "https://otx.alienvault.com/api/v1/indicators/IPv4";

// ============================================================================
// PROVIDERS
// ============================================================================

pub trait ThreatIntel: Send + Sync {
    fn name(&self) -> &'static str;
    /// One human-readable summary line for the prompt
    fn lookup(&self, ip: &str) -> Result<String, IntelError>;
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

pub struct AbuseIpDb {
    api_key: String,
    agent: ureq::Agent,
}

impl AbuseIpDb {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self { api_key, agent: agent(timeout) }
    }
}

impl ThreatIntel for AbuseIpDb {
    fn name(&self) -> &'static str {
        "AbuseIPDB"
    }

    fn lookup(&self, ip: &str) -> Result<String, IntelError> {
        let body: Value = self
            .agent
            .get(ABUSEIPDB_URL)
            .query("ipAddress", ip)
            .query("maxAgeInDays", "90")
            .set("Key", &self.api_key)
            .set("Accept", "application/json")
            .call()
            .map_err(map_ureq)?
            .into_json()
            .map_err(|e| IntelError::Network(e.to_string()))?;

        summarize_abuseipdb(&body)
    }
}

pub struct Otx {
    api_key: String,
    agent: ureq::Agent,
}

impl Otx {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self { api_key, agent: agent(timeout) }
    }
}

impl ThreatIntel for Otx {
    fn name(&self) -> &'static str {
        "AlienVault OTX"
    }

    fn lookup(&self, ip: &str) -> Result<String, IntelError> {
        let url = format!("{}/{}/general", OTX_BASE, ip);
        let body: Value = self
            .agent
            .get(&url)
            .set("X-OTX-API-KEY", &self.api_key)
            .call()
            .map_err(map_ureq)?
            .into_json()
            .map_err(|e| IntelError::Network(e.to_string()))?;

        summarize_otx(&body)
    }
}

// ============================================================================
// SUMMARIES
// ============================================================================

fn summarize_abuseipdb(body: &Value) -> Result<String, IntelError> {
    let data = body
        .get("data")
        .ok_or_else(|| IntelError::NoData("missing data".to_string()))?;

    let score = data
        .get("abuseConfidenceScore")
        .and_then(Value::as_u64)
        .ok_or_else(|| IntelError::NoData("missing score".to_string()))?;
    let reports = data.get("totalReports").and_then(Value::as_u64).unwrap_or(0);
    let country = data.get("countryCode").and_then(Value::as_str).unwrap_or("??");

    Ok(format!(
        "AbuseIPDB: confidence {}%, {} reports, country {}",
        score, reports, country
    ))
}

fn summarize_otx(body: &Value) -> Result<String, IntelError> {
    let pulses = body
        .pointer("/pulse_info/count")
        .and_then(Value::as_u64)
        .ok_or_else(|| IntelError::NoData("missing pulse_info".to_string()))?;

    Ok(format!("AlienVault OTX: referenced in {} threat pulses", pulses))
}

/// Providers whose API keys are present in the environment
pub fn providers_from_env(timeout: Duration) -> Vec<Box<dyn ThreatIntel>> {
    let mut providers: Vec<Box<dyn ThreatIntel>> = Vec::new();
    if let Some(key) = constants::get_abuseipdb_key() {
        providers.push(Box::new(AbuseIpDb::new(key, timeout)));
    }
    if let Some(key) = constants::get_otx_key() {
        providers.push(Box::new(Otx::new(key, timeout)));
    }
    providers
}

/// Summary lines from every provider that answered; failures are dropped
pub fn enrichment_lines(providers: &[Box<dyn ThreatIntel>], ip: &str) -> Vec<String> {
    providers
        .iter()
        .filter_map(|p| match p.lookup(ip) {
            Ok(line) => Some(line),
            Err(e) => {
                log::debug!("{} lookup for {} failed: {}", p.name(), ip, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(Result<String, IntelError>);

    impl ThreatIntel for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn lookup(&self, _ip: &str) -> Result<String, IntelError> {
            self.0.clone()
        }
    }

    #[test]
    fn test_summaries() {
        let abuse = json!({"data": {"abuseConfidenceScore": 87, "totalReports": 120, "countryCode": "CN"}});
        assert_eq!(
            summarize_abuseipdb(&abuse).unwrap(),
            "AbuseIPDB: confidence 87%, 120 reports, country CN"
        );
        assert!(summarize_abuseipdb(&json!({"errors": []})).is_err());

        let otx = json!({"pulse_info": {"count": 4}});
        assert_eq!(summarize_otx(&otx).unwrap(), "AlienVault OTX: referenced in 4 threat pulses");
    }

    #[test]
    fn test_failures_are_skipped() {
        let providers: Vec<Box<dyn ThreatIntel>> = vec![
            Box::new(Fixed(Err(IntelError::Http(429)))),
            Box::new(Fixed(Ok("ok line".to_string()))),
        ];
        assert_eq!(enrichment_lines(&providers, "203.0.113.1"), vec!["ok line".to_string()]);
    }
}
