//! DNS Sinkhole
//!
//! Tails the resolver query log, pre-filters queried names by Shannon
//! entropy and lets the model confirm DGA / C2 domains. Confirmed names
//! are redirected through a dedicated resolver config fragment.

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::tail::{read_new_lines, TailCursor};
use super::{Agent, Cycle};
use crate::logic::config::{DefenderConfig, SinkholeConfig};
use crate::logic::heuristics::verdict::{lenient_f64, lenient_label, lenient_text};
use crate::logic::heuristics::{extract_query_domain, is_dga_candidate, shannon_entropy};
use crate::logic::response::ServiceControl;

const SYSTEM_PROMPT: &str = "Analyze this domain name for DGA (Domain Generation Algorithm) or malicious \
C2 patterns. Return JSON: {\"verdict\": \"malicious\"|\"safe\", \"confidence\": 0.0-1.0, \"reason\": \"...\"}";

/// Names judged safe are not re-examined for a day
const REVIEW_TTL_SECS: i64 = 86_400;
const MAX_PENDING_DOMAINS: usize = 500;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct DomainVerdict {
    #[serde(default, deserialize_with = "lenient_label")]
    pub verdict: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reason: Option<String>,
}

impl DomainVerdict {
    pub fn is_confident_malicious(&self, min_confidence: f64) -> bool {
        self.verdict.as_deref() == Some("malicious")
            && self.confidence.map_or(false, |c| c > min_confidence)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkholeMemory {
    pub cursor: Option<TailCursor>,
    /// domain -> queries seen since it was queued
    pub pending_domains: BTreeMap<String, u64>,
    pub reviewed: HashMap<String, i64>,
    /// domain -> reason
    pub sinkhole_targets: BTreeMap<String, String>,
    /// domain -> time sinkholed
    pub blocked_domains: BTreeMap<String, i64>,
}

// ============================================================================
// HELPERS
// ============================================================================

/// Names written into resolver config must be plain hostnames
pub fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && domain.len() <= 253
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}

pub fn is_allowlisted(domain: &str, allowlist: &[String]) -> bool {
    allowlist.iter().any(|entry| domain.contains(entry.as_str()))
}

pub fn sinkhole_directive(domain: &str, sinkhole_ip: &str) -> String {
    format!(
        "local-zone: \"{d}\" redirect\nlocal-data: \"{d} A {ip}\"\n",
        d = domain,
        ip = sinkhole_ip
    )
}

fn append_fragment(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}

// ============================================================================
// AGENT
// ============================================================================

pub struct Sinkhole {
    services: Arc<dyn ServiceControl>,
}

impl Sinkhole {
    pub fn new(services: Arc<dyn ServiceControl>) -> Self {
        Self { services }
    }

    fn is_known(memory: &SinkholeMemory, domain: &str, now: i64) -> bool {
        memory.blocked_domains.contains_key(domain)
            || memory.sinkhole_targets.contains_key(domain)
            || memory
                .reviewed
                .get(domain)
                .map_or(false, |at| now - *at < REVIEW_TTL_SECS)
    }
}

impl Agent for Sinkhole {
    type State = SinkholeMemory;

    fn name(&self) -> &'static str {
        "sinkhole"
    }

    fn description(&self) -> &'static str {
        "Detects DGA and C2 domains in resolver queries and sinkholes them"
    }

    fn poll_interval(&self, config: &DefenderConfig) -> Duration {
        Duration::from_secs(config.agents.sinkhole.poll_secs.max(1))
    }

    fn observe(&mut self, cx: &mut Cycle<'_, SinkholeMemory>) {
        let settings: &SinkholeConfig = &cx.config.agents.sinkhole;
        let memory = &mut *cx.memory;
        let now = cx.now;

        memory.reviewed.retain(|_, at| now - *at < REVIEW_TTL_SECS);

        let lines = match read_new_lines(&settings.resolver_log, &mut memory.cursor) {
            Ok(lines) => lines,
            Err(_) => return,
        };

        for domain in lines.iter().filter_map(|line| extract_query_domain(line)) {
            if !is_valid_domain(&domain)
                || is_allowlisted(&domain, &settings.allowlist)
                || Self::is_known(memory, &domain, now)
            {
                continue;
            }

            if let Some(count) = memory.pending_domains.get_mut(&domain) {
                *count += 1;
            } else if memory.pending_domains.len() < MAX_PENDING_DOMAINS {
                memory.pending_domains.insert(domain, 1);
            }
        }
    }

    fn analyze(&mut self, cx: &mut Cycle<'_, SinkholeMemory>) {
        let min_confidence = cx.config.agents.sinkhole.min_confidence;
        let pending = std::mem::take(&mut cx.memory.pending_domains);
        let mut remaining = pending.into_iter();

        while let Some((domain, count)) = remaining.next() {
            let entropy = shannon_entropy(&domain);
            if !is_dga_candidate(&domain, entropy) {
                cx.memory.reviewed.insert(domain, cx.now);
                continue;
            }

            let user = format!("Domain: {}. Entropy: {:.2}. Query Count: {}.", domain, entropy, count);
            match cx.ask_verdict::<DomainVerdict>(SYSTEM_PROMPT, &user) {
                Ok(Some(v)) if v.is_confident_malicious(min_confidence) => {
                    let reason = v.reason.unwrap_or_else(|| "DGA pattern".to_string());
                    cx.memory.sinkhole_targets.insert(domain, reason);
                }
                Ok(_) => {
                    cx.memory.reviewed.insert(domain, cx.now);
                }
                Err(_) => {
                    cx.memory.pending_domains.insert(domain, count);
                    cx.memory.pending_domains.extend(remaining);
                    break;
                }
            }
        }
    }

    fn act(&mut self, cx: &mut Cycle<'_, SinkholeMemory>) {
        let settings = &cx.config.agents.sinkhole;
        let memory = &mut *cx.memory;
        let mut appended = false;

        for (domain, reason) in std::mem::take(&mut memory.sinkhole_targets) {
            if memory.blocked_domains.contains_key(&domain) {
                continue;
            }

            let directive = sinkhole_directive(&domain, &settings.sinkhole_ip);
            match append_fragment(&settings.fragment, &directive) {
                Ok(()) => {
                    log::warn!("[Agent:sinkhole] Sinkholing {}: {}", domain, reason);
                    memory.blocked_domains.insert(domain, cx.now);
                    appended = true;
                }
                Err(e) => {
                    log::error!("[Agent:sinkhole] Cannot write {}: {}", settings.fragment.display(), e);
                    memory.sinkhole_targets.insert(domain, reason);
                }
            }
        }

        if appended {
            if let Err(e) = self.services.reload_resolver(&settings.resolver_conf) {
                log::error!("[Agent:sinkhole] Resolver reload failed: {}", e);
            }
        }
    }
}
