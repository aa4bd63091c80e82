//! Threat Correlation Worker
//!
//! Consumes queued `(ip, line)` items in small batches, asks the model for
//! a threat verdict, accumulates per-source risk and owns the blocklist:
//! blocks are written here and expired entries are swept here.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::risk::{decide, Decision, RiskBook};
use crate::logic::config::{ConfigHandle, DefenderConfig};
use crate::logic::external_intel::{enrichment_lines, ThreatIntel};
use crate::logic::gateway::{self, with_retry, ModelGateway, RetryPolicy};
use crate::logic::heuristics::parse_verdict;
use crate::logic::heuristics::verdict::{lenient_f64, lenient_label, lenient_text};
use crate::logic::response::{Alert, AlertSeverity, Enforcer, Notifier};
use crate::logic::shutdown::StopFlag;
use crate::logic::store::{
    Blocklist, BlocklistEntry, Event, EventKind, EventLog, StoreError, WorkItem, WorkQueue,
};

// ============================================================================
// VERDICT
// ============================================================================

const SYSTEM_PROMPT: &str = "You are a firewall security AI. Analyze the log line. \
Extract the ATTACKER IP. Return JSON only: \
{\"attacker_ip\": \"1.2.3.4\" or null, \"threat_score\": 0.0-1.0, \
\"reason\": \"...\", \"suggested_action\": \"block\"|\"alert_admin\"|\"ignore\"}";

#[derive(Debug, Default, Deserialize)]
pub struct ThreatVerdict {
    #[serde(default, deserialize_with = "lenient_text")]
    pub attacker_ip: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub threat_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reason: Option<String>,
    #[serde(default, alias = "action", deserialize_with = "lenient_label")]
    pub suggested_action: Option<String>,
}

/// What happened to one work item
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Monitoring disabled; item dropped unanalysed
    Disabled,
    /// Model unreachable or reply unusable
    NoVerdict,
    /// Model named a different (or no) attacker
    Mismatch,
    Observed { accumulated: f64 },
    Alerted,
    Blocked,
}

// ============================================================================
// WORKER
// ============================================================================

pub struct Worker {
    queue: WorkQueue,
    gateway: Arc<dyn ModelGateway>,
    enforcer: Arc<dyn Enforcer>,
    notifier: Arc<dyn Notifier>,
    blocklist: Blocklist,
    events: EventLog,
    intel: Vec<Box<dyn ThreatIntel>>,
    risk: RiskBook,
    retry: RetryPolicy,
    config: Arc<ConfigHandle>,
}

impl Worker {
    pub fn new(
        queue: WorkQueue,
        gateway: Arc<dyn ModelGateway>,
        enforcer: Arc<dyn Enforcer>,
        notifier: Arc<dyn Notifier>,
        config: Arc<ConfigHandle>,
    ) -> Self {
        let snapshot = config.snapshot();
        Self {
            queue,
            gateway,
            enforcer,
            notifier,
            blocklist: Blocklist::new(snapshot.paths.blocklist()),
            events: EventLog::new(snapshot.paths.event_log()),
            intel: Vec::new(),
            risk: RiskBook::new(snapshot.monitor.risk_ttl_secs),
            retry: RetryPolicy::standard(),
            config,
        }
    }

    pub fn with_intel(mut self, providers: Vec<Box<dyn ThreatIntel>>) -> Self {
        self.intel = providers;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn run(&mut self, stop: &StopFlag) {
        log::info!(
            "[Worker] Consuming queue via model provider {}",
            self.gateway.name()
        );

        while !stop.is_stopped() {
            let config = self.config.snapshot();
            let idle = Duration::from_secs(config.monitor.idle_backoff_secs.max(1));

            self.sweep(Utc::now().timestamp());

            match self.process_batch(&config) {
                Ok(0) => {
                    if !stop.sleep(idle) {
                        break;
                    }
                }
                Ok(n) => log::debug!("[Worker] Processed {} item(s)", n),
                Err(e) => {
                    log::error!("[Worker] Queue read failed: {}", e);
                    if !stop.sleep(idle) {
                        break;
                    }
                }
            }
        }

        log::info!("[Worker] Stopped");
    }

    /// Pop and handle one batch; returns how many items were popped
    pub fn process_batch(&mut self, config: &DefenderConfig) -> Result<usize, StoreError> {
        let items = self.queue.pop_batch(config.monitor.batch_size.max(1))?;
        for item in &items {
            let outcome = self.handle_item(item, config, Utc::now());
            log::debug!("[Worker] {} -> {:?}", item.ip, outcome);
        }
        Ok(items.len())
    }

    pub fn handle_item(&mut self, item: &WorkItem, config: &DefenderConfig, now: DateTime<Utc>) -> Outcome {
        let ts = now.timestamp();
        self.risk.expire(ts);

        if !config.monitor.enable {
            return Outcome::Disabled;
        }

        let prompt = self.build_prompt(item, config);
        let gw = self.gateway.as_ref();
        let Some(reply) = with_retry(self.retry, "[Worker] Model call", || {
            gateway::ask(gw, SYSTEM_PROMPT, &prompt)
        }) else {
            return Outcome::NoVerdict;
        };

        let Some(verdict) = parse_verdict::<ThreatVerdict>(&reply) else {
            log::warn!("[Worker] Unparseable verdict for {}", item.ip);
            return Outcome::NoVerdict;
        };

        if verdict.attacker_ip.as_deref().map(str::trim) != Some(item.ip.as_str()) {
            log::debug!(
                "[Worker] Verdict names {:?}, item source is {}",
                verdict.attacker_ip,
                item.ip
            );
            return Outcome::Mismatch;
        }

        let score = verdict.threat_score.unwrap_or(0.0).clamp(0.0, 1.0);
        let reason = verdict
            .reason
            .clone()
            .unwrap_or_else(|| "AI detected threat".to_string());
        let accumulated = self.risk.accumulate(&item.ip, score, &reason, ts);

        match decide(
            score,
            accumulated,
            verdict.suggested_action.as_deref(),
            config.monitor.threshold,
            config.accumulated_threshold(),
        ) {
            Decision::Block => {
                let reason = if score >= config.monitor.threshold {
                    reason
                } else {
                    self.accumulated_reason(&item.ip, accumulated)
                };
                self.block(&item.ip, &reason, config, now);
                Outcome::Blocked
            }
            Decision::AlertOnly => {
                log::warn!("[Worker] Alert-only verdict for {}: {}", item.ip, reason);
                let alert = Alert::new(
                    AlertSeverity::Warning,
                    "Suspicious activity",
                    &format!("{} (score {:.2}, accumulated {:.2})", reason, score, accumulated),
                )
                .with_ip(&item.ip);
                self.notifier.notify(&alert);
                Outcome::Alerted
            }
            Decision::Observe => Outcome::Observed { accumulated },
        }
    }

    fn build_prompt(&self, item: &WorkItem, config: &DefenderConfig) -> String {
        let mut prompt = format!("Log: {}", item.log_line);
        if config.enrichment.enable && !self.intel.is_empty() {
            let lines = enrichment_lines(&self.intel, &item.ip);
            if !lines.is_empty() {
                prompt.push_str("\n\nThreat intelligence:\n");
                prompt.push_str(&lines.join("\n"));
            }
        }
        prompt
    }

    fn accumulated_reason(&self, ip: &str, accumulated: f64) -> String {
        let history = self
            .risk
            .get(ip)
            .map(|r| r.reasons.iter().cloned().collect::<Vec<_>>().join("; "))
            .unwrap_or_default();
        format!("Accumulated risk {:.2}: {}", accumulated, history)
    }

    /// Enforce, record and clear the source's risk
    fn block(&mut self, ip: &str, reason: &str, config: &DefenderConfig, now: DateTime<Utc>) {
        match self.enforcer.add(ip) {
            Ok(()) => log::warn!("[Worker] Blocked {}: {}", ip, reason),
            Err(e) => log::error!("[Worker] Enforcement failed for {}: {}", ip, e),
        }

        if let Err(e) = self.blocklist.upsert(ip, reason, now, config.monitor.ttl_hours) {
            log::error!("[Worker] Blocklist write failed for {}: {}", ip, e);
        }

        let event = Event::at(EventKind::Block, ip, reason, now.timestamp());
        if let Err(e) = self.events.append(&event) {
            log::error!("[Worker] Event write failed: {}", e);
        }

        self.risk.clear(ip);
    }

    /// Release every expired entry; returns how many were released
    pub fn sweep(&self, now: i64) -> usize {
        let expired = match self.blocklist.sweep_expired(now) {
            Ok(expired) => expired,
            Err(e) => {
                log::error!("[Worker] Blocklist sweep failed: {}", e);
                return 0;
            }
        };

        for entry in &expired {
            release(self.enforcer.as_ref(), &self.events, entry, "TTL expired", now);
        }
        expired.len()
    }
}

// ============================================================================
// UNBLOCK
// ============================================================================

fn release(enforcer: &dyn Enforcer, events: &EventLog, entry: &BlocklistEntry, reason: &str, now: i64) {
    match enforcer.remove(&entry.ip) {
        Ok(()) => log::info!("[Worker] Unblocked {} ({})", entry.ip, reason),
        Err(e) => log::error!("[Worker] Failed to unblock {}: {}", entry.ip, e),
    }

    let event = Event::at(EventKind::Unblock, &entry.ip, reason, now);
    if let Err(e) = events.append(&event) {
        log::error!("[Worker] Event write failed: {}", e);
    }
}

/// Operator unblock. Returns whether the source had a blocklist entry;
/// the enforcement table is cleared either way.
pub fn unblock_ip(
    blocklist: &Blocklist,
    enforcer: &dyn Enforcer,
    events: &EventLog,
    ip: &str,
) -> Result<bool, StoreError> {
    let now = Utc::now();
    let removed = blocklist.remove(ip)?;
    let entry = removed
        .clone()
        .unwrap_or_else(|| BlocklistEntry::new(ip, "", now, 0));
    release(enforcer, events, &entry, "Manual unblock", now.timestamp());
    Ok(removed.is_some())
}
