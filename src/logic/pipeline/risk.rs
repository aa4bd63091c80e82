//! Per-source risk accumulation
//!
//! Weak signals from one source add up: a source is blocked when a single
//! event crosses the threshold or the accumulated score crosses 1.5x it.
//! Records expire after an hour without new events and are cleared on block.

use std::collections::{HashMap, VecDeque};

/// Reasons kept per source
pub const MAX_REASONS: usize = 5;

/// Absorbs float error when summing scores like 0.3 + 0.3 + ...
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct RiskRecord {
    pub score: f64,
    pub last_seen: i64,
    pub reasons: VecDeque<String>,
}

pub struct RiskBook {
    ttl_secs: i64,
    records: HashMap<String, RiskRecord>,
}

impl RiskBook {
    pub fn new(ttl_secs: i64) -> Self {
        Self { ttl_secs, records: HashMap::new() }
    }

    /// Drop records idle for longer than the TTL
    pub fn expire(&mut self, now: i64) -> usize {
        let before = self.records.len();
        let ttl = self.ttl_secs;
        self.records.retain(|_, r| now - r.last_seen <= ttl);
        before - self.records.len()
    }

    /// Add a score to the source's record and return the new total
    pub fn accumulate(&mut self, ip: &str, score: f64, reason: &str, now: i64) -> f64 {
        let record = self.records.entry(ip.to_string()).or_insert_with(|| RiskRecord {
            score: 0.0,
            last_seen: now,
            reasons: VecDeque::new(),
        });

        record.score += score.clamp(0.0, 1.0);
        record.last_seen = now;
        record.reasons.push_back(reason.to_string());
        while record.reasons.len() > MAX_REASONS {
            record.reasons.pop_front();
        }
        record.score
    }

    pub fn clear(&mut self, ip: &str) {
        self.records.remove(ip);
    }

    pub fn get(&self, ip: &str) -> Option<&RiskRecord> {
        self.records.get(ip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Block,
    AlertOnly,
    Observe,
}

/// `accumulated_threshold` is the history bound, normally
/// `DefenderConfig::accumulated_threshold()`
pub fn decide(
    score: f64,
    accumulated: f64,
    suggested_action: Option<&str>,
    threshold: f64,
    accumulated_threshold: f64,
) -> Decision {
    if score >= threshold - EPSILON || accumulated >= accumulated_threshold - EPSILON {
        Decision::Block
    } else if suggested_action == Some("alert_admin") {
        Decision::AlertOnly
    } else {
        Decision::Observe
    }
}
