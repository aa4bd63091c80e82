//! Event Log
//!
//! Append-only NDJSON audit trail. Once the file passes the size cap it
//! is rewritten with only the newest lines.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{write_atomic, StoreError};
use crate::constants::{EVENT_LOG_KEEP_LINES, EVENT_LOG_MAX_BYTES};

// ============================================================================
// EVENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Block,
    Unblock,
    Escalation,
    HoneypotHit,
}

impl EventKind {
    /// Same spelling as the wire `type`
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Block => "block",
            EventKind::Unblock => "unblock",
            EventKind::Escalation => "escalation",
            EventKind::HoneypotHit => "honeypot-hit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub ip: String,
    pub reason: String,
    pub timestamp: i64,
}

impl Event {
    pub fn new(kind: EventKind, ip: &str, reason: &str) -> Self {
        Self::at(kind, ip, reason, Utc::now().timestamp())
    }

    pub fn at(kind: EventKind, ip: &str, reason: &str, timestamp: i64) -> Self {
        Self {
            kind,
            ip: ip.to_string(),
            reason: reason.to_string(),
            timestamp,
        }
    }
}

// ============================================================================
// LOG
// ============================================================================

pub struct EventLog {
    path: PathBuf,
    max_bytes: u64,
    keep_lines: usize,
}

impl EventLog {
    pub fn new(path: PathBuf) -> Self {
        Self::with_limits(path, EVENT_LOG_MAX_BYTES, EVENT_LOG_KEEP_LINES)
    }

    pub fn with_limits(path: PathBuf, max_bytes: u64, keep_lines: usize) -> Self {
        Self { path, max_bytes, keep_lines }
    }

    /// Append one event as a single line
    pub fn append(&self, event: &Event) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let size = {
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            file.write_all(line.as_bytes())?;
            file.metadata()?.len()
        };

        if size > self.max_bytes {
            self.truncate()?;
        }
        Ok(())
    }

    fn truncate(&self) -> Result<(), StoreError> {
        let (old, kept) = self.read_for_rewrite()?;
        self.finish_rewrite(old, &kept)
    }

    /// Open handle on the current file plus the newest lines to keep
    fn read_for_rewrite(&self) -> Result<(File, String), StoreError> {
        let mut old = File::open(&self.path)?;
        let mut raw = Vec::new();
        old.read_to_end(&mut raw)?;

        let content = String::from_utf8_lossy(&raw);
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(self.keep_lines);

        let mut kept = lines[start..].join("\n");
        kept.push('\n');
        Ok((old, kept))
    }

    /// Swap in the kept lines, then carry over whatever other writers
    /// appended to the old file after it was read
    fn finish_rewrite(&self, mut old: File, kept: &str) -> Result<(), StoreError> {
        write_atomic(&self.path, kept.as_bytes())?;

        let mut late = Vec::new();
        old.read_to_end(&mut late)?;
        if !late.is_empty() {
            let mut file = OpenOptions::new().append(true).open(&self.path)?;
            file.write_all(&late)?;
        }

        log::info!("Event log truncated to {} lines", kept.lines().count());
        Ok(())
    }

    /// Newest `limit` events, oldest first. Malformed lines are skipped.
    pub fn read_recent(&self, limit: usize) -> Vec<Event> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        let events: Vec<Event> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        let start = events.len().saturating_sub(limit);
        events[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let event = Event::at(EventKind::HoneypotHit, "203.0.113.5", "port 2323", 42);
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "honeypot-hit");
        assert_eq!(json["type"], event.kind.as_str());
        assert_eq!(json["ip"], "203.0.113.5");
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn test_append_and_read_recent() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("ai_events.log"));

        log.append(&Event::at(EventKind::Block, "198.51.100.1", "a", 1)).unwrap();
        log.append(&Event::at(EventKind::Unblock, "198.51.100.1", "b", 2)).unwrap();
        log.append(&Event::at(EventKind::Escalation, "198.51.100.2", "c", 3)).unwrap();

        let recent = log.read_recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, EventKind::Unblock);
        assert_eq!(recent[1].kind, EventKind::Escalation);
    }

    #[test]
    fn test_truncates_to_newest_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ai_events.log");
        let log = EventLog::with_limits(path.clone(), 2_000, 5);

        for i in 0..100 {
            log.append(&Event::at(EventKind::Block, "192.0.2.1", "flood", i)).unwrap();
        }

        assert!(fs::metadata(&path).unwrap().len() <= 2_000);
        let recent = log.read_recent(1000);
        assert!(!recent.is_empty());
        assert_eq!(recent.last().unwrap().timestamp, 99);
        assert!(recent.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_rewrite_keeps_concurrent_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ai_events.log");
        let log = EventLog::with_limits(path.clone(), u64::MAX, 2);
        for i in 0..5 {
            log.append(&Event::at(EventKind::Block, "192.0.2.1", "flood", i)).unwrap();
        }

        let (old, kept) = log.read_for_rewrite().unwrap();

        // Another daemon appends while the rewrite is in flight
        let other = EventLog::new(path.clone());
        other.append(&Event::at(EventKind::HoneypotHit, "203.0.113.5", "port 22", 50)).unwrap();

        log.finish_rewrite(old, &kept).unwrap();

        let stamps: Vec<i64> = log.read_recent(100).iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![3, 4, 50]);
    }

    #[test]
    fn test_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ai_events.log");
        fs::write(&path, "not json\n").unwrap();

        let log = EventLog::new(path);
        log.append(&Event::at(EventKind::Block, "192.0.2.1", "x", 7)).unwrap();
        assert_eq!(log.read_recent(10).len(), 1);
    }
}
