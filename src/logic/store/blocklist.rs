//! Blocklist Store
//!
//! JSON array of `{ip, reason, ts, expire_ts}`. `ts` is ISO-8601,
//! `expire_ts` is unix seconds. One entry per source at most.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{write_atomic, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlocklistEntry {
    pub ip: String,
    pub reason: String,
    pub ts: String,
    pub expire_ts: i64,
}

impl BlocklistEntry {
    pub fn new(ip: &str, reason: &str, now: DateTime<Utc>, ttl_hours: u64) -> Self {
        Self {
            ip: ip.to_string(),
            reason: reason.to_string(),
            ts: now.to_rfc3339(),
            expire_ts: now.timestamp() + (ttl_hours as i64) * 3600,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expire_ts <= now
    }
}

pub struct Blocklist {
    path: PathBuf,
}

impl Blocklist {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Current entries. Missing or corrupt file reads as empty; malformed rows are skipped.
    pub fn load(&self) -> Vec<BlocklistEntry> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!("Failed to read blocklist {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<serde_json::Value>>(&content) {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| serde_json::from_value(row).ok())
                .collect(),
            Err(e) => {
                log::warn!("Corrupt blocklist {}, treating as empty: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    fn save(&self, entries: &[BlocklistEntry]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(entries)?;
        write_atomic(&self.path, &json)
    }

    /// Insert or replace the entry for `ip`, resetting its expiry
    pub fn upsert(
        &self,
        ip: &str,
        reason: &str,
        now: DateTime<Utc>,
        ttl_hours: u64,
    ) -> Result<BlocklistEntry, StoreError> {
        let entry = BlocklistEntry::new(ip, reason, now, ttl_hours);

        let mut entries = self.load();
        entries.retain(|e| e.ip != ip);
        entries.push(entry.clone());
        self.save(&entries)?;

        Ok(entry)
    }

    /// Explicit unblock
    pub fn remove(&self, ip: &str) -> Result<Option<BlocklistEntry>, StoreError> {
        let mut entries = self.load();
        let removed = entries.iter().position(|e| e.ip == ip).map(|i| entries.remove(i));
        if removed.is_some() {
            self.save(&entries)?;
        }
        Ok(removed)
    }

    /// Drop every entry whose expiry has passed and return them
    pub fn sweep_expired(&self, now: i64) -> Result<Vec<BlocklistEntry>, StoreError> {
        let entries = self.load();
        let (expired, active): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.is_expired(now));

        if !expired.is_empty() {
            self.save(&active)?;
        }
        Ok(expired)
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.load().iter().any(|e| e.ip == ip)
    }
}
