//! Log Collector
//!
//! Tails every configured log source as one logical stream, pulls the
//! first public IPv4 out of each line and enqueues `(ip, line)` for the
//! worker. Repeats of the same source inside the dedup window are dropped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use super::dedup::DedupCache;
use crate::logic::agent::tail::LogTailer;
use crate::logic::config::MonitorConfig;
use crate::logic::heuristics::first_public_ipv4;
use crate::logic::shutdown::StopFlag;
use crate::logic::store::{StoreError, WorkQueue};

/// Pause between tail rounds
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Wait before the single source-discovery retry
pub const DISCOVERY_RETRY: Duration = Duration::from_secs(10);

pub fn existing_sources(candidates: &[PathBuf]) -> Vec<PathBuf> {
    candidates.iter().filter(|p| p.exists()).cloned().collect()
}

/// Existing sources, retrying once after `retry_delay`.
/// Empty means there is nothing to monitor.
pub fn discover_sources(candidates: &[PathBuf], stop: &StopFlag, retry_delay: Duration) -> Vec<PathBuf> {
    let found = existing_sources(candidates);
    if !found.is_empty() {
        return found;
    }

    log::warn!(
        "[Collector] No log sources present, retrying in {}s",
        retry_delay.as_secs()
    );
    if !stop.sleep(retry_delay) {
        return Vec::new();
    }
    existing_sources(candidates)
}

pub struct Collector {
    tailers: Vec<LogTailer>,
    dedup: DedupCache,
    queue: WorkQueue,
}

impl Collector {
    /// Tailing joins every source at its current end
    pub fn new(sources: Vec<PathBuf>, queue: WorkQueue, config: &MonitorConfig) -> Self {
        let mut tailers: Vec<LogTailer> = sources.into_iter().map(LogTailer::new).collect();
        for tailer in &mut tailers {
            tailer.poll();
        }

        Self {
            tailers,
            dedup: DedupCache::new(config.dedup_window_secs, config.dedup_capacity),
            queue,
        }
    }

    pub fn sources(&self) -> Vec<&Path> {
        self.tailers.iter().map(LogTailer::path).collect()
    }

    /// Enqueue the line's source unless it was seen recently.
    /// Returns whether an item was enqueued.
    pub fn ingest_line(&mut self, line: &str, now: i64) -> Result<bool, StoreError> {
        let Some(ip) = first_public_ipv4(line) else {
            return Ok(false);
        };
        let ip = ip.to_string();

        if !self.dedup.should_emit(&ip, now) {
            return Ok(false);
        }

        self.queue.push(&ip, line)?;
        log::debug!("[Collector] Queued {}", ip);
        Ok(true)
    }

    /// One pass over every source; returns the number of items enqueued
    pub fn poll_once(&mut self, now: i64) -> usize {
        let mut lines = Vec::new();
        for tailer in &mut self.tailers {
            lines.extend(tailer.poll());
        }

        let mut queued = 0;
        for line in lines {
            match self.ingest_line(&line, now) {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(e) => log::error!("[Collector] Enqueue failed: {}", e),
            }
        }
        queued
    }

    pub fn run(&mut self, stop: &StopFlag) {
        log::info!("[Collector] Watching {} source(s)", self.tailers.len());
        for source in self.sources() {
            log::info!("[Collector]   {}", source.display());
        }

        while !stop.is_stopped() {
            let queued = self.poll_once(Utc::now().timestamp());
            if queued > 0 {
                log::info!("[Collector] Enqueued {} item(s)", queued);
            }
            if !stop.sleep(POLL_INTERVAL) {
                break;
            }
        }

        log::info!("[Collector] Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new().create(true).append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    fn setup(dir: &Path) -> (Collector, PathBuf, PathBuf) {
        let log_a = dir.join("filter.log");
        let log_b = dir.join("alert");
        append(&log_a, "boot\n");
        append(&log_b, "");

        let queue = WorkQueue::open(&dir.join("queue.db")).unwrap();
        let collector = Collector::new(
            vec![log_a.clone(), log_b.clone()],
            queue,
            &MonitorConfig::default(),
        );
        (collector, log_a, log_b)
    }

    #[test]
    fn test_same_source_across_streams_enqueued_once() {
        let dir = tempfile::tempdir().unwrap();
        let (mut collector, log_a, log_b) = setup(dir.path());

        append(&log_a, "block in on em0: 203.0.113.7 -> 192.168.1.1 port 22\n");
        append(&log_b, "[**] ET SCAN from 203.0.113.7:4444 [**]\n");

        assert_eq!(collector.poll_once(1_000), 1);
        let batch = collector.queue.pop_batch(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].ip, "203.0.113.7");
        assert!(batch[0].log_line.contains("em0"));
    }

    #[test]
    fn test_private_only_lines_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut collector, log_a, _) = setup(dir.path());

        append(&log_a, "pass out 10.0.0.4 -> 192.168.1.20\nlo0 127.0.0.1\n");
        assert_eq!(collector.poll_once(1_000), 0);
        assert_eq!(collector.queue.len().unwrap(), 0);
    }

    #[test]
    fn test_window_expiry_requeues() {
        let dir = tempfile::tempdir().unwrap();
        let (mut collector, _, _) = setup(dir.path());

        let line = "sshd: Failed password from 198.51.100.4";
        assert!(collector.ingest_line(line, 100).unwrap());
        assert!(!collector.ingest_line(line, 105).unwrap());
        assert!(collector.ingest_line(line, 111).unwrap());
        assert_eq!(collector.queue.len().unwrap(), 2);
    }

    #[test]
    fn test_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.log");
        append(&present, "");
        let missing = dir.path().join("missing.log");

        let stop = StopFlag::new();
        let found = discover_sources(&[missing.clone(), present.clone()], &stop, Duration::ZERO);
        assert_eq!(found, vec![present]);

        assert!(discover_sources(&[missing], &stop, Duration::ZERO).is_empty());
    }
}
