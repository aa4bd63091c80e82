//! Threat Correlation Pipeline
//!
//! Producer/consumer over the durable work queue: the collector turns raw
//! log lines into candidate sources, the worker scores them with the model
//! and drives the blocklist lifecycle.
//!
//! # Components
//! - `dedup.rs`: bounded recent-source suppression
//! - `collector.rs`: log tailing and enqueue
//! - `risk.rs`: per-source accumulating risk and block decision
//! - `worker.rs`: model scoring, enforcement, TTL sweep

pub mod dedup;
pub mod collector;
pub mod risk;
pub mod worker;

use std::path::Path;
use std::time::Duration;

use crate::logic::store::{StoreError, WorkQueue};

pub use collector::Collector;
pub use worker::Worker;

/// Open the queue, retrying once after a short pause
pub fn open_queue(path: &Path) -> Result<WorkQueue, StoreError> {
    match WorkQueue::open(path) {
        Ok(queue) => Ok(queue),
        Err(e) => {
            log::warn!("Queue {} unavailable ({}), retrying once", path.display(), e);
            std::thread::sleep(Duration::from_secs(1));
            WorkQueue::open(path)
        }
    }
}
