//! Persistent Stores
//!
//! Durable resources shared between daemons. Every file has exactly one
//! writing component; whole-file rewrites go through `write_atomic` so a
//! crash never leaves a half-written blocklist or memory file behind.
//!
//! # Components
//! - `blocklist.rs`: TTL-bearing enforcement decisions (worker-owned)
//! - `events.rs`: append-only NDJSON audit log
//! - `queue.rs`: SQLite work queue between collector and worker
//! - `memory.rs`: per-agent typed state
//! - `lockfile.rs`: liveness-verified single-instance lock

pub mod blocklist;
pub mod events;
pub mod queue;
pub mod memory;
pub mod lockfile;

use std::fs;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

pub use blocklist::{Blocklist, BlocklistEntry};
pub use events::{Event, EventKind, EventLog};
pub use queue::{WorkItem, WorkQueue};
pub use memory::MemoryStore;
pub use lockfile::{LockError, PidLock};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("queue error: {0}")]
    Queue(#[from] rusqlite::Error),
}

/// Write to a sibling temp file, fsync, then rename over the target
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp.{}", file_name, std::process::id()));

    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
