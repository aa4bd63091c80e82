//! Work Queue
//!
//! Durable hand-off between the collector and the worker, backed by an
//! embedded SQLite database in WAL mode. A pop selects and deletes inside
//! one immediate transaction, so two workers never receive the same row.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// Candidate threat observation. Serialized payload is `{ip, log_line}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub ip: String,
    pub log_line: String,
    #[serde(skip)]
    pub enqueued_at: i64,
}

pub struct WorkQueue {
    conn: Connection,
}

impl WorkQueue {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS work_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self { conn })
    }

    pub fn push(&self, ip: &str, log_line: &str) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&WorkItem {
            ip: ip.to_string(),
            log_line: log_line.to_string(),
            enqueued_at: 0,
        })?;

        self.conn.execute(
            "INSERT INTO work_queue (payload, enqueued_at) VALUES (?1, ?2)",
            params![payload, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Remove and return up to `limit` items, oldest first.
    /// Rows whose payload no longer parses are dropped with a warning.
    pub fn pop_batch(&mut self, limit: usize) -> Result<Vec<WorkItem>, StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows: Vec<(i64, String, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT id, payload, enqueued_at FROM work_queue ORDER BY id LIMIT ?1",
            )?;
            let mapped = stmt.query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            mapped.collect::<Result<_, _>>()?
        };

        for (id, _, _) in &rows {
            tx.execute("DELETE FROM work_queue WHERE id = ?1", params![id])?;
        }
        tx.commit()?;

        let items = rows
            .into_iter()
            .filter_map(|(id, payload, enqueued_at)| {
                match serde_json::from_str::<WorkItem>(&payload) {
                    Ok(item) => Some(WorkItem { enqueued_at, ..item }),
                    Err(e) => {
                        log::warn!("Dropping malformed queue row {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();

        Ok(items)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM work_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
