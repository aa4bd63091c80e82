//! Honeypot-hit relay
//!
//! Republishes each captured peer into the work queue for the worker and
//! into the event log. Best-effort: failures are logged and the session
//! carries on.

use std::path::PathBuf;

use crate::logic::store::{Event, EventKind, EventLog, StoreError, WorkQueue};

pub struct HitRelay {
    queue_db: PathBuf,
    events: EventLog,
}

impl HitRelay {
    pub fn new(queue_db: PathBuf, events: EventLog) -> Self {
        Self { queue_db, events }
    }

    /// Blocking; call from a blocking context
    pub fn record(&self, ip: &str, port: u16, persona: &str) {
        let line = format!(
            "HONEYPOT_HIT: {} engaged with Hall of Mirrors ({}) on port {}",
            ip, persona, port
        );

        if let Err(e) = self.enqueue(ip, &line) {
            log::warn!("[Mirrors] Hit for {} not queued: {}", ip, e);
        }

        let event = Event::new(
            EventKind::HoneypotHit,
            ip,
            &format!("port {} persona {}", port, persona),
        );
        if let Err(e) = self.events.append(&event) {
            log::warn!("[Mirrors] Hit for {} not logged: {}", ip, e);
        }
    }

    fn enqueue(&self, ip: &str, line: &str) -> Result<(), StoreError> {
        WorkQueue::open(&self.queue_db)?.push(ip, line)
    }
}
