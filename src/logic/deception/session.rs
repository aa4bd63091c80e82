//! Session Store
//!
//! Every live deception connection has `<id>.json` in the sessions
//! directory for inspection, and may receive one operator command at a
//! time through `<id>.cmd`. Both files are removed when the session drops.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::SESSION_TRANSCRIPT_CAP;
use crate::logic::store::{write_atomic, StoreError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("unknown admin command: {0}")]
    UnknownCommand(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// ADMIN COMMANDS
// ============================================================================

/// Operator-triggered escalation inside a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    /// Saturate the peer with random bytes until the socket fails
    NuclearFlood,
    Terminate,
    /// Acknowledged only; every login is already accepted
    AllowLogin,
}

impl AdminCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminCommand::NuclearFlood => "nuclear-flood",
            AdminCommand::Terminate => "terminate",
            AdminCommand::AllowLogin => "allow-login",
        }
    }
}

impl FromStr for AdminCommand {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nuclear-flood" | "nuclear_flood" | "pewpew" => Ok(AdminCommand::NuclearFlood),
            "terminate" | "close" => Ok(AdminCommand::Terminate),
            "allow-login" | "allow_login" => Ok(AdminCommand::AllowLogin),
            other => Err(SessionError::UnknownCommand(other.to_string())),
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub ip: String,
    pub port: u16,
    pub persona: String,
    pub buffer: String,
    pub start: i64,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a session and write its record. Persistence failures are
    /// logged; the session still runs.
    pub fn open(&self, ip: IpAddr, port: u16, persona: &str) -> Session {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let session = Session {
            json_path: self.dir.join(format!("{}.json", id)),
            cmd_path: self.dir.join(format!("{}.cmd", id)),
            id,
            record: SessionRecord {
                ip: ip.to_string(),
                port,
                persona: persona.to_string(),
                buffer: String::new(),
                start: Utc::now().timestamp(),
            },
        };

        if let Err(e) = fs::create_dir_all(&self.dir) {
            log::warn!("[Mirrors] Sessions dir {} unavailable: {}", self.dir.display(), e);
        }
        session.persist();
        session
    }

    /// Live sessions, oldest first. Unreadable records are skipped.
    pub fn list(&self) -> Vec<(String, SessionRecord)> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut sessions: Vec<(String, SessionRecord)> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|p| {
                let id = p.file_stem()?.to_str()?.to_string();
                let record = serde_json::from_str(&fs::read_to_string(&p).ok()?).ok()?;
                Some((id, record))
            })
            .collect();

        sessions.sort_by_key(|(_, r)| r.start);
        sessions
    }

    /// Queue a command for a live session, replacing any unconsumed one
    pub fn send_command(&self, id: &str, command: AdminCommand) -> Result<(), SessionError> {
        let valid_id = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid_id || !self.dir.join(format!("{}.json", id)).exists() {
            return Err(SessionError::UnknownSession(id.to_string()));
        }

        write_atomic(&self.dir.join(format!("{}.cmd", id)), command.as_str().as_bytes())?;
        Ok(())
    }
}

// ============================================================================
// LIVE SESSION
// ============================================================================

pub struct Session {
    id: String,
    json_path: PathBuf,
    cmd_path: PathBuf,
    record: SessionRecord,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// Append one exchange, keeping the newest bytes of the transcript
    pub fn record_exchange(&mut self, input: &str, output: &str) {
        self.record.buffer.push_str(&format!("IN: {}\nOUT: {}\n", input, output));
        cap_tail(&mut self.record.buffer, SESSION_TRANSCRIPT_CAP);
        self.persist();
    }

    /// Consume the pending command, if any
    pub fn take_command(&self) -> Option<AdminCommand> {
        let raw = fs::read_to_string(&self.cmd_path).ok()?;
        let _ = fs::remove_file(&self.cmd_path);

        match raw.parse() {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                log::warn!("[Mirrors] Session {}: {}", self.id, e);
                None
            }
        }
    }

    fn persist(&self) {
        let result = serde_json::to_vec(&self.record)
            .map_err(StoreError::from)
            .and_then(|json| write_atomic(&self.json_path, &json));
        if let Err(e) = result {
            log::warn!("[Mirrors] Session {} not persisted: {}", self.id, e);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.json_path);
        let _ = fs::remove_file(&self.cmd_path);
    }
}

/// Drop leading bytes so at most `max` remain, on a char boundary
fn cap_tail(buffer: &mut String, max: usize) {
    if buffer.len() <= max {
        return;
    }
    let mut start = buffer.len() - max;
    while !buffer.is_char_boundary(start) {
        start += 1;
    }
    buffer.drain(..start);
}
