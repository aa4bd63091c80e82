//! Deception Engine ("hall of mirrors")
//!
//! A mesh of listeners that lure connecting attackers into fabricated
//! services and stall them. Every listener binds before any accept runs,
//! and each connection gets its own task, so the accept loops never do
//! blocking work.
//!
//! # Components
//! - `engine.rs`: listener mesh and per-connection dispatch
//! - `session.rs`: inspectable session records and operator commands
//! - `persona.rs`: fabricated identities
//! - `http.rs` / `shell.rs` / `banner.rs`: protocol emulations
//! - `tarpit.rs`: unbounded stalling payloads
//! - `relay.rs`: republishes hits into the threat pipeline

pub mod banner;
pub mod engine;
pub mod http;
pub mod persona;
pub mod relay;
pub mod session;
pub mod shell;
pub mod tarpit;

use std::sync::Arc;
use std::time::Duration;

use crate::logic::gateway::ModelGateway;

pub use engine::{handle_connection, MirrorEngine};
pub use persona::Persona;
pub use relay::HitRelay;
pub use session::{AdminCommand, Session, SessionError, SessionRecord, SessionStore};

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// One-shot response written (http, banner)
    Served,
    PeerClosed,
    /// `exit` or `logout`
    Logout,
    /// Operator `terminate`
    Terminated,
    /// Operator `nuclear-flood` ran until the socket failed
    Flooded,
    /// An endless bait artifact ran until the socket failed
    Tarpitted,
}

/// Everything a connection handler needs
pub struct MirrorContext {
    gateway: Arc<dyn ModelGateway>,
    model_timeout: Duration,
    sessions: SessionStore,
    relay: HitRelay,
}

impl MirrorContext {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        model_timeout: Duration,
        sessions: SessionStore,
        relay: HitRelay,
    ) -> Self {
        Self { gateway, model_timeout, sessions, relay }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn relay(&self) -> &HitRelay {
        &self.relay
    }

    /// Model call off the async workers, bounded by the configured timeout.
    /// Any failure is `None`.
    pub async fn ask_model(&self, messages: Vec<String>) -> Option<String> {
        let gateway = self.gateway.clone();
        let call = tokio::task::spawn_blocking(move || gateway.send_chat(&messages));

        match tokio::time::timeout(self.model_timeout, call).await {
            Ok(Ok(Ok(text))) => Some(text),
            Ok(Ok(Err(e))) => {
                log::warn!("[Mirrors] Model call failed: {}", e);
                None
            }
            Ok(Err(e)) => {
                log::warn!("[Mirrors] Model task failed: {}", e);
                None
            }
            Err(_) => {
                log::warn!("[Mirrors] Model call timed out after {:?}", self.model_timeout);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests;
