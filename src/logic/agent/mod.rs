//! Agent Runtime
//!
//! Every detector is an `Agent`: observe, analyze, act, in that order,
//! once per cycle, with its typed memory loaded before the first cycle and
//! flushed after every cycle. A cycle never aborts: model failures leave
//! the affected items in memory so the next cycle retries them.
//!
//! ## Structure
//! - `tail` - offset-tracking log reader with rotation handling
//! - `triager` - IDS alert triage
//! - `guardian` - config drift and service health
//! - `sinkhole` - DGA domain sinkholing
//! - `overseer` - impossible-travel logins

pub mod tail;
pub mod triager;
pub mod guardian;
pub mod sinkhole;
pub mod overseer;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::logic::config::{ConfigHandle, DefenderConfig};
use crate::logic::gateway::{self, GatewayError, ModelGateway};
use crate::logic::heuristics::parse_verdict;
use crate::logic::heuristics::verdict::truncate;
use crate::logic::response::Enforcer;
use crate::logic::shutdown::StopFlag;
use crate::logic::store::{Event, EventKind, EventLog, MemoryStore};

pub use triager::Triager;
pub use guardian::Guardian;
pub use sinkhole::Sinkhole;
pub use overseer::Overseer;

/// Pending items an agent keeps between cycles
pub const MAX_PENDING: usize = 50;

// ============================================================================
// CONTRACT
// ============================================================================

pub trait Agent: Send {
    type State: Serialize + DeserializeOwned + Default + Send;

    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn poll_interval(&self, config: &DefenderConfig) -> Duration;

    fn observe(&mut self, cx: &mut Cycle<'_, Self::State>);
    fn analyze(&mut self, cx: &mut Cycle<'_, Self::State>);
    fn act(&mut self, cx: &mut Cycle<'_, Self::State>);
}

/// What a single cycle can see: memory, a config snapshot and the model
pub struct Cycle<'a, S> {
    pub memory: &'a mut S,
    pub config: &'a DefenderConfig,
    pub now: i64,
    gateway: &'a dyn ModelGateway,
    agent: &'static str,
}

impl<'a, S> Cycle<'a, S> {
    /// Raw model reply. Callers extract JSON themselves.
    pub fn ask_ai(&self, system: &str, user: &str) -> Result<String, GatewayError> {
        gateway::ask(self.gateway, system, user)
    }

    /// `Err` means the model was unreachable (retry later);
    /// `Ok(None)` means it answered without an actionable verdict.
    pub fn ask_verdict<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
    ) -> Result<Option<T>, GatewayError> {
        let reply = self.ask_ai(system, user).map_err(|e| {
            log::warn!("[Agent:{}] Model call failed, will retry next cycle: {}", self.agent, e);
            e
        })?;

        let verdict = parse_verdict(&reply);
        if verdict.is_none() {
            log::warn!(
                "[Agent:{}] No actionable verdict in reply: {}",
                self.agent,
                truncate(&reply, 120)
            );
        }
        Ok(verdict)
    }
}

// ============================================================================
// RUNTIME
// ============================================================================

pub struct AgentRuntime<A: Agent> {
    agent: A,
    store: MemoryStore<A::State>,
    memory: A::State,
    gateway: Arc<dyn ModelGateway>,
    config: Arc<ConfigHandle>,
}

impl<A: Agent> AgentRuntime<A> {
    pub fn new(
        agent: A,
        memory_dir: &Path,
        gateway: Arc<dyn ModelGateway>,
        config: Arc<ConfigHandle>,
    ) -> Self {
        let store = MemoryStore::new(memory_dir, agent.name());
        let memory = store.load();
        log::info!("[Agent:{}] {} (memory {})", agent.name(), agent.description(), store.path().display());

        Self { agent, store, memory, gateway, config }
    }

    pub fn memory(&self) -> &A::State {
        &self.memory
    }

    pub fn run_cycle(&mut self) {
        self.run_cycle_at(Utc::now().timestamp());
    }

    pub fn run_cycle_at(&mut self, now: i64) {
        let config = self.config.snapshot();
        let mut cx = Cycle {
            memory: &mut self.memory,
            config: &config,
            now,
            gateway: self.gateway.as_ref(),
            agent: self.agent.name(),
        };

        self.agent.observe(&mut cx);
        self.agent.analyze(&mut cx);
        self.agent.act(&mut cx);

        if let Err(e) = self.store.save(&self.memory) {
            log::error!("[Agent:{}] Failed to persist memory: {}", self.agent.name(), e);
        }
    }

    pub fn run_forever(&mut self, stop: &StopFlag) {
        log::info!("[Agent:{}] Running", self.agent.name());
        while !stop.is_stopped() {
            self.run_cycle();
            let interval = self.agent.poll_interval(&self.config.snapshot());
            if !stop.sleep(interval) {
                break;
            }
        }
        log::info!("[Agent:{}] Stopped", self.agent.name());
    }
}

// ============================================================================
// SHARED ACTIONS
// ============================================================================

/// Add a source to the shared pf table and record an escalation event
pub fn escalate(
    agent: &str,
    enforcer: &dyn Enforcer,
    events: &EventLog,
    ip: &str,
    reason: &str,
) {
    match enforcer.add(ip) {
        Ok(()) => log::warn!("[Agent:{}] Blocked {}: {}", agent, ip, reason),
        Err(e) => log::error!("[Agent:{}] Failed to block {}: {}", agent, ip, e),
    }

    let event = Event::new(EventKind::Escalation, ip, &format!("[{}] {}", agent, reason));
    if let Err(e) = events.append(&event) {
        log::error!("[Agent:{}] Failed to record escalation: {}", agent, e);
    }
}

/// Keep only the newest `max` items
pub(crate) fn cap_front<T>(items: &mut Vec<T>, max: usize) {
    if items.len() > max {
        let excess = items.len() - max;
        items.drain(..excess);
    }
}
