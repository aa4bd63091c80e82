//! Logic Module - detection, response and deception engines
//!
//! ## Structure
//! - `config` - `DefenderConfig` and the snapshotting `ConfigHandle`
//! - `heuristics` - entropy, geodistance, log patterns, verdict parsing
//! - `gateway` - model providers behind `ModelGateway`
//! - `store` - blocklist, event log, work queue, agent memory, lock files
//! - `response` - pf enforcement, service control, alert delivery
//! - `external_intel` - GeoIP and IP reputation lookups
//! - `shutdown` - cooperative stop flag and signal handling
//! - `agent` - agent runtime and the four concrete agents
//! - `pipeline` - collector and correlation worker
//! - `deception` - the listener mesh

// Foundations
pub mod config;
pub mod heuristics;
pub mod gateway;
pub mod store;
pub mod shutdown;

// Effectors and lookups
pub mod response;
pub mod external_intel;

// Daemons
pub mod agent;
pub mod pipeline;
pub mod deception;

#[cfg(test)]
pub mod testing;
