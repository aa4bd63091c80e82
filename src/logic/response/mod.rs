//! Response Module
//!
//! Host-side effectors the detectors drive. Every effector sits behind a
//! trait so detectors can be exercised without touching the host.
//!
//! # Components
//! - `types.rs`: ActionError and command execution helper
//! - `enforcement.rs`: packet-filter table membership (pfctl)
//! - `services.rs`: service liveness, restart, resolver reload
//! - `notify.rs`: syslog and webhook alerts

pub mod types;
pub mod enforcement;
pub mod services;
pub mod notify;

pub use types::ActionError;
pub use enforcement::{Enforcer, PfTable};
pub use services::{ServiceControl, SystemServices};
pub use notify::{Alert, AlertDispatcher, AlertSeverity, Notifier};
