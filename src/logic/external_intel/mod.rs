//! External Intelligence Module
//!
//! Best-effort lookups against third-party services. Every call has a
//! short timeout and any failure means "insufficient data".
//!
//! # Components
//! - `geoip.rs`: IP geolocation for impossible-travel checks
//! - `reputation.rs`: AbuseIPDB and AlienVault OTX enrichment

pub mod geoip;
pub mod reputation;

use thiserror::Error;

pub use geoip::{GeoFix, GeoLocator, IpApiLocator};
pub use reputation::{enrichment_lines, providers_from_env, ThreatIntel};

#[derive(Debug, Clone, Error)]
pub enum IntelError {
    #[error("{0} API key not configured")]
    NotConfigured(&'static str),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {0}")]
    Http(u16),
    #[error("no data: {0}")]
    NoData(String),
}

pub(crate) fn map_ureq(e: ureq::Error) -> IntelError {
    match e {
        ureq::Error::Status(status, _) => IntelError::Http(status),
        other => IntelError::Network(other.to_string()),
    }
}
