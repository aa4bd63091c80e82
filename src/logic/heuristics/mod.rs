//! Heuristic Library
//!
//! Pure, stateless helpers shared by agents, the worker and the mirrors.
//!
//! ## Structure
//! - `entropy` - Shannon entropy and DGA pre-filter
//! - `geo` - Haversine distance and implied travel speed
//! - `patterns` - IPv4 / login / DNS query extraction from raw log lines
//! - `verdict` - JSON extraction from free-text model output

pub mod entropy;
pub mod geo;
pub mod patterns;
pub mod verdict;

pub use entropy::{shannon_entropy, is_dga_candidate};
pub use geo::{GeoPoint, haversine_km, implied_speed_kmh};
pub use patterns::{
    extract_ipv4s, extract_login, extract_query_domain, first_public_ipv4, is_public_ipv4,
    LoginSighting,
};
pub use verdict::{extract_json, parse_verdict};
