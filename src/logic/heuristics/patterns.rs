//! Log Pattern Extraction
//!
//! IPv4 candidates use a strict octet-range pattern and must not be glued
//! to neighbouring digits or dots, so version strings like `1.2.3.4.5`
//! never yield an address.

use std::net::Ipv4Addr;

use once_cell::sync::Lazy;
use regex::Regex;

// ============================================================================
// PATTERNS
// ============================================================================

/// Maximal runs of digits and dots
static DOTTED_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9.]+").expect("static regex")
});

static STRICT_IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)$",
    )
    .expect("static regex")
});

static AUTH_LOGIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)successful login for user '?(\w+)'? from:? (\d+\.\d+\.\d+\.\d+)")
        .expect("static regex")
});

static SSH_ACCEPTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Accepted (?:publickey|password|keyboard-interactive/pam) for (\w+) from (\d+\.\d+\.\d+\.\d+)")
        .expect("static regex")
});

static VPN_AUTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)user '(\w+)' authenticated from (\d+\.\d+\.\d+\.\d+)")
        .expect("static regex")
});

static RESOLVER_QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)info:\s+\S+\s+(\S+)\.\s+[A-Z]+\s+IN").expect("static regex")
});

// ============================================================================
// IPV4
// ============================================================================

/// All strictly formed IPv4 addresses in order of appearance
pub fn extract_ipv4s(line: &str) -> Vec<Ipv4Addr> {
    DOTTED_RUN
        .find_iter(line)
        .map(|m| m.as_str())
        .filter(|run| STRICT_IPV4.is_match(run))
        .filter_map(|run| run.parse().ok())
        .collect()
}

/// Routable address: not RFC1918, loopback, link-local, unspecified or broadcast
pub fn is_public_ipv4(ip: &Ipv4Addr) -> bool {
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast())
}

/// First public IPv4 on the line
pub fn first_public_ipv4(line: &str) -> Option<Ipv4Addr> {
    extract_ipv4s(line).into_iter().find(is_public_ipv4)
}

// ============================================================================
// AUTH / VPN / DNS
// ============================================================================

/// A (user, ip) pair taken from an auth or VPN log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSighting {
    pub user: String,
    pub ip: Ipv4Addr,
}

/// Successful web/SSH login or VPN authentication
pub fn extract_login(line: &str) -> Option<LoginSighting> {
    let caps = AUTH_LOGIN
        .captures(line)
        .or_else(|| SSH_ACCEPTED.captures(line))
        .or_else(|| VPN_AUTH.captures(line))?;

    let ip = caps.get(2)?.as_str();
    if !STRICT_IPV4.is_match(ip) {
        return None;
    }

    Some(LoginSighting {
        user: caps.get(1)?.as_str().to_string(),
        ip: ip.parse().ok()?,
    })
}

/// Queried name from a resolver query log line (trailing dot stripped)
pub fn extract_query_domain(line: &str) -> Option<String> {
    RESOLVER_QUERY
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}
