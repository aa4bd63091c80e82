//! Stalling payloads
//!
//! The streams here never finish on their own: they write until the peer
//! goes away and report how many bytes it swallowed.

use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use tokio::io::{AsyncWrite, AsyncWriteExt};

const CHUNK: usize = 8192;

static FILE_PROBE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(cat|more|less|tail|head|vi|vim|nano|wget|curl)\s+(.+)$").expect("static regex")
});

/// Nested entity expansion: nine levels of tenfold growth
pub static XML_BOMB: Lazy<String> = Lazy::new(|| {
    let mut doc = String::from("<?xml version=\"1.0\"?><!DOCTYPE lolz [<!ENTITY lol \"lol\">");
    for level in 1..=9 {
        let prev = if level == 1 { "lol".to_string() } else { format!("lol{}", level - 1) };
        let body = format!("&{};", prev).repeat(10);
        doc.push_str(&format!("<!ENTITY lol{} \"{}\">", level, body));
    }
    doc.push_str("]><lolz>&lol9;</lolz>");
    doc
});

/// Bait file a probe asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Wallet,
    Topology,
    Config,
}

impl Artifact {
    pub fn detect(command: &str) -> Option<Artifact> {
        let caps = FILE_PROBE.captures(command.trim())?;
        let target = caps.get(2)?.as_str();

        if target.contains("wallet.dat") {
            Some(Artifact::Wallet)
        } else if target.contains("network_topology.json") {
            Some(Artifact::Topology)
        } else if target.contains("config.xml") {
            Some(Artifact::Config)
        } else {
            None
        }
    }
}

/// Zero bytes until the write fails
pub async fn null_stream<W: AsyncWrite + Unpin>(writer: &mut W) -> u64 {
    let chunk = [0u8; CHUNK];
    let mut sent = 0u64;
    while writer.write_all(&chunk).await.is_ok() {
        sent += CHUNK as u64;
    }
    sent
}

/// An endless JSON array of graph nodes
pub async fn topology_stream<W: AsyncWrite + Unpin>(writer: &mut W) -> u64 {
    let head = b"{\"topology\": [";
    if writer.write_all(head).await.is_err() {
        return 0;
    }
    let mut sent = head.len() as u64;

    loop {
        let node = format!(
            "{{\"id\": \"{}\", \"neighbors\": [\"{}\", \"{}\"]}},",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        if writer.write_all(node.as_bytes()).await.is_err() {
            return sent;
        }
        sent += node.len() as u64;
    }
}

/// Random bytes until the write fails
pub async fn random_flood<W: AsyncWrite + Unpin>(writer: &mut W) -> u64 {
    let mut chunk = vec![0u8; CHUNK];
    let mut sent = 0u64;
    loop {
        rand::thread_rng().fill_bytes(&mut chunk);
        if writer.write_all(&chunk).await.is_err() {
            return sent;
        }
        sent += CHUNK as u64;
    }
}
