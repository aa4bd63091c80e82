//! Listener mesh
//!
//! All listeners are bound up front. Each accept loop only accepts and
//! spawns; reading, model calls and disk writes happen in the
//! per-connection task.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use super::{banner, http, shell, MirrorContext, Persona, SessionEnd};
use crate::logic::config::{DeceptionConfig, MirrorProtocol};
use crate::logic::shutdown::StopFlag;

const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

struct BoundListener {
    listener: TcpListener,
    port: u16,
    protocol: MirrorProtocol,
}

pub struct MirrorEngine {
    cx: Arc<MirrorContext>,
    listeners: Vec<BoundListener>,
}

impl MirrorEngine {
    /// Bind every configured port. A port that fails to bind is logged and
    /// skipped; failing all of them is an error.
    pub async fn bind(config: &DeceptionConfig, cx: Arc<MirrorContext>) -> io::Result<Self> {
        let mut listeners = Vec::new();

        for wanted in &config.listeners {
            let addr = format!("{}:{}", config.bind_addr, wanted.port);
            match TcpListener::bind(&addr).await {
                Ok(listener) => {
                    let port = listener.local_addr().map(|a| a.port()).unwrap_or(wanted.port);
                    log::info!("[Mirrors] Listening on {} ({:?})", addr, wanted.protocol());
                    listeners.push(BoundListener { listener, port, protocol: wanted.protocol() });
                }
                Err(e) => log::error!("[Mirrors] Bind failed on {}: {}", addr, e),
            }
        }

        if listeners.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no deception listener could be bound",
            ));
        }

        Ok(Self { cx, listeners })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.listener.local_addr().ok())
            .collect()
    }

    /// Accept until stopped
    pub async fn run(self, stop: StopFlag) {
        let mut loops = JoinSet::new();
        for bound in self.listeners {
            loops.spawn(accept_loop(bound, self.cx.clone(), stop.clone()));
        }
        while loops.join_next().await.is_some() {}
        log::info!("[Mirrors] Stopped");
    }
}

async fn accept_loop(bound: BoundListener, cx: Arc<MirrorContext>, stop: StopFlag) {
    loop {
        tokio::select! {
            _ = stop.stopped() => break,
            accepted = bound.listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let cx = cx.clone();
                    let (port, protocol) = (bound.port, bound.protocol);
                    tokio::spawn(async move {
                        handle_connection(stream, peer.ip(), port, protocol, cx).await;
                    });
                }
                Err(e) => {
                    log::warn!("[Mirrors] Accept on port {} failed: {}", bound.port, e);
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                }
            }
        }
    }
}

/// Per-connection entry point with a randomly chosen persona
pub async fn handle_connection<S>(
    stream: S,
    peer: IpAddr,
    port: u16,
    protocol: MirrorProtocol,
    cx: Arc<MirrorContext>,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    serve(stream, peer, port, protocol, Persona::random(), cx).await
}

pub async fn serve<S>(
    mut stream: S,
    peer: IpAddr,
    port: u16,
    protocol: MirrorProtocol,
    persona: Persona,
    cx: Arc<MirrorContext>,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if protocol == MirrorProtocol::Banner {
        log::info!("[Mirrors] Banner hit from {} on port {}", peer, port);
        relay_hit(&cx, peer, port, "banner").await;
        banner::serve_banner(&mut stream, port).await;
        let _ = stream.shutdown().await;
        return SessionEnd::Served;
    }

    log::info!("[Mirrors] Captured {} on port {}, persona {}", peer, port, persona.key);
    let mut session = cx.sessions().open(peer, port, persona.key);
    relay_hit(&cx, peer, port, persona.key).await;

    let end = match protocol {
        MirrorProtocol::Http => http::serve_http(&mut stream, &persona, &mut session, &cx).await,
        _ => shell::serve_shell(&mut stream, &persona, &mut session, &cx).await,
    };

    let _ = stream.shutdown().await;
    log::info!("[Mirrors] Session {} with {} ended: {:?}", session.id(), peer, end);
    end
}

async fn relay_hit(cx: &Arc<MirrorContext>, peer: IpAddr, port: u16, persona: &'static str) {
    let cx = cx.clone();
    let ip = peer.to_string();
    if let Err(e) = tokio::task::spawn_blocking(move || cx.relay().record(&ip, port, persona)).await {
        log::warn!("[Mirrors] Hit relay task failed: {}", e);
    }
}
