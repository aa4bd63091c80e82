use super::*;
use crate::logic::config::{DeceptionConfig, ListenerConfig, MirrorProtocol};
use crate::logic::gateway::GatewayError;
use crate::logic::shutdown::StopFlag;
use crate::logic::store::{EventKind, EventLog, WorkQueue};
use crate::logic::testing::ScriptedGateway;
use std::net::IpAddr;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

// ============================================================================
// HELPERS
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

fn context(dir: &Path, gateway: Arc<ScriptedGateway>) -> Arc<MirrorContext> {
    Arc::new(MirrorContext::new(
        gateway,
        Duration::from_secs(5),
        SessionStore::new(dir.join("sessions")),
        HitRelay::new(dir.join("queue.db"), EventLog::new(dir.join("events.log"))),
    ))
}

fn peer() -> IpAddr {
    "203.0.113.66".parse().unwrap()
}

fn start(
    cx: &Arc<MirrorContext>,
    protocol: MirrorProtocol,
) -> (DuplexStream, JoinHandle<SessionEnd>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let handle = tokio::spawn(engine::serve(server, peer(), 2323, protocol, PERSONAS_FIRST, cx.clone()));
    (client, handle)
}

const PERSONAS_FIRST: Persona = persona::PERSONAS[0];

async fn read_until(stream: &mut DuplexStream, needle: &str) -> String {
    let mut acc = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = tokio::time::timeout(WAIT, stream.read(&mut buf))
            .await
            .expect("peer went quiet")
            .unwrap();
        if n == 0 {
            break;
        }
        acc.extend_from_slice(&buf[..n]);
        if String::from_utf8_lossy(&acc).contains(needle) {
            break;
        }
    }
    String::from_utf8_lossy(&acc).into_owned()
}

async fn login(client: &mut DuplexStream) {
    read_until(client, "login: ").await;
    client.write_all(b"admin\r\n").await.unwrap();
    read_until(client, "Password: ").await;
    client.write_all(b"hunter2\r\n").await.unwrap();
    let welcome = read_until(client, "$ ").await;
    assert!(welcome.contains("Authentication successful."));
}

async fn finish(handle: JoinHandle<SessionEnd>) -> SessionEnd {
    tokio::time::timeout(WAIT, handle).await.expect("session hung").unwrap()
}

// ============================================================================
// SHELL
// ============================================================================

#[tokio::test]
async fn test_shell_roleplays_and_logs_out() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(ScriptedGateway::replying(&[
        "wallet.dat  network_topology.json  config.xml  id_rsa",
    ]));
    let cx = context(dir.path(), gateway.clone());
    let (mut client, handle) = start(&cx, MirrorProtocol::Shell);

    login(&mut client).await;
    assert_eq!(cx.sessions().list().len(), 1);

    client.write_all(b"ls -la\r\n").await.unwrap();
    let out = read_until(&mut client, "$ ").await;
    assert!(out.contains("wallet.dat"));

    let prompts = gateway.prompts();
    assert_eq!(prompts[0][1], "ls -la");
    assert!(prompts[0][0].contains(PERSONAS_FIRST.prompt));
    assert!(prompts[0][0].contains("/home/admin"));
    assert!(prompts[0][0].contains("network_topology.json"));

    client.write_all(b"exit\r\n").await.unwrap();
    assert_eq!(finish(handle).await, SessionEnd::Logout);

    assert!(cx.sessions().list().is_empty());
    let mut queue = WorkQueue::open(&dir.path().join("queue.db")).unwrap();
    let hits = queue.pop_batch(10).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].log_line.starts_with("HONEYPOT_HIT: 203.0.113.66"));
    let events = EventLog::new(dir.path().join("events.log")).read_recent(10);
    assert_eq!(events[0].kind, EventKind::HoneypotHit);
}

#[tokio::test]
async fn test_model_failure_keeps_session_alive() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(ScriptedGateway::new(vec![
        Err(GatewayError::Http { status: 429 }),
        Ok("root".to_string()),
    ]));
    let cx = context(dir.path(), gateway);
    let (mut client, handle) = start(&cx, MirrorProtocol::Shell);

    login(&mut client).await;
    client.write_all(b"uname -a\r\n").await.unwrap();
    assert!(read_until(&mut client, "$ ").await.contains("Error: I/O Interrupt"));

    client.write_all(b"whoami\r\n").await.unwrap();
    assert!(read_until(&mut client, "$ ").await.contains("root"));

    client.write_all(b"cd /srv/backups\r\n").await.unwrap();
    read_until(&mut client, "$ ").await;

    client.write_all(b"logout\r\n").await.unwrap();
    assert_eq!(finish(handle).await, SessionEnd::Logout);
}

#[tokio::test]
async fn test_wallet_streams_until_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(ScriptedGateway::new(Vec::new()));
    let cx = context(dir.path(), gateway.clone());
    let (mut client, handle) = start(&cx, MirrorProtocol::Shell);

    login(&mut client).await;
    client.write_all(b"cat ~/wallet.dat\r\n").await.unwrap();

    let mut total = 0usize;
    let mut buf = vec![0u8; 16 * 1024];
    for _ in 0..8 {
        let n = tokio::time::timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap();
        assert!(n > 0);
        assert!(buf[..n].iter().all(|&b| b == 0));
        let before = total;
        total += n;
        assert!(total > before);
    }
    drop(client);

    assert_eq!(finish(handle).await, SessionEnd::Tarpitted);
    assert_eq!(gateway.call_count(), 0);
    assert!(cx.sessions().list().is_empty());
}

#[tokio::test]
async fn test_config_bait_then_session_continues() {
    let dir = tempfile::tempdir().unwrap();
    let cx = context(dir.path(), Arc::new(ScriptedGateway::new(Vec::new())));
    let (mut client, handle) = start(&cx, MirrorProtocol::Shell);

    login(&mut client).await;
    client.write_all(b"cat /etc/app/config.xml\r\n").await.unwrap();
    let out = read_until(&mut client, "</lolz>\r\n$ ").await;
    assert!(out.contains("<!DOCTYPE lolz"));

    client.write_all(b"exit\r\n").await.unwrap();
    assert_eq!(finish(handle).await, SessionEnd::Logout);
}

#[tokio::test]
async fn test_pasted_lines_run_one_by_one() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(ScriptedGateway::replying(&["admin", "/home/admin"]));
    let cx = context(dir.path(), gateway.clone());
    let (mut client, handle) = start(&cx, MirrorProtocol::Shell);

    login(&mut client).await;
    client
        .write_all(b"whoami\r\npwd\r\ncat config.xml\r\nexit\r\n")
        .await
        .unwrap();

    let out = read_until(&mut client, "</lolz>\r\n$ ").await;
    assert!(out.contains("/home/admin"));
    assert_eq!(finish(handle).await, SessionEnd::Logout);

    let commands: Vec<String> = gateway.prompts().into_iter().map(|p| p[1].clone()).collect();
    assert_eq!(commands, vec!["whoami", "pwd"]);
}

#[tokio::test]
async fn test_operator_terminate() {
    let dir = tempfile::tempdir().unwrap();
    let cx = context(dir.path(), Arc::new(ScriptedGateway::new(Vec::new())));
    let (mut client, handle) = start(&cx, MirrorProtocol::Shell);

    login(&mut client).await;
    let (id, record) = cx.sessions().list().remove(0);
    assert_eq!(record.persona, PERSONAS_FIRST.key);
    assert_eq!(record.port, 2323);

    cx.sessions().send_command(&id, AdminCommand::Terminate).unwrap();
    assert_eq!(finish(handle).await, SessionEnd::Terminated);
    assert!(cx.sessions().list().is_empty());
}

#[tokio::test]
async fn test_operator_flood_until_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let cx = context(dir.path(), Arc::new(ScriptedGateway::new(Vec::new())));
    let (mut client, handle) = start(&cx, MirrorProtocol::Shell);

    login(&mut client).await;
    let (id, _) = cx.sessions().list().remove(0);
    cx.sessions().send_command(&id, "pewpew".parse().unwrap()).unwrap();

    let mut buf = vec![0u8; 8192];
    let n = tokio::time::timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap();
    assert!(n > 0);
    drop(client);

    assert_eq!(finish(handle).await, SessionEnd::Flooded);
}

// ============================================================================
// HTTP + BANNER
// ============================================================================

#[tokio::test]
async fn test_http_fabricated_response() {
    let dir = tempfile::tempdir().unwrap();
    let page = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<form>Login</form>";
    let gateway = Arc::new(ScriptedGateway::replying(&[page]));
    let cx = context(dir.path(), gateway.clone());
    let (mut client, handle) = start(&cx, MirrorProtocol::Http);

    client.write_all(b"GET /admin HTTP/1.1\r\nHost: erp\r\n\r\n").await.unwrap();
    assert_eq!(finish(handle).await, SessionEnd::Served);

    let mut body = String::new();
    client.read_to_string(&mut body).await.unwrap();
    assert_eq!(body, page);
    assert!(gateway.prompts()[0][0].contains("GET /admin"));
}

#[tokio::test]
async fn test_http_fallback_on_model_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cx = context(dir.path(), Arc::new(ScriptedGateway::new(Vec::new())));
    let (mut client, handle) = start(&cx, MirrorProtocol::Http);

    client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
    assert_eq!(finish(handle).await, SessionEnd::Served);

    let mut body = String::new();
    client.read_to_string(&mut body).await.unwrap();
    assert_eq!(body, http::FALLBACK_RESPONSE);
}

#[tokio::test]
async fn test_banner_hit_relayed() {
    let dir = tempfile::tempdir().unwrap();
    let cx = context(dir.path(), Arc::new(ScriptedGateway::new(Vec::new())));
    let (client, server) = tokio::io::duplex(4096);

    let end = handle_connection(server, peer(), 21, MirrorProtocol::Banner, cx.clone()).await;
    assert_eq!(end, SessionEnd::Served);

    let mut client = client;
    let mut banner = String::new();
    client.read_to_string(&mut banner).await.unwrap();
    assert!(banner.starts_with("SSH-2.0-OpenSSH"));

    let queue = WorkQueue::open(&dir.path().join("queue.db")).unwrap();
    assert_eq!(queue.len().unwrap(), 1);
}

// ============================================================================
// LISTENER MESH
// ============================================================================

#[tokio::test]
async fn test_engine_accepts_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let cx = context(dir.path(), Arc::new(ScriptedGateway::new(Vec::new())));
    let config = DeceptionConfig {
        bind_addr: "127.0.0.1".to_string(),
        listeners: vec![ListenerConfig { port: 0, protocol: Some(MirrorProtocol::Banner) }],
        model_timeout_secs: 5,
    };

    let engine = MirrorEngine::bind(&config, cx).await.unwrap();
    let addr = engine.local_addrs()[0];
    let stop = StopFlag::new();
    let running = tokio::spawn(engine.run(stop.clone()));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut banner = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut banner))
        .await
        .unwrap()
        .unwrap();
    assert!(banner.starts_with("SSH-2.0"));

    stop.stop();
    tokio::time::timeout(WAIT, running).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_engine_requires_a_listener() {
    let dir = tempfile::tempdir().unwrap();
    let cx = context(dir.path(), Arc::new(ScriptedGateway::new(Vec::new())));
    let config = DeceptionConfig {
        bind_addr: "192.0.2.1".to_string(),
        listeners: vec![ListenerConfig { port: 0, protocol: None }],
        model_timeout_secs: 5,
    };

    assert!(MirrorEngine::bind(&config, cx).await.is_err());
}
