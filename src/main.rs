//! AI Defender - daemon entry point
//!
//! One binary, one daemon per subcommand. Each daemon runs as its own OS
//! process and coordinates with the others only through the stores.

mod constants;
mod logic;

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tokio::runtime::Runtime;

use logic::agent::{AgentRuntime, Guardian, Overseer, Sinkhole, Triager};
use logic::config::{ConfigError, ConfigHandle, DefenderConfig};
use logic::deception::{AdminCommand, HitRelay, MirrorContext, MirrorEngine, SessionError, SessionStore};
use logic::external_intel::{providers_from_env, IpApiLocator};
use logic::gateway::{HttpGateway, ModelGateway};
use logic::pipeline::{self, collector, worker, Collector, Worker};
use logic::response::{ActionError, AlertDispatcher, Enforcer, Notifier, PfTable, SystemServices};
use logic::shutdown::{spawn_signal_watcher, StopFlag};
use logic::store::{Blocklist, EventLog, LockError, PidLock, StoreError};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "ai-defender", version, about = "Autonomous firewall defense daemons")]
struct Cli {
    /// Configuration file (defaults to $AI_DEFENDER_CONFIG, then /usr/local/etc/ai_defender.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tail log sources and queue candidate threats
    Collector,
    /// Score queued threats and manage the blocklist
    Worker,
    /// Run one detection agent
    Agent {
        #[arg(value_enum)]
        name: AgentKind,
    },
    /// Run the deception listener mesh
    Mirrors,
    /// Remove a source from the blocklist and the pf table
    Unblock { ip: String },
    /// Show blocklist entries, or whether one source is blocked
    Blocklist { ip: Option<String> },
    /// Show the newest audit events
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List live deception sessions
    Sessions,
    /// Send an operator command to a live session
    SessionCmd { id: String, command: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AgentKind {
    Triager,
    Guardian,
    Sinkhole,
    Overseer,
}

impl AgentKind {
    fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Triager => "triager",
            AgentKind::Guardian => "guardian",
            AgentKind::Sinkhole => "sinkhole",
            AgentKind::Overseer => "overseer",
        }
    }
}

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("runtime error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// MAIN
// ============================================================================

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(constants::get_config_path()));

    let result = ConfigHandle::open(config_path)
        .map(Arc::new)
        .map_err(StartupError::from)
        .and_then(|config| dispatch(cli.command, config));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(command: Command, config: Arc<ConfigHandle>) -> Result<(), StartupError> {
    match command {
        Command::Collector => run_collector(&config),
        Command::Worker => run_worker(config),
        Command::Agent { name } => run_agent(name, config),
        Command::Mirrors => run_mirrors(&config),
        Command::Unblock { ip } => unblock(&config.snapshot(), &ip),
        Command::Blocklist { ip } => {
            show_blocklist(&config.snapshot(), ip.as_deref());
            Ok(())
        }
        Command::Events { limit } => {
            show_events(&config.snapshot(), limit);
            Ok(())
        }
        Command::Sessions => {
            list_sessions(&config.snapshot());
            Ok(())
        }
        Command::SessionCmd { id, command } => {
            let command: AdminCommand = command.parse()?;
            SessionStore::new(config.snapshot().paths.sessions_dir()).send_command(&id, command)?;
            println!("Sent {} to session {}", command.as_str(), id);
            Ok(())
        }
    }
}

// ============================================================================
// SHARED WIRING
// ============================================================================

fn runtime() -> Result<Runtime, StartupError> {
    Ok(Runtime::new()?)
}

/// Stop flag raised by SIGINT/SIGTERM
fn install_signals(rt: &Runtime) -> StopFlag {
    let stop = StopFlag::new();
    let _guard = rt.enter();
    spawn_signal_watcher(stop.clone());
    stop
}

fn model_gateway(config: &DefenderConfig) -> Arc<dyn ModelGateway> {
    Arc::new(HttpGateway::from_config(&config.model, constants::get_model_api_key()))
}

fn enforcer(config: &DefenderConfig) -> Arc<dyn Enforcer> {
    let table = PfTable::from_config(&config.enforcement);
    if let Err(e) = table.ensure_table() {
        log::warn!("pf table {} unavailable: {}", config.enforcement.table, e);
    }
    Arc::new(table)
}

fn notifier(config: &DefenderConfig) -> Arc<dyn Notifier> {
    Arc::new(AlertDispatcher::from_config(&config.notify))
}

// ============================================================================
// DAEMONS
// ============================================================================

fn run_collector(config: &ConfigHandle) -> Result<(), StartupError> {
    let snapshot = config.snapshot();
    let _lock = PidLock::acquire(&snapshot.paths.lock_file("collector"))?;
    log::info!("{} v{} - collector", constants::APP_NAME, constants::APP_VERSION);

    let rt = runtime()?;
    let stop = install_signals(&rt);

    let sources = collector::discover_sources(
        &snapshot.monitor.log_sources,
        &stop,
        collector::DISCOVERY_RETRY,
    );
    if sources.is_empty() {
        log::warn!("[Collector] No log sources to monitor, exiting");
        return Ok(());
    }

    let queue = pipeline::open_queue(&snapshot.paths.queue_db())?;
    Collector::new(sources, queue, &snapshot.monitor).run(&stop);
    Ok(())
}

fn run_worker(config: Arc<ConfigHandle>) -> Result<(), StartupError> {
    let snapshot = config.snapshot();
    let _lock = PidLock::acquire(&snapshot.paths.lock_file("worker"))?;
    log::info!("{} v{} - worker", constants::APP_NAME, constants::APP_VERSION);

    let queue = pipeline::open_queue(&snapshot.paths.queue_db())?;
    let rt = runtime()?;
    let stop = install_signals(&rt);

    let intel = if snapshot.enrichment.enable {
        providers_from_env(Duration::from_secs(snapshot.enrichment.timeout_secs.max(1)))
    } else {
        Vec::new()
    };
    log::info!("[Worker] {} enrichment provider(s) active", intel.len());

    let mut worker = Worker::new(
        queue,
        model_gateway(&snapshot),
        enforcer(&snapshot),
        notifier(&snapshot),
        config,
    )
    .with_intel(intel);

    worker.run(&stop);
    Ok(())
}

fn run_agent(kind: AgentKind, config: Arc<ConfigHandle>) -> Result<(), StartupError> {
    let snapshot = config.snapshot();
    let _lock = PidLock::acquire(&snapshot.paths.lock_file(&format!("agent_{}", kind.as_str())))?;
    log::info!("{} v{} - agent {}", constants::APP_NAME, constants::APP_VERSION, kind.as_str());

    let rt = runtime()?;
    let stop = install_signals(&rt);

    let gateway = model_gateway(&snapshot);
    let memory_dir = snapshot.paths.memory_dir();
    let events = Arc::new(EventLog::new(snapshot.paths.event_log()));

    match kind {
        AgentKind::Triager => {
            let agent = Triager::new(enforcer(&snapshot), events);
            AgentRuntime::new(agent, &memory_dir, gateway, config).run_forever(&stop);
        }
        AgentKind::Guardian => {
            let agent = Guardian::new(Arc::new(SystemServices), notifier(&snapshot));
            AgentRuntime::new(agent, &memory_dir, gateway, config).run_forever(&stop);
        }
        AgentKind::Sinkhole => {
            let agent = Sinkhole::new(Arc::new(SystemServices));
            AgentRuntime::new(agent, &memory_dir, gateway, config).run_forever(&stop);
        }
        AgentKind::Overseer => {
            let locator = Arc::new(IpApiLocator::new(Duration::from_secs(3)));
            let agent = Overseer::new(locator, enforcer(&snapshot), events, notifier(&snapshot));
            AgentRuntime::new(agent, &memory_dir, gateway, config).run_forever(&stop);
        }
    }
    Ok(())
}

fn run_mirrors(config: &ConfigHandle) -> Result<(), StartupError> {
    let snapshot = config.snapshot();
    let _lock = PidLock::acquire(&snapshot.paths.lock_file("mirrors"))?;
    log::info!("{} v{} - mirrors", constants::APP_NAME, constants::APP_VERSION);

    let cx = Arc::new(MirrorContext::new(
        model_gateway(&snapshot),
        Duration::from_secs(snapshot.deception.model_timeout_secs.max(1)),
        SessionStore::new(snapshot.paths.sessions_dir()),
        HitRelay::new(snapshot.paths.queue_db(), EventLog::new(snapshot.paths.event_log())),
    ));

    let rt = runtime()?;
    let stop = StopFlag::new();
    let result = rt.block_on(async {
        spawn_signal_watcher(stop.clone());
        let engine = MirrorEngine::bind(&snapshot.deception, cx).await?;
        engine.run(stop).await;
        Ok::<(), StartupError>(())
    });

    // Sessions still stalling a peer are abandoned here
    rt.shutdown_timeout(Duration::from_secs(5));
    result
}

// ============================================================================
// OPERATOR COMMANDS
// ============================================================================

fn unblock(config: &DefenderConfig, ip: &str) -> Result<(), StartupError> {
    if ip.parse::<IpAddr>().is_err() {
        return Err(ActionError::InvalidTarget(ip.to_string()).into());
    }

    let removed = worker::unblock_ip(
        &Blocklist::new(config.paths.blocklist()),
        &PfTable::from_config(&config.enforcement),
        &EventLog::new(config.paths.event_log()),
        ip,
    )?;

    if removed {
        println!("Unblocked {}", ip);
    } else {
        println!("{} had no blocklist entry; pf table entry cleared", ip);
    }
    Ok(())
}

fn show_blocklist(config: &DefenderConfig, ip: Option<&str>) {
    let blocklist = Blocklist::new(config.paths.blocklist());

    if let Some(ip) = ip {
        let state = if blocklist.is_blocked(ip) { "blocked" } else { "not blocked" };
        println!("{} {}", ip, state);
        return;
    }

    let entries = blocklist.load();
    if entries.is_empty() {
        println!("Blocklist is empty");
        return;
    }

    let now = Utc::now().timestamp();
    for entry in entries {
        println!(
            "{}  expires in {}s  {}",
            entry.ip,
            (entry.expire_ts - now).max(0),
            entry.reason
        );
    }
}

fn show_events(config: &DefenderConfig, limit: usize) {
    for event in EventLog::new(config.paths.event_log()).read_recent(limit) {
        let when = chrono::DateTime::from_timestamp(event.timestamp, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| event.timestamp.to_string());
        println!(
            "{}  {:<12} {:<16} {}",
            when,
            event.kind.as_str(),
            event.ip,
            event.reason
        );
    }
}

fn list_sessions(config: &DefenderConfig) {
    let sessions = SessionStore::new(config.paths.sessions_dir()).list();
    if sessions.is_empty() {
        println!("No live sessions");
        return;
    }

    let now = Utc::now().timestamp();
    for (id, record) in sessions {
        println!(
            "{}  {}:{}  {}  {}s",
            id,
            record.ip,
            record.port,
            record.persona,
            now - record.start
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspection_subcommands_parse() {
        let cli = Cli::try_parse_from(["ai-defender", "blocklist", "203.0.113.9"]).unwrap();
        assert!(matches!(cli.command, Command::Blocklist { ip: Some(ref ip) } if ip == "203.0.113.9"));

        let cli = Cli::try_parse_from(["ai-defender", "blocklist"]).unwrap();
        assert!(matches!(cli.command, Command::Blocklist { ip: None }));

        let cli = Cli::try_parse_from(["ai-defender", "events", "--limit", "5"]).unwrap();
        assert!(matches!(cli.command, Command::Events { limit: 5 }));

        let cli = Cli::try_parse_from(["ai-defender", "--config", "/tmp/d.json", "events"]).unwrap();
        assert!(matches!(cli.command, Command::Events { limit: 20 }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/d.json")));
    }

    #[test]
    fn test_inspection_reads_stores() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DefenderConfig::default();
        config.paths.state_dir = dir.path().to_path_buf();

        let blocklist = Blocklist::new(config.paths.blocklist());
        blocklist.upsert("198.51.100.4", "scan", Utc::now(), 1).unwrap();
        assert!(blocklist.is_blocked("198.51.100.4"));

        // Both print and must not fail on present or missing files
        show_blocklist(&config, None);
        show_blocklist(&config, Some("198.51.100.4"));
        show_events(&config, 10);
    }
}
