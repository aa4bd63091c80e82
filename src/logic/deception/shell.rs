//! Shell-like mirror
//!
//! Fake login that accepts anything, then a command loop. The operator
//! command channel is polled before every read and again whenever the
//! peer stays quiet for a poll interval.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Local;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::tarpit::{self, Artifact, XML_BOMB};
use super::{AdminCommand, MirrorContext, Persona, Session, SessionEnd};

const PROMPT: &str = "$ ";
const IO_ERROR: &str = "Error: I/O Interrupt\r\n$ ";
const READ_CHUNK: usize = 1024;
const COMMAND_POLL: Duration = Duration::from_secs(1);

enum Step {
    Input(String),
    Admin(AdminCommand),
    Closed,
}

/// Commands in one chunk of peer input. A bare line break is one empty command.
fn split_commands(bytes: &[u8]) -> VecDeque<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut commands: VecDeque<String> = text
        .split(|c: char| c == '\r' || c == '\n')
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() || c.is_control()))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if commands.is_empty() {
        commands.push_back(String::new());
    }
    commands
}

/// Next peer command or operator command. Commands left over from a
/// multi-line chunk are served from `pending` before reading again.
async fn next_step<S>(stream: &mut S, session: &Session, pending: &mut VecDeque<String>) -> Step
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK];
    loop {
        if let Some(cmd) = session.take_command() {
            return Step::Admin(cmd);
        }
        if let Some(command) = pending.pop_front() {
            return Step::Input(command);
        }

        match tokio::time::timeout(COMMAND_POLL, stream.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) | Ok(Err(_)) => return Step::Closed,
            Ok(Ok(n)) => *pending = split_commands(&buf[..n]),
        }
    }
}

/// `Some(end)` when the command ends the session
async fn apply_admin<S>(stream: &mut S, session: &Session, cmd: AdminCommand) -> Option<SessionEnd>
where
    S: AsyncWrite + Unpin,
{
    match cmd {
        AdminCommand::NuclearFlood => {
            log::warn!("[Mirrors] Nuclear flood on session {}", session.id());
            let sent = tarpit::random_flood(stream).await;
            log::info!("[Mirrors] Session {} flooded with {} bytes", session.id(), sent);
            Some(SessionEnd::Flooded)
        }
        AdminCommand::Terminate => Some(SessionEnd::Terminated),
        AdminCommand::AllowLogin => {
            log::info!("[Mirrors] Session {}: allow-login acknowledged", session.id());
            None
        }
    }
}

fn shell_prompt(persona: &Persona, cwd: &str) -> String {
    format!(
        "You are a shell simulator. Persona: {} Current directory: {}. \
         Return ONLY the raw output of the command, no markdown. \
         Any directory listing MUST include the files wallet.dat, network_topology.json, config.xml and id_rsa. \
         Deep directories contain random subfolders.",
        persona.prompt, cwd
    )
}

/// Cosmetic working directory; every path exists
fn change_dir(cwd: &mut String, command: &str) {
    let Some(target) = command.split_whitespace().nth(1) else {
        return;
    };

    if target == ".." {
        if let Some(pos) = cwd.rfind('/') {
            cwd.truncate(pos.max(1));
        }
    } else if target.starts_with('/') {
        *cwd = target.to_string();
    } else {
        *cwd = format!("{}/{}", cwd.trim_end_matches('/'), target);
    }
}

fn login_name(raw: &str) -> String {
    let name: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(32)
        .collect();
    if name.is_empty() { "root".to_string() } else { name }
}

pub async fn serve_shell<S>(
    stream: &mut S,
    persona: &Persona,
    session: &mut Session,
    cx: &MirrorContext,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if stream.write_all(b"Connected to System.\r\nlogin: ").await.is_err() {
        return SessionEnd::PeerClosed;
    }

    // Login and password: anything is accepted
    let mut pending = VecDeque::new();
    let mut user = String::new();
    for (i, next_prompt) in ["Password: ", ""].iter().enumerate() {
        match next_step(stream, session, &mut pending).await {
            Step::Input(text) => {
                if i == 0 {
                    user = login_name(&text);
                }
            }
            Step::Admin(cmd) => {
                if let Some(end) = apply_admin(stream, session, cmd).await {
                    return end;
                }
            }
            Step::Closed => return SessionEnd::PeerClosed,
        }
        if !next_prompt.is_empty() && stream.write_all(next_prompt.as_bytes()).await.is_err() {
            return SessionEnd::PeerClosed;
        }
    }

    let welcome = format!(
        "\r\nAuthentication successful.\r\nLast login: {} from 10.0.0.5\r\n{}",
        Local::now().format("%a %b %d %H:%M:%S"),
        PROMPT
    );
    if stream.write_all(welcome.as_bytes()).await.is_err() {
        return SessionEnd::PeerClosed;
    }
    session.record_exchange(&format!("login {}", user), "Authentication successful.");

    let mut cwd = format!("/home/{}", user);

    loop {
        let command = match next_step(stream, session, &mut pending).await {
            Step::Input(text) => text,
            Step::Admin(cmd) => match apply_admin(stream, session, cmd).await {
                Some(end) => return end,
                None => continue,
            },
            Step::Closed => return SessionEnd::PeerClosed,
        };

        if command.is_empty() {
            if stream.write_all(PROMPT.as_bytes()).await.is_err() {
                return SessionEnd::PeerClosed;
            }
            continue;
        }

        if command == "exit" || command == "logout" {
            session.record_exchange(&command, "");
            return SessionEnd::Logout;
        }

        if command == "cd" || command.starts_with("cd ") {
            change_dir(&mut cwd, &command);
            session.record_exchange(&command, "");
            if stream.write_all(PROMPT.as_bytes()).await.is_err() {
                return SessionEnd::PeerClosed;
            }
            continue;
        }

        match Artifact::detect(&command) {
            Some(Artifact::Wallet) => {
                session.record_exchange(&command, "[null stream]");
                let sent = tarpit::null_stream(stream).await;
                log::info!("[Mirrors] Session {} swallowed {} null bytes", session.id(), sent);
                return SessionEnd::Tarpitted;
            }
            Some(Artifact::Topology) => {
                session.record_exchange(&command, "[topology stream]");
                let sent = tarpit::topology_stream(stream).await;
                log::info!("[Mirrors] Session {} swallowed {} topology bytes", session.id(), sent);
                return SessionEnd::Tarpitted;
            }
            Some(Artifact::Config) => {
                session.record_exchange(&command, "[entity expansion payload]");
                let reply = format!("{}\r\n{}", XML_BOMB.as_str(), PROMPT);
                if stream.write_all(reply.as_bytes()).await.is_err() {
                    return SessionEnd::PeerClosed;
                }
                continue;
            }
            None => {}
        }

        let reply = match cx.ask_model(vec![shell_prompt(persona, &cwd), command.clone()]).await {
            Some(output) => {
                session.record_exchange(&command, &output);
                format!("{}\r\n{}", output.trim_end(), PROMPT)
            }
            None => {
                session.record_exchange(&command, "Error: I/O Interrupt");
                IO_ERROR.to_string()
            }
        };

        if stream.write_all(reply.as_bytes()).await.is_err() {
            return SessionEnd::PeerClosed;
        }
    }
}
