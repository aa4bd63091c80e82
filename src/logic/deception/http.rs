//! HTTP-like mirror: the model fabricates the whole response

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{MirrorContext, Persona, Session, SessionEnd};

pub const FALLBACK_RESPONSE: &str = "HTTP/1.1 500 Internal Server Error\r\n\r\nServer overload.";

const READ_LIMIT: usize = 2048;
const REQUEST_WAIT: Duration = Duration::from_secs(30);

fn build_prompt(request: &str, persona: &Persona) -> String {
    format!(
        "User sent HTTP request:\n{}\n\nContext: {}\n\n\
         Generate the HTTP response (headers + body). Make it look authentic to the persona. \
         If they ask for login, give a login form.",
        request, persona.prompt
    )
}

pub async fn serve_http<S>(
    stream: &mut S,
    persona: &Persona,
    session: &mut Session,
    cx: &MirrorContext,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_LIMIT];
    let request = match tokio::time::timeout(REQUEST_WAIT, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => String::from_utf8_lossy(&buf[..n]).into_owned(),
        _ => return SessionEnd::PeerClosed,
    };

    let response = cx
        .ask_model(vec![build_prompt(&request, persona)])
        .await
        .unwrap_or_else(|| FALLBACK_RESPONSE.to_string());

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        log::debug!("[Mirrors] Session {} write failed: {}", session.id(), e);
        return SessionEnd::PeerClosed;
    }

    let request_line = request.lines().next().unwrap_or_default();
    session.record_exchange(request_line, &response);
    SessionEnd::Served
}
