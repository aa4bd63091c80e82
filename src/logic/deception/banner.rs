//! Lightweight banner honeypot: one static banner, then close

use tokio::io::{AsyncWrite, AsyncWriteExt};

const HTTP_BANNER: &str =
    "HTTP/1.1 200 OK\r\nServer: Apache/2.4.41 (Ubuntu)\r\n\r\n<html><body>It works!</body></html>";
const SSH_BANNER: &str = "SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.5\r\n";

pub fn banner_for(port: u16) -> &'static str {
    if port == 80 || port == 8080 {
        HTTP_BANNER
    } else {
        SSH_BANNER
    }
}

pub async fn serve_banner<W: AsyncWrite + Unpin>(writer: &mut W, port: u16) {
    if let Err(e) = writer.write_all(banner_for(port).as_bytes()).await {
        log::debug!("[Mirrors] Banner write on port {} failed: {}", port, e);
    }
}
