//! Loopback redirect listener.
//!
//! The provider sends the browser back to the configured redirect URI with
//! `?code=...&state=...` (or `?error=...`). We accept connections until one of
//! them carries that answer; anything else the browser asks for (favicons,
//! prefetches) gets a 404 and is ignored.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;
use url::Url;

use super::AuthError;

const MAX_REQUEST_BYTES: usize = 8192;

/// Browsers open speculative connections that never send a request; those
/// must not hold up the accept loop.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Signed in</title>
<style>
  body { font-family: system-ui, sans-serif; display: flex; justify-content: center;
    align-items: center; min-height: 100vh; margin: 0; background: #111827; color: #e5e7eb; }
  .card { text-align: center; padding: 3rem; border-radius: 12px; background: #1f2937; max-width: 420px; }
  p { color: #9ca3af; }
</style></head>
<body><div class="card">
  <h1>&#x1F999; Signed in</h1>
  <p>You can close this tab and return to the terminal.</p>
</div></body></html>"#;

const ERROR_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Sign-in failed</title>
<style>
  body { font-family: system-ui, sans-serif; display: flex; justify-content: center;
    align-items: center; min-height: 100vh; margin: 0; background: #111827; color: #e5e7eb; }
  .card { text-align: center; padding: 3rem; border-radius: 12px; background: #1f2937; max-width: 420px; }
  p { color: #9ca3af; }
</style></head>
<body><div class="card">
  <h1>Sign-in failed</h1>
  <p>Return to the terminal and try again.</p>
</div></body></html>"#;

/// What the redirect carried
#[derive(Debug, Clone, PartialEq, Eq)]
enum Redirect {
    Code { code: String, state: Option<String> },
    Error(String),
    Unrelated,
}

pub struct CallbackListener {
    listener: TcpListener,
    path: String,
}

impl CallbackListener {
    /// Bind on the host and port of `redirect_uri`. `localhost` binds the IPv4
    /// loopback address.
    pub async fn bind(redirect_uri: &str) -> Result<Self, AuthError> {
        let url = Url::parse(redirect_uri)?;
        let host = match url.host_str() {
            Some("localhost") | None => "127.0.0.1",
            Some(host) => host,
        };
        let port = url.port_or_known_default().unwrap_or(80);
        let listener = TcpListener::bind((host, port)).await?;
        debug!("Callback listener bound on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            path: url.path().to_string(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AuthError> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the provider's redirect and return the authorization code.
    pub async fn wait_for_code(self, expected_state: &str, limit: Duration) -> Result<String, AuthError> {
        tokio::time::timeout(limit, self.accept_until_redirect(expected_state))
            .await
            .map_err(|_| AuthError::TimedOut)?
    }

    async fn accept_until_redirect(&self, expected_state: &str) -> Result<String, AuthError> {
        loop {
            let (mut stream, peer) = self.listener.accept().await?;
            let target = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut stream)).await {
                Ok(Ok(target)) => target,
                Ok(Err(e)) => {
                    debug!("Dropping unreadable request from {}: {}", peer, e);
                    continue;
                }
                Err(_) => {
                    debug!("Dropping idle connection from {}", peer);
                    continue;
                }
            };

            match parse_redirect(&target, &self.path) {
                Redirect::Unrelated => {
                    debug!("Ignoring request for {}", target);
                    let _ = respond(&mut stream, "404 Not Found", "").await;
                }
                Redirect::Error(error) => {
                    let _ = respond(&mut stream, "200 OK", ERROR_HTML).await;
                    return Err(AuthError::Denied(error));
                }
                Redirect::Code { code, state } => {
                    if state.as_deref() != Some(expected_state) {
                        let _ = respond(&mut stream, "200 OK", ERROR_HTML).await;
                        return Err(AuthError::StateMismatch);
                    }
                    let _ = respond(&mut stream, "200 OK", SUCCESS_HTML).await;
                    return Ok(code);
                }
            }
        }
    }
}

/// Read up to the end of the request head and return the request target of
/// the request line, e.g. `/?code=abc&state=xyz`.
async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buf);
    head.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed request line"))
}

fn parse_redirect(target: &str, expected_path: &str) -> Redirect {
    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        return Redirect::Unrelated;
    };
    if url.path() != expected_path {
        return Redirect::Unrelated;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (_, Some(error)) => Redirect::Error(error),
        (Some(code), None) if !code.is_empty() => Redirect::Code { code, state },
        _ => Redirect::Unrelated,
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
