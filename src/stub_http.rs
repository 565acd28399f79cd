//! Scripted HTTP server for tests: answers one request per scripted response,
//! in order, and hands back the raw requests it received.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub struct StubResponse {
    pub status: &'static str,
    pub content_type: &'static str,
    pub body: String,
}

impl StubResponse {
    pub fn json(status: &'static str, body: impl Into<String>) -> Self {
        Self { status, content_type: "application/json", body: body.into() }
    }

    pub fn event_stream(body: impl Into<String>) -> Self {
        Self { status: "200 OK", content_type: "text/event-stream", body: body.into() }
    }
}

pub struct StubServer {
    listener: TcpListener,
    pub base_url: String,
}

impl StubServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        Self { listener, base_url }
    }

    /// Serve `responses` one connection at a time.
    pub fn serve(self, responses: Vec<StubResponse>) -> JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let (mut stream, _) = self.listener.accept().await.unwrap();
                requests.push(read_request(&mut stream).await);
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    response.status,
                    response.content_type,
                    response.body.len()
                );
                stream.write_all(head.as_bytes()).await.unwrap();
                stream.write_all(response.body.as_bytes()).await.unwrap();
                let _ = stream.shutdown().await;
            }
            requests
        })
    }
}

/// Body of a raw request, after the blank line.
pub fn request_body(request: &str) -> &str {
    request.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&received);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|l| {
                    l.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                })
                .unwrap_or(0);
            if received.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&received).to_string()
}
