//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use resilient_http::http::HttpResponse;
use resilient_http::{ClientError, HttpRequest, ProxyAddr, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Start a mock backend that returns a fixed 200 response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { (200, response.to_string()) }).await
}

/// Start a mock backend whose status and body come from `f`, which is handed
/// the request line (e.g. `GET http://target/ HTTP/1.1`).
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let request_line = read_request_line(&mut socket).await;
                        let (status, body) = f(request_line).await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a raw TCP backend that answers every request with `reply`
/// verbatim. Returns its address and a counter of accepted connections.
pub async fn start_raw_backend(reply: &'static [u8]) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                read_request_line(&mut socket).await;
                let _ = socket.write_all(reply).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, connections)
}

/// Read the request head and return its first line.
async fn read_request_line(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// A reply the scripted transport hands out.
pub enum Reply {
    Status(u16),
    Body(u16, &'static str),
    Fail(fn(&HttpRequest) -> ClientError),
}

/// In-memory transport replaying a script, then repeating `fallback`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: u16,
    calls: AtomicUsize,
    proxies: Mutex<Vec<Option<String>>>,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl ScriptedTransport {
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Self::with_fallback(script, 200)
    }

    pub fn with_fallback(script: Vec<Reply>, fallback: u16) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            proxies: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Proxy used by each call, in order.
    pub fn proxies(&self) -> Vec<Option<String>> {
        self.proxies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &HttpRequest,
        proxy: Option<&ProxyAddr>,
        _timeout: Duration,
    ) -> Result<HttpResponse, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.proxies.lock().unwrap().push(proxy.map(|p| p.to_string()));

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Reply::Status(status)) => Ok(response(status, "")),
            Some(Reply::Body(status, body)) => Ok(response(status, body)),
            Some(Reply::Fail(make)) => Err(make(request)),
            None => Ok(response(self.fallback, "")),
        }
    }
}

fn response(status: u16, body: &'static str) -> HttpResponse {
    let mut response = HttpResponse::with_status(status);
    response.body = bytes::Bytes::from_static(body.as_bytes());
    response
}

/// A connection failure for `request`.
pub fn refused(request: &HttpRequest) -> ClientError {
    ClientError::Connect {
        url: request.url.to_string(),
        message: "connection refused".into(),
    }
}
