//! Network transport.
//!
//! # Responsibilities
//! - Send one request attempt and buffer the response
//! - Forward through an HTTP proxy using absolute-form request targets
//! - Map connection, DNS and proxy failures into the error taxonomy
//!
//! # Design Decisions
//! - The core only sees the [`Transport`] trait; tests plug in scripted ones
//! - Direct requests share one pooled hyper-util client
//! - Proxied requests open a dedicated HTTP/1.1 connection to the proxy
//! - Every attempt is bounded by a deadline and a response size limit

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, HOST, PROXY_AUTHORIZATION};
use hyper::{Request, Response, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};
use tokio::net::TcpStream;

use crate::config::ClientConfig;
use crate::http::error::{is_malformed_message, ClientError};
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::proxy::ProxyAddr;
use crate::resilience::timeouts::with_deadline;
use crate::security::limits::{check_content_length, collect_limited};

/// Sends single request attempts over the network.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send `request`, through `proxy` when given, within `timeout`.
    async fn send(
        &self,
        request: &HttpRequest,
        proxy: Option<&ProxyAddr>,
        timeout: Duration,
    ) -> Result<HttpResponse, ClientError>;

    /// Release pooled connections.
    async fn close(&self) {}
}

/// Default transport built on hyper and hyper-util. Speaks plain HTTP.
pub struct HyperTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    max_response_size: usize,
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport")
            .field("max_response_size", &self.max_response_size)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    pub fn new(config: &ClientConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeouts.connect()));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.timeouts.idle())
            .build(connector);

        Self {
            client,
            max_response_size: config.limits.max_response_size,
        }
    }

    fn build_request(request: &HttpRequest) -> Result<Request<Full<Bytes>>, ClientError> {
        let uri: Uri = request
            .url
            .as_str()
            .parse()
            .map_err(|e| ClientError::InvalidRequest(format!("invalid URI {}: {e}", request.url)))?;

        let mut builder = Request::builder().method(request.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))
    }

    async fn send_direct(&self, request: &HttpRequest) -> Result<HttpResponse, ClientError> {
        let url = request.url.as_str();
        let req = Self::build_request(request)?;
        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| map_client_error(e, request))?;
        self.read_response(response, url).await
    }

    async fn send_via_proxy(
        &self,
        request: &HttpRequest,
        proxy: &ProxyAddr,
    ) -> Result<HttpResponse, ClientError> {
        let proxy_error = |message: String| ClientError::Proxy {
            proxy: proxy.to_string(),
            message,
        };
        if proxy.scheme != "http" {
            return Err(proxy_error(format!("unsupported proxy scheme {}", proxy.scheme)));
        }

        let stream = TcpStream::connect(proxy.authority())
            .await
            .map_err(|e| proxy_error(format!("connect failed: {e}")))?;
        let _ = stream.set_nodelay(true);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| proxy_error(format!("handshake failed: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "Proxy connection closed with error");
            }
        });

        // Absolute-form target; the proxy needs Host and credentials.
        let mut req = Self::build_request(request)?;
        if !req.headers().contains_key(HOST) {
            let host = match request.url.port() {
                Some(port) => format!("{}:{port}", request.host()),
                None => request.host().to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&host) {
                req.headers_mut().insert(HOST, value);
            }
        }
        if let Some(auth) = proxy.basic_auth() {
            if let Ok(value) = HeaderValue::from_str(&auth) {
                req.headers_mut().insert(PROXY_AUTHORIZATION, value);
            }
        }

        let response = sender.send_request(req).await.map_err(|e| {
            if e.is_parse() || e.is_parse_status() {
                ClientError::InvalidResponse {
                    url: request.url.to_string(),
                    message: e.to_string(),
                }
            } else {
                proxy_error(format!("request failed: {e}"))
            }
        })?;
        self.read_response(response, request.url.as_str()).await
    }

    async fn read_response(
        &self,
        response: Response<Incoming>,
        url: &str,
    ) -> Result<HttpResponse, ClientError> {
        let (parts, body) = response.into_parts();
        check_content_length(&parts.headers, self.max_response_size, url)?;
        let body = collect_limited(body, self.max_response_size, url).await?;
        Ok(HttpResponse::new(parts.status, parts.headers, body))
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(
        &self,
        request: &HttpRequest,
        proxy: Option<&ProxyAddr>,
        timeout: Duration,
    ) -> Result<HttpResponse, ClientError> {
        let scheme = request.url.scheme();
        if scheme != "http" {
            return Err(ClientError::UnsupportedScheme(scheme.to_string()));
        }

        let url = request.url.as_str();
        match proxy {
            Some(proxy) => with_deadline(timeout, url, self.send_via_proxy(request, proxy)).await,
            None => with_deadline(timeout, url, self.send_direct(request)).await,
        }
    }

    async fn close(&self) {
        tracing::debug!("HTTP transport closed");
    }
}

/// Map a pooled-client error. Resolution failures become [`ClientError::Dns`],
/// unparseable responses [`ClientError::InvalidResponse`].
fn map_client_error(error: hyper_util::client::legacy::Error, request: &HttpRequest) -> ClientError {
    let mut chain = Vec::new();
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&error);
    while let Some(e) = source {
        chain.push(e.to_string());
        source = e.source();
    }
    let message = chain.join(": ");

    if !error.is_connect() && is_malformed_message(&error) {
        return ClientError::InvalidResponse {
            url: request.url.to_string(),
            message,
        };
    }

    let lower = message.to_ascii_lowercase();
    if error.is_connect() && (lower.contains("dns") || lower.contains("lookup") || lower.contains("resolve")) {
        return ClientError::Dns {
            host: request.host().to_string(),
            message,
        };
    }
    ClientError::Connect {
        url: request.url.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;

    #[tokio::test]
    async fn test_rejects_https() {
        let transport = HyperTransport::new(&ClientConfig::default());
        let request = HttpRequest::parse(Method::GET, "https://example.com/").unwrap();
        let err = transport
            .send(&request, None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedScheme(s) if s == "https"));
    }

    #[tokio::test]
    async fn test_rejects_socks_proxy() {
        let transport = HyperTransport::new(&ClientConfig::default());
        let request = HttpRequest::parse(Method::GET, "http://example.com/").unwrap();
        let proxy: ProxyAddr = "socks5://127.0.0.1:1080".parse().unwrap();
        let err = transport
            .send(&request, Some(&proxy), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Proxy { .. }));
    }
}
