//! Outgoing requests and their per-call context.
//!
//! # Responsibilities
//! - Represent one outgoing request (method, URL, headers, body)
//! - Carry the per-request context shared by every plugin hook
//! - Generate the correlation ID propagated as `x-request-id`
//!
//! # Design Decisions
//! - Context is passed explicitly to each hook; there is no ambient state
//! - Metadata is a plain key/value map so user plugins can cooperate
//! - Plugin-private typed state lives in `extensions`

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::http::Extensions;
use hyper::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::http::error::ClientError;
use crate::proxy::ProxyAddr;

/// Header carrying the correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A single outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Overrides the configured per-attempt deadline.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    /// Parse `url` and build a request for it.
    pub fn parse(method: Method, url: &str) -> Result<Self, ClientError> {
        let url = Url::parse(url)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid URL {url}: {e}")))?;
        Ok(Self::new(method, url))
    }

    /// Add a header, replacing any previous value.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ClientError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidRequest(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Query parameters in URL order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Host name of the target, empty when the URL has none.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

/// State for one logical call, shared by every hook of that call.
#[derive(Debug)]
pub struct RequestContext {
    pub request: HttpRequest,
    /// Key/value data shared across hooks of this request.
    pub metadata: HashMap<String, Value>,
    /// Typed, plugin-private state.
    pub extensions: Extensions,
    /// Proxy chosen for this call, if any.
    pub proxy: Option<ProxyAddr>,
    /// Number of transport attempts made so far.
    pub attempt: u32,
    pub correlation_id: Uuid,
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(request: HttpRequest) -> Self {
        Self::with_cancellation(request, CancellationToken::new())
    }

    pub fn with_cancellation(mut request: HttpRequest, cancel: CancellationToken) -> Self {
        let correlation_id = match request
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
        {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
                    request.headers.insert(X_REQUEST_ID, value);
                }
                id
            }
        };

        Self {
            request,
            metadata: HashMap::new(),
            extensions: Extensions::new(),
            proxy: None,
            attempt: 0,
            correlation_id,
            cancel,
            started_at: Instant::now(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn url(&self) -> &Url {
        &self.request.url
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
