//! Resilient HTTP client with a plugin execution engine.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller
//!       │
//!       ▼
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │ http::Client                                                 │
//!  │   PluginPipeline (plugins)                                   │
//!  │     logging → auth → user_agent → rate_limit → cache         │
//!  │       → circuit_breaker → proxy → custom → monitoring        │
//!  │                    │                                         │
//!  │                    ▼                                         │
//!  │   RetryController + BackoffPolicy (resilience)               │
//!  │                    │                                         │
//!  │                    ▼                                         │
//!  │   Transport (hyper, direct or through a pooled proxy)        │
//!  └──────────────────────────────────────────────────────────────┘
//!
//!  Cross-cutting: config, observability, security, lifecycle, health
//! ```
//!
//! # Example
//!
//! ```no_run
//! use resilient_http::{Client, ClientConfig};
//!
//! # async fn run() -> Result<(), resilient_http::ClientError> {
//! let client = Client::new(ClientConfig::default())?;
//! let response = client.get("http://example.com/").await?;
//! println!("{}", response.status);
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod plugins;
pub mod proxy;
pub mod resilience;
pub mod security;

pub use config::ClientConfig;
pub use http::{
    BlockingClient, Client, ClientBuilder, ClientError, ClientResult, ErrorClass, ErrorKind, HttpRequest,
    HttpResponse, RequestContext, Transport,
};
pub use lifecycle::Shutdown;
pub use observability::HealthReport;
pub use plugins::{AuthPlugin, ErrorAction, Plugin, PluginKind, PluginPipeline, UserAgentPlugin};
pub use proxy::{ProxyAddr, ProxyPool};
