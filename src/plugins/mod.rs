//! Plugin subsystem.
//!
//! # Data Flow
//! ```text
//! pipeline.rs run(ctx):
//!     before_request, ascending priority
//!         logging → auth → user_agent → rate_limit → cache
//!             → circuit_breaker → proxy → custom
//!         first response short-circuits; control-flow errors abort
//!     dispatch (retry loop + transport), unless short-circuited
//!     after_response / on_error, same order, once per plugin
//!     → final response or error
//! ```
//!
//! # Design Decisions
//! - Built-in plugins are enum variants; user plugins go in `Custom`
//! - Plugins never see each other; they share data through the context
//! - A failing hook of a non-critical plugin is logged and skipped

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::http::error::ClientError;
use crate::http::request::RequestContext;
use crate::http::response::HttpResponse;

pub mod auth;
pub mod cache;
pub mod circuit_breaker;
pub mod logging;
pub mod monitoring;
pub mod pipeline;
pub mod proxy;
pub mod rate_limit;
pub mod user_agent;

pub use self::auth::AuthPlugin;
pub use self::cache::CachePlugin;
pub use self::circuit_breaker::CircuitBreakerPlugin;
pub use self::logging::LoggingPlugin;
pub use self::monitoring::{MonitoringPlugin, MonitoringStats};
pub use self::pipeline::{Dispatch, PluginPipeline, RegisteredPlugin};
pub use self::proxy::ProxyPoolPlugin;
pub use self::rate_limit::RateLimitPlugin;
pub use self::user_agent::UserAgentPlugin;

/// Default priorities of the built-in plugins. Lower runs first.
pub mod priority {
    pub const LOGGING: i32 = 0;
    pub const AUTH: i32 = 5;
    pub const USER_AGENT: i32 = 6;
    pub const RATE_LIMIT: i32 = 10;
    pub const CACHE: i32 = 20;
    pub const CIRCUIT_BREAKER: i32 = 30;
    pub const PROXY_POOL: i32 = 40;
    pub const CUSTOM: i32 = 50;
    pub const MONITORING: i32 = 90;
}

/// What an `on_error` hook wants done with the error.
#[derive(Debug)]
pub enum ErrorAction {
    /// Keep the error.
    Propagate,
    /// Replace the error with this response.
    Recover(HttpResponse),
}

/// Hooks around one logical request.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Critical plugins' hook failures abort the request instead of being skipped.
    fn is_critical(&self) -> bool {
        false
    }

    /// Runs before dispatch. Returning a response short-circuits the rest.
    async fn before_request(&self, _ctx: &mut RequestContext) -> Result<Option<HttpResponse>, ClientError> {
        Ok(None)
    }

    /// Runs over the final (or short-circuited) response; may replace it.
    async fn after_response(
        &self,
        _ctx: &mut RequestContext,
        _response: &mut HttpResponse,
    ) -> Result<(), ClientError> {
        Ok(())
    }

    /// Runs over an error from dispatch or an earlier hook.
    async fn on_error(&self, _ctx: &mut RequestContext, _error: &ClientError) -> Result<ErrorAction, ClientError> {
        Ok(ErrorAction::Propagate)
    }
}

/// Closed set of plugin variants held by the pipeline.
#[derive(Clone)]
pub enum PluginKind {
    Auth(Arc<AuthPlugin>),
    UserAgent(Arc<UserAgentPlugin>),
    RateLimit(Arc<RateLimitPlugin>),
    Cache(Arc<CachePlugin>),
    CircuitBreaker(Arc<CircuitBreakerPlugin>),
    ProxyPool(Arc<ProxyPoolPlugin>),
    Logging(Arc<LoggingPlugin>),
    Monitoring(Arc<MonitoringPlugin>),
    Custom(Arc<dyn Plugin>),
}

impl fmt::Debug for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PluginKind").field(&self.name()).finish()
    }
}

impl PluginKind {
    pub fn custom(plugin: impl Plugin + 'static) -> Self {
        PluginKind::Custom(Arc::new(plugin))
    }

    fn as_plugin(&self) -> &dyn Plugin {
        match self {
            PluginKind::Auth(p) => p.as_ref(),
            PluginKind::UserAgent(p) => p.as_ref(),
            PluginKind::RateLimit(p) => p.as_ref(),
            PluginKind::Cache(p) => p.as_ref(),
            PluginKind::CircuitBreaker(p) => p.as_ref(),
            PluginKind::ProxyPool(p) => p.as_ref(),
            PluginKind::Logging(p) => p.as_ref(),
            PluginKind::Monitoring(p) => p.as_ref(),
            PluginKind::Custom(p) => p.as_ref(),
        }
    }

    pub fn name(&self) -> &str {
        self.as_plugin().name()
    }

    pub fn is_critical(&self) -> bool {
        self.as_plugin().is_critical()
    }

    pub fn default_priority(&self) -> i32 {
        match self {
            PluginKind::Logging(_) => priority::LOGGING,
            PluginKind::Auth(_) => priority::AUTH,
            PluginKind::UserAgent(_) => priority::USER_AGENT,
            PluginKind::RateLimit(_) => priority::RATE_LIMIT,
            PluginKind::Cache(_) => priority::CACHE,
            PluginKind::CircuitBreaker(_) => priority::CIRCUIT_BREAKER,
            PluginKind::ProxyPool(_) => priority::PROXY_POOL,
            PluginKind::Custom(_) => priority::CUSTOM,
            PluginKind::Monitoring(_) => priority::MONITORING,
        }
    }

    /// Identity by allocation, not by value.
    pub fn same_instance(&self, other: &PluginKind) -> bool {
        let this = self.as_plugin() as *const dyn Plugin as *const ();
        let that = other.as_plugin() as *const dyn Plugin as *const ();
        std::ptr::eq(this, that)
    }

    pub(crate) async fn before_request(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<Option<HttpResponse>, ClientError> {
        match self {
            PluginKind::Auth(p) => p.before_request(ctx).await,
            PluginKind::UserAgent(p) => p.before_request(ctx).await,
            PluginKind::RateLimit(p) => p.before_request(ctx).await,
            PluginKind::Cache(p) => p.before_request(ctx).await,
            PluginKind::CircuitBreaker(p) => p.before_request(ctx).await,
            PluginKind::ProxyPool(p) => p.before_request(ctx).await,
            PluginKind::Logging(p) => p.before_request(ctx).await,
            PluginKind::Monitoring(p) => p.before_request(ctx).await,
            PluginKind::Custom(p) => p.before_request(ctx).await,
        }
    }

    pub(crate) async fn after_response(
        &self,
        ctx: &mut RequestContext,
        response: &mut HttpResponse,
    ) -> Result<(), ClientError> {
        match self {
            PluginKind::Auth(p) => p.after_response(ctx, response).await,
            PluginKind::UserAgent(p) => p.after_response(ctx, response).await,
            PluginKind::RateLimit(p) => p.after_response(ctx, response).await,
            PluginKind::Cache(p) => p.after_response(ctx, response).await,
            PluginKind::CircuitBreaker(p) => p.after_response(ctx, response).await,
            PluginKind::ProxyPool(p) => p.after_response(ctx, response).await,
            PluginKind::Logging(p) => p.after_response(ctx, response).await,
            PluginKind::Monitoring(p) => p.after_response(ctx, response).await,
            PluginKind::Custom(p) => p.after_response(ctx, response).await,
        }
    }

    pub(crate) async fn on_error(
        &self,
        ctx: &mut RequestContext,
        error: &ClientError,
    ) -> Result<ErrorAction, ClientError> {
        match self {
            PluginKind::Auth(p) => p.on_error(ctx, error).await,
            PluginKind::UserAgent(p) => p.on_error(ctx, error).await,
            PluginKind::RateLimit(p) => p.on_error(ctx, error).await,
            PluginKind::Cache(p) => p.on_error(ctx, error).await,
            PluginKind::CircuitBreaker(p) => p.on_error(ctx, error).await,
            PluginKind::ProxyPool(p) => p.on_error(ctx, error).await,
            PluginKind::Logging(p) => p.on_error(ctx, error).await,
            PluginKind::Monitoring(p) => p.on_error(ctx, error).await,
            PluginKind::Custom(p) => p.on_error(ctx, error).await,
        }
    }
}

impl From<Arc<dyn Plugin>> for PluginKind {
    fn from(plugin: Arc<dyn Plugin>) -> Self {
        PluginKind::Custom(plugin)
    }
}
