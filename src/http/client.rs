//! Resilient HTTP client.
//!
//! # Responsibilities
//! - Build the plugin pipeline from configuration
//! - Own the shared transport session, created on first use
//! - Resolve request URLs against `base_url` and apply default headers
//! - Turn error statuses into errors when configured
//!
//! # Data Flow
//! ```text
//! Client::send(request)
//!     → RequestContext (correlation id, cancellation token)
//!     → PluginPipeline::run
//!         → before hooks (auth, user agent, rate limit, cache, breaker, proxy)
//!         → Dispatcher: RetryController::execute → Transport::send per attempt
//!         → after / error hooks
//!     → error_for_status
//! ```
//!
//! # Design Decisions
//! - Cloning a client is cheap and shares every subsystem
//! - The transport is created lazily behind double-checked locking
//! - Closing is terminal; later requests fail with `Closed`

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Method;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::ResponseCache;
use crate::config::{validate_config, ClientConfig};
use crate::health::active::HealthMonitor;
use crate::http::error::ClientError;
use crate::http::request::{HttpRequest, RequestContext};
use crate::http::response::HttpResponse;
use crate::http::transport::{HyperTransport, Transport};
use crate::lifecycle::Shutdown;
use crate::observability::metrics::init_metrics;
use crate::observability::{HealthReport, SessionState};
use crate::plugins::{
    AuthPlugin, CachePlugin, CircuitBreakerPlugin, Dispatch, LoggingPlugin, MonitoringPlugin, MonitoringStats,
    Plugin, PluginKind, PluginPipeline, ProxyPoolPlugin, RateLimitPlugin, UserAgentPlugin,
};
use crate::proxy::{CheckSummary, HealthState, ProxyAddr, ProxyPool};
use crate::resilience::timeouts::attempt_deadline;
use crate::resilience::{BreakerRegistry, RetryController};
use crate::security::sanitize::sanitize_url;
use crate::security::RateLimiter;

type TransportFactory = Box<dyn Fn(&ClientConfig) -> Arc<dyn Transport> + Send + Sync>;

/// Builder for [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    factory: Option<TransportFactory>,
    plugins: Vec<(PluginKind, Option<i32>)>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            factory: None,
            plugins: Vec::new(),
        }
    }

    /// Use `transport` instead of the default hyper transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.factory = Some(Box::new(move |_| Arc::clone(&transport)));
        self
    }

    /// Create the transport with `factory` on first use.
    pub fn transport_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ClientConfig) -> Arc<dyn Transport> + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Register a user plugin at the custom priority.
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push((PluginKind::custom(plugin), None));
        self
    }

    pub fn plugin_with_priority(mut self, plugin: PluginKind, priority: i32) -> Self {
        self.plugins.push((plugin, Some(priority)));
        self
    }

    /// Validate the configuration and assemble the client.
    pub fn build(self) -> Result<Client, ClientError> {
        let config = self.config;
        validate_config(&config).map_err(ClientError::Config)?;

        let base_url = config
            .base_url
            .as_deref()
            .map(|base| {
                Url::parse(base).map_err(|e| ClientError::InvalidRequest(format!("invalid base_url {base}: {e}")))
            })
            .transpose()?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::InvalidRequest(format!("invalid default header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::InvalidRequest(format!("invalid value for {name}: {e}")))?;
            default_headers.append(name, value);
        }

        let pipeline = PluginPipeline::new();
        if config.observability.log_requests {
            pipeline.register_default(PluginKind::Logging(Arc::new(LoggingPlugin::new())));
        }
        if let Some(auth) = &config.auth {
            pipeline.register_default(PluginKind::Auth(Arc::new(AuthPlugin::new(auth.clone()))));
        }
        if config.user_agent.enabled {
            let rotation = UserAgentPlugin::new(&config.user_agent)?;
            pipeline.register_default(PluginKind::UserAgent(Arc::new(rotation)));
        }
        if config.rate_limit.enabled {
            let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
            pipeline.register_default(PluginKind::RateLimit(Arc::new(RateLimitPlugin::new(limiter))));
        }
        if config.cache.enabled {
            let cache = Arc::new(ResponseCache::new(config.cache.clone()));
            pipeline.register_default(PluginKind::Cache(Arc::new(CachePlugin::new(cache))));
        }
        if config.circuit_breaker.enabled {
            let registry = Arc::new(BreakerRegistry::new(config.circuit_breaker.clone()));
            pipeline.register_default(PluginKind::CircuitBreaker(Arc::new(CircuitBreakerPlugin::new(registry))));
        }
        if config.proxy_pool.enabled {
            let pool = Arc::new(ProxyPool::from_config(config.proxy_pool.clone())?);
            pipeline.register_default(PluginKind::ProxyPool(Arc::new(ProxyPoolPlugin::new(pool))));
        }
        if config.observability.metrics_enabled {
            pipeline.register_default(PluginKind::Monitoring(Arc::new(MonitoringPlugin::new())));
            if let Some(addr) = config.observability.metrics_address.as_deref() {
                match addr.parse() {
                    Ok(addr) => {
                        if let Err(e) = init_metrics(addr) {
                            tracing::warn!(error = %e, "Metrics exporter not installed");
                        }
                    }
                    Err(e) => tracing::warn!(address = %addr, error = %e, "Invalid metrics address"),
                }
            }
        }
        for (plugin, priority) in self.plugins {
            match priority {
                Some(priority) => pipeline.register(plugin, priority),
                None => pipeline.register_default(plugin),
            }
        }

        let factory = self.factory.unwrap_or_else(|| Box::new(default_transport));

        tracing::info!(plugins = ?pipeline.names(), "Client initialized");

        Ok(Client {
            inner: Arc::new(ClientInner {
                retry: RetryController::new(config.retries.clone()),
                config,
                base_url,
                default_headers,
                pipeline,
                session: RwLock::new(None),
                factory,
                closed: AtomicBool::new(false),
                shutdown: Shutdown::new(),
            }),
        })
    }
}

fn default_transport(config: &ClientConfig) -> Arc<dyn Transport> {
    Arc::new(HyperTransport::new(config))
}

/// HTTP client running every request through the plugin pipeline.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    base_url: Option<Url>,
    default_headers: HeaderMap,
    pipeline: PluginPipeline,
    retry: RetryController,
    session: RwLock<Option<Arc<dyn Transport>>>,
    factory: TransportFactory,
    closed: AtomicBool,
    shutdown: Shutdown,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url)
            .field("plugins", &self.inner.pipeline.names())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    /// The shared transport, created on first use.
    async fn transport(&self) -> Result<Arc<dyn Transport>, ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        if let Some(transport) = self.session.read().await.as_ref() {
            return Ok(Arc::clone(transport));
        }

        let mut session = self.session.write().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        if let Some(transport) = session.as_ref() {
            return Ok(Arc::clone(transport));
        }
        let transport = (self.factory)(&self.config);
        tracing::debug!(transport = ?transport, "Transport session created");
        *session = Some(Arc::clone(&transport));
        Ok(transport)
    }
}

/// Performs the network step of a request: retries around transport calls.
struct Dispatcher<'a> {
    inner: &'a ClientInner,
}

#[async_trait]
impl Dispatch for Dispatcher<'_> {
    async fn dispatch(&self, ctx: &mut RequestContext) -> Result<HttpResponse, ClientError> {
        let session = self.inner.transport().await?;
        let transport: &dyn Transport = session.as_ref();
        let request = &ctx.request;
        let proxy = ctx.proxy.as_ref();
        let deadline = attempt_deadline(request, &self.inner.config.timeouts);
        let request_id = ctx.correlation_id;

        let outcome = self
            .inner
            .retry
            .execute(&request.method, request.url.as_str(), &ctx.cancel, move |attempt| {
                tracing::debug!(request_id = %request_id, attempt, "Sending attempt");
                transport.send(request, proxy, deadline)
            })
            .await;

        ctx.attempt = outcome.attempts;
        outcome.result
    }
}

impl Client {
    /// Build a client with the default transport.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        ClientBuilder::new(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn pipeline(&self) -> &PluginPipeline {
        &self.inner.pipeline
    }

    pub fn register_plugin(&self, plugin: PluginKind, priority: i32) {
        self.inner.pipeline.register(plugin, priority);
    }

    pub fn unregister_plugin(&self, plugin: &PluginKind) -> bool {
        self.inner.pipeline.unregister(plugin)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolve `url` (absolute, or relative to `base_url`) into a request.
    pub fn build_request(&self, method: Method, url: &str) -> Result<HttpRequest, ClientError> {
        Ok(HttpRequest::new(method, self.resolve(url)?))
    }

    fn resolve(&self, url: &str) -> Result<Url, ClientError> {
        match Url::parse(url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.inner.base_url {
                Some(base) => base
                    .join(url)
                    .map_err(|e| ClientError::InvalidRequest(format!("cannot resolve {url} against {base}: {e}"))),
                None => Err(ClientError::InvalidRequest(format!(
                    "relative URL {url} without a base_url"
                ))),
            },
            Err(e) => Err(ClientError::InvalidRequest(format!("invalid URL {url}: {e}"))),
        }
    }

    /// Send a bodiless request.
    pub async fn request(&self, method: Method, url: &str) -> Result<HttpResponse, ClientError> {
        let request = self.build_request(method, url)?;
        self.send(request).await
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, ClientError> {
        self.request(Method::GET, url).await
    }

    pub async fn head(&self, url: &str) -> Result<HttpResponse, ClientError> {
        self.request(Method::HEAD, url).await
    }

    pub async fn delete(&self, url: &str) -> Result<HttpResponse, ClientError> {
        self.request(Method::DELETE, url).await
    }

    pub async fn post(&self, url: &str, body: impl Into<Bytes>) -> Result<HttpResponse, ClientError> {
        let request = self.build_request(Method::POST, url)?.body(body);
        self.send(request).await
    }

    pub async fn put(&self, url: &str, body: impl Into<Bytes>) -> Result<HttpResponse, ClientError> {
        let request = self.build_request(Method::PUT, url)?.body(body);
        self.send(request).await
    }

    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        self.send_with_cancel(request, CancellationToken::new()).await
    }

    /// Send `request`; cancelling `cancel` aborts waits, backoff sleeps and
    /// the in-flight attempt.
    pub async fn send_with_cancel(
        &self,
        mut request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let defaults = &self.inner.default_headers;
        for name in defaults.keys() {
            if !request.headers.contains_key(name) {
                for value in defaults.get_all(name) {
                    request.headers.append(name.clone(), value.clone());
                }
            }
        }

        let mut ctx = RequestContext::with_cancellation(request, cancel);
        let dispatcher = Dispatcher { inner: &self.inner };
        let result = self.inner.pipeline.run(&mut ctx, &dispatcher).await;

        match result {
            Ok(response) if self.inner.config.error_for_status && response.status_code() >= 400 => {
                Err(ClientError::Status {
                    status: response.status_code(),
                    url: sanitize_url(ctx.url()),
                    attempts: ctx.attempt.max(1),
                })
            }
            other => other,
        }
    }

    async fn session_state(&self) -> SessionState {
        if self.is_closed() {
            return SessionState::Closed;
        }
        if self.inner.session.read().await.is_some() {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    /// Read-only snapshot of every registered subsystem.
    pub async fn health_check(&self) -> Result<HealthReport, ClientError> {
        let session = self.session_state().await;
        HealthReport::collect(&self.inner.pipeline, session)
    }

    fn find_plugin<T>(&self, pick: impl Fn(&PluginKind) -> Option<T>) -> Option<T> {
        self.inner.pipeline.plugins().iter().find_map(|p| pick(&p.plugin))
    }

    /// The authentication plugin, for rotating tokens.
    pub fn auth(&self) -> Option<Arc<AuthPlugin>> {
        self.find_plugin(|p| match p {
            PluginKind::Auth(p) => Some(Arc::clone(p)),
            _ => None,
        })
    }

    pub fn cache(&self) -> Option<Arc<ResponseCache>> {
        self.find_plugin(|p| match p {
            PluginKind::Cache(p) => Some(Arc::clone(p.cache())),
            _ => None,
        })
    }

    pub fn circuit_breakers(&self) -> Option<Arc<BreakerRegistry>> {
        self.find_plugin(|p| match p {
            PluginKind::CircuitBreaker(p) => Some(Arc::clone(p.registry())),
            _ => None,
        })
    }

    pub fn proxy_pool(&self) -> Option<Arc<ProxyPool>> {
        self.find_plugin(|p| match p {
            PluginKind::ProxyPool(p) => Some(Arc::clone(p.pool())),
            _ => None,
        })
    }

    pub fn rate_limiter(&self) -> Option<Arc<RateLimiter>> {
        self.find_plugin(|p| match p {
            PluginKind::RateLimit(p) => Some(Arc::clone(p.limiter())),
            _ => None,
        })
    }

    pub fn request_stats(&self) -> Option<MonitoringStats> {
        self.find_plugin(|p| match p {
            PluginKind::Monitoring(p) => Some(p.stats()),
            _ => None,
        })
    }

    /// Add a proxy to the pool, probing it first when `check_on_add` is set.
    pub async fn add_proxy(&self, addr: ProxyAddr) -> Result<HealthState, ClientError> {
        let pool = self.proxy_pool().ok_or(ClientError::NoProxyAvailable)?;
        if pool.config().check_on_add {
            let transport = self.inner.transport().await?;
            return pool.add_checked(addr, transport.as_ref()).await;
        }
        pool.add(addr.clone())?;
        Ok(pool.health_of(&addr)?.unwrap_or(HealthState::Unknown))
    }

    /// Probe every proxy in the pool once.
    pub async fn check_proxies(&self) -> Result<CheckSummary, ClientError> {
        let pool = self.proxy_pool().ok_or(ClientError::NoProxyAvailable)?;
        let transport = self.inner.transport().await?;
        let concurrency = pool.config().check_concurrency;
        pool.check_all(transport.as_ref(), concurrency).await
    }

    /// Start periodic proxy checks. Returns `None` without a pool or with
    /// `check_interval_secs` set to zero. The task stops on [`Client::close`].
    pub async fn spawn_health_monitor(&self) -> Result<Option<JoinHandle<()>>, ClientError> {
        let Some(pool) = self.proxy_pool() else {
            return Ok(None);
        };
        let interval = Duration::from_secs(pool.config().check_interval_secs);
        if interval.is_zero() {
            return Ok(None);
        }

        let transport = self.inner.transport().await?;
        let monitor = HealthMonitor::new(pool, transport, interval);
        let shutdown = self.inner.shutdown.subscribe();
        Ok(Some(tokio::spawn(monitor.run(shutdown))))
    }

    /// Stop background tasks and release the transport. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let stopped = self.inner.shutdown.trigger();
        let session = self.inner.session.write().await.take();
        if let Some(transport) = session {
            transport.close().await;
        }
        tracing::info!(background_tasks = stopped, "Client closed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::config::{AuthConfig, UserAgentStrategy};
    use crate::proxy::ProxyAddr;

    #[derive(Debug, Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Echo {
        async fn send(
            &self,
            request: &HttpRequest,
            _proxy: Option<&ProxyAddr>,
            _timeout: Duration,
        ) -> Result<HttpResponse, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let status = if request.url.path() == "/missing" { 404 } else { 200 };
            let mut response = HttpResponse::with_status(status);
            response.body = Bytes::from(request.url.to_string());
            if let Some(agent) = request.headers.get("user-agent") {
                response.headers.insert("x-seen-agent", agent.clone());
            }
            if let Some(auth) = request.headers.get("authorization") {
                response.headers.insert("x-seen-auth", auth.clone());
            }
            Ok(response)
        }
    }

    fn client(config: ClientConfig) -> (Client, Arc<Echo>) {
        let echo = Arc::new(Echo::default());
        let client = Client::builder(config).transport(echo.clone()).build().unwrap();
        (client, echo)
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = ClientConfig::minimal();
        config.timeouts.request_ms = 0;
        let err = Client::new(config).unwrap_err();
        assert!(matches!(err, ClientError::Config(ref errors) if errors[0].field == "timeouts.request_ms"));
    }

    #[tokio::test]
    async fn test_base_url_and_default_headers() {
        let mut config = ClientConfig::minimal();
        config.base_url = Some("http://api.test/v1/".into());
        config.default_headers = vec![("user-agent".into(), "tests".into())];
        let (client, _) = client(config);

        let response = client.get("items?page=2").await.unwrap();
        assert_eq!(response.text(), "http://api.test/v1/items?page=2");
        assert_eq!(response.header("x-seen-agent"), Some("tests"));
    }

    #[tokio::test]
    async fn test_relative_url_needs_base() {
        let (client, _) = client(ClientConfig::minimal());
        let err = client.get("/items").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_error_for_status() {
        let (client, _) = client(ClientConfig::minimal());
        let err = client.get("http://api.test/missing").await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 404, attempts: 1, .. }));

        let mut config = ClientConfig::minimal();
        config.error_for_status = false;
        let (client, _) = self::client(config);
        let response = client.get("http://api.test/missing").await.unwrap();
        assert_eq!(response.status_code(), 404);
    }

    #[tokio::test]
    async fn test_session_is_lazy_and_close_is_terminal() {
        let (client, echo) = client(ClientConfig::minimal());
        assert_eq!(client.health_check().await.unwrap().session, SessionState::Idle);

        client.get("http://api.test/").await.unwrap();
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.health_check().await.unwrap().session, SessionState::Active);

        client.close().await;
        client.close().await;
        assert_eq!(client.health_check().await.unwrap().session, SessionState::Closed);
        assert!(matches!(client.get("http://api.test/").await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_credentials_and_agent_from_config() {
        let mut config = ClientConfig::minimal();
        config.auth = Some(AuthConfig::Bearer { token: "t1".into() });
        config.user_agent.enabled = true;
        config.user_agent.strategy = UserAgentStrategy::Fixed;
        config.user_agent.agents = vec!["crawler/1.0".into()];
        let (client, _) = client(config);
        assert_eq!(client.pipeline().names(), vec!["auth", "user_agent"]);

        let response = client.get("http://api.test/").await.unwrap();
        assert_eq!(response.header("x-seen-auth"), Some("Bearer t1"));
        assert_eq!(response.header("x-seen-agent"), Some("crawler/1.0"));

        assert!(client.auth().unwrap().update_token("t2"));
        let response = client.get("http://api.test/").await.unwrap();
        assert_eq!(response.header("x-seen-auth"), Some("Bearer t2"));
    }

    #[tokio::test]
    async fn test_pipeline_follows_config() {
        let mut config = ClientConfig::default();
        config.observability.log_requests = true;
        config.observability.metrics_enabled = true;
        let (client, _) = client(config);
        assert_eq!(client.pipeline().names(), vec!["logging", "circuit_breaker", "monitoring"]);
        assert!(client.circuit_breakers().is_some());
        assert!(client.proxy_pool().is_none());
    }
}
