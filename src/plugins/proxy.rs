//! Proxy rotation plugin.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::http::error::ClientError;
use crate::http::request::RequestContext;
use crate::http::response::HttpResponse;
use crate::plugins::{ErrorAction, Plugin};
use crate::proxy::ProxyPool;

/// When the request was handed to the proxy.
#[derive(Debug, Clone, Copy)]
struct DispatchedAt(Instant);

/// Picks a proxy for each request and reports how it fared.
#[derive(Debug)]
pub struct ProxyPoolPlugin {
    pool: Arc<ProxyPool>,
}

impl ProxyPoolPlugin {
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }
}

/// Errors that say something about the proxy rather than the target.
fn blames_proxy(error: &ClientError) -> bool {
    match error {
        ClientError::RetriesExhausted { last, .. } => blames_proxy(last),
        ClientError::Proxy { .. }
        | ClientError::Connect { .. }
        | ClientError::Timeout { .. }
        | ClientError::Dns { .. } => true,
        _ => false,
    }
}

#[async_trait]
impl Plugin for ProxyPoolPlugin {
    fn name(&self) -> &str {
        "proxy_pool"
    }

    async fn before_request(&self, ctx: &mut RequestContext) -> Result<Option<HttpResponse>, ClientError> {
        let record = self.pool.get_proxy()?;
        tracing::debug!(proxy = %record.addr, request_id = %ctx.correlation_id, "Proxy selected");
        ctx.metadata.insert("proxy".into(), json!(record.addr.to_string()));
        ctx.proxy = Some(record.addr);
        ctx.extensions.insert(DispatchedAt(Instant::now()));
        Ok(None)
    }

    async fn after_response(&self, ctx: &mut RequestContext, response: &mut HttpResponse) -> Result<(), ClientError> {
        if response.from_cache {
            return Ok(());
        }
        if let Some(proxy) = &ctx.proxy {
            match ctx.extensions.get::<DispatchedAt>() {
                Some(DispatchedAt(at)) => self.pool.report_response(proxy, at.elapsed())?,
                None => self.pool.report_result(proxy, true)?,
            }
        }
        Ok(())
    }

    async fn on_error(&self, ctx: &mut RequestContext, error: &ClientError) -> Result<ErrorAction, ClientError> {
        if let Some(proxy) = &ctx.proxy {
            if blames_proxy(error) {
                tracing::warn!(proxy = %proxy, error = %error, "Request through proxy failed");
                self.pool.report_result(proxy, false)?;
            }
        }
        Ok(ErrorAction::Propagate)
    }
}
