//! Request/response logging plugin.

use async_trait::async_trait;

use crate::http::error::ClientError;
use crate::http::request::RequestContext;
use crate::http::response::HttpResponse;
use crate::plugins::{ErrorAction, Plugin};
use crate::security::sanitize::{sanitize_headers, sanitize_url};

/// Logs every request and its outcome with the correlation ID.
/// URLs and headers are sanitized before logging.
#[derive(Debug, Default)]
pub struct LoggingPlugin {
    log_headers: bool,
}

impl LoggingPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log (sanitized) request headers at debug level.
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

#[async_trait]
impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        "logging"
    }

    async fn before_request(&self, ctx: &mut RequestContext) -> Result<Option<HttpResponse>, ClientError> {
        tracing::info!(
            request_id = %ctx.correlation_id,
            method = %ctx.method(),
            url = %sanitize_url(ctx.url()),
            "Sending request"
        );
        if self.log_headers {
            tracing::debug!(
                request_id = %ctx.correlation_id,
                headers = ?sanitize_headers(&ctx.request.headers),
                "Request headers"
            );
        }
        Ok(None)
    }

    async fn after_response(&self, ctx: &mut RequestContext, response: &mut HttpResponse) -> Result<(), ClientError> {
        tracing::info!(
            request_id = %ctx.correlation_id,
            method = %ctx.method(),
            url = %sanitize_url(ctx.url()),
            status = response.status_code(),
            attempts = ctx.attempt,
            from_cache = response.from_cache,
            bytes = response.body.len(),
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            "Received response"
        );
        Ok(())
    }

    async fn on_error(&self, ctx: &mut RequestContext, error: &ClientError) -> Result<ErrorAction, ClientError> {
        tracing::warn!(
            request_id = %ctx.correlation_id,
            method = %ctx.method(),
            url = %sanitize_url(ctx.url()),
            error = %error,
            kind = %error.kind(),
            attempts = ctx.attempt,
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            "Request failed"
        );
        Ok(ErrorAction::Propagate)
    }
}
