//! Rate limiting plugin.

use std::sync::Arc;

use async_trait::async_trait;

use crate::http::error::ClientError;
use crate::http::request::RequestContext;
use crate::http::response::HttpResponse;
use crate::plugins::Plugin;
use crate::security::rate_limit::RateLimiter;

/// Gates requests through a [`RateLimiter`] before anything else runs.
#[derive(Debug)]
pub struct RateLimitPlugin {
    limiter: Arc<RateLimiter>,
}

impl RateLimitPlugin {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

#[async_trait]
impl Plugin for RateLimitPlugin {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn before_request(&self, ctx: &mut RequestContext) -> Result<Option<HttpResponse>, ClientError> {
        self.limiter.acquire(&ctx.cancel).await?;
        Ok(None)
    }
}
