//! Response cache plugin.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::cache::{cache_key, CacheKey, ResponseCache};
use crate::http::error::ClientError;
use crate::http::request::RequestContext;
use crate::http::response::HttpResponse;
use crate::plugins::Plugin;

/// Metadata key set to `"hit"` or `"miss"` for cacheable requests.
pub const CACHE_METADATA_KEY: &str = "cache";

/// Key of a missed lookup, carried to `after_response`.
#[derive(Debug, Clone)]
struct PendingStore(CacheKey);

/// Serves fresh cached responses and stores cacheable ones.
#[derive(Debug)]
pub struct CachePlugin {
    cache: Arc<ResponseCache>,
}

impl CachePlugin {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }
}

#[async_trait]
impl Plugin for CachePlugin {
    fn name(&self) -> &str {
        "cache"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn before_request(&self, ctx: &mut RequestContext) -> Result<Option<HttpResponse>, ClientError> {
        if !self.cache.is_cacheable_request(&ctx.request) {
            return Ok(None);
        }

        let key = cache_key(&ctx.request, self.cache.config());
        match self.cache.lookup(&key)? {
            Some(response) => {
                tracing::debug!(key = %key, request_id = %ctx.correlation_id, "Cache hit");
                ctx.metadata.insert(CACHE_METADATA_KEY.into(), json!("hit"));
                Ok(Some(response))
            }
            None => {
                ctx.metadata.insert(CACHE_METADATA_KEY.into(), json!("miss"));
                ctx.extensions.insert(PendingStore(key));
                Ok(None)
            }
        }
    }

    async fn after_response(&self, ctx: &mut RequestContext, response: &mut HttpResponse) -> Result<(), ClientError> {
        let Some(PendingStore(key)) = ctx.extensions.remove::<PendingStore>() else {
            return Ok(());
        };
        if response.from_cache || !self.cache.is_cacheable_response(response) {
            return Ok(());
        }
        if self.cache.store(key.clone(), response)? {
            tracing::debug!(key = %key, status = response.status_code(), "Response cached");
        }
        Ok(())
    }
}
