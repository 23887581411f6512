//! Circuit breaker plugin.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::http::error::ClientError;
use crate::http::request::RequestContext;
use crate::http::response::HttpResponse;
use crate::plugins::{ErrorAction, Plugin};
use crate::resilience::circuit_breaker::{BreakerRegistry, CircuitBreaker, TrialPermit};

/// Breaker admission of the current request.
#[derive(Debug, Clone)]
struct BreakerTicket {
    breaker: Arc<CircuitBreaker>,
    permit: Option<Arc<TrialPermit>>,
}

/// Rejects requests to open targets and feeds outcomes back to the breaker.
#[derive(Debug)]
pub struct CircuitBreakerPlugin {
    registry: Arc<BreakerRegistry>,
}

impl CircuitBreakerPlugin {
    pub fn new(registry: Arc<BreakerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<BreakerRegistry> {
        &self.registry
    }
}

#[async_trait]
impl Plugin for CircuitBreakerPlugin {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn before_request(&self, ctx: &mut RequestContext) -> Result<Option<HttpResponse>, ClientError> {
        let breaker = self.registry.breaker_for(ctx.url());
        let permit = breaker.acquire().inspect_err(|e| {
            tracing::warn!(
                target_key = %breaker.target(),
                request_id = %ctx.correlation_id,
                error = %e,
                "Request rejected by circuit breaker"
            );
        })?;

        if permit.is_some() {
            ctx.metadata.insert("breaker_trial".into(), json!(true));
        }
        ctx.extensions.insert(BreakerTicket { breaker, permit });
        Ok(None)
    }

    async fn after_response(&self, ctx: &mut RequestContext, response: &mut HttpResponse) -> Result<(), ClientError> {
        let Some(ticket) = ctx.extensions.remove::<BreakerTicket>() else {
            return Ok(());
        };
        if response.from_cache {
            return Ok(());
        }
        let outcome = ticket.breaker.classify_status(response.status_code());
        ticket.breaker.record(outcome, ticket.permit.as_deref())
    }

    async fn on_error(&self, ctx: &mut RequestContext, error: &ClientError) -> Result<ErrorAction, ClientError> {
        if let Some(ticket) = ctx.extensions.remove::<BreakerTicket>() {
            let outcome = ticket.breaker.classify_error(error);
            ticket.breaker.record(outcome, ticket.permit.as_deref())?;
        }
        Ok(ErrorAction::Propagate)
    }
}
