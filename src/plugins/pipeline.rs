//! Priority-ordered hook execution.
//!
//! # Responsibilities
//! - Keep plugins sorted by (priority, registration sequence)
//! - Run before hooks, dispatch, then after/error hooks for one request
//! - Isolate hook failures of non-critical plugins
//!
//! # Design Decisions
//! - The plugin list is an immutable snapshot swapped atomically, so a
//!   request in flight keeps the list it started with
//! - Re-registering an instance moves it instead of duplicating it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use crate::http::error::ClientError;
use crate::http::request::RequestContext;
use crate::http::response::HttpResponse;
use crate::plugins::{ErrorAction, PluginKind};

/// The step that actually performs the request.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, ctx: &mut RequestContext) -> Result<HttpResponse, ClientError>;
}

/// A plugin in the pipeline.
#[derive(Debug, Clone)]
pub struct RegisteredPlugin {
    pub plugin: PluginKind,
    pub priority: i32,
    seq: u64,
}

/// Ordered plugin pipeline.
#[derive(Debug)]
pub struct PluginPipeline {
    plugins: ArcSwap<Vec<RegisteredPlugin>>,
    next_seq: AtomicU64,
}

impl Default for PluginPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginPipeline {
    pub fn new() -> Self {
        Self {
            plugins: ArcSwap::from_pointee(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Add `plugin` at `priority`. An already registered instance only
    /// has its priority updated.
    pub fn register(&self, plugin: PluginKind, priority: i32) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.plugins.rcu(|current| {
            let mut next: Vec<RegisteredPlugin> = current.as_ref().clone();
            match next.iter_mut().find(|p| p.plugin.same_instance(&plugin)) {
                Some(existing) => existing.priority = priority,
                None => next.push(RegisteredPlugin {
                    plugin: plugin.clone(),
                    priority,
                    seq,
                }),
            }
            next.sort_by_key(|p| (p.priority, p.seq));
            next
        });
        tracing::debug!(plugin = plugin.name(), priority, "Plugin registered");
    }

    /// Add `plugin` at its default priority.
    pub fn register_default(&self, plugin: PluginKind) {
        let priority = plugin.default_priority();
        self.register(plugin, priority);
    }

    /// Remove `plugin`. Returns whether it was registered.
    pub fn unregister(&self, plugin: &PluginKind) -> bool {
        let previous = self.plugins.rcu(|current| {
            current
                .iter()
                .filter(|p| !p.plugin.same_instance(plugin))
                .cloned()
                .collect::<Vec<_>>()
        });
        let removed = previous.iter().any(|p| p.plugin.same_instance(plugin));
        if removed {
            tracing::debug!(plugin = plugin.name(), "Plugin unregistered");
        }
        removed
    }

    /// Current snapshot, in execution order.
    pub fn plugins(&self) -> Arc<Vec<RegisteredPlugin>> {
        self.plugins.load_full()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins().iter().map(|p| p.plugin.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one request through every hook and `dispatch`.
    pub async fn run(
        &self,
        ctx: &mut RequestContext,
        dispatch: &dyn Dispatch,
    ) -> Result<HttpResponse, ClientError> {
        let plugins = self.plugins.load_full();

        let mut early: Option<Result<HttpResponse, ClientError>> = None;
        for registered in plugins.iter() {
            let plugin = &registered.plugin;
            match plugin.before_request(ctx).await {
                Ok(None) => {}
                Ok(Some(response)) => {
                    tracing::debug!(
                        plugin = plugin.name(),
                        request_id = %ctx.correlation_id,
                        "Request short-circuited"
                    );
                    early = Some(Ok(response));
                    break;
                }
                Err(e) if e.is_control_flow() || plugin.is_critical() => {
                    tracing::debug!(
                        plugin = plugin.name(),
                        request_id = %ctx.correlation_id,
                        error = %e,
                        "Request stopped before dispatch"
                    );
                    early = Some(Err(e));
                    break;
                }
                Err(e) => {
                    tracing::error!(plugin = plugin.name(), error = %e, "before_request hook failed");
                }
            }
        }

        let mut result = match early {
            Some(result) => result,
            None => dispatch.dispatch(ctx).await,
        };

        for registered in plugins.iter() {
            let plugin = &registered.plugin;
            result = match result {
                Ok(mut response) => match plugin.after_response(ctx, &mut response).await {
                    Ok(()) => Ok(response),
                    Err(e) if plugin.is_critical() => Err(e),
                    Err(e) => {
                        tracing::error!(plugin = plugin.name(), error = %e, "after_response hook failed");
                        Ok(response)
                    }
                },
                Err(error) => match plugin.on_error(ctx, &error).await {
                    Ok(ErrorAction::Propagate) => Err(error),
                    Ok(ErrorAction::Recover(response)) => {
                        tracing::debug!(plugin = plugin.name(), error = %error, "Error recovered by plugin");
                        Ok(response)
                    }
                    Err(e) if plugin.is_critical() => Err(e),
                    Err(e) => {
                        tracing::error!(plugin = plugin.name(), error = %e, "on_error hook failed");
                        Err(error)
                    }
                },
            };
        }

        result
    }
}
