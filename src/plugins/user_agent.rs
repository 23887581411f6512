//! User-Agent rotation plugin.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use hyper::header::{HeaderValue, USER_AGENT};

use crate::config::{UserAgentConfig, UserAgentStrategy};
use crate::http::error::ClientError;
use crate::http::request::RequestContext;
use crate::http::response::HttpResponse;
use crate::plugins::Plugin;

/// Common desktop browsers with a rough share used by the weighted strategy.
const BROWSERS: &[(&str, u32)] = &[
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        40,
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        15,
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        15,
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
        12,
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        10,
    ),
    (
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        8,
    ),
];

/// Sets the User-Agent header of each request from a rotating list.
#[derive(Debug)]
pub struct UserAgentPlugin {
    strategy: UserAgentStrategy,
    agents: Vec<(HeaderValue, u32)>,
    next: AtomicUsize,
    issued: AtomicU64,
}

impl UserAgentPlugin {
    /// Build from configuration. An empty agent list selects the built-in browsers.
    pub fn new(config: &UserAgentConfig) -> Result<Self, ClientError> {
        let agents = if config.agents.is_empty() {
            BROWSERS
                .iter()
                .map(|&(agent, weight)| (HeaderValue::from_static(agent), weight))
                .collect()
        } else {
            config
                .agents
                .iter()
                .map(|agent| {
                    HeaderValue::from_str(agent)
                        .map(|value| (value, 1))
                        .map_err(|_| ClientError::InvalidRequest(format!("invalid user agent: {agent:?}")))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        if agents.is_empty() {
            return Err(ClientError::InvalidRequest("no user agents configured".into()));
        }

        Ok(Self {
            strategy: config.strategy,
            agents,
            next: AtomicUsize::new(0),
            issued: AtomicU64::new(0),
        })
    }

    /// Always send `agent`.
    pub fn fixed(agent: &str) -> Result<Self, ClientError> {
        Self::new(&UserAgentConfig {
            enabled: true,
            strategy: UserAgentStrategy::Fixed,
            agents: vec![agent.to_string()],
        })
    }

    /// Number of requests that received an agent.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    fn pick(&self) -> usize {
        let len = self.agents.len();
        match self.strategy {
            UserAgentStrategy::Fixed => 0,
            UserAgentStrategy::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % len,
            UserAgentStrategy::Random => fastrand::usize(..len),
            UserAgentStrategy::Weighted => {
                let total: u32 = self.agents.iter().map(|(_, w)| w).sum();
                let mut point = fastrand::u32(..total.max(1));
                for (index, (_, weight)) in self.agents.iter().enumerate() {
                    if point < *weight {
                        return index;
                    }
                    point -= weight;
                }
                len - 1
            }
        }
    }
}

#[async_trait]
impl Plugin for UserAgentPlugin {
    fn name(&self) -> &str {
        "user_agent"
    }

    async fn before_request(&self, ctx: &mut RequestContext) -> Result<Option<HttpResponse>, ClientError> {
        let (agent, _) = &self.agents[self.pick()];
        ctx.request.headers.insert(USER_AGENT, agent.clone());
        self.issued.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }
}
