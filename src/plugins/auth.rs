//! Authentication plugin.
//!
//! Attaches bearer, basic or API-key credentials to every request. Tokens can
//! be rotated while the client is in use; requests already past
//! `before_request` keep the credentials they were sent with.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::header::{HeaderName, HeaderValue, AUTHORIZATION};

use crate::config::AuthConfig;
use crate::http::error::ClientError;
use crate::http::request::RequestContext;
use crate::http::response::HttpResponse;
use crate::plugins::Plugin;

/// Adds an authentication header to each request.
pub struct AuthPlugin {
    credentials: ArcSwap<AuthConfig>,
}

impl fmt::Debug for AuthPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPlugin")
            .field("scheme", &self.scheme())
            .finish_non_exhaustive()
    }
}

impl AuthPlugin {
    pub fn new(credentials: AuthConfig) -> Self {
        Self {
            credentials: ArcSwap::from_pointee(credentials),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new(AuthConfig::Bearer { token: token.into() })
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(AuthConfig::Basic {
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn scheme(&self) -> &'static str {
        self.credentials.load().scheme()
    }

    /// Replace the bearer token or API key. Basic credentials carry no token;
    /// they are left untouched and `false` is returned.
    pub fn update_token(&self, token: impl Into<String>) -> bool {
        let token = token.into();
        let mut updated = false;
        self.credentials.rcu(|current| {
            updated = true;
            match current.as_ref() {
                AuthConfig::Bearer { .. } => AuthConfig::Bearer { token: token.clone() },
                AuthConfig::ApiKey { header, .. } => AuthConfig::ApiKey {
                    key: token.clone(),
                    header: header.clone(),
                },
                basic @ AuthConfig::Basic { .. } => {
                    updated = false;
                    basic.clone()
                }
            }
        });
        if updated {
            tracing::info!(scheme = self.scheme(), "Authentication token updated");
        } else {
            tracing::warn!("Basic credentials have no token to update");
        }
        updated
    }

    /// Swap in entirely new credentials.
    pub fn set_credentials(&self, credentials: AuthConfig) {
        tracing::info!(scheme = credentials.scheme(), "Authentication credentials replaced");
        self.credentials.store(Arc::new(credentials));
    }

    fn header(&self) -> Result<(HeaderName, HeaderValue), ClientError> {
        let credentials = self.credentials.load();
        let (name, value) = match credentials.as_ref() {
            AuthConfig::Bearer { token } => (AUTHORIZATION, format!("Bearer {token}")),
            AuthConfig::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                (AUTHORIZATION, format!("Basic {encoded}"))
            }
            AuthConfig::ApiKey { key, header } => {
                let name = HeaderName::from_bytes(header.as_bytes())
                    .map_err(|e| ClientError::plugin("auth", format!("invalid header name {header}: {e}")))?;
                (name, key.clone())
            }
        };
        let mut value = HeaderValue::from_str(&value).map_err(|_| {
            let scheme = credentials.scheme();
            ClientError::plugin("auth", format!("{scheme} credentials are not a valid header value"))
        })?;
        value.set_sensitive(true);
        Ok((name, value))
    }
}

#[async_trait]
impl Plugin for AuthPlugin {
    fn name(&self) -> &str {
        "auth"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn before_request(&self, ctx: &mut RequestContext) -> Result<Option<HttpResponse>, ClientError> {
        let (name, value) = self.header()?;
        tracing::debug!(scheme = self.scheme(), request_id = %ctx.correlation_id, "Credentials attached");
        ctx.request.headers.insert(name, value);
        Ok(None)
    }
}
