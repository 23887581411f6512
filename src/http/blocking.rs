//! Synchronous facade over [`Client`].
//!
//! Owns a multi-thread Tokio runtime and blocks the calling thread on each
//! request. The facade is `Send + Sync` and may be shared across threads.
//! Do not call it from inside an async runtime.

use std::sync::Arc;

use bytes::Bytes;
use hyper::Method;
use tokio::runtime::{Builder, Runtime};

use crate::config::ClientConfig;
use crate::http::client::{Client, ClientBuilder};
use crate::http::error::ClientError;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::observability::HealthReport;

/// Blocking HTTP client.
#[derive(Debug, Clone)]
pub struct BlockingClient {
    client: Client,
    runtime: Arc<Runtime>,
}

impl BlockingClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::from_builder(ClientBuilder::new(config))
    }

    /// Build the async client inside a fresh runtime.
    pub fn from_builder(builder: ClientBuilder) -> Result<Self, ClientError> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("resilient-http")
            .build()
            .map_err(ClientError::Runtime)?;
        let client = {
            let _guard = runtime.enter();
            builder.build()?
        };
        Ok(Self {
            client,
            runtime: Arc::new(runtime),
        })
    }

    /// The async client driving this facade.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        self.runtime.block_on(self.client.send(request))
    }

    pub fn request(&self, method: Method, url: &str) -> Result<HttpResponse, ClientError> {
        self.runtime.block_on(self.client.request(method, url))
    }

    pub fn get(&self, url: &str) -> Result<HttpResponse, ClientError> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str, body: impl Into<Bytes>) -> Result<HttpResponse, ClientError> {
        self.runtime.block_on(self.client.post(url, body))
    }

    pub fn health_check(&self) -> Result<HealthReport, ClientError> {
        self.runtime.block_on(self.client.health_check())
    }

    pub fn close(&self) {
        self.runtime.block_on(self.client.close());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::http::transport::Transport;
    use crate::proxy::ProxyAddr;

    #[derive(Debug)]
    struct Always200;

    #[async_trait]
    impl Transport for Always200 {
        async fn send(
            &self,
            _request: &HttpRequest,
            _proxy: Option<&ProxyAddr>,
            _timeout: Duration,
        ) -> Result<HttpResponse, ClientError> {
            Ok(HttpResponse::with_status(200))
        }
    }

    #[test]
    fn test_shared_across_threads() {
        let builder = Client::builder(ClientConfig::minimal()).transport(Arc::new(Always200));
        let client = BlockingClient::from_builder(builder).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                std::thread::spawn(move || client.get("http://blocking.test/").unwrap().status_code())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 200);
        }

        client.close();
        assert!(matches!(client.get("http://blocking.test/"), Err(ClientError::Closed)));
    }
}
