use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use relay_breaker::CircuitBreakerRegistry;
use relay_connpool::ConnectionPool;
use relay_passthrough::{DashUpstream, PassthroughError, Upstream};
use tracing::warn;
use url::Url;

/// The relay's `reqwest`-backed implementation of both passthrough crates'
/// upstream traits, gated by the shared connection pool and circuit
/// breaker so a flapping origin can't exhaust the relay's own sockets.
pub struct ReqwestUpstream {
    http: reqwest::Client,
    pool: Arc<ConnectionPool>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl ReqwestUpstream {
    pub fn new(http: reqwest::Client, pool: Arc<ConnectionPool>, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { http, pool, breakers }
    }

    async fn fetch(&self, url: &Url) -> Result<Bytes, PassthroughError> {
        let host = url.host_str().unwrap_or("unknown").to_string();

        if !self.breakers.is_allowed(&host) {
            return Err(PassthroughError::Upstream(format!("circuit open for {host}")));
        }

        let _guard = self
            .pool
            .acquire(&host)
            .await
            .map_err(|err| PassthroughError::Upstream(format!("connection pool: {err}")))?;

        let result = self
            .http
            .get(url.clone())
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match result {
            Ok(response) => match response.bytes().await {
                Ok(bytes) => {
                    self.breakers.record_success(&host);
                    Ok(bytes)
                }
                Err(err) => {
                    self.breakers.record_failure(&host);
                    Err(PassthroughError::Upstream(err.to_string()))
                }
            },
            Err(err) => {
                self.breakers.record_failure(&host);
                warn!(%host, error = %err, "upstream fetch failed");
                Err(PassthroughError::Upstream(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl Upstream for ReqwestUpstream {
    async fn get(&self, url: &Url) -> Result<Bytes, PassthroughError> {
        self.fetch(url).await
    }
}

#[async_trait]
impl DashUpstream for ReqwestUpstream {
    async fn get(&self, url: &Url) -> Result<Bytes, PassthroughError> {
        self.fetch(url).await
    }
}
