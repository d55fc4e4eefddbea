use std::sync::Arc;
use std::time::Duration;

use relay_breaker::CircuitBreakerRegistry;
use relay_connpool::ConnectionPool;
use relay_scheduler::Scheduler;
use relay_session::SessionManager;
use relay_slate::SlateStore;

use crate::config::RelayConfig;
use crate::ingest::IngestRegistry;
use crate::upstream::ReqwestUpstream;

/// Everything a request handler needs, cloned cheaply per-request the way
/// `rust-srec::api::server::AppState` is (every field is already an
/// `Arc`/cheap handle).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub http: reqwest::Client,
    pub sessions: Arc<SessionManager>,
    pub scheduler: Arc<Scheduler>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub pool: Arc<ConnectionPool>,
    pub slate: Arc<SlateStore>,
    pub ingest: Arc<IngestRegistry>,
    pub upstream: Arc<ReqwestUpstream>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .expect("reqwest client config is static and always valid");

        let breakers = CircuitBreakerRegistry::new(
            config.failure_threshold,
            config.success_threshold,
            config.open_timeout,
        );
        let pool = Arc::new(ConnectionPool::new(config.max_per_host, config.max_global));
        let breakers = Arc::new(breakers);

        let upstream = Arc::new(ReqwestUpstream::new(http.clone(), pool.clone(), breakers.clone()));

        Self {
            config: Arc::new(config),
            http,
            sessions: Arc::new(SessionManager::new()),
            scheduler: Arc::new(Scheduler::new()),
            breakers,
            pool,
            slate: Arc::new(SlateStore::new()),
            ingest: Arc::new(IngestRegistry::new()),
            upstream,
        }
    }

    /// Background idle-session reaper; intended to run on a `tokio::spawn`
    /// interval loop from `main`.
    pub fn reap_idle_sessions(&self) -> Vec<String> {
        self.sessions.cleanup_idle(self.config.session_idle_grace)
    }
}

pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(30);
