use std::time::Duration;

/// Relay-wide defaults, overridable by environment variables. Grounded on
/// `rust-srec::api::server::ApiServerConfig::from_env_or_default`'s
/// env-var-with-fallback shape.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_address: String,
    pub port: u16,
    pub user_agent: String,
    /// Base URL this relay is externally reachable at, used to build
    /// proxied segment/manifest URLs for passthrough rewriting.
    pub public_base_url: String,
    pub segment_target_duration: Duration,
    pub segment_window: usize,
    pub variant_byte_cap: u64,
    pub variant_duration_cap_ticks: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub max_per_host: usize,
    pub max_global: usize,
    pub session_idle_grace: Duration,
    pub passthrough_ttl: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8088,
            user_agent: "relay-core/0.1".to_string(),
            public_base_url: "http://127.0.0.1:8088".to_string(),
            segment_target_duration: Duration::from_secs(6),
            segment_window: 6,
            variant_byte_cap: relay_es::DEFAULT_BYTE_CAP,
            variant_duration_cap_ticks: relay_es::DEFAULT_DURATION_CAP_TICKS,
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            max_per_host: 8,
            max_global: 256,
            session_idle_grace: Duration::from_secs(60),
            passthrough_ttl: Duration::from_millis(1_000),
        }
    }
}

impl RelayConfig {
    /// Supported env vars: `RELAY_BIND_ADDRESS`, `RELAY_PORT`,
    /// `RELAY_USER_AGENT`. Everything else keeps its default; operators
    /// wanting finer control construct `RelayConfig` directly.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(bind_address) = std::env::var("RELAY_BIND_ADDRESS")
            && !bind_address.trim().is_empty()
        {
            config.bind_address = bind_address;
        }

        if let Ok(port) = std::env::var("RELAY_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.port = parsed;
        }

        if let Ok(user_agent) = std::env::var("RELAY_USER_AGENT")
            && !user_agent.trim().is_empty()
        {
            config.user_agent = user_agent;
        }

        if let Ok(base_url) = std::env::var("RELAY_PUBLIC_BASE_URL")
            && !base_url.trim().is_empty()
        {
            config.public_base_url = base_url;
        }

        config
    }
}
