mod codec;
mod config;
mod error;
mod feeder;
mod ingest;
mod routes;
mod state;
mod upstream;

use tracing_subscriber::EnvFilter;

use crate::config::RelayConfig;
use crate::state::{AppState, DEFAULT_REAP_INTERVAL};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::from_env_or_default();
    let bind_address = format!("{}:{}", config.bind_address, config.port);
    let state = AppState::new(config);

    spawn_idle_reaper(state.clone());

    let router = routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {bind_address}: {err}"));

    tracing::info!(%bind_address, "relay-core listening");
    axum::serve(listener, router).await.expect("server loop exited");
}

fn spawn_idle_reaper(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DEFAULT_REAP_INTERVAL);
        loop {
            ticker.tick().await;
            let reaped = state.reap_idle_sessions();
            if !reaped.is_empty() {
                tracing::info!(channels = ?reaped, "reaped idle channel sessions");
            }
        }
    });
}
