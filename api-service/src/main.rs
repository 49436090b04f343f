mod auth_extractor;
mod handlers;
mod identity_flow;
mod router;

use std::time::Duration;

use signing_core::config::api_config;
use signing_core::{rate_limit, session};
use tracing_subscriber::EnvFilter;

/// Background sweep (§5.1): expired challenges and stale rate-limiter
/// buckets, every 30s.
fn spawn_gc_task() {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            if let Err(err) = session::gc_sessions() {
                tracing::warn!(error = %err, "session gc sweep failed");
            }
            rate_limit::gc_all();
        }
    });
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = api_config();
    spawn_gc_task();

    let app = router::router(config);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port))
        .await
        .expect("failed to bind api listener");
    tracing::info!(port = config.api_port, "api-service listening");

    axum::serve(listener, app)
        .await
        .expect("api server error");
}
