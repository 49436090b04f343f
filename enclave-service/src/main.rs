mod handlers;
mod router;
mod state;

use std::sync::Arc;
use std::time::Duration;

use signing_core::config::EnclaveConfig;
use signing_core::seal::seal_backend_from_env;
use tracing_subscriber::EnvFilter;

use handlers::AppState;

fn spawn_nonce_ledger_gc() {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            state::nonce_ledger().prune(signing_core::models::now());
        }
    });
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EnclaveConfig::load();
    let seal_backend = seal_backend_from_env(&config).expect("seal backend configuration");
    let port = config.enclave_port;

    spawn_nonce_ledger_gc();

    let state = AppState {
        config,
        seal_backend: Arc::from(seal_backend),
    };
    let app = router::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("failed to bind enclave listener");
    tracing::info!(port, "enclave-service listening");

    axum::serve(listener, app)
        .await
        .expect("enclave server error");
}
