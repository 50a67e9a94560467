//! Control Plane HTTP process entry point (spec §4.5, §6).

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use triggerd::api::{router, AppState};
use triggerd::control_plane::ControlPlane;
use triggerd::{Config, Store};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("triggerd=info")))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(?err, "fatal configuration error");
            std::process::exit(1);
        }
    };

    let store = match Store::connect(&config.db_url).await {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(?err, "fatal store initialization error");
            std::process::exit(1);
        }
    };

    let control_plane = Arc::new(ControlPlane::new(store, config));
    let app = router(AppState { control_plane });

    let port: u16 = std::env::var("API_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "control plane API starting");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(?err, "fatal bind error");
            std::process::exit(1);
        }
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
    {
        tracing::error!(?err, "server error");
        std::process::exit(1);
    }
    tracing::info!("control plane API stopped");
}
