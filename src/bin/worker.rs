//! Worker process entry point (spec §4.4, §6 exit-code contract).

use tracing_subscriber::EnvFilter;
use triggerd::worker::heartbeat;
use triggerd::worker::Worker;
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

    let worker = match Worker::register(store.clone(), config.clone()).await {
        Ok(worker) => worker,
        Err(err) => {
            tracing::error!(?err, "fatal worker registration error");
            std::process::exit(1);
        }
    };
    tracing::info!(worker_id = worker.id(), "worker starting");

    let heartbeat_handle = heartbeat::spawn(store, config, worker.state());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    worker.run(shutdown_rx).await;
    heartbeat_handle.abort();
    tracing::info!("worker stopped");
}
