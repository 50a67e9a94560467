//! Scheduler process entry point (spec §4.3, §6 exit-code contract).

use tracing_subscriber::EnvFilter;
use triggerd::dispatch::SchedulerLoop;
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

    tracing::info!(db_url = %config.db_url, "scheduler starting");

    let scheduler = SchedulerLoop::new(store, config);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    scheduler.run(shutdown_rx).await;
    tracing::info!("scheduler stopped");
}
