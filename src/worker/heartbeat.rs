//! Background heartbeat task (spec §4.4.1).
//!
//! Runs as an independent cooperative task alongside the poll loop (spec
//! §5: "the two must be scheduled independently") so a long subprocess
//! wait never delays the heartbeat.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::model::{WorkerRegistration, WorkerStatus};
use crate::store::Store;

/// Shared, lock-free snapshot of worker state the heartbeat task reads and
/// the poll loop writes. `current_job_id` uses `0` as "none" since job ids
/// are positive.
pub struct WorkerState {
    pub worker_id: String,
    pub hostname: String,
    pub platform: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub process_id: u32,
    pub jobs_processed: AtomicU64,
    pub current_job_id: AtomicI64,
}

impl WorkerState {
    pub fn status(&self) -> WorkerStatus {
        if self.current_job_id.load(Ordering::Relaxed) > 0 {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        }
    }

    pub fn set_current_job(&self, job_id: Option<i64>) {
        self.current_job_id.store(job_id.unwrap_or(0), Ordering::Relaxed);
    }

    pub fn current_job(&self) -> Option<i64> {
        match self.current_job_id.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }
}

/// Spawns the heartbeat task; cancel the returned handle on shutdown.
pub fn spawn(store: Store, config: Config, state: Arc<WorkerState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(config.worker_heartbeat_interval).await;
            if let Err(err) = beat(&store, &state).await {
                tracing::error!(?err, "heartbeat update failed");
            }
        }
    })
}

async fn beat(store: &Store, state: &WorkerState) -> crate::error::Result<()> {
    let now = chrono::Utc::now();
    let found = store
        .update_heartbeat(
            &state.worker_id,
            now,
            state.status(),
            state.current_job(),
            state.jobs_processed.load(Ordering::Relaxed) as i64,
        )
        .await?;

    if !found {
        tracing::warn!(worker_id = %state.worker_id, "worker row vanished, re-registering");
        store
            .register_worker(&WorkerRegistration {
                worker_id: state.worker_id.clone(),
                hostname: state.hostname.clone(),
                platform: state.platform.clone(),
                started_at: state.started_at,
                last_heartbeat: now,
                status: state.status(),
                jobs_processed: state.jobs_processed.load(Ordering::Relaxed) as i64,
                current_job_id: state.current_job(),
                process_id: state.process_id as i64,
            })
            .await?;
    }
    Ok(())
}
