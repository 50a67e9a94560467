//! Worker runtime (spec §4.4): registration, claim loop with exponential
//! backoff, execution, reporting, graceful shutdown. Ported from
//! `original_source/services/worker_service.py::main_async`/
//! `job_polling_loop`.

pub mod heartbeat;
pub mod process;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::error::Result;
use crate::model::{DispatchStatus, WorkerRegistration, WorkerStatus};
use crate::store::Store;

use heartbeat::WorkerState;

/// `worker-<8 hex>` (spec §4.4), ported from the original's
/// `uuid.uuid4().hex[:8]`.
fn generate_worker_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &hex[..8])
}

fn detect_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub struct Worker {
    store: Store,
    config: Config,
    state: Arc<WorkerState>,
}

impl Worker {
    pub async fn register(store: Store, config: Config) -> Result<Self> {
        let worker_id = generate_worker_id();
        let now = Utc::now();
        let state = Arc::new(WorkerState {
            worker_id: worker_id.clone(),
            hostname: detect_hostname(),
            platform: std::env::consts::OS.to_string(),
            started_at: now,
            process_id: std::process::id(),
            jobs_processed: std::sync::atomic::AtomicU64::new(0),
            current_job_id: std::sync::atomic::AtomicI64::new(0),
        });

        store
            .register_worker(&WorkerRegistration {
                worker_id: worker_id.clone(),
                hostname: state.hostname.clone(),
                platform: state.platform.clone(),
                started_at: now,
                last_heartbeat: now,
                status: WorkerStatus::Idle,
                jobs_processed: 0,
                current_job_id: None,
                process_id: state.process_id as i64,
            })
            .await?;
        tracing::info!(worker_id, "worker registered");

        Ok(Self { store, config, state })
    }

    pub fn id(&self) -> &str {
        &self.state.worker_id
    }

    /// Runs the claim/execute/report cycle until `shutdown` resolves, then
    /// performs the graceful-release cleanup (spec §4.4.5).
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut poll_interval = self.config.worker_poll_interval;

        loop {
            match self.try_claim_and_execute().await {
                Ok(true) => {
                    poll_interval = self.config.worker_poll_interval;
                }
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = &mut shutdown => break,
                    }
                    poll_interval = std::cmp::min(
                        poll_interval.mul_f32(1.5),
                        self.config.worker_max_poll_interval,
                    );
                    continue;
                }
                Err(err) => {
                    tracing::error!(?err, "poll loop error, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.worker_poll_interval) => {}
                        _ = &mut shutdown => break,
                    }
                    continue;
                }
            }

            if shutdown.try_recv().is_ok() {
                break;
            }
        }

        self.cleanup().await;
    }

    /// One claim attempt; `Ok(true)` means a dispatch ran (successfully
    /// claimed, whatever the execution outcome).
    async fn try_claim_and_execute(&self) -> Result<bool> {
        let now = Utc::now();
        let Some((dispatch, job)) = self.store.try_claim_oldest_pending(self.id(), now).await? else {
            return Ok(false);
        };
        tracing::info!(dispatch_id = dispatch.id, job_id = job.id, job_name = %job.name, "claimed dispatch");

        self.state.set_current_job(Some(job.id));
        let _ = self
            .store
            .update_heartbeat(
                self.id(),
                Utc::now(),
                WorkerStatus::Busy,
                Some(job.id),
                self.state.jobs_processed.load(Ordering::Relaxed) as i64,
            )
            .await;

        let outcome = process::execute(
            &job.script_path,
            job.script_args.as_deref(),
            &self.config.script_interpreter,
            self.config.worker_job_timeout,
        )
        .await;

        let completed_at = Utc::now();
        let dispatch_status = match outcome.status {
            crate::model::LogStatus::Success => DispatchStatus::Completed,
            _ => DispatchStatus::Failed,
        };
        let error_message = if matches!(outcome.status, crate::model::LogStatus::Success) {
            None
        } else {
            Some(crate::model::truncate_error_message(&outcome.log_output))
        };

        self.store
            .report_result(dispatch.id, dispatch_status, completed_at, error_message)
            .await?;
        self.store
            .append_log(job.id, dispatch.claimed_at.unwrap_or(completed_at), outcome.status, &outcome.log_output)
            .await?;

        self.state.jobs_processed.fetch_add(1, Ordering::Relaxed);
        self.state.set_current_job(None);
        let _ = self
            .store
            .update_heartbeat(
                self.id(),
                Utc::now(),
                WorkerStatus::Idle,
                None,
                self.state.jobs_processed.load(Ordering::Relaxed) as i64,
            )
            .await;

        tracing::info!(job_id = job.id, status = ?dispatch_status, "reported job result");
        Ok(true)
    }

    /// Spec §4.4.5: release any IN_PROGRESS dispatch held by this worker,
    /// then delete its registration row.
    async fn cleanup(&self) {
        match self.store.release_worker_claims(self.id()).await {
            Ok(released) if released > 0 => {
                tracing::warn!(released, worker_id = self.id(), "released stuck dispatches on shutdown");
            }
            Ok(_) => {}
            Err(err) => tracing::error!(?err, "failed to release claims during shutdown"),
        }
        if let Err(err) = self.store.deregister_worker(self.id()).await {
            tracing::error!(?err, "failed to deregister worker during shutdown");
        }
        tracing::info!(worker_id = self.id(), "worker cleaned up");
    }

    pub fn state(&self) -> Arc<WorkerState> {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_ids_have_expected_shape() {
        let id = generate_worker_id();
        assert!(id.starts_with("worker-"));
        assert_eq!(id.len(), "worker-".len() + 8);
    }
}
