//! Dispatch engine: the Scheduler's single poll loop (spec §4.3).
//!
//! Ported from `original_source/services/scheduler_service.py::scheduler_loop`:
//! one pass every `SCHEDULER_POLL_INTERVAL`, with three of its four
//! sub-tasks gated by the iteration counter's modulus rather than their own
//! timers, so a single `sleep` drives everything.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::Config;
use crate::error::Result;
use crate::model::{truncate_error_message, LogStatus};
use crate::schedule::next_run;
use crate::store::Store;

/// Cadence, in scheduler passes, of sub-tasks 2-4 (spec §4.3).
const REAP_EVERY_N_PASSES: u64 = 10;
const STUCK_DISPATCH_EVERY_N_PASSES: u64 = 6;
const GC_EVERY_N_PASSES: u64 = 360;

pub struct SchedulerLoop {
    store: Store,
    config: Config,
    iteration: AtomicU64,
}

impl SchedulerLoop {
    pub fn new(store: Store, config: Config) -> Self {
        Self {
            store,
            config,
            iteration: AtomicU64::new(0),
        }
    }

    /// Runs until `shutdown` resolves. Sleeps `SCHEDULER_POLL_INTERVAL`
    /// between passes; cancellation is checked only at that sleep boundary
    /// (spec §5 "cooperative at sleep boundaries").
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        loop {
            let iteration = self.iteration.fetch_add(1, Ordering::SeqCst);
            if let Err(err) = self.run_once(iteration).await {
                tracing::error!(?err, "scheduler pass failed, continuing");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.scheduler_poll_interval) => {}
                _ = &mut shutdown => {
                    tracing::info!("scheduler received shutdown signal");
                    return;
                }
            }
        }
    }

    /// One scheduler pass, independently testable (spec §4.3: "each sub-task
    /// wraps in a savepoint; exceptions are logged and the loop continues").
    pub async fn run_once(&self, iteration: u64) -> Result<()> {
        if let Err(err) = self.dispatch_due_jobs().await {
            tracing::error!(?err, "dispatch due jobs failed");
        }

        if iteration % REAP_EVERY_N_PASSES == 0 {
            if let Err(err) = self.reap_stale_workers().await {
                tracing::error!(?err, "reap stale workers failed");
            }
        }

        if iteration % STUCK_DISPATCH_EVERY_N_PASSES == 0 {
            if let Err(err) = self.detect_stuck_dispatches().await {
                tracing::error!(?err, "detect stuck dispatches failed");
            }
        }

        if iteration % GC_EVERY_N_PASSES == 0 {
            if let Err(err) = self.gc_old_dispatches().await {
                tracing::error!(?err, "gc old dispatches failed");
            }
        }

        Ok(())
    }

    /// Sub-task 1: due-job scan, dispatch insert, job advance — one
    /// transaction per job (spec §4.3).
    async fn dispatch_due_jobs(&self) -> Result<()> {
        let now = Utc::now();
        let due = self.store.list_due_jobs(now).await?;
        for job in due {
            let mut tx = self.store.begin().await?;
            let dispatch_id = self.store.insert_pending_dispatch(&mut tx, job.id, 0, now).await?;
            let advanced_next_run = next_run(&job, now);
            let dispatch_lock_until = now + chrono::Duration::from_std(self.config.dispatch_lock_duration).unwrap();
            self.store
                .mark_dispatched(&mut tx, job.id, advanced_next_run, now, dispatch_lock_until)
                .await?;
            tx.commit().await?;
            tracing::info!(job_id = job.id, dispatch_id, "dispatched due job");
        }
        Ok(())
    }

    /// Sub-task 2: delete registrations past the offline threshold.
    async fn reap_stale_workers(&self) -> Result<()> {
        let now = Utc::now();
        let reaped = self
            .store
            .reap_stale_workers(now, chrono::Duration::from_std(self.config.worker_offline_threshold).unwrap())
            .await?;
        if reaped > 0 {
            tracing::info!(reaped, "reaped stale worker registrations");
        }
        Ok(())
    }

    /// Sub-task 3: TIMEOUT any IN_PROGRESS dispatch whose claiming worker is
    /// gone, synthesize a log entry, and enqueue a retry under the cap.
    async fn detect_stuck_dispatches(&self) -> Result<()> {
        let now = Utc::now();
        let claimed_before = now - chrono::Duration::from_std(self.config.job_timeout_threshold).unwrap();
        let stuck = self.store.list_stuck_dispatches(claimed_before).await?;

        for dispatch in stuck {
            let worker_id = dispatch.worker_id.clone().unwrap_or_default();
            let message = format!("worker {worker_id} died during execution");
            self.store.mark_timeout(dispatch.id, now, &message).await?;

            let run_time = dispatch.claimed_at.unwrap_or(now);
            self.store
                .append_log(dispatch.job_id, run_time, LogStatus::Timeout, &truncate_error_message(&message))
                .await?;

            if dispatch.retry_count < self.config.max_retry_attempts as i32 {
                let mut tx = self.store.begin().await?;
                let retry_id = self
                    .store
                    .insert_pending_dispatch(&mut tx, dispatch.job_id, dispatch.retry_count + 1, now)
                    .await?;
                tx.commit().await?;
                tracing::warn!(
                    dispatch_id = dispatch.id,
                    retry_id,
                    retry_count = dispatch.retry_count + 1,
                    "stuck dispatch requeued"
                );
            } else {
                tracing::warn!(dispatch_id = dispatch.id, "stuck dispatch exhausted retries, giving up");
            }
        }
        Ok(())
    }

    /// Sub-task 4: delete terminal dispatches past the retention window.
    async fn gc_old_dispatches(&self) -> Result<()> {
        let now = Utc::now();
        let completed_before = now - chrono::Duration::days(self.config.cleanup_retention_days);
        let deleted = self.store.gc_old_dispatches(completed_before).await?;
        if deleted > 0 {
            tracing::info!(deleted, "garbage-collected old dispatches");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DispatchStatus, ScheduleType, ScheduledJob};
    use crate::store::memory_store;
    use std::time::Duration as StdDuration;

    fn test_config() -> Config {
        Config {
            db_url: "sqlite::memory:".into(),
            scheduler_poll_interval: StdDuration::from_secs(10),
            dispatch_lock_duration: StdDuration::from_secs(300),
            job_timeout_threshold: StdDuration::from_secs(600),
            max_retry_attempts: 3,
            cleanup_retention_days: 30,
            worker_offline_threshold: StdDuration::from_secs(180),
            worker_poll_interval: StdDuration::from_secs(5),
            worker_max_poll_interval: StdDuration::from_secs(60),
            worker_heartbeat_interval: StdDuration::from_secs(30),
            worker_job_timeout: StdDuration::from_secs(600),
            display_timezone: chrono_tz::Asia::Hong_Kong,
            scripts_dir: std::path::PathBuf::from("."),
            script_interpreter: "python3".into(),
        }
    }

    /// S1: interval job due now gets a PENDING dispatch and its `next_run`
    /// advances by ~interval_seconds.
    #[tokio::test]
    async fn dispatches_due_interval_job_and_advances_next_run() {
        let store = memory_store().await;
        let now = Utc::now();
        let job_id = store
            .insert_job(&ScheduledJob {
                id: 0,
                name: "interval-job".into(),
                script_path: "/scripts/job.py".into(),
                script_args: None,
                schedule_type: ScheduleType::Interval,
                interval_seconds: 30,
                schedule_time: "00:00".into(),
                schedule_day: None,
                is_active: true,
                next_run: Some(now - chrono::Duration::seconds(1)),
                last_dispatched_at: None,
                dispatch_lock_until: None,
            })
            .await
            .unwrap();

        let scheduler = SchedulerLoop::new(store.clone(), test_config());
        scheduler.run_once(1).await.unwrap();

        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert!(job.next_run.unwrap() > now);
        assert!(job.dispatch_lock_until.is_some());

        let due_again = store.list_due_jobs(now).await.unwrap();
        assert!(due_again.is_empty(), "job should be lock-excluded from immediate redispatch");
    }

    #[tokio::test]
    async fn respects_dispatch_lock_until() {
        let store = memory_store().await;
        let now = Utc::now();
        store
            .insert_job(&ScheduledJob {
                id: 0,
                name: "locked-job".into(),
                script_path: "/scripts/job.py".into(),
                script_args: None,
                schedule_type: ScheduleType::Interval,
                interval_seconds: 30,
                schedule_time: "00:00".into(),
                schedule_day: None,
                is_active: true,
                next_run: Some(now - chrono::Duration::seconds(1)),
                last_dispatched_at: None,
                dispatch_lock_until: Some(now + chrono::Duration::seconds(60)),
            })
            .await
            .unwrap();

        let due = store.list_due_jobs(now).await.unwrap();
        assert!(due.is_empty());
    }

    /// S5: a worker claims a dispatch, then goes silent; the scheduler
    /// marks it TIMEOUT, writes a log, and enqueues a retry.
    #[tokio::test]
    async fn stuck_dispatch_times_out_and_retries() {
        let store = memory_store().await;
        let now = Utc::now();
        let job_id = store
            .insert_job(&ScheduledJob {
                id: 0,
                name: "job".into(),
                script_path: "/scripts/job.py".into(),
                script_args: None,
                schedule_type: ScheduleType::Manual,
                interval_seconds: 30,
                schedule_time: "00:00".into(),
                schedule_day: None,
                is_active: true,
                next_run: None,
                last_dispatched_at: None,
                dispatch_lock_until: None,
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let dispatch_id = store.insert_pending_dispatch(&mut tx, job_id, 0, now).await.unwrap();
        tx.commit().await.unwrap();
        // Claim it with a worker that never registers a heartbeat row, then
        // let it age past JOB_TIMEOUT_THRESHOLD.
        store.try_claim_oldest_pending("ghost", now).await.unwrap();

        // Simulate elapsed time by shrinking JOB_TIMEOUT_THRESHOLD to zero
        // rather than sleeping in the test.
        let mut aged_config = test_config();
        aged_config.job_timeout_threshold = StdDuration::from_secs(0);
        let scheduler = SchedulerLoop::new(store.clone(), aged_config);
        scheduler.run_once(STUCK_DISPATCH_EVERY_N_PASSES).await.unwrap();

        let dispatch = store.get_dispatch(dispatch_id).await.unwrap().unwrap();
        assert_eq!(dispatch.status, DispatchStatus::Timeout);

        let logs = store.list_logs(job_id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Timeout);
    }
}
