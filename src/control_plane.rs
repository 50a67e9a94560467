//! Control Plane (spec §4.5): job CRUD, log queries, worker status read
//! model. Ported from `original_source/app/state.py`'s `load_jobs`,
//! `add_job`, `run_job_now`, `toggle_job_status`, `delete_job`,
//! `load_logs`, `load_workers`, generalized off Reflex state fields into a
//! plain store-backed service with typed DTOs (spec §9 "dynamic dict-typed
//! rows on the wire" redesign flag).

use chrono::Utc;
use serde::Serialize;

use crate::clock::to_display;
use crate::config::Config;
use crate::error::{Result, TriggerError};
use crate::model::{DispatchStatus, JobExecutionLog, ScheduleType, ScheduledJob, WorkerRegistration};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: ScheduledJob,
    pub formatted_interval: String,
    pub is_queued: bool,
    pub is_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatusView {
    pub active_workers_count: usize,
    pub primary: Option<WorkerRegistration>,
}

pub struct NewJob {
    pub name: String,
    pub script_path: String,
    pub script_args: Option<String>,
    pub schedule_type: ScheduleType,
    pub interval_seconds: i64,
    /// HH:MM in the display timezone; converted to UTC storage on insert.
    pub schedule_time: String,
    /// Weekday/day-of-month in the display timezone.
    pub schedule_day: Option<i32>,
}

pub struct ControlPlane {
    store: Store,
    config: Config,
}

impl ControlPlane {
    pub fn new(store: Store, config: Config) -> Self {
        Self { store, config }
    }

    /// Spec §4.5 `ListJobs(search?)`.
    pub async fn list_jobs(&self, search: Option<&str>) -> Result<Vec<JobView>> {
        let jobs = self.store.list_jobs(search).await?;
        let non_terminal = self.store.non_terminal_job_ids().await?;

        let mut views = Vec::with_capacity(jobs.len());
        for job in jobs {
            let (is_queued, is_running) = non_terminal
                .iter()
                .filter(|(job_id, _)| *job_id == job.id)
                .fold((false, false), |(q, r), (_, status)| match status {
                    DispatchStatus::Pending => (true, r),
                    DispatchStatus::InProgress => (q, true),
                    _ => (q, r),
                });
            let formatted_interval = self.format_interval(&job);
            views.push(JobView {
                job,
                formatted_interval,
                is_queued,
                is_running,
            });
        }
        Ok(views)
    }

    fn format_interval(&self, job: &ScheduledJob) -> String {
        match job.schedule_type {
            ScheduleType::Interval => format!("Every {}", format_duration_seconds(job.interval_seconds)),
            ScheduleType::Hourly => {
                let minute = job.schedule_time.split_once(':').map(|(_, m)| m).unwrap_or("00");
                format!("Every hour at :{minute}")
            }
            ScheduleType::Daily => {
                let (time, _) = to_display(ScheduleType::Daily, &job.schedule_time, None, self.config.display_timezone);
                format!("Daily at {time} ({})", self.config.display_timezone)
            }
            ScheduleType::Weekly => {
                let (time, day) = to_display(
                    ScheduleType::Weekly,
                    &job.schedule_time,
                    job.schedule_day,
                    self.config.display_timezone,
                );
                format!("Every {} at {time} ({})", weekday_name(day), self.config.display_timezone)
            }
            ScheduleType::Monthly => {
                let (time, day) = to_display(
                    ScheduleType::Monthly,
                    &job.schedule_time,
                    job.schedule_day,
                    self.config.display_timezone,
                );
                format!("Monthly on day {} at {time} ({})", day.unwrap_or(1), self.config.display_timezone)
            }
            ScheduleType::Manual => "Manual (Run on Demand)".to_string(),
        }
    }

    /// Spec §4.5 `CreateJob`: validates name, script existence within
    /// `SCRIPTS_DIR`, and schedule fields; inserts with `next_run = now`
    /// for everything except manual (spec §9 open question resolution).
    pub async fn create_job(&self, new_job: NewJob) -> Result<ScheduledJob> {
        if new_job.name.trim().is_empty() {
            return Err(TriggerError::InvalidInput("name must not be empty".to_string()));
        }

        let resolved_path = self.config.scripts_dir.join(
            std::path::Path::new(&new_job.script_path)
                .file_name()
                .ok_or_else(|| TriggerError::InvalidInput("script_path has no filename".to_string()))?,
        );
        if !resolved_path.exists() {
            return Err(TriggerError::ScriptNotFound(resolved_path.display().to_string()));
        }

        match new_job.schedule_type {
            ScheduleType::Interval if new_job.interval_seconds < 1 => {
                return Err(TriggerError::InvalidInput("interval_seconds must be >= 1".to_string()));
            }
            ScheduleType::Weekly => {
                if !matches!(new_job.schedule_day, Some(0..=6)) {
                    return Err(TriggerError::InvalidInput("schedule_day must be 0-6 for weekly".to_string()));
                }
            }
            ScheduleType::Monthly => {
                if !matches!(new_job.schedule_day, Some(1..=31)) {
                    return Err(TriggerError::InvalidInput("schedule_day must be 1-31 for monthly".to_string()));
                }
            }
            _ => {}
        }

        let (stored_time, stored_day) = to_display_inverse(&new_job, self.config.display_timezone);

        let now = Utc::now();
        let next_run = match new_job.schedule_type {
            ScheduleType::Manual => None,
            _ => Some(now),
        };

        let job = ScheduledJob {
            id: 0,
            name: new_job.name,
            script_path: resolved_path.display().to_string(),
            script_args: new_job.script_args,
            schedule_type: new_job.schedule_type,
            interval_seconds: new_job.interval_seconds,
            schedule_time: stored_time,
            schedule_day: stored_day,
            is_active: true,
            next_run,
            last_dispatched_at: None,
            dispatch_lock_until: None,
        };
        let id = self.store.insert_job(&job).await?;
        self.store
            .get_job(id)
            .await?
            .ok_or(TriggerError::JobNotFound(id))
    }

    /// Spec §4.5 `ToggleActive`.
    pub async fn toggle_active(&self, job_id: i64) -> Result<ScheduledJob> {
        self.store.toggle_active(job_id, Utc::now()).await
    }

    /// Spec §4.5 `RunNow`: no-op error if inactive.
    pub async fn run_now(&self, job_id: i64) -> Result<()> {
        let job = self.store.get_job(job_id).await?.ok_or(TriggerError::JobNotFound(job_id))?;
        if !job.is_active {
            return Err(TriggerError::JobInactive(job_id));
        }
        self.store.run_now(job_id, Utc::now()).await
    }

    /// Spec §4.5 `DeleteJob`.
    pub async fn delete_job(&self, job_id: i64) -> Result<()> {
        self.store.delete_job(job_id).await
    }

    /// Spec §4.5 `ListLogs(job_id, limit=50)`.
    pub async fn list_logs(&self, job_id: i64, limit: i64) -> Result<Vec<JobExecutionLog>> {
        self.store.list_logs(job_id, limit.max(1)).await
    }

    /// Spec §4.5 `WorkerStatus()`: live rows only; the "primary" is the one
    /// with maximum `jobs_processed`.
    pub async fn worker_status(&self) -> Result<WorkerStatusView> {
        let workers = self
            .store
            .list_live_workers(Utc::now(), chrono::Duration::from_std(self.config.worker_offline_threshold).unwrap())
            .await?;
        let primary = workers.iter().max_by_key(|w| w.jobs_processed).cloned();
        Ok(WorkerStatusView {
            active_workers_count: workers.len(),
            primary,
        })
    }
}

/// Display-zone schedule fields (as entered by the caller) into their UTC
/// storage representation (spec §9 "exactly two call sites": this is the
/// inbound one).
fn to_display_inverse(new_job: &NewJob, display_tz: chrono_tz::Tz) -> (String, Option<i32>) {
    crate::clock::to_storage(new_job.schedule_type, &new_job.schedule_time, new_job.schedule_day, display_tz)
}

fn weekday_name(day: Option<i32>) -> &'static str {
    match day {
        Some(0) => "Monday",
        Some(1) => "Tuesday",
        Some(2) => "Wednesday",
        Some(3) => "Thursday",
        Some(4) => "Friday",
        Some(5) => "Saturday",
        Some(6) => "Sunday",
        _ => "Unknown Day",
    }
}

fn format_duration_seconds(seconds: i64) -> String {
    if seconds >= 86_400 && seconds % 86_400 == 0 {
        let v = seconds / 86_400;
        format!("{v} Day{}", if v == 1 { "" } else { "s" })
    } else if seconds >= 3_600 && seconds % 3_600 == 0 {
        let v = seconds / 3_600;
        format!("{v} Hour{}", if v == 1 { "" } else { "s" })
    } else if seconds >= 60 && seconds % 60 == 0 {
        let v = seconds / 60;
        format!("{v} Minute{}", if v == 1 { "" } else { "s" })
    } else {
        format!("{seconds} Second{}", if seconds == 1 { "" } else { "s" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_store;
    use std::time::Duration as StdDuration;

    fn test_config(scripts_dir: std::path::PathBuf) -> Config {
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
            scripts_dir,
            script_interpreter: "python3".into(),
        }
    }

    #[tokio::test]
    async fn create_job_rejects_missing_script() {
        let store = memory_store().await;
        let dir = std::env::temp_dir().join("triggerd-control-plane-tests-missing");
        std::fs::create_dir_all(&dir).unwrap();
        let cp = ControlPlane::new(store, test_config(dir));

        let err = cp
            .create_job(NewJob {
                name: "job".into(),
                script_path: "does-not-exist.py".into(),
                script_args: None,
                schedule_type: ScheduleType::Manual,
                interval_seconds: 60,
                schedule_time: "00:00".into(),
                schedule_day: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::ScriptNotFound(_)));
    }

    #[tokio::test]
    async fn create_job_stores_daily_time_in_utc_s2() {
        let store = memory_store().await;
        let dir = std::env::temp_dir().join("triggerd-control-plane-tests-s2");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("job.py"), "# test").unwrap();
        let cp = ControlPlane::new(store, test_config(dir));

        let job = cp
            .create_job(NewJob {
                name: "daily-job".into(),
                script_path: "job.py".into(),
                script_args: None,
                schedule_type: ScheduleType::Daily,
                interval_seconds: 60,
                schedule_time: "09:00".into(),
                schedule_day: None,
            })
            .await
            .unwrap();
        assert_eq!(job.schedule_time, "01:00");
        assert!(job.next_run.is_some());
    }

    #[tokio::test]
    async fn run_now_rejects_inactive_job() {
        let store = memory_store().await;
        let dir = std::env::temp_dir().join("triggerd-control-plane-tests-inactive");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("job.py"), "# test").unwrap();
        let cp = ControlPlane::new(store.clone(), test_config(dir));

        let job = cp
            .create_job(NewJob {
                name: "toggle-me".into(),
                script_path: "job.py".into(),
                script_args: None,
                schedule_type: ScheduleType::Manual,
                interval_seconds: 60,
                schedule_time: "00:00".into(),
                schedule_day: None,
            })
            .await
            .unwrap();
        cp.toggle_active(job.id).await.unwrap();

        let err = cp.run_now(job.id).await.unwrap_err();
        assert!(matches!(err, TriggerError::JobInactive(_)));
    }
}
