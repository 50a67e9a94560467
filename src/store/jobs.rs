//! CRUD and due-job scan over `scheduled_jobs` (spec §3 "ScheduledJob",
//! §4.3 sub-task 1, §4.5 Control Plane operations).

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::clock::{opt_dt_to_ms, opt_ms_to_dt};
use crate::error::Result;
use crate::model::{ScheduleType, ScheduledJob};

use super::Store;

fn row_to_job(row: sqlx::any::AnyRow) -> Result<ScheduledJob> {
    let schedule_type: String = row.try_get("schedule_type")?;
    Ok(ScheduledJob {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        script_path: row.try_get("script_path")?,
        script_args: row.try_get("script_args")?,
        schedule_type: schedule_type
            .parse::<ScheduleType>()
            .unwrap_or(ScheduleType::Manual),
        interval_seconds: row.try_get("interval_seconds")?,
        schedule_time: row.try_get("schedule_time")?,
        schedule_day: row.try_get("schedule_day")?,
        is_active: row.try_get("is_active")?,
        next_run: opt_ms_to_dt(row.try_get("next_run")?),
        last_dispatched_at: opt_ms_to_dt(row.try_get("last_dispatched_at")?),
        dispatch_lock_until: opt_ms_to_dt(row.try_get("dispatch_lock_until")?),
    })
}

impl Store {
    pub async fn insert_job(&self, job: &ScheduledJob) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO scheduled_jobs
                (name, script_path, script_args, interval_seconds, schedule_type,
                 schedule_time, schedule_day, is_active, next_run, last_dispatched_at,
                 dispatch_lock_until)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&job.name)
        .bind(&job.script_path)
        .bind(&job.script_args)
        .bind(job.interval_seconds)
        .bind(job.schedule_type.to_string())
        .bind(&job.schedule_time)
        .bind(job.schedule_day)
        .bind(job.is_active)
        .bind(opt_dt_to_ms(job.next_run))
        .bind(opt_dt_to_ms(job.last_dispatched_at))
        .bind(opt_dt_to_ms(job.dispatch_lock_until))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<ScheduledJob>> {
        let row = sqlx::query("SELECT * FROM scheduled_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job).transpose()
    }

    /// Spec §4.5 `ListJobs(search?)`: all jobs, optionally filtered by a
    /// case-insensitive substring on `name`, ordered by id ascending.
    pub async fn list_jobs(&self, search: Option<&str>) -> Result<Vec<ScheduledJob>> {
        let rows = match search {
            Some(term) => {
                let pattern = format!("%{}%", term.to_lowercase());
                sqlx::query("SELECT * FROM scheduled_jobs WHERE LOWER(name) LIKE ? ORDER BY id ASC")
                    .bind(pattern)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM scheduled_jobs ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(row_to_job).collect()
    }

    /// Due jobs for spec §4.3 sub-task 1: active, non-null `next_run` at or
    /// before `now`, with no live dispatch lock.
    pub async fn list_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query(
            "SELECT * FROM scheduled_jobs
             WHERE is_active = ?
               AND next_run IS NOT NULL
               AND next_run <= ?
               AND (dispatch_lock_until IS NULL OR dispatch_lock_until < ?)
             ORDER BY id ASC",
        )
        .bind(true)
        .bind(crate::clock::dt_to_ms(now))
        .bind(crate::clock::dt_to_ms(now))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    /// Advances `next_run`/`last_dispatched_at`/`dispatch_lock_until` in the
    /// same transaction the caller uses to insert the PENDING dispatch
    /// (spec §4.3 sub-task 1).
    pub async fn mark_dispatched(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Any>,
        job_id: i64,
        next_run: Option<DateTime<Utc>>,
        dispatched_at: DateTime<Utc>,
        dispatch_lock_until: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_jobs
             SET next_run = ?, last_dispatched_at = ?, dispatch_lock_until = ?
             WHERE id = ?",
        )
        .bind(opt_dt_to_ms(next_run))
        .bind(crate::clock::dt_to_ms(dispatched_at))
        .bind(crate::clock::dt_to_ms(dispatch_lock_until))
        .bind(job_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Spec §4.5 `ToggleActive`: flips `is_active`; resets `next_run = now`
    /// when the job transitions to active.
    pub async fn toggle_active(&self, job_id: i64, now: DateTime<Utc>) -> Result<ScheduledJob> {
        let job = self
            .get_job(job_id)
            .await?
            .ok_or(crate::error::TriggerError::JobNotFound(job_id))?;
        let new_active = !job.is_active;
        if new_active {
            sqlx::query("UPDATE scheduled_jobs SET is_active = ?, next_run = ? WHERE id = ?")
                .bind(new_active)
                .bind(crate::clock::dt_to_ms(now))
                .bind(job_id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE scheduled_jobs SET is_active = ? WHERE id = ?")
                .bind(new_active)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
        }
        self.get_job(job_id)
            .await?
            .ok_or(crate::error::TriggerError::JobNotFound(job_id))
    }

    /// Spec §4.5 `RunNow`: sets `next_run = now`. Callers must reject
    /// inactive jobs before calling (spec: "No-op error if the job is
    /// inactive").
    pub async fn run_now(&self, job_id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET next_run = ? WHERE id = ?")
            .bind(crate::clock::dt_to_ms(now))
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Spec §4.5 `DeleteJob`: logs then job, in one transaction (cascade).
    pub async fn delete_job(&self, job_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM job_execution_logs WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM job_dispatch WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM scheduled_jobs WHERE id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
