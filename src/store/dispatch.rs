//! JobDispatch lifecycle (spec §3 "JobDispatch", §4.3 sub-tasks 1/3/4, §4.4.2
//! claim algorithm, §4.4.4 reporting).
//!
//! The claim algorithm is the direct generalization of
//! `postgres_runtime_repository.rs::upsert_lease`'s conditional-UPDATE +
//! `rows_affected` check: PENDING is this system's "queued", IN_PROGRESS is
//! its "leased", and the dispatch row itself is the mutex (spec §5).

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::clock::{dt_to_ms, ms_to_dt, opt_dt_to_ms, opt_ms_to_dt};
use crate::error::Result;
use crate::model::{DispatchStatus, JobDispatch, ScheduleType, ScheduledJob};

use super::Store;

fn row_to_dispatch(row: sqlx::any::AnyRow) -> Result<JobDispatch> {
    let status: String = row.try_get("status")?;
    Ok(JobDispatch {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        created_at: ms_to_dt(row.try_get("created_at")?),
        claimed_at: opt_ms_to_dt(row.try_get("claimed_at")?),
        completed_at: opt_ms_to_dt(row.try_get("completed_at")?),
        status: status.parse::<DispatchStatus>().unwrap_or(DispatchStatus::Pending),
        worker_id: row.try_get("worker_id")?,
        retry_count: row.try_get("retry_count")?,
        error_message: row.try_get("error_message")?,
    })
}

fn row_to_job(row: sqlx::any::AnyRow) -> Result<ScheduledJob> {
    let schedule_type: String = row.try_get("schedule_type")?;
    Ok(ScheduledJob {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        script_path: row.try_get("script_path")?,
        script_args: row.try_get("script_args")?,
        schedule_type: schedule_type.parse::<ScheduleType>().unwrap_or(ScheduleType::Manual),
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
    /// Inserts a PENDING dispatch inside the caller's transaction (spec
    /// §4.3 sub-task 1 and §4.3 sub-task 3's retry-row creation).
    pub async fn insert_pending_dispatch(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Any>,
        job_id: i64,
        retry_count: i32,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO job_dispatch (job_id, created_at, status, retry_count)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(job_id)
        .bind(dt_to_ms(created_at))
        .bind(DispatchStatus::Pending.to_string())
        .bind(retry_count)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.try_get("id")?)
    }

    /// Begins a transaction for the Scheduler's due-job dispatch pass (spec
    /// §4.3 sub-task 1: insert dispatch + advance job row in one commit).
    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Any>> {
        Ok(self.pool.begin().await?)
    }

    /// Spec §4.4.2 claim algorithm: select the oldest PENDING dispatch, then
    /// attempt the conditional UPDATE. Returns `None` if no PENDING rows
    /// exist, or if the UPDATE lost the race (`rows_affected == 0`) so the
    /// caller can immediately retry the SELECT per spec.
    pub async fn try_claim_oldest_pending(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(JobDispatch, ScheduledJob)>> {
        let candidate = sqlx::query("SELECT id FROM job_dispatch WHERE status = ? ORDER BY created_at ASC LIMIT 1")
            .bind(DispatchStatus::Pending.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(candidate) = candidate else {
            return Ok(None);
        };
        let dispatch_id: i64 = candidate.try_get("id")?;

        let result = sqlx::query(
            "UPDATE job_dispatch
             SET status = ?, worker_id = ?, claimed_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(DispatchStatus::InProgress.to_string())
        .bind(worker_id)
        .bind(dt_to_ms(now))
        .bind(dispatch_id)
        .bind(DispatchStatus::Pending.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Ok(None);
        }

        let dispatch_row = sqlx::query("SELECT * FROM job_dispatch WHERE id = ?")
            .bind(dispatch_id)
            .fetch_one(&self.pool)
            .await?;
        let dispatch = row_to_dispatch(dispatch_row)?;

        let job_row = sqlx::query("SELECT * FROM scheduled_jobs WHERE id = ?")
            .bind(dispatch.job_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(job_row) = job_row else {
            return Ok(None);
        };
        Ok(Some((dispatch, row_to_job(job_row)?)))
    }

    pub async fn get_dispatch(&self, dispatch_id: i64) -> Result<Option<JobDispatch>> {
        let row = sqlx::query("SELECT * FROM job_dispatch WHERE id = ?")
            .bind(dispatch_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_dispatch).transpose()
    }

    /// Spec §4.4.4 reporting: sets terminal status, `completed_at`, and
    /// `error_message`, in a fresh transaction separate from execution.
    pub async fn report_result(
        &self,
        dispatch_id: i64,
        status: DispatchStatus,
        completed_at: DateTime<Utc>,
        error_message: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE job_dispatch
             SET status = ?, completed_at = ?, error_message = ?
             WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(dt_to_ms(completed_at))
        .bind(error_message)
        .bind(dispatch_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Spec §4.3 sub-task 3: IN_PROGRESS dispatches claimed before
    /// `claimed_before` whose worker no longer appears in
    /// `worker_registration` (i.e. reaped or never heartbeat again).
    pub async fn list_stuck_dispatches(&self, claimed_before: DateTime<Utc>) -> Result<Vec<JobDispatch>> {
        let rows = sqlx::query(
            "SELECT d.* FROM job_dispatch d
             LEFT JOIN worker_registration w ON w.worker_id = d.worker_id
             WHERE d.status = ?
               AND d.claimed_at IS NOT NULL
               AND d.claimed_at < ?
               AND w.worker_id IS NULL",
        )
        .bind(DispatchStatus::InProgress.to_string())
        .bind(dt_to_ms(claimed_before))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_dispatch).collect()
    }

    /// Marks a stuck dispatch TIMEOUT (spec §4.3 sub-task 3, first bullet).
    pub async fn mark_timeout(&self, dispatch_id: i64, now: DateTime<Utc>, error_message: &str) -> Result<()> {
        self.report_result(
            dispatch_id,
            DispatchStatus::Timeout,
            now,
            Some(crate::model::truncate_error_message(error_message)),
        )
        .await
    }

    /// Spec §4.3 sub-task 4: delete terminal dispatches older than the
    /// retention window.
    pub async fn gc_old_dispatches(&self, completed_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM job_dispatch
             WHERE status IN (?, ?, ?) AND completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(DispatchStatus::Completed.to_string())
        .bind(DispatchStatus::Failed.to_string())
        .bind(DispatchStatus::Timeout.to_string())
        .bind(dt_to_ms(completed_before))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Spec §4.4.5 graceful shutdown: releases any dispatch this worker
    /// still holds IN_PROGRESS back to PENDING.
    pub async fn release_worker_claims(&self, worker_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE job_dispatch
             SET status = ?, worker_id = NULL, claimed_at = NULL
             WHERE worker_id = ? AND status = ?",
        )
        .bind(DispatchStatus::Pending.to_string())
        .bind(worker_id)
        .bind(DispatchStatus::InProgress.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Job ids with a non-terminal dispatch, split by status — feeds the
    /// Control Plane's per-job "Queued"/"Running" badge (spec §4.5, §7).
    pub async fn non_terminal_job_ids(&self) -> Result<Vec<(i64, DispatchStatus)>> {
        let rows = sqlx::query("SELECT job_id, status FROM job_dispatch WHERE status IN (?, ?)")
            .bind(DispatchStatus::Pending.to_string())
            .bind(DispatchStatus::InProgress.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let job_id: i64 = row.try_get("job_id")?;
                let status: String = row.try_get("status")?;
                Ok((job_id, status.parse::<DispatchStatus>().unwrap_or(DispatchStatus::Pending)))
            })
            .collect()
    }
}
