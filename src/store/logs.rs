//! JobExecutionLog (spec §3 "JobExecutionLog", §4.4.4 reporting, §4.5
//! `ListLogs`).

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::clock::{dt_to_ms, ms_to_dt};
use crate::error::Result;
use crate::model::{JobExecutionLog, LogStatus};

use super::Store;

fn row_to_log(row: sqlx::any::AnyRow) -> Result<JobExecutionLog> {
    let status: String = row.try_get("status")?;
    Ok(JobExecutionLog {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        run_time: ms_to_dt(row.try_get("run_time")?),
        status: status.parse::<LogStatus>().unwrap_or(LogStatus::Error),
        log_output: row.try_get("log_output")?,
    })
}

impl Store {
    /// Appends a terminal-dispatch log entry. `run_time` must equal the
    /// dispatch's `claimed_at` (spec §3 invariant, §8 invariant 4).
    pub async fn append_log(
        &self,
        job_id: i64,
        run_time: DateTime<Utc>,
        status: LogStatus,
        log_output: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO job_execution_logs (job_id, run_time, status, log_output)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(job_id)
        .bind(dt_to_ms(run_time))
        .bind(status.to_string())
        .bind(log_output)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    /// Spec §4.5 `ListLogs(job_id, limit=50)`.
    pub async fn list_logs(&self, job_id: i64, limit: i64) -> Result<Vec<JobExecutionLog>> {
        let rows = sqlx::query(
            "SELECT * FROM job_execution_logs
             WHERE job_id = ?
             ORDER BY run_time DESC
             LIMIT ?",
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_log).collect()
    }

    /// Most recent log across all jobs, used by the Control Plane's
    /// "latest status badge" per job (spec §7).
    pub async fn latest_log_for_job(&self, job_id: i64) -> Result<Option<JobExecutionLog>> {
        Ok(self.list_logs(job_id, 1).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_store;

    #[tokio::test]
    async fn list_logs_orders_most_recent_first() {
        let store = memory_store().await;
        let job_id = 42;
        let t0 = Utc::now();
        store.append_log(job_id, t0, LogStatus::Success, "first").await.unwrap();
        store
            .append_log(job_id, t0 + chrono::Duration::seconds(10), LogStatus::Failure, "second")
            .await
            .unwrap();

        let logs = store.list_logs(job_id, 50).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].log_output, "second");
        assert_eq!(logs[1].log_output, "first");
    }

    #[tokio::test]
    async fn list_logs_respects_limit() {
        let store = memory_store().await;
        for i in 0..5 {
            store
                .append_log(7, Utc::now() + chrono::Duration::seconds(i), LogStatus::Success, "x")
                .await
                .unwrap();
        }
        let logs = store.list_logs(7, 3).await.unwrap();
        assert_eq!(logs.len(), 3);
    }
}
