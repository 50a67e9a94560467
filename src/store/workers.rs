//! WorkerRegistration lifecycle (spec §3 "WorkerRegistration", §4.4.1
//! registration/heartbeat, §4.3 sub-task 2 reaping).

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::clock::{dt_to_ms, ms_to_dt};
use crate::error::Result;
use crate::model::{WorkerRegistration, WorkerStatus};

use super::Store;

fn row_to_worker(row: sqlx::any::AnyRow) -> Result<WorkerRegistration> {
    let status: String = row.try_get("status")?;
    Ok(WorkerRegistration {
        worker_id: row.try_get("worker_id")?,
        hostname: row.try_get("hostname")?,
        platform: row.try_get("platform")?,
        started_at: ms_to_dt(row.try_get("started_at")?),
        last_heartbeat: ms_to_dt(row.try_get("last_heartbeat")?),
        status: status.parse::<WorkerStatus>().unwrap_or(WorkerStatus::Offline),
        jobs_processed: row.try_get("jobs_processed")?,
        current_job_id: row.try_get("current_job_id")?,
        process_id: row.try_get("process_id")?,
    })
}

impl Store {
    /// Spec §4.4.1: "upsert ... (delete-then-insert on collision)". Used
    /// both at process start and if a heartbeat finds its row has vanished.
    pub async fn register_worker(&self, worker: &WorkerRegistration) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM worker_registration WHERE worker_id = ?")
            .bind(&worker.worker_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO worker_registration
                (worker_id, hostname, platform, started_at, last_heartbeat, status,
                 jobs_processed, current_job_id, process_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&worker.worker_id)
        .bind(&worker.hostname)
        .bind(&worker.platform)
        .bind(dt_to_ms(worker.started_at))
        .bind(dt_to_ms(worker.last_heartbeat))
        .bind(worker.status.to_string())
        .bind(worker.jobs_processed)
        .bind(worker.current_job_id)
        .bind(worker.process_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Returns `false` if the row was missing (reaped), signaling the
    /// caller to re-register (spec §4.4.1).
    pub async fn update_heartbeat(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        status: WorkerStatus,
        current_job_id: Option<i64>,
        jobs_processed: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE worker_registration
             SET last_heartbeat = ?, status = ?, current_job_id = ?, jobs_processed = ?
             WHERE worker_id = ?",
        )
        .bind(dt_to_ms(now))
        .bind(status.to_string())
        .bind(current_job_id)
        .bind(jobs_processed)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_worker(&self, worker_id: &str) -> Result<Option<WorkerRegistration>> {
        let row = sqlx::query("SELECT * FROM worker_registration WHERE worker_id = ?")
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_worker).transpose()
    }

    /// Spec §4.5 `WorkerStatus()`: live rows only (within the offline
    /// threshold); callers compute the "primary" by max `jobs_processed`.
    pub async fn list_live_workers(&self, now: DateTime<Utc>, offline_threshold: chrono::Duration) -> Result<Vec<WorkerRegistration>> {
        let cutoff = now - offline_threshold;
        let rows = sqlx::query("SELECT * FROM worker_registration WHERE last_heartbeat >= ? ORDER BY worker_id ASC")
            .bind(dt_to_ms(cutoff))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_worker).collect()
    }

    /// Spec §4.3 sub-task 2: delete rows past the offline threshold.
    pub async fn reap_stale_workers(&self, now: DateTime<Utc>, offline_threshold: chrono::Duration) -> Result<u64> {
        let cutoff = now - offline_threshold;
        let result = sqlx::query("DELETE FROM worker_registration WHERE last_heartbeat < ?")
            .bind(dt_to_ms(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Spec §4.4.5 graceful shutdown: deletes this worker's own row after
    /// releasing its claims.
    pub async fn deregister_worker(&self, worker_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM worker_registration WHERE worker_id = ?")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_store;

    fn sample_worker(id: &str, last_heartbeat: DateTime<Utc>) -> WorkerRegistration {
        WorkerRegistration {
            worker_id: id.to_string(),
            hostname: "host-a".into(),
            platform: "linux".into(),
            started_at: last_heartbeat,
            last_heartbeat,
            status: WorkerStatus::Idle,
            jobs_processed: 0,
            current_job_id: None,
            process_id: 1234,
        }
    }

    #[tokio::test]
    async fn register_then_reregister_replaces_row() {
        let store = memory_store().await;
        // Truncate to millisecond precision up front since storage round-trips
        // through `BIGINT` epoch-millis (see `clock::dt_to_ms`/`ms_to_dt`).
        let now = crate::clock::ms_to_dt(crate::clock::dt_to_ms(Utc::now()));
        store.register_worker(&sample_worker("worker-abc", now)).await.unwrap();
        store
            .register_worker(&sample_worker("worker-abc", now + chrono::Duration::seconds(5)))
            .await
            .unwrap();

        let worker = store.get_worker("worker-abc").await.unwrap().unwrap();
        assert_eq!(worker.last_heartbeat, now + chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn reap_stale_workers_deletes_past_offline_threshold() {
        let store = memory_store().await;
        let now = Utc::now();
        store
            .register_worker(&sample_worker("stale", now - chrono::Duration::seconds(200)))
            .await
            .unwrap();
        store.register_worker(&sample_worker("fresh", now)).await.unwrap();

        let reaped = store
            .reap_stale_workers(now, chrono::Duration::seconds(180))
            .await
            .unwrap();
        assert_eq!(reaped, 1);
        assert!(store.get_worker("stale").await.unwrap().is_none());
        assert!(store.get_worker("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_heartbeat_reports_missing_row() {
        let store = memory_store().await;
        let found = store
            .update_heartbeat("nonexistent", Utc::now(), WorkerStatus::Idle, None, 0)
            .await
            .unwrap();
        assert!(!found);
    }
}
