//! Relational store adapter (spec §3 entities, §6 schema).
//!
//! Generalizes `postgres_runtime_repository.rs`'s single-backend pool +
//! `ensure_schema` pattern to `sqlx::AnyPool` so the same query/bind code
//! runs against the default `sqlite:///jobs.db` and an optional Postgres
//! `DB_URL` without a second repository implementation. `Any` rewrites `?`
//! placeholders to each backend's native syntax; only `ensure_schema`'s DDL
//! branches on the concrete backend (autoincrement syntax differs). `Any`
//! itself only encodes/decodes `bool, i16, i32, i64, f32, f64, String,
//! Vec<u8>` (enabling sqlx's `chrono` feature adds `DateTime`/`NaiveDateTime`
//! support to the concrete Postgres/SQLite drivers, not to `Any`), so every
//! timestamp column here is `BIGINT` epoch-millis, converted at the edge via
//! `clock::{dt_to_ms, ms_to_dt}` — the same technique
//! `postgres_runtime_repository.rs::dt_to_ms`/`ms_to_dt` uses for its own
//! (single-backend) Postgres pool.

pub mod dispatch;
pub mod jobs;
pub mod logs;
pub mod workers;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::error::Result;

/// Which concrete backend `db_url` names. `sqlx::any::AnyKind`/`AnyPool::
/// any_kind()` were removed from the crate's public API in the 0.7 `Any`
/// rewrite, so the backend is read straight off the connection URL's scheme
/// instead of asking the pool — this only gates the DDL's autoincrement
/// syntax, never query binding (which stays backend-agnostic through `Any`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Backend {
    Postgres,
    Sqlite,
}

fn detect_backend(db_url: &str) -> Backend {
    if db_url.starts_with("postgres://") || db_url.starts_with("postgresql://") {
        Backend::Postgres
    } else {
        Backend::Sqlite
    }
}

#[derive(Clone)]
pub struct Store {
    pool: AnyPool,
    backend: Backend,
}

impl Store {
    /// Connects and idempotently bootstraps the schema. Called once at
    /// process start by each of the three binaries.
    pub async fn connect(db_url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?;
        let store = Self {
            pool,
            backend: detect_backend(db_url),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    fn autoincrement_pk(&self) -> &'static str {
        match self.backend {
            Backend::Postgres => "BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY",
            Backend::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pk = self.autoincrement_pk();

        let scheduled_jobs = format!(
            "CREATE TABLE IF NOT EXISTS scheduled_jobs (
                id {pk},
                name TEXT NOT NULL,
                script_path TEXT NOT NULL,
                script_args TEXT,
                interval_seconds BIGINT NOT NULL DEFAULT 60,
                schedule_type TEXT NOT NULL,
                schedule_time TEXT NOT NULL DEFAULT '00:00',
                schedule_day INTEGER,
                is_active BOOLEAN NOT NULL DEFAULT true,
                next_run BIGINT,
                last_dispatched_at BIGINT,
                dispatch_lock_until BIGINT
            )"
        );
        let worker_registration = "CREATE TABLE IF NOT EXISTS worker_registration (
            worker_id TEXT PRIMARY KEY,
            hostname TEXT NOT NULL,
            platform TEXT NOT NULL,
            started_at BIGINT NOT NULL,
            last_heartbeat BIGINT NOT NULL,
            status TEXT NOT NULL,
            jobs_processed BIGINT NOT NULL DEFAULT 0,
            current_job_id BIGINT,
            process_id BIGINT NOT NULL
        )"
        .to_string();
        let job_dispatch = format!(
            "CREATE TABLE IF NOT EXISTS job_dispatch (
                id {pk},
                job_id BIGINT NOT NULL,
                created_at BIGINT NOT NULL,
                claimed_at BIGINT,
                completed_at BIGINT,
                status TEXT NOT NULL,
                worker_id TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            )"
        );
        let job_execution_logs = format!(
            "CREATE TABLE IF NOT EXISTS job_execution_logs (
                id {pk},
                job_id BIGINT NOT NULL,
                run_time BIGINT NOT NULL,
                status TEXT NOT NULL,
                log_output TEXT NOT NULL
            )"
        );

        sqlx::query(&scheduled_jobs).execute(&self.pool).await?;
        sqlx::query(&worker_registration).execute(&self.pool).await?;
        sqlx::query(&job_dispatch).execute(&self.pool).await?;
        sqlx::query(&job_execution_logs).execute(&self.pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_name ON scheduled_jobs(name)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_dispatch_job_id ON job_dispatch(job_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_dispatch_created_at ON job_dispatch(created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_dispatch_claimed_at ON job_dispatch(claimed_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_dispatch_status ON job_dispatch(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_dispatch_worker_id ON job_dispatch(worker_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_execution_logs_job_id ON job_execution_logs(job_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> Store {
    Store::connect("sqlite::memory:").await.expect("in-memory sqlite store")
}
