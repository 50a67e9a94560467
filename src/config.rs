//! Single configuration record for all three processes, loaded once from the
//! environment (spec §6, §9 "configuration sprawl via environment").

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TriggerError};

#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub scheduler_poll_interval: Duration,
    pub dispatch_lock_duration: Duration,
    pub job_timeout_threshold: Duration,
    pub max_retry_attempts: u32,
    pub cleanup_retention_days: i64,
    pub worker_offline_threshold: Duration,
    pub worker_poll_interval: Duration,
    pub worker_max_poll_interval: Duration,
    pub worker_heartbeat_interval: Duration,
    pub worker_job_timeout: Duration,
    pub display_timezone: chrono_tz::Tz,
    pub scripts_dir: PathBuf,
    /// Interpreter used to invoke `.py` scripts. The original Python worker
    /// reused `sys.executable`; a Rust worker has no equivalent, so this is
    /// configurable with a sensible default.
    pub script_interpreter: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_secs(name: &str, default: u64) -> Result<Duration> {
    let raw = env_or(name, &default.to_string());
    let secs: u64 = raw
        .parse()
        .map_err(|_| TriggerError::Config(format!("{name} must be a positive integer, got {raw:?}")))?;
    Ok(Duration::from_secs(secs))
}

fn parse_u32(name: &str, default: u32) -> Result<u32> {
    let raw = env_or(name, &default.to_string());
    raw.parse()
        .map_err(|_| TriggerError::Config(format!("{name} must be a non-negative integer, got {raw:?}")))
}

fn parse_i64(name: &str, default: i64) -> Result<i64> {
    let raw = env_or(name, &default.to_string());
    raw.parse()
        .map_err(|_| TriggerError::Config(format!("{name} must be an integer, got {raw:?}")))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let display_timezone_name = env_or("DISPLAY_TIMEZONE", "Asia/Hong_Kong");
        let display_timezone: chrono_tz::Tz = display_timezone_name.parse().map_err(|_| {
            TriggerError::Config(format!(
                "DISPLAY_TIMEZONE {display_timezone_name:?} is not a recognized IANA timezone"
            ))
        })?;

        let scripts_dir = PathBuf::from(env_or("SCRIPTS_DIR", "./scripts"));
        if !scripts_dir.exists() {
            return Err(TriggerError::Config(format!(
                "SCRIPTS_DIR {} does not exist",
                scripts_dir.display()
            )));
        }
        if !scripts_dir.is_dir() {
            return Err(TriggerError::Config(format!(
                "SCRIPTS_DIR {} is not a directory",
                scripts_dir.display()
            )));
        }

        let config = Config {
            db_url: env_or("DB_URL", "sqlite:///jobs.db"),
            scheduler_poll_interval: parse_secs("SCHEDULER_POLL_INTERVAL", 10)?,
            dispatch_lock_duration: parse_secs("DISPATCH_LOCK_DURATION", 300)?,
            job_timeout_threshold: parse_secs("JOB_TIMEOUT_THRESHOLD", 600)?,
            max_retry_attempts: parse_u32("MAX_RETRY_ATTEMPTS", 3)?,
            cleanup_retention_days: parse_i64("CLEANUP_RETENTION_DAYS", 30)?,
            worker_offline_threshold: parse_secs("WORKER_OFFLINE_THRESHOLD", 180)?,
            worker_poll_interval: parse_secs("WORKER_POLL_INTERVAL", 5)?,
            worker_max_poll_interval: parse_secs("WORKER_MAX_POLL_INTERVAL", 60)?,
            worker_heartbeat_interval: parse_secs("WORKER_HEARTBEAT_INTERVAL", 30)?,
            worker_job_timeout: parse_secs("WORKER_JOB_TIMEOUT", 600)?,
            display_timezone,
            scripts_dir,
            script_interpreter: env_or("SCRIPT_INTERPRETER", "python3"),
        };

        if config.dispatch_lock_duration >= config.job_timeout_threshold {
            tracing::warn!(
                dispatch_lock_duration = ?config.dispatch_lock_duration,
                job_timeout_threshold = ?config.job_timeout_threshold,
                "DISPATCH_LOCK_DURATION should be less than JOB_TIMEOUT_THRESHOLD (see spec §5)"
            );
        }
        if config.job_timeout_threshold <= config.worker_job_timeout {
            tracing::warn!(
                job_timeout_threshold = ?config.job_timeout_threshold,
                worker_job_timeout = ?config.worker_job_timeout,
                "JOB_TIMEOUT_THRESHOLD should exceed WORKER_JOB_TIMEOUT so the worker detects its own timeout first"
            );
        }

        Ok(config)
    }
}
