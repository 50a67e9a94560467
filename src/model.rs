//! Data model: the four entities from spec §3, plus their status enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// `schedule_type` column of `scheduled_jobs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Interval,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Manual,
}

/// `status` column of `job_dispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum DispatchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Timeout,
}

impl DispatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchStatus::Completed | DispatchStatus::Failed | DispatchStatus::Timeout
        )
    }
}

/// `status` column of `job_execution_logs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    Success,
    Failure,
    Error,
    Timeout,
    Running,
}

/// `status` column of `worker_registration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

/// The user-declared trigger (spec §3 "ScheduledJob").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: i64,
    pub name: String,
    pub script_path: String,
    pub script_args: Option<String>,
    pub schedule_type: ScheduleType,
    pub interval_seconds: i64,
    /// HH:MM, stored in UTC. Unused (but present) for interval/manual.
    pub schedule_time: String,
    /// Weekday (0-6) for weekly, day-of-month (1-31) for monthly.
    pub schedule_day: Option<i32>,
    pub is_active: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_dispatched_at: Option<DateTime<Utc>>,
    pub dispatch_lock_until: Option<DateTime<Utc>>,
}

/// One row per live worker process (spec §3 "WorkerRegistration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub hostname: String,
    pub platform: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: WorkerStatus,
    pub jobs_processed: i64,
    pub current_job_id: Option<i64>,
    pub process_id: i64,
}

/// One row per attempt to run a job (spec §3 "JobDispatch").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDispatch {
    pub id: i64,
    pub job_id: i64,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: DispatchStatus,
    pub worker_id: Option<String>,
    pub retry_count: i32,
    pub error_message: Option<String>,
}

/// The append-only execution history (spec §3 "JobExecutionLog").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: i64,
    pub job_id: i64,
    pub run_time: DateTime<Utc>,
    pub status: LogStatus,
    pub log_output: String,
}

/// Truncates an error message to the 500-char cap spec §3 mandates for
/// `JobDispatch.error_message`.
pub fn truncate_error_message(message: &str) -> String {
    const MAX_LEN: usize = 500;
    if message.len() <= MAX_LEN {
        message.to_string()
    } else {
        // Respect char boundaries; `message` may contain multi-byte UTF-8.
        let mut end = MAX_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_messages_untouched() {
        assert_eq!(truncate_error_message("short"), "short");
    }

    #[test]
    fn truncate_caps_at_500_chars() {
        let long = "x".repeat(600);
        let truncated = truncate_error_message(&long);
        assert_eq!(truncated.len(), 500);
    }

    #[test]
    fn dispatch_status_terminal_classification() {
        assert!(DispatchStatus::Completed.is_terminal());
        assert!(DispatchStatus::Failed.is_terminal());
        assert!(DispatchStatus::Timeout.is_terminal());
        assert!(!DispatchStatus::Pending.is_terminal());
        assert!(!DispatchStatus::InProgress.is_terminal());
    }

    #[test]
    fn schedule_type_string_round_trips() {
        use std::str::FromStr;
        for kind in [
            ScheduleType::Interval,
            ScheduleType::Hourly,
            ScheduleType::Daily,
            ScheduleType::Weekly,
            ScheduleType::Monthly,
            ScheduleType::Manual,
        ] {
            let s = kind.to_string();
            assert_eq!(ScheduleType::from_str(&s).unwrap(), kind);
        }
    }
}
