//! Schedule engine: `next_run(job, now)` (spec §4.2).
//!
//! Ported from `original_source/app/utils.py::calculate_next_run`. Interval
//! drift is intentionally accepted: `next_run` advances from the dispatch
//! time, not from when execution finishes.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::model::{ScheduleType, ScheduledJob};

/// Parses `schedule_time` as `HH:MM`. Invalid strings default to `00:00`,
/// logged but non-fatal (spec §4.2 "Invalid schedule_time strings default
/// to 00:00, logged but non-fatal").
fn parse_hour_minute(schedule_time: &str, job_id: i64) -> (u32, u32) {
    match schedule_time.split_once(':') {
        Some((h, m)) => match (h.trim().parse::<u32>(), m.trim().parse::<u32>()) {
            (Ok(h), Ok(m)) if h <= 23 && m <= 59 => (h, m),
            _ => {
                tracing::warn!(job_id, schedule_time, "invalid schedule_time, defaulting to 00:00");
                (0, 0)
            }
        },
        None => {
            tracing::warn!(job_id, schedule_time, "invalid schedule_time, defaulting to 00:00");
            (0, 0)
        }
    }
}

/// Returns the last valid day-of-month for `year`/`month` (handles leap
/// years for February, per spec §8 scenario S6).
fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1).expect("valid month");
    first_of_next.pred_opt().expect("valid date").day()
}

/// Builds `now`'s date at `hour`:`minute`:00, clamping `day_of_month` into
/// the current month if it doesn't exist (spec §4.2 monthly clamp, §8 S6).
fn at_clamped_day(now: DateTime<Utc>, day_of_month: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    let clamped = day_of_month.min(last_day_of_month(now.year(), now.month()));
    let date = chrono::NaiveDate::from_ymd_opt(now.year(), now.month(), clamped).expect("clamped date is valid");
    Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0).expect("valid time"))
}

/// Advances `now`'s date by one calendar month, re-clamping `day_of_month`
/// into the new month.
fn next_month_clamped(now: DateTime<Utc>, day_of_month: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let clamped = day_of_month.min(last_day_of_month(year, month));
    let date = chrono::NaiveDate::from_ymd_opt(year, month, clamped).expect("clamped date is valid");
    Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0).expect("valid time"))
}

/// Computes the strictly-in-the-future UTC timestamp at which `job` should
/// next fire, or `None` for `manual`. Equality with `now` counts as past
/// (spec §4.2 tie-break: strict `>` future).
pub fn next_run(job: &ScheduledJob, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match job.schedule_type {
        ScheduleType::Manual => None,
        ScheduleType::Interval => Some(now + Duration::seconds(job.interval_seconds.max(1))),
        ScheduleType::Hourly => {
            let (_, minute) = parse_hour_minute(&job.schedule_time, job.id);
            let mut candidate = now
                .with_minute(minute)
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(now);
            if candidate <= now {
                candidate += Duration::hours(1);
            }
            Some(candidate)
        }
        ScheduleType::Daily => {
            let (hour, minute) = parse_hour_minute(&job.schedule_time, job.id);
            let mut candidate = at_clamped_day(now, now.day(), hour, minute);
            if candidate <= now {
                candidate += Duration::days(1);
            }
            Some(candidate)
        }
        ScheduleType::Weekly => {
            let (hour, minute) = parse_hour_minute(&job.schedule_time, job.id);
            let target_weekday = job.schedule_day.unwrap_or(0).clamp(0, 6);
            let current_weekday = now.weekday().num_days_from_monday() as i32;
            let days_ahead = target_weekday - current_weekday;
            let mut candidate = at_clamped_day(now, now.day(), hour, minute) + Duration::days(days_ahead as i64);
            if candidate <= now {
                candidate += Duration::weeks(1);
            }
            Some(candidate)
        }
        ScheduleType::Monthly => {
            let (hour, minute) = parse_hour_minute(&job.schedule_time, job.id);
            let target_day = job.schedule_day.unwrap_or(1).clamp(1, 31) as u32;
            let mut candidate = at_clamped_day(now, target_day, hour, minute);
            if candidate <= now {
                candidate = next_month_clamped(now, target_day, hour, minute);
            }
            Some(candidate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_job(schedule_type: ScheduleType) -> ScheduledJob {
        ScheduledJob {
            id: 1,
            name: "test".into(),
            script_path: "/scripts/test.py".into(),
            script_args: None,
            schedule_type,
            interval_seconds: 30,
            schedule_time: "00:00".into(),
            schedule_day: None,
            is_active: true,
            next_run: None,
            last_dispatched_at: None,
            dispatch_lock_until: None,
        }
    }

    #[test]
    fn manual_never_reschedules() {
        let job = base_job(ScheduleType::Manual);
        assert_eq!(next_run(&job, Utc::now()), None);
    }

    #[test]
    fn interval_adds_seconds_s1() {
        // S1: interval_seconds=30, now=T+1s -> new next_run ~= now + 30s.
        let mut job = base_job(ScheduleType::Interval);
        job.interval_seconds = 30;
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 1).unwrap();
        let run = next_run(&job, now).unwrap();
        assert_eq!(run, now + Duration::seconds(30));
    }

    #[test]
    fn hourly_rolls_to_next_hour_when_past() {
        let mut job = base_job(ScheduleType::Hourly);
        job.schedule_time = "00:15".into();
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 30, 0).unwrap();
        let run = next_run(&job, now).unwrap();
        assert_eq!(run, Utc.with_ymd_and_hms(2026, 7, 27, 11, 15, 0).unwrap());
    }

    #[test]
    fn hourly_same_hour_when_future() {
        let mut job = base_job(ScheduleType::Hourly);
        job.schedule_time = "00:45".into();
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 30, 0).unwrap();
        let run = next_run(&job, now).unwrap();
        assert_eq!(run, Utc.with_ymd_and_hms(2026, 7, 27, 10, 45, 0).unwrap());
    }

    #[test]
    fn daily_rolls_to_tomorrow_when_past() {
        let mut job = base_job(ScheduleType::Daily);
        job.schedule_time = "09:00".into();
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let run = next_run(&job, now).unwrap();
        assert_eq!(run, Utc.with_ymd_and_hms(2026, 7, 28, 9, 0, 0).unwrap());
    }

    #[test]
    fn weekly_shifts_to_target_weekday() {
        let mut job = base_job(ScheduleType::Weekly);
        job.schedule_time = "12:00".into();
        job.schedule_day = Some(4); // Friday
        // 2026-07-27 is a Monday.
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 8, 0, 0).unwrap();
        let run = next_run(&job, now).unwrap();
        assert_eq!(run, Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap());
    }

    #[test]
    fn monthly_clamp_feb_31_to_28_s6() {
        // S6: schedule_day=31 evaluated on Feb 15 (non-leap year 2026) ->
        // clamps to Feb 28.
        let mut job = base_job(ScheduleType::Monthly);
        job.schedule_time = "06:00".into();
        job.schedule_day = Some(31);
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
        let run = next_run(&job, now).unwrap();
        assert_eq!(run, Utc.with_ymd_and_hms(2026, 2, 28, 6, 0, 0).unwrap());
    }

    #[test]
    fn monthly_clamp_leap_year_feb_29() {
        let mut job = base_job(ScheduleType::Monthly);
        job.schedule_time = "06:00".into();
        job.schedule_day = Some(31);
        let now = Utc.with_ymd_and_hms(2028, 2, 15, 0, 0, 0).unwrap();
        let run = next_run(&job, now).unwrap();
        assert_eq!(run, Utc.with_ymd_and_hms(2028, 2, 29, 6, 0, 0).unwrap());
    }

    #[test]
    fn monthly_advances_to_next_month_when_day_passed() {
        let mut job = base_job(ScheduleType::Monthly);
        job.schedule_time = "06:00".into();
        job.schedule_day = Some(15);
        let now = Utc.with_ymd_and_hms(2026, 3, 20, 0, 0, 0).unwrap();
        let run = next_run(&job, now).unwrap();
        assert_eq!(run, Utc.with_ymd_and_hms(2026, 4, 15, 6, 0, 0).unwrap());
    }

    #[test]
    fn equality_with_now_counts_as_past() {
        let mut job = base_job(ScheduleType::Daily);
        job.schedule_time = "10:00".into();
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let run = next_run(&job, now).unwrap();
        assert!(run > now);
        assert_eq!(run, Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap());
    }

    #[test]
    fn invalid_schedule_time_defaults_to_midnight() {
        let mut job = base_job(ScheduleType::Daily);
        job.schedule_time = "garbage".into();
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let run = next_run(&job, now).unwrap();
        assert_eq!(run, Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap());
    }
}
