//! Clock & Timezone utility (spec §4.1).
//!
//! The system stores and reasons in UTC; users enter schedule times in a
//! fixed display timezone (`Asia/Hong_Kong` by default, no DST). `to_storage`
//! and `to_display` anchor a wall-clock HH:MM (and optional weekday/
//! day-of-month) to a synthetic reference date, localize it in the relevant
//! zone, and convert to the other. Ported 1:1 from
//! `original_source/app/utils.py`'s `hkt_to_utc_schedule`/
//! `utc_to_hkt_schedule`, generalized from a hardcoded HKT constant to any
//! `chrono_tz::Tz` display zone.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::model::ScheduleType;

/// The synthetic reference date both conversions anchor to. Only the
/// weekday/day-of-month shift introduced by timezone conversion matters;
/// the specific year/month is arbitrary but must be shared by both
/// directions so round-trips are exact.
const REFERENCE_YEAR: i32 = 2024;
const REFERENCE_MONTH: u32 = 1;

fn parse_hhmm(time_str: &str) -> Option<(u32, u32)> {
    let (h, m) = time_str.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some((h, m))
}

fn anchor_date(kind: ScheduleType, day: Option<i32>) -> Option<NaiveDate> {
    let day_of_month = match kind {
        ScheduleType::Daily => 1,
        ScheduleType::Weekly => 1 + day.unwrap_or(0),
        ScheduleType::Monthly => day.unwrap_or(1),
        ScheduleType::Interval | ScheduleType::Hourly | ScheduleType::Manual => return None,
    };
    NaiveDate::from_ymd_opt(REFERENCE_YEAR, REFERENCE_MONTH, day_of_month as u32)
}

/// Coerces a naive datetime (as produced by backends that erase timezone
/// info on read, e.g. SQLite) into a timezone-aware UTC datetime. A
/// datetime that is already UTC-aware is returned unchanged by virtue of
/// `DateTime<Utc>`'s type; this function exists for the naive→aware edge.
pub fn ensure_utc_aware(naive: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

/// `sqlx`'s `Any` driver (the store's pool type) only encodes/decodes
/// `bool, i16, i32, i64, f32, f64, String, Vec<u8>` — no `DateTime<Utc>` —
/// so every timestamp column is stored as milliseconds since the epoch and
/// converted at the store boundary, the same way
/// `postgres_runtime_repository.rs::dt_to_ms`/`ms_to_dt` do it.
pub fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

pub fn opt_dt_to_ms(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(dt_to_ms)
}

pub fn opt_ms_to_dt(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(ms_to_dt)
}

/// Converts a display-zone (HKT by default) wall-clock time into its UTC
/// storage representation. Identity for interval/hourly/manual schedules.
/// Invalid/unparseable `time_str` is returned unchanged, matching the
/// original's tolerant behavior.
pub fn to_storage(
    kind: ScheduleType,
    time_str: &str,
    day: Option<i32>,
    display_tz: Tz,
) -> (String, Option<i32>) {
    convert(kind, time_str, day, display_tz, false)
}

/// The inverse of [`to_storage`]: converts a UTC-stored wall-clock time into
/// the display zone's representation for the UI.
pub fn to_display(
    kind: ScheduleType,
    time_str: &str,
    day: Option<i32>,
    display_tz: Tz,
) -> (String, Option<i32>) {
    convert(kind, time_str, day, display_tz, true)
}

/// Shared implementation for `to_storage` (`inverse = false`, display -> UTC)
/// and `to_display` (`inverse = true`, UTC -> display).
fn convert(
    kind: ScheduleType,
    time_str: &str,
    day: Option<i32>,
    display_tz: Tz,
    inverse: bool,
) -> (String, Option<i32>) {
    if matches!(
        kind,
        ScheduleType::Interval | ScheduleType::Hourly | ScheduleType::Manual
    ) {
        return (time_str.to_string(), day);
    }

    let Some((h, m)) = parse_hhmm(time_str) else {
        return (time_str.to_string(), day);
    };
    let Some(date) = anchor_date(kind, day) else {
        return (time_str.to_string(), day);
    };
    let Some(time) = NaiveTime::from_hms_opt(h, m, 0) else {
        return (time_str.to_string(), day);
    };
    let naive = NaiveDateTime::new(date, time);

    // The source zone holds `naive` as its local wall clock; we read it back
    // out in the destination zone's local wall clock.
    let (new_time, new_day) = if inverse {
        let source = Utc.from_utc_datetime(&naive);
        let target = source.with_timezone(&display_tz);
        (target.format("%H:%M").to_string(), day_component(kind, &target))
    } else {
        let source = match display_tz.from_local_datetime(&naive).single() {
            Some(dt) => dt,
            None => return (time_str.to_string(), day),
        };
        let target = source.with_timezone(&Utc);
        (target.format("%H:%M").to_string(), day_component(kind, &target))
    };

    (new_time, new_day)
}

fn day_component<Tz2: TimeZone>(kind: ScheduleType, dt: &DateTime<Tz2>) -> Option<i32> {
    use chrono::Datelike;
    match kind {
        ScheduleType::Weekly => Some(dt.weekday().num_days_from_monday() as i32),
        ScheduleType::Monthly => Some(dt.day() as i32),
        _ => None,
    }
}
