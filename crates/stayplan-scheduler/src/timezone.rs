//! Conversions between IANA zones and UTC.
//!
//! Everything persisted is UTC; local wall-clock reasoning happens in the
//! schedule's zone and is converted back before it leaves this module.

use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone,
    Utc,
};
use chrono_tz::Tz;

use crate::error::{Result, SchedulerError};

/// Zone used when a schedule or owner does not name one.
pub const DEFAULT_ZONE: &str = "UTC";

/// Naive layouts accepted for wall-clock timestamps without a zone designator.
const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Resolve an IANA zone name. An empty name means [`DEFAULT_ZONE`].
pub fn resolve_zone(name: &str) -> Result<Tz> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>().map_err(|_| {
        SchedulerError::InvalidSchedule(format!(
            "invalid timezone `{name}`; expected IANA timezone id"
        ))
    })
}

/// View a UTC instant on the wall clock of `tz`.
pub fn to_local(instant: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    instant.with_timezone(&tz)
}

/// Convert a wall-clock time in `tz` to the UTC instant it denotes.
///
/// Ambiguous times (clocks going back) pick the earlier instant. Times inside
/// a spring-forward gap are read with the offset in force before the gap,
/// which lands them just after it (02:30 in a 02:00→03:00 gap becomes 03:30).
pub fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            for hours in 1..=3 {
                let shift = Duration::hours(hours);
                if let Some(before) = tz.from_local_datetime(&(naive - shift)).earliest() {
                    return Ok(before.with_timezone(&Utc) + shift);
                }
            }
            Err(SchedulerError::InvalidSchedule(format!(
                "local time {naive} does not exist in {tz}"
            )))
        }
    }
}

/// Combine a local date and time-of-day in `tz` into a UTC instant.
pub fn local_date_time_to_utc(date: NaiveDate, time: NaiveTime, tz: Tz) -> Result<DateTime<Utc>> {
    local_to_utc(date.and_time(time), tz)
}

/// Parse a user-supplied timestamp.
///
/// Strings carrying a zone designator (`Z` or `±HH:MM`) are absolute and keep
/// their instant; bare wall-clock strings are read in `tz`.
pub fn parse_in_zone(raw: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return local_to_utc(naive, tz);
        }
    }
    Err(SchedulerError::InvalidSchedule(format!(
        "failed to parse date_time `{raw}`"
    )))
}

/// Render a UTC instant as RFC3339 on the wall clock of `tz`.
pub fn format_in_zone(instant: DateTime<Utc>, tz: Tz) -> String {
    to_local(instant, tz).to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Canonical storage form: RFC3339, second precision, `Z` suffix.
///
/// A fixed width keeps lexicographic order equal to chronological order,
/// which the due-query relies on.
pub fn format_utc(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Inverse of [`format_utc`]; also accepts any RFC3339 offset.
pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::InvalidSchedule(format!("bad timestamp `{raw}`: {e}")))
}
