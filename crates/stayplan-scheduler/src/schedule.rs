use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::{
    error::{Result, SchedulerError},
    timezone::{local_date_time_to_utc, parse_in_zone, to_local},
    types::{BiweeklyRule, DailyRule, MonthlyRule, OnceRule, Recurrence, WeeklyRule},
};

const BIWEEKLY_CYCLE_DAYS: i64 = 14;

/// Compute the next UTC fire instant for `recurrence`, strictly after `now`.
///
/// All "has it passed today" decisions are made on the wall clock of `tz`;
/// only the result is converted back to UTC. Pure: the same inputs always
/// give the same answer.
pub fn next_run(recurrence: &Recurrence, tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match recurrence {
        Recurrence::Once(rule) => next_once(rule, tz, now),
        Recurrence::Daily(rule) => next_daily(rule, tz, now),
        Recurrence::Weekly(rule) => next_weekly(rule, tz, now),
        Recurrence::Biweekly(rule) => next_biweekly(rule, tz, now),
        Recurrence::Monthly(rule) => next_monthly(rule, tz, now),
    }
}

fn next_once(rule: &OnceRule, tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let at = parse_in_zone(&rule.date_time, tz)?;
    if at <= now {
        return Err(SchedulerError::InvalidSchedule(format!(
            "date_time {} is not in the future",
            rule.date_time
        )));
    }
    Ok(at)
}

fn next_daily(rule: &DailyRule, tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let today = to_local(now, tz).date_naive();
    let candidate = local_date_time_to_utc(today, rule.time, tz)?;
    if candidate > now {
        return Ok(candidate);
    }
    local_date_time_to_utc(shift_days(today, 1)?, rule.time, tz)
}

fn next_weekly(rule: &WeeklyRule, tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let today = to_local(now, tz).date_naive();
    let current = today.weekday().num_days_from_sunday() as i64;
    let target = rule.day_of_week as i64;
    let days_until = (target - current + 7) % 7;

    let candidate = local_date_time_to_utc(shift_days(today, days_until)?, rule.time, tz)?;
    if candidate > now {
        return Ok(candidate);
    }
    // Target weekday is today but the time has gone: same slot next week.
    local_date_time_to_utc(shift_days(today, days_until + 7)?, rule.time, tz)
}

fn next_biweekly(rule: &BiweeklyRule, tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let today = to_local(now, tz).date_naive();
    let anchor = first_weekday_on_or_after(rule.start_date, rule.day_of_week)?;

    let elapsed = (today - anchor).num_days();
    let date = if elapsed <= 0 {
        anchor
    } else {
        shift_days(anchor, (elapsed / BIWEEKLY_CYCLE_DAYS) * BIWEEKLY_CYCLE_DAYS)?
    };

    let candidate = local_date_time_to_utc(date, rule.time, tz)?;
    if candidate > now {
        return Ok(candidate);
    }
    local_date_time_to_utc(shift_days(date, BIWEEKLY_CYCLE_DAYS)?, rule.time, tz)
}

fn next_monthly(rule: &MonthlyRule, tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let today = to_local(now, tz).date_naive();
    let (year, month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    let day = (rule.day_of_month as u32).min(days_in_month(year, month)?);
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| out_of_range(year, month))?;
    local_date_time_to_utc(date, rule.time, tz)
}

fn first_weekday_on_or_after(date: NaiveDate, day_of_week: u8) -> Result<NaiveDate> {
    let current = date.weekday().num_days_from_sunday() as i64;
    shift_days(date, (day_of_week as i64 - current + 7) % 7)
}

fn days_in_month(year: i32, month: u32) -> Result<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .ok_or_else(|| out_of_range(year, month))
}

fn shift_days(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    date.checked_add_signed(Duration::days(days))
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("date {date} + {days}d overflows")))
}

fn out_of_range(year: i32, month: u32) -> SchedulerError {
    SchedulerError::InvalidSchedule(format!("{year}-{month:02} is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timezone::{parse_utc, resolve_zone};
    use serde_json::json;

    fn utc(raw: &str) -> DateTime<Utc> {
        parse_utc(raw).unwrap()
    }

    fn rule(kind: &str, data: serde_json::Value) -> Recurrence {
        Recurrence::parse(kind, data).expect("valid rule")
    }

    fn next(rec: &Recurrence, zone: &str, now: &str) -> DateTime<Utc> {
        next_run(rec, resolve_zone(zone).unwrap(), utc(now)).expect("next run")
    }

    #[test]
    fn daily_same_day() {
        let rec = rule("daily", json!({"time": "09:00", "timezone": "UTC"}));
        assert_eq!(next(&rec, "UTC", "2026-10-19T08:00:00Z"), utc("2026-10-19T09:00:00Z"));
    }

    #[test]
    fn daily_rolls_forward_on_exact_boundary() {
        let rec = rule("daily", json!({"time": "09:00", "timezone": "UTC"}));
        assert_eq!(next(&rec, "UTC", "2026-10-19T09:00:00Z"), utc("2026-10-20T09:00:00Z"));
    }

    #[test]
    fn daily_in_kolkata() {
        // 11:25Z is 16:55 IST, so 17:00 IST today is still ahead.
        let rec = rule("daily", json!({"time": "17:00", "timezone": "Asia/Kolkata"}));
        assert_eq!(
            next(&rec, "Asia/Kolkata", "2026-10-19T11:25:00Z"),
            utc("2026-10-19T11:30:00Z")
        );
        assert_eq!(
            next(&rec, "Asia/Kolkata", "2026-10-19T11:30:00Z"),
            utc("2026-10-20T11:30:00Z")
        );
    }

    #[test]
    fn daily_uses_local_date_not_utc_date() {
        // 16:00Z on the 18th is 01:00 on the 19th in Tokyo, so 00:30 has
        // already gone locally and the next slot is 00:30 on the 20th.
        let rec = rule("daily", json!({"time": "00:30", "timezone": "Asia/Tokyo"}));
        assert_eq!(
            next(&rec, "Asia/Tokyo", "2026-10-18T16:00:00Z"),
            utc("2026-10-19T15:30:00Z")
        );
    }

    #[test]
    fn weekly_wraps_when_time_has_passed_today() {
        // 2026-10-19 is a Monday.
        let rec = rule("weekly", json!({"day_of_week": 1, "time": "10:00"}));
        assert_eq!(next(&rec, "UTC", "2026-10-19T11:00:00Z"), utc("2026-10-26T10:00:00Z"));
        assert_eq!(next(&rec, "UTC", "2026-10-19T09:00:00Z"), utc("2026-10-19T10:00:00Z"));
    }

    #[test]
    fn weekly_later_in_week() {
        // Monday → Friday of the same week.
        let rec = rule("weekly", json!({"day_of_week": 5, "time": "07:30"}));
        assert_eq!(next(&rec, "UTC", "2026-10-19T11:00:00Z"), utc("2026-10-23T07:30:00Z"));
        // Sunday from Monday is six days out.
        let rec = rule("weekly", json!({"day_of_week": 0, "time": "07:30"}));
        assert_eq!(next(&rec, "UTC", "2026-10-19T11:00:00Z"), utc("2026-10-25T07:30:00Z"));
    }

    #[test]
    fn weekly_reasons_about_local_weekday() {
        // Sunday 20:00Z is Monday 01:30 IST.
        let rec = rule("weekly", json!({"day_of_week": 1, "time": "09:00"}));
        assert_eq!(
            next(&rec, "Asia/Kolkata", "2026-10-18T20:00:00Z"),
            utc("2026-10-19T03:30:00Z")
        );
    }

    #[test]
    fn biweekly_phase_follows_start_date() {
        let rec = rule(
            "biweekly",
            json!({"day_of_week": 1, "time": "09:00", "start_date": "2026-10-05"}),
        );
        // Exactly one cycle after the anchor, before the time.
        assert_eq!(next(&rec, "UTC", "2026-10-19T08:00:00Z"), utc("2026-10-19T09:00:00Z"));
        // Same day, after the time: next cycle.
        assert_eq!(next(&rec, "UTC", "2026-10-19T10:00:00Z"), utc("2026-11-02T09:00:00Z"));
        // Off-cycle week resolves to the following on-cycle Monday.
        assert_eq!(next(&rec, "UTC", "2026-10-12T10:00:00Z"), utc("2026-10-19T09:00:00Z"));
        assert_eq!(next(&rec, "UTC", "2026-10-27T10:00:00Z"), utc("2026-11-02T09:00:00Z"));
    }

    #[test]
    fn biweekly_anchor_in_future() {
        // Start on a Wednesday; first Monday on or after is 2026-11-09.
        let rec = rule(
            "biweekly",
            json!({"day_of_week": 1, "time": "09:00", "start_date": "2026-11-04"}),
        );
        assert_eq!(next(&rec, "UTC", "2026-10-19T10:00:00Z"), utc("2026-11-09T09:00:00Z"));
    }

    #[test]
    fn monthly_clamps_to_end_of_february() {
        let rec = rule("monthly", json!({"day_of_month": 31, "time": "10:00"}));
        assert_eq!(next(&rec, "UTC", "2026-01-31T12:00:00Z"), utc("2026-02-28T10:00:00Z"));
        assert_eq!(next(&rec, "UTC", "2028-01-15T12:00:00Z"), utc("2028-02-29T10:00:00Z"));
    }

    #[test]
    fn monthly_targets_next_month_and_wraps_year() {
        let rec = rule("monthly", json!({"day_of_month": 15, "time": "10:00"}));
        assert_eq!(next(&rec, "UTC", "2026-10-01T00:00:00Z"), utc("2026-11-15T10:00:00Z"));
        assert_eq!(next(&rec, "UTC", "2026-12-20T00:00:00Z"), utc("2027-01-15T10:00:00Z"));
    }

    #[test]
    fn once_with_utc_suffix_is_used_directly() {
        let rec = rule("once", json!({"date_time": "2026-11-01T17:00:00Z"}));
        assert_eq!(
            next(&rec, "Asia/Kolkata", "2026-10-19T00:00:00Z"),
            utc("2026-11-01T17:00:00Z")
        );
    }

    #[test]
    fn once_without_zone_is_local() {
        let rec = rule("once", json!({"date_time": "2026-11-01T17:00:00"}));
        assert_eq!(
            next(&rec, "Asia/Kolkata", "2026-10-19T00:00:00Z"),
            utc("2026-11-01T11:30:00Z")
        );
    }

    #[test]
    fn once_in_the_past_is_invalid() {
        let rec = rule("once", json!({"date_time": "2026-01-01T00:00:00Z"}));
        let err = next_run(&rec, Tz::UTC, utc("2026-10-19T00:00:00Z")).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[test]
    fn results_are_deterministic_and_strictly_future() {
        let rules = [
            rule("daily", json!({"time": "00:00"})),
            rule("daily", json!({"time": "23:59"})),
            rule("weekly", json!({"day_of_week": 3, "time": "12:00"})),
            rule(
                "biweekly",
                json!({"day_of_week": 6, "time": "18:45", "start_date": "2025-02-01"}),
            ),
            rule("monthly", json!({"day_of_month": 31, "time": "06:00"})),
            rule("monthly", json!({"day_of_month": 1, "time": "00:00"})),
        ];
        let zones = ["UTC", "Asia/Kolkata", "America/New_York", "Pacific/Auckland"];
        let nows = [
            "2026-01-31T23:59:59Z",
            "2026-03-08T07:00:00Z",
            "2026-10-19T11:25:00Z",
            "2026-11-01T05:30:00Z",
            "2026-12-31T23:00:00Z",
        ];
        for rec in &rules {
            for zone in zones {
                for now in nows {
                    let first = next(rec, zone, now);
                    let second = next(rec, zone, now);
                    assert_eq!(first, second, "{rec:?} {zone} {now}");
                    assert!(first > utc(now), "{rec:?} {zone} {now} -> {first}");
                }
            }
        }
    }
}
