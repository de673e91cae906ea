//! Schedule Compiler (C4): local time windows + weekdays + timezone to a
//! compressed UTC `day . hour` element set (spec.md §4.3).

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, NaiveTime, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{FirewallError, Result};
use crate::model::Weekday;

fn parse_hour(hhmm: &str) -> Result<u32> {
    let t = NaiveTime::parse_from_str(hhmm, "%H:%M")
        .map_err(|_| FirewallError::InvalidTime(hhmm.to_string()))?;
    Ok(t.hour())
}

/// The local active hours for a `[start, end)` window, each tagged with
/// whether it falls on the day after `start` (the wrapped tail of an
/// overnight window like `22:00-02:00`).
fn active_local_hours(start: u32, end: u32) -> Vec<(u32, bool)> {
    if end > start {
        (start..end).map(|h| (h, false)).collect()
    } else {
        let mut hours: Vec<(u32, bool)> = (start..24).map(|h| (h, false)).collect();
        hours.extend((0..end).map(|h| (h, true)));
        hours
    }
}

fn next_occurrence(today: chrono::NaiveDate, target: chrono::Weekday) -> chrono::NaiveDate {
    let delta = (target.num_days_from_monday() as i64 - today.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    today + chrono::Duration::days(delta)
}

/// Compiles `(timezone, start, end, days)` into the deduplicated,
/// compressed `"d . a-b, d . c"` UTC expression consumed by the Rule
/// Expression Compiler (C3). `now` anchors "the next date matching each
/// weekday", per spec.md §4.3 step 3.
pub fn compile_schedule(
    timezone: &str,
    start: &str,
    end: &str,
    days: &[Weekday],
    now: DateTime<Utc>,
) -> Result<String> {
    let tz = Tz::from_str(timezone).map_err(|_| FirewallError::Timezone(timezone.to_string()))?;
    let start_hour = parse_hour(start)?;
    let end_hour = parse_hour(end)?;
    let hours = active_local_hours(start_hour, end_hour);

    let now_local = now.with_timezone(&tz);
    let today = now_local.date_naive();

    let mut utc_points: std::collections::BTreeSet<(u32, u32)> = std::collections::BTreeSet::new();

    for day in days {
        let base_date = next_occurrence(today, day.to_chrono());
        for (hour, next_day) in &hours {
            let date = if *next_day {
                base_date + chrono::Duration::days(1)
            } else {
                base_date
            };
            let naive = NaiveDateTime::new(date, NaiveTime::from_hms_opt(*hour, 0, 0).unwrap());
            let local = tz
                .from_local_datetime(&naive)
                .earliest()
                .or_else(|| tz.from_local_datetime(&naive).latest())
                .expect("local datetime resolves in any tz offset table");
            let utc = local.with_timezone(&Utc);
            let utc_day = Weekday::from_chrono(utc.weekday()).num_days_from_sunday();
            utc_points.insert((utc_day, utc.hour()));
        }
    }

    Ok(render_compressed(&utc_points))
}

fn render_compressed(points: &std::collections::BTreeSet<(u32, u32)>) -> String {
    let mut by_day: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for (day, hour) in points {
        by_day.entry(*day).or_default().push(*hour);
    }

    let mut entries = Vec::new();
    for (day, mut hours) in by_day {
        hours.sort_unstable();
        hours.dedup();
        for (start, end) in compress_ranges(&hours) {
            if start == end {
                entries.push(format!("{day} . {start}"));
            } else {
                entries.push(format!("{day} . {start}-{end}"));
            }
        }
    }

    entries.join(", ")
}

/// Groups a sorted, deduplicated list of hours into inclusive
/// `(start, end)` ranges of consecutive values.
fn compress_ranges(hours: &[u32]) -> Vec<(u32, u32)> {
    let mut ranges = Vec::new();
    let mut iter = hours.iter().copied();
    let Some(mut start) = iter.next() else {
        return ranges;
    };
    let mut prev = start;
    for h in iter {
        if h == prev + 1 {
            prev = h;
            continue;
        }
        ranges.push((start, prev));
        start = h;
        prev = h;
    }
    ranges.push((start, prev));
    ranges
}

/// Next instant at which the given timezone's UTC offset changes within
/// 365 days of `from`, for DST-aware schedule reapply. The core does not
/// perform the reapply itself (spec.md §4.3).
pub fn next_offset_change(timezone: &str, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let tz = Tz::from_str(timezone).map_err(|_| FirewallError::Timezone(timezone.to_string()))?;
    let base_offset = from.with_timezone(&tz).offset().fix();
    let mut cursor = from;
    let limit = from + chrono::Duration::days(365);
    // Coarse hourly scan is sufficient: real DST jumps happen on hour
    // boundaries and this is advisory scheduling, not a commit path.
    while cursor < limit {
        cursor += chrono::Duration::hours(1);
        if cursor.with_timezone(&tz).offset().fix() != base_offset {
            return Ok(Some(cursor));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_wraps_overnight_window_into_four_contiguous_points() {
        let now = Utc.with_ymd_and_hms(2026, 7, 20, 0, 0, 0).unwrap(); // a Monday
        let out = compile_schedule("UTC", "22:00", "02:00", &[Weekday::Mon], now).unwrap();
        assert_eq!(out, "1 . 22-23, 2 . 0-1");
    }

    #[test]
    fn schedule_compiles_single_day_window() {
        let now = Utc.with_ymd_and_hms(2026, 7, 20, 0, 0, 0).unwrap();
        let out = compile_schedule("UTC", "09:00", "17:00", &[Weekday::Wed], now).unwrap();
        assert_eq!(out, "3 . 9-16");
    }

    #[test]
    fn schedule_scenario_23_to_01_mon_matches_spec_example() {
        let now = Utc.with_ymd_and_hms(2026, 7, 20, 0, 0, 0).unwrap();
        let out = compile_schedule("UTC", "23:00", "01:00", &[Weekday::Mon], now).unwrap();
        assert_eq!(out, "1 . 23, 2 . 0");
    }

    #[test]
    fn unknown_timezone_errors() {
        let now = Utc::now();
        let err = compile_schedule("Not/AZone", "09:00", "10:00", &[Weekday::Mon], now);
        assert!(matches!(err, Err(FirewallError::Timezone(_))));
    }
}
