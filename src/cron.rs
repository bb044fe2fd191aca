//! 5-field cron expression (`minute hour day-of-month month day-of-week`)
//! parsing and next-fire-time computation, built on the `cron` crate the way
//! the rest of this corpus reaches for it — field validation and the
//! earliest-after-now search are delegated to [`cron::Schedule`] rather than
//! hand-rolled here.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

const DOW_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Parses one comma-separated cron field into the set of values it matches,
/// validating `min ≤ a ≤ b ≤ max` on every range.
fn parse_field(raw: &str, min: u32, max: u32) -> JobResult<Vec<u32>> {
    let mut values = Vec::new();
    for part in raw.split(',') {
        values.extend(parse_part(part, min, max)?);
    }
    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err(JobError::Validation(format!("cron field `{raw}` matches no values")));
    }
    Ok(values)
}

fn parse_part(part: &str, min: u32, max: u32) -> JobResult<Vec<u32>> {
    let (range_part, step) = match part.split_once('/') {
        Some((r, s)) => (
            r,
            s.parse::<u32>()
                .map_err(|_| JobError::Validation(format!("invalid cron step `{s}`")))?,
        ),
        None => (part, 1),
    };

    if step == 0 {
        return Err(JobError::Validation("cron step cannot be 0".into()));
    }

    let (lo, hi) = if range_part == "*" {
        (min, max)
    } else if let Some((a, b)) = range_part.split_once('-') {
        let a = a
            .parse::<u32>()
            .map_err(|_| JobError::Validation(format!("invalid cron range start `{a}`")))?;
        let b = b
            .parse::<u32>()
            .map_err(|_| JobError::Validation(format!("invalid cron range end `{b}`")))?;
        if a > b {
            return Err(JobError::Validation(format!("cron range `{a}-{b}` is backwards")));
        }
        (a, b)
    } else {
        let v = range_part
            .parse::<u32>()
            .map_err(|_| JobError::Validation(format!("invalid cron value `{range_part}`")))?;
        (v, v)
    };

    if lo < min || hi > max {
        return Err(JobError::Validation(format!(
            "cron field value out of range [{min}, {max}]: `{part}`"
        )));
    }

    Ok((lo..=hi).step_by(step as usize).collect())
}

/// Renders a validated day-of-week field as the explicit `cron` crate's
/// weekday-name list, sidestepping any ambiguity between this field's
/// Sunday=0 convention and the underlying crate's own numbering.
fn dow_field_to_names(raw: &str) -> JobResult<String> {
    let values = parse_field(raw, 0, 6)?;
    if values.len() == 7 {
        return Ok("*".to_string());
    }
    Ok(values
        .iter()
        .map(|&v| DOW_NAMES[v as usize])
        .collect::<Vec<_>>()
        .join(","))
}

/// A parsed 5-field cron expression, with its matching/search delegated to
/// [`cron::Schedule`].
pub struct CronSchedule {
    schedule: Schedule,
    tz: Tz,
}

impl CronSchedule {
    /// Parses `expr` (5 space-separated fields) with an optional IANA
    /// timezone; defaults to UTC when `tz` is `None`.
    pub fn parse(expr: &str, tz: Option<&str>) -> JobResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(JobError::Validation(format!(
                "cron expression `{expr}` must have 5 fields, got {}",
                fields.len()
            )));
        }

        // Validate each numeric field ourselves so out-of-range values and
        // backwards ranges get this crate's error messages rather than the
        // underlying parser's.
        parse_field(fields[0], 0, 59)?;
        parse_field(fields[1], 0, 23)?;
        parse_field(fields[2], 1, 31)?;
        parse_field(fields[3], 1, 12)?;
        let dow = dow_field_to_names(fields[4])?;

        // The `cron` crate expects a leading seconds field; jobs here only
        // run at minute resolution.
        let six_field = format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], dow);
        let schedule = Schedule::from_str(&six_field)
            .map_err(|e| JobError::Validation(format!("invalid cron expression `{expr}`: {e}")))?;

        let tz: Tz = match tz {
            Some(name) => name
                .parse()
                .map_err(|_| JobError::Validation(format!("unknown timezone `{name}`")))?,
            None => Tz::UTC,
        };

        Ok(Self { schedule, tz })
    }

    /// Finds the earliest fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> JobResult<DateTime<Utc>> {
        let local = after.with_timezone(&self.tz);
        self.schedule
            .after(&local)
            .next()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| JobError::Validation(format!("cron expression has no fire time after {after}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn every_minute() {
        let schedule = CronSchedule::parse("* * * * *", None).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 30).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn daily_at_specific_hour_and_minute() {
        let schedule = CronSchedule::parse("30 9 * * *", None).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 9, 30, 0).unwrap());
    }

    #[test]
    fn step_values_are_honored() {
        let schedule = CronSchedule::parse("*/15 * * * *", None).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 12, 1, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 15, 0).unwrap());
    }

    #[test]
    fn day_of_week_zero_is_sunday() {
        let schedule = CronSchedule::parse("0 0 * * 0", None).unwrap();
        // 2026-01-04 is a Sunday.
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Sun);
        assert_eq!(next.day(), 4);
    }

    #[test]
    fn recomputing_from_a_computed_fire_time_always_advances() {
        let schedule = CronSchedule::parse("*/7 * * * *", None).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
        let t1 = schedule.next_after(t0).unwrap();
        let t2 = schedule.next_after(t1).unwrap();
        assert!(t2 > t1);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::parse("* * * *", None).is_err());
    }

    #[test]
    fn rejects_out_of_range_value() {
        assert!(CronSchedule::parse("60 * * * *", None).is_err());
    }

    #[test]
    fn rejects_backwards_range() {
        assert!(CronSchedule::parse("10-5 * * * *", None).is_err());
    }

    #[test]
    fn honors_named_timezone() {
        let schedule = CronSchedule::parse("0 9 * * *", Some("America/New_York")).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        // 09:00 EST is 14:00 UTC in January.
        assert_eq!(next.hour(), 14);
    }
}
