//! Calendar event matching
//!
//! A pure function deciding whether a wall-clock instant matches a calendar
//! event's component bitsets, broken down in the event's timezone. The
//! dispatcher walks the clock with one-second granularity and uses the
//! returned hint to re-arm its timer.

use crate::model::{localtime, CalendarSpec};
use chrono::{Datelike, Timelike};
use tracing::warn;

/// Outcome of matching one instant against a calendar spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarMatch {
    /// Every component matches at this second.
    Match,
    /// A coarse component (month, day-of-month, day-of-week) does not
    /// match; nothing in the current minute can fire.
    NoMatch,
    /// A fine component (hour, minute, second) does not match; re-check
    /// after the given number of seconds.
    Wait(u32),
}

/// Matches the instant (epoch seconds) against the calendar spec.
///
/// Day-of-week follows the LMAP convention of Monday as bit 0; the chrono
/// breakdown is converted accordingly. A failed breakdown is reported as
/// [`CalendarMatch::NoMatch`] and the caller is expected to retire the
/// event.
pub fn calendar_match(spec: &CalendarSpec, now: i64) -> CalendarMatch {
    let offset = spec.timezone_offset.unwrap_or(0);
    let local = match localtime(now, offset) {
        Some(local) => local,
        None => {
            warn!(epoch = now, "failed to obtain localtime");
            return CalendarMatch::NoMatch;
        }
    };

    if spec.months != u16::MAX && spec.months & (1 << local.month0()) == 0 {
        return CalendarMatch::NoMatch;
    }
    if spec.days_of_month != u32::MAX && spec.days_of_month & (1 << local.day()) == 0 {
        return CalendarMatch::NoMatch;
    }

    // chrono counts the week from Sunday; the LMAP week starts on Monday.
    let wday = match local.weekday().num_days_from_sunday() {
        0 => 6,
        n => n - 1,
    };
    if spec.days_of_week != u8::MAX && spec.days_of_week & (1 << wday) == 0 {
        return CalendarMatch::NoMatch;
    }

    let second = local.second();
    let to_next_minute = (60 - second).max(1);

    if spec.hours != u32::MAX && spec.hours & (1 << local.hour()) == 0 {
        return CalendarMatch::Wait(to_next_minute);
    }
    if spec.minutes != u64::MAX && spec.minutes & (1u64 << local.minute()) == 0 {
        return CalendarMatch::Wait(to_next_minute);
    }
    if spec.seconds != u64::MAX && spec.seconds & (1u64 << second) == 0 {
        return CalendarMatch::Wait(1);
    }

    CalendarMatch::Match
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_datetime;

    fn every_minute_at_zero() -> CalendarSpec {
        CalendarSpec {
            months: u16::MAX,
            days_of_month: u32::MAX,
            days_of_week: u8::MAX,
            hours: u32::MAX,
            minutes: u64::MAX,
            seconds: 1, // bit 0 only
            timezone_offset: None,
            start: None,
            end: None,
        }
    }

    #[test]
    fn test_fires_once_per_minute_on_the_zero_second() {
        let spec = every_minute_at_zero();
        let base = parse_datetime("2024-06-15T10:04:00Z").unwrap();
        assert_eq!(calendar_match(&spec, base), CalendarMatch::Match);
        for offset in 1..60 {
            assert_eq!(
                calendar_match(&spec, base + offset),
                CalendarMatch::Wait(1),
                "second {offset} must not match"
            );
        }
        assert_eq!(calendar_match(&spec, base + 60), CalendarMatch::Match);
    }

    #[test]
    fn test_zero_second_matches_regardless_of_offset() {
        let mut spec = every_minute_at_zero();
        spec.timezone_offset = Some(330); // +05:30
        let base = parse_datetime("2024-06-15T10:04:00Z").unwrap();
        assert_eq!(calendar_match(&spec, base), CalendarMatch::Match);
        assert_eq!(calendar_match(&spec, base + 30), CalendarMatch::Wait(1));
    }

    #[test]
    fn test_minute_boundary_first_fire() {
        // minutes = {5}, seconds = {0}: started at 00:04:30Z the first
        // match is exactly 2024-01-01T00:05:00Z.
        let mut spec = every_minute_at_zero();
        spec.minutes = 1 << 5;
        let start = parse_datetime("2024-01-01T00:04:30Z").unwrap();
        match calendar_match(&spec, start) {
            CalendarMatch::Wait(n) => {
                assert_eq!(n, 30);
                assert_eq!(
                    calendar_match(&spec, start + i64::from(n)),
                    CalendarMatch::Match
                );
            }
            other => panic!("expected wait, got {other:?}"),
        }
    }

    #[test]
    fn test_month_mismatch_is_no_match() {
        let mut spec = every_minute_at_zero();
        spec.months = 1; // january only
        let june = parse_datetime("2024-06-15T10:04:00Z").unwrap();
        assert_eq!(calendar_match(&spec, june), CalendarMatch::NoMatch);
        let january = parse_datetime("2024-01-15T10:04:00Z").unwrap();
        assert_eq!(calendar_match(&spec, january), CalendarMatch::Match);
    }

    #[test]
    fn test_weekday_is_monday_based() {
        let mut spec = every_minute_at_zero();
        spec.days_of_week = 1; // monday
        // 2024-06-17 is a Monday, 2024-06-16 a Sunday.
        let monday = parse_datetime("2024-06-17T00:00:00Z").unwrap();
        assert_eq!(calendar_match(&spec, monday), CalendarMatch::Match);
        let sunday = parse_datetime("2024-06-16T00:00:00Z").unwrap();
        assert_eq!(calendar_match(&spec, sunday), CalendarMatch::NoMatch);

        spec.days_of_week = 1 << 6; // sunday
        assert_eq!(calendar_match(&spec, sunday), CalendarMatch::Match);
        assert_eq!(calendar_match(&spec, monday), CalendarMatch::NoMatch);
    }

    #[test]
    fn test_timezone_offset_shifts_the_day() {
        let mut spec = every_minute_at_zero();
        spec.hours = 1; // hour 0 only
        spec.timezone_offset = Some(-60);
        // 01:00:00Z is 00:00:00 at -01:00.
        let instant = parse_datetime("2024-06-15T01:00:00Z").unwrap();
        assert_eq!(calendar_match(&spec, instant), CalendarMatch::Match);
        let utc_midnight = parse_datetime("2024-06-15T00:00:00Z").unwrap();
        assert_ne!(calendar_match(&spec, utc_midnight), CalendarMatch::Match);
    }

    #[test]
    fn test_hour_mismatch_waits_to_minute_boundary() {
        let mut spec = every_minute_at_zero();
        spec.hours = 1 << 12;
        let instant = parse_datetime("2024-06-15T10:04:15Z").unwrap();
        assert_eq!(calendar_match(&spec, instant), CalendarMatch::Wait(45));
    }
}
