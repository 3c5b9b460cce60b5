//! Centralized local↔UTC time-of-day conversion.
//!
//! All alarm times are ingested as local wall-clock strings and stored/compared
//! as UTC wall-clock strings. This module is the only place that talks to
//! `chrono_tz` DST resolution, per the "ad-hoc time parsing" redesign flag.
//!
//! DST policy (deliberately chosen, not incidental):
//! - Fall-back (ambiguous local time, occurs twice): use the earliest/pre-transition
//!   offset. The alarm fires once, at the first occurrence.
//! - Spring-forward (local time does not exist): walk forward in one-minute steps
//!   from the nonexistent wall clock until a valid instant appears, and fire then.
//!   This is "interpret as the post-transition wall clock."
//!
//! `utc_time` is computed once, against the current date in the alarm's timezone,
//! at `Schedule`/`Reload` time — it is not recomputed every tick. This means an
//! alarm crossing a DST boundary will drift by the DST offset until the alarm is
//! re-submitted. See the open question in the design notes.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::TimeError;

const SPRING_FORWARD_SEARCH_LIMIT_MINUTES: i64 = 240;

/// Parse "HH:MM" or "HH:MM:SS" into a `NaiveTime`, validating component ranges.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, TimeError> {
    let parts: Vec<&str> = s.split(':').collect();
    let (hour, minute, second) = match parts.as_slice() {
        [h, m] => (*h, *m, "0"),
        [h, m, sec] => (*h, *m, *sec),
        _ => return Err(TimeError::InvalidTime(s.to_string())),
    };
    let hour: u32 = hour.parse().map_err(|_| TimeError::InvalidTime(s.to_string()))?;
    let minute: u32 = minute.parse().map_err(|_| TimeError::InvalidTime(s.to_string()))?;
    let second: u32 = second.parse().map_err(|_| TimeError::InvalidTime(s.to_string()))?;
    if hour > 23 || minute > 59 || second > 59 {
        return Err(TimeError::InvalidTime(s.to_string()));
    }
    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| TimeError::InvalidTime(s.to_string()))
}

pub fn parse_timezone(name: &str) -> Result<Tz, TimeError> {
    name.parse::<Tz>().map_err(|_| TimeError::InvalidTimezone(name.to_string()))
}

/// Resolve a naive local (date, time) to a concrete instant in `tz`, applying the
/// documented DST policy.
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Tz>, TimeError> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt),
        LocalResult::Ambiguous(earliest, _latest) => Ok(earliest),
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..SPRING_FORWARD_SEARCH_LIMIT_MINUTES {
                probe += chrono::Duration::minutes(1);
                match tz.from_local_datetime(&probe) {
                    LocalResult::Single(dt) => return Ok(dt),
                    LocalResult::Ambiguous(dt, _) => return Ok(dt),
                    LocalResult::None => continue,
                }
            }
            Err(TimeError::UnresolvableLocalTime {
                local_time: time.format("%H:%M:%S").to_string(),
                tz: tz.to_string(),
            })
        }
    }
}

/// Convert a local time-of-day string in `tz_name`, anchored to `date`, to its
/// UTC time-of-day. Exposed separately from [`local_to_utc`] so callers (and
/// tests) can pin the anchor date instead of using "today."
pub fn local_to_utc_on(date: NaiveDate, local_time: &str, tz_name: &str) -> Result<NaiveTime, TimeError> {
    let tz = parse_timezone(tz_name)?;
    let time = parse_time_of_day(local_time)?;
    let resolved = resolve_local(tz, date, time)?;
    Ok(resolved.with_timezone(&Utc).time())
}

/// Convert a local time-of-day string to its UTC time-of-day, anchored to today
/// (in `tz_name`). This is what `Schedule` and `Reload` use.
pub fn local_to_utc(local_time: &str, tz_name: &str) -> Result<NaiveTime, TimeError> {
    let tz = parse_timezone(tz_name)?;
    let today = Utc::now().with_timezone(&tz).date_naive();
    local_to_utc_on(today, local_time, tz_name)
}

/// Convert a UTC time-of-day string, anchored to `date` (interpreted in UTC), to
/// its local time-of-day in `tz_name`.
pub fn utc_to_local_on(date: NaiveDate, utc_time: &str, tz_name: &str) -> Result<NaiveTime, TimeError> {
    let tz = parse_timezone(tz_name)?;
    let time = parse_time_of_day(utc_time)?;
    let utc_dt = Utc.from_utc_datetime(&date.and_time(time));
    Ok(utc_dt.with_timezone(&tz).time())
}

/// Convert a UTC time-of-day string to its local time-of-day, anchored to today.
pub fn utc_to_local(utc_time: &str, tz_name: &str) -> Result<NaiveTime, TimeError> {
    let today = Utc::now().date_naive();
    utc_to_local_on(today, utc_time, tz_name)
}

/// The alarm's weekday, evaluated in its own timezone at `now_utc`.
pub fn weekday_in_tz(now_utc: DateTime<Utc>, tz: Tz) -> chrono::Weekday {
    use chrono::Datelike;
    now_utc.with_timezone(&tz).weekday()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn parses_hh_mm() {
        assert_eq!(parse_time_of_day("09:30").unwrap(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }

    #[test]
    fn parses_hh_mm_ss() {
        assert_eq!(
            parse_time_of_day("09:30:15").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 15).unwrap()
        );
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(parse_time_of_day("24:00").is_err());
        assert!(parse_time_of_day("09:60").is_err());
        assert!(parse_time_of_day("09:30:60").is_err());
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse_time_of_day("nine thirty").is_err());
        assert!(parse_time_of_day("09").is_err());
    }

    #[test]
    fn utc_timezone_is_identity() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let utc = local_to_utc_on(date, "09:00:00", "UTC").unwrap();
        assert_eq!(utc, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn los_angeles_pdt_offset() {
        // 2026-07-28 is within PDT (UTC-7).
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let utc = local_to_utc_on(date, "09:00:00", "America/Los_Angeles").unwrap();
        assert_eq!(utc, NaiveTime::from_hms_opt(16, 0, 0).unwrap());
    }

    #[test]
    fn negative_offset_midnight_wraps_to_previous_day_hour() {
        // America/Los_Angeles PDT is UTC-7: local 00:00 is UTC 07:00 (previous
        // local day, but the wrap is only visible through the date, which
        // time-of-day storage intentionally discards).
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let utc = local_to_utc_on(date, "00:00:00", "America/Los_Angeles").unwrap();
        assert_eq!(utc, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
    }

    #[test]
    fn round_trip_on_non_dst_boundary_day() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let tz = "America/Los_Angeles";
        let utc = local_to_utc_on(date, "14:00:00", tz).unwrap();
        let back = utc_to_local_on(date, &utc.format("%H:%M:%S").to_string(), tz).unwrap();
        assert_eq!(back, NaiveTime::from_hms_opt(14, 0, 0).unwrap());
    }

    #[test]
    fn spring_forward_gap_resolves_to_post_transition_instant() {
        // US DST 2026 starts 2026-03-08 02:00 local -> jumps to 03:00. 02:30 does
        // not exist; policy walks forward to the first valid instant (03:00 local,
        // which is already past-transition and at UTC-7).
        let date = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let utc = local_to_utc_on(date, "02:30:00", "America/New_York").unwrap();
        // 03:00 EDT (UTC-4) is the first valid local instant at/after 02:30.
        assert_eq!(utc, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
    }

    #[test]
    fn fall_back_duplicate_uses_pre_transition_offset() {
        // US DST 2026 ends 2026-11-01 02:00 local (falls back to 01:00). 01:30
        // occurs twice; policy picks the earliest (pre-transition, EDT, UTC-4).
        let date = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        let utc = local_to_utc_on(date, "01:30:00", "America/New_York").unwrap();
        assert_eq!(utc, NaiveTime::from_hms_opt(5, 30, 0).unwrap());
    }

    #[test]
    fn weekday_evaluated_in_alarm_timezone_not_utc() {
        // 2026-07-28 is a Tuesday. At UTC 02:00 on Tuesday, Los Angeles (UTC-7)
        // is still Monday 19:00 the day before.
        let now_utc = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        let tz: Tz = "America/Los_Angeles".parse().unwrap();
        assert_eq!(weekday_in_tz(now_utc, tz), chrono::Weekday::Mon);
        assert_eq!(now_utc.weekday(), chrono::Weekday::Tue);
    }

    #[test]
    fn rejects_unknown_timezone() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        assert!(local_to_utc_on(date, "09:00:00", "Mars/Olympus_Mons").is_err());
    }
}
