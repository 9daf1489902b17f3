//! Timezone-aware 5-field cron evaluator (minute hour dom month dow).
//!
//! Adapted from the teacher's `gateway/src/runtime/schedules/cron.rs` +
//! `validation.rs`. One deliberate behavior change from the teacher: an unparseable
//! timezone is a hard [`Error::Validation`] here, not a silent fallback to UTC — the
//! teacher's `parse_tz` falls back because a bad schedule shouldn't wedge a whole
//! gateway process, but SPEC_FULL.md §3 requires "timezone strings must resolve in the
//! zone database" to be enforced as a validation error at construction.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::error::{Error, Result};

fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
        return false;
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

fn cron_matches_naive(cron: &str, dt: &chrono::NaiveDateTime) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    cron_field_matches(fields[0], dt.minute())
        && cron_field_matches(fields[1], dt.hour())
        && cron_field_matches(fields[2], dt.day())
        && cron_field_matches(fields[3], dt.month())
        && cron_field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

pub fn cron_matches(cron: &str, dt: &DateTime<Utc>) -> bool {
    cron_matches_naive(cron, &dt.naive_utc())
}

/// `croniter`-equivalent field-range validation: does this parse as a legal 5-field
/// cron expression at all? Mirrors `validators.valid_cron_expression`.
pub fn validate_cron(cron: &str) -> Result<()> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::Validation(format!(
            "cron expression '{cron}' must have 5 fields, found {}",
            fields.len()
        )));
    }
    let ranges: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];
    for (field, (lo, hi)) in fields.iter().zip(ranges) {
        validate_cron_field(field, lo, hi)
            .map_err(|e| Error::Validation(format!("cron expression '{cron}': {e}")))?;
    }
    Ok(())
}

fn validate_cron_field(field: &str, lo: u32, hi: u32) -> std::result::Result<(), String> {
    if field == "*" {
        return Ok(());
    }
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().map_err(|_| format!("bad step '{field}'"))?;
        if n == 0 {
            return Err(format!("step '{field}' must be > 0"));
        }
        return Ok(());
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            let start: u32 = start_s.parse().map_err(|_| format!("bad range '{part}'"))?;
            let end: u32 = end_s.parse().map_err(|_| format!("bad range '{part}'"))?;
            if start > end || start < lo || end > hi {
                return Err(format!("range '{part}' out of bounds [{lo}, {hi}]"));
            }
        } else {
            let n: u32 = part.parse().map_err(|_| format!("bad value '{part}'"))?;
            if n < lo || n > hi {
                return Err(format!("value '{part}' out of bounds [{lo}, {hi}]"));
            }
        }
    }
    Ok(())
}

/// Compute the next occurrence strictly after `after`, evaluated in `tz`, returned as
/// UTC. DST handling: spring-forward gaps are skipped; fall-back ambiguity resolves to
/// the earliest (pre-transition) mapping.
pub fn cron_next_tz(cron: &str, after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
    let local_after = after.with_timezone(&tz).naive_local();
    let next_min_secs = 60 - (local_after.second() as i64);
    let mut candidate = local_after + chrono::Duration::seconds(next_min_secs);
    candidate = candidate.with_second(0).unwrap_or(candidate);

    let max_checks = 366 * 24 * 60;
    for _ in 0..max_checks {
        if cron_matches_naive(cron, &candidate) {
            match tz.from_local_datetime(&candidate) {
                chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    return Some(earliest.with_timezone(&Utc));
                }
                chrono::LocalResult::None => {}
            }
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

pub fn cron_next(cron: &str, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron_next_tz(cron, after, chrono_tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cron_every_5_minutes() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        assert!(cron_matches("*/5 * * * *", &dt));
        let dt2 = Utc.with_ymd_and_hms(2024, 6, 15, 10, 3, 0).unwrap();
        assert!(!cron_matches("*/5 * * * *", &dt2));
    }

    #[test]
    fn cron_range() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        assert!(cron_matches("0 9-17 * * *", &dt));
        let dt2 = Utc.with_ymd_and_hms(2024, 6, 15, 20, 0, 0).unwrap();
        assert!(!cron_matches("0 9-17 * * *", &dt2));
    }

    #[test]
    fn cron_next_finds_occurrence() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let next = cron_next("30 * * * *", &after).unwrap();
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn valid_cron_passes() {
        assert!(validate_cron("0 13 * * *").is_ok());
        assert!(validate_cron("*/5 * * * *").is_ok());
        assert!(validate_cron("0,15,30,45 9-17 * * 1-5").is_ok());
    }

    #[test]
    fn invalid_cron_rejected() {
        assert!(validate_cron("not a cron").is_err());
        assert!(validate_cron("60 * * * *").is_err());
        assert!(validate_cron("0 24 * * *").is_err());
        assert!(validate_cron("0 0 32 * *").is_err());
        assert!(validate_cron("0 0 * 13 *").is_err());
        assert!(validate_cron("0 0 * * 7").is_err());
    }

    // SPEC_FULL.md §8 S5: DST preservation for Crontab-TZ "0 13 * * *" / US/Eastern.
    #[test]
    fn dst_preservation_hour_13_local_year_round() {
        let tz = "US/Eastern".parse::<chrono_tz::Tz>().unwrap();

        let winter_after = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let winter_next = cron_next_tz("0 13 * * *", &winter_after, tz).unwrap();
        assert_eq!(winter_next.with_timezone(&tz).hour(), 13);

        let summer_after = Utc.with_ymd_and_hms(2024, 7, 10, 0, 0, 0).unwrap();
        let summer_next = cron_next_tz("0 13 * * *", &summer_after, tz).unwrap();
        assert_eq!(summer_next.with_timezone(&tz).hour(), 13);

        // Different UTC offsets either side of the DST boundary.
        assert_ne!(winter_next.hour(), summer_next.hour());
    }

    #[test]
    fn cron_next_tz_spring_forward_skips_nonexistent_local_time() {
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap();
        let tz = "US/Eastern".parse::<chrono_tz::Tz>().unwrap();
        let next = cron_next_tz("30 2 * * *", &after, tz).unwrap();
        // 2:30 AM doesn't exist on 2024-03-10 in US/Eastern; next occurrence is the
        // following day.
        assert_eq!(next.with_timezone(&tz).day(), 11);
    }
}
