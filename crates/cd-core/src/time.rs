//! Naive-UTC timestamp helpers (SPEC_FULL.md §3 "Entry validation invariants").
//!
//! Every "naive UTC timestamp" field in this crate is typed as `chrono::NaiveDateTime`,
//! which has no offset component at all — the type system itself rejects
//! timezone-aware input for those fields, since there is no conversion from
//! `DateTime<Tz>` to `NaiveDateTime` that serde will pick implicitly. The one place
//! aware input is accepted on purpose is `EntryKind::Event::due_at` (SPEC_FULL.md §3),
//! which goes through [`normalize_to_naive_utc`] instead of a field-typed deserialize.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

use crate::error::{Error, Result};

pub fn utc_now_naive() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Accepts either an aware RFC3339 timestamp or a bare naive one, returning UTC naive
/// either way. Mirrors `event_entry.py`'s "accepts aware or naive" constructor.
pub fn normalize_to_naive_utc(raw: &str) -> Result<NaiveDateTime> {
    if let Ok(aware) = DateTime::<FixedOffset>::parse_from_rfc3339(raw) {
        return Ok(aware.with_timezone(&Utc).naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| Error::Validation(format!("invalid timestamp '{raw}': {e}")))
}

pub fn validate_timezone(tz: &str) -> Result<chrono_tz::Tz> {
    tz.parse::<chrono_tz::Tz>()
        .map_err(|_| Error::Validation(format!("unknown timezone '{tz}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_aware_rfc3339_to_utc_naive() {
        let naive = normalize_to_naive_utc("2024-06-15T09:30:00-04:00").unwrap();
        assert_eq!(naive.to_string(), "2024-06-15 13:30:00");
    }

    #[test]
    fn accepts_already_naive_input() {
        let naive = normalize_to_naive_utc("2024-06-15T09:30:00").unwrap();
        assert_eq!(naive.to_string(), "2024-06-15 09:30:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(normalize_to_naive_utc("not a timestamp").is_err());
    }

    #[test]
    fn validates_known_and_rejects_unknown_timezone() {
        assert!(validate_timezone("US/Eastern").is_ok());
        assert!(validate_timezone("Not/A/Zone").is_err());
    }
}
