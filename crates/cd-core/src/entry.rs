//! The four schedule entry kinds (SPEC_FULL.md §3, §4.A).
//!
//! Expressed as one tagged-variant sum type rather than a trait-object hierarchy —
//! per §9's "no inheritance tree is required", the codec dispatches on the `type` tag
//! and `due_in`/`sent` are inherent `match`-based methods.

use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time::{utc_now_naive, validate_timezone};
use crate::value::{Args, Kwargs};
use crate::cron::{cron_next, cron_next_tz, validate_cron};

/// An Event that has already fired is "due" again only after this much time —
/// effectively never, matching the source's `timedelta(days=1)` sentinel.
const EVENT_SENT_REQUEUE: i64 = 1; // days

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Interval {
        key: String,
        enabled: bool,
        task: String,
        #[serde(default)]
        args: Option<Args>,
        #[serde(default)]
        kwargs: Option<Kwargs>,
        period_ms: i64,
        last_sent_at: NaiveDateTime,
    },
    Crontab {
        key: String,
        enabled: bool,
        task: String,
        #[serde(default)]
        args: Option<Args>,
        #[serde(default)]
        kwargs: Option<Kwargs>,
        cron_expression: String,
        last_sent_at: NaiveDateTime,
    },
    CrontabTz {
        key: String,
        enabled: bool,
        task: String,
        #[serde(default)]
        args: Option<Args>,
        #[serde(default)]
        kwargs: Option<Kwargs>,
        cron_expression: String,
        timezone: String,
        last_sent_at: NaiveDateTime,
    },
    Event {
        key: String,
        enabled: bool,
        task: String,
        #[serde(default)]
        args: Option<Args>,
        #[serde(default)]
        kwargs: Option<Kwargs>,
        due_at: NaiveDateTime,
        #[serde(default)]
        was_sent: bool,
    },
}

impl EntryKind {
    pub fn new_interval(
        key: impl Into<String>,
        task: impl Into<String>,
        period: Duration,
        enabled: bool,
    ) -> Result<Self> {
        if period <= Duration::zero() {
            return Err(Error::Validation("interval period must be > 0".into()));
        }
        Ok(EntryKind::Interval {
            key: key.into(),
            enabled,
            task: task.into(),
            args: None,
            kwargs: None,
            period_ms: period.num_milliseconds(),
            last_sent_at: utc_now_naive(),
        })
    }

    pub fn new_crontab(
        key: impl Into<String>,
        task: impl Into<String>,
        cron_expression: impl Into<String>,
        enabled: bool,
    ) -> Result<Self> {
        let cron_expression = cron_expression.into();
        validate_cron(&cron_expression)?;
        Ok(EntryKind::Crontab {
            key: key.into(),
            enabled,
            task: task.into(),
            args: None,
            kwargs: None,
            cron_expression,
            last_sent_at: utc_now_naive(),
        })
    }

    pub fn new_crontab_tz(
        key: impl Into<String>,
        task: impl Into<String>,
        cron_expression: impl Into<String>,
        timezone: impl Into<String>,
        enabled: bool,
    ) -> Result<Self> {
        let cron_expression = cron_expression.into();
        let timezone = timezone.into();
        validate_cron(&cron_expression)?;
        validate_timezone(&timezone)?;
        Ok(EntryKind::CrontabTz {
            key: key.into(),
            enabled,
            task: task.into(),
            args: None,
            kwargs: None,
            cron_expression,
            timezone,
            last_sent_at: utc_now_naive(),
        })
    }

    pub fn new_event(
        key: impl Into<String>,
        task: impl Into<String>,
        due_at: NaiveDateTime,
        enabled: bool,
    ) -> Self {
        EntryKind::Event {
            key: key.into(),
            enabled,
            task: task.into(),
            args: None,
            kwargs: None,
            due_at,
            was_sent: false,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            EntryKind::Interval { key, .. }
            | EntryKind::Crontab { key, .. }
            | EntryKind::CrontabTz { key, .. }
            | EntryKind::Event { key, .. } => key,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            EntryKind::Interval { enabled, .. }
            | EntryKind::Crontab { enabled, .. }
            | EntryKind::CrontabTz { enabled, .. }
            | EntryKind::Event { enabled, .. } => *enabled,
        }
    }

    pub fn task(&self) -> &str {
        match self {
            EntryKind::Interval { task, .. }
            | EntryKind::Crontab { task, .. }
            | EntryKind::CrontabTz { task, .. }
            | EntryKind::Event { task, .. } => task,
        }
    }

    pub fn args(&self) -> Option<&Args> {
        match self {
            EntryKind::Interval { args, .. }
            | EntryKind::Crontab { args, .. }
            | EntryKind::CrontabTz { args, .. }
            | EntryKind::Event { args, .. } => args.as_ref(),
        }
    }

    pub fn kwargs(&self) -> Option<&Kwargs> {
        match self {
            EntryKind::Interval { kwargs, .. }
            | EntryKind::Crontab { kwargs, .. }
            | EntryKind::CrontabTz { kwargs, .. }
            | EntryKind::Event { kwargs, .. } => kwargs.as_ref(),
        }
    }

    /// The type tag used by the codec (SPEC_FULL.md §4.B). Kept in sync with the
    /// `#[serde(tag = "type")]` variant names above.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            EntryKind::Interval { .. } => "interval",
            EntryKind::Crontab { .. } => "crontab",
            EntryKind::CrontabTz { .. } => "crontab_tz",
            EntryKind::Event { .. } => "event",
        }
    }

    /// Field names `save` must preserve from the stored copy unless the caller opts
    /// out (SPEC_FULL.md §3, §8 invariant 3).
    pub fn client_read_only_fields(&self) -> &'static [&'static str] {
        match self {
            EntryKind::Interval { .. } | EntryKind::Crontab { .. } | EntryKind::CrontabTz { .. } => {
                &["last_sent_at"]
            }
            EntryKind::Event { .. } => &["was_sent"],
        }
    }

    /// Signed time until next fire; `<= 0` means "fire now". Computed exactly once
    /// per call — callers must not call this twice within one dispatch iteration and
    /// expect a stable answer across a `sent()` in between (SPEC_FULL.md §4.A).
    pub fn due_in(&self) -> Duration {
        let now = Utc::now();
        match self {
            EntryKind::Interval {
                period_ms,
                last_sent_at,
                ..
            } => {
                let period = Duration::milliseconds(*period_ms);
                let elapsed = now.naive_utc() - *last_sent_at;
                period - elapsed
            }
            EntryKind::Crontab {
                cron_expression,
                last_sent_at,
                ..
            } => {
                let start = last_sent_at.and_utc();
                match cron_next(cron_expression, &start) {
                    Some(next) => next - now,
                    None => Duration::days(3650),
                }
            }
            EntryKind::CrontabTz {
                cron_expression,
                timezone,
                last_sent_at,
                ..
            } => {
                // Unwrap: constructors validate the timezone; a malformed value here
                // would mean the entry was deserialized from corrupted storage.
                let tz: chrono_tz::Tz = timezone
                    .parse()
                    .unwrap_or(chrono_tz::UTC);
                let start = last_sent_at.and_utc();
                match cron_next_tz(cron_expression, &start, tz) {
                    Some(next) => next - now,
                    None => Duration::days(3650),
                }
            }
            EntryKind::Event { due_at, was_sent, .. } => {
                if *was_sent {
                    return Duration::days(EVENT_SENT_REQUEUE);
                }
                // Preserved diagnostic leakage from the source (SPEC_FULL.md §9): the
                // original prints the normalized naive timestamp on every call.
                tracing::trace!(due_at = %due_at, "event due_in evaluated");
                due_at.and_utc() - now
            }
        }
    }

    /// Mutate client-read-only fields to reflect firing at the current instant
    /// (SPEC_FULL.md §4.A, §8 invariants 4-5).
    pub fn sent(&mut self) {
        match self {
            EntryKind::Interval { last_sent_at, .. }
            | EntryKind::Crontab { last_sent_at, .. }
            | EntryKind::CrontabTz { last_sent_at, .. } => {
                *last_sent_at = utc_now_naive();
            }
            EntryKind::Event {
                was_sent, enabled, ..
            } => {
                *was_sent = true;
                *enabled = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::normalize_to_naive_utc;

    #[test]
    fn interval_rejects_non_positive_period() {
        assert!(EntryKind::new_interval("t", "task", Duration::zero(), true).is_err());
        assert!(EntryKind::new_interval("t", "task", Duration::milliseconds(-1), true).is_err());
        assert!(EntryKind::new_interval("t", "task", Duration::milliseconds(100), true).is_ok());
    }

    #[test]
    fn interval_sent_advances_last_sent_at() {
        let mut e = EntryKind::new_interval("t", "task", Duration::seconds(1), true).unwrap();
        let before = match &e {
            EntryKind::Interval { last_sent_at, .. } => *last_sent_at,
            _ => unreachable!(),
        };
        std::thread::sleep(std::time::Duration::from_millis(5));
        e.sent();
        let after = match &e {
            EntryKind::Interval { last_sent_at, .. } => *last_sent_at,
            _ => unreachable!(),
        };
        assert!(after > before);
    }

    #[test]
    fn crontab_rejects_invalid_expression() {
        assert!(EntryKind::new_crontab("t", "task", "not a cron", true).is_err());
        assert!(EntryKind::new_crontab("t", "task", "0 13 * * *", true).is_ok());
    }

    #[test]
    fn crontab_tz_rejects_invalid_timezone() {
        assert!(
            EntryKind::new_crontab_tz("t", "task", "0 13 * * *", "Not/A/Zone", true).is_err()
        );
        assert!(
            EntryKind::new_crontab_tz("t", "task", "0 13 * * *", "US/Eastern", true).is_ok()
        );
    }

    #[test]
    fn event_due_now_and_sent_disables_permanently() {
        let due_at = normalize_to_naive_utc("2000-01-01T00:00:00").unwrap();
        let mut e = EntryKind::new_event("t", "task", due_at, true);
        assert!(e.due_in() <= Duration::zero());
        e.sent();
        match &e {
            EntryKind::Event {
                was_sent, enabled, ..
            } => {
                assert!(*was_sent);
                assert!(!*enabled);
            }
            _ => unreachable!(),
        }
        assert!(e.due_in() > Duration::zero());
    }

    #[test]
    fn client_read_only_fields_match_kind() {
        let interval = EntryKind::new_interval("t", "task", Duration::seconds(1), true).unwrap();
        assert_eq!(interval.client_read_only_fields(), &["last_sent_at"]);

        let due_at = normalize_to_naive_utc("2030-01-01T00:00:00").unwrap();
        let event = EntryKind::new_event("t", "task", due_at, true);
        assert_eq!(event.client_read_only_fields(), &["was_sent"]);
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(
            EntryKind::new_interval("t", "task", Duration::seconds(1), true)
                .unwrap()
                .kind_tag(),
            "interval"
        );
        assert_eq!(
            EntryKind::new_crontab("t", "task", "0 13 * * *", true)
                .unwrap()
                .kind_tag(),
            "crontab"
        );
        assert_eq!(
            EntryKind::new_crontab_tz("t", "task", "0 13 * * *", "UTC", true)
                .unwrap()
                .kind_tag(),
            "crontab_tz"
        );
    }
}
