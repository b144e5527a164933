//! Time-based conditions.
//!
//! Every time condition shares a [`RepeatTracker`]: a bound on how many
//! satisfied cycles may elapse, and a pause clock that blocks satisfaction
//! and shifts pending trigger instants on resume.

mod day_of_week;
mod interval;
mod single_trigger;
mod window;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

pub use day_of_week::{weekday_name, DayOfWeekCondition};
pub use interval::IntervalCondition;
pub use single_trigger::SingleTriggerTimeCondition;
pub use window::{TimeWindowCondition, TimeWindowSchedule};

// ============================================================================
// Repeat tracking
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepeatTracker {
    /// 0 means unlimited.
    max_repeats: u32,
    valid_reset_count: u32,
    paused_at: Option<DateTime<Utc>>,
}

impl RepeatTracker {
    pub fn new(max_repeats: u32) -> Self {
        Self {
            max_repeats,
            ..Self::default()
        }
    }

    pub fn max_repeats(&self) -> u32 {
        self.max_repeats
    }

    pub fn set_max_repeats(&mut self, max_repeats: u32) {
        self.max_repeats = max_repeats;
    }

    /// Number of resets that happened while the condition was satisfied.
    pub fn valid_reset_count(&self) -> u32 {
        self.valid_reset_count
    }

    pub fn can_trigger_again(&self) -> bool {
        self.max_repeats == 0 || self.valid_reset_count < self.max_repeats
    }

    pub fn record_valid_reset(&mut self) {
        self.valid_reset_count = self.valid_reset_count.saturating_add(1);
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Ends a pause and returns how long it lasted.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        self.paused_at
            .take()
            .map(|paused_at| (now - paused_at).max(Duration::zero()))
    }
}

// ============================================================================
// Repeat cycle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatCycle {
    OneTime,
    Minutes,
    Hours,
    #[default]
    Days,
    Weeks,
}

impl RepeatCycle {
    /// Length of one repeat step, for cycles that step by a fixed amount.
    pub fn step(self, interval: u32) -> Option<Duration> {
        let n = i64::from(interval.max(1));
        match self {
            RepeatCycle::OneTime => None,
            RepeatCycle::Minutes => Some(Duration::minutes(n)),
            RepeatCycle::Hours => Some(Duration::hours(n)),
            RepeatCycle::Days => Some(Duration::days(n)),
            RepeatCycle::Weeks => Some(Duration::weeks(n)),
        }
    }

    fn unit_name(self) -> &'static str {
        match self {
            RepeatCycle::OneTime => "once",
            RepeatCycle::Minutes => "minute",
            RepeatCycle::Hours => "hour",
            RepeatCycle::Days => "day",
            RepeatCycle::Weeks => "week",
        }
    }
}

impl fmt::Display for RepeatCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepeatCycle::OneTime => "ONE_TIME",
            RepeatCycle::Minutes => "MINUTES",
            RepeatCycle::Hours => "HOURS",
            RepeatCycle::Days => "DAYS",
            RepeatCycle::Weeks => "WEEKS",
        };
        f.write_str(name)
    }
}

impl FromStr for RepeatCycle {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONE_TIME" | "ONETIME" => Ok(RepeatCycle::OneTime),
            "MINUTES" => Ok(RepeatCycle::Minutes),
            "HOURS" => Ok(RepeatCycle::Hours),
            "DAYS" => Ok(RepeatCycle::Days),
            "WEEKS" => Ok(RepeatCycle::Weeks),
            _ => Err(DomainError::parse(format!("Unknown repeat cycle: {}", s))),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolves a local wall-clock time in `zone` to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant. Times inside a
/// DST gap move forward one hour.
pub fn resolve_local(zone: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = local + Duration::hours(1);
            zone.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&local))
        }
    }
}

/// Formats a duration as `1h 5m 0s` / `5m 0s` / `42s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::test_support::{fixed_time, minutes};
    use chrono::NaiveDate;

    #[test]
    fn tracker_limits_and_counts_valid_resets() {
        let mut tracker = RepeatTracker::new(2);
        assert!(tracker.can_trigger_again());
        tracker.record_valid_reset();
        tracker.record_valid_reset();
        assert!(!tracker.can_trigger_again());
        assert!(RepeatTracker::new(0).can_trigger_again());
    }

    #[test]
    fn tracker_reports_pause_length_once() {
        let mut tracker = RepeatTracker::default();
        tracker.pause(fixed_time());
        tracker.pause(fixed_time() + minutes(3));
        assert!(tracker.is_paused());
        assert_eq!(tracker.resume(fixed_time() + minutes(10)), Some(minutes(10)));
        assert_eq!(tracker.resume(fixed_time() + minutes(20)), None);
    }

    #[test]
    fn resolve_local_handles_dst_gap() {
        let zone: Tz = "Europe/London".parse().unwrap();
        // 01:30 on 2024-03-31 does not exist in London.
        let local = NaiveDate::from_ymd_opt(2024, 3, 31)
            .unwrap()
            .and_hms_opt(1, 30, 0)
            .unwrap();
        let resolved = resolve_local(zone, local);
        assert_eq!(resolved.to_rfc3339(), "2024-03-31T01:30:00+00:00");
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(minutes(5)), "5m 0s");
        assert_eq!(format_duration(minutes(65)), "1h 5m 0s");
        assert_eq!(format_duration(Duration::seconds(42)), "42s");
    }

    #[test]
    fn repeat_cycle_parses_persisted_names() {
        assert_eq!("ONE_TIME".parse::<RepeatCycle>().unwrap(), RepeatCycle::OneTime);
        assert_eq!("weeks".parse::<RepeatCycle>().unwrap(), RepeatCycle::Weeks);
        assert!("fortnights".parse::<RepeatCycle>().is_err());
    }
}
