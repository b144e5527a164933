//! Fixtures shared by the condition tests.

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::ConditionContext;
use crate::game::GameSnapshot;

/// 2023-11-14T22:13:20Z, a Tuesday.
pub(crate) fn fixed_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub(crate) fn minutes(m: i64) -> Duration {
    Duration::minutes(m)
}

pub(crate) fn roll_min(min: i64, _max: i64) -> i64 {
    min
}

pub(crate) fn roll_max(_min: i64, max: i64) -> i64 {
    max
}

pub(crate) fn ctx(now: DateTime<Utc>, game: &GameSnapshot) -> ConditionContext<'_> {
    ConditionContext::new(now, game, &roll_min)
}

pub(crate) fn ctx_max(now: DateTime<Utc>, game: &GameSnapshot) -> ConditionContext<'_> {
    ConditionContext::new(now, game, &roll_max)
}
