//! Evaluation context handed to every condition operation.

use chrono::{DateTime, Utc};

use crate::game::GameView;

/// Inclusive uniform draw in `[min, max]`.
pub type RangeRoll<'a> = &'a dyn Fn(i64, i64) -> i64;

/// Everything a condition may observe while being evaluated or reset.
///
/// The clock and the random source are injected so that the domain stays
/// deterministic under test.
#[derive(Clone, Copy)]
pub struct ConditionContext<'a> {
    now: DateTime<Utc>,
    game: &'a dyn GameView,
    roll: RangeRoll<'a>,
}

impl<'a> ConditionContext<'a> {
    pub fn new(now: DateTime<Utc>, game: &'a dyn GameView, roll: RangeRoll<'a>) -> Self {
        Self { now, game, roll }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn game(&self) -> &'a dyn GameView {
        self.game
    }

    /// Same context observed at a different instant.
    pub fn at(&self, now: DateTime<Utc>) -> Self {
        Self { now, ..*self }
    }

    /// Draws uniformly in `[min, max]`. The result is clamped even if the
    /// injected source misbehaves.
    pub fn roll(&self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        (self.roll)(min, max).clamp(min, max)
    }
}

impl std::fmt::Debug for ConditionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionContext")
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}
