use chrono::{DateTime, Duration, Utc};

use super::RepeatTracker;
use crate::condition::ConditionContext;

/// Satisfied once at or after a fixed instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleTriggerTimeCondition {
    target_time: DateTime<Utc>,
    armed_at: DateTime<Utc>,
    repeats: RepeatTracker,
    satisfied: bool,
}

impl SingleTriggerTimeCondition {
    pub fn at(target_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            target_time,
            armed_at: now.min(target_time),
            repeats: RepeatTracker::new(1),
            satisfied: false,
        }
    }

    pub fn after_delay(delay: Duration, now: DateTime<Utc>) -> Self {
        Self::at(now + delay.max(Duration::zero()), now)
    }

    pub fn target_time(&self) -> DateTime<Utc> {
        self.target_time
    }

    pub fn satisfied(&self) -> bool {
        self.satisfied
    }

    pub fn next_trigger_time(&self) -> Option<DateTime<Utc>> {
        self.repeats.can_trigger_again().then_some(self.target_time)
    }

    pub fn is_satisfied(&mut self, ctx: &ConditionContext<'_>) -> bool {
        if !self.satisfied
            && !self.repeats.is_paused()
            && self.repeats.can_trigger_again()
            && ctx.now() >= self.target_time
        {
            self.satisfied = true;
        }
        self.satisfied
    }

    pub fn progress(&self, ctx: &ConditionContext<'_>) -> f64 {
        if self.satisfied {
            return 100.0;
        }
        if !self.repeats.can_trigger_again() {
            return 0.0;
        }
        let span = (self.target_time - self.armed_at).num_milliseconds();
        if span <= 0 {
            return 100.0;
        }
        let elapsed = (ctx.now() - self.armed_at).num_milliseconds();
        (elapsed as f64 * 100.0 / span as f64).clamp(0.0, 100.0)
    }

    pub fn reset(&mut self) {
        if self.satisfied {
            self.repeats.record_valid_reset();
        }
        self.satisfied = false;
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        self.repeats.pause(now);
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        if let Some(paused_for) = self.repeats.resume(now) {
            if !self.satisfied {
                self.target_time += paused_for;
            }
        }
    }

    pub fn describe(&self) -> String {
        format!("Once at {}", self.target_time.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::test_support::{ctx, fixed_time, minutes};
    use crate::game::GameSnapshot;

    #[test]
    fn fires_once_then_exhausts() {
        let game = GameSnapshot::new();
        let t0 = fixed_time();
        let mut condition = SingleTriggerTimeCondition::after_delay(minutes(10), t0);
        assert!(!condition.is_satisfied(&ctx(t0 + minutes(9), &game)));
        assert_eq!(condition.progress(&ctx(t0 + minutes(5), &game)), 50.0);
        assert!(condition.is_satisfied(&ctx(t0 + minutes(10), &game)));

        condition.reset();
        assert_eq!(condition.next_trigger_time(), None);
        assert!(!condition.is_satisfied(&ctx(t0 + minutes(20), &game)));
    }

    #[test]
    fn reset_before_firing_keeps_it_armed() {
        let game = GameSnapshot::new();
        let t0 = fixed_time();
        let mut condition = SingleTriggerTimeCondition::after_delay(minutes(10), t0);
        condition.reset();
        assert!(condition.is_satisfied(&ctx(t0 + minutes(10), &game)));
    }

    #[test]
    fn pause_postpones_target() {
        let t0 = fixed_time();
        let mut condition = SingleTriggerTimeCondition::after_delay(minutes(10), t0);
        condition.pause(t0);
        condition.resume(t0 + minutes(5));
        assert_eq!(condition.target_time(), t0 + minutes(15));
    }
}
