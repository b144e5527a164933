use chrono::{DateTime, Duration, Utc};

use super::{format_duration, RepeatTracker};
use crate::condition::ConditionContext;

/// Fires every `interval`, optionally jittered, up to `max_repeats` times.
///
/// The first trigger is immediate unless an initial delay is configured.
/// After each valid reset the next trigger is `now + drawn interval`.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalCondition {
    interval: Duration,
    min_interval: Duration,
    max_interval: Duration,
    initial_delay: Option<Duration>,
    current_interval: Duration,
    next_trigger: Option<DateTime<Utc>>,
    repeats: RepeatTracker,
    satisfied: bool,
}

impl IntervalCondition {
    pub fn new(interval: Duration, now: DateTime<Utc>) -> Self {
        let interval = interval.max(Duration::seconds(1));
        Self {
            interval,
            min_interval: interval,
            max_interval: interval,
            initial_delay: None,
            current_interval: interval,
            next_trigger: Some(now),
            repeats: RepeatTracker::default(),
            satisfied: false,
        }
    }

    pub fn every_minutes(minutes: i64, now: DateTime<Utc>) -> Self {
        Self::new(Duration::minutes(minutes), now)
    }

    /// Jitters each interval by up to `factor` (clamped to `[0, 1]`) in
    /// either direction.
    pub fn with_variation(interval: Duration, factor: f64, now: DateTime<Utc>) -> Self {
        let factor = if factor.is_finite() {
            factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mut condition = Self::new(interval, now);
        let seconds = condition.interval.num_seconds() as f64;
        condition.min_interval = Duration::seconds(((seconds * (1.0 - factor)).round() as i64).max(1));
        condition.max_interval =
            Duration::try_seconds((seconds * (1.0 + factor)).round() as i64).unwrap_or(condition.interval);
        condition
    }

    /// Draws each interval in `[min, max]`. The nominal interval is the mean.
    pub fn randomized(min: Duration, max: Duration, now: DateTime<Utc>) -> Self {
        let min = min.max(Duration::seconds(1));
        let max = max.max(min);
        let mean = min.checked_add(&max).map_or(max, |sum| sum / 2);
        let mut condition = Self::new(mean, now);
        condition.min_interval = min;
        condition.max_interval = max;
        condition
    }

    pub fn with_max_repeats(mut self, max_repeats: u32) -> Self {
        self.repeats.set_max_repeats(max_repeats);
        self
    }

    /// Delays the first trigger to `now + delay`. A delay past the
    /// representable range is ignored.
    pub fn with_initial_delay(mut self, delay: Duration, now: DateTime<Utc>) -> Self {
        let delay = delay.max(Duration::zero());
        if let Some(first) = now.checked_add_signed(delay) {
            self.initial_delay = Some(delay);
            self.next_trigger = Some(first);
        }
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn initial_delay(&self) -> Option<Duration> {
        self.initial_delay
    }

    pub fn is_randomized(&self) -> bool {
        self.min_interval != self.max_interval
    }

    pub fn repeats(&self) -> &RepeatTracker {
        &self.repeats
    }

    pub fn satisfied(&self) -> bool {
        self.satisfied
    }

    /// Next trigger instant, absent once the repeat budget is exhausted.
    pub fn next_trigger_time(&self) -> Option<DateTime<Utc>> {
        if self.repeats.can_trigger_again() {
            self.next_trigger
        } else {
            None
        }
    }

    pub fn is_satisfied(&mut self, ctx: &ConditionContext<'_>) -> bool {
        if self.satisfied {
            return true;
        }
        if self.repeats.is_paused() {
            return false;
        }
        if let Some(next) = self.next_trigger_time() {
            if ctx.now() >= next {
                self.satisfied = true;
            }
        }
        self.satisfied
    }

    pub fn progress(&self, ctx: &ConditionContext<'_>) -> f64 {
        if self.satisfied {
            return 100.0;
        }
        let Some(next) = self.next_trigger_time() else {
            return 0.0;
        };
        let span = self.current_interval.num_milliseconds();
        if span <= 0 {
            return 0.0;
        }
        let remaining = (next - ctx.now()).num_milliseconds();
        let elapsed = span - remaining;
        (elapsed as f64 * 100.0 / span as f64).clamp(0.0, 100.0)
    }

    pub fn reset(&mut self, randomize: bool, ctx: &ConditionContext<'_>) {
        if self.satisfied {
            self.repeats.record_valid_reset();
        }
        self.satisfied = false;

        self.current_interval = if randomize && self.is_randomized() {
            Duration::try_seconds(ctx.roll(
                self.min_interval.num_seconds(),
                self.max_interval.num_seconds(),
            ))
            .unwrap_or(self.interval)
        } else {
            self.interval
        };

        // Past the representable range the condition never triggers again.
        let now = ctx.now();
        self.next_trigger = if self.repeats.valid_reset_count() == 0 {
            match self.initial_delay {
                Some(delay) => now.checked_add_signed(delay),
                None => Some(now),
            }
        } else {
            now.checked_add_signed(self.current_interval)
        };
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        self.repeats.pause(now);
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        if let Some(paused_for) = self.repeats.resume(now) {
            if !self.satisfied {
                self.next_trigger = self.next_trigger.and_then(|next| next.checked_add_signed(paused_for));
            }
        }
    }

    pub fn describe(&self) -> String {
        let mut description = if self.is_randomized() {
            format!(
                "Every {}-{}",
                format_duration(self.min_interval),
                format_duration(self.max_interval)
            )
        } else {
            format!("Every {}", format_duration(self.interval))
        };
        if self.repeats.max_repeats() > 0 {
            description.push_str(&format!(
                " ({}/{} runs)",
                self.repeats.valid_reset_count(),
                self.repeats.max_repeats()
            ));
        }
        description
    }
}
