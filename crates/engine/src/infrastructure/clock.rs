//! Clock and random implementations.

use crate::infrastructure::ports::{ClockPort, RandomPort};
use chrono::{DateTime, Utc};

/// System clock - uses real time.
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// System random - uses real randomness.
pub struct SystemRandom;

impl SystemRandom {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomPort for SystemRandom {
    fn gen_range(&self, min: i64, max: i64) -> i64 {
        use rand::Rng;
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

/// Fixed clock for testing.
#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl ClockPort for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Wall clock that follows tokio's (possibly paused) time, for tests that
/// advance time with `tokio::time::advance`.
#[cfg(test)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

#[cfg(test)]
impl TokioClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }
}

#[cfg(test)]
impl ClockPort for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}

/// Fixed random for testing. Returns the value clamped into the range.
#[cfg(test)]
pub struct FixedRandom(pub i64);

#[cfg(test)]
impl RandomPort for FixedRandom {
    fn gen_range(&self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        self.0.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_random_stays_in_range() {
        let random = SystemRandom::new();
        for _ in 0..100 {
            let value = random.gen_range(3, 7);
            assert!((3..=7).contains(&value));
        }
        assert_eq!(random.gen_range(5, 5), 5);
        assert_eq!(random.gen_range(9, 2), 9);
    }

    #[test]
    fn fixed_random_clamps() {
        assert_eq!(FixedRandom(100).gen_range(1, 10), 10);
        assert_eq!(FixedRandom(-4).gen_range(1, 10), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let origin = Utc::now();
        let clock = TokioClock::starting_at(origin);

        tokio::time::advance(std::time::Duration::from_secs(90)).await;

        assert_eq!(clock.now() - origin, chrono::Duration::seconds(90));
    }
}
