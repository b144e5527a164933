//! Bounded retry with capped exponential backoff.
//!
//! Used for cleanup steps that may not succeed on the first try, such as
//! leaving an area the task is stuck in. Cancellation is observed before
//! every attempt and during every delay.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::infrastructure::ports::RandomPort;

/// Attempts between progress warnings while an operation keeps failing.
const WARN_EVERY: u32 = 5;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never less than 1 in practice.
    pub max_attempts: u32,
    /// Delay in milliseconds after the first failed attempt
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,
    /// Jitter factor (0.0-1.0) for randomizing delays
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            base_delay_ms: 1000,
            max_delay_ms: 2000,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped, then jittered.
    pub fn calculate_delay(&self, attempt: u32, random: &dyn RandomPort) -> Duration {
        let base = self.base_delay_ms;
        let exponential = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.max_delay_ms);

        let jitter_factor = if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let jitter_range = (capped as f64 * jitter_factor) as i64;
        let millis = if jitter_range > 0 {
            let jitter = random.gen_range(-jitter_range, jitter_range);
            (capped as i64).saturating_add(jitter).max(0) as u64
        } else {
            capped
        };
        Duration::from_millis(millis)
    }
}

/// How a retried operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: E },
    Cancelled { attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Runs `operation` until it succeeds, the policy runs out of attempts, or
/// `cancel` fires. `operation` receives the 1-based attempt number. There is
/// no delay after the final attempt.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    random: &dyn RandomPort,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            tracing::info!(operation = operation_name, attempt, "Retry loop cancelled");
            return RetryOutcome::Cancelled { attempts: attempt };
        }
        attempt += 1;

        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, operation = operation_name, "Succeeded after retry");
                }
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Err(e) => e,
        };

        if attempt >= max_attempts {
            tracing::error!(
                attempts = attempt,
                error = %error,
                operation = operation_name,
                "Failed after all retry attempts"
            );
            return RetryOutcome::Exhausted {
                attempts: attempt,
                last_error: error,
            };
        }

        let delay = policy.calculate_delay(attempt, random);
        if attempt % WARN_EVERY == 0 {
            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                operation = operation_name,
                "Still failing, retrying..."
            );
        } else {
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                operation = operation_name,
                "Attempt failed, retrying"
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(operation = operation_name, attempt, "Retry delay cancelled");
                return RetryOutcome::Cancelled { attempts: attempt };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedRandom;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter_factor: 0.0,
        }
    }

    mod delays {
        use super::*;

        #[test]
        fn doubles_until_capped() {
            let policy = RetryPolicy {
                max_attempts: 15,
                base_delay_ms: 1000,
                max_delay_ms: 5000,
                jitter_factor: 0.0,
            };
            let random = FixedRandom(0);
            let delays: Vec<u64> = (1..=5)
                .map(|attempt| policy.calculate_delay(attempt, &random).as_millis() as u64)
                .collect();

            assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000]);
        }

        #[test]
        fn default_policy_caps_at_two_seconds() {
            let policy = RetryPolicy::default();
            let random = FixedRandom(0);

            assert_eq!(policy.calculate_delay(1, &random), Duration::from_millis(1000));
            assert_eq!(policy.calculate_delay(14, &random), Duration::from_millis(2000));
        }

        #[test]
        fn jitter_stays_within_factor() {
            let policy = RetryPolicy {
                jitter_factor: 0.5,
                ..RetryPolicy::default()
            };

            assert_eq!(policy.calculate_delay(1, &FixedRandom(i64::MAX)), Duration::from_millis(1500));
            assert_eq!(policy.calculate_delay(1, &FixedRandom(i64::MIN)), Duration::from_millis(500));
        }

        #[test]
        fn huge_attempt_numbers_do_not_overflow() {
            let policy = RetryPolicy::default();
            assert_eq!(policy.calculate_delay(u32::MAX, &FixedRandom(0)), Duration::from_millis(2000));
        }
    }

    mod outcomes {
        use super::*;

        #[tokio::test]
        async fn succeeds_without_retry() {
            let cancel = CancellationToken::new();
            let outcome: RetryOutcome<&str, String> =
                retry_with_backoff(&fast_policy(3), "test", &cancel, &FixedRandom(0), |_| async {
                    Ok("done")
                })
                .await;

            assert_eq!(
                outcome,
                RetryOutcome::Succeeded {
                    value: "done",
                    attempts: 1
                }
            );
        }

        #[tokio::test]
        async fn succeeds_after_retry() {
            let calls = Arc::new(AtomicU32::new(0));
            let cancel = CancellationToken::new();

            let outcome = retry_with_backoff(&fast_policy(5), "test", &cancel, &FixedRandom(0), |_| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient")
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

            assert_eq!(outcome.attempts(), 3);
            assert!(matches!(outcome, RetryOutcome::Succeeded { .. }));
        }

        #[tokio::test(start_paused = true)]
        async fn exhausts_fifteen_attempts_with_capped_backoff() {
            let calls = Arc::new(AtomicU32::new(0));
            let cancel = CancellationToken::new();
            let started = tokio::time::Instant::now();

            let outcome: RetryOutcome<(), String> = retry_with_backoff(
                &RetryPolicy::default(),
                "leave area",
                &cancel,
                &FixedRandom(0),
                |attempt| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(format!("still inside (attempt {})", attempt))
                    }
                },
            )
            .await;

            assert_eq!(calls.load(Ordering::SeqCst), 15);
            assert_eq!(
                outcome,
                RetryOutcome::Exhausted {
                    attempts: 15,
                    last_error: "still inside (attempt 15)".to_string()
                }
            );
            // 1s after the first failure, then 2s for each of the next 13.
            assert_eq!(started.elapsed(), Duration::from_secs(1 + 2 * 13));
        }

        #[tokio::test]
        async fn cancelled_before_first_attempt() {
            let cancel = CancellationToken::new();
            cancel.cancel();

            let outcome: RetryOutcome<(), String> =
                retry_with_backoff(&fast_policy(3), "test", &cancel, &FixedRandom(0), |_| async {
                    Ok(())
                })
                .await;

            assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 0 });
        }

        #[tokio::test(start_paused = true)]
        async fn cancellation_interrupts_the_delay() {
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            let policy = RetryPolicy {
                max_attempts: 10,
                base_delay_ms: 60_000,
                max_delay_ms: 60_000,
                jitter_factor: 0.0,
            };

            let handle = tokio::spawn(async move {
                retry_with_backoff(&policy, "test", &cancel, &FixedRandom(0), |_| async {
                    Err::<(), _>("nope")
                })
                .await
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();

            let outcome = handle.await.unwrap();
            assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 1 });
        }
    }
}
