//! Engine settings from the environment.
//!
//! Every variable is optional. A value that does not parse falls back to its
//! default with a warning; only combinations that cannot work are rejected.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::orchestration::retry::RetryPolicy;

const SCHEDULE_FILE: &str = "TASKLOOM_SCHEDULE_FILE";
const TICK_MS: &str = "TASKLOOM_TICK_MS";
const SNAPSHOT_TIMEOUT_MS: &str = "TASKLOOM_SNAPSHOT_TIMEOUT_MS";
const PRE_TIMEOUT_SECS: &str = "TASKLOOM_PRE_TIMEOUT_SECS";
const POST_TIMEOUT_SECS: &str = "TASKLOOM_POST_TIMEOUT_SECS";
const LOCK_WAIT_SECS: &str = "TASKLOOM_LOCK_WAIT_SECS";
const SOFT_STOP_RETRY_SECS: &str = "TASKLOOM_SOFT_STOP_RETRY_SECS";
const HARD_STOP_TIMEOUT_SECS: &str = "TASKLOOM_HARD_STOP_TIMEOUT_SECS";
const CLEANUP_MAX_ATTEMPTS: &str = "TASKLOOM_CLEANUP_MAX_ATTEMPTS";
const CLEANUP_BASE_DELAY_MS: &str = "TASKLOOM_CLEANUP_BASE_DELAY_MS";
const CLEANUP_MAX_DELAY_MS: &str = "TASKLOOM_CLEANUP_MAX_DELAY_MS";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Timeouts for the pre and post schedule phases of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSettings {
    pub pre_schedule_timeout: Duration,
    pub post_schedule_timeout: Duration,
    /// How long the post phase waits for a held entry lock.
    pub lock_wait: Duration,
    pub lock_poll: Duration,
    /// Per-requirement bound inside a phase.
    pub requirement_timeout: Duration,
    pub cleanup_retry: RetryPolicy,
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            pre_schedule_timeout: Duration::from_secs(120),
            post_schedule_timeout: Duration::from_secs(120),
            lock_wait: Duration::from_secs(60),
            lock_poll: Duration::from_millis(500),
            requirement_timeout: Duration::from_secs(30),
            cleanup_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub schedule_file: PathBuf,
    pub tick: Duration,
    pub snapshot_timeout: Duration,
    pub soft_stop_retry: Duration,
    /// `None` disables hard stops.
    pub hard_stop_timeout: Option<Duration>,
    pub phases: PhaseSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            schedule_file: PathBuf::from("schedule.json"),
            tick: Duration::from_millis(600),
            snapshot_timeout: Duration::from_millis(2000),
            soft_stop_retry: Duration::from_secs(30),
            hard_stop_timeout: Some(Duration::from_secs(240)),
            phases: PhaseSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let defaults = Self::default();
        let phase_defaults = &defaults.phases;
        let retry_defaults = &phase_defaults.cleanup_retry;

        let schedule_file = lookup(SCHEDULE_FILE)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.schedule_file.clone());

        let hard_stop_secs = parse_or(
            &lookup,
            HARD_STOP_TIMEOUT_SECS,
            defaults.hard_stop_timeout.map_or(0, |timeout| timeout.as_secs()),
        );

        let settings = Self {
            schedule_file,
            tick: Duration::from_millis(parse_or(&lookup, TICK_MS, millis(defaults.tick))),
            snapshot_timeout: Duration::from_millis(parse_or(
                &lookup,
                SNAPSHOT_TIMEOUT_MS,
                millis(defaults.snapshot_timeout),
            )),
            soft_stop_retry: Duration::from_secs(parse_or(
                &lookup,
                SOFT_STOP_RETRY_SECS,
                defaults.soft_stop_retry.as_secs(),
            )),
            hard_stop_timeout: (hard_stop_secs > 0).then(|| Duration::from_secs(hard_stop_secs)),
            phases: PhaseSettings {
                pre_schedule_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    PRE_TIMEOUT_SECS,
                    phase_defaults.pre_schedule_timeout.as_secs(),
                )),
                post_schedule_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    POST_TIMEOUT_SECS,
                    phase_defaults.post_schedule_timeout.as_secs(),
                )),
                lock_wait: Duration::from_secs(parse_or(
                    &lookup,
                    LOCK_WAIT_SECS,
                    phase_defaults.lock_wait.as_secs(),
                )),
                lock_poll: phase_defaults.lock_poll,
                requirement_timeout: phase_defaults.requirement_timeout,
                cleanup_retry: RetryPolicy {
                    max_attempts: parse_or(&lookup, CLEANUP_MAX_ATTEMPTS, retry_defaults.max_attempts),
                    base_delay_ms: parse_or(&lookup, CLEANUP_BASE_DELAY_MS, retry_defaults.base_delay_ms),
                    max_delay_ms: parse_or(&lookup, CLEANUP_MAX_DELAY_MS, retry_defaults.max_delay_ms),
                    jitter_factor: retry_defaults.jitter_factor,
                },
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.tick.is_zero() {
            return Err(SettingsError::Invalid {
                key: TICK_MS,
                reason: "tick must be positive".to_string(),
            });
        }
        if self.phases.cleanup_retry.max_attempts == 0 {
            return Err(SettingsError::Invalid {
                key: CLEANUP_MAX_ATTEMPTS,
                reason: "at least one cleanup attempt is required".to_string(),
            });
        }
        let retry = &self.phases.cleanup_retry;
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(SettingsError::Invalid {
                key: CLEANUP_MAX_DELAY_MS,
                reason: format!(
                    "maximum delay {}ms is below the base delay {}ms",
                    retry.max_delay_ms, retry.base_delay_ms
                ),
            });
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, default = %default, "Ignoring malformed setting");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let settings = EngineSettings::from_lookup(|_| None).unwrap();

        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.phases.cleanup_retry.max_attempts, 15);
        assert_eq!(settings.hard_stop_timeout, Some(Duration::from_secs(240)));
    }

    #[test]
    fn reads_overrides() {
        let settings = EngineSettings::from_lookup(lookup_from(&[
            (SCHEDULE_FILE, "/var/lib/taskloom/schedule.json"),
            (TICK_MS, "250"),
            (PRE_TIMEOUT_SECS, "30"),
            (CLEANUP_MAX_ATTEMPTS, "3"),
        ]))
        .unwrap();

        assert_eq!(settings.schedule_file, PathBuf::from("/var/lib/taskloom/schedule.json"));
        assert_eq!(settings.tick, Duration::from_millis(250));
        assert_eq!(settings.phases.pre_schedule_timeout, Duration::from_secs(30));
        assert_eq!(settings.phases.cleanup_retry.max_attempts, 3);
    }

    #[test]
    fn malformed_value_falls_back_to_default() {
        let settings = EngineSettings::from_lookup(lookup_from(&[(TICK_MS, "fast")])).unwrap();
        assert_eq!(settings.tick, Duration::from_millis(600));
    }

    #[test]
    fn zero_hard_stop_timeout_disables_hard_stops() {
        let settings = EngineSettings::from_lookup(lookup_from(&[(HARD_STOP_TIMEOUT_SECS, "0")])).unwrap();
        assert_eq!(settings.hard_stop_timeout, None);
    }

    #[test]
    fn rejects_inconsistent_backoff() {
        let result = EngineSettings::from_lookup(lookup_from(&[
            (CLEANUP_BASE_DELAY_MS, "5000"),
            (CLEANUP_MAX_DELAY_MS, "1000"),
        ]));

        assert!(matches!(
            result,
            Err(SettingsError::Invalid { key: CLEANUP_MAX_DELAY_MS, .. })
        ));
    }

    #[test]
    fn rejects_zero_tick() {
        let result = EngineSettings::from_lookup(lookup_from(&[(TICK_MS, "0")]));
        assert!(result.is_err());
    }
}
