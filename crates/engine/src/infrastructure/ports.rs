//! Port traits for infrastructure boundaries.
//!
//! These are the only abstractions in the engine. Everything else is concrete types.
//! Ports exist for:
//! - The game environment (authoritative state reads, requirement actions)
//! - Clock/Random (for testing)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskloom_domain::{GameSnapshot, RequirementOption};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Environment unavailable")]
    Unavailable,
    #[error("Environment call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Environment call failed: {0}")]
    Failed(String),
}

// =============================================================================
// Game Environment
// =============================================================================

/// The privileged side that owns game state.
///
/// Implementations marshal each call onto the environment thread and must
/// not block it for longer than the call needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameEnvironmentPort: Send + Sync {
    /// Point-in-time copy of the state conditions are evaluated against.
    async fn snapshot(&self) -> Result<GameSnapshot, EnvironmentError>;

    /// Acts until `option` holds: withdraw or equip an item, travel, or
    /// switch spellbook.
    async fn fulfill(&self, option: &RequirementOption) -> Result<(), EnvironmentError>;
}

// =============================================================================
// Testability Ports
// =============================================================================

#[cfg_attr(test, mockall::automock)]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait RandomPort: Send + Sync {
    /// Inclusive uniform draw in `[min, max]`.
    fn gen_range(&self, min: i64, max: i64) -> i64;
}
