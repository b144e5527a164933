//! In-memory game environment.
//!
//! Holds a [`GameSnapshot`] behind a lock and applies requirement options
//! to it directly. Used by the binary when no live client is attached, and
//! by tests that need an environment with real state rather than a mock.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use taskloom_domain::{GameSnapshot, RequirementOption};

use crate::infrastructure::ports::{EnvironmentError, GameEnvironmentPort};

#[derive(Clone)]
pub struct StaticEnvironment {
    state: Arc<RwLock<GameSnapshot>>,
    refused: Arc<RwLock<HashSet<String>>>,
    available: Arc<AtomicBool>,
}

impl StaticEnvironment {
    pub fn new(snapshot: GameSnapshot) -> Self {
        Self {
            state: Arc::new(RwLock::new(snapshot)),
            refused: Arc::new(RwLock::new(HashSet::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Makes `fulfill` fail for the option with this description.
    pub async fn refuse(&self, option: &RequirementOption) {
        self.refused.write().await.insert(option.describe());
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Mutates the held state, e.g. to simulate the player gaining levels.
    pub async fn update(&self, apply: impl FnOnce(&mut GameSnapshot)) {
        let mut state = self.state.write().await;
        apply(&mut state);
    }

    fn check_available(&self) -> Result<(), EnvironmentError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EnvironmentError::Unavailable)
        }
    }
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self::new(GameSnapshot::new())
    }
}

#[async_trait]
impl GameEnvironmentPort for StaticEnvironment {
    async fn snapshot(&self) -> Result<GameSnapshot, EnvironmentError> {
        self.check_available()?;
        Ok(self.state.read().await.clone())
    }

    async fn fulfill(&self, option: &RequirementOption) -> Result<(), EnvironmentError> {
        self.check_available()?;
        let description = option.describe();
        if self.refused.read().await.contains(&description) {
            return Err(EnvironmentError::Failed(format!("cannot fulfill {}", description)));
        }

        let mut state = self.state.write().await;
        if option.is_met_in(&state) {
            return Ok(());
        }
        match option {
            RequirementOption::Item { name, quantity, .. } => {
                tracing::debug!(item = %name, quantity, "Withdrawing item");
                state.add_item(name.clone(), *quantity);
            }
            RequirementOption::Location { name, point, .. } => {
                tracing::debug!(location = %name, %point, "Travelling");
                state.set_position(Some(*point));
            }
            RequirementOption::Spellbook { spellbook } => {
                tracing::debug!(%spellbook, "Switching spellbook");
                state.set_spellbook(*spellbook);
            }
        }
        Ok(())
    }
}
