//! Shared orchestration context.
//!
//! Created when the scheduler starts and cancelled when it shuts down. It
//! replaces process-wide switches: the scheduler is the only writer of the
//! pause flag, while tasks and runners only read it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct OrchestrationContext {
    paused: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl OrchestrationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspends condition evaluation and task iterations.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            tracing::info!("Orchestration paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            tracing::info!("Orchestration resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Token cancelled on shutdown or when cancelled itself, for one phase.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn shutdown(&self) {
        tracing::info!("Orchestration shutting down");
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_is_visible_to_clones() {
        let context = OrchestrationContext::new();
        let observer = context.clone();

        context.pause();
        assert!(observer.is_paused());

        context.resume();
        assert!(!observer.is_paused());
    }

    #[test]
    fn shutdown_cancels_child_tokens() {
        let context = OrchestrationContext::new();
        let phase = context.child_token();

        context.shutdown();

        assert!(phase.is_cancelled());
        assert!(context.is_shut_down());
    }

    #[test]
    fn cancelling_a_child_leaves_the_context_running() {
        let context = OrchestrationContext::new();
        let phase = context.child_token();

        phase.cancel();

        assert!(!context.is_shut_down());
    }
}
