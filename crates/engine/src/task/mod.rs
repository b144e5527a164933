//! The contract between the scheduler and the work it schedules.
//!
//! A task never sees the scheduler. It is driven by a [`TaskRunner`] that
//! receives [`SchedulerCommand`](crate::orchestration::messages::SchedulerCommand)s
//! and answers with reports. The task itself only implements the hooks
//! below; everything else has a default.

mod logging_task;
mod runner;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use taskloom_domain::{
    ExecutionResult, LockGuard, LockHandle, PrePostScheduleRequirements, ScheduleEntryId,
    StopReason,
};

use crate::infrastructure::ports::EnvironmentError;
use crate::orchestration::context::OrchestrationContext;

pub use logging_task::LoggingTask;
pub use runner::TaskRunner;

/// Delay between iterations when a task does not choose its own.
pub const DEFAULT_ITERATION_DELAY: Duration = Duration::from_millis(600);

/// A task shared between its runner and the phases the runner spawns.
pub type SharedTask = Arc<tokio::sync::Mutex<dyn SchedulableTask>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// What the runner should do after an iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Continue,
    Finished {
        result: ExecutionResult,
        reason: String,
    },
}

impl IterationOutcome {
    pub fn finished(result: ExecutionResult, reason: impl Into<String>) -> Self {
        Self::Finished {
            result,
            reason: reason.into(),
        }
    }
}

/// Handed to every iteration of a running task.
#[derive(Debug, Clone)]
pub struct RunContext {
    entry_id: ScheduleEntryId,
    orchestration: OrchestrationContext,
    lock: LockHandle,
    cancel: CancellationToken,
}

impl RunContext {
    pub(crate) fn new(
        entry_id: ScheduleEntryId,
        orchestration: OrchestrationContext,
        lock: LockHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            entry_id,
            orchestration,
            lock,
            cancel,
        }
    }

    pub fn entry_id(&self) -> ScheduleEntryId {
        self.entry_id
    }

    pub fn is_paused(&self) -> bool {
        self.orchestration.is_paused()
    }

    /// Cancelled on hard stop and on shutdown.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Takes the entry lock for work that must not be interrupted. Stop
    /// conditions are not acted on until the guard is dropped.
    pub fn try_lock(&self) -> Option<LockGuard> {
        self.lock.try_acquire()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

/// Work that can be scheduled by conditions.
///
/// Hooks are called with the task locked, so at most one of them runs at a
/// time.
#[async_trait]
pub trait SchedulableTask: Send {
    /// Unique name that schedule entries refer to.
    fn name(&self) -> &str;

    /// Requirements fulfilled around every run. Read once at registration.
    fn requirements(&self) -> PrePostScheduleRequirements {
        PrePostScheduleRequirements::new()
    }

    /// Task-specific preparation, after the pre-schedule requirements.
    async fn prepare(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Task-specific cleanup, before the post-schedule requirements. Retried
    /// with backoff; `attempt` starts at 1.
    async fn cleanup(&mut self, _attempt: u32) -> Result<(), TaskError> {
        Ok(())
    }

    /// One unit of work. Called repeatedly while the run lasts.
    async fn run_iteration(&mut self, ctx: &RunContext) -> IterationOutcome;

    fn iteration_delay(&self) -> Duration {
        DEFAULT_ITERATION_DELAY
    }

    /// Whether an unanswered soft stop may be escalated to a hard stop.
    fn allow_hard_stop(&self) -> bool {
        true
    }

    /// Called for every soft stop request. Returning `Continue` asks for more
    /// time; the request will be repeated.
    async fn on_soft_stop(&mut self, reason: StopReason) -> IterationOutcome {
        IterationOutcome::finished(ExecutionResult::Success, reason.to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted tasks shared by engine tests.

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::orchestration::state::ExecutionPhase;

    /// Counters observable after the task has been handed to a runner.
    #[derive(Debug, Default)]
    pub struct Calls {
        pub prepare: AtomicU32,
        pub cleanup: AtomicU32,
        pub iterations: AtomicU32,
        pub soft_stops: AtomicU32,
    }

    impl Calls {
        pub fn get(counter: &AtomicU32) -> u32 {
            counter.load(Ordering::SeqCst)
        }
    }

    /// Task whose behaviour is set up front.
    pub struct ScriptedTask {
        pub name: String,
        pub calls: Arc<Calls>,
        pub requirements: PrePostScheduleRequirements,
        pub prepare_error: Option<String>,
        pub prepare_time: Duration,
        /// Cleanup fails this many times before succeeding.
        pub cleanup_failures: u32,
        /// Finish on its own after this many iterations.
        pub finish_after: Option<(u32, ExecutionResult)>,
        /// Answer soft stops with `Continue`.
        pub ignore_soft_stop: bool,
        pub allow_hard_stop: bool,
        /// Iterations take this long.
        pub iteration_time: Duration,
        /// Panic in the hook that runs during this phase.
        pub panics_in: Option<ExecutionPhase>,
    }

    impl ScriptedTask {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                calls: Arc::new(Calls::default()),
                requirements: PrePostScheduleRequirements::new(),
                prepare_error: None,
                prepare_time: Duration::ZERO,
                cleanup_failures: 0,
                finish_after: None,
                ignore_soft_stop: false,
                allow_hard_stop: true,
                iteration_time: Duration::ZERO,
                panics_in: None,
            }
        }

        pub fn shared(self) -> SharedTask {
            Arc::new(tokio::sync::Mutex::new(self))
        }
    }

    #[async_trait]
    impl SchedulableTask for ScriptedTask {
        fn name(&self) -> &str {
            &self.name
        }

        fn requirements(&self) -> PrePostScheduleRequirements {
            self.requirements.clone()
        }

        async fn prepare(&mut self) -> Result<(), TaskError> {
            self.calls.prepare.fetch_add(1, Ordering::SeqCst);
            if self.panics_in == Some(ExecutionPhase::PreSchedule) {
                panic!("{} exploded while preparing", self.name);
            }
            if !self.prepare_time.is_zero() {
                tokio::time::sleep(self.prepare_time).await;
            }
            match &self.prepare_error {
                Some(message) => Err(TaskError::failed(message.clone())),
                None => Ok(()),
            }
        }

        async fn cleanup(&mut self, attempt: u32) -> Result<(), TaskError> {
            self.calls.cleanup.fetch_add(1, Ordering::SeqCst);
            if self.panics_in == Some(ExecutionPhase::PostSchedule) {
                panic!("{} exploded while cleaning up", self.name);
            }
            if attempt <= self.cleanup_failures {
                Err(TaskError::failed(format!("still in combat (attempt {})", attempt)))
            } else {
                Ok(())
            }
        }

        async fn run_iteration(&mut self, _ctx: &RunContext) -> IterationOutcome {
            if !self.iteration_time.is_zero() {
                tokio::time::sleep(self.iteration_time).await;
            }
            let done = self.calls.iterations.fetch_add(1, Ordering::SeqCst) + 1;
            if self.panics_in == Some(ExecutionPhase::MainExecution) {
                panic!("{} exploded on iteration {}", self.name, done);
            }
            match self.finish_after {
                Some((limit, result)) if done >= limit => {
                    IterationOutcome::finished(result, format!("finished after {} iterations", done))
                }
                _ => IterationOutcome::Continue,
            }
        }

        fn iteration_delay(&self) -> Duration {
            Duration::from_millis(100)
        }

        fn allow_hard_stop(&self) -> bool {
            self.allow_hard_stop
        }

        async fn on_soft_stop(&mut self, reason: StopReason) -> IterationOutcome {
            self.calls.soft_stops.fetch_add(1, Ordering::SeqCst);
            if self.ignore_soft_stop {
                IterationOutcome::Continue
            } else {
                IterationOutcome::finished(ExecutionResult::Success, reason.to_string())
            }
        }
    }
}
