//! Pre and post schedule phases of one task.
//!
//! The pre phase takes the entry lock, fulfills the pre-schedule
//! requirements, then runs the task's own preparation. The post phase runs
//! in the opposite order: the task's cleanup first (it may need to leave a
//! constrained state before anything else is possible), then the
//! post-schedule requirements. Every phase is bounded by a timeout, observes
//! cancellation, and releases the lock on every exit path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use taskloom_domain::{LockGuard, LockHandle, PrePostScheduleRequirements, TaskContext};

use crate::infrastructure::ports::{GameEnvironmentPort, RandomPort};
use crate::infrastructure::settings::PhaseSettings;
use crate::orchestration::fulfillment::RequirementFulfiller;
use crate::orchestration::retry::{retry_with_backoff, RetryOutcome};
use crate::orchestration::state::{ExecutionPhase, PhaseStart, PhaseState, TaskExecutionState};
use crate::task::SharedTask;

/// What a phase reports back to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOutcome {
    pub success: bool,
    pub message: Option<String>,
}

impl PhaseOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub struct PrePostOrchestrator {
    task_name: String,
    fulfiller: RequirementFulfiller,
    registry: Mutex<PrePostScheduleRequirements>,
    state: TaskExecutionState,
    settings: PhaseSettings,
    random: Arc<dyn RandomPort>,
}

impl PrePostOrchestrator {
    pub fn new(
        task_name: impl Into<String>,
        requirements: PrePostScheduleRequirements,
        environment: Arc<dyn GameEnvironmentPort>,
        settings: PhaseSettings,
        random: Arc<dyn RandomPort>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            fulfiller: RequirementFulfiller::new(environment, settings.requirement_timeout),
            registry: Mutex::new(requirements),
            state: TaskExecutionState::new(),
            settings,
            random,
        }
    }

    pub fn state(&self) -> &TaskExecutionState {
        &self.state
    }

    /// Runs the pre-schedule phase. `None` means the phase was already
    /// running and this request was dropped.
    pub async fn run_pre_schedule(
        &self,
        task: &SharedTask,
        lock: &LockHandle,
        cancel: &CancellationToken,
    ) -> Option<PhaseOutcome> {
        let phase = ExecutionPhase::PreSchedule;
        match self.state.try_begin_phase(phase) {
            PhaseStart::Started => {}
            PhaseStart::Duplicate => {
                tracing::debug!(task = %self.task_name, "Pre-schedule tasks already running, skipping");
                return None;
            }
            PhaseStart::Blocked(running) => {
                tracing::warn!(task = %self.task_name, %running, "Refusing pre-schedule tasks");
                return Some(PhaseOutcome::failed(format!(
                    "cannot start pre-schedule tasks while {} tasks are running",
                    running
                )));
            }
        }
        tracing::info!(task = %self.task_name, "Running pre-schedule tasks");

        let Some(guard) = lock.try_acquire() else {
            return Some(self.finish(phase, Err("entry lock is already held".to_string())));
        };

        let work = async {
            self.fulfill(TaskContext::PreSchedule, cancel).await?;
            self.state.set_state(PhaseState::CustomTasks, Some("prepare".to_string()));
            task.lock()
                .await
                .prepare()
                .await
                .map_err(|e| format!("preparation failed: {}", e))
        };
        let result = self
            .bounded(phase, self.settings.pre_schedule_timeout, cancel, work)
            .await;
        drop(guard);
        Some(self.finish(phase, result))
    }

    /// Runs the post-schedule phase. `None` means the phase was already
    /// running and this request was dropped.
    pub async fn run_post_schedule(
        &self,
        task: &SharedTask,
        lock: &LockHandle,
        cancel: &CancellationToken,
    ) -> Option<PhaseOutcome> {
        let phase = ExecutionPhase::PostSchedule;
        match self.state.try_begin_phase(phase) {
            PhaseStart::Started => {}
            PhaseStart::Duplicate => {
                tracing::debug!(task = %self.task_name, "Post-schedule tasks already running, skipping");
                return None;
            }
            PhaseStart::Blocked(running) => {
                tracing::warn!(task = %self.task_name, %running, "Refusing post-schedule tasks");
                return Some(PhaseOutcome::failed(format!(
                    "cannot start post-schedule tasks while {} tasks are running",
                    running
                )));
            }
        }
        tracing::info!(task = %self.task_name, "Running post-schedule tasks");

        let guard = match self.wait_for_lock(lock, cancel).await {
            Ok(guard) => guard,
            Err(message) => return Some(self.finish(phase, Err(message))),
        };

        let work = async {
            self.state.set_state(PhaseState::CustomTasks, Some("cleanup".to_string()));
            self.cleanup_with_retry(task, cancel).await?;
            self.fulfill(TaskContext::PostSchedule, cancel).await
        };
        let result = self
            .bounded(phase, self.settings.post_schedule_timeout, cancel, work)
            .await;
        drop(guard);
        Some(self.finish(phase, result))
    }

    async fn bounded<F>(
        &self,
        phase: ExecutionPhase,
        timeout: Duration,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<(), String>
    where
        F: Future<Output = Result<(), String>>,
    {
        tokio::select! {
            _ = cancel.cancelled() => Err(format!("{} tasks cancelled", phase)),
            outcome = tokio::time::timeout(timeout, work) => match outcome {
                Ok(result) => result,
                Err(_) => Err(format!("{} tasks timed out after {}s", phase, timeout.as_secs())),
            },
        }
    }

    fn finish(&self, phase: ExecutionPhase, result: Result<(), String>) -> PhaseOutcome {
        match result {
            Ok(()) => {
                self.state.complete();
                tracing::info!(task = %self.task_name, %phase, "Phase completed");
                PhaseOutcome::succeeded()
            }
            Err(message) => {
                self.state.fail(PhaseState::Failed, message.clone());
                tracing::warn!(task = %self.task_name, %phase, error = %message, "Phase failed");
                PhaseOutcome::failed(message)
            }
        }
    }

    async fn fulfill(&self, phase: TaskContext, cancel: &CancellationToken) -> Result<(), String> {
        let mut registry = self.registry.lock().await;
        let report = self
            .fulfiller
            .fulfill_phase(&mut registry, phase, cancel, &self.state)
            .await
            .map_err(|e| e.to_string())?;
        tracing::debug!(
            task = %self.task_name,
            %phase,
            already_met = report.already_met.len(),
            fulfilled = report.fulfilled.len(),
            skipped = report.skipped.len(),
            "Requirements processed"
        );
        Ok(())
    }

    /// Polls for the entry lock until `lock_wait` has passed.
    async fn wait_for_lock(
        &self,
        lock: &LockHandle,
        cancel: &CancellationToken,
    ) -> Result<LockGuard, String> {
        let deadline = tokio::time::Instant::now() + self.settings.lock_wait;
        loop {
            if let Some(guard) = lock.try_acquire() {
                return Ok(guard);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(format!(
                    "entry lock still held after {}s",
                    self.settings.lock_wait.as_secs()
                ));
            }
            tracing::debug!(task = %self.task_name, "Waiting for entry lock");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err("cancelled while waiting for the entry lock".to_string());
                }
                _ = tokio::time::sleep(self.settings.lock_poll) => {}
            }
        }
    }

    async fn cleanup_with_retry(&self, task: &SharedTask, cancel: &CancellationToken) -> Result<(), String> {
        let outcome = retry_with_backoff(
            &self.settings.cleanup_retry,
            "cleanup",
            cancel,
            self.random.as_ref(),
            |attempt| {
                let task = Arc::clone(task);
                async move { task.lock().await.cleanup(attempt).await }
            },
        )
        .await;

        match outcome {
            RetryOutcome::Succeeded { .. } => Ok(()),
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::error!(
                    task = %self.task_name,
                    attempts,
                    error = %last_error,
                    "Cleanup did not succeed, reporting hard failure"
                );
                Err(format!("cleanup failed after {} attempts: {}", attempts, last_error))
            }
            RetryOutcome::Cancelled { .. } => Err("cleanup cancelled".to_string()),
        }
    }
}
