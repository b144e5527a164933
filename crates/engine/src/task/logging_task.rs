//! A task that only logs. Used by the binary to exercise the scheduler
//! without a live client.

use std::time::Duration;

use async_trait::async_trait;

use taskloom_domain::{ExecutionResult, PrePostScheduleRequirements, StopReason};

use crate::task::{IterationOutcome, RunContext, SchedulableTask, TaskError};

pub struct LoggingTask {
    name: String,
    iterations_per_run: Option<u32>,
    iteration_delay: Duration,
    requirements: PrePostScheduleRequirements,
    iteration: u32,
}

impl LoggingTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            iterations_per_run: None,
            iteration_delay: Duration::from_secs(1),
            requirements: PrePostScheduleRequirements::new(),
            iteration: 0,
        }
    }

    /// Finish each run on its own after `count` iterations.
    pub fn finishing_after(mut self, count: u32) -> Self {
        self.iterations_per_run = Some(count.max(1));
        self
    }

    pub fn with_iteration_delay(mut self, delay: Duration) -> Self {
        self.iteration_delay = delay;
        self
    }

    pub fn with_requirements(mut self, requirements: PrePostScheduleRequirements) -> Self {
        self.requirements = requirements;
        self
    }
}

#[async_trait]
impl SchedulableTask for LoggingTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn requirements(&self) -> PrePostScheduleRequirements {
        self.requirements.clone()
    }

    async fn prepare(&mut self) -> Result<(), TaskError> {
        self.iteration = 0;
        tracing::info!(task = %self.name, "Preparing");
        Ok(())
    }

    async fn cleanup(&mut self, attempt: u32) -> Result<(), TaskError> {
        tracing::info!(task = %self.name, attempt, "Cleaning up");
        Ok(())
    }

    async fn run_iteration(&mut self, ctx: &RunContext) -> IterationOutcome {
        self.iteration += 1;
        tracing::info!(task = %self.name, entry = %ctx.entry_id(), iteration = self.iteration, "Working");
        match self.iterations_per_run {
            Some(limit) if self.iteration >= limit => IterationOutcome::finished(
                ExecutionResult::Success,
                format!("completed {} iterations", self.iteration),
            ),
            _ => IterationOutcome::Continue,
        }
    }

    fn iteration_delay(&self) -> Duration {
        self.iteration_delay
    }

    async fn on_soft_stop(&mut self, reason: StopReason) -> IterationOutcome {
        tracing::info!(task = %self.name, %reason, iterations = self.iteration, "Stopping");
        IterationOutcome::finished(ExecutionResult::Success, reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::context::OrchestrationContext;
    use taskloom_domain::{LockHandle, ScheduleEntryId};
    use tokio_util::sync::CancellationToken;

    fn run_context() -> RunContext {
        RunContext::new(
            ScheduleEntryId::new(),
            OrchestrationContext::new(),
            LockHandle::new(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn finishes_after_the_configured_iterations() {
        let mut task = LoggingTask::new("demo").finishing_after(2);
        let ctx = run_context();
        task.prepare().await.unwrap();

        assert_eq!(task.run_iteration(&ctx).await, IterationOutcome::Continue);
        assert!(matches!(
            task.run_iteration(&ctx).await,
            IterationOutcome::Finished {
                result: ExecutionResult::Success,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn prepare_starts_a_fresh_count() {
        let mut task = LoggingTask::new("demo").finishing_after(2);
        let ctx = run_context();
        task.run_iteration(&ctx).await;

        task.prepare().await.unwrap();

        assert_eq!(task.run_iteration(&ctx).await, IterationOutcome::Continue);
    }
}
