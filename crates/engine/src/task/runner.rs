//! Drives one task on behalf of the scheduler.
//!
//! The runner loop only dispatches. Pre and post phases and the main
//! iteration loop run as spawned jobs in a [`JoinSet`], so the runner can
//! still receive soft and hard stops while work is in flight. Reports are
//! sent from the runner loop when a job ends, which keeps them in order for
//! an entry. A job whose task hook panics is reported as a failure of the
//! phase it was in.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use taskloom_domain::{ExecutionResult, LockHandle, ScheduleEntryId, StopReason};

use crate::orchestration::context::OrchestrationContext;
use crate::orchestration::messages::{SchedulerCommand, TaskReport};
use crate::orchestration::pre_post::PrePostOrchestrator;
use crate::orchestration::state::{ExecutionPhase, PhaseState};
use crate::task::{IterationOutcome, RunContext, SharedTask};

const HARD_STOP_REASON: &str = "hard stopped";

/// The main loop of the current run.
struct ActiveRun {
    entry_id: ScheduleEntryId,
    stops: mpsc::UnboundedSender<StopReason>,
    cancel: CancellationToken,
}

/// How a spawned job ended.
enum JobOutcome {
    /// Forward as is.
    Report(TaskReport),
    /// The pre phase succeeded; report it and start iterating.
    Prepared {
        entry_id: ScheduleEntryId,
        lock: LockHandle,
    },
    MainFinished {
        entry_id: ScheduleEntryId,
        result: ExecutionResult,
        reason: String,
    },
    /// A duplicate phase request that produced nothing.
    Dropped,
    Panicked {
        entry_id: ScheduleEntryId,
        phase: ExecutionPhase,
        message: String,
    },
}

pub struct TaskRunner {
    task_name: String,
    task: SharedTask,
    orchestrator: Arc<PrePostOrchestrator>,
    context: OrchestrationContext,
    commands: mpsc::Receiver<SchedulerCommand>,
    reports: mpsc::Sender<TaskReport>,
    active: Option<ActiveRun>,
}

impl TaskRunner {
    pub fn new(
        task_name: impl Into<String>,
        task: SharedTask,
        orchestrator: Arc<PrePostOrchestrator>,
        context: OrchestrationContext,
        commands: mpsc::Receiver<SchedulerCommand>,
        reports: mpsc::Sender<TaskReport>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            task,
            orchestrator,
            context,
            commands,
            reports,
            active: None,
        }
    }

    /// Runs until shutdown or until the scheduler drops its command sender.
    pub async fn run(mut self) {
        let shutdown = self.context.shutdown_token().clone();
        let mut jobs: JoinSet<JobOutcome> = JoinSet::new();
        tracing::debug!(task = %self.task_name, "Task runner started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command, &mut jobs),
                    None => break,
                },
                Some(joined) = jobs.join_next() => match joined {
                    Ok(outcome) => self.handle_outcome(outcome, &mut jobs).await,
                    Err(e) => tracing::error!(task = %self.task_name, error = %e, "Task job aborted"),
                },
            }
        }

        if let Some(run) = self.active.take() {
            run.cancel.cancel();
        }
        jobs.shutdown().await;
        tracing::debug!(task = %self.task_name, "Task runner stopped");
    }

    fn handle_command(&mut self, command: SchedulerCommand, jobs: &mut JoinSet<JobOutcome>) {
        tracing::debug!(
            task = %self.task_name,
            command = command.name(),
            entry = %command.entry_id(),
            "Received command"
        );
        match command {
            SchedulerCommand::PreScheduleTask { entry_id, lock } => {
                let orchestrator = Arc::clone(&self.orchestrator);
                let task = Arc::clone(&self.task);
                let cancel = self.context.child_token();
                spawn_job(jobs, entry_id, ExecutionPhase::PreSchedule, async move {
                    match orchestrator.run_pre_schedule(&task, &lock, &cancel).await {
                        None => JobOutcome::Dropped,
                        Some(outcome) if outcome.success => JobOutcome::Prepared { entry_id, lock },
                        Some(outcome) => JobOutcome::Report(TaskReport::PreScheduleFinished {
                            entry_id,
                            success: false,
                            message: outcome.message,
                        }),
                    }
                });
            }
            SchedulerCommand::SoftStop { entry_id, reason } => match &self.active {
                Some(run) if run.entry_id == entry_id => {
                    // The receiver is gone once the loop has returned.
                    let _ = run.stops.send(reason);
                }
                _ => tracing::debug!(task = %self.task_name, entry = %entry_id, "Soft stop for an inactive run ignored"),
            },
            SchedulerCommand::HardStop { entry_id } => match &self.active {
                Some(run) if run.entry_id == entry_id => {
                    tracing::warn!(task = %self.task_name, entry = %entry_id, "Hard stop, cancelling the run");
                    run.cancel.cancel();
                }
                _ => tracing::debug!(task = %self.task_name, entry = %entry_id, "Hard stop for an inactive run ignored"),
            },
            SchedulerCommand::PostScheduleTask { entry_id, lock, .. } => {
                if let Some(run) = self.active.take() {
                    run.cancel.cancel();
                }
                let orchestrator = Arc::clone(&self.orchestrator);
                let task = Arc::clone(&self.task);
                let cancel = self.context.child_token();
                spawn_job(jobs, entry_id, ExecutionPhase::PostSchedule, async move {
                    match orchestrator.run_post_schedule(&task, &lock, &cancel).await {
                        None => JobOutcome::Dropped,
                        Some(outcome) => JobOutcome::Report(TaskReport::PostScheduleFinished {
                            entry_id,
                            success: outcome.success,
                            message: outcome.message,
                        }),
                    }
                });
            }
        }
    }

    async fn handle_outcome(&mut self, outcome: JobOutcome, jobs: &mut JoinSet<JobOutcome>) {
        match outcome {
            JobOutcome::Report(report) => {
                if matches!(report, TaskReport::PostScheduleFinished { success: true, .. }) {
                    self.orchestrator.state().reset();
                }
                self.forward(report).await;
            }
            JobOutcome::Dropped => {}
            JobOutcome::Panicked {
                entry_id,
                phase,
                message,
            } => {
                tracing::error!(task = %self.task_name, entry = %entry_id, %phase, panic = %message, "Task panicked");
                let message = format!("task panicked during {}: {}", phase, message);
                self.orchestrator.state().fail(PhaseState::Error, message.clone());
                let report = match phase {
                    ExecutionPhase::PreSchedule => TaskReport::PreScheduleFinished {
                        entry_id,
                        success: false,
                        message: Some(message),
                    },
                    ExecutionPhase::MainExecution => {
                        if self.active.as_ref().is_some_and(|run| run.entry_id == entry_id) {
                            self.active = None;
                        }
                        TaskReport::MainTaskFinished {
                            entry_id,
                            result: ExecutionResult::HardFailure,
                            reason: message,
                        }
                    }
                    ExecutionPhase::PostSchedule | ExecutionPhase::Idle => TaskReport::PostScheduleFinished {
                        entry_id,
                        success: false,
                        message: Some(message),
                    },
                };
                self.forward(report).await;
            }
            JobOutcome::Prepared { entry_id, lock } => {
                // Report first so the entry is Running before the run can end.
                self.forward(TaskReport::PreScheduleFinished {
                    entry_id,
                    success: true,
                    message: None,
                })
                .await;
                self.start_main(entry_id, lock, jobs);
            }
            JobOutcome::MainFinished {
                entry_id,
                result,
                reason,
            } => {
                if self.active.as_ref().is_some_and(|run| run.entry_id == entry_id) {
                    self.active = None;
                }
                tracing::info!(task = %self.task_name, %result, reason = %reason, "Main task finished");
                self.forward(TaskReport::MainTaskFinished {
                    entry_id,
                    result,
                    reason,
                })
                .await;
            }
        }
    }

    fn start_main(&mut self, entry_id: ScheduleEntryId, lock: LockHandle, jobs: &mut JoinSet<JobOutcome>) {
        if let Some(previous) = self.active.take() {
            previous.cancel.cancel();
        }
        let (stops_tx, stops_rx) = mpsc::unbounded_channel();
        let cancel = self.context.child_token();
        let ctx = RunContext::new(entry_id, self.context.clone(), lock, cancel.clone());
        self.active = Some(ActiveRun {
            entry_id,
            stops: stops_tx,
            cancel: cancel.clone(),
        });

        self.orchestrator.state().begin_phase(ExecutionPhase::MainExecution);
        let task = Arc::clone(&self.task);
        spawn_job(jobs, entry_id, ExecutionPhase::MainExecution, async move {
            let (result, reason) = main_loop(task, ctx, stops_rx, cancel).await;
            JobOutcome::MainFinished {
                entry_id,
                result,
                reason,
            }
        });
    }

    async fn forward(&self, report: TaskReport) {
        if self.reports.send(report).await.is_err() {
            tracing::debug!(task = %self.task_name, "Scheduler is gone, report dropped");
        }
    }
}

/// Spawns `work`, turning a panic inside it into [`JobOutcome::Panicked`].
/// Locks held by the job are released while it unwinds.
fn spawn_job<F>(jobs: &mut JoinSet<JobOutcome>, entry_id: ScheduleEntryId, phase: ExecutionPhase, work: F)
where
    F: Future<Output = JobOutcome> + Send + 'static,
{
    jobs.spawn(async move {
        AssertUnwindSafe(work)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| JobOutcome::Panicked {
                entry_id,
                phase,
                message: panic_message(&*panic),
            })
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Iterates the task until it finishes, accepts a soft stop, or is cancelled.
async fn main_loop(
    task: SharedTask,
    ctx: RunContext,
    mut stops: mpsc::UnboundedReceiver<StopReason>,
    cancel: CancellationToken,
) -> (ExecutionResult, String) {
    loop {
        let delay = task.lock().await.iteration_delay();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(reason) = stops.recv() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = async { task.lock().await.on_soft_stop(reason).await } => outcome,
                }
            }
            _ = tokio::time::sleep(delay) => {
                if ctx.is_paused() {
                    continue;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = async { task.lock().await.run_iteration(&ctx).await } => outcome,
                }
            }
        };
        if let IterationOutcome::Finished { result, reason } = outcome {
            return (result, reason);
        }
    }
    (ExecutionResult::SoftFailure, HARD_STOP_REASON.to_string())
}
