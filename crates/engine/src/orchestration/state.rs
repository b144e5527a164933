//! Observable execution state of one task.
//!
//! The orchestrator is the single writer. Observers hold a
//! [`tokio::sync::watch::Receiver`] and only ever read.

use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPhase {
    Idle,
    PreSchedule,
    MainExecution,
    PostSchedule,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionPhase::Idle => "Idle",
            ExecutionPhase::PreSchedule => "Pre-Schedule",
            ExecutionPhase::MainExecution => "Main Execution",
            ExecutionPhase::PostSchedule => "Post-Schedule",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseState {
    Starting,
    FulfillingRequirements,
    CustomTasks,
    Completed,
    Failed,
    Error,
}

impl PhaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PhaseState::Completed | PhaseState::Failed | PhaseState::Error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStatus {
    pub phase: ExecutionPhase,
    pub state: PhaseState,
    pub current_step: usize,
    pub total_steps: usize,
    pub current_detail: Option<String>,
    pub error_message: Option<String>,
}

impl ExecutionStatus {
    fn idle() -> Self {
        Self {
            phase: ExecutionPhase::Idle,
            state: PhaseState::Completed,
            current_step: 0,
            total_steps: 0,
            current_detail: None,
            error_message: None,
        }
    }

    fn starting(phase: ExecutionPhase) -> Self {
        Self {
            phase,
            state: PhaseState::Starting,
            ..Self::idle()
        }
    }

    /// Step progress in percent, 0 when the step count is unknown.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.current_step as f64 / self.total_steps as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Short operator-facing summary, e.g. `Pre-Schedule: FulfillingRequirements (1/3)`.
    pub fn summary(&self) -> String {
        let mut text = format!("{}: {:?}", self.phase, self.state);
        if self.total_steps > 0 {
            text.push_str(&format!(" ({}/{})", self.current_step, self.total_steps));
        }
        if let Some(error) = &self.error_message {
            text.push_str(&format!(" - {}", error));
        }
        text
    }
}

/// Result of asking to begin a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStart {
    Started,
    /// The same phase is already running.
    Duplicate,
    /// Another phase is running that this one may not overlap.
    Blocked(ExecutionPhase),
}

pub struct TaskExecutionState {
    sender: watch::Sender<ExecutionStatus>,
}

impl TaskExecutionState {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(ExecutionStatus::idle());
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionStatus> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> ExecutionStatus {
        self.sender.borrow().clone()
    }

    /// Whether `phase` has started and not yet reached a terminal state.
    pub fn is_phase_running(&self, phase: ExecutionPhase) -> bool {
        let status = self.sender.borrow();
        status.phase == phase && !status.state.is_terminal()
    }

    pub fn begin_phase(&self, phase: ExecutionPhase) {
        self.sender.send_replace(ExecutionStatus::starting(phase));
    }

    /// Begins `phase` unless it is already running, or unless the pre and
    /// post phases would overlap. Check and update happen under the same
    /// lock.
    pub fn try_begin_phase(&self, phase: ExecutionPhase) -> PhaseStart {
        let mut outcome = PhaseStart::Started;
        self.sender.send_if_modified(|status| {
            if !status.state.is_terminal() {
                if status.phase == phase {
                    outcome = PhaseStart::Duplicate;
                    return false;
                }
                if matches!(
                    (phase, status.phase),
                    (ExecutionPhase::PreSchedule, ExecutionPhase::PostSchedule)
                        | (ExecutionPhase::PostSchedule, ExecutionPhase::PreSchedule)
                ) {
                    outcome = PhaseStart::Blocked(status.phase);
                    return false;
                }
            }
            *status = ExecutionStatus::starting(phase);
            true
        });
        outcome
    }

    pub fn set_state(&self, state: PhaseState, detail: Option<String>) {
        self.sender.send_modify(|status| {
            status.state = state;
            status.current_detail = detail;
        });
    }

    pub fn set_progress(&self, current_step: usize, total_steps: usize) {
        self.sender.send_modify(|status| {
            status.current_step = current_step;
            status.total_steps = total_steps;
        });
    }

    pub fn complete(&self) {
        self.sender.send_modify(|status| {
            status.state = PhaseState::Completed;
            status.current_step = status.total_steps;
            status.current_detail = None;
        });
    }

    /// Marks the phase failed. `Failed` is for expected outcomes such as an
    /// unmet requirement, `Error` for a panicking task hook.
    pub fn fail(&self, state: PhaseState, message: impl Into<String>) {
        let message = message.into();
        self.sender.send_modify(|status| {
            status.state = state;
            status.error_message = Some(message);
        });
    }

    /// Back to idle once a run has been cleaned up.
    pub fn reset(&self) {
        self.sender.send_replace(ExecutionStatus::idle());
    }
}

impl Default for TaskExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let state = TaskExecutionState::new();

        assert_eq!(state.current().phase, ExecutionPhase::Idle);
        assert!(!state.is_phase_running(ExecutionPhase::PreSchedule));
    }

    #[test]
    fn tracks_a_phase_through_completion() {
        let state = TaskExecutionState::new();
        let observer = state.subscribe();

        state.begin_phase(ExecutionPhase::PreSchedule);
        state.set_state(PhaseState::FulfillingRequirements, Some("items".to_string()));
        state.set_progress(1, 3);
        assert!(state.is_phase_running(ExecutionPhase::PreSchedule));
        assert_eq!(
            observer.borrow().summary(),
            "Pre-Schedule: FulfillingRequirements (1/3)"
        );

        state.complete();
        assert!(!state.is_phase_running(ExecutionPhase::PreSchedule));
        assert_eq!(observer.borrow().progress_percentage(), 100.0);
    }

    #[test]
    fn failure_keeps_the_message() {
        let state = TaskExecutionState::new();
        state.begin_phase(ExecutionPhase::PostSchedule);

        state.fail(PhaseState::Failed, "could not leave the area");

        let status = state.current();
        assert_eq!(status.state, PhaseState::Failed);
        assert_eq!(status.error_message.as_deref(), Some("could not leave the area"));
        assert!(!state.is_phase_running(ExecutionPhase::PostSchedule));
    }

    #[test]
    fn duplicate_phase_is_reported() {
        let state = TaskExecutionState::new();

        assert_eq!(state.try_begin_phase(ExecutionPhase::PreSchedule), PhaseStart::Started);
        assert_eq!(state.try_begin_phase(ExecutionPhase::PreSchedule), PhaseStart::Duplicate);
    }

    #[test]
    fn pre_phase_is_blocked_while_post_runs() {
        let state = TaskExecutionState::new();
        state.begin_phase(ExecutionPhase::PostSchedule);

        assert_eq!(
            state.try_begin_phase(ExecutionPhase::PreSchedule),
            PhaseStart::Blocked(ExecutionPhase::PostSchedule)
        );

        state.complete();
        assert_eq!(state.try_begin_phase(ExecutionPhase::PreSchedule), PhaseStart::Started);
    }

    #[test]
    fn post_phase_is_blocked_while_pre_runs() {
        let state = TaskExecutionState::new();
        state.begin_phase(ExecutionPhase::PreSchedule);

        assert_eq!(
            state.try_begin_phase(ExecutionPhase::PostSchedule),
            PhaseStart::Blocked(ExecutionPhase::PreSchedule)
        );
        assert!(state.is_phase_running(ExecutionPhase::PreSchedule));
    }

    #[test]
    fn post_phase_may_follow_main_execution() {
        let state = TaskExecutionState::new();
        state.begin_phase(ExecutionPhase::MainExecution);

        assert_eq!(state.try_begin_phase(ExecutionPhase::PostSchedule), PhaseStart::Started);
    }

    #[test]
    fn reset_returns_to_idle() {
        let state = TaskExecutionState::new();
        state.begin_phase(ExecutionPhase::MainExecution);

        state.reset();

        assert_eq!(state.current().phase, ExecutionPhase::Idle);
    }
}
