//! Typed messages between the scheduler, task runners, and the operator.
//!
//! The scheduler sends [`SchedulerCommand`]s to one runner per task and
//! receives [`TaskReport`]s on a single shared channel. Every message names
//! the entry it concerns so reports for a stale run can be ignored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use taskloom_domain::{EntryState, ExecutionResult, LockHandle, ScheduleEntryId, StopReason};

// =============================================================================
// Scheduler -> Task
// =============================================================================

#[derive(Debug, Clone)]
pub enum SchedulerCommand {
    /// Start conditions are met: prepare, then report `PreScheduleFinished`.
    PreScheduleTask {
        entry_id: ScheduleEntryId,
        lock: LockHandle,
    },
    /// The run is over: clean up, then report `PostScheduleFinished`.
    PostScheduleTask {
        entry_id: ScheduleEntryId,
        lock: LockHandle,
        result: ExecutionResult,
        reason: Option<StopReason>,
    },
    /// Begin shutting the run down. May arrive more than once.
    SoftStop {
        entry_id: ScheduleEntryId,
        reason: StopReason,
    },
    /// The soft stop went unanswered for too long. Abandon the run.
    HardStop { entry_id: ScheduleEntryId },
}

impl SchedulerCommand {
    pub fn entry_id(&self) -> ScheduleEntryId {
        match self {
            SchedulerCommand::PreScheduleTask { entry_id, .. }
            | SchedulerCommand::PostScheduleTask { entry_id, .. }
            | SchedulerCommand::SoftStop { entry_id, .. }
            | SchedulerCommand::HardStop { entry_id } => *entry_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchedulerCommand::PreScheduleTask { .. } => "PreScheduleTask",
            SchedulerCommand::PostScheduleTask { .. } => "PostScheduleTask",
            SchedulerCommand::SoftStop { .. } => "SoftStop",
            SchedulerCommand::HardStop { .. } => "HardStop",
        }
    }
}

// =============================================================================
// Task -> Scheduler
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TaskReport {
    PreScheduleFinished {
        entry_id: ScheduleEntryId,
        success: bool,
        message: Option<String>,
    },
    PostScheduleFinished {
        entry_id: ScheduleEntryId,
        success: bool,
        message: Option<String>,
    },
    MainTaskFinished {
        entry_id: ScheduleEntryId,
        result: ExecutionResult,
        reason: String,
    },
}

impl TaskReport {
    pub fn entry_id(&self) -> ScheduleEntryId {
        match self {
            TaskReport::PreScheduleFinished { entry_id, .. }
            | TaskReport::PostScheduleFinished { entry_id, .. }
            | TaskReport::MainTaskFinished { entry_id, .. } => *entry_id,
        }
    }
}

// =============================================================================
// Operator -> Scheduler
// =============================================================================

/// Read-only view of one entry for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryStatus {
    pub id: ScheduleEntryId,
    pub name: String,
    pub task_name: String,
    pub priority: i32,
    pub state: EntryState,
    pub run_count: u32,
    pub last_result: Option<ExecutionResult>,
    pub stop_reason: Option<StopReason>,
    pub disabled_reason: Option<String>,
    pub start_progress: f64,
    pub stop_progress: f64,
    pub next_start_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum OperatorCommand {
    /// Soft-stops a running entry. It ends up disabled.
    StopEntry { id: ScheduleEntryId },
    EnableEntry { id: ScheduleEntryId },
    DisableEntry { id: ScheduleEntryId, reason: String },
    SetPriority { id: ScheduleEntryId, priority: i32 },
    Pause,
    Resume,
    Status(oneshot::Sender<Vec<EntryStatus>>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_message_names_its_entry() {
        let id = ScheduleEntryId::new();
        let commands = [
            SchedulerCommand::PreScheduleTask {
                entry_id: id,
                lock: LockHandle::new(),
            },
            SchedulerCommand::SoftStop {
                entry_id: id,
                reason: StopReason::StopConditionsMet,
            },
            SchedulerCommand::HardStop { entry_id: id },
        ];
        assert!(commands.iter().all(|command| command.entry_id() == id));

        let report = TaskReport::MainTaskFinished {
            entry_id: id,
            result: ExecutionResult::Success,
            reason: "done".to_string(),
        };
        assert_eq!(report.entry_id(), id);
    }

    #[test]
    fn status_serializes_with_camel_case_keys() {
        let status = EntryStatus {
            id: ScheduleEntryId::new(),
            name: "Mine iron".to_string(),
            task_name: "mining".to_string(),
            priority: 2,
            state: EntryState::Disabled,
            run_count: 4,
            last_result: Some(ExecutionResult::HardFailure),
            stop_reason: Some(StopReason::PhaseFailed),
            disabled_reason: Some("cleanup failed".to_string()),
            start_progress: 100.0,
            stop_progress: 0.0,
            next_start_time: None,
        };

        let value = serde_json::to_value(&status).unwrap();

        assert_eq!(value["taskName"], "mining");
        assert_eq!(value["runCount"], 4);
        assert_eq!(value["lastResult"], "HARD_FAILURE");
        assert_eq!(value["stopReason"], "PHASE_FAILED");
        assert_eq!(value["disabledReason"], "cleanup failed");
    }
}
