//! ScheduleEntry aggregate - one task bound to a start tree and a stop tree
//!
//! The entry is a state machine:
//!
//! ```text
//! Idle -> PreparingToStart -> Running -> SoftStopRequested -> CleaningUp -> Idle
//!                 |                                              |
//!                 +--------------------> Disabled <--------------+
//! ```
//!
//! `Running` may also go straight to `CleaningUp` when the task reports that
//! it finished on its own. Transition methods validate the source state and
//! return an [`EntryUpdate`] describing what happened so the caller can log
//! and forward it.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::{Condition, ConditionContext, LockHandle, LogicalCondition};
use crate::error::DomainError;
use crate::execution::ExecutionResult;
use crate::game::GameEvent;
use crate::ids::ScheduleEntryId;

/// Execution records kept per entry.
pub const HISTORY_LIMIT: usize = 50;

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    Idle,
    PreparingToStart,
    Running,
    SoftStopRequested,
    CleaningUp,
    Disabled,
}

impl EntryState {
    /// Between the start of preparation and the end of cleanup.
    pub fn is_active(self) -> bool {
        !matches!(self, EntryState::Idle | EntryState::Disabled)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryState::Idle => "Idle",
            EntryState::PreparingToStart => "PreparingToStart",
            EntryState::Running => "Running",
            EntryState::SoftStopRequested => "SoftStopRequested",
            EntryState::CleaningUp => "CleaningUp",
            EntryState::Disabled => "Disabled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    StopConditionsMet,
    TaskFinished,
    Operator,
    PhaseFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::StopConditionsMet => "stop conditions met",
            StopReason::TaskFinished => "task finished",
            StopReason::Operator => "stopped by operator",
            StopReason::PhaseFailed => "pre/post phase failed",
        };
        f.write_str(text)
    }
}

/// One finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub result: ExecutionResult,
    pub stop_reason: Option<StopReason>,
    pub message: Option<String>,
}

/// Outcome of a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryUpdate {
    PreparationStarted,
    Started {
        run_number: u32,
    },
    PreparationFailed {
        message: Option<String>,
    },
    StopRequested {
        reason: StopReason,
    },
    TaskFinished {
        result: ExecutionResult,
    },
    CleanupStarted {
        result: ExecutionResult,
    },
    Completed {
        result: ExecutionResult,
        next_state: EntryState,
    },
    Disabled {
        reason: String,
    },
    Enabled,
}

// ============================================================================
// Aggregate
// ============================================================================

/// A task registered for condition-driven scheduling.
///
/// # Invariants
///
/// - `name` is never empty
/// - `pending_result` is only set between the task's completion report and
///   the end of cleanup
/// - `history` holds at most [`HISTORY_LIMIT`] records, oldest first
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    id: ScheduleEntryId,
    name: String,
    task_name: String,
    priority: i32,
    start_conditions: Condition,
    stop_conditions: Condition,
    lock: LockHandle,
    state: EntryState,
    stop_reason: Option<StopReason>,
    stop_requested_at: Option<DateTime<Utc>>,
    last_stop_signal_at: Option<DateTime<Utc>>,
    stop_signals_sent: u32,
    pending_result: Option<ExecutionResult>,
    last_result: Option<ExecutionResult>,
    run_count: u32,
    last_run_started_at: Option<DateTime<Utc>>,
    last_run_ended_at: Option<DateTime<Utc>>,
    disabled_reason: Option<String>,
    history: VecDeque<ExecutionRecord>,
    created_at: DateTime<Utc>,
}

impl ScheduleEntry {
    pub fn new(
        name: impl Into<String>,
        task_name: impl Into<String>,
        start_conditions: Condition,
        stop_conditions: Condition,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("Schedule entry name cannot be empty"));
        }
        let task_name = task_name.into();
        if task_name.trim().is_empty() {
            return Err(DomainError::validation("Task name cannot be empty"));
        }
        Ok(Self {
            id: ScheduleEntryId::new(),
            name,
            task_name,
            priority: 0,
            start_conditions,
            stop_conditions,
            lock: LockHandle::new(),
            state: EntryState::Idle,
            stop_reason: None,
            stop_requested_at: None,
            last_stop_signal_at: None,
            stop_signals_sent: 0,
            pending_result: None,
            last_result: None,
            run_count: 0,
            last_run_started_at: None,
            last_run_ended_at: None,
            disabled_reason: None,
            history: VecDeque::new(),
            created_at: now,
        })
    }

    /// An entry whose trees are empty: it may start at once and only stops
    /// when the task finishes.
    pub fn unconditional(
        name: impl Into<String>,
        task_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        Self::new(
            name,
            task_name,
            Condition::Logical(LogicalCondition::and()),
            Condition::Logical(LogicalCondition::or()),
            now,
        )
    }

    // ------------------------------------------------------------------------
    // Builder methods (restoring persisted entries)
    // ------------------------------------------------------------------------

    pub fn with_id(mut self, id: ScheduleEntryId) -> Self {
        self.id = id;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_run_stats(
        mut self,
        run_count: u32,
        last_run_started_at: Option<DateTime<Utc>>,
        last_run_ended_at: Option<DateTime<Utc>>,
        last_result: Option<ExecutionResult>,
    ) -> Self {
        self.run_count = run_count;
        self.last_run_started_at = last_run_started_at;
        self.last_run_ended_at = last_run_ended_at;
        self.last_result = last_result;
        self
    }

    pub fn with_stop_reason(mut self, stop_reason: Option<StopReason>) -> Self {
        self.stop_reason = stop_reason;
        self
    }

    pub fn with_history(mut self, history: impl IntoIterator<Item = ExecutionRecord>) -> Self {
        self.history = history.into_iter().collect();
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        self
    }

    /// Restores an entry that was persisted while disabled.
    pub fn with_disabled(mut self, reason: impl Into<String>) -> Self {
        self.state = EntryState::Disabled;
        self.disabled_reason = Some(reason.into());
        self
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn id(&self) -> ScheduleEntryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn start_conditions(&self) -> &Condition {
        &self.start_conditions
    }

    pub fn stop_conditions(&self) -> &Condition {
        &self.stop_conditions
    }

    /// Handle shared with the task's pre/post orchestrator.
    pub fn lock_handle(&self) -> &LockHandle {
        &self.lock
    }

    /// Whether the entry lock or any lock in its stop tree is held.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked() || self.stop_conditions.is_locked()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn stop_requested_at(&self) -> Option<DateTime<Utc>> {
        self.stop_requested_at
    }

    pub fn stop_signals_sent(&self) -> u32 {
        self.stop_signals_sent
    }

    pub fn pending_result(&self) -> Option<ExecutionResult> {
        self.pending_result
    }

    pub fn last_result(&self) -> Option<ExecutionResult> {
        self.last_result
    }

    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    pub fn last_run_started_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_started_at
    }

    pub fn last_run_ended_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_ended_at
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        self.disabled_reason.as_deref()
    }

    pub fn history(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.history.iter()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_enabled(&self) -> bool {
        self.state != EntryState::Disabled
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    // ------------------------------------------------------------------------
    // Condition evaluation
    // ------------------------------------------------------------------------

    /// Idle and the start tree allows it. An empty start tree always does.
    pub fn should_start(&mut self, ctx: &ConditionContext<'_>) -> bool {
        if self.state != EntryState::Idle {
            return false;
        }
        self.start_conditions.is_empty_tree() || self.start_conditions.is_satisfied(ctx)
    }

    /// Running and the stop tree is met. An empty stop tree never is.
    pub fn should_stop(&mut self, ctx: &ConditionContext<'_>) -> bool {
        if self.state != EntryState::Running || self.stop_conditions.is_empty_tree() {
            return false;
        }
        self.stop_conditions.is_satisfied(ctx)
    }

    pub fn start_progress(&self, ctx: &ConditionContext<'_>) -> f64 {
        if self.start_conditions.is_empty_tree() {
            return 100.0;
        }
        self.start_conditions.progress(ctx)
    }

    pub fn stop_progress(&self, ctx: &ConditionContext<'_>) -> f64 {
        if self.stop_conditions.is_empty_tree() {
            return 0.0;
        }
        self.stop_conditions.progress(ctx)
    }

    /// When the start tree may next fire, for idle entries.
    pub fn next_start_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.state != EntryState::Idle {
            return None;
        }
        self.start_conditions.next_trigger_time(now)
    }

    /// Routes a notification to the tree currently being watched.
    pub fn on_event(&mut self, event: &GameEvent, now: DateTime<Utc>) {
        match self.state {
            EntryState::Idle => self.start_conditions.on_event(event, now),
            EntryState::Running | EntryState::SoftStopRequested => {
                self.stop_conditions.on_event(event, now)
            }
            EntryState::PreparingToStart | EntryState::CleaningUp | EntryState::Disabled => {}
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        self.start_conditions.pause(now);
        self.stop_conditions.pause(now);
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.start_conditions.resume(now);
        self.stop_conditions.resume(now);
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn expect_state(&self, expected: &[EntryState], action: &str) -> Result<(), DomainError> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(DomainError::invalid_state_transition(format!(
                "cannot {} entry '{}' while {}",
                action, self.name, self.state
            )))
        }
    }

    /// Idle -> PreparingToStart.
    pub fn begin_preparation(&mut self) -> Result<EntryUpdate, DomainError> {
        self.expect_state(&[EntryState::Idle], "prepare")?;
        self.state = EntryState::PreparingToStart;
        self.stop_reason = None;
        self.pending_result = None;
        Ok(EntryUpdate::PreparationStarted)
    }

    /// Ends preparation. On success the entry runs and its stop tree is
    /// re-armed. On failure it is disabled with a hard failure.
    pub fn complete_preparation(
        &mut self,
        success: bool,
        message: Option<String>,
        ctx: &ConditionContext<'_>,
    ) -> Result<EntryUpdate, DomainError> {
        self.expect_state(&[EntryState::PreparingToStart], "finish preparing")?;
        let now = ctx.now();
        if success {
            self.state = EntryState::Running;
            self.run_count = self.run_count.saturating_add(1);
            self.last_run_started_at = Some(now);
            self.stop_conditions.reset(true, ctx);
            return Ok(EntryUpdate::Started {
                run_number: self.run_count,
            });
        }

        self.stop_reason = Some(StopReason::PhaseFailed);
        self.last_result = Some(ExecutionResult::HardFailure);
        self.push_record(ExecutionRecord {
            started_at: None,
            finished_at: now,
            result: ExecutionResult::HardFailure,
            stop_reason: Some(StopReason::PhaseFailed),
            message: message.clone(),
        });
        self.state = EntryState::Disabled;
        self.disabled_reason = Some(
            message
                .clone()
                .unwrap_or_else(|| "pre-schedule tasks failed".to_string()),
        );
        Ok(EntryUpdate::PreparationFailed { message })
    }

    /// Running -> SoftStopRequested.
    pub fn request_stop(
        &mut self,
        reason: StopReason,
        now: DateTime<Utc>,
    ) -> Result<EntryUpdate, DomainError> {
        self.expect_state(&[EntryState::Running], "stop")?;
        self.state = EntryState::SoftStopRequested;
        self.stop_reason = Some(reason);
        self.stop_requested_at = Some(now);
        self.last_stop_signal_at = Some(now);
        self.stop_signals_sent = 1;
        Ok(EntryUpdate::StopRequested { reason })
    }

    /// Notes that the stop request was sent again.
    pub fn record_stop_signal(&mut self, now: DateTime<Utc>) {
        self.last_stop_signal_at = Some(now);
        self.stop_signals_sent = self.stop_signals_sent.saturating_add(1);
    }

    /// A soft stop is pending and the last signal is older than `retry`.
    pub fn soft_stop_resend_due(&self, now: DateTime<Utc>, retry: Duration) -> bool {
        self.state == EntryState::SoftStopRequested
            && self
                .last_stop_signal_at
                .is_some_and(|last| now - last >= retry)
    }

    /// A soft stop has been pending for at least `timeout`.
    pub fn hard_stop_due(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.state == EntryState::SoftStopRequested
            && self
                .stop_requested_at
                .is_some_and(|requested| now - requested >= timeout)
    }

    /// Records the result the task reported for this run.
    pub fn main_task_finished(&mut self, result: ExecutionResult) -> Result<EntryUpdate, DomainError> {
        self.expect_state(
            &[EntryState::Running, EntryState::SoftStopRequested],
            "record a result for",
        )?;
        self.pending_result = Some(result);
        if self.stop_reason.is_none() {
            self.stop_reason = Some(StopReason::TaskFinished);
        }
        Ok(EntryUpdate::TaskFinished { result })
    }

    /// Running/SoftStopRequested -> CleaningUp, once a result is known.
    pub fn begin_cleanup(&mut self) -> Result<EntryUpdate, DomainError> {
        self.expect_state(
            &[EntryState::Running, EntryState::SoftStopRequested],
            "clean up",
        )?;
        let result = self.pending_result.ok_or_else(|| {
            DomainError::invalid_state_transition(format!(
                "entry '{}' has no task result to clean up after",
                self.name
            ))
        })?;
        self.state = EntryState::CleaningUp;
        Ok(EntryUpdate::CleanupStarted { result })
    }

    /// Ends cleanup and settles the run's result.
    ///
    /// A failed cleanup turns the run into a hard failure. Hard failures and
    /// operator stops disable the entry; everything else returns it to Idle
    /// with a re-armed start tree.
    pub fn complete_cleanup(
        &mut self,
        success: bool,
        message: Option<String>,
        ctx: &ConditionContext<'_>,
    ) -> Result<EntryUpdate, DomainError> {
        self.expect_state(&[EntryState::CleaningUp], "finish cleaning up")?;
        let now = ctx.now();
        let reported = self.pending_result.take().unwrap_or(ExecutionResult::SoftFailure);
        let result = if success {
            reported
        } else {
            ExecutionResult::HardFailure
        };

        self.last_result = Some(result);
        self.last_run_ended_at = Some(now);
        self.stop_requested_at = None;
        self.last_stop_signal_at = None;
        self.stop_signals_sent = 0;
        if !success {
            self.stop_reason = Some(StopReason::PhaseFailed);
        }
        self.push_record(ExecutionRecord {
            started_at: self.last_run_started_at,
            finished_at: now,
            result,
            stop_reason: self.stop_reason,
            message: message.clone(),
        });
        self.start_conditions.reset(true, ctx);

        let next_state = if result.disables_entry() {
            self.disabled_reason = Some(message.unwrap_or_else(|| "hard failure".to_string()));
            EntryState::Disabled
        } else if self.stop_reason == Some(StopReason::Operator) {
            self.disabled_reason = Some(StopReason::Operator.to_string());
            EntryState::Disabled
        } else {
            EntryState::Idle
        };
        self.state = next_state;
        Ok(EntryUpdate::Completed { result, next_state })
    }

    /// Idle -> Disabled. Active entries must be stopped first.
    pub fn disable(&mut self, reason: impl Into<String>) -> Result<EntryUpdate, DomainError> {
        self.expect_state(&[EntryState::Idle], "disable")?;
        let reason = reason.into();
        self.state = EntryState::Disabled;
        self.disabled_reason = Some(reason.clone());
        Ok(EntryUpdate::Disabled { reason })
    }

    /// Disabled -> Idle, with both trees re-armed.
    pub fn enable(&mut self, ctx: &ConditionContext<'_>) -> Result<EntryUpdate, DomainError> {
        self.expect_state(&[EntryState::Disabled], "enable")?;
        self.state = EntryState::Idle;
        self.disabled_reason = None;
        self.stop_reason = None;
        self.start_conditions.reset(true, ctx);
        self.stop_conditions.reset(true, ctx);
        Ok(EntryUpdate::Enabled)
    }

    fn push_record(&mut self, record: ExecutionRecord) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }
}
