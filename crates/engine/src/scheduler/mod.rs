//! The scheduler loop.
//!
//! One loop owns every [`ScheduleEntry`]. It evaluates condition trees on a
//! fixed tick, starts at most one entry at a time, and drives each entry's
//! lifecycle from the reports its task runner sends back. Nothing else
//! mutates entries, so no locking is needed around them.
//!
//! Per tick:
//! 1. Pause changes are propagated to the condition trees
//! 2. A fresh game snapshot is taken, bounded by a timeout
//! 3. Running entries whose stop tree is met are soft-stopped, unless locked
//! 4. Unanswered soft stops are repeated or escalated to a hard stop
//! 5. If nothing is active, the best eligible entry is started

mod handle;

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use taskloom_domain::{
    ConditionContext, DomainError, EntryState, EntryUpdate, GameEvent, GameSnapshot, ScheduleEntry,
    ScheduleEntryId, StopReason,
};
use taskloom_shared::DecodeOptions;

use crate::infrastructure::ports::{ClockPort, GameEnvironmentPort, RandomPort};
use crate::infrastructure::schedule_store::{JsonScheduleStore, StoreError};
use crate::infrastructure::settings::EngineSettings;
use crate::orchestration::context::OrchestrationContext;
use crate::orchestration::messages::{EntryStatus, OperatorCommand, SchedulerCommand, TaskReport};
use crate::orchestration::pre_post::PrePostOrchestrator;
use crate::orchestration::state::ExecutionStatus;
use crate::task::{SchedulableTask, SharedTask, TaskRunner};

pub use handle::SchedulerHandle;

const COMMAND_BUFFER: usize = 16;
const REPORT_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;
const RUNNER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const RUNNER_UNAVAILABLE: &str = "task runner unavailable";

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),
    #[error("Schedule entry {0} already exists")]
    DuplicateEntry(ScheduleEntryId),
    #[error("Scheduler has stopped")]
    Stopped,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// A registered task and the channel to its runner.
struct TaskBinding {
    commands: mpsc::Sender<SchedulerCommand>,
    allow_hard_stop: bool,
    execution: watch::Receiver<ExecutionStatus>,
    runner: JoinHandle<()>,
}

pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
    bindings: HashMap<String, TaskBinding>,
    environment: Arc<dyn GameEnvironmentPort>,
    clock: Arc<dyn ClockPort>,
    random: Arc<dyn RandomPort>,
    context: OrchestrationContext,
    settings: EngineSettings,
    store: Option<JsonScheduleStore>,
    reports_tx: mpsc::Sender<TaskReport>,
    reports_rx: mpsc::Receiver<TaskReport>,
    events_tx: mpsc::Sender<GameEvent>,
    events_rx: mpsc::Receiver<GameEvent>,
    operator_tx: mpsc::Sender<OperatorCommand>,
    operator_rx: mpsc::Receiver<OperatorCommand>,
    last_snapshot: GameSnapshot,
    paused: bool,
    hard_stopped: HashSet<ScheduleEntryId>,
}

impl Scheduler {
    pub fn new(
        environment: Arc<dyn GameEnvironmentPort>,
        clock: Arc<dyn ClockPort>,
        random: Arc<dyn RandomPort>,
        settings: EngineSettings,
    ) -> Self {
        let (reports_tx, reports_rx) = mpsc::channel(REPORT_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (operator_tx, operator_rx) = mpsc::channel(COMMAND_BUFFER);
        Self {
            entries: Vec::new(),
            bindings: HashMap::new(),
            environment,
            clock,
            random,
            context: OrchestrationContext::new(),
            settings,
            store: None,
            reports_tx,
            reports_rx,
            events_tx,
            events_rx,
            operator_tx,
            operator_rx,
            last_snapshot: GameSnapshot::new(),
            paused: false,
            hard_stopped: HashSet::new(),
        }
    }

    /// Saves the schedule whenever a run ends or the operator changes it.
    pub fn with_store(mut self, store: JsonScheduleStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(
            self.operator_tx.clone(),
            self.events_tx.clone(),
            self.context.clone(),
        )
    }

    pub fn context(&self) -> &OrchestrationContext {
        &self.context
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Observes the pre/post/main execution state of a registered task.
    pub fn execution_state(&self, task_name: &str) -> Option<watch::Receiver<ExecutionStatus>> {
        self.bindings
            .get(task_name)
            .map(|binding| binding.execution.clone())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Spawns a runner for `task`. Entries refer to it by its name.
    pub fn register_task<T>(&mut self, task: T) -> Result<(), SchedulerError>
    where
        T: SchedulableTask + 'static,
    {
        let name = task.name().to_string();
        if self.bindings.contains_key(&name) {
            return Err(SchedulerError::DuplicateTask(name));
        }

        let allow_hard_stop = task.allow_hard_stop();
        let orchestrator = Arc::new(PrePostOrchestrator::new(
            name.clone(),
            task.requirements(),
            Arc::clone(&self.environment),
            self.settings.phases.clone(),
            Arc::clone(&self.random),
        ));
        let execution = orchestrator.state().subscribe();
        let shared: SharedTask = Arc::new(tokio::sync::Mutex::new(task));
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let runner = TaskRunner::new(
            name.clone(),
            shared,
            orchestrator,
            self.context.clone(),
            commands_rx,
            self.reports_tx.clone(),
        );

        tracing::info!(task = %name, allow_hard_stop, "Task registered");
        self.bindings.insert(
            name,
            TaskBinding {
                commands: commands_tx,
                allow_hard_stop,
                execution,
                runner: tokio::spawn(runner.run()),
            },
        );
        Ok(())
    }

    pub fn add_entry(&mut self, entry: ScheduleEntry) -> Result<ScheduleEntryId, SchedulerError> {
        let id = entry.id();
        if self.index_of(id).is_some() {
            return Err(SchedulerError::DuplicateEntry(id));
        }
        if !self.bindings.contains_key(entry.task_name()) {
            tracing::warn!(
                entry = %entry.name(),
                task = %entry.task_name(),
                "Entry refers to an unregistered task and will not start"
            );
        }
        tracing::info!(entry = %entry.name(), task = %entry.task_name(), priority = entry.priority(), "Entry added");
        self.entries.push(entry);
        Ok(id)
    }

    /// Adds every entry from the configured store. Returns how many were
    /// added.
    pub async fn load_entries(&mut self) -> Result<usize, SchedulerError> {
        let Some(store) = self.store.clone() else {
            return Ok(0);
        };
        let now = self.clock.now();
        let game = match tokio::time::timeout(self.settings.snapshot_timeout, self.environment.snapshot()).await {
            Ok(Ok(snapshot)) => snapshot,
            _ => {
                tracing::warn!("No game snapshot for loading, relative conditions start from zero");
                GameSnapshot::new()
            }
        };

        let loaded = store
            .load(now, &game, self.random.as_ref(), DecodeOptions::at(now))
            .await?;
        let mut added = 0;
        for entry in loaded {
            match self.add_entry(entry) {
                Ok(_) => added += 1,
                Err(e) => tracing::warn!(error = %e, "Skipping stored entry"),
            }
        }
        self.last_snapshot = game;
        Ok(added)
    }

    // =========================================================================
    // Main loop
    // =========================================================================

    /// Runs until the orchestration context is shut down, then saves the
    /// schedule and waits for the task runners.
    pub async fn run(mut self) {
        let shutdown = self.context.shutdown_token().clone();
        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            entries = self.entries.len(),
            tasks = self.bindings.len(),
            tick_ms = self.settings.tick.as_millis() as u64,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(report) = self.reports_rx.recv() => self.handle_report(report).await,
                Some(command) = self.operator_rx.recv() => self.handle_operator(command).await,
                Some(event) = self.events_rx.recv() => self.handle_event(&event),
                _ = ticker.tick() => self.tick().await,
            }
        }

        let now = self.clock.now();
        self.persist(now).await;
        let runners = self.bindings.drain().map(|(name, binding)| async move {
            if tokio::time::timeout(RUNNER_SHUTDOWN_TIMEOUT, binding.runner).await.is_err() {
                tracing::warn!(task = %name, "Task runner did not stop in time");
            }
        });
        futures_util::future::join_all(runners).await;
        tracing::info!("Scheduler stopped");
    }

    pub(crate) async fn tick(&mut self) {
        let now = self.clock.now();
        let paused = self.context.is_paused();
        if paused != self.paused {
            for entry in &mut self.entries {
                if paused {
                    entry.pause(now);
                } else {
                    entry.resume(now);
                }
            }
            self.paused = paused;
        }
        if paused {
            return;
        }

        match tokio::time::timeout(self.settings.snapshot_timeout, self.environment.snapshot()).await {
            Ok(Ok(snapshot)) => self.last_snapshot = snapshot,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Game snapshot unavailable, skipping tick");
                return;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.settings.snapshot_timeout.as_millis() as u64,
                    "Game snapshot timed out, skipping tick"
                );
                return;
            }
        }

        self.check_stop_conditions(now).await;
        self.escalate_stops(now).await;
        self.start_next_entry(now).await;
    }

    async fn check_stop_conditions(&mut self, now: DateTime<Utc>) {
        let mut stops = Vec::new();
        {
            let random = Arc::clone(&self.random);
            let roll = move |min: i64, max: i64| random.gen_range(min, max);
            let ctx = ConditionContext::new(now, &self.last_snapshot, &roll);
            for entry in &mut self.entries {
                // A held lock defers the stop; the tree is not even evaluated.
                if entry.state() != EntryState::Running || entry.is_locked() {
                    continue;
                }
                if !entry.should_stop(&ctx) {
                    continue;
                }
                match entry.request_stop(StopReason::StopConditionsMet, now) {
                    Ok(_) => {
                        tracing::info!(entry = %entry.name(), "Stop conditions met, requesting soft stop");
                        stops.push((entry.task_name().to_string(), entry.id()));
                    }
                    Err(e) => tracing::warn!(entry = %entry.name(), error = %e, "Could not request stop"),
                }
            }
        }

        for (task_name, entry_id) in stops {
            self.send(
                &task_name,
                SchedulerCommand::SoftStop {
                    entry_id,
                    reason: StopReason::StopConditionsMet,
                },
            )
            .await;
        }
    }

    async fn escalate_stops(&mut self, now: DateTime<Utc>) {
        let retry = chrono::Duration::from_std(self.settings.soft_stop_retry)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let hard_timeout = self
            .settings
            .hard_stop_timeout
            .and_then(|timeout| chrono::Duration::from_std(timeout).ok());

        let mut commands = Vec::new();
        for entry in &mut self.entries {
            if entry.state() != EntryState::SoftStopRequested || self.hard_stopped.contains(&entry.id()) {
                continue;
            }
            let allow_hard_stop = self
                .bindings
                .get(entry.task_name())
                .is_some_and(|binding| binding.allow_hard_stop);

            if let Some(timeout) = hard_timeout.filter(|_| allow_hard_stop) {
                if entry.hard_stop_due(now, timeout) {
                    tracing::warn!(
                        entry = %entry.name(),
                        signals = entry.stop_signals_sent(),
                        "Soft stop not honoured, sending hard stop"
                    );
                    self.hard_stopped.insert(entry.id());
                    commands.push((
                        entry.task_name().to_string(),
                        SchedulerCommand::HardStop { entry_id: entry.id() },
                    ));
                    continue;
                }
            }

            if entry.soft_stop_resend_due(now, retry) {
                entry.record_stop_signal(now);
                let reason = entry.stop_reason().unwrap_or(StopReason::StopConditionsMet);
                tracing::debug!(entry = %entry.name(), signals = entry.stop_signals_sent(), "Repeating soft stop");
                commands.push((
                    entry.task_name().to_string(),
                    SchedulerCommand::SoftStop {
                        entry_id: entry.id(),
                        reason,
                    },
                ));
            }
        }

        for (task_name, command) in commands {
            self.send(&task_name, command).await;
        }
    }

    async fn start_next_entry(&mut self, now: DateTime<Utc>) {
        if self.entries.iter().any(|entry| entry.state().is_active()) {
            return;
        }

        let mut candidates: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry.state() == EntryState::Idle && self.bindings.contains_key(entry.task_name())
            })
            .map(|(index, _)| index)
            .collect();
        candidates.sort_by_key(|&index| {
            let entry = &self.entries[index];
            (Reverse(entry.priority()), entry.run_count())
        });

        let chosen = {
            let random = Arc::clone(&self.random);
            let roll = move |min: i64, max: i64| random.gen_range(min, max);
            let ctx = ConditionContext::new(now, &self.last_snapshot, &roll);
            candidates
                .into_iter()
                .find(|&index| self.entries[index].should_start(&ctx))
        };
        let Some(index) = chosen else {
            return;
        };

        let entry = &mut self.entries[index];
        if let Err(e) = entry.begin_preparation() {
            tracing::warn!(entry = %entry.name(), error = %e, "Could not start entry");
            return;
        }
        tracing::info!(entry = %entry.name(), task = %entry.task_name(), "Start conditions met, preparing");
        let task_name = entry.task_name().to_string();
        let command = SchedulerCommand::PreScheduleTask {
            entry_id: entry.id(),
            lock: entry.lock_handle().clone(),
        };
        if !self.send(&task_name, command).await {
            self.finish_preparation(index, false, Some(RUNNER_UNAVAILABLE.to_string()), now)
                .await;
        }
    }

    // =========================================================================
    // Reports
    // =========================================================================

    async fn handle_report(&mut self, report: TaskReport) {
        let now = self.clock.now();
        let Some(index) = self.index_of(report.entry_id()) else {
            tracing::warn!(entry = %report.entry_id(), "Report for an unknown entry");
            return;
        };

        match report {
            TaskReport::PreScheduleFinished { success, message, .. } => {
                self.finish_preparation(index, success, message, now).await;
            }
            TaskReport::MainTaskFinished { result, reason, .. } => {
                let entry = &mut self.entries[index];
                if let Err(e) = entry.main_task_finished(result) {
                    tracing::warn!(entry = %entry.name(), error = %e, "Ignoring stale task result");
                    return;
                }
                if result.disables_entry() {
                    tracing::error!(entry = %entry.name(), reason = %reason, "Task reported a hard failure");
                } else {
                    tracing::info!(entry = %entry.name(), %result, reason = %reason, "Task finished");
                }
                if let Err(e) = entry.begin_cleanup() {
                    tracing::warn!(entry = %entry.name(), error = %e, "Could not begin cleanup");
                    return;
                }
                let task_name = entry.task_name().to_string();
                let command = SchedulerCommand::PostScheduleTask {
                    entry_id: entry.id(),
                    lock: entry.lock_handle().clone(),
                    result,
                    reason: entry.stop_reason(),
                };
                if !self.send(&task_name, command).await {
                    self.finish_cleanup(index, false, Some(RUNNER_UNAVAILABLE.to_string()), now)
                        .await;
                }
            }
            TaskReport::PostScheduleFinished { success, message, .. } => {
                self.finish_cleanup(index, success, message, now).await;
            }
        }
    }

    async fn finish_preparation(
        &mut self,
        index: usize,
        success: bool,
        message: Option<String>,
        now: DateTime<Utc>,
    ) {
        let update = {
            let random = Arc::clone(&self.random);
            let roll = move |min: i64, max: i64| random.gen_range(min, max);
            let ctx = ConditionContext::new(now, &self.last_snapshot, &roll);
            self.entries[index].complete_preparation(success, message, &ctx)
        };

        let entry = &self.entries[index];
        match update {
            Ok(EntryUpdate::Started { run_number }) => {
                tracing::info!(entry = %entry.name(), run_number, "Entry running");
            }
            Ok(EntryUpdate::PreparationFailed { message }) => {
                tracing::error!(
                    entry = %entry.name(),
                    reason = message.as_deref().unwrap_or("unknown"),
                    "Pre-schedule tasks failed, entry disabled"
                );
                self.persist(now).await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(entry = %entry.name(), error = %e, "Ignoring stale pre-schedule report"),
        }
    }

    async fn finish_cleanup(&mut self, index: usize, success: bool, message: Option<String>, now: DateTime<Utc>) {
        let update = {
            let random = Arc::clone(&self.random);
            let roll = move |min: i64, max: i64| random.gen_range(min, max);
            let ctx = ConditionContext::new(now, &self.last_snapshot, &roll);
            self.entries[index].complete_cleanup(success, message, &ctx)
        };

        let entry = &self.entries[index];
        match update {
            Ok(EntryUpdate::Completed { result, next_state }) => {
                if result.disables_entry() {
                    tracing::error!(
                        entry = %entry.name(),
                        %result,
                        reason = entry.disabled_reason().unwrap_or("unknown"),
                        "Entry disabled after a hard failure"
                    );
                } else if next_state == EntryState::Disabled {
                    tracing::info!(entry = %entry.name(), %result, "Run stopped by operator, entry disabled");
                } else {
                    tracing::info!(entry = %entry.name(), %result, runs = entry.run_count(), "Run completed");
                }
                let id = entry.id();
                self.hard_stopped.remove(&id);
                self.persist(now).await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(entry = %entry.name(), error = %e, "Ignoring stale post-schedule report"),
        }
    }

    // =========================================================================
    // Operator commands and events
    // =========================================================================

    async fn handle_operator(&mut self, command: OperatorCommand) {
        let now = self.clock.now();
        match command {
            OperatorCommand::Pause => self.context.pause(),
            OperatorCommand::Resume => self.context.resume(),
            OperatorCommand::Status(reply) => {
                // The caller may have given up waiting.
                let _ = reply.send(self.status(now));
            }
            OperatorCommand::StopEntry { id } => self.stop_entry(id, now).await,
            OperatorCommand::EnableEntry { id } => {
                let Some(index) = self.index_of(id) else {
                    tracing::warn!(entry = %id, "Enable for an unknown entry");
                    return;
                };
                let update = {
                    let random = Arc::clone(&self.random);
                    let roll = move |min: i64, max: i64| random.gen_range(min, max);
                    let ctx = ConditionContext::new(now, &self.last_snapshot, &roll);
                    self.entries[index].enable(&ctx)
                };
                self.apply_operator_update(index, update, now).await;
            }
            OperatorCommand::DisableEntry { id, reason } => {
                let Some(index) = self.index_of(id) else {
                    tracing::warn!(entry = %id, "Disable for an unknown entry");
                    return;
                };
                let update = self.entries[index].disable(reason);
                self.apply_operator_update(index, update, now).await;
            }
            OperatorCommand::SetPriority { id, priority } => {
                let Some(index) = self.index_of(id) else {
                    tracing::warn!(entry = %id, "Priority change for an unknown entry");
                    return;
                };
                self.entries[index].set_priority(priority);
                tracing::info!(entry = %self.entries[index].name(), priority, "Priority changed");
                self.persist(now).await;
            }
        }
    }

    async fn stop_entry(&mut self, id: ScheduleEntryId, now: DateTime<Utc>) {
        let Some(index) = self.index_of(id) else {
            tracing::warn!(entry = %id, "Stop for an unknown entry");
            return;
        };
        let entry = &mut self.entries[index];
        match entry.state() {
            EntryState::Running => match entry.request_stop(StopReason::Operator, now) {
                Ok(_) => {
                    tracing::info!(entry = %entry.name(), "Stop requested by operator");
                    let task_name = entry.task_name().to_string();
                    self.send(
                        &task_name,
                        SchedulerCommand::SoftStop {
                            entry_id: id,
                            reason: StopReason::Operator,
                        },
                    )
                    .await;
                }
                Err(e) => tracing::warn!(entry = %entry.name(), error = %e, "Could not stop entry"),
            },
            EntryState::Idle => {
                let update = entry.disable(StopReason::Operator.to_string());
                self.apply_operator_update(index, update, now).await;
            }
            state => tracing::warn!(entry = %entry.name(), %state, "Entry cannot be stopped in this state"),
        }
    }

    async fn apply_operator_update(
        &mut self,
        index: usize,
        update: Result<EntryUpdate, DomainError>,
        now: DateTime<Utc>,
    ) {
        let entry = &self.entries[index];
        match update {
            Ok(EntryUpdate::Enabled) => tracing::info!(entry = %entry.name(), "Entry enabled"),
            Ok(EntryUpdate::Disabled { reason }) => {
                tracing::info!(entry = %entry.name(), reason = %reason, "Entry disabled")
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(entry = %entry.name(), error = %e, "Operator command rejected");
                return;
            }
        }
        self.persist(now).await;
    }

    fn handle_event(&mut self, event: &GameEvent) {
        let now = self.clock.now();
        for entry in &mut self.entries {
            entry.on_event(event, now);
        }
    }

    fn status(&self, now: DateTime<Utc>) -> Vec<EntryStatus> {
        let random = Arc::clone(&self.random);
        let roll = move |min: i64, max: i64| random.gen_range(min, max);
        let ctx = ConditionContext::new(now, &self.last_snapshot, &roll);
        self.entries
            .iter()
            .map(|entry| EntryStatus {
                id: entry.id(),
                name: entry.name().to_string(),
                task_name: entry.task_name().to_string(),
                priority: entry.priority(),
                state: entry.state(),
                run_count: entry.run_count(),
                last_result: entry.last_result(),
                stop_reason: entry.stop_reason(),
                disabled_reason: entry.disabled_reason().map(str::to_string),
                start_progress: entry.start_progress(&ctx),
                stop_progress: entry.stop_progress(&ctx),
                next_start_time: entry.next_start_time(now),
            })
            .collect()
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn index_of(&self, id: ScheduleEntryId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id() == id)
    }

    /// Sends to the runner of `task_name`. Returns false if it is gone.
    async fn send(&self, task_name: &str, command: SchedulerCommand) -> bool {
        let Some(binding) = self.bindings.get(task_name) else {
            tracing::error!(task = %task_name, "No runner for task");
            return false;
        };
        let name = command.name();
        if binding.commands.send(command).await.is_err() {
            tracing::error!(task = %task_name, command = name, "Task runner has stopped");
            return false;
        }
        true
    }

    async fn persist(&self, now: DateTime<Utc>) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&self.entries, now).await {
            tracing::error!(path = %store.path().display(), error = %e, "Failed to save schedule");
        }
    }
}
