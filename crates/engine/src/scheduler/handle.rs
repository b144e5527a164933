//! Cloneable handle for talking to a running scheduler.

use tokio::sync::{mpsc, oneshot};

use taskloom_domain::{GameEvent, ScheduleEntryId};

use crate::orchestration::context::OrchestrationContext;
use crate::orchestration::messages::{EntryStatus, OperatorCommand};
use crate::scheduler::SchedulerError;

#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    operator: mpsc::Sender<OperatorCommand>,
    events: mpsc::Sender<GameEvent>,
    context: OrchestrationContext,
}

impl SchedulerHandle {
    pub(crate) fn new(
        operator: mpsc::Sender<OperatorCommand>,
        events: mpsc::Sender<GameEvent>,
        context: OrchestrationContext,
    ) -> Self {
        Self {
            operator,
            events,
            context,
        }
    }

    async fn send(&self, command: OperatorCommand) -> Result<(), SchedulerError> {
        self.operator
            .send(command)
            .await
            .map_err(|_| SchedulerError::Stopped)
    }

    /// Soft-stops a running entry, or disables an idle one.
    pub async fn stop_entry(&self, id: ScheduleEntryId) -> Result<(), SchedulerError> {
        self.send(OperatorCommand::StopEntry { id }).await
    }

    pub async fn enable_entry(&self, id: ScheduleEntryId) -> Result<(), SchedulerError> {
        self.send(OperatorCommand::EnableEntry { id }).await
    }

    pub async fn disable_entry(&self, id: ScheduleEntryId, reason: impl Into<String>) -> Result<(), SchedulerError> {
        self.send(OperatorCommand::DisableEntry {
            id,
            reason: reason.into(),
        })
        .await
    }

    pub async fn set_priority(&self, id: ScheduleEntryId, priority: i32) -> Result<(), SchedulerError> {
        self.send(OperatorCommand::SetPriority { id, priority }).await
    }

    pub async fn pause(&self) -> Result<(), SchedulerError> {
        self.send(OperatorCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), SchedulerError> {
        self.send(OperatorCommand::Resume).await
    }

    pub async fn status(&self) -> Result<Vec<EntryStatus>, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.send(OperatorCommand::Status(reply)).await?;
        response.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Forwards an environment notification (kills, loot) to every entry.
    pub async fn notify(&self, event: GameEvent) -> Result<(), SchedulerError> {
        self.events
            .send(event)
            .await
            .map_err(|_| SchedulerError::Stopped)
    }

    pub fn shutdown(&self) {
        self.context.shutdown();
    }
}
