//! Generic requirement fulfillment for one phase.
//!
//! Requirements are processed step by step in kind order (items, then
//! spellbook, then location), mandatory before recommended and by descending
//! rating within a step. Each requirement is an OR-group: the first option
//! that already holds, or that the environment manages to fulfill, wins.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use taskloom_domain::requirement::MAX_RATING;
use taskloom_domain::{
    PrePostScheduleRequirements, Requirement, RequirementKind, RequirementOption,
    RequirementPriority, Spellbook, TaskContext,
};

use crate::infrastructure::ports::{EnvironmentError, GameEnvironmentPort};
use crate::orchestration::state::{PhaseState, TaskExecutionState};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FulfillmentError {
    #[error("Mandatory requirement '{description}' not fulfilled: {reason}")]
    MandatoryUnmet { description: String, reason: String },
    #[error("Requirement fulfillment cancelled")]
    Cancelled,
}

/// What happened to each requirement of a phase, by description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FulfillmentReport {
    pub already_met: Vec<String>,
    pub fulfilled: Vec<String>,
    /// Recommended requirements that could not be met.
    pub skipped: Vec<String>,
}

impl FulfillmentReport {
    pub fn handled(&self) -> usize {
        self.already_met.len() + self.fulfilled.len() + self.skipped.len()
    }
}

enum Attempt {
    AlreadyMet,
    Fulfilled { previous_spellbook: Spellbook },
}

pub struct RequirementFulfiller {
    environment: Arc<dyn GameEnvironmentPort>,
    requirement_timeout: Duration,
}

impl RequirementFulfiller {
    pub fn new(environment: Arc<dyn GameEnvironmentPort>, requirement_timeout: Duration) -> Self {
        Self {
            environment,
            requirement_timeout,
        }
    }

    /// Fulfills every requirement registered for `phase`.
    ///
    /// In the pre phase the spellbook in use before the first switch is
    /// remembered; the post phase switches back to it after its own
    /// requirements.
    pub async fn fulfill_phase(
        &self,
        registry: &mut PrePostScheduleRequirements,
        phase: TaskContext,
        cancel: &CancellationToken,
        state: &TaskExecutionState,
    ) -> Result<FulfillmentReport, FulfillmentError> {
        let plan = registry.fulfillment_plan(phase);
        let total: usize = plan.iter().map(|step| step.requirements.len()).sum();
        let mut report = FulfillmentReport::default();

        tracing::debug!(%phase, steps = plan.len(), requirements = total, "Fulfilling requirements");
        state.set_progress(0, total);

        for step in &plan {
            if cancel.is_cancelled() {
                return Err(FulfillmentError::Cancelled);
            }
            state.set_state(PhaseState::FulfillingRequirements, Some(step.kind.to_string()));

            for requirement in &step.requirements {
                if cancel.is_cancelled() {
                    return Err(FulfillmentError::Cancelled);
                }

                match self.attempt_with_timeout(requirement, cancel).await {
                    Ok(Attempt::AlreadyMet) => {
                        report.already_met.push(requirement.description().to_string());
                    }
                    Ok(Attempt::Fulfilled { previous_spellbook }) => {
                        if phase == TaskContext::PreSchedule && step.kind == RequirementKind::Spellbook {
                            registry.remember_original_spellbook(previous_spellbook);
                        }
                        tracing::info!(requirement = requirement.description(), "Requirement fulfilled");
                        report.fulfilled.push(requirement.description().to_string());
                    }
                    Err(AttemptError::Cancelled) => return Err(FulfillmentError::Cancelled),
                    Err(AttemptError::Failed(reason)) if requirement.is_mandatory() => {
                        tracing::warn!(
                            requirement = requirement.description(),
                            reason = %reason,
                            "Mandatory requirement failed"
                        );
                        return Err(FulfillmentError::MandatoryUnmet {
                            description: requirement.description().to_string(),
                            reason,
                        });
                    }
                    Err(AttemptError::Failed(reason)) => {
                        tracing::warn!(
                            requirement = requirement.description(),
                            reason = %reason,
                            "Recommended requirement not met, continuing"
                        );
                        report.skipped.push(requirement.description().to_string());
                    }
                }
                state.set_progress(report.handled(), total);
            }
        }

        if phase == TaskContext::PostSchedule {
            self.restore_spellbook(registry, cancel).await?;
        }
        Ok(report)
    }

    async fn restore_spellbook(
        &self,
        registry: &mut PrePostScheduleRequirements,
        cancel: &CancellationToken,
    ) -> Result<(), FulfillmentError> {
        let Some(original) = registry.take_original_spellbook() else {
            return Ok(());
        };
        let restore = Requirement::spellbook(
            original,
            TaskContext::PostSchedule,
            RequirementPriority::Recommended,
            MAX_RATING,
        );
        match self.attempt_with_timeout(&restore, cancel).await {
            Ok(_) => {
                tracing::debug!(spellbook = %original, "Original spellbook restored");
                Ok(())
            }
            Err(AttemptError::Cancelled) => Err(FulfillmentError::Cancelled),
            Err(AttemptError::Failed(reason)) => {
                tracing::warn!(spellbook = %original, reason = %reason, "Could not restore spellbook");
                Ok(())
            }
        }
    }

    async fn attempt_with_timeout(
        &self,
        requirement: &Requirement,
        cancel: &CancellationToken,
    ) -> Result<Attempt, AttemptError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AttemptError::Cancelled),
            outcome = tokio::time::timeout(self.requirement_timeout, self.attempt(requirement)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(AttemptError::Failed(
                        EnvironmentError::Timeout(self.requirement_timeout).to_string(),
                    )),
                }
            }
        }
    }

    async fn attempt(&self, requirement: &Requirement) -> Result<Attempt, AttemptError> {
        let snapshot = self
            .environment
            .snapshot()
            .await
            .map_err(|e| AttemptError::Failed(e.to_string()))?;
        if requirement.is_met_in(&snapshot) {
            return Ok(Attempt::AlreadyMet);
        }

        let mut failures = Vec::new();
        for option in requirement.options() {
            match self.environment.fulfill(option).await {
                Ok(()) => {
                    return Ok(Attempt::Fulfilled {
                        previous_spellbook: snapshot.spellbook(),
                    })
                }
                Err(e) => {
                    tracing::debug!(option = %option.describe(), error = %e, "Option failed");
                    failures.push(describe_failure(option, &e));
                }
            }
        }
        Err(AttemptError::Failed(failures.join("; ")))
    }
}

enum AttemptError {
    Cancelled,
    Failed(String),
}

fn describe_failure(option: &RequirementOption, error: &EnvironmentError) -> String {
    format!("{}: {}", option.describe(), error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::environment::StaticEnvironment;
    use crate::infrastructure::ports::MockGameEnvironmentPort;
    use async_trait::async_trait;
    use mockall::Sequence;
    use taskloom_domain::{GameSnapshot, WorldPoint};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn fulfiller(environment: impl GameEnvironmentPort + 'static) -> RequirementFulfiller {
        RequirementFulfiller::new(Arc::new(environment), TIMEOUT)
    }

    fn pickaxe(priority: RequirementPriority) -> Requirement {
        Requirement::item("Rune pickaxe", 1, TaskContext::PreSchedule, priority, 8)
    }

    mod ordering {
        use super::*;

        #[tokio::test]
        async fn items_then_spellbook_then_location() {
            let mut environment = MockGameEnvironmentPort::new();
            let mut seq = Sequence::new();
            environment
                .expect_snapshot()
                .returning(|| Ok(GameSnapshot::new()));
            for kind in RequirementKind::FULFILLMENT_ORDER {
                environment
                    .expect_fulfill()
                    .withf(move |option| option.kind() == kind)
                    .times(1)
                    .in_sequence(&mut seq)
                    .returning(|_| Ok(()));
            }

            // Registered in reverse order on purpose.
            let mut registry = PrePostScheduleRequirements::new()
                .with(Requirement::location(
                    "Bank",
                    WorldPoint::new(3185, 3436, 0),
                    10,
                    TaskContext::PreSchedule,
                    RequirementPriority::Mandatory,
                    5,
                ))
                .with(Requirement::spellbook(
                    Spellbook::Lunar,
                    TaskContext::PreSchedule,
                    RequirementPriority::Mandatory,
                    5,
                ))
                .with(pickaxe(RequirementPriority::Mandatory));

            let report = fulfiller(environment)
                .fulfill_phase(
                    &mut registry,
                    TaskContext::PreSchedule,
                    &CancellationToken::new(),
                    &TaskExecutionState::new(),
                )
                .await
                .unwrap();

            assert_eq!(report.fulfilled.len(), 3);
        }

        #[tokio::test]
        async fn only_the_requested_phase_runs() {
            let mut environment = MockGameEnvironmentPort::new();
            environment.expect_snapshot().returning(|| Ok(GameSnapshot::new()));
            environment.expect_fulfill().times(1).returning(|_| Ok(()));

            let mut registry = PrePostScheduleRequirements::new()
                .with(pickaxe(RequirementPriority::Mandatory))
                .with(Requirement::item(
                    "Coins",
                    100,
                    TaskContext::PostSchedule,
                    RequirementPriority::Mandatory,
                    5,
                ));

            let report = fulfiller(environment)
                .fulfill_phase(
                    &mut registry,
                    TaskContext::PreSchedule,
                    &CancellationToken::new(),
                    &TaskExecutionState::new(),
                )
                .await
                .unwrap();

            assert_eq!(report.fulfilled, vec!["1x Rune pickaxe".to_string()]);
        }
    }

    mod outcomes {
        use super::*;

        #[tokio::test]
        async fn already_met_requirement_is_not_fulfilled_again() {
            let mut environment = MockGameEnvironmentPort::new();
            environment
                .expect_snapshot()
                .returning(|| Ok(GameSnapshot::new().with_item("Rune pickaxe", 1)));
            environment.expect_fulfill().never();

            let mut registry =
                PrePostScheduleRequirements::new().with(pickaxe(RequirementPriority::Mandatory));

            let report = fulfiller(environment)
                .fulfill_phase(
                    &mut registry,
                    TaskContext::PreSchedule,
                    &CancellationToken::new(),
                    &TaskExecutionState::new(),
                )
                .await
                .unwrap();

            assert_eq!(report.already_met, vec!["1x Rune pickaxe".to_string()]);
        }

        #[tokio::test]
        async fn unmet_mandatory_requirement_fails_the_phase() {
            let mut environment = MockGameEnvironmentPort::new();
            environment.expect_snapshot().returning(|| Ok(GameSnapshot::new()));
            environment
                .expect_fulfill()
                .returning(|_| Err(EnvironmentError::Failed("not in bank".to_string())));

            let mut registry =
                PrePostScheduleRequirements::new().with(pickaxe(RequirementPriority::Mandatory));
            let state = TaskExecutionState::new();

            let err = fulfiller(environment)
                .fulfill_phase(&mut registry, TaskContext::PreSchedule, &CancellationToken::new(), &state)
                .await
                .unwrap_err();

            assert!(matches!(err, FulfillmentError::MandatoryUnmet { ref description, .. } if description == "1x Rune pickaxe"));
        }

        #[tokio::test]
        async fn unmet_recommended_requirement_is_skipped() {
            let mut environment = MockGameEnvironmentPort::new();
            environment.expect_snapshot().returning(|| Ok(GameSnapshot::new()));
            environment
                .expect_fulfill()
                .withf(|option| option.describe().contains("Stamina"))
                .returning(|_| Err(EnvironmentError::Failed("none left".to_string())));
            environment
                .expect_fulfill()
                .returning(|_| Ok(()));

            let mut registry = PrePostScheduleRequirements::new()
                .with(Requirement::item(
                    "Stamina potion",
                    2,
                    TaskContext::PreSchedule,
                    RequirementPriority::Recommended,
                    3,
                ))
                .with(pickaxe(RequirementPriority::Mandatory));

            let report = fulfiller(environment)
                .fulfill_phase(
                    &mut registry,
                    TaskContext::PreSchedule,
                    &CancellationToken::new(),
                    &TaskExecutionState::new(),
                )
                .await
                .unwrap();

            assert_eq!(report.fulfilled, vec!["1x Rune pickaxe".to_string()]);
            assert_eq!(report.skipped, vec!["2x Stamina potion".to_string()]);
        }

        #[tokio::test]
        async fn alternative_option_satisfies_the_group() {
            let environment = StaticEnvironment::new(GameSnapshot::new());
            let dragon = RequirementOption::item("Dragon pickaxe", 1);
            environment.refuse(&dragon).await;

            let requirement = Requirement::new(
                "Best pickaxe",
                TaskContext::PreSchedule,
                RequirementPriority::Mandatory,
                9,
                vec![dragon, RequirementOption::item("Rune pickaxe", 1)],
            )
            .unwrap();
            let mut registry = PrePostScheduleRequirements::new().with(requirement);

            fulfiller(environment.clone())
                .fulfill_phase(
                    &mut registry,
                    TaskContext::PreSchedule,
                    &CancellationToken::new(),
                    &TaskExecutionState::new(),
                )
                .await
                .unwrap();

            let snapshot = environment.snapshot().await.unwrap();
            assert!(RequirementOption::item("Rune pickaxe", 1).is_met_in(&snapshot));
        }

        #[tokio::test]
        async fn progress_reaches_the_total() {
            let environment = StaticEnvironment::new(GameSnapshot::new());
            let mut registry = PrePostScheduleRequirements::new()
                .with(pickaxe(RequirementPriority::Mandatory))
                .with(Requirement::item(
                    "Lobster",
                    10,
                    TaskContext::PreSchedule,
                    RequirementPriority::Recommended,
                    2,
                ));
            let state = TaskExecutionState::new();

            fulfiller(environment)
                .fulfill_phase(&mut registry, TaskContext::PreSchedule, &CancellationToken::new(), &state)
                .await
                .unwrap();

            let status = state.current();
            assert_eq!((status.current_step, status.total_steps), (2, 2));
        }
    }

    mod spellbook {
        use super::*;

        #[tokio::test]
        async fn post_phase_restores_the_original_spellbook() {
            let environment = StaticEnvironment::new(GameSnapshot::new().with_spellbook(Spellbook::Ancient));
            let mut registry = PrePostScheduleRequirements::new().with(Requirement::spellbook(
                Spellbook::Lunar,
                TaskContext::PreSchedule,
                RequirementPriority::Mandatory,
                7,
            ));
            let subject = fulfiller(environment.clone());
            let cancel = CancellationToken::new();
            let state = TaskExecutionState::new();

            subject
                .fulfill_phase(&mut registry, TaskContext::PreSchedule, &cancel, &state)
                .await
                .unwrap();
            assert_eq!(environment.snapshot().await.unwrap().spellbook(), Spellbook::Lunar);
            assert_eq!(registry.original_spellbook(), Some(Spellbook::Ancient));

            subject
                .fulfill_phase(&mut registry, TaskContext::PostSchedule, &cancel, &state)
                .await
                .unwrap();
            assert_eq!(environment.snapshot().await.unwrap().spellbook(), Spellbook::Ancient);
            assert_eq!(registry.original_spellbook(), None);
        }

        #[tokio::test]
        async fn nothing_is_remembered_when_already_on_the_book() {
            let environment = StaticEnvironment::new(GameSnapshot::new().with_spellbook(Spellbook::Lunar));
            let mut registry = PrePostScheduleRequirements::new().with(Requirement::spellbook(
                Spellbook::Lunar,
                TaskContext::PreSchedule,
                RequirementPriority::Mandatory,
                7,
            ));

            fulfiller(environment)
                .fulfill_phase(
                    &mut registry,
                    TaskContext::PreSchedule,
                    &CancellationToken::new(),
                    &TaskExecutionState::new(),
                )
                .await
                .unwrap();

            assert_eq!(registry.original_spellbook(), None);
        }
    }

    mod interruption {
        use super::*;

        /// Environment whose actions never finish.
        struct StuckEnvironment;

        #[async_trait]
        impl GameEnvironmentPort for StuckEnvironment {
            async fn snapshot(&self) -> Result<GameSnapshot, EnvironmentError> {
                Ok(GameSnapshot::new())
            }

            async fn fulfill(&self, _option: &RequirementOption) -> Result<(), EnvironmentError> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        #[tokio::test]
        async fn cancelled_before_start() {
            let cancel = CancellationToken::new();
            cancel.cancel();
            let mut registry =
                PrePostScheduleRequirements::new().with(pickaxe(RequirementPriority::Mandatory));

            let err = fulfiller(StaticEnvironment::default())
                .fulfill_phase(&mut registry, TaskContext::PreSchedule, &cancel, &TaskExecutionState::new())
                .await
                .unwrap_err();

            assert_eq!(err, FulfillmentError::Cancelled);
        }

        #[tokio::test(start_paused = true)]
        async fn stuck_mandatory_requirement_times_out() {
            let mut registry =
                PrePostScheduleRequirements::new().with(pickaxe(RequirementPriority::Mandatory));

            let err = fulfiller(StuckEnvironment)
                .fulfill_phase(
                    &mut registry,
                    TaskContext::PreSchedule,
                    &CancellationToken::new(),
                    &TaskExecutionState::new(),
                )
                .await
                .unwrap_err();

            assert!(matches!(err, FulfillmentError::MandatoryUnmet { ref reason, .. } if reason.contains("timed out")));
        }

        #[tokio::test(start_paused = true)]
        async fn cancellation_interrupts_a_stuck_requirement() {
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            let subject = fulfiller(StuckEnvironment);

            let handle = tokio::spawn(async move {
                let mut registry =
                    PrePostScheduleRequirements::new().with(pickaxe(RequirementPriority::Mandatory));
                subject
                    .fulfill_phase(&mut registry, TaskContext::PreSchedule, &cancel, &TaskExecutionState::new())
                    .await
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();

            assert_eq!(handle.await.unwrap(), Err(FulfillmentError::Cancelled));
        }
    }
}
