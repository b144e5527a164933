//! Pure scheduling domain: the condition algebra, schedule entries and their
//! lifecycle, execution results, and pre/post schedule requirements.
//!
//! Nothing in this crate performs I/O, sleeps, or logs. Time and randomness
//! arrive through [`condition::ConditionContext`].

pub mod condition;
pub mod error;
pub mod execution;
pub mod game;
pub mod ids;
pub mod requirement;
pub mod schedule;

pub use condition::{
    Condition, ConditionContext, ConditionType, LockGuard, LockHandle, LogicalCondition,
    LogicalOperator,
};
pub use error::DomainError;
pub use execution::ExecutionResult;
pub use game::{GameEvent, GameSnapshot, GameView, Skill, Spellbook, WorldPoint};
pub use ids::{RequirementId, ScheduleEntryId};
pub use requirement::{
    FulfillmentStep, PrePostScheduleRequirements, Requirement, RequirementKind, RequirementOption,
    RequirementPriority, TaskContext,
};
pub use schedule::{EntryState, EntryUpdate, ExecutionRecord, ScheduleEntry, StopReason};
