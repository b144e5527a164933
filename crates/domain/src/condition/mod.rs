//! Condition algebra
//!
//! A [`Condition`] is a closed sum of leaf predicates and combinators. Every
//! predicate leaf latches: once [`Condition::is_satisfied`] has returned
//! true it keeps returning true until [`Condition::reset`].
//!
//! Evaluation never fails. Out-of-range construction arguments are clamped
//! because trees are rebuilt from persisted, possibly hand-edited data.

mod context;
mod location;
mod lock;
mod logical;
mod npc;
mod pattern;
mod resource;
mod skill;
pub mod time;

#[cfg(test)]
pub(crate) mod test_support;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::GameEvent;

pub use context::{ConditionContext, RangeRoll};
pub use location::{LocationCondition, LocationTarget, MAX_POSITION_DISTANCE};
pub use lock::{LockCondition, LockGuard, LockHandle};
pub use logical::{LogicalCondition, LogicalOperator, NotCondition};
pub use npc::NpcKillCountCondition;
pub use pattern::NamePattern;
pub use resource::{ResourceCountCondition, ResourceMode};
pub use skill::{SkillLevelCondition, SkillXpCondition};
pub use time::{
    DayOfWeekCondition, IntervalCondition, RepeatCycle, SingleTriggerTimeCondition,
    TimeWindowCondition, TimeWindowSchedule,
};

// ============================================================================
// Condition type
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionType {
    NpcKillCount,
    SkillLevel,
    SkillXp,
    Resource,
    Location,
    Interval,
    SingleTrigger,
    TimeWindow,
    DayOfWeek,
    And,
    Or,
    Not,
    Lock,
}

impl ConditionType {
    pub fn is_time(self) -> bool {
        matches!(
            self,
            ConditionType::Interval
                | ConditionType::SingleTrigger
                | ConditionType::TimeWindow
                | ConditionType::DayOfWeek
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, ConditionType::And | ConditionType::Or | ConditionType::Not)
    }
}

// ============================================================================
// Condition
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    NpcKillCount(NpcKillCountCondition),
    SkillLevel(SkillLevelCondition),
    SkillXp(SkillXpCondition),
    Resource(ResourceCountCondition),
    Location(LocationCondition),
    Interval(IntervalCondition),
    SingleTrigger(SingleTriggerTimeCondition),
    TimeWindow(TimeWindowCondition),
    DayOfWeek(DayOfWeekCondition),
    Logical(LogicalCondition),
    Not(NotCondition),
    Lock(LockCondition),
}

impl Condition {
    pub fn and(children: impl IntoIterator<Item = Condition>) -> Self {
        Self::combine(LogicalOperator::And, children)
    }

    pub fn or(children: impl IntoIterator<Item = Condition>) -> Self {
        Self::combine(LogicalOperator::Or, children)
    }

    pub fn not(inner: impl Into<Condition>) -> Self {
        Condition::Not(NotCondition::new(inner))
    }

    fn combine(operator: LogicalOperator, children: impl IntoIterator<Item = Condition>) -> Self {
        let mut logical = LogicalCondition::new(operator);
        for child in children {
            logical.add(child);
        }
        Condition::Logical(logical)
    }

    pub fn condition_type(&self) -> ConditionType {
        match self {
            Condition::NpcKillCount(_) => ConditionType::NpcKillCount,
            Condition::SkillLevel(_) => ConditionType::SkillLevel,
            Condition::SkillXp(_) => ConditionType::SkillXp,
            Condition::Resource(_) => ConditionType::Resource,
            Condition::Location(_) => ConditionType::Location,
            Condition::Interval(_) => ConditionType::Interval,
            Condition::SingleTrigger(_) => ConditionType::SingleTrigger,
            Condition::TimeWindow(_) => ConditionType::TimeWindow,
            Condition::DayOfWeek(_) => ConditionType::DayOfWeek,
            Condition::Logical(logical) => match logical.operator() {
                LogicalOperator::And => ConditionType::And,
                LogicalOperator::Or => ConditionType::Or,
            },
            Condition::Not(_) => ConditionType::Not,
            Condition::Lock(_) => ConditionType::Lock,
        }
    }

    pub fn is_lock(&self) -> bool {
        matches!(self, Condition::Lock(_))
    }

    /// Observes the environment and latches.
    pub fn is_satisfied(&mut self, ctx: &ConditionContext<'_>) -> bool {
        match self {
            Condition::NpcKillCount(c) => c.is_satisfied(),
            Condition::SkillLevel(c) => c.is_satisfied(ctx),
            Condition::SkillXp(c) => c.is_satisfied(ctx),
            Condition::Resource(c) => c.is_satisfied(ctx),
            Condition::Location(c) => c.is_satisfied(ctx),
            Condition::Interval(c) => c.is_satisfied(ctx),
            Condition::SingleTrigger(c) => c.is_satisfied(ctx),
            Condition::TimeWindow(c) => c.is_satisfied(ctx),
            Condition::DayOfWeek(c) => c.is_satisfied(ctx),
            Condition::Logical(c) => c.is_satisfied(ctx),
            Condition::Not(c) => c.is_satisfied(ctx),
            Condition::Lock(c) => c.satisfied(),
        }
    }

    /// Latched state as of the last observation.
    pub fn satisfied(&self) -> bool {
        match self {
            Condition::NpcKillCount(c) => c.satisfied(),
            Condition::SkillLevel(c) => c.satisfied(),
            Condition::SkillXp(c) => c.satisfied(),
            Condition::Resource(c) => c.satisfied(),
            Condition::Location(c) => c.satisfied(),
            Condition::Interval(c) => c.satisfied(),
            Condition::SingleTrigger(c) => c.satisfied(),
            Condition::TimeWindow(c) => c.satisfied(),
            Condition::DayOfWeek(c) => c.satisfied(),
            Condition::Logical(c) => c.satisfied(),
            Condition::Not(c) => c.satisfied(),
            Condition::Lock(c) => c.satisfied(),
        }
    }

    /// Percentage in `[0, 100]`; 100 whenever satisfied.
    pub fn progress(&self, ctx: &ConditionContext<'_>) -> f64 {
        let value = match self {
            Condition::NpcKillCount(c) => c.progress(),
            Condition::SkillLevel(c) => c.progress(ctx),
            Condition::SkillXp(c) => c.progress(ctx),
            Condition::Resource(c) => c.progress(ctx),
            Condition::Location(c) => c.progress(),
            Condition::Interval(c) => c.progress(ctx),
            Condition::SingleTrigger(c) => c.progress(ctx),
            Condition::TimeWindow(c) => c.progress(),
            Condition::DayOfWeek(c) => c.progress(ctx),
            Condition::Logical(c) => c.progress(ctx),
            Condition::Not(c) => c.progress(),
            Condition::Lock(c) => c.progress(),
        };
        if value.is_finite() {
            value.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    /// Clears latches and counters, re-snapshots baselines, and redraws
    /// randomized targets when `randomize` is set.
    pub fn reset(&mut self, randomize: bool, ctx: &ConditionContext<'_>) {
        match self {
            Condition::NpcKillCount(c) => c.reset(randomize, ctx),
            Condition::SkillLevel(c) => c.reset(randomize, ctx),
            Condition::SkillXp(c) => c.reset(randomize, ctx),
            Condition::Resource(c) => c.reset(randomize, ctx),
            Condition::Location(c) => c.reset(),
            Condition::Interval(c) => c.reset(randomize, ctx),
            Condition::SingleTrigger(c) => c.reset(),
            Condition::TimeWindow(c) => c.reset(randomize, ctx),
            Condition::DayOfWeek(c) => c.reset(randomize, ctx),
            Condition::Logical(c) => c.reset(randomize, ctx),
            Condition::Not(c) => c.reset(randomize, ctx),
            Condition::Lock(_) => {}
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Condition::NpcKillCount(c) => c.describe(),
            Condition::SkillLevel(c) => c.describe(),
            Condition::SkillXp(c) => c.describe(),
            Condition::Resource(c) => c.describe(),
            Condition::Location(c) => c.describe(),
            Condition::Interval(c) => c.describe(),
            Condition::SingleTrigger(c) => c.describe(),
            Condition::TimeWindow(c) => c.describe(),
            Condition::DayOfWeek(c) => c.describe(),
            Condition::Logical(c) => c.describe(),
            Condition::Not(c) => c.describe(),
            Condition::Lock(c) => c.describe(),
        }
    }

    /// Feeds an environment notification to every leaf that counts events.
    pub fn on_event(&mut self, event: &GameEvent, now: DateTime<Utc>) {
        match self {
            Condition::NpcKillCount(c) => c.on_event(event, now),
            Condition::Resource(c) => c.on_event(event),
            Condition::Logical(c) => c.on_event(event, now),
            Condition::Not(c) => c.inner_mut().on_event(event, now),
            _ => {}
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        match self {
            Condition::Interval(c) => c.pause(now),
            Condition::SingleTrigger(c) => c.pause(now),
            Condition::TimeWindow(c) => c.pause(now),
            Condition::DayOfWeek(c) => c.pause(now),
            Condition::Logical(c) => c.pause(now),
            Condition::Not(c) => c.inner_mut().pause(now),
            _ => {}
        }
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        match self {
            Condition::Interval(c) => c.resume(now),
            Condition::SingleTrigger(c) => c.resume(now),
            Condition::TimeWindow(c) => c.resume(now),
            Condition::DayOfWeek(c) => c.resume(now),
            Condition::Logical(c) => c.resume(now),
            Condition::Not(c) => c.inner_mut().resume(now),
            _ => {}
        }
    }

    /// Next instant at which a time-based part of this tree may fire.
    pub fn next_trigger_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Condition::Interval(c) => c.next_trigger_time(),
            Condition::SingleTrigger(c) => c.next_trigger_time(),
            Condition::TimeWindow(c) => c.next_trigger_time(),
            Condition::DayOfWeek(c) => c.next_trigger_time(now),
            Condition::Logical(c) => c.next_trigger_time(now),
            _ => None,
        }
    }

    /// Leaves below this node, counting nested trees through. Locks are
    /// not counted.
    pub fn total_condition_count(&self) -> usize {
        match self {
            Condition::Logical(c) => c.total_condition_count(),
            Condition::Lock(_) => 0,
            _ => 1,
        }
    }

    pub fn met_condition_count(&self) -> usize {
        match self {
            Condition::Logical(c) => c.met_condition_count(),
            Condition::Lock(_) => 0,
            other => usize::from(other.satisfied()),
        }
    }

    /// Whether any lock in this tree is held.
    pub fn is_locked(&self) -> bool {
        match self {
            Condition::Lock(c) => c.is_locked(),
            Condition::Logical(c) => c.is_locked(),
            Condition::Not(c) => c.inner().is_locked(),
            _ => false,
        }
    }

    pub fn lock_handles(&self) -> Vec<LockHandle> {
        match self {
            Condition::Lock(c) => vec![c.handle().clone()],
            Condition::Logical(c) => c.lock_handles(),
            Condition::Not(c) => c.inner().lock_handles(),
            _ => Vec::new(),
        }
    }

    /// An empty AND/OR, which schedule entries read as "no constraint".
    pub fn is_empty_tree(&self) -> bool {
        match self {
            Condition::Logical(c) => c.children().iter().all(Condition::is_lock),
            _ => false,
        }
    }
}

macro_rules! impl_from_leaf {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Condition {
                fn from(condition: $ty) -> Self {
                    Condition::$variant(condition)
                }
            }
        )*
    };
}

impl_from_leaf!(
    NpcKillCount(NpcKillCountCondition),
    SkillLevel(SkillLevelCondition),
    SkillXp(SkillXpCondition),
    Resource(ResourceCountCondition),
    Location(LocationCondition),
    Interval(IntervalCondition),
    SingleTrigger(SingleTriggerTimeCondition),
    TimeWindow(TimeWindowCondition),
    DayOfWeek(DayOfWeekCondition),
    Logical(LogicalCondition),
    Not(NotCondition),
    Lock(LockCondition),
);

/// Pairs per-entry bounds for the parallel-list builders.
///
/// Missing mins default to 1 and missing maxs copy the mins. The result is
/// truncated to the shortest list.
pub(crate) fn zip_targets(len: usize, mins: &[i64], maxs: &[i64]) -> Vec<(i64, i64)> {
    let mins: Vec<i64> = if mins.is_empty() {
        vec![1; len]
    } else {
        mins.to_vec()
    };
    let maxs: Vec<i64> = if maxs.is_empty() {
        mins.clone()
    } else {
        maxs.to_vec()
    };
    mins.into_iter().zip(maxs).take(len).collect()
}
