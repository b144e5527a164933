//! AND / OR / NOT combinators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Condition, ConditionContext, LockHandle};
use crate::game::GameEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    fn keyword(self) -> &'static str {
        match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
        }
    }
}

/// Ordered children combined by one operator.
///
/// Lock children never take part in satisfaction or progress. A tree with
/// no other children is not satisfied.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalCondition {
    operator: LogicalOperator,
    children: Vec<Condition>,
}

impl LogicalCondition {
    pub fn new(operator: LogicalOperator) -> Self {
        Self {
            operator,
            children: Vec::new(),
        }
    }

    pub fn and() -> Self {
        Self::new(LogicalOperator::And)
    }

    pub fn or() -> Self {
        Self::new(LogicalOperator::Or)
    }

    pub fn with(mut self, child: impl Into<Condition>) -> Self {
        self.add(child);
        self
    }

    pub fn operator(&self) -> LogicalOperator {
        self.operator
    }

    pub fn children(&self) -> &[Condition] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Condition] {
        &mut self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Appends a child unless an equal one is already present.
    pub fn add(&mut self, child: impl Into<Condition>) -> bool {
        let child = child.into();
        if self.children.contains(&child) {
            return false;
        }
        self.children.push(child);
        true
    }

    /// Removes the first equal child, searching nested trees.
    pub fn remove(&mut self, target: &Condition) -> bool {
        if let Some(index) = self.children.iter().position(|child| child == target) {
            self.children.remove(index);
            return true;
        }
        self.children.iter_mut().any(|child| match child {
            Condition::Logical(nested) => nested.remove(target),
            _ => false,
        })
    }

    /// Whether an equal condition appears anywhere below this node.
    pub fn contains(&self, target: &Condition) -> bool {
        self.children.iter().any(|child| {
            child == target
                || match child {
                    Condition::Logical(nested) => nested.contains(target),
                    Condition::Not(not) => not.inner() == target,
                    _ => false,
                }
        })
    }

    fn predicates(&self) -> impl Iterator<Item = &Condition> {
        self.children.iter().filter(|child| !child.is_lock())
    }

    /// Evaluates every child so each one latches, then combines.
    pub fn is_satisfied(&mut self, ctx: &ConditionContext<'_>) -> bool {
        let mut any_predicate = false;
        let mut all = true;
        let mut any = false;
        for child in self.children.iter_mut().filter(|child| !child.is_lock()) {
            any_predicate = true;
            let satisfied = child.is_satisfied(ctx);
            all &= satisfied;
            any |= satisfied;
        }
        any_predicate
            && match self.operator {
                LogicalOperator::And => all,
                LogicalOperator::Or => any,
            }
    }

    /// Combination of the children's latched state, without observing.
    pub fn satisfied(&self) -> bool {
        let mut predicates = self.predicates().peekable();
        if predicates.peek().is_none() {
            return false;
        }
        match self.operator {
            LogicalOperator::And => predicates.all(Condition::satisfied),
            LogicalOperator::Or => predicates.any(Condition::satisfied),
        }
    }

    /// AND is the mean of child progress, OR the best child.
    pub fn progress(&self, ctx: &ConditionContext<'_>) -> f64 {
        if self.satisfied() {
            return 100.0;
        }
        let values: Vec<f64> = self.predicates().map(|child| child.progress(ctx)).collect();
        if values.is_empty() {
            return 0.0;
        }
        match self.operator {
            LogicalOperator::And => values.iter().sum::<f64>() / values.len() as f64,
            LogicalOperator::Or => values.iter().copied().fold(0.0, f64::max),
        }
    }

    pub fn reset(&mut self, randomize: bool, ctx: &ConditionContext<'_>) {
        for child in &mut self.children {
            child.reset(randomize, ctx);
        }
    }

    pub fn on_event(&mut self, event: &GameEvent, now: DateTime<Utc>) {
        for child in &mut self.children {
            child.on_event(event, now);
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        for child in &mut self.children {
            child.pause(now);
        }
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        for child in &mut self.children {
            child.resume(now);
        }
    }

    /// OR fires at its earliest child trigger, AND no sooner than its latest.
    pub fn next_trigger_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let times = self
            .children
            .iter()
            .filter_map(|child| child.next_trigger_time(now));
        match self.operator {
            LogicalOperator::And => times.max(),
            LogicalOperator::Or => times.min(),
        }
    }

    pub fn total_condition_count(&self) -> usize {
        self.children.iter().map(Condition::total_condition_count).sum()
    }

    pub fn met_condition_count(&self) -> usize {
        self.children.iter().map(Condition::met_condition_count).sum()
    }

    pub fn is_locked(&self) -> bool {
        self.children.iter().any(Condition::is_locked)
    }

    pub fn lock_handles(&self) -> Vec<LockHandle> {
        self.children.iter().flat_map(Condition::lock_handles).collect()
    }

    pub fn describe(&self) -> String {
        if self.children.is_empty() {
            return format!("No conditions ({})", self.operator.keyword());
        }
        let parts: Vec<String> = self
            .children
            .iter()
            .map(|child| match child {
                Condition::Logical(nested) if nested.len() > 1 => format!("({})", nested.describe()),
                other => other.describe(),
            })
            .collect();
        parts.join(&format!(" {} ", self.operator.keyword()))
    }
}

/// Satisfied exactly when its child is not.
///
/// NOT does not latch: it mirrors the child. Progress reads 100 while the
/// child is unsatisfied and 0 once it is.
#[derive(Debug, Clone, PartialEq)]
pub struct NotCondition {
    inner: Box<Condition>,
}

impl NotCondition {
    pub fn new(inner: impl Into<Condition>) -> Self {
        Self {
            inner: Box::new(inner.into()),
        }
    }

    pub fn inner(&self) -> &Condition {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Condition {
        &mut self.inner
    }

    pub fn is_satisfied(&mut self, ctx: &ConditionContext<'_>) -> bool {
        !self.inner.is_satisfied(ctx)
    }

    pub fn satisfied(&self) -> bool {
        !self.inner.satisfied()
    }

    pub fn progress(&self) -> f64 {
        if self.satisfied() {
            100.0
        } else {
            0.0
        }
    }

    pub fn reset(&mut self, randomize: bool, ctx: &ConditionContext<'_>) {
        self.inner.reset(randomize, ctx);
    }

    pub fn describe(&self) -> String {
        format!("NOT ({})", self.inner.describe())
    }
}
