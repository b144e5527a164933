//! Item count conditions.

use serde::{Deserialize, Serialize};

use super::{zip_targets, Condition, ConditionContext, LogicalCondition, LogicalOperator, NamePattern};
use crate::game::GameEvent;

/// How a [`ResourceCountCondition`] counts items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceMode {
    /// Absolute number currently held in the inventory.
    #[default]
    Inventory,
    /// Number picked up or gathered since the last reset.
    Gathered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCountCondition {
    pattern: NamePattern,
    mode: ResourceMode,
    target_min: u32,
    target_max: u32,
    current_target: u32,
    gathered: u32,
    satisfied: bool,
}

impl ResourceCountCondition {
    pub fn new(
        item_name: &str,
        mode: ResourceMode,
        target_min: i64,
        target_max: i64,
        ctx: &ConditionContext<'_>,
    ) -> Self {
        let min = target_min.clamp(0, i64::from(u32::MAX));
        let max = target_max.clamp(min, i64::from(u32::MAX));

        Self {
            pattern: NamePattern::new(item_name),
            mode,
            target_min: min as u32,
            target_max: max as u32,
            current_target: ctx.roll(min, max) as u32,
            gathered: 0,
            satisfied: false,
        }
    }

    pub fn inventory(item_name: &str, count: i64, ctx: &ConditionContext<'_>) -> Self {
        Self::new(item_name, ResourceMode::Inventory, count, count, ctx)
    }

    pub fn gathered(item_name: &str, count: i64, ctx: &ConditionContext<'_>) -> Self {
        Self::new(item_name, ResourceMode::Gathered, count, count, ctx)
    }

    pub fn all_of(
        item_names: &[&str],
        mode: ResourceMode,
        mins: &[i64],
        maxs: &[i64],
        ctx: &ConditionContext<'_>,
    ) -> Condition {
        Self::combine(LogicalOperator::And, item_names, mode, mins, maxs, ctx)
    }

    pub fn any_of(
        item_names: &[&str],
        mode: ResourceMode,
        mins: &[i64],
        maxs: &[i64],
        ctx: &ConditionContext<'_>,
    ) -> Condition {
        Self::combine(LogicalOperator::Or, item_names, mode, mins, maxs, ctx)
    }

    fn combine(
        operator: LogicalOperator,
        item_names: &[&str],
        mode: ResourceMode,
        mins: &[i64],
        maxs: &[i64],
        ctx: &ConditionContext<'_>,
    ) -> Condition {
        let mut logical = LogicalCondition::new(operator);
        for (name, (min, max)) in item_names
            .iter()
            .zip(zip_targets(item_names.len(), mins, maxs))
        {
            logical.add(Self::new(name, mode, min, max, ctx));
        }
        Condition::Logical(logical)
    }

    pub fn pattern(&self) -> &NamePattern {
        &self.pattern
    }

    pub fn mode(&self) -> ResourceMode {
        self.mode
    }

    pub fn target_min(&self) -> u32 {
        self.target_min
    }

    pub fn target_max(&self) -> u32 {
        self.target_max
    }

    pub fn current_target(&self) -> u32 {
        self.current_target
    }

    pub fn satisfied(&self) -> bool {
        self.satisfied
    }

    pub fn current_count(&self, ctx: &ConditionContext<'_>) -> u32 {
        match self.mode {
            ResourceMode::Inventory => ctx.game().item_count(&self.pattern),
            ResourceMode::Gathered => self.gathered,
        }
    }

    pub fn is_satisfied(&mut self, ctx: &ConditionContext<'_>) -> bool {
        if !self.satisfied && self.current_count(ctx) >= self.current_target {
            self.satisfied = true;
        }
        self.satisfied
    }

    pub fn on_event(&mut self, event: &GameEvent) {
        if self.mode != ResourceMode::Gathered {
            return;
        }
        if let GameEvent::ItemGained {
            item_name,
            quantity,
        } = event
        {
            if self.pattern.is_match(item_name) {
                self.gathered = self.gathered.saturating_add(*quantity);
            }
        }
    }

    pub fn progress(&self, ctx: &ConditionContext<'_>) -> f64 {
        if self.satisfied || self.current_target == 0 {
            return 100.0;
        }
        (f64::from(self.current_count(ctx)) * 100.0 / f64::from(self.current_target)).min(100.0)
    }

    pub fn reset(&mut self, randomize: bool, ctx: &ConditionContext<'_>) {
        if randomize && self.target_min != self.target_max {
            self.current_target =
                ctx.roll(i64::from(self.target_min), i64::from(self.target_max)) as u32;
        }
        self.gathered = 0;
        self.satisfied = false;
    }

    pub fn describe(&self) -> String {
        match self.mode {
            ResourceMode::Inventory => {
                format!("Have {} {} in inventory", self.current_target, self.pattern)
            }
            ResourceMode::Gathered => format!(
                "Gather {} {} ({}/{})",
                self.current_target, self.pattern, self.gathered, self.current_target
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::test_support::{ctx, ctx_max, fixed_time};
    use crate::game::GameSnapshot;

    fn gained(name: &str, quantity: u32) -> GameEvent {
        GameEvent::ItemGained {
            item_name: name.to_string(),
            quantity,
        }
    }

    #[test]
    fn inventory_mode_reads_absolute_count() {
        let mut game = GameSnapshot::new().with_item("Logs", 10);
        let mut condition = ResourceCountCondition::inventory("logs", 28, &ctx(fixed_time(), &game));
        assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));
        assert!((condition.progress(&ctx(fixed_time(), &game)) - 35.714).abs() < 0.01);

        game.add_item("Logs", 18);
        assert!(condition.is_satisfied(&ctx(fixed_time(), &game)));
    }

    #[test]
    fn gathered_mode_counts_matching_events_since_reset() {
        let game = GameSnapshot::new().with_item("Shrimps", 500);
        let mut condition = ResourceCountCondition::gathered("Shrimps", 3, &ctx(fixed_time(), &game));
        assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));

        condition.on_event(&gained("Shrimps", 2));
        condition.on_event(&gained("Anchovies", 5));
        assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));

        condition.on_event(&gained("Raw shrimps", 1));
        assert!(condition.is_satisfied(&ctx(fixed_time(), &game)));

        condition.reset(false, &ctx(fixed_time(), &game));
        assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));
    }

    #[test]
    fn inventory_mode_ignores_gain_events() {
        let game = GameSnapshot::new();
        let mut condition = ResourceCountCondition::inventory("Logs", 1, &ctx(fixed_time(), &game));
        condition.on_event(&gained("Logs", 5));
        assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));
    }

    #[test]
    fn randomized_target_is_drawn_in_range() {
        let game = GameSnapshot::new();
        let mut condition =
            ResourceCountCondition::new("Logs", ResourceMode::Gathered, 10, 20, &ctx(fixed_time(), &game));
        assert_eq!(condition.current_target(), 10);
        condition.reset(true, &ctx_max(fixed_time(), &game));
        assert_eq!(condition.current_target(), 20);
    }
}
