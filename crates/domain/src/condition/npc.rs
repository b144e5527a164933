//! Kill-count tracking for NPCs matched by name.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::{zip_targets, Condition, ConditionContext, LogicalCondition, LogicalOperator, NamePattern};
use crate::game::GameEvent;

/// Satisfied once the player has killed `current_target` matching NPCs.
///
/// A kill only counts when the player was seen interacting with the NPC
/// before it despawned dead. Interacted NPC indices are tracked until they
/// despawn.
#[derive(Debug, Clone, PartialEq)]
pub struct NpcKillCountCondition {
    pattern: NamePattern,
    target_min: u32,
    target_max: u32,
    current_target: u32,
    kill_count: u32,
    tracked: HashSet<u32>,
    satisfied: bool,
    counting_since: DateTime<Utc>,
    last_kill_at: Option<DateTime<Utc>>,
}

impl NpcKillCountCondition {
    /// Bounds are clamped: `min >= 0` and `max >= min`. The current target
    /// is drawn in `[min, max]`.
    pub fn new(name: &str, target_min: i64, target_max: i64, ctx: &ConditionContext<'_>) -> Self {
        let min = target_min.max(0);
        let max = target_max.max(min);
        let current_target = ctx.roll(min, max);

        Self {
            pattern: NamePattern::new(name),
            target_min: clamp_u32(min),
            target_max: clamp_u32(max),
            current_target: clamp_u32(current_target),
            kill_count: 0,
            tracked: HashSet::new(),
            satisfied: false,
            counting_since: ctx.now(),
            last_kill_at: None,
        }
    }

    pub fn fixed(name: &str, count: i64, ctx: &ConditionContext<'_>) -> Self {
        Self::new(name, count, count, ctx)
    }

    /// Every listed NPC must reach its own target.
    pub fn all_of(
        names: &[&str],
        mins: &[i64],
        maxs: &[i64],
        ctx: &ConditionContext<'_>,
    ) -> Condition {
        Self::combine(LogicalOperator::And, names, mins, maxs, ctx)
    }

    /// Any listed NPC reaching its target is enough.
    pub fn any_of(
        names: &[&str],
        mins: &[i64],
        maxs: &[i64],
        ctx: &ConditionContext<'_>,
    ) -> Condition {
        Self::combine(LogicalOperator::Or, names, mins, maxs, ctx)
    }

    fn combine(
        operator: LogicalOperator,
        names: &[&str],
        mins: &[i64],
        maxs: &[i64],
        ctx: &ConditionContext<'_>,
    ) -> Condition {
        let mut logical = LogicalCondition::new(operator);
        for (name, (min, max)) in names.iter().zip(zip_targets(names.len(), mins, maxs)) {
            logical.add(Self::new(name, min, max, ctx));
        }
        Condition::Logical(logical)
    }

    pub fn pattern(&self) -> &NamePattern {
        &self.pattern
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

    pub fn kill_count(&self) -> u32 {
        self.kill_count
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_randomized(&self) -> bool {
        self.target_min != self.target_max
    }

    pub fn satisfied(&self) -> bool {
        self.satisfied
    }

    pub fn is_satisfied(&mut self) -> bool {
        if !self.satisfied && self.kill_count >= self.current_target {
            self.satisfied = true;
        }
        self.satisfied
    }

    pub fn on_event(&mut self, event: &GameEvent, now: DateTime<Utc>) {
        match event {
            GameEvent::InteractingChanged {
                npc_index,
                npc_name,
            } => {
                if self.pattern.is_match(npc_name) {
                    self.tracked.insert(*npc_index);
                }
            }
            GameEvent::NpcDespawned {
                npc_index,
                npc_name,
                is_dead,
            } => {
                let was_tracked = self.tracked.remove(npc_index);
                if was_tracked && *is_dead && self.pattern.is_match(npc_name) {
                    self.record_kill(now);
                }
            }
            GameEvent::ItemGained { .. } => {}
        }
    }

    /// Counts a kill observed by some other means.
    pub fn record_kill(&mut self, now: DateTime<Utc>) {
        self.kill_count = self.kill_count.saturating_add(1);
        self.last_kill_at = Some(now);
        self.is_satisfied();
    }

    pub fn progress(&self) -> f64 {
        if self.satisfied || self.current_target == 0 {
            return 100.0;
        }
        (f64::from(self.kill_count) * 100.0 / f64::from(self.current_target)).min(100.0)
    }

    pub fn reset(&mut self, randomize: bool, ctx: &ConditionContext<'_>) {
        if randomize && self.is_randomized() {
            self.current_target = clamp_u32(
                ctx.roll(i64::from(self.target_min), i64::from(self.target_max)),
            );
        }
        self.satisfied = false;
        self.kill_count = 0;
        self.tracked.clear();
        self.counting_since = ctx.now();
        self.last_kill_at = None;
    }

    pub fn kills_per_hour(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.counting_since).num_seconds();
        if elapsed <= 0 {
            return 0.0;
        }
        f64::from(self.kill_count) * 3600.0 / elapsed as f64
    }

    pub fn last_kill_at(&self) -> Option<DateTime<Utc>> {
        self.last_kill_at
    }

    pub fn describe(&self) -> String {
        let mut description = format!("Kill {} {}", self.current_target, self.pattern);
        if self.is_randomized() {
            description.push_str(&format!(
                " (randomized from {}-{})",
                self.target_min, self.target_max
            ));
        }
        description.push_str(&format!(
            " ({}/{}, {:.0}%)",
            self.kill_count,
            self.current_target,
            self.progress()
        ));
        description
    }
}

fn clamp_u32(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::test_support::{ctx, ctx_max, fixed_time, minutes};
    use crate::game::GameSnapshot;

    fn interact(index: u32, name: &str) -> GameEvent {
        GameEvent::InteractingChanged {
            npc_index: index,
            npc_name: name.to_string(),
        }
    }

    fn despawn(index: u32, name: &str, is_dead: bool) -> GameEvent {
        GameEvent::NpcDespawned {
            npc_index: index,
            npc_name: name.to_string(),
            is_dead,
        }
    }

    fn kill(condition: &mut NpcKillCountCondition, index: u32, name: &str) {
        condition.on_event(&interact(index, name), fixed_time());
        condition.on_event(&despawn(index, name, true), fixed_time());
    }

    mod constructor {
        use super::*;

        #[test]
        fn clamps_malformed_bounds() {
            let game = GameSnapshot::new();
            let condition = NpcKillCountCondition::new("Goblin", -4, -10, &ctx(fixed_time(), &game));
            assert_eq!(condition.target_min(), 0);
            assert_eq!(condition.target_max(), 0);
            assert_eq!(condition.current_target(), 0);
            assert_eq!(condition.progress(), 100.0);
        }

        #[test]
        fn draws_target_inside_range() {
            let game = GameSnapshot::new();
            let low = NpcKillCountCondition::new("Goblin", 5, 10, &ctx(fixed_time(), &game));
            let high = NpcKillCountCondition::new("Goblin", 5, 10, &ctx_max(fixed_time(), &game));
            assert_eq!(low.current_target(), 5);
            assert_eq!(high.current_target(), 10);
        }
    }

    mod counting {
        use super::*;

        #[test]
        fn three_qualifying_kills_satisfy_and_stay_satisfied() {
            let game = GameSnapshot::new();
            let mut condition =
                NpcKillCountCondition::fixed("Chaos Fanatic", 3, &ctx(fixed_time(), &game));

            for index in 0..3 {
                assert!(!condition.is_satisfied());
                kill(&mut condition, index, "Chaos Fanatic");
            }
            assert!(condition.is_satisfied());

            kill(&mut condition, 3, "Chaos Fanatic");
            assert!(condition.is_satisfied());
            assert_eq!(condition.kill_count(), 4);
            assert_eq!(condition.progress(), 100.0);
        }

        #[test]
        fn despawn_without_interaction_does_not_count() {
            let game = GameSnapshot::new();
            let mut condition = NpcKillCountCondition::fixed("Goblin", 1, &ctx(fixed_time(), &game));
            condition.on_event(&despawn(7, "Goblin", true), fixed_time());
            assert_eq!(condition.kill_count(), 0);
        }

        #[test]
        fn despawn_alive_untracks_without_counting() {
            let game = GameSnapshot::new();
            let mut condition = NpcKillCountCondition::fixed("Goblin", 1, &ctx(fixed_time(), &game));
            condition.on_event(&interact(7, "Goblin"), fixed_time());
            assert_eq!(condition.tracked_count(), 1);
            condition.on_event(&despawn(7, "Goblin", false), fixed_time());
            assert_eq!(condition.tracked_count(), 0);
            assert_eq!(condition.kill_count(), 0);
        }

        #[test]
        fn non_matching_names_are_ignored() {
            let game = GameSnapshot::new();
            let mut condition = NpcKillCountCondition::fixed("Goblin", 1, &ctx(fixed_time(), &game));
            kill(&mut condition, 1, "Cow");
            assert_eq!(condition.kill_count(), 0);
            assert_eq!(condition.tracked_count(), 0);
        }

        #[test]
        fn progress_is_proportional_and_capped() {
            let game = GameSnapshot::new();
            let mut condition = NpcKillCountCondition::fixed("Goblin", 4, &ctx(fixed_time(), &game));
            kill(&mut condition, 1, "Goblin");
            assert_eq!(condition.progress(), 25.0);
        }

        #[test]
        fn kills_per_hour_uses_elapsed_time() {
            let game = GameSnapshot::new();
            let mut condition = NpcKillCountCondition::fixed("Goblin", 10, &ctx(fixed_time(), &game));
            kill(&mut condition, 1, "Goblin");
            kill(&mut condition, 2, "Goblin");
            assert_eq!(condition.kills_per_hour(fixed_time() + minutes(30)), 4.0);
        }
    }

    mod reset {
        use super::*;

        #[test]
        fn randomized_reset_redraws_within_bounds_and_clears_state() {
            let game = GameSnapshot::new();
            let mut condition = NpcKillCountCondition::new("Goblin", 2, 6, &ctx(fixed_time(), &game));
            kill(&mut condition, 1, "Goblin");
            kill(&mut condition, 2, "Goblin");
            assert!(condition.is_satisfied());

            condition.reset(true, &ctx_max(fixed_time(), &game));
            assert_eq!(condition.current_target(), 6);
            assert!(!condition.satisfied());
            assert_eq!(condition.kill_count(), 0);
            assert_eq!(condition.tracked_count(), 0);

            condition.reset(true, &ctx(fixed_time(), &game));
            assert!((2..=6).contains(&condition.current_target()));
        }

        #[test]
        fn reset_without_randomize_keeps_target() {
            let game = GameSnapshot::new();
            let mut condition = NpcKillCountCondition::new("Goblin", 2, 6, &ctx(fixed_time(), &game));
            condition.reset(false, &ctx_max(fixed_time(), &game));
            assert_eq!(condition.current_target(), 2);
        }
    }

    mod builders {
        use super::*;

        #[test]
        fn parallel_lists_truncate_to_shortest() {
            let game = GameSnapshot::new();
            let condition = NpcKillCountCondition::all_of(
                &["Goblin", "Cow", "Chicken"],
                &[1, 2],
                &[3, 4, 5],
                &ctx(fixed_time(), &game),
            );
            assert_eq!(condition.total_condition_count(), 2);
        }

        #[test]
        fn missing_bounds_default_to_one_kill() {
            let game = GameSnapshot::new();
            let condition =
                NpcKillCountCondition::any_of(&["Goblin", "Cow"], &[], &[], &ctx(fixed_time(), &game));
            let Condition::Logical(logical) = &condition else {
                panic!("expected a logical condition");
            };
            assert_eq!(logical.operator(), LogicalOperator::Or);
            for child in logical.children() {
                let Condition::NpcKillCount(npc) = child else {
                    panic!("expected kill count children");
                };
                assert_eq!(npc.current_target(), 1);
            }
        }
    }

    #[test]
    fn describe_includes_progress() {
        let game = GameSnapshot::new();
        let condition = NpcKillCountCondition::new("Goblin", 5, 10, &ctx(fixed_time(), &game));
        assert_eq!(
            condition.describe(),
            "Kill 5 Goblin (randomized from 5-10) (0/5, 0%)"
        );
    }
}
