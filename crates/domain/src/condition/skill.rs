//! Skill level and experience conditions.
//!
//! The two conditions compare differently on purpose. A level target is an
//! absolute state ("reach 70 Attack"), while an experience target is a
//! session goal measured from the snapshot taken at construction or reset
//! ("gain 10k Attack XP").

use super::{zip_targets, Condition, ConditionContext, LogicalCondition, LogicalOperator};
use crate::game::Skill;

fn observed_level(skill: Skill, ctx: &ConditionContext<'_>) -> u32 {
    ctx.game().skill_level(skill)
}

fn observed_xp(skill: Skill, ctx: &ConditionContext<'_>) -> u64 {
    ctx.game().skill_xp(skill)
}

// ============================================================================
// Level
// ============================================================================

/// Satisfied when the absolute level reaches the current target.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillLevelCondition {
    skill: Skill,
    target_min: u32,
    target_max: u32,
    current_target: u32,
    start_level: u32,
    satisfied: bool,
}

impl SkillLevelCondition {
    /// Targets are clamped to `[1, skill.max_level()]` and `max >= min`.
    pub fn new(skill: Skill, target_min: i64, target_max: i64, ctx: &ConditionContext<'_>) -> Self {
        let ceiling = i64::from(skill.max_level());
        let min = target_min.clamp(1, ceiling);
        let max = target_max.clamp(min, ceiling);

        Self {
            skill,
            target_min: min as u32,
            target_max: max as u32,
            current_target: ctx.roll(min, max) as u32,
            start_level: observed_level(skill, ctx),
            satisfied: false,
        }
    }

    pub fn fixed(skill: Skill, level: i64, ctx: &ConditionContext<'_>) -> Self {
        Self::new(skill, level, level, ctx)
    }

    pub fn all_of(skills: &[Skill], mins: &[i64], maxs: &[i64], ctx: &ConditionContext<'_>) -> Condition {
        combine(LogicalOperator::And, skills, mins, maxs, |skill, min, max| {
            Condition::SkillLevel(Self::new(skill, min, max, ctx))
        })
    }

    pub fn any_of(skills: &[Skill], mins: &[i64], maxs: &[i64], ctx: &ConditionContext<'_>) -> Condition {
        combine(LogicalOperator::Or, skills, mins, maxs, |skill, min, max| {
            Condition::SkillLevel(Self::new(skill, min, max, ctx))
        })
    }

    pub fn skill(&self) -> Skill {
        self.skill
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

    pub fn start_level(&self) -> u32 {
        self.start_level
    }

    pub fn satisfied(&self) -> bool {
        self.satisfied
    }

    pub fn is_satisfied(&mut self, ctx: &ConditionContext<'_>) -> bool {
        if !self.satisfied && observed_level(self.skill, ctx) >= self.current_target {
            self.satisfied = true;
        }
        self.satisfied
    }

    pub fn progress(&self, ctx: &ConditionContext<'_>) -> f64 {
        if self.satisfied {
            return 100.0;
        }
        let needed = i64::from(self.current_target) - i64::from(self.start_level);
        if needed <= 0 {
            return 100.0;
        }
        let gained = i64::from(observed_level(self.skill, ctx)) - i64::from(self.start_level);
        (gained as f64 * 100.0 / needed as f64).clamp(0.0, 100.0)
    }

    pub fn reset(&mut self, randomize: bool, ctx: &ConditionContext<'_>) {
        if randomize && self.target_min != self.target_max {
            self.current_target =
                ctx.roll(i64::from(self.target_min), i64::from(self.target_max)) as u32;
        }
        self.start_level = observed_level(self.skill, ctx);
        self.satisfied = false;
    }

    pub fn describe(&self) -> String {
        let mut description = format!("{} level {} or higher", self.skill, self.current_target);
        if self.target_min != self.target_max {
            description.push_str(&format!(
                " (randomized from {}-{})",
                self.target_min, self.target_max
            ));
        }
        description
    }
}

// ============================================================================
// Experience
// ============================================================================

/// Satisfied when the experience gained since the snapshot reaches the
/// current target.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillXpCondition {
    skill: Skill,
    target_min: u64,
    target_max: u64,
    current_target: u64,
    start_xp: u64,
    satisfied: bool,
}

impl SkillXpCondition {
    /// Targets are clamped to `min >= 0` and `max >= min`.
    pub fn new(skill: Skill, target_min: i64, target_max: i64, ctx: &ConditionContext<'_>) -> Self {
        let min = target_min.max(0);
        let max = target_max.max(min);

        Self {
            skill,
            target_min: min as u64,
            target_max: max as u64,
            current_target: ctx.roll(min, max) as u64,
            start_xp: observed_xp(skill, ctx),
            satisfied: false,
        }
    }

    pub fn fixed(skill: Skill, xp: i64, ctx: &ConditionContext<'_>) -> Self {
        Self::new(skill, xp, xp, ctx)
    }

    pub fn all_of(skills: &[Skill], mins: &[i64], maxs: &[i64], ctx: &ConditionContext<'_>) -> Condition {
        combine(LogicalOperator::And, skills, mins, maxs, |skill, min, max| {
            Condition::SkillXp(Self::new(skill, min, max, ctx))
        })
    }

    pub fn any_of(skills: &[Skill], mins: &[i64], maxs: &[i64], ctx: &ConditionContext<'_>) -> Condition {
        combine(LogicalOperator::Or, skills, mins, maxs, |skill, min, max| {
            Condition::SkillXp(Self::new(skill, min, max, ctx))
        })
    }

    pub fn skill(&self) -> Skill {
        self.skill
    }

    pub fn target_min(&self) -> u64 {
        self.target_min
    }

    pub fn target_max(&self) -> u64 {
        self.target_max
    }

    pub fn current_target(&self) -> u64 {
        self.current_target
    }

    pub fn start_xp(&self) -> u64 {
        self.start_xp
    }

    pub fn satisfied(&self) -> bool {
        self.satisfied
    }

    pub fn xp_gained(&self, ctx: &ConditionContext<'_>) -> u64 {
        observed_xp(self.skill, ctx).saturating_sub(self.start_xp)
    }

    pub fn is_satisfied(&mut self, ctx: &ConditionContext<'_>) -> bool {
        if !self.satisfied && self.xp_gained(ctx) >= self.current_target {
            self.satisfied = true;
        }
        self.satisfied
    }

    pub fn progress(&self, ctx: &ConditionContext<'_>) -> f64 {
        if self.satisfied || self.current_target == 0 {
            return 100.0;
        }
        (self.xp_gained(ctx) as f64 * 100.0 / self.current_target as f64).clamp(0.0, 100.0)
    }

    pub fn reset(&mut self, randomize: bool, ctx: &ConditionContext<'_>) {
        if randomize && self.target_min != self.target_max {
            self.current_target = ctx.roll(self.target_min as i64, self.target_max as i64) as u64;
        }
        self.start_xp = observed_xp(self.skill, ctx);
        self.satisfied = false;
    }

    pub fn describe(&self) -> String {
        let mut description = format!("Gain {} {} XP", self.current_target, self.skill);
        if self.target_min != self.target_max {
            description.push_str(&format!(
                " (randomized from {}-{})",
                self.target_min, self.target_max
            ));
        }
        description
    }
}

fn combine(
    operator: LogicalOperator,
    skills: &[Skill],
    mins: &[i64],
    maxs: &[i64],
    build: impl Fn(Skill, i64, i64) -> Condition,
) -> Condition {
    let mut logical = LogicalCondition::new(operator);
    for (skill, (min, max)) in skills.iter().zip(zip_targets(skills.len(), mins, maxs)) {
        logical.add(build(*skill, min, max));
    }
    Condition::Logical(logical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::test_support::{ctx, ctx_max, fixed_time};
    use crate::game::GameSnapshot;

    mod level {
        use super::*;

        #[test]
        fn compares_absolute_level() {
            let mut game = GameSnapshot::new().with_level(Skill::Attack, 60);
            let mut condition = SkillLevelCondition::fixed(Skill::Attack, 70, &ctx(fixed_time(), &game));
            assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));

            game.set_level(Skill::Attack, 70);
            assert!(condition.is_satisfied(&ctx(fixed_time(), &game)));
        }

        #[test]
        fn already_at_target_is_satisfied_immediately() {
            let game = GameSnapshot::new().with_level(Skill::Attack, 80);
            let mut condition = SkillLevelCondition::fixed(Skill::Attack, 70, &ctx(fixed_time(), &game));
            assert!(condition.is_satisfied(&ctx(fixed_time(), &game)));
        }

        #[test]
        fn targets_are_clamped_to_skill_range() {
            let game = GameSnapshot::new();
            let condition = SkillLevelCondition::new(Skill::Attack, 0, 150, &ctx_max(fixed_time(), &game));
            assert_eq!(condition.target_min(), 1);
            assert_eq!(condition.target_max(), 99);
            assert_eq!(condition.current_target(), 99);

            let total = SkillLevelCondition::fixed(Skill::Overall, 5000, &ctx(fixed_time(), &game));
            assert_eq!(total.current_target(), 99 * 23);
        }

        #[test]
        fn total_mode_sums_trackable_skills() {
            let mut game = GameSnapshot::new();
            let mut condition = SkillLevelCondition::fixed(Skill::Overall, 30, &ctx(fixed_time(), &game));
            assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));

            game.set_level(Skill::Mining, 8);
            assert!(condition.is_satisfied(&ctx(fixed_time(), &game)));
        }

        #[test]
        fn progress_measures_levels_gained_since_snapshot() {
            let mut game = GameSnapshot::new().with_level(Skill::Attack, 60);
            let condition = SkillLevelCondition::fixed(Skill::Attack, 70, &ctx(fixed_time(), &game));
            game.set_level(Skill::Attack, 65);
            assert_eq!(condition.progress(&ctx(fixed_time(), &game)), 50.0);
        }

        #[test]
        fn stays_satisfied_until_reset() {
            let mut game = GameSnapshot::new().with_level(Skill::Attack, 70);
            let mut condition = SkillLevelCondition::fixed(Skill::Attack, 70, &ctx(fixed_time(), &game));
            assert!(condition.is_satisfied(&ctx(fixed_time(), &game)));

            // A temporary drain does not unlatch the condition.
            game.set_level(Skill::Attack, 60);
            assert!(condition.is_satisfied(&ctx(fixed_time(), &game)));

            condition.reset(false, &ctx(fixed_time(), &game));
            assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));
        }
    }

    mod experience {
        use super::*;

        #[test]
        fn compares_gain_since_snapshot() {
            let mut game = GameSnapshot::new().with_xp(Skill::Fishing, 100_000);
            let mut condition = SkillXpCondition::fixed(Skill::Fishing, 5_000, &ctx(fixed_time(), &game));
            assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));

            game.set_xp(Skill::Fishing, 104_999);
            assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));

            game.set_xp(Skill::Fishing, 105_000);
            assert!(condition.is_satisfied(&ctx(fixed_time(), &game)));
        }

        #[test]
        fn progress_is_clamped_and_full_when_satisfied() {
            let mut game = GameSnapshot::new().with_xp(Skill::Fishing, 1_000);
            let mut condition = SkillXpCondition::fixed(Skill::Fishing, 400, &ctx(fixed_time(), &game));

            game.set_xp(Skill::Fishing, 1_100);
            assert_eq!(condition.progress(&ctx(fixed_time(), &game)), 25.0);

            game.set_xp(Skill::Fishing, 9_000);
            assert_eq!(condition.progress(&ctx(fixed_time(), &game)), 100.0);
            assert!(condition.is_satisfied(&ctx(fixed_time(), &game)));
            assert_eq!(condition.progress(&ctx(fixed_time(), &game)), 100.0);

            // Experience never goes down, but a stale snapshot must not go negative.
            game.set_xp(Skill::Fishing, 0);
            let fresh = SkillXpCondition::fixed(Skill::Fishing, 400, &ctx(fixed_time(), &GameSnapshot::new().with_xp(Skill::Fishing, 500)));
            assert_eq!(fresh.progress(&ctx(fixed_time(), &game)), 0.0);
        }

        #[test]
        fn reset_takes_a_new_snapshot() {
            let mut game = GameSnapshot::new().with_xp(Skill::Fishing, 1_000);
            let mut condition = SkillXpCondition::new(Skill::Fishing, 100, 300, &ctx(fixed_time(), &game));
            game.set_xp(Skill::Fishing, 1_200);
            assert!(condition.is_satisfied(&ctx(fixed_time(), &game)));

            condition.reset(true, &ctx_max(fixed_time(), &game));
            assert_eq!(condition.start_xp(), 1_200);
            assert_eq!(condition.current_target(), 300);
            assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));
        }

        #[test]
        fn negative_target_clamps_to_zero() {
            let game = GameSnapshot::new();
            let mut condition = SkillXpCondition::fixed(Skill::Fishing, -50, &ctx(fixed_time(), &game));
            assert_eq!(condition.current_target(), 0);
            assert!(condition.is_satisfied(&ctx(fixed_time(), &game)));
        }
    }

    #[test]
    fn describe_mentions_randomized_range() {
        let game = GameSnapshot::new();
        let level = SkillLevelCondition::new(Skill::Mining, 40, 45, &ctx(fixed_time(), &game));
        assert_eq!(level.describe(), "Mining level 40 or higher (randomized from 40-45)");

        let xp = SkillXpCondition::fixed(Skill::Overall, 1_000, &ctx(fixed_time(), &game));
        assert_eq!(xp.describe(), "Gain 1000 Total XP");
    }
}
