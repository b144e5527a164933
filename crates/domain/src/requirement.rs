//! Requirements a task needs around its active window
//!
//! A [`Requirement`] is an OR-group of interchangeable [`RequirementOption`]s
//! of one kind, tagged with the phase it belongs to and how important it is.
//! [`PrePostScheduleRequirements`] is the per-task registry the orchestrator
//! reads while fulfilling a phase.

use std::cmp::Reverse;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::NamePattern;
use crate::error::DomainError;
use crate::game::{GameSnapshot, GameView, Spellbook, WorldPoint};
use crate::ids::RequirementId;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 10;

// ============================================================================
// Tags
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskContext {
    PreSchedule,
    PostSchedule,
    Both,
}

impl TaskContext {
    /// Whether a requirement tagged `self` belongs to `phase`.
    pub fn includes(self, phase: TaskContext) -> bool {
        self == TaskContext::Both || self == phase
    }
}

impl fmt::Display for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskContext::PreSchedule => "PRE_SCHEDULE",
            TaskContext::PostSchedule => "POST_SCHEDULE",
            TaskContext::Both => "BOTH",
        };
        f.write_str(name)
    }
}

/// Sorted with mandatory requirements first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequirementPriority {
    Mandatory,
    Recommended,
}

/// Declared in fulfillment order: gear before spellbook, travel last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequirementKind {
    Item,
    Spellbook,
    Location,
}

impl RequirementKind {
    pub const FULFILLMENT_ORDER: [RequirementKind; 3] = [
        RequirementKind::Item,
        RequirementKind::Spellbook,
        RequirementKind::Location,
    ];
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequirementKind::Item => "items",
            RequirementKind::Spellbook => "spellbook",
            RequirementKind::Location => "location",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Options
// ============================================================================

/// One concrete way of meeting a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequirementOption {
    Item {
        name: String,
        quantity: u32,
        equipped: bool,
    },
    Location {
        name: String,
        point: WorldPoint,
        radius: u32,
    },
    Spellbook {
        spellbook: Spellbook,
    },
}

impl RequirementOption {
    pub fn item(name: impl Into<String>, quantity: u32) -> Self {
        RequirementOption::Item {
            name: name.into(),
            quantity: quantity.max(1),
            equipped: false,
        }
    }

    pub fn equipped(name: impl Into<String>) -> Self {
        RequirementOption::Item {
            name: name.into(),
            quantity: 1,
            equipped: true,
        }
    }

    pub fn location(name: impl Into<String>, point: WorldPoint, radius: u32) -> Self {
        RequirementOption::Location {
            name: name.into(),
            point,
            radius,
        }
    }

    pub fn spellbook(spellbook: Spellbook) -> Self {
        RequirementOption::Spellbook { spellbook }
    }

    pub fn kind(&self) -> RequirementKind {
        match self {
            RequirementOption::Item { .. } => RequirementKind::Item,
            RequirementOption::Location { .. } => RequirementKind::Location,
            RequirementOption::Spellbook { .. } => RequirementKind::Spellbook,
        }
    }

    /// Whether a snapshot already meets this option. Equipment is modelled
    /// as carried items.
    pub fn is_met_in(&self, snapshot: &GameSnapshot) -> bool {
        match self {
            RequirementOption::Item { name, quantity, .. } => {
                snapshot.item_count(&NamePattern::new(name)) >= *quantity
            }
            RequirementOption::Location { point, radius, .. } => snapshot
                .player_position()
                .and_then(|position| position.distance_to(point))
                .is_some_and(|distance| distance <= *radius),
            RequirementOption::Spellbook { spellbook } => snapshot.spellbook() == *spellbook,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RequirementOption::Item {
                name,
                quantity,
                equipped: true,
            } if *quantity <= 1 => format!("{} (equipped)", name),
            RequirementOption::Item {
                name,
                quantity,
                equipped,
            } => format!(
                "{}x {}{}",
                quantity,
                name,
                if *equipped { " (equipped)" } else { "" }
            ),
            RequirementOption::Location {
                name,
                point,
                radius,
            } => format!("{} within {} tiles of ({})", name, radius, point),
            RequirementOption::Spellbook { spellbook } => format!("{} spellbook", spellbook),
        }
    }
}

// ============================================================================
// Requirement
// ============================================================================

/// Something that must (or should) hold before or after a run.
///
/// # Invariants
///
/// - `options` is non-empty and every option has the same kind
/// - `rating` is within `[MIN_RATING, MAX_RATING]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    id: RequirementId,
    description: String,
    context: TaskContext,
    priority: RequirementPriority,
    rating: u8,
    kind: RequirementKind,
    options: Vec<RequirementOption>,
}

impl Requirement {
    pub fn new(
        description: impl Into<String>,
        context: TaskContext,
        priority: RequirementPriority,
        rating: u8,
        options: Vec<RequirementOption>,
    ) -> Result<Self, DomainError> {
        let Some(first) = options.first() else {
            return Err(DomainError::validation("A requirement needs at least one option"));
        };
        let kind = first.kind();
        if options.iter().any(|option| option.kind() != kind) {
            return Err(DomainError::validation(format!(
                "Requirement options must all be {}",
                kind
            )));
        }
        Ok(Self {
            id: RequirementId::new(),
            description: description.into(),
            context,
            priority,
            rating: rating.clamp(MIN_RATING, MAX_RATING),
            kind,
            options,
        })
    }

    pub fn item(
        name: impl Into<String>,
        quantity: u32,
        context: TaskContext,
        priority: RequirementPriority,
        rating: u8,
    ) -> Self {
        let name = name.into();
        Self::single(
            format!("{}x {}", quantity.max(1), name),
            context,
            priority,
            rating,
            RequirementOption::item(name, quantity),
        )
    }

    pub fn location(
        name: impl Into<String>,
        point: WorldPoint,
        radius: u32,
        context: TaskContext,
        priority: RequirementPriority,
        rating: u8,
    ) -> Self {
        let name = name.into();
        Self::single(
            format!("Travel to {}", name),
            context,
            priority,
            rating,
            RequirementOption::location(name, point, radius),
        )
    }

    pub fn spellbook(
        spellbook: Spellbook,
        context: TaskContext,
        priority: RequirementPriority,
        rating: u8,
    ) -> Self {
        Self::single(
            format!("Switch to {} spellbook", spellbook),
            context,
            priority,
            rating,
            RequirementOption::spellbook(spellbook),
        )
    }

    fn single(
        description: String,
        context: TaskContext,
        priority: RequirementPriority,
        rating: u8,
        option: RequirementOption,
    ) -> Self {
        Self {
            id: RequirementId::new(),
            description,
            context,
            priority,
            rating: rating.clamp(MIN_RATING, MAX_RATING),
            kind: option.kind(),
            options: vec![option],
        }
    }

    /// Adds an interchangeable option of the same kind.
    pub fn or_option(mut self, option: RequirementOption) -> Result<Self, DomainError> {
        if option.kind() != self.kind {
            return Err(DomainError::validation(format!(
                "Requirement options must all be {}",
                self.kind
            )));
        }
        if !self.options.contains(&option) {
            self.options.push(option);
        }
        Ok(self)
    }

    pub fn id(&self) -> RequirementId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn context(&self) -> TaskContext {
        self.context
    }

    pub fn priority(&self) -> RequirementPriority {
        self.priority
    }

    pub fn is_mandatory(&self) -> bool {
        self.priority == RequirementPriority::Mandatory
    }

    pub fn rating(&self) -> u8 {
        self.rating
    }

    pub fn kind(&self) -> RequirementKind {
        self.kind
    }

    pub fn options(&self) -> &[RequirementOption] {
        &self.options
    }

    /// Identity used for de-duplication: two requirements with the same
    /// phase, kind, and options are the same requirement.
    pub fn unique_identifier(&self) -> String {
        let options: Vec<String> = self.options.iter().map(RequirementOption::describe).collect();
        format!("{}:{}:{}", self.context, self.kind, options.join("|"))
    }

    pub fn is_met_in(&self, snapshot: &GameSnapshot) -> bool {
        self.options.iter().any(|option| option.is_met_in(snapshot))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Requirements of one kind, in the order they should be attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentStep {
    pub kind: RequirementKind,
    pub requirements: Vec<Requirement>,
}

/// Per-task collection of pre and post schedule requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrePostScheduleRequirements {
    requirements: Vec<Requirement>,
    original_spellbook: Option<Spellbook>,
}

impl PrePostScheduleRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, requirement: Requirement) -> Self {
        self.register(requirement);
        self
    }

    /// Adds a requirement unless an identical one is already registered.
    pub fn register(&mut self, requirement: Requirement) -> bool {
        let key = requirement.unique_identifier();
        if self
            .requirements
            .iter()
            .any(|existing| existing.unique_identifier() == key)
        {
            return false;
        }
        self.requirements.push(requirement);
        true
    }

    /// Registers everything from `other`. Returns how many were new.
    pub fn merge(&mut self, other: &PrePostScheduleRequirements) -> usize {
        other
            .requirements
            .iter()
            .filter(|requirement| self.register((*requirement).clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.requirements.iter()
    }

    pub fn for_context(&self, phase: TaskContext) -> Vec<&Requirement> {
        self.requirements
            .iter()
            .filter(|requirement| requirement.context().includes(phase))
            .collect()
    }

    /// Steps by kind in fulfillment order; within a step mandatory first,
    /// then by descending rating. Empty steps are left out.
    pub fn fulfillment_plan(&self, phase: TaskContext) -> Vec<FulfillmentStep> {
        RequirementKind::FULFILLMENT_ORDER
            .iter()
            .filter_map(|kind| {
                let mut requirements: Vec<Requirement> = self
                    .for_context(phase)
                    .into_iter()
                    .filter(|requirement| requirement.kind() == *kind)
                    .cloned()
                    .collect();
                if requirements.is_empty() {
                    return None;
                }
                requirements.sort_by_key(|requirement| {
                    (requirement.priority(), Reverse(requirement.rating()))
                });
                Some(FulfillmentStep {
                    kind: *kind,
                    requirements,
                })
            })
            .collect()
    }

    /// Records the spellbook in use before the first switch of a run.
    /// Later calls keep the first value.
    pub fn remember_original_spellbook(&mut self, spellbook: Spellbook) {
        if self.original_spellbook.is_none() {
            self.original_spellbook = Some(spellbook);
        }
    }

    pub fn original_spellbook(&self) -> Option<Spellbook> {
        self.original_spellbook
    }

    pub fn take_original_spellbook(&mut self) -> Option<Spellbook> {
        self.original_spellbook.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANK: WorldPoint = WorldPoint::new(3185, 3436, 0);

    mod requirement {
        use super::*;

        #[test]
        fn rejects_empty_and_mixed_option_groups() {
            let empty = Requirement::new(
                "nothing",
                TaskContext::PreSchedule,
                RequirementPriority::Mandatory,
                5,
                vec![],
            );
            assert!(matches!(empty, Err(DomainError::Validation(_))));

            let mixed = Requirement::new(
                "mixed",
                TaskContext::PreSchedule,
                RequirementPriority::Mandatory,
                5,
                vec![
                    RequirementOption::item("Rune pickaxe", 1),
                    RequirementOption::spellbook(Spellbook::Lunar),
                ],
            );
            assert!(mixed.is_err());
        }

        #[test]
        fn rating_is_clamped() {
            let high = Requirement::item("Lobster", 10, TaskContext::PreSchedule, RequirementPriority::Recommended, 42);
            let low = Requirement::item("Lobster", 10, TaskContext::PreSchedule, RequirementPriority::Recommended, 0);
            assert_eq!(high.rating(), MAX_RATING);
            assert_eq!(low.rating(), MIN_RATING);
        }

        #[test]
        fn any_option_satisfies_the_group() {
            let pickaxe = Requirement::item("Rune pickaxe", 1, TaskContext::PreSchedule, RequirementPriority::Mandatory, 8)
                .or_option(RequirementOption::item("Dragon pickaxe", 1))
                .unwrap();
            let snapshot = GameSnapshot::new().with_item("Dragon pickaxe", 1);
            assert!(pickaxe.is_met_in(&snapshot));
            assert!(!pickaxe.is_met_in(&GameSnapshot::new()));
            assert!(pickaxe.or_option(RequirementOption::spellbook(Spellbook::Lunar)).is_err());
        }

        #[test]
        fn location_and_spellbook_options_check_snapshot() {
            let near = GameSnapshot::new()
                .with_position(WorldPoint::new(3188, 3436, 0))
                .with_spellbook(Spellbook::Lunar);
            assert!(RequirementOption::location("Bank", BANK, 5).is_met_in(&near));
            assert!(!RequirementOption::location("Bank", BANK, 2).is_met_in(&near));
            assert!(RequirementOption::spellbook(Spellbook::Lunar).is_met_in(&near));
        }

        #[test]
        fn context_both_applies_to_each_phase() {
            assert!(TaskContext::Both.includes(TaskContext::PreSchedule));
            assert!(TaskContext::Both.includes(TaskContext::PostSchedule));
            assert!(!TaskContext::PreSchedule.includes(TaskContext::PostSchedule));
        }
    }

    mod registry {
        use super::*;

        fn sample() -> PrePostScheduleRequirements {
            PrePostScheduleRequirements::new()
                .with(Requirement::location("Bank", BANK, 3, TaskContext::PostSchedule, RequirementPriority::Mandatory, 5))
                .with(Requirement::item("Lobster", 10, TaskContext::PreSchedule, RequirementPriority::Recommended, 9))
                .with(Requirement::item("Rune pickaxe", 1, TaskContext::Both, RequirementPriority::Mandatory, 3))
                .with(Requirement::item("Stamina potion", 2, TaskContext::PreSchedule, RequirementPriority::Recommended, 10))
                .with(Requirement::spellbook(Spellbook::Lunar, TaskContext::PreSchedule, RequirementPriority::Mandatory, 7))
        }

        #[test]
        fn register_skips_duplicates() {
            let mut registry = sample();
            let added = registry.register(Requirement::item(
                "Lobster",
                10,
                TaskContext::PreSchedule,
                RequirementPriority::Recommended,
                9,
            ));
            assert!(!added);
            assert_eq!(registry.len(), 5);
        }

        #[test]
        fn plan_orders_steps_by_kind_then_priority_and_rating() {
            let plan = sample().fulfillment_plan(TaskContext::PreSchedule);
            let kinds: Vec<RequirementKind> = plan.iter().map(|step| step.kind).collect();
            assert_eq!(kinds, vec![RequirementKind::Item, RequirementKind::Spellbook]);

            let items: Vec<&str> = plan[0]
                .requirements
                .iter()
                .map(Requirement::description)
                .collect();
            assert_eq!(items, vec!["1x Rune pickaxe", "2x Stamina potion", "10x Lobster"]);
        }

        #[test]
        fn post_plan_travels_last() {
            let plan = sample().fulfillment_plan(TaskContext::PostSchedule);
            let kinds: Vec<RequirementKind> = plan.iter().map(|step| step.kind).collect();
            assert_eq!(kinds, vec![RequirementKind::Item, RequirementKind::Location]);
        }

        #[test]
        fn merge_counts_new_requirements() {
            let mut registry = sample();
            let other = PrePostScheduleRequirements::new()
                .with(Requirement::item("Lobster", 10, TaskContext::PreSchedule, RequirementPriority::Recommended, 9))
                .with(Requirement::item("Coins", 1000, TaskContext::PreSchedule, RequirementPriority::Recommended, 2));
            assert_eq!(registry.merge(&other), 1);
            assert_eq!(registry.len(), 6);
        }

        #[test]
        fn original_spellbook_keeps_first_value() {
            let mut registry = PrePostScheduleRequirements::new();
            registry.remember_original_spellbook(Spellbook::Standard);
            registry.remember_original_spellbook(Spellbook::Lunar);
            assert_eq!(registry.take_original_spellbook(), Some(Spellbook::Standard));
            assert_eq!(registry.original_spellbook(), None);
        }
    }
}
