//! Game-facing vocabulary read by conditions and requirements.
//!
//! Conditions never query the game directly. They read a [`GameView`]
//! (usually a [`GameSnapshot`] captured on the environment thread) and
//! receive [`GameEvent`]s pushed by the environment.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::condition::NamePattern;
use crate::error::DomainError;

// ============================================================================
// Skills
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Skill {
    Attack,
    Defence,
    Strength,
    Hitpoints,
    Ranged,
    Prayer,
    Magic,
    Cooking,
    Woodcutting,
    Fletching,
    Fishing,
    Firemaking,
    Crafting,
    Smithing,
    Mining,
    Herblore,
    Agility,
    Thieving,
    Slayer,
    Farming,
    Runecraft,
    Hunter,
    Construction,
    /// Synthetic aggregate across every trackable skill.
    Overall,
}

impl Skill {
    /// Every real skill, excluding the synthetic [`Skill::Overall`].
    pub const TRACKABLE: [Skill; 23] = [
        Skill::Attack,
        Skill::Defence,
        Skill::Strength,
        Skill::Hitpoints,
        Skill::Ranged,
        Skill::Prayer,
        Skill::Magic,
        Skill::Cooking,
        Skill::Woodcutting,
        Skill::Fletching,
        Skill::Fishing,
        Skill::Firemaking,
        Skill::Crafting,
        Skill::Smithing,
        Skill::Mining,
        Skill::Herblore,
        Skill::Agility,
        Skill::Thieving,
        Skill::Slayer,
        Skill::Farming,
        Skill::Runecraft,
        Skill::Hunter,
        Skill::Construction,
    ];

    pub const MAX_LEVEL: u32 = 99;

    pub fn is_total(self) -> bool {
        matches!(self, Skill::Overall)
    }

    /// Highest level a target may ask for, in the units of this skill.
    pub fn max_level(self) -> u32 {
        if self.is_total() {
            Self::MAX_LEVEL * Self::TRACKABLE.len() as u32
        } else {
            Self::MAX_LEVEL
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Skill::Attack => "Attack",
            Skill::Defence => "Defence",
            Skill::Strength => "Strength",
            Skill::Hitpoints => "Hitpoints",
            Skill::Ranged => "Ranged",
            Skill::Prayer => "Prayer",
            Skill::Magic => "Magic",
            Skill::Cooking => "Cooking",
            Skill::Woodcutting => "Woodcutting",
            Skill::Fletching => "Fletching",
            Skill::Fishing => "Fishing",
            Skill::Firemaking => "Firemaking",
            Skill::Crafting => "Crafting",
            Skill::Smithing => "Smithing",
            Skill::Mining => "Mining",
            Skill::Herblore => "Herblore",
            Skill::Agility => "Agility",
            Skill::Thieving => "Thieving",
            Skill::Slayer => "Slayer",
            Skill::Farming => "Farming",
            Skill::Runecraft => "Runecraft",
            Skill::Hunter => "Hunter",
            Skill::Construction => "Construction",
            Skill::Overall => "Total",
        }
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Skill {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if wanted.eq_ignore_ascii_case("total") || wanted.eq_ignore_ascii_case("overall") {
            return Ok(Skill::Overall);
        }
        Skill::TRACKABLE
            .iter()
            .copied()
            .find(|skill| skill.display_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DomainError::parse(format!("Unknown skill: {}", s)))
    }
}

// ============================================================================
// Spellbooks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Spellbook {
    #[default]
    Standard,
    Ancient,
    Lunar,
    Arceuus,
}

impl fmt::Display for Spellbook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Spellbook::Standard => "Standard",
            Spellbook::Ancient => "Ancient",
            Spellbook::Lunar => "Lunar",
            Spellbook::Arceuus => "Arceuus",
        };
        f.write_str(name)
    }
}

impl FromStr for Spellbook {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "modern" => Ok(Spellbook::Standard),
            "ancient" | "ancients" => Ok(Spellbook::Ancient),
            "lunar" => Ok(Spellbook::Lunar),
            "arceuus" => Ok(Spellbook::Arceuus),
            _ => Err(DomainError::parse(format!("Unknown spellbook: {}", s))),
        }
    }
}

// ============================================================================
// World coordinates
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: i32,
    pub y: i32,
    pub plane: i32,
}

impl WorldPoint {
    pub const fn new(x: i32, y: i32, plane: i32) -> Self {
        Self { x, y, plane }
    }

    /// Chebyshev tile distance, or `None` when the planes differ.
    pub fn distance_to(&self, other: &WorldPoint) -> Option<u32> {
        if self.plane != other.plane {
            return None;
        }
        let dx = (self.x - other.x).unsigned_abs();
        let dy = (self.y - other.y).unsigned_abs();
        Some(dx.max(dy))
    }

    /// 64x64 map region containing this point.
    pub fn region_id(&self) -> u32 {
        let rx = (self.x >> 6) as u32;
        let ry = (self.y >> 6) as u32;
        (rx << 8) | ry
    }
}

impl fmt::Display for WorldPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.plane)
    }
}

// ============================================================================
// Observation
// ============================================================================

/// Read-only queries against authoritative game state.
pub trait GameView {
    /// Current level. For [`Skill::Overall`] this is the total level.
    fn skill_level(&self, skill: Skill) -> u32;

    /// Current experience. For [`Skill::Overall`] this is the total experience.
    fn skill_xp(&self, skill: Skill) -> u64;

    fn player_position(&self) -> Option<WorldPoint>;

    /// Number of inventory items whose name matches `pattern`.
    fn item_count(&self, pattern: &NamePattern) -> u32;
}

/// Sum of every trackable skill level.
pub fn total_level(view: &dyn GameView) -> u32 {
    Skill::TRACKABLE
        .iter()
        .map(|skill| view.skill_level(*skill))
        .sum()
}

/// Sum of every trackable skill's experience.
pub fn total_xp(view: &dyn GameView) -> u64 {
    Skill::TRACKABLE.iter().map(|skill| view.skill_xp(*skill)).sum()
}

/// Notifications pushed by the environment thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GameEvent {
    /// The player started interacting with an NPC.
    #[serde(rename_all = "camelCase")]
    InteractingChanged { npc_index: u32, npc_name: String },
    /// An NPC left the scene.
    #[serde(rename_all = "camelCase")]
    NpcDespawned {
        npc_index: u32,
        npc_name: String,
        is_dead: bool,
    },
    /// Items were added to the player's possession (loot, gathering).
    #[serde(rename_all = "camelCase")]
    ItemGained { item_name: String, quantity: u32 },
}

/// Point-in-time copy of the game state, captured on the environment thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    #[serde(default)]
    levels: HashMap<Skill, u32>,
    #[serde(default)]
    experience: HashMap<Skill, u64>,
    #[serde(default)]
    position: Option<WorldPoint>,
    #[serde(default)]
    inventory: HashMap<String, u32>,
    #[serde(default)]
    spellbook: Spellbook,
}

impl GameSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, skill: Skill, level: u32) -> Self {
        self.set_level(skill, level);
        self
    }

    pub fn with_xp(mut self, skill: Skill, xp: u64) -> Self {
        self.set_xp(skill, xp);
        self
    }

    pub fn with_position(mut self, position: WorldPoint) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_item(mut self, name: impl Into<String>, count: u32) -> Self {
        self.inventory.insert(name.into(), count);
        self
    }

    pub fn with_spellbook(mut self, spellbook: Spellbook) -> Self {
        self.spellbook = spellbook;
        self
    }

    pub fn set_level(&mut self, skill: Skill, level: u32) {
        if !skill.is_total() {
            self.levels.insert(skill, level);
        }
    }

    pub fn set_xp(&mut self, skill: Skill, xp: u64) {
        if !skill.is_total() {
            self.experience.insert(skill, xp);
        }
    }

    pub fn set_position(&mut self, position: Option<WorldPoint>) {
        self.position = position;
    }

    pub fn add_item(&mut self, name: impl Into<String>, count: u32) {
        *self.inventory.entry(name.into()).or_insert(0) += count;
    }

    pub fn set_spellbook(&mut self, spellbook: Spellbook) {
        self.spellbook = spellbook;
    }

    pub fn spellbook(&self) -> Spellbook {
        self.spellbook
    }
}

impl GameView for GameSnapshot {
    fn skill_level(&self, skill: Skill) -> u32 {
        if skill.is_total() {
            return total_level(self);
        }
        self.levels.get(&skill).copied().unwrap_or(1)
    }

    fn skill_xp(&self, skill: Skill) -> u64 {
        if skill.is_total() {
            return total_xp(self);
        }
        self.experience.get(&skill).copied().unwrap_or(0)
    }

    fn player_position(&self) -> Option<WorldPoint> {
        self.position
    }

    fn item_count(&self, pattern: &NamePattern) -> u32 {
        self.inventory
            .iter()
            .filter(|(name, _)| pattern.is_match(name))
            .map(|(_, count)| *count)
            .sum()
    }
}
