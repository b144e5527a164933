//! Spatial conditions over the player's position.

use std::collections::BTreeSet;

use super::{Condition, ConditionContext, LogicalCondition, LogicalOperator};
use crate::game::WorldPoint;

/// Largest distance a position check may use, in tiles.
pub const MAX_POSITION_DISTANCE: u32 = 104;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationTarget {
    /// Within `max_distance` tiles of a point on the same plane.
    Position { point: WorldPoint, max_distance: u32 },
    /// Inside an inclusive rectangle on a plane.
    Area {
        min_x: i32,
        min_y: i32,
        max_x: i32,
        max_y: i32,
        plane: i32,
    },
    /// Inside any of the listed map regions.
    Region { region_ids: BTreeSet<u32> },
}

impl LocationTarget {
    fn contains(&self, position: &WorldPoint) -> bool {
        match self {
            LocationTarget::Position {
                point,
                max_distance,
            } => position
                .distance_to(point)
                .is_some_and(|distance| distance <= *max_distance),
            LocationTarget::Area {
                min_x,
                min_y,
                max_x,
                max_y,
                plane,
            } => {
                position.plane == *plane
                    && (*min_x..=*max_x).contains(&position.x)
                    && (*min_y..=*max_y).contains(&position.y)
            }
            LocationTarget::Region { region_ids } => region_ids.contains(&position.region_id()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationCondition {
    name: String,
    target: LocationTarget,
    satisfied: bool,
}

impl LocationCondition {
    /// `max_distance` is clamped to [`MAX_POSITION_DISTANCE`].
    pub fn at_position(name: impl Into<String>, point: WorldPoint, max_distance: u32) -> Self {
        Self::with_target(
            name,
            LocationTarget::Position {
                point,
                max_distance: max_distance.min(MAX_POSITION_DISTANCE),
            },
        )
    }

    /// Corners may be given in any order.
    pub fn in_area(name: impl Into<String>, x1: i32, y1: i32, x2: i32, y2: i32, plane: i32) -> Self {
        Self::with_target(
            name,
            LocationTarget::Area {
                min_x: x1.min(x2),
                min_y: y1.min(y2),
                max_x: x1.max(x2),
                max_y: y1.max(y2),
                plane,
            },
        )
    }

    pub fn centered_area(name: impl Into<String>, center: WorldPoint, width: u32, height: u32) -> Self {
        let half_width = (width / 2) as i32;
        let half_height = (height / 2) as i32;
        Self::in_area(
            name,
            center.x - half_width,
            center.y - half_height,
            center.x + half_width,
            center.y + half_height,
            center.plane,
        )
    }

    pub fn in_regions(name: impl Into<String>, region_ids: impl IntoIterator<Item = u32>) -> Self {
        Self::with_target(
            name,
            LocationTarget::Region {
                region_ids: region_ids.into_iter().collect(),
            },
        )
    }

    pub fn with_target(name: impl Into<String>, target: LocationTarget) -> Self {
        Self {
            name: name.into(),
            target,
            satisfied: false,
        }
    }

    /// A single position condition, or an OR over one per point.
    pub fn at_any_point(name: &str, points: &[WorldPoint], max_distance: u32) -> Condition {
        if let [point] = points {
            return Condition::Location(Self::at_position(name, *point, max_distance));
        }
        let mut any = LogicalCondition::new(LogicalOperator::Or);
        for (i, point) in points.iter().enumerate() {
            any.add(Self::at_position(
                format!("{} (point {})", name, i + 1),
                *point,
                max_distance,
            ));
        }
        Condition::Logical(any)
    }

    /// Areas are `[x1, y1, x2, y2, plane]`.
    pub fn in_any_area(name: &str, areas: &[[i32; 5]]) -> Condition {
        if let [[x1, y1, x2, y2, plane]] = areas {
            return Condition::Location(Self::in_area(name, *x1, *y1, *x2, *y2, *plane));
        }
        let mut any = LogicalCondition::new(LogicalOperator::Or);
        for (i, [x1, y1, x2, y2, plane]) in areas.iter().enumerate() {
            any.add(Self::in_area(
                format!("{} (area {})", name, i + 1),
                *x1,
                *y1,
                *x2,
                *y2,
                *plane,
            ));
        }
        Condition::Logical(any)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &LocationTarget {
        &self.target
    }

    pub fn satisfied(&self) -> bool {
        self.satisfied
    }

    pub fn is_satisfied(&mut self, ctx: &ConditionContext<'_>) -> bool {
        if !self.satisfied {
            self.satisfied = ctx
                .game()
                .player_position()
                .is_some_and(|position| self.target.contains(&position));
        }
        self.satisfied
    }

    pub fn progress(&self) -> f64 {
        if self.satisfied {
            100.0
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        self.satisfied = false;
    }

    pub fn describe(&self) -> String {
        match &self.target {
            LocationTarget::Position {
                point,
                max_distance: 0,
            } => format!("Player at position: {}", point),
            LocationTarget::Position {
                point,
                max_distance,
            } => format!("Player within {} tiles of: {}", max_distance, point),
            LocationTarget::Area {
                min_x,
                min_y,
                max_x,
                max_y,
                plane,
            } => format!(
                "Player in area {}: ({}, {}) to ({}, {}) on plane {}",
                self.name, min_x, min_y, max_x, max_y, plane
            ),
            LocationTarget::Region { region_ids } => {
                let ids: Vec<String> = region_ids.iter().map(u32::to_string).collect();
                format!("Player in region {}: {}", self.name, ids.join(", "))
            }
        }
    }
}
