//! Combat system - damage, attack range and sector-watch geometry

use std::f32::consts::{PI, TAU};

use uuid::Uuid;

use super::grid::GridCell;

/// Slack on the cone edge so a target exactly on the boundary counts as inside
const ANGLE_EPSILON: f32 = 1e-4;

/// Combat system for damage and engagement checks
pub struct CombatSystem;

impl CombatSystem {
    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage).max(0.0);
        (new_health, new_health <= 0.0)
    }

    /// Damage taken for one tick spent in a cell shared with another unit
    pub fn collision_damage(max_health: f32, percent: u32) -> f32 {
        max_health * percent as f32 / 100.0
    }

    /// Bearing from one cell to another in radians, y grows downward
    pub fn bearing(from: GridCell, to: GridCell) -> f32 {
        ((to.y - from.y) as f32).atan2((to.x - from.x) as f32)
    }

    /// Absolute difference between two angles, normalized to [0, π]
    pub fn angle_between(a: f32, b: f32) -> f32 {
        let diff = (a - b).rem_euclid(TAU);
        if diff > PI {
            TAU - diff
        } else {
            diff
        }
    }

    /// Whether `target` sits inside a watch cone anchored at `origin`
    pub fn in_sector(
        origin: GridCell,
        target: GridCell,
        direction: f32,
        cone_angle: f32,
        range: i32,
    ) -> bool {
        if origin.distance(&target) > range {
            return false;
        }
        if origin == target {
            return true;
        }
        let off_axis = Self::angle_between(Self::bearing(origin, target), direction);
        off_axis <= cone_angle / 2.0 + ANGLE_EPSILON
    }

    /// Whether an attacker standing on `from` reaches `to`
    pub fn in_attack_range(from: GridCell, to: GridCell, range: i32) -> bool {
        from.distance(&to) <= range
    }
}

/// Damage dealt by one unit to another during a tick
#[derive(Debug, Clone, PartialEq)]
pub struct HitResult {
    pub shooter_id: Uuid,
    pub target_id: Uuid,
    pub damage: f32,
}
