//! Fog of war - which units each player can observe

use std::collections::HashSet;

use uuid::Uuid;

use super::unit::Unit;

/// Ids of the units `player_id` can currently observe: all of its own living
/// units plus any other living unit within vision range of one of them.
pub fn visible_unit_ids(player_id: Uuid, units: &[Unit]) -> HashSet<Uuid> {
    let own: Vec<&Unit> = units
        .iter()
        .filter(|u| u.player_id == player_id && u.is_alive())
        .collect();

    let mut visible: HashSet<Uuid> = own.iter().map(|u| u.id).collect();

    for other in units.iter().filter(|u| u.player_id != player_id && u.is_alive()) {
        if own.iter().any(|viewer| can_see(viewer, other)) {
            visible.insert(other.id);
        }
    }

    visible
}

fn can_see(viewer: &Unit, target: &Unit) -> bool {
    viewer.grid.distance(&target.grid) <= viewer.vision_range
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::grid::{GridCell, GridGeometry};

    fn unit(player_id: Uuid, x: i32, y: i32) -> Unit {
        Unit::new(
            Uuid::new_v4(),
            player_id,
            GridCell::new(x, y),
            &GameConfig::default(),
            &GridGeometry::new(40.0, 20, 15),
        )
    }

    #[test]
    fn own_units_always_visible() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let units = vec![unit(a, 0, 0), unit(a, 19, 14), unit(b, 10, 7)];

        let visible = visible_unit_ids(a, &units);
        assert!(visible.contains(&units[0].id));
        assert!(visible.contains(&units[1].id));
        assert!(!visible.contains(&units[2].id));
    }

    #[test]
    fn enemies_in_vision_range_of_any_own_unit() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        // vision range 4
        let units = vec![
            unit(a, 0, 0),
            unit(a, 10, 10),
            unit(b, 2, 2),
            unit(b, 12, 11),
            unit(b, 5, 5),
        ];

        let visible = visible_unit_ids(a, &units);
        assert!(visible.contains(&units[2].id));
        assert!(visible.contains(&units[3].id));
        assert!(!visible.contains(&units[4].id));
    }

    #[test]
    fn dead_units_are_not_visible() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut units = vec![unit(a, 0, 0), unit(b, 1, 0), unit(a, 3, 3)];
        units[1].take_damage(1000.0);
        units[2].take_damage(1000.0);

        let visible = visible_unit_ids(a, &units);
        assert_eq!(visible.len(), 1);
        assert!(visible.contains(&units[0].id));
    }

    #[test]
    fn player_without_units_sees_nothing() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let units = vec![unit(b, 0, 0)];
        assert!(visible_unit_ids(a, &units).is_empty());
    }
}
