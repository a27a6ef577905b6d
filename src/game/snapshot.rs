//! Per-player snapshot building

use std::collections::HashSet;

use uuid::Uuid;

use crate::ws::protocol::{
    CollisionEvent, ExecutionClock, GameStateView, PlayerInfo, ServerMsg, ShootingEffect, UnitView,
};

use super::grid::GridCell;
use super::r#match::{MatchPhase, MatchState};
use super::unit::Unit;
use super::visibility::visible_unit_ids;

/// Presentation events produced by one execution tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameEvents {
    pub collisions: Vec<CollisionEvent>,
    pub shooting_effects: Vec<ShootingEffect>,
}

/// Builds visibility-filtered snapshots for network transmission
pub struct SnapshotBuilder {
    /// Obstacles never change after match creation, so the list is built once
    obstacles: Vec<GridCell>,
}

impl SnapshotBuilder {
    pub fn new(state: &MatchState) -> Self {
        Self {
            obstacles: state.obstacles.iter().copied().collect(),
        }
    }

    /// Build the snapshot `viewer` is allowed to see.
    ///
    /// Units outside the viewer's sight are omitted, and while planning the
    /// timelines of every unit the viewer does not own are emptied.
    pub fn build(&self, state: &MatchState, viewer: Uuid, events: &FrameEvents) -> ServerMsg {
        let visible = visible_unit_ids(viewer, &state.units);
        let hide_plans = state.phase == MatchPhase::Planning;

        let units = state
            .units
            .iter()
            .filter(|u| visible.contains(&u.id))
            .map(|u| unit_view(u, hide_plans && u.player_id != viewer))
            .collect();

        let players = state
            .players
            .iter()
            .map(|p| PlayerInfo {
                player_id: p.player_id,
                name: p.name.clone(),
                color: p.color.clone(),
                ready: p.ready,
                planning_ready: p.planning_ready,
            })
            .collect();

        let execution = (state.phase == MatchPhase::Executing).then(|| ExecutionClock {
            elapsed: state.execution_elapsed,
            total: state.config.timeline_secs,
        });

        ServerMsg::GameState(GameStateView {
            phase: state.phase,
            planning_time_left: state.planning_time_left,
            units,
            players,
            obstacles: self.obstacles.clone(),
            execution,
            collisions: visible_collisions(&events.collisions, &visible),
            shooting_effects: visible_effects(&events.shooting_effects, &visible),
            winner: state.winner,
        })
    }
}

fn unit_view(unit: &Unit, redact: bool) -> UnitView {
    UnitView {
        id: unit.id,
        player_id: unit.player_id,
        x: unit.x,
        y: unit.y,
        grid_x: unit.grid.x,
        grid_y: unit.grid.y,
        health: unit.health,
        max_health: unit.max_health,
        damage: unit.damage,
        attack_range: unit.attack_range,
        sector_range: unit.sector_range,
        vision_range: unit.vision_range,
        selected: unit.selected,
        commands: if redact {
            Vec::new()
        } else {
            unit.timeline.commands().to_vec()
        },
        current_command: if redact { None } else { unit.active_index() },
        is_moving: unit.is_moving(),
        is_watching: unit.watch().is_some(),
    }
}

fn visible_collisions(events: &[CollisionEvent], visible: &HashSet<Uuid>) -> Vec<CollisionEvent> {
    events
        .iter()
        .filter(|e| visible.contains(&e.unit_id))
        .cloned()
        .collect()
}

/// Shots fired or taken by a visible unit
fn visible_effects(effects: &[ShootingEffect], visible: &HashSet<Uuid>) -> Vec<ShootingEffect> {
    effects
        .iter()
        .filter(|e| visible.contains(&e.shooter_id) || visible.contains(&e.target_id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::grid::GridGeometry;
    use crate::ws::protocol::CommandRequest;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn planning_match() -> (MatchState, Uuid, Uuid) {
        let config = GameConfig {
            obstacle_density: 0.0,
            ..GameConfig::default()
        };
        let mut state = MatchState::new(Uuid::new_v4(), 11, Arc::new(config));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(state.add_player(a, mpsc::channel(4).0, "alice"));
        assert!(state.add_player(b, mpsc::channel(4).0, "bob"));
        (state, a, b)
    }

    fn place(state: &mut MatchState, unit_id: Uuid, cell: GridCell) {
        let geometry: GridGeometry = state.geometry;
        let pos = geometry.grid_to_world(cell);
        let unit = state.unit_mut(unit_id).unwrap();
        unit.x = pos.x;
        unit.y = pos.y;
        unit.grid = cell;
    }

    fn view(msg: ServerMsg) -> GameStateView {
        match msg {
            ServerMsg::GameState(view) => view,
            other => panic!("expected game state, got {other:?}"),
        }
    }

    /// Alice's first unit stands next to Bob's first unit, both with a plan
    fn neighbours_with_plans() -> (MatchState, Uuid, Uuid, Uuid, Uuid) {
        let (mut state, a, b) = planning_match();
        let ua = state.units_of(a)[0];
        let ub = state.units_of(b)[0];
        place(&mut state, ua, GridCell::new(9, 7));
        place(&mut state, ub, GridCell::new(11, 7));
        for (player, unit) in [(a, ua), (b, ub)] {
            state
                .plan_command(player, unit, CommandRequest::Wait { duration: 2.0 }, None)
                .unwrap();
        }
        (state, a, b, ua, ub)
    }

    #[test]
    fn planning_hides_enemy_plans() {
        let (state, a, _, ua, ub) = neighbours_with_plans();
        let builder = SnapshotBuilder::new(&state);
        let snapshot = view(builder.build(&state, a, &FrameEvents::default()));

        assert_eq!(snapshot.phase, MatchPhase::Planning);
        let own = snapshot.units.iter().find(|u| u.id == ua).unwrap();
        assert_eq!(own.commands.len(), 1);
        let enemy = snapshot.units.iter().find(|u| u.id == ub).unwrap();
        assert!(enemy.commands.is_empty());
        assert!(snapshot.execution.is_none());
    }

    #[test]
    fn execution_reveals_visible_plans() {
        let (mut state, a, _, _, ub) = neighbours_with_plans();
        state.start_execution();
        state.advance_execution(0.0);

        let builder = SnapshotBuilder::new(&state);
        let snapshot = view(builder.build(&state, a, &FrameEvents::default()));
        let enemy = snapshot.units.iter().find(|u| u.id == ub).unwrap();
        assert_eq!(enemy.commands.len(), 1);
        assert_eq!(enemy.current_command, Some(0));
        assert_eq!(snapshot.execution.map(|c| c.total), Some(20.0));
    }

    #[test]
    fn distant_enemies_are_omitted() {
        let (state, a, b) = planning_match();
        let builder = SnapshotBuilder::new(&state);
        let snapshot = view(builder.build(&state, a, &FrameEvents::default()));

        assert_eq!(snapshot.units.len(), 3);
        assert!(snapshot.units.iter().all(|u| u.player_id == a));
        assert!(!state.units_of(b).is_empty());
        assert_eq!(snapshot.players.len(), 2);
    }

    #[test]
    fn events_about_hidden_units_are_dropped() {
        let (state, a, b) = planning_match();
        let hidden = state.units_of(b)[0];
        let own = state.units_of(a)[0];
        let cell = GridCell::new(0, 0);
        let events = FrameEvents {
            collisions: vec![
                CollisionEvent { unit_id: hidden, amount: 30.0, cell },
                CollisionEvent { unit_id: own, amount: 30.0, cell },
            ],
            shooting_effects: Vec::new(),
        };

        let builder = SnapshotBuilder::new(&state);
        let snapshot = view(builder.build(&state, a, &events));
        assert_eq!(snapshot.collisions.len(), 1);
        assert_eq!(snapshot.collisions[0].unit_id, own);
    }
}
