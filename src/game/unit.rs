//! Units and their per-tick command execution

use uuid::Uuid;

use crate::config::GameConfig;

use super::combat::CombatSystem;
use super::command::{Command, CommandTimeline};
use super::grid::{GridCell, GridGeometry, WorldPos};

/// An attack whose window just closed, resolved by the match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackIntent {
    pub attacker_id: Uuid,
    pub target_id: Uuid,
}

/// Sector watch in progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchState {
    pub origin: GridCell,
    pub direction: f32,
    pub cone_angle: f32,
    /// Set once the unit stands on the origin
    pub armed: bool,
}

#[derive(Debug, Clone)]
struct ActiveCommand {
    index: usize,
    command: Command,
    duration: f32,
    started_at: f32,
}

/// A unit on the battlefield (authoritative)
#[derive(Debug, Clone)]
pub struct Unit {
    pub id: Uuid,
    pub player_id: Uuid,

    // Position
    pub x: f32,
    pub y: f32,
    pub grid: GridCell,

    // Combat
    pub health: f32,
    pub max_health: f32,
    pub damage: f32,
    pub attack_range: i32,
    pub sector_range: i32,
    pub vision_range: i32,

    /// Client-side selection, never set by the server
    pub selected: bool,

    pub timeline: CommandTimeline,

    // Execution state
    active: Option<ActiveCommand>,
    watch: Option<WatchState>,
    moving: bool,
}

impl Unit {
    pub fn new(
        id: Uuid,
        player_id: Uuid,
        cell: GridCell,
        config: &GameConfig,
        geometry: &GridGeometry,
    ) -> Self {
        let pos = geometry.grid_to_world(cell);
        Self {
            id,
            player_id,
            x: pos.x,
            y: pos.y,
            grid: cell,
            health: config.unit_health,
            max_health: config.unit_health,
            damage: config.unit_damage,
            attack_range: config.attack_range,
            sector_range: config.sector_range,
            vision_range: config.vision_range,
            selected: false,
            timeline: CommandTimeline::new(),
            active: None,
            watch: None,
            moving: false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }

    pub fn position(&self) -> WorldPos {
        WorldPos {
            x: self.x,
            y: self.y,
        }
    }

    /// Timeline index of the command currently executing
    pub fn active_index(&self) -> Option<usize> {
        self.active.as_ref().map(|a| a.index)
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn watch(&self) -> Option<&WatchState> {
        self.watch.as_ref()
    }

    /// Watch state once the unit has reached its origin and may fire
    pub fn armed_watch(&self) -> Option<&WatchState> {
        self.watch.as_ref().filter(|w| w.armed)
    }

    /// Reduce health, returns true when this killed the unit
    pub fn take_damage(&mut self, amount: f32) -> bool {
        let was_alive = self.is_alive();
        let (health, dead) = CombatSystem::apply_damage(self.health, amount);
        self.health = health;
        was_alive && dead
    }

    /// Drop the plan and any execution state, used when planning restarts
    pub fn clear_commands(&mut self) {
        self.timeline.clear();
        self.active = None;
        self.watch = None;
        self.moving = false;
    }

    /// Advance execution to simulated time `now` (seconds since execution start)
    pub fn update_execution(&mut self, now: f32, geometry: &GridGeometry) -> Option<AttackIntent> {
        if !self.is_alive() {
            return None;
        }

        if self.active.is_none() {
            if let Some(index) = self.timeline.next_due(now) {
                self.start_command(index, now, geometry);
            }
        }

        let active = self.active.as_ref()?;
        let progress = if active.duration > 0.0 {
            ((now - active.started_at) / active.duration).min(1.0)
        } else {
            1.0
        };

        if progress >= 1.0 {
            self.complete_active(geometry)
        } else {
            self.update_command(progress.max(0.0), geometry);
            None
        }
    }

    /// End of the execution window: finish whatever is running and retire the
    /// rest of the plan so it does not carry over.
    pub fn force_finish(&mut self, geometry: &GridGeometry) -> Option<AttackIntent> {
        let intent = if self.is_alive() && self.active.is_some() {
            self.complete_active(geometry)
        } else {
            self.active = None;
            None
        };
        self.timeline.mark_all_executed();
        self.watch = None;
        self.moving = false;
        intent
    }

    fn start_command(&mut self, index: usize, now: f32, geometry: &GridGeometry) {
        let Some(scheduled) = self.timeline.get(index) else {
            return;
        };
        let command = scheduled.command.clone();
        let duration = scheduled.duration;

        match &command {
            Command::Move { path } => {
                if let Some(first) = path.first() {
                    if *first != self.grid {
                        self.place_at(*first, geometry);
                    }
                }
                self.moving = path.len() > 1;
            }
            Command::WatchSector {
                origin,
                direction,
                cone_angle,
                approach,
                ..
            } => {
                if let Some(first) = approach.first() {
                    if *first != self.grid {
                        self.place_at(*first, geometry);
                    }
                }
                self.moving = approach.len() > 1;
                self.watch = Some(WatchState {
                    origin: *origin,
                    direction: *direction,
                    cone_angle: *cone_angle,
                    armed: approach.len() <= 1,
                });
            }
            Command::Attack { .. } | Command::Wait { .. } => {}
        }

        self.active = Some(ActiveCommand {
            index,
            command,
            duration,
            started_at: now,
        });
    }

    fn update_command(&mut self, progress: f32, geometry: &GridGeometry) {
        let Some(active) = self.active.as_ref() else {
            return;
        };

        match &active.command {
            Command::Move { path } => {
                let (pos, cell) = interpolate_path(path, progress, geometry);
                self.x = pos.x;
                self.y = pos.y;
                self.grid = cell;
            }
            Command::WatchSector {
                origin,
                watch_duration,
                approach,
                ..
            } => {
                let walk_share = ((active.duration - watch_duration) / active.duration).max(0.0);
                if approach.len() > 1 && progress < walk_share {
                    let (pos, cell) = interpolate_path(approach, progress / walk_share, geometry);
                    self.x = pos.x;
                    self.y = pos.y;
                    self.grid = cell;
                } else {
                    let pos = geometry.grid_to_world(*origin);
                    self.x = pos.x;
                    self.y = pos.y;
                    self.grid = *origin;
                    self.moving = false;
                    if let Some(watch) = self.watch.as_mut() {
                        watch.armed = true;
                    }
                }
            }
            Command::Attack { .. } | Command::Wait { .. } => {}
        }
    }

    fn complete_active(&mut self, geometry: &GridGeometry) -> Option<AttackIntent> {
        let active = self.active.take()?;
        let intent = self.finish_command(&active.command, geometry);
        if let Some(scheduled) = self.timeline.get_mut(active.index) {
            scheduled.executed = true;
        }
        intent
    }

    fn finish_command(&mut self, command: &Command, geometry: &GridGeometry) -> Option<AttackIntent> {
        match command {
            Command::Move { path } => {
                if let Some(last) = path.last() {
                    self.place_at(*last, geometry);
                }
                self.moving = false;
                None
            }
            Command::WatchSector { origin, .. } => {
                self.place_at(*origin, geometry);
                self.moving = false;
                self.watch = None;
                None
            }
            Command::Attack { target_id } => Some(AttackIntent {
                attacker_id: self.id,
                target_id: *target_id,
            }),
            Command::Wait { .. } => None,
        }
    }

    fn place_at(&mut self, cell: GridCell, geometry: &GridGeometry) {
        let pos = geometry.grid_to_world(cell);
        self.x = pos.x;
        self.y = pos.y;
        self.grid = cell;
    }
}

/// Position along `path` at `progress` in [0, 1).
///
/// Progress is spread evenly over the path's steps; the grid cell switches to
/// the next one once the unit is past the middle of a step.
fn interpolate_path(path: &[GridCell], progress: f32, geometry: &GridGeometry) -> (WorldPos, GridCell) {
    let Some(first) = path.first() else {
        return (WorldPos { x: 0.0, y: 0.0 }, GridCell::new(0, 0));
    };
    if path.len() < 2 {
        return (geometry.grid_to_world(*first), *first);
    }

    let total_steps = path.len() - 1;
    let scaled = progress.clamp(0.0, 1.0) * total_steps as f32;
    let step = (scaled.floor() as usize).min(total_steps - 1);
    let step_progress = scaled - step as f32;

    let from = path[step];
    let to = path[step + 1];
    let from_world = geometry.grid_to_world(from);
    let to_world = geometry.grid_to_world(to);

    let pos = WorldPos {
        x: from_world.x + (to_world.x - from_world.x) * step_progress,
        y: from_world.y + (to_world.y - from_world.y) * step_progress,
    };
    let cell = if step_progress > 0.5 { to } else { from };
    (pos, cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::command::TimelineRules;

    fn geometry() -> GridGeometry {
        GridGeometry::new(40.0, 20, 15)
    }

    fn rules() -> TimelineRules {
        TimelineRules {
            budget: 20.0,
            time_per_cell: 0.5,
            attack_duration: 5.0,
        }
    }

    fn unit_at(cell: GridCell) -> Unit {
        Unit::new(Uuid::new_v4(), Uuid::new_v4(), cell, &GameConfig::default(), &geometry())
    }

    fn row(from: i32, to: i32, y: i32) -> Vec<GridCell> {
        (from..=to).map(|x| GridCell::new(x, y)).collect()
    }

    #[test]
    fn move_interpolates_then_snaps() {
        let g = geometry();
        let mut unit = unit_at(GridCell::new(1, 1));
        unit.timeline
            .append(Command::Move { path: row(1, 5, 1) }, &rules())
            .unwrap();

        // 4 cells at 0.5s each: 2s total
        assert!(unit.update_execution(0.0, &g).is_none());
        assert_eq!(unit.active_index(), Some(0));
        assert!(unit.is_moving());

        unit.update_execution(0.5, &g);
        assert_eq!(unit.grid, GridCell::new(2, 1));
        assert!((unit.x - 100.0).abs() < 1e-3);

        // a quarter into the third step: still drawn between 3 and 4
        unit.update_execution(1.125, &g);
        assert_eq!(unit.grid, GridCell::new(3, 1));
        assert!((unit.x - 150.0).abs() < 1e-3);

        unit.update_execution(2.0, &g);
        assert_eq!(unit.grid, GridCell::new(5, 1));
        assert_eq!(unit.position(), g.grid_to_world(GridCell::new(5, 1)));
        assert!(unit.active_index().is_none());
        assert!(!unit.is_moving());
        assert!(unit.timeline.commands()[0].executed);
    }

    #[test]
    fn commands_run_in_sequence() {
        let g = geometry();
        let mut unit = unit_at(GridCell::new(1, 1));
        unit.timeline.append(Command::Wait { duration: 1.0 }, &rules()).unwrap();
        unit.timeline
            .append(Command::Move { path: row(1, 3, 1) }, &rules())
            .unwrap();

        unit.update_execution(0.0, &g);
        unit.update_execution(1.0, &g);
        assert!(unit.timeline.commands()[0].executed);
        assert!(unit.active_index().is_none());

        unit.update_execution(1.05, &g);
        assert_eq!(unit.active_index(), Some(1));

        unit.update_execution(2.2, &g);
        assert_eq!(unit.grid, GridCell::new(3, 1));
        assert!(unit.timeline.commands().iter().all(|c| c.executed));
    }

    #[test]
    fn attack_emits_intent_when_window_closes() {
        let g = geometry();
        let target = Uuid::new_v4();
        let mut unit = unit_at(GridCell::new(1, 1));
        unit.timeline
            .append(Command::Attack { target_id: target }, &rules())
            .unwrap();

        assert!(unit.update_execution(0.0, &g).is_none());
        assert!(unit.update_execution(4.9, &g).is_none());
        let intent = unit.update_execution(5.0, &g).unwrap();
        assert_eq!(intent.target_id, target);
        assert_eq!(intent.attacker_id, unit.id);
    }

    #[test]
    fn watch_sector_walks_then_arms() {
        let g = geometry();
        let mut unit = unit_at(GridCell::new(1, 1));
        let approach = row(1, 3, 1);
        unit.timeline
            .append(
                Command::WatchSector {
                    origin: GridCell::new(3, 1),
                    direction: 0.0,
                    cone_angle: std::f32::consts::FRAC_PI_3,
                    watch_duration: 4.0,
                    approach,
                },
                &rules(),
            )
            .unwrap();

        // 1s walking, 4s watching
        unit.update_execution(0.0, &g);
        assert!(unit.watch().is_some());
        assert!(unit.armed_watch().is_none());

        unit.update_execution(0.6, &g);
        assert!(unit.armed_watch().is_none());
        assert_eq!(unit.grid, GridCell::new(2, 1));

        unit.update_execution(1.5, &g);
        assert!(unit.armed_watch().is_some());
        assert_eq!(unit.grid, GridCell::new(3, 1));

        unit.update_execution(5.0, &g);
        assert!(unit.watch().is_none());
        assert!(unit.timeline.commands()[0].executed);
    }

    #[test]
    fn watch_in_place_is_armed_immediately() {
        let g = geometry();
        let cell = GridCell::new(4, 4);
        let mut unit = unit_at(cell);
        unit.timeline
            .append(
                Command::WatchSector {
                    origin: cell,
                    direction: 1.0,
                    cone_angle: 1.0,
                    watch_duration: 2.0,
                    approach: vec![cell],
                },
                &rules(),
            )
            .unwrap();

        unit.update_execution(0.0, &g);
        assert!(unit.armed_watch().is_some());
    }

    #[test]
    fn force_finish_resolves_and_retires_plan() {
        let g = geometry();
        let mut unit = unit_at(GridCell::new(1, 1));
        unit.timeline
            .append(Command::Move { path: row(1, 9, 1) }, &rules())
            .unwrap();
        unit.timeline.append(Command::Wait { duration: 1.0 }, &rules()).unwrap();

        unit.update_execution(0.0, &g);
        unit.update_execution(1.0, &g);
        assert!(unit.force_finish(&g).is_none());

        assert_eq!(unit.grid, GridCell::new(9, 1));
        assert!(unit.active_index().is_none());
        assert!(unit.timeline.commands().iter().all(|c| c.executed));
        assert!(unit.timeline.next_due(20.0).is_none());
    }

    #[test]
    fn force_finish_releases_pending_attack() {
        let g = geometry();
        let target = Uuid::new_v4();
        let mut unit = unit_at(GridCell::new(1, 1));
        unit.timeline
            .append(Command::Attack { target_id: target }, &rules())
            .unwrap();
        unit.update_execution(0.0, &g);

        let intent = unit.force_finish(&g).unwrap();
        assert_eq!(intent.target_id, target);
    }

    #[test]
    fn dead_units_do_not_execute() {
        let g = geometry();
        let mut unit = unit_at(GridCell::new(1, 1));
        unit.timeline.append(Command::Wait { duration: 1.0 }, &rules()).unwrap();
        assert!(unit.take_damage(500.0));
        assert!(!unit.take_damage(1.0));

        unit.update_execution(0.0, &g);
        assert!(unit.active_index().is_none());
    }

    #[test]
    fn interpolation_is_by_grid_step() {
        let g = geometry();
        let path = row(0, 2, 0);
        let (pos, cell) = interpolate_path(&path, 0.25, &g);
        assert!((pos.x - 40.0).abs() < 1e-3);
        assert_eq!(cell, GridCell::new(0, 0));

        let (pos, cell) = interpolate_path(&path, 0.8, &g);
        assert!((pos.x - 84.0).abs() < 1e-3);
        assert_eq!(cell, GridCell::new(2, 0));
    }
}
