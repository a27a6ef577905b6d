//! Match state machine and the per-match task

use std::collections::{BTreeSet, HashMap, HashSet};
use std::f32::consts::TAU;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{GameConfig, MAX_SPAWN_SLOTS};
use crate::util::time::{tick_interval, PLANNING_TICK};
use crate::ws::protocol::{
    ClientMsg, CollisionEvent, CommandErrorKind, CommandRequest, ServerMsg, ShootingEffect,
};

use super::combat::{CombatSystem, HitResult};
use super::command::{Command, TimelineError, TimelineRules};
use super::grid::{GridCell, GridGeometry};
use super::pathfinding::find_path;
use super::snapshot::{FrameEvents, SnapshotBuilder};
use super::unit::{AttackIntent, Unit};
use super::{MatchInput, PlayerInput};

/// Colors handed out by spawn slot
pub const PLAYER_COLORS: [&str; MAX_SPAWN_SLOTS] = ["#4CAF50", "#F44336", "#2196F3", "#FF9800"];

/// Cells around each spawn cell kept free of obstacles (Chebyshev radius)
const SPAWN_CLEARANCE: i32 = 2;

const MAX_NAME_LEN: usize = 24;

const INPUT_BUFFER: usize = 256;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Waiting for players
    Waiting,
    /// Players author their timelines
    Planning,
    /// Switching into execution
    Transitioning,
    /// Timelines play out
    Executing,
    /// Match over
    Ended,
}

/// Player state in a match (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub player_id: Uuid,
    pub name: String,
    pub color: String,
    pub slot: usize,
    /// Lobby readiness, informational only
    pub ready: bool,
    /// Done planning for this round
    pub planning_ready: bool,
    pub outbound: mpsc::Sender<ServerMsg>,
}

/// Why a planning request was not applied
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("match is not in the planning phase")]
    WrongPhase,

    #[error("player is not in this match")]
    UnknownPlayer,

    #[error("unknown unit")]
    UnknownUnit,

    #[error("unit belongs to another player")]
    NotOwner,

    #[error("attack target is not an enemy unit")]
    InvalidTarget,

    #[error("no command at index {0}")]
    UnknownCommand(usize),

    #[error("no path to the target cell")]
    Unreachable,

    #[error("invalid {0}")]
    InvalidPayload(&'static str),

    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

impl PlanError {
    /// Kind reported back to the client; None for requests dropped silently
    pub fn rejection(&self) -> Option<CommandErrorKind> {
        match self {
            PlanError::Timeline(TimelineError::Full { .. }) => Some(CommandErrorKind::TimelineFull),
            PlanError::Timeline(_) | PlanError::InvalidPayload(_) => {
                Some(CommandErrorKind::InvalidCommand)
            }
            PlanError::Unreachable => Some(CommandErrorKind::NoPath),
            PlanError::WrongPhase
            | PlanError::UnknownPlayer
            | PlanError::UnknownUnit
            | PlanError::NotOwner
            | PlanError::InvalidTarget
            | PlanError::UnknownCommand(_) => None,
        }
    }
}

/// Match state (owned by match task)
pub struct MatchState {
    pub id: Uuid,
    pub seed: u64,
    pub config: Arc<GameConfig>,
    pub geometry: GridGeometry,
    rules: TimelineRules,
    pub phase: MatchPhase,
    pub players: Vec<PlayerState>,
    pub units: Vec<Unit>,
    pub obstacles: BTreeSet<GridCell>,
    pub planning_time_left: u32,
    /// Simulated seconds into the current execution window
    pub execution_elapsed: f32,
    pub winner: Option<Uuid>,
}

impl MatchState {
    pub fn new(id: Uuid, seed: u64, config: Arc<GameConfig>) -> Self {
        let geometry = GridGeometry::from_config(&config);
        let mut state = Self {
            id,
            seed,
            rules: TimelineRules::from_config(&config),
            geometry,
            config,
            phase: MatchPhase::Waiting,
            players: Vec::new(),
            units: Vec::new(),
            obstacles: BTreeSet::new(),
            planning_time_left: 0,
            execution_elapsed: 0.0,
            winner: None,
        };
        state.obstacles = state.generate_obstacles(&mut ChaCha8Rng::seed_from_u64(seed));
        state
    }

    pub fn max_players(&self) -> usize {
        self.config.max_players.min(MAX_SPAWN_SLOTS)
    }

    pub fn player(&self, player_id: Uuid) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.player_id == player_id)
    }

    fn player_mut(&mut self, player_id: Uuid) -> Option<&mut PlayerState> {
        self.players.iter_mut().find(|p| p.player_id == player_id)
    }

    pub fn unit(&self, unit_id: Uuid) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == unit_id)
    }

    pub fn unit_mut(&mut self, unit_id: Uuid) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| u.id == unit_id)
    }

    /// Ids of a player's units in roster order
    pub fn units_of(&self, player_id: Uuid) -> Vec<Uuid> {
        self.units
            .iter()
            .filter(|u| u.player_id == player_id)
            .map(|u| u.id)
            .collect()
    }

    /// Starting cells for a spawn slot: west, east, north, south edge
    pub fn spawn_cells(&self, slot: usize) -> Vec<GridCell> {
        let (w, h) = (self.geometry.width, self.geometry.height);
        let count = self.config.units_per_player as i32;
        (0..count)
            .map(|i| {
                let offset = i - count / 2;
                match slot {
                    0 => GridCell::new(1, h / 2 + offset),
                    1 => GridCell::new(w - 2, h / 2 + offset),
                    2 => GridCell::new(w / 2 + offset, 1),
                    _ => GridCell::new(w / 2 + offset, h - 2),
                }
            })
            .collect()
    }

    fn generate_obstacles(&self, rng: &mut ChaCha8Rng) -> BTreeSet<GridCell> {
        let reserved: HashSet<GridCell> = (0..self.max_players())
            .flat_map(|slot| self.spawn_cells(slot))
            .flat_map(|cell| {
                (-SPAWN_CLEARANCE..=SPAWN_CLEARANCE).flat_map(move |dx| {
                    (-SPAWN_CLEARANCE..=SPAWN_CLEARANCE)
                        .map(move |dy| GridCell::new(cell.x + dx, cell.y + dy))
                })
            })
            .collect();

        let mut candidates: Vec<GridCell> = self
            .geometry
            .cells()
            .filter(|c| !reserved.contains(c))
            .collect();
        let total = (self.geometry.width * self.geometry.height) as f32;
        let target = (total * self.config.obstacle_density) as usize;

        candidates.shuffle(rng);
        candidates.truncate(target);
        candidates.into_iter().collect()
    }

    /// Cells a path for `unit_id` may not cross
    fn blocked_cells(&self, unit_id: Uuid) -> HashSet<GridCell> {
        self.obstacles
            .iter()
            .copied()
            .chain(
                self.units
                    .iter()
                    .filter(|u| u.id != unit_id && u.is_alive())
                    .map(|u| u.grid),
            )
            .collect()
    }

    /// Add a player while waiting; false when full, already joined or past the lobby
    pub fn add_player(
        &mut self,
        player_id: Uuid,
        outbound: mpsc::Sender<ServerMsg>,
        name: &str,
    ) -> bool {
        if self.phase != MatchPhase::Waiting
            || self.players.len() >= self.max_players()
            || self.player(player_id).is_some()
        {
            return false;
        }
        let Some(slot) =
            (0..self.max_players()).find(|slot| self.players.iter().all(|p| p.slot != *slot))
        else {
            return false;
        };

        for cell in self.spawn_cells(slot) {
            let unit = Unit::new(Uuid::new_v4(), player_id, cell, &self.config, &self.geometry);
            self.units.push(unit);
        }

        let name = display_name(name, player_id);
        info!(
            match_id = %self.id,
            player_id = %player_id,
            name = %name,
            slot,
            "Player joined match"
        );

        self.players.push(PlayerState {
            player_id,
            name,
            color: PLAYER_COLORS[slot].to_string(),
            slot,
            ready: false,
            planning_ready: false,
            outbound,
        });

        if self.players.len() >= self.config.min_players {
            self.start_planning();
        }
        true
    }

    /// Drop a player and their units; returns false for an unknown player
    pub fn remove_player(&mut self, player_id: Uuid) -> bool {
        let Some(index) = self.players.iter().position(|p| p.player_id == player_id) else {
            return false;
        };
        self.players.remove(index);
        self.units.retain(|u| u.player_id != player_id);

        info!(
            match_id = %self.id,
            player_id = %player_id,
            remaining = self.players.len(),
            "Player left match"
        );

        match self.phase {
            MatchPhase::Planning | MatchPhase::Transitioning | MatchPhase::Executing => {
                if self.check_win_condition() {
                    self.end_match();
                } else if self.phase == MatchPhase::Planning && self.all_planning_ready() {
                    self.start_execution();
                }
            }
            MatchPhase::Waiting | MatchPhase::Ended => {}
        }
        true
    }

    /// Lobby readiness while waiting, planning readiness while planning.
    /// Returns true when the state changed.
    pub fn set_ready(&mut self, player_id: Uuid, ready: bool) -> bool {
        let phase = self.phase;
        let Some(player) = self.player_mut(player_id) else {
            return false;
        };

        match phase {
            MatchPhase::Waiting => {
                player.ready = ready;
                true
            }
            MatchPhase::Planning => {
                player.planning_ready = ready;
                if self.all_planning_ready() {
                    self.start_execution();
                }
                true
            }
            MatchPhase::Transitioning | MatchPhase::Executing | MatchPhase::Ended => false,
        }
    }

    fn all_planning_ready(&self) -> bool {
        self.players.len() >= 2 && self.players.iter().all(|p| p.planning_ready)
    }

    /// Resolve a request and put it on the unit's timeline, appended or at `index`.
    ///
    /// Nothing changes when an error is returned.
    pub fn plan_command(
        &mut self,
        player_id: Uuid,
        unit_id: Uuid,
        request: CommandRequest,
        index: Option<usize>,
    ) -> Result<(), PlanError> {
        let unit_index = self.plannable_unit(player_id, unit_id)?;
        let command = self.resolve_request(unit_index, request, index)?;
        let rules = self.rules;

        let unit = &mut self.units[unit_index];
        let scheduled = match index {
            Some(index) => unit.timeline.insert(index, command, &rules)?,
            None => unit.timeline.append(command, &rules)?,
        };

        debug!(
            match_id = %self.id,
            unit_id = %unit_id,
            kind = scheduled.command.kind(),
            start = scheduled.start_time,
            end = scheduled.end_time,
            "Command planned"
        );
        Ok(())
    }

    /// Drop the command at `index` from a unit's timeline
    pub fn remove_command(
        &mut self,
        player_id: Uuid,
        unit_id: Uuid,
        index: usize,
    ) -> Result<(), PlanError> {
        let unit_index = self.plannable_unit(player_id, unit_id)?;
        self.units[unit_index]
            .timeline
            .remove(index)
            .ok_or(PlanError::UnknownCommand(index))?;
        Ok(())
    }

    fn plannable_unit(&self, player_id: Uuid, unit_id: Uuid) -> Result<usize, PlanError> {
        if self.phase != MatchPhase::Planning {
            return Err(PlanError::WrongPhase);
        }
        if self.player(player_id).is_none() {
            return Err(PlanError::UnknownPlayer);
        }
        let index = self
            .units
            .iter()
            .position(|u| u.id == unit_id && u.is_alive())
            .ok_or(PlanError::UnknownUnit)?;
        if self.units[index].player_id != player_id {
            return Err(PlanError::NotOwner);
        }
        Ok(index)
    }

    fn resolve_request(
        &self,
        unit_index: usize,
        request: CommandRequest,
        index: Option<usize>,
    ) -> Result<Command, PlanError> {
        let unit = &self.units[unit_index];
        // Paths start where the unit will stand when the command begins
        let from = match index {
            Some(index) => unit.timeline.position_before(index, unit.grid),
            None => unit.timeline.end_of_chain(unit.grid),
        };

        match request {
            CommandRequest::Move { x, y } => {
                if !x.is_finite() || !y.is_finite() {
                    return Err(PlanError::InvalidPayload("move target"));
                }
                let goal = self.geometry.world_to_grid(x, y);
                let path = find_path(&self.geometry, from, goal, &self.blocked_cells(unit.id));
                if path.len() < 2 {
                    return Err(PlanError::Unreachable);
                }
                Ok(Command::Move { path })
            }
            CommandRequest::Attack { target_id } => {
                let is_enemy = self
                    .units
                    .iter()
                    .any(|u| u.id == target_id && u.is_alive() && u.player_id != unit.player_id);
                if !is_enemy {
                    return Err(PlanError::InvalidTarget);
                }
                Ok(Command::Attack { target_id })
            }
            CommandRequest::Wait { duration } => Ok(Command::Wait { duration }),
            CommandRequest::WatchSector {
                grid_x,
                grid_y,
                direction,
                cone_angle,
                duration,
            } => {
                if !direction.is_finite() || !(cone_angle > 0.0 && cone_angle <= TAU) {
                    return Err(PlanError::InvalidPayload("sector cone"));
                }
                if !duration.is_finite() || duration <= 0.0 {
                    return Err(TimelineError::InvalidDuration(duration).into());
                }
                let origin = GridCell::new(grid_x, grid_y);
                let approach = find_path(&self.geometry, from, origin, &self.blocked_cells(unit.id));
                if approach.is_empty() {
                    return Err(PlanError::Unreachable);
                }
                Ok(Command::WatchSector {
                    origin,
                    direction,
                    cone_angle,
                    watch_duration: duration,
                    approach,
                })
            }
        }
    }

    /// Enter planning: fresh timelines, nobody ready, full countdown
    pub fn start_planning(&mut self) {
        self.phase = MatchPhase::Planning;
        self.planning_time_left = self.config.planning_secs;
        self.execution_elapsed = 0.0;
        for unit in &mut self.units {
            unit.clear_commands();
        }
        for player in &mut self.players {
            player.planning_ready = false;
        }
        info!(
            match_id = %self.id,
            seconds = self.planning_time_left,
            "Planning started"
        );
    }

    /// One second of the planning countdown; returns true when execution began
    pub fn tick_planning(&mut self) -> bool {
        if self.phase != MatchPhase::Planning {
            return false;
        }
        self.planning_time_left = self.planning_time_left.saturating_sub(1);
        self.planning_time_left == 0 && self.start_execution()
    }

    /// Switch into execution; false unless currently planning
    pub fn start_execution(&mut self) -> bool {
        if self.phase != MatchPhase::Planning {
            return false;
        }
        self.phase = MatchPhase::Transitioning;
        self.execution_elapsed = 0.0;
        self.planning_time_left = 0;

        let planned: usize = self.units.iter().map(|u| u.timeline.len()).sum();
        info!(match_id = %self.id, planned, "Execution started");

        self.phase = MatchPhase::Executing;
        true
    }

    /// Advance execution to `elapsed` seconds since it started.
    ///
    /// Units move first, then attacks and sector fire resolve together,
    /// then shared cells deal collision damage and the dead are removed.
    /// The round closes at the end of the timeline window.
    pub fn advance_execution(&mut self, elapsed: f32) -> FrameEvents {
        let mut events = FrameEvents::default();
        if self.phase != MatchPhase::Executing {
            return events;
        }

        let budget = self.config.timeline_secs;
        let now = elapsed.clamp(0.0, budget);
        self.execution_elapsed = now;

        let geometry = &self.geometry;
        let intents: Vec<AttackIntent> = self
            .units
            .iter_mut()
            .filter_map(|u| u.update_execution(now, geometry))
            .collect();

        self.resolve_combat(&intents, &mut events);
        self.resolve_collisions(&mut events);
        self.remove_dead();

        if elapsed >= budget {
            self.finish_execution(&mut events);
        }
        events
    }

    fn finish_execution(&mut self, events: &mut FrameEvents) {
        let geometry = &self.geometry;
        let intents: Vec<AttackIntent> = self
            .units
            .iter_mut()
            .filter_map(|u| u.force_finish(geometry))
            .collect();

        self.resolve_combat(&intents, events);
        self.resolve_collisions(events);
        self.remove_dead();

        info!(
            match_id = %self.id,
            elapsed = self.execution_elapsed,
            survivors = self.units.len(),
            "Execution finished"
        );

        if self.check_win_condition() {
            self.end_match();
        } else {
            self.start_planning();
        }
    }

    /// Compute every hit for this tick against the current state, then apply them
    fn resolve_combat(&mut self, intents: &[AttackIntent], events: &mut FrameEvents) {
        let mut hits: Vec<HitResult> = Vec::new();

        for intent in intents {
            let (Some(attacker), Some(target)) =
                (self.unit(intent.attacker_id), self.unit(intent.target_id))
            else {
                continue;
            };
            if !target.is_alive()
                || target.player_id == attacker.player_id
                || !CombatSystem::in_attack_range(attacker.grid, target.grid, attacker.attack_range)
            {
                debug!(
                    match_id = %self.id,
                    attacker_id = %attacker.id,
                    target_id = %target.id,
                    "Attack missed"
                );
                continue;
            }

            hits.push(HitResult {
                shooter_id: attacker.id,
                target_id: target.id,
                damage: attacker.damage,
            });
            events.shooting_effects.push(ShootingEffect {
                shooter_id: attacker.id,
                target_id: target.id,
                from: attacker.position(),
                to: target.position(),
            });
        }

        for watcher in self.units.iter().filter(|u| u.is_alive()) {
            let Some(watch) = watcher.armed_watch() else {
                continue;
            };
            let target = self.units.iter().find(|t| {
                t.is_alive()
                    && t.player_id != watcher.player_id
                    && CombatSystem::in_sector(
                        watch.origin,
                        t.grid,
                        watch.direction,
                        watch.cone_angle,
                        watcher.sector_range,
                    )
            });
            if let Some(target) = target {
                hits.push(HitResult {
                    shooter_id: watcher.id,
                    target_id: target.id,
                    damage: self.config.sector_damage,
                });
                events.shooting_effects.push(ShootingEffect {
                    shooter_id: watcher.id,
                    target_id: target.id,
                    from: watcher.position(),
                    to: target.position(),
                });
            }
        }

        for hit in hits {
            let match_id = self.id;
            if let Some(target) = self.unit_mut(hit.target_id) {
                if target.take_damage(hit.damage) {
                    info!(
                        match_id = %match_id,
                        unit_id = %hit.target_id,
                        shooter_id = %hit.shooter_id,
                        "Unit destroyed"
                    );
                }
            }
        }
    }

    /// Damage every living unit standing in a cell shared with another
    fn resolve_collisions(&mut self, events: &mut FrameEvents) {
        let mut occupancy: HashMap<GridCell, usize> = HashMap::new();
        for unit in self.units.iter().filter(|u| u.is_alive()) {
            *occupancy.entry(unit.grid).or_default() += 1;
        }

        let percent = self.config.collision_damage_pct;
        for unit in self.units.iter_mut().filter(|u| u.is_alive()) {
            if occupancy.get(&unit.grid).copied().unwrap_or(0) < 2 {
                continue;
            }
            let amount = CombatSystem::collision_damage(unit.max_health, percent);
            unit.take_damage(amount);
            debug!(
                match_id = %self.id,
                unit_id = %unit.id,
                x = unit.grid.x,
                y = unit.grid.y,
                amount,
                "Collision"
            );
            events.collisions.push(CollisionEvent {
                unit_id: unit.id,
                amount,
                cell: unit.grid,
            });
        }
    }

    /// Drop dead units from the roster
    fn remove_dead(&mut self) {
        self.units.retain(Unit::is_alive);
    }

    /// At most one player still owns living units
    pub fn check_win_condition(&self) -> bool {
        let owners: HashSet<Uuid> = self
            .units
            .iter()
            .filter(|u| u.is_alive())
            .map(|u| u.player_id)
            .collect();
        owners.len() <= 1
    }

    fn end_match(&mut self) {
        self.phase = MatchPhase::Ended;
        self.winner = self
            .units
            .iter()
            .find(|u| u.is_alive())
            .map(|u| u.player_id);
        match self.winner {
            Some(winner) => info!(match_id = %self.id, winner = %winner, "Match ended"),
            None => info!(match_id = %self.id, "Match ended without a winner"),
        }
    }
}

fn display_name(requested: &str, player_id: Uuid) -> String {
    let name: String = requested.trim().chars().take(MAX_NAME_LEN).collect();
    if name.is_empty() {
        format!("Player_{}", &player_id.to_string()[..8])
    } else {
        name
    }
}

/// Phase, roster size and capacity, published by the match task after every step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSummary {
    pub phase: MatchPhase,
    pub player_count: usize,
    pub max_players: usize,
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<MatchInput>,
    summary: Arc<RwLock<MatchSummary>>,
}

impl MatchHandle {
    pub fn summary(&self) -> MatchSummary {
        *self.summary.read()
    }

    pub fn player_count(&self) -> usize {
        self.summary.read().player_count
    }

    pub fn phase(&self) -> MatchPhase {
        self.summary.read().phase
    }

    /// Still in the lobby with a free slot
    pub fn is_joinable(&self) -> bool {
        let summary = self.summary();
        summary.phase == MatchPhase::Waiting && summary.player_count < summary.max_players
    }

    /// Ask the match to seat a player; false when refused or the match is gone
    pub async fn join(
        &self,
        player_id: Uuid,
        name: String,
        outbound: mpsc::Sender<ServerMsg>,
    ) -> bool {
        let (reply, accepted) = oneshot::channel();
        let input = MatchInput::Join {
            player_id,
            name,
            outbound,
            reply,
        };
        if self.input_tx.send(input).await.is_err() {
            return false;
        }
        accepted.await.unwrap_or(false)
    }
}

/// Registry of all active matches and the players seated in them
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
    player_matches: DashMap<Uuid, Uuid>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
            player_matches: DashMap::new(),
        }
    }

    /// Create a match, spawn its task and register it.
    /// The task deregisters the match when it exits.
    pub fn create(self: &Arc<Self>, config: Arc<GameConfig>) -> MatchHandle {
        let id = Uuid::new_v4();
        let seed: u64 = rand::random();
        let (game_match, handle) = GameMatch::new(id, seed, config);
        self.insert(handle.clone());

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            game_match.run().await;
            registry.remove(&id);
        });

        info!(match_id = %id, seed, "Created match");
        handle
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    /// Forget a match and every player seated in it
    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        let removed = self.matches.remove(id).map(|(_, h)| h);
        self.player_matches.retain(|_, match_id| *match_id != *id);
        removed
    }

    pub fn assign_player(&self, player_id: Uuid, match_id: Uuid) {
        self.player_matches.insert(player_id, match_id);
    }

    pub fn unassign_player(&self, player_id: &Uuid) -> Option<Uuid> {
        self.player_matches.remove(player_id).map(|(_, m)| m)
    }

    pub fn find_by_player(&self, player_id: &Uuid) -> Option<MatchHandle> {
        let match_id = self.player_matches.get(player_id).map(|m| *m.value())?;
        self.get(&match_id)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }

    /// Find a match still waiting for players
    pub fn find_available_match(&self) -> Option<MatchHandle> {
        self.matches
            .iter()
            .find(|entry| entry.value().is_joinable())
            .map(|entry| entry.value().clone())
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

enum ClockTick {
    PlanningSecond,
    Execution(f32),
}

/// Timer for the current phase, rebuilt whenever the phase changes
enum PhaseClock {
    Idle,
    Planning(Interval),
    Executing { interval: Interval, started: Instant },
}

impl PhaseClock {
    fn sync(&mut self, phase: MatchPhase, config: &GameConfig) {
        let current = matches!(
            (&*self, phase),
            (PhaseClock::Planning(_), MatchPhase::Planning)
                | (PhaseClock::Executing { .. }, MatchPhase::Executing)
                | (
                    PhaseClock::Idle,
                    MatchPhase::Waiting | MatchPhase::Transitioning | MatchPhase::Ended
                )
        );
        if current {
            return;
        }

        *self = match phase {
            MatchPhase::Planning => {
                PhaseClock::Planning(interval_at(Instant::now() + PLANNING_TICK, PLANNING_TICK))
            }
            MatchPhase::Executing => {
                let mut interval = interval(tick_interval(config.execution_tps));
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                PhaseClock::Executing {
                    interval,
                    started: Instant::now(),
                }
            }
            MatchPhase::Waiting | MatchPhase::Transitioning | MatchPhase::Ended => PhaseClock::Idle,
        };
    }

    async fn tick(&mut self) -> ClockTick {
        match self {
            PhaseClock::Idle => std::future::pending().await,
            PhaseClock::Planning(interval) => {
                interval.tick().await;
                ClockTick::PlanningSecond
            }
            PhaseClock::Executing { interval, started } => {
                interval.tick().await;
                ClockTick::Execution(started.elapsed().as_secs_f32())
            }
        }
    }
}

/// The authoritative game match
pub struct GameMatch {
    state: MatchState,
    input_rx: mpsc::Receiver<MatchInput>,
    snapshots: SnapshotBuilder,
    summary: Arc<RwLock<MatchSummary>>,
    seated_any: bool,
}

impl GameMatch {
    /// Create a new match
    pub fn new(id: Uuid, seed: u64, config: Arc<GameConfig>) -> (Self, MatchHandle) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let state = MatchState::new(id, seed, config);
        let summary = Arc::new(RwLock::new(MatchSummary {
            phase: state.phase,
            player_count: 0,
            max_players: state.max_players(),
        }));

        let handle = MatchHandle {
            id,
            input_tx,
            summary: summary.clone(),
        };

        let game_match = Self {
            snapshots: SnapshotBuilder::new(&state),
            state,
            input_rx,
            summary,
            seated_any: false,
        };

        (game_match, handle)
    }

    /// Apply inputs and phase ticks until the match ends or empties
    pub async fn run(mut self) {
        info!(
            match_id = %self.state.id,
            obstacles = self.state.obstacles.len(),
            "Match task started"
        );

        let mut clock = PhaseClock::Idle;

        loop {
            tokio::select! {
                input = self.input_rx.recv() => match input {
                    Some(input) => self.handle_input(input),
                    None => break,
                },
                tick = clock.tick() => self.handle_tick(tick),
            }

            clock.sync(self.state.phase, &self.state.config);
            self.publish_summary();

            if self.state.phase == MatchPhase::Ended {
                break;
            }
            if self.seated_any && self.state.players.is_empty() {
                info!(match_id = %self.state.id, "All players left, closing match");
                break;
            }
        }

        info!(match_id = %self.state.id, "Match task finished");
    }

    fn handle_input(&mut self, input: MatchInput) {
        match input {
            MatchInput::Join {
                player_id,
                name,
                outbound,
                reply,
            } => self.handle_join(player_id, name, outbound, reply),
            MatchInput::Player(input) => self.handle_player_msg(input),
            MatchInput::Leave { player_id } => self.handle_leave(player_id),
        }
    }

    fn handle_tick(&mut self, tick: ClockTick) {
        match tick {
            ClockTick::PlanningSecond => {
                self.state.tick_planning();
                self.broadcast(&FrameEvents::default());
            }
            ClockTick::Execution(elapsed) => {
                let events = self.state.advance_execution(elapsed);
                self.broadcast(&events);
            }
        }
    }

    fn handle_join(
        &mut self,
        player_id: Uuid,
        name: String,
        outbound: mpsc::Sender<ServerMsg>,
        reply: oneshot::Sender<bool>,
    ) {
        let joined = self.state.add_player(player_id, outbound, &name);
        let _ = reply.send(joined);
        if !joined {
            debug!(match_id = %self.state.id, player_id = %player_id, "Join refused");
            return;
        }
        self.seated_any = true;

        if let Some(player) = self.state.player(player_id) {
            deliver(
                player,
                ServerMsg::MatchJoined {
                    match_id: self.state.id,
                    player_id,
                    color: player.color.clone(),
                    seed: self.state.seed,
                },
            );
        }
        self.broadcast(&FrameEvents::default());
    }

    fn handle_player_msg(&mut self, input: PlayerInput) {
        let PlayerInput { player_id, msg } = input;

        match msg {
            ClientMsg::SetReady { ready } => {
                if self.state.set_ready(player_id, ready) {
                    self.broadcast(&FrameEvents::default());
                }
            }
            ClientMsg::RemoveCommand { unit_id, index } => {
                match self.state.remove_command(player_id, unit_id, index) {
                    Ok(()) => self.broadcast(&FrameEvents::default()),
                    Err(e) => self.reject(player_id, e),
                }
            }
            other => {
                let Some((unit_id, request, index)) = other.into_plan() else {
                    debug!(
                        match_id = %self.state.id,
                        player_id = %player_id,
                        "Ignoring session message"
                    );
                    return;
                };
                match self.state.plan_command(player_id, unit_id, request, index) {
                    Ok(()) => self.broadcast(&FrameEvents::default()),
                    Err(e) => self.reject(player_id, e),
                }
            }
        }
    }

    fn handle_leave(&mut self, player_id: Uuid) {
        if self.state.remove_player(player_id) {
            self.broadcast(&FrameEvents::default());
        }
    }

    fn reject(&self, player_id: Uuid, error: PlanError) {
        match error.rejection() {
            Some(kind) => {
                debug!(
                    match_id = %self.state.id,
                    player_id = %player_id,
                    error = %error,
                    "Command rejected"
                );
                self.send_to(
                    player_id,
                    ServerMsg::CommandError {
                        message: error.to_string(),
                        kind,
                    },
                );
            }
            None => debug!(
                match_id = %self.state.id,
                player_id = %player_id,
                error = %error,
                "Command ignored"
            ),
        }
    }

    fn send_to(&self, player_id: Uuid, msg: ServerMsg) {
        if let Some(player) = self.state.player(player_id) {
            deliver(player, msg);
        }
    }

    /// Send every player the snapshot they are allowed to see
    fn broadcast(&self, events: &FrameEvents) {
        for player in &self.state.players {
            let snapshot = self.snapshots.build(&self.state, player.player_id, events);
            deliver(player, snapshot);
        }
    }

    fn publish_summary(&self) {
        *self.summary.write() = MatchSummary {
            phase: self.state.phase,
            player_count: self.state.players.len(),
            max_players: self.state.max_players(),
        };
    }
}

/// Queue a message for a player without blocking the match task
fn deliver(player: &PlayerState, msg: ServerMsg) {
    match player.outbound.try_send(msg) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(player_id = %player.player_id, "Outbound queue full, dropping message");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(player_id = %player.player_id, "Outbound queue closed");
        }
    }
}
