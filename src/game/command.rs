//! Unit commands and the per-unit command timeline

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GameConfig;

use super::grid::GridCell;

/// Float slack when comparing accumulated timeline offsets to the budget
const TIME_EPSILON: f32 = 1e-4;

/// A command a unit can execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Walk a path, first cell is where the unit stands
    Move { path: Vec<GridCell> },
    /// Strike a unit at the end of the attack window
    Attack { target_id: Uuid },
    /// Stand still
    Wait { duration: f32 },
    /// Walk to `origin` along `approach`, then fire at enemies inside the cone
    WatchSector {
        origin: GridCell,
        /// Facing, radians, grid space (y grows downward)
        direction: f32,
        /// Full cone width in radians
        cone_angle: f32,
        /// Time spent watching once at the origin
        watch_duration: f32,
        approach: Vec<GridCell>,
    },
}

/// Timings used to size commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineRules {
    pub budget: f32,
    pub time_per_cell: f32,
    pub attack_duration: f32,
}

impl TimelineRules {
    pub fn from_config(config: &GameConfig) -> Self {
        Self {
            budget: config.timeline_secs,
            time_per_cell: config.time_per_cell,
            attack_duration: config.attack_secs,
        }
    }
}

impl Command {
    /// Duration this command occupies on a timeline
    pub fn duration(&self, rules: &TimelineRules) -> f32 {
        match self {
            Command::Move { path } => steps(path) * rules.time_per_cell,
            Command::Attack { .. } => rules.attack_duration,
            Command::Wait { duration } => *duration,
            Command::WatchSector {
                watch_duration,
                approach,
                ..
            } => steps(approach) * rules.time_per_cell + watch_duration,
        }
    }

    /// Cell the unit stands on once this command is done, if it moves the unit
    pub fn destination(&self) -> Option<GridCell> {
        match self {
            Command::Move { path } => path.last().copied(),
            Command::WatchSector { origin, .. } => Some(*origin),
            Command::Attack { .. } | Command::Wait { .. } => None,
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Move { .. } => "move",
            Command::Attack { .. } => "attack",
            Command::Wait { .. } => "wait",
            Command::WatchSector { .. } => "watch_sector",
        }
    }

    fn validate(&self, duration: f32) -> Result<(), TimelineError> {
        if let Command::Move { path } = self {
            if path.len() < 2 {
                return Err(TimelineError::EmptyPath);
            }
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(TimelineError::InvalidDuration(duration));
        }
        Ok(())
    }
}

fn steps(path: &[GridCell]) -> f32 {
    path.len().saturating_sub(1) as f32
}

/// A command placed on a timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledCommand {
    pub command: Command,
    pub start_time: f32,
    pub duration: f32,
    pub end_time: f32,
    pub executed: bool,
}

/// Timeline errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimelineError {
    #[error("timeline full: command would end at {end:.2}s, limit is {budget:.2}s")]
    Full { end: f32, budget: f32 },

    #[error("invalid command duration {0}")]
    InvalidDuration(f32),

    #[error("move path must contain at least two cells")]
    EmptyPath,
}

/// Ordered, contiguous, budget-bounded schedule of a unit's commands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTimeline {
    commands: Vec<ScheduledCommand>,
}

impl CommandTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[ScheduledCommand] {
        &self.commands
    }

    pub fn get(&self, index: usize) -> Option<&ScheduledCommand> {
        self.commands.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ScheduledCommand> {
        self.commands.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// End offset of the last command, 0 when empty
    pub fn total_length(&self) -> f32 {
        self.commands.last().map(|c| c.end_time).unwrap_or(0.0)
    }

    /// Append a command after the current last one
    pub fn append(
        &mut self,
        command: Command,
        rules: &TimelineRules,
    ) -> Result<&ScheduledCommand, TimelineError> {
        let duration = self.check_fits(&command, rules)?;
        let start_time = self.total_length();

        self.commands.push(ScheduledCommand {
            command,
            start_time,
            duration,
            end_time: start_time + duration,
            executed: false,
        });

        Ok(&self.commands[self.commands.len() - 1])
    }

    /// Insert a command at `index` (clamped to the end) and reflow the timeline.
    ///
    /// Reordering never changes the total length, so the budget check made
    /// before insertion holds for the reflowed timeline.
    pub fn insert(
        &mut self,
        index: usize,
        command: Command,
        rules: &TimelineRules,
    ) -> Result<&ScheduledCommand, TimelineError> {
        let duration = self.check_fits(&command, rules)?;
        let index = index.min(self.commands.len());

        self.commands.insert(
            index,
            ScheduledCommand {
                command,
                start_time: 0.0,
                duration,
                end_time: duration,
                executed: false,
            },
        );
        self.recalculate();

        Ok(&self.commands[index])
    }

    /// Remove the command at `index`, returns None for an unknown index
    pub fn remove(&mut self, index: usize) -> Option<ScheduledCommand> {
        if index >= self.commands.len() {
            return None;
        }
        let removed = self.commands.remove(index);
        self.recalculate();
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Flag every command as done so nothing carries into the next round
    pub fn mark_all_executed(&mut self) {
        for command in &mut self.commands {
            command.executed = true;
        }
    }

    /// Index of the earliest unexecuted command due at `now`
    pub fn next_due(&self, now: f32) -> Option<usize> {
        self.commands
            .iter()
            .position(|c| !c.executed && c.start_time <= now + TIME_EPSILON)
    }

    /// Cell the unit will stand on after its whole chain has run
    pub fn end_of_chain(&self, current: GridCell) -> GridCell {
        self.position_before(self.commands.len(), current)
    }

    /// Cell the unit will stand on just before command `index` starts
    pub fn position_before(&self, index: usize, current: GridCell) -> GridCell {
        self.commands[..index.min(self.commands.len())]
            .iter()
            .rev()
            .find_map(|c| c.command.destination())
            .unwrap_or(current)
    }

    fn check_fits(&self, command: &Command, rules: &TimelineRules) -> Result<f32, TimelineError> {
        let duration = command.duration(rules);
        command.validate(duration)?;

        let end = self.total_length() + duration;
        if end > rules.budget + TIME_EPSILON {
            return Err(TimelineError::Full {
                end,
                budget: rules.budget,
            });
        }
        Ok(duration)
    }

    fn recalculate(&mut self) {
        let mut time = 0.0;
        for command in &mut self.commands {
            command.start_time = time;
            command.end_time = time + command.duration;
            time = command.end_time;
        }
    }
}
