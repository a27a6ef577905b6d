//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::command::ScheduledCommand;
use crate::game::grid::{GridCell, WorldPos};
use crate::game::MatchPhase;

fn default_wait() -> f32 {
    1.0
}

/// A command as requested by a client, resolved by the match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandRequest {
    /// Walk to the cell containing world point (x, y)
    Move { x: f32, y: f32 },
    Attack { target_id: Uuid },
    Wait {
        #[serde(default = "default_wait")]
        duration: f32,
    },
    /// Walk to a cell and watch a cone from there
    WatchSector {
        grid_x: i32,
        grid_y: i32,
        /// Facing in radians
        direction: f32,
        /// Full cone width in radians
        cone_angle: f32,
        duration: f32,
    },
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Queue for a match
    JoinMatch {
        /// Display name, generated when absent
        #[serde(default)]
        name: Option<String>,
    },

    PlanMove {
        unit_id: Uuid,
        /// World coordinates of the destination
        x: f32,
        y: f32,
    },

    PlanAttack {
        unit_id: Uuid,
        target_id: Uuid,
    },

    PlanWait {
        unit_id: Uuid,
        #[serde(default = "default_wait")]
        duration: f32,
    },

    PlanWatchSector {
        unit_id: Uuid,
        grid_x: i32,
        grid_y: i32,
        direction: f32,
        cone_angle: f32,
        duration: f32,
    },

    /// Drop one command from a unit's timeline
    RemoveCommand {
        unit_id: Uuid,
        index: usize,
    },

    /// Place a command at a given timeline position
    InsertCommand {
        unit_id: Uuid,
        index: usize,
        command: CommandRequest,
    },

    /// Lobby readiness while waiting, end-of-planning readiness while planning
    SetReady {
        ready: bool,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current match
    LeaveMatch,
}

impl ClientMsg {
    /// Unit id and command for the planning messages, None otherwise
    pub fn into_plan(self) -> Option<(Uuid, CommandRequest, Option<usize>)> {
        match self {
            ClientMsg::PlanMove { unit_id, x, y } => {
                Some((unit_id, CommandRequest::Move { x, y }, None))
            }
            ClientMsg::PlanAttack { unit_id, target_id } => {
                Some((unit_id, CommandRequest::Attack { target_id }, None))
            }
            ClientMsg::PlanWait { unit_id, duration } => {
                Some((unit_id, CommandRequest::Wait { duration }, None))
            }
            ClientMsg::PlanWatchSector {
                unit_id,
                grid_x,
                grid_y,
                direction,
                cone_angle,
                duration,
            } => Some((
                unit_id,
                CommandRequest::WatchSector {
                    grid_x,
                    grid_y,
                    direction,
                    cone_angle,
                    duration,
                },
                None,
            )),
            ClientMsg::InsertCommand {
                unit_id,
                index,
                command,
            } => Some((unit_id, command, Some(index))),
            _ => None,
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        player_id: Uuid,
        server_time: u64,
    },

    /// Confirmation of match join
    MatchJoined {
        match_id: Uuid,
        player_id: Uuid,
        color: String,
        /// Seed the obstacle layout was generated from
        seed: u64,
    },

    /// Per-player, visibility-filtered match state
    GameState(GameStateView),

    /// A planning command was refused
    CommandError {
        message: String,
        kind: CommandErrorKind,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Machine-readable reason for a refused command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandErrorKind {
    /// The command would run past the end of the execution window
    TimelineFull,
    /// No route to the requested cell
    NoPath,
    /// Malformed values, e.g. a non-positive duration
    InvalidCommand,
}

/// Match state as seen by one player
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateView {
    pub phase: MatchPhase,
    /// Whole seconds left in the planning countdown
    pub planning_time_left: u32,
    pub units: Vec<UnitView>,
    pub players: Vec<PlayerInfo>,
    pub obstacles: Vec<GridCell>,
    /// Execution clock, only while executing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionClock>,
    #[serde(default)]
    pub collisions: Vec<CollisionEvent>,
    #[serde(default)]
    pub shooting_effects: Vec<ShootingEffect>,
    /// Set once the match has ended with a surviving player
    pub winner: Option<Uuid>,
}

/// Unit state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitView {
    pub id: Uuid,
    pub player_id: Uuid,
    /// World position
    pub x: f32,
    pub y: f32,
    pub grid_x: i32,
    pub grid_y: i32,
    pub health: f32,
    pub max_health: f32,
    pub damage: f32,
    pub attack_range: i32,
    pub sector_range: i32,
    pub vision_range: i32,
    pub selected: bool,
    /// Planned commands, empty for enemy units while planning
    pub commands: Vec<ScheduledCommand>,
    /// Index of the command being executed
    pub current_command: Option<usize>,
    pub is_moving: bool,
    pub is_watching: bool,
}

/// Player info for the roster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: Uuid,
    pub name: String,
    pub color: String,
    pub ready: bool,
    pub planning_ready: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionClock {
    pub elapsed: f32,
    pub total: f32,
}

/// A unit entered a cell shared with another unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionEvent {
    pub unit_id: Uuid,
    pub amount: f32,
    pub cell: GridCell,
}

/// A shot for the client to animate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShootingEffect {
    pub shooter_id: Uuid,
    pub target_id: Uuid,
    pub from: WorldPos,
    pub to: WorldPos,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plan_wait_with_default_duration() {
        let unit_id = Uuid::new_v4();
        let json = format!(r#"{{"type":"plan_wait","unit_id":"{unit_id}"}}"#);
        let msg: ClientMsg = serde_json::from_str(&json).unwrap();
        let (id, request, index) = msg.into_plan().unwrap();
        assert_eq!(id, unit_id);
        assert_eq!(request, CommandRequest::Wait { duration: 1.0 });
        assert_eq!(index, None);
    }

    #[test]
    fn parses_insert_command() {
        let unit_id = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"insert_command","unit_id":"{unit_id}","index":2,
                "command":{{"type":"move","x":100.0,"y":60.0}}}}"#
        );
        let msg: ClientMsg = serde_json::from_str(&json).unwrap();
        let (_, request, index) = msg.into_plan().unwrap();
        assert_eq!(request, CommandRequest::Move { x: 100.0, y: 60.0 });
        assert_eq!(index, Some(2));
    }

    #[test]
    fn non_plan_messages_have_no_plan() {
        assert!(ClientMsg::SetReady { ready: true }.into_plan().is_none());
        assert!(ClientMsg::LeaveMatch.into_plan().is_none());
    }

    #[test]
    fn command_error_wire_format() {
        let msg = ServerMsg::CommandError {
            message: "full".to_string(),
            kind: CommandErrorKind::TimelineFull,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "command_error");
        assert_eq!(json["kind"], "timeline_full");
    }
}
