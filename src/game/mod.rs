//! Game simulation modules

pub mod combat;
pub mod command;
pub mod grid;
pub mod r#match;
pub mod pathfinding;
pub mod snapshot;
pub mod unit;
pub mod visibility;

pub use r#match::{MatchHandle, MatchPhase, MatchRegistry};

use crate::ws::protocol::{ClientMsg, ServerMsg};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Player message received from WebSocket
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub player_id: Uuid,
    pub msg: ClientMsg,
}

/// Everything a match task consumes, in arrival order
#[derive(Debug)]
pub enum MatchInput {
    /// Seat a player; the reply says whether they were accepted
    Join {
        player_id: Uuid,
        name: String,
        outbound: mpsc::Sender<ServerMsg>,
        reply: oneshot::Sender<bool>,
    },
    Player(PlayerInput),
    /// Connection closed or player left
    Leave { player_id: Uuid },
}
