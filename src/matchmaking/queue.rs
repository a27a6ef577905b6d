//! Matchmaking queue implementation

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

/// Player in the matchmaking queue
#[derive(Debug, Clone)]
pub struct QueuedPlayer {
    pub player_id: Uuid,
    pub name: String,
    /// Session channel the match will deliver to
    pub outbound: mpsc::Sender<ServerMsg>,
    pub queued_at: Instant,
}

impl QueuedPlayer {
    pub fn new(player_id: Uuid, name: String, outbound: mpsc::Sender<ServerMsg>) -> Self {
        Self {
            player_id,
            name,
            outbound,
            queued_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }

    /// The session behind this entry has gone away
    pub fn is_disconnected(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// First-come, first-served queue of players waiting for a seat
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queue: VecDeque<QueuedPlayer>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player to the queue
    pub fn enqueue(&mut self, player: QueuedPlayer) {
        // Remove if already in queue (rejoin)
        self.queue.retain(|p| p.player_id != player.player_id);
        self.queue.push_back(player);
    }

    /// Remove a player from the queue
    pub fn dequeue(&mut self, player_id: Uuid) -> Option<QueuedPlayer> {
        let pos = self.queue.iter().position(|p| p.player_id == player_id)?;
        self.queue.remove(pos)
    }

    /// Check if a player is in the queue
    pub fn contains(&self, player_id: &Uuid) -> bool {
        self.queue.iter().any(|p| &p.player_id == player_id)
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Empty the queue, keeping only players whose session is still open
    pub fn drain_connected(&mut self) -> Vec<QueuedPlayer> {
        self.queue
            .drain(..)
            .filter(|p| !p.is_disconnected())
            .collect()
    }
}
