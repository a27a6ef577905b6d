//! Matchmaking service - manages sessions, the queue and match seating

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::{MatchHandle, MatchInput, MatchRegistry, PlayerInput};
use crate::ws::protocol::ServerMsg;

use super::queue::{MatchmakingQueue, QueuedPlayer};

/// How often the queue is drained into matches
const QUEUE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("already in a match")]
    AlreadyInMatch,

    #[error("session is not registered")]
    UnknownSession,
}

/// Matchmaking service
pub struct MatchmakingService {
    queue: Mutex<MatchmakingQueue>,
    registry: Arc<MatchRegistry>,
    config: Arc<GameConfig>,
    /// Outbound channel of every connected session
    sessions: DashMap<Uuid, mpsc::Sender<ServerMsg>>,
}

impl MatchmakingService {
    pub fn new(registry: Arc<MatchRegistry>, config: Arc<GameConfig>) -> Self {
        Self {
            queue: Mutex::new(MatchmakingQueue::new()),
            registry,
            config,
            sessions: DashMap::new(),
        }
    }

    /// Register a session (called when WebSocket connects)
    pub fn register_session(&self, player_id: Uuid, outbound: mpsc::Sender<ServerMsg>) {
        self.sessions.insert(player_id, outbound);
    }

    /// Forget a session (called when WebSocket disconnects)
    pub async fn unregister_session(&self, player_id: Uuid) {
        self.sessions.remove(&player_id);
        self.leave(player_id).await;
        info!(player_id = %player_id, "Session unregistered from matchmaking");
    }

    /// Join matchmaking queue
    pub async fn join_queue(
        &self,
        player_id: Uuid,
        name: Option<String>,
    ) -> Result<(), MatchmakingError> {
        if self.registry.find_by_player(&player_id).is_some() {
            return Err(MatchmakingError::AlreadyInMatch);
        }
        let outbound = self
            .sessions
            .get(&player_id)
            .map(|s| s.value().clone())
            .ok_or(MatchmakingError::UnknownSession)?;

        let mut queue = self.queue.lock().await;
        queue.enqueue(QueuedPlayer::new(
            player_id,
            name.unwrap_or_default(),
            outbound,
        ));

        info!(player_id = %player_id, queue_size = queue.len(), "Player joined matchmaking queue");
        Ok(())
    }

    /// Leave the queue and any match; returns true when a match was left
    pub async fn leave(&self, player_id: Uuid) -> bool {
        self.queue.lock().await.dequeue(player_id);

        let Some(match_id) = self.registry.unassign_player(&player_id) else {
            return false;
        };
        if let Some(handle) = self.registry.get(&match_id) {
            if handle
                .input_tx
                .send(MatchInput::Leave { player_id })
                .await
                .is_err()
            {
                debug!(match_id = %match_id, "Match already closed");
            }
        }
        true
    }

    /// Forward a message to the player's match
    pub async fn route_input(&self, input: PlayerInput) {
        let player_id = input.player_id;
        let Some(handle) = self.registry.find_by_player(&player_id) else {
            debug!(player_id = %player_id, "Input from player without a match");
            return;
        };
        if handle.input_tx.send(MatchInput::Player(input)).await.is_err() {
            warn!(player_id = %player_id, match_id = %handle.id, "Failed to send input to match");
        }
    }

    /// Seat every queued player, filling waiting matches before opening new ones
    pub async fn process_queue(&self) {
        let players = self.queue.lock().await.drain_connected();
        for player in players {
            self.seat(player).await;
        }
    }

    async fn seat(&self, player: QueuedPlayer) {
        if let Some(handle) = self.registry.find_available_match() {
            if self.try_join(&handle, &player).await {
                return;
            }
        }

        let handle = self.registry.create(self.config.clone());
        if !self.try_join(&handle, &player).await {
            warn!(player_id = %player.player_id, match_id = %handle.id, "New match refused player");
        }
    }

    async fn try_join(&self, handle: &MatchHandle, player: &QueuedPlayer) -> bool {
        let joined = handle
            .join(player.player_id, player.name.clone(), player.outbound.clone())
            .await;
        if !joined {
            return false;
        }

        self.registry.assign_player(player.player_id, handle.id);
        info!(
            player_id = %player.player_id,
            match_id = %handle.id,
            waited_ms = player.wait_time().as_millis() as u64,
            "Player seated"
        );

        // Disconnected while the join was in flight
        if !self.sessions.contains_key(&player.player_id) {
            self.leave(player.player_id).await;
        }
        true
    }

    /// Run the matchmaking service (periodic queue processing)
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(QUEUE_INTERVAL);

        loop {
            interval.tick().await;
            self.process_queue().await;
        }
    }

    /// Get current queue size
    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Number of connected sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::MatchPhase;

    fn service() -> (MatchmakingService, Arc<MatchRegistry>) {
        let registry = Arc::new(MatchRegistry::new());
        let config = Arc::new(GameConfig {
            obstacle_density: 0.0,
            ..GameConfig::default()
        });
        (MatchmakingService::new(registry.clone(), config), registry)
    }

    fn connect(service: &MatchmakingService) -> (Uuid, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(64);
        let player_id = Uuid::new_v4();
        service.register_session(player_id, tx);
        (player_id, rx)
    }

    #[test]
    fn queue_requires_a_session() {
        tokio_test::block_on(async {
            let (service, _) = service();
            let result = service.join_queue(Uuid::new_v4(), None).await;
            assert!(matches!(result, Err(MatchmakingError::UnknownSession)));
            assert_eq!(service.queue_size().await, 0);
        });
    }

    #[test]
    fn queued_players_share_a_match() {
        tokio_test::block_on(async {
            let (service, registry) = service();
            let (a, _rx_a) = connect(&service);
            let (b, _rx_b) = connect(&service);

            service.join_queue(a, Some("alice".to_string())).await.unwrap();
            service.join_queue(b, None).await.unwrap();
            assert_eq!(service.queue_size().await, 2);

            service.process_queue().await;
            assert_eq!(service.queue_size().await, 0);
            assert_eq!(registry.active_matches(), 1);

            let match_a = registry.find_by_player(&a).unwrap();
            let match_b = registry.find_by_player(&b).unwrap();
            assert_eq!(match_a.id, match_b.id);
            assert_eq!(match_a.phase(), MatchPhase::Planning);
            assert_eq!(registry.total_players(), 2);

            assert!(matches!(
                service.join_queue(a, None).await,
                Err(MatchmakingError::AlreadyInMatch)
            ));
        });
    }

    #[test]
    fn full_match_opens_a_new_one() {
        tokio_test::block_on(async {
            let (service, registry) = service();
            let mut receivers = Vec::new();
            for _ in 0..3 {
                let (player_id, rx) = connect(&service);
                service.join_queue(player_id, None).await.unwrap();
                receivers.push(rx);
            }

            service.process_queue().await;
            assert_eq!(registry.active_matches(), 2);
            assert_eq!(registry.total_players(), 3);
        });
    }

    #[test]
    fn leaving_releases_the_seat() {
        tokio_test::block_on(async {
            let (service, registry) = service();
            let (a, _rx) = connect(&service);
            service.join_queue(a, None).await.unwrap();
            service.process_queue().await;
            assert!(registry.find_by_player(&a).is_some());

            assert!(service.leave(a).await);
            assert!(registry.find_by_player(&a).is_none());
            assert!(!service.leave(a).await);
        });
    }

    #[test]
    fn unregister_drops_queued_player() {
        tokio_test::block_on(async {
            let (service, _) = service();
            let (a, _rx) = connect(&service);
            service.join_queue(a, None).await.unwrap();
            service.unregister_session(a).await;
            assert_eq!(service.queue_size().await, 0);
            assert_eq!(service.session_count(), 0);
        });
    }
}
