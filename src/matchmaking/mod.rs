//! Matchmaking: queueing connected players and seating them in matches

pub mod queue;
pub mod service;

pub use service::{MatchmakingError, MatchmakingService};
