//! Time utilities for the match clocks and server uptime

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Planning countdown step
pub const PLANNING_TICK: Duration = Duration::from_secs(1);

/// Period of the execution tick for a given rate
pub fn tick_interval(ticks_per_second: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(ticks_per_second.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_hertz_is_fifty_millis() {
        assert_eq!(tick_interval(20), Duration::from_millis(50));
    }

    #[test]
    fn zero_rate_does_not_divide_by_zero() {
        assert_eq!(tick_interval(0), Duration::from_secs(1));
    }
}
