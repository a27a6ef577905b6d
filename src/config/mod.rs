//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Number of spawn layouts the map supports
pub const MAX_SPAWN_SLOTS: usize = 4;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated), empty allows any
    pub client_origin: String,
    /// Match rules shared by every match on this server
    pub game: GameConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_default(),

            game: GameConfig::from_env()?,
        })
    }
}

/// Rules and timings of a match
#[derive(Clone, Debug, PartialEq)]
pub struct GameConfig {
    /// Map width in world units
    pub map_width: f32,
    /// Map height in world units
    pub map_height: f32,
    /// Edge length of one grid cell in world units
    pub cell_size: f32,
    /// Planning countdown in whole seconds
    pub planning_secs: u32,
    /// Length of the execution window, and of every unit's timeline (seconds)
    pub timeline_secs: f32,
    /// Seconds needed to cross one cell
    pub time_per_cell: f32,
    /// Duration of an attack command (seconds)
    pub attack_secs: f32,
    /// Players needed before planning starts
    pub min_players: usize,
    /// Player capacity of a match
    pub max_players: usize,
    /// Units spawned per player
    pub units_per_player: usize,
    /// Share of grid cells turned into obstacles
    pub obstacle_density: f32,
    /// Execution ticks per second
    pub execution_tps: u32,
    /// Percent of max health lost per tick while sharing a cell
    pub collision_damage_pct: u32,
    /// Damage of one sector-watch hit
    pub sector_damage: f32,
    /// Unit base stats
    pub unit_health: f32,
    pub unit_damage: f32,
    pub attack_range: i32,
    pub sector_range: i32,
    pub vision_range: i32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            map_width: 800.0,
            map_height: 600.0,
            cell_size: 40.0,
            planning_secs: 60,
            timeline_secs: 20.0,
            time_per_cell: 0.5,
            attack_secs: 5.0,
            min_players: 2,
            max_players: 2,
            units_per_player: 3,
            obstacle_density: 0.15,
            execution_tps: 20,
            collision_damage_pct: 30,
            sector_damage: 5.0,
            unit_health: 100.0,
            unit_damage: 25.0,
            attack_range: 2,
            sector_range: 5,
            vision_range: 4,
        }
    }
}

impl GameConfig {
    /// Defaults overridden by any game variables present in the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            planning_secs: env_or("PLANNING_SECS", defaults.planning_secs)?,
            timeline_secs: env_or("TIMELINE_SECS", defaults.timeline_secs)?,
            time_per_cell: env_or("TIME_PER_CELL", defaults.time_per_cell)?,
            attack_secs: env_or("ATTACK_SECS", defaults.attack_secs)?,
            min_players: env_or("MIN_PLAYERS", defaults.min_players)?,
            max_players: env_or("MAX_PLAYERS", defaults.max_players)?,
            obstacle_density: env_or("OBSTACLE_DENSITY", defaults.obstacle_density)?,
            execution_tps: env_or("EXECUTION_TPS", defaults.execution_tps)?,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject rule combinations a match cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_players == 0
            || self.max_players > MAX_SPAWN_SLOTS
            || self.min_players > self.max_players
        {
            return Err(ConfigError::Invalid("MIN_PLAYERS/MAX_PLAYERS"));
        }
        if !(0.0..0.5).contains(&self.obstacle_density) {
            return Err(ConfigError::Invalid("OBSTACLE_DENSITY"));
        }
        if self.timeline_secs <= 0.0 || self.time_per_cell <= 0.0 {
            return Err(ConfigError::Invalid("TIMELINE_SECS/TIME_PER_CELL"));
        }
        if self.execution_tps == 0 {
            return Err(ConfigError::Invalid("EXECUTION_TPS"));
        }
        Ok(())
    }

    /// Grid width in cells
    pub fn grid_width(&self) -> i32 {
        (self.map_width / self.cell_size).ceil() as i32
    }

    /// Grid height in cells
    pub fn grid_height(&self) -> i32 {
        (self.map_height / self.cell_size).ceil() as i32
    }
}

fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grid_is_twenty_by_fifteen() {
        let config = GameConfig::default();
        assert_eq!(config.grid_width(), 20);
        assert_eq!(config.grid_height(), 15);
    }

    #[test]
    fn env_or_falls_back_to_default() {
        let value: u32 = env_or("TACTICS_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn malformed_value_is_invalid() {
        env::set_var("TACTICS_TEST_MALFORMED_PLAYERS", "two");
        let result: Result<usize, _> = env_or("TACTICS_TEST_MALFORMED_PLAYERS", 2);
        env::remove_var("TACTICS_TEST_MALFORMED_PLAYERS");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid("TACTICS_TEST_MALFORMED_PLAYERS"))
        ));
    }

    #[test]
    fn defaults_are_valid() {
        assert!(GameConfig::default().validate().is_ok());
    }

    #[test]
    fn player_bounds_are_checked() {
        let invalid = [(3, 2), (2, MAX_SPAWN_SLOTS + 1), (0, 2)];
        for (min_players, max_players) in invalid {
            let config = GameConfig {
                min_players,
                max_players,
                ..GameConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid("MIN_PLAYERS/MAX_PLAYERS"))
            ));
        }

        let four = GameConfig {
            max_players: MAX_SPAWN_SLOTS,
            ..GameConfig::default()
        };
        assert!(four.validate().is_ok());
    }

    #[test]
    fn obstacle_density_must_stay_below_half() {
        for obstacle_density in [-0.1, 0.5, 0.9] {
            let config = GameConfig {
                obstacle_density,
                ..GameConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid("OBSTACLE_DENSITY"))
            ));
        }

        let open = GameConfig {
            obstacle_density: 0.0,
            ..GameConfig::default()
        };
        assert!(open.validate().is_ok());
    }

    #[test]
    fn timings_must_be_positive() {
        let no_window = GameConfig {
            timeline_secs: 0.0,
            ..GameConfig::default()
        };
        assert!(no_window.validate().is_err());

        let no_ticks = GameConfig {
            execution_tps: 0,
            ..GameConfig::default()
        };
        assert!(matches!(
            no_ticks.validate(),
            Err(ConfigError::Invalid("EXECUTION_TPS"))
        ));
    }
}
