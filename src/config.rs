//! Server configuration module
//!
//! Handles loading and parsing of server configuration from files and environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::game::world::WorldSettings;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Server name shown in the welcome message
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Address the WebSocket listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// WebSocket port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Seconds without any inbound frame before a connection is reaped (0 to disable)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Frames buffered per connection before a send counts as failed
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Path to data files (area saves)
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Development mode flag (turns the editor on)
    #[serde(default)]
    pub dev_mode: bool,

    /// Allow clients to place and remove world objects
    #[serde(default)]
    pub editor_enabled: bool,

    /// Autosave interval in seconds (0 to disable)
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,

    /// Number of hostile test creatures seeded at startup
    #[serde(default)]
    pub test_creatures: u32,

    /// Snapshot worker threads (0 = available CPU parallelism)
    #[serde(default)]
    pub snapshot_workers: usize,

    /// Simulation tuning
    #[serde(default)]
    pub world: WorldConfig,

    /// Combat tuning
    #[serde(default)]
    pub combat: CombatConfig,
}

/// Simulation and spatial index tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Name of the area players join
    #[serde(default = "default_area_name")]
    pub area_name: String,

    /// Tick period in milliseconds
    #[serde(default = "default_tick_rate")]
    pub tick_rate_ms: u64,

    /// Chunk edge length in world units
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Default snapshot radius in chunks
    #[serde(default = "default_view_radius")]
    pub view_radius: u32,

    /// Upper bound for client-requested snapshot radius
    #[serde(default = "default_max_view_radius")]
    pub max_view_radius: u32,

    /// Collision scan radius in chunks
    #[serde(default = "default_collision_radius")]
    pub collision_radius: u32,

    /// Cardinal step length per tick
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,

    /// Entity-entity contact threshold
    #[serde(default = "default_contact_distance")]
    pub contact_distance: f32,

    /// Entity-object blocking threshold
    #[serde(default = "default_blocking_distance")]
    pub blocking_distance: f32,

    /// Ticks a player's move direction survives without fresh input
    #[serde(default = "default_lag_tolerance")]
    pub lag_tolerance_ticks: u64,

    /// Players spawn within this many units of the centre
    #[serde(default = "default_spawn_radius")]
    pub spawn_radius: u32,

    /// Ticks between chunk cache purges
    #[serde(default = "default_cache_purge_interval")]
    pub cache_purge_interval: u64,

    /// Caches unread for this many ticks are dropped on purge
    #[serde(default = "default_cache_max_idle")]
    pub cache_max_idle: u64,
}

/// Combat and healing balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatConfig {
    #[serde(default = "default_max_health")]
    pub max_health: i16,

    /// Attack lands every N ticks
    #[serde(default = "default_attack_cadence")]
    pub attack_cadence: u64,

    #[serde(default = "default_attack_damage")]
    pub attack_damage: i16,

    /// Heal lands every N ticks
    #[serde(default = "default_heal_cadence")]
    pub heal_cadence: u64,

    #[serde(default = "default_heal_amount")]
    pub heal_amount: i16,

    /// Health subtracted when an entity becomes injured
    #[serde(default = "default_grace_penalty")]
    pub grace_penalty: i16,

    #[serde(default = "default_attack_range")]
    pub attack_range: f32,

    #[serde(default = "default_heal_range")]
    pub heal_range: f32,

    /// Extra distance tolerated before a link is torn down
    #[serde(default = "default_range_grace")]
    pub range_grace: f32,

    /// Creatures chase players within this distance
    #[serde(default = "default_aggro_distance")]
    pub aggro_distance: f32,
}

// Default value functions
fn default_server_name() -> String {
    "Gommo".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    50_000
}

fn default_read_timeout() -> u64 {
    0
}

fn default_outbound_queue() -> usize {
    64
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_autosave_interval() -> u64 {
    300 // 5 minutes
}

fn default_area_name() -> String {
    "test".to_string()
}

fn default_tick_rate() -> u64 {
    66 // ~15 ticks per second
}

fn default_chunk_size() -> u32 {
    256
}

fn default_view_radius() -> u32 {
    2
}

fn default_max_view_radius() -> u32 {
    4
}

fn default_collision_radius() -> u32 {
    1
}

fn default_move_speed() -> f32 {
    12.0
}

fn default_contact_distance() -> f32 {
    24.0
}

fn default_blocking_distance() -> f32 {
    24.0
}

fn default_lag_tolerance() -> u64 {
    30
}

fn default_spawn_radius() -> u32 {
    128
}

fn default_cache_purge_interval() -> u64 {
    300
}

fn default_cache_max_idle() -> u64 {
    150
}

fn default_max_health() -> i16 {
    100
}

fn default_attack_cadence() -> u64 {
    10
}

fn default_attack_damage() -> i16 {
    10
}

fn default_heal_cadence() -> u64 {
    8
}

fn default_heal_amount() -> i16 {
    5
}

fn default_grace_penalty() -> i16 {
    25
}

fn default_attack_range() -> f32 {
    40.0
}

fn default_heal_range() -> f32 {
    40.0
}

fn default_range_grace() -> f32 {
    16.0
}

fn default_aggro_distance() -> f32 {
    400.0
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            area_name: default_area_name(),
            tick_rate_ms: default_tick_rate(),
            chunk_size: default_chunk_size(),
            view_radius: default_view_radius(),
            max_view_radius: default_max_view_radius(),
            collision_radius: default_collision_radius(),
            move_speed: default_move_speed(),
            contact_distance: default_contact_distance(),
            blocking_distance: default_blocking_distance(),
            lag_tolerance_ticks: default_lag_tolerance(),
            spawn_radius: default_spawn_radius(),
            cache_purge_interval: default_cache_purge_interval(),
            cache_max_idle: default_cache_max_idle(),
        }
    }
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            max_health: default_max_health(),
            attack_cadence: default_attack_cadence(),
            attack_damage: default_attack_damage(),
            heal_cadence: default_heal_cadence(),
            heal_amount: default_heal_amount(),
            grace_penalty: default_grace_penalty(),
            attack_range: default_attack_range(),
            heal_range: default_heal_range(),
            range_grace: default_range_grace(),
            aggro_distance: default_aggro_distance(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            server_name: default_server_name(),
            bind_address: default_bind_address(),
            port: default_port(),
            max_connections: default_max_connections(),
            read_timeout_secs: default_read_timeout(),
            outbound_queue: default_outbound_queue(),
            data_path: default_data_path(),
            dev_mode: false,
            editor_enabled: false,
            autosave_interval_secs: default_autosave_interval(),
            test_creatures: 0,
            snapshot_workers: 0,
            world: WorldConfig::default(),
            combat: CombatConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("GOMMO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        // Try to load from file
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;

        // Override with environment variables
        config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document, filling unspecified fields with defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("GOMMO_SERVER_NAME") {
            self.server_name = val;
        }
        if let Ok(val) = env::var("GOMMO_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Ok(val) = env::var("GOMMO_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = env::var("GOMMO_DATA_PATH") {
            self.data_path = PathBuf::from(val);
        }
        if let Ok(val) = env::var("GOMMO_MAX_CONNECTIONS") {
            if let Ok(max) = val.parse() {
                self.max_connections = max;
            }
        }
        if let Ok(val) = env::var("GOMMO_TICK_RATE_MS") {
            if let Ok(rate) = val.parse() {
                self.world.tick_rate_ms = rate;
            }
        }
        if let Ok(val) = env::var("GOMMO_DEV_MODE") {
            self.dev_mode = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("GOMMO_TEST_CREATURES") {
            if let Ok(count) = val.parse() {
                self.test_creatures = count;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let world = &self.world;
        let combat = &self.combat;

        if world.tick_rate_ms < 15 || world.tick_rate_ms > 150 {
            anyhow::bail!("Tick rate must be between 15ms and 150ms");
        }

        if world.chunk_size == 0 {
            anyhow::bail!("Chunk size must be non-zero");
        }

        // The collision scan must see every entity a single step could touch
        let reach = world.contact_distance.max(world.blocking_distance) + world.move_speed;
        if (world.collision_radius as f32) * (world.chunk_size as f32) < reach {
            anyhow::bail!(
                "Collision radius of {} chunks cannot cover a reach of {} units",
                world.collision_radius,
                reach
            );
        }

        if world.view_radius > world.max_view_radius {
            anyhow::bail!("View radius must not exceed max view radius");
        }

        if combat.attack_cadence == 0 || combat.heal_cadence == 0 {
            anyhow::bail!("Combat cadences must be non-zero");
        }

        if combat.max_health <= 0 {
            anyhow::bail!("Max health must be positive");
        }

        if self.max_connections == 0 {
            anyhow::bail!("Max connections must be non-zero");
        }

        if self.outbound_queue == 0 {
            anyhow::bail!("Outbound queue must hold at least one frame");
        }

        Ok(())
    }

    /// Socket address string for the listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Tick period as a duration
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.world.tick_rate_ms)
    }

    /// Autosave interval expressed in ticks, or `None` when disabled
    pub fn autosave_every_ticks(&self) -> Option<u64> {
        if self.autosave_interval_secs == 0 {
            return None;
        }
        let ticks = (self.autosave_interval_secs * 1000) / self.world.tick_rate_ms.max(1);
        Some(ticks.max(1))
    }

    /// Worker count for the snapshot pool
    /// Server-side read deadline, if one is configured
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs))
    }

    pub fn snapshot_worker_count(&self) -> usize {
        if self.snapshot_workers > 0 {
            return self.snapshot_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Simulation settings derived from this configuration
    pub fn world_settings(&self) -> WorldSettings {
        WorldSettings::default()
            .with_name(self.server_name.clone())
            .with_editor(self.editor_enabled || self.dev_mode)
            .with_autosave_interval(self.autosave_every_ticks().unwrap_or(0))
            .with_world(self.world.clone())
            .with_combat(self.combat.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server_name, "Gommo");
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections, 50_000);
        assert_eq!(config.world.tick_rate_ms, 66);
        assert_eq!(config.world.chunk_size, 256);
        assert_eq!(config.combat.max_health, 100);
        assert_eq!(config.autosave_interval_secs, 300);
        assert_eq!(config.read_timeout(), None);
    }

    #[test]
    fn test_read_timeout_opt_in() {
        let config = ServerConfig::from_toml("read_timeout_secs = 45").unwrap();
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            port = 9000
            editor_enabled = true

            [world]
            tick_rate_ms = 50

            [combat]
            grace_penalty = 40
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert!(config.editor_enabled);
        assert_eq!(config.world.tick_rate_ms, 50);
        assert_eq!(config.world.chunk_size, 256);
        assert_eq!(config.combat.grace_penalty, 40);
        assert_eq!(config.combat.attack_cadence, 10);
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let config = ServerConfig::from_toml(include_str!("../config/server.toml")).unwrap();
        let defaults = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.data_path, defaults.data_path);
        assert_eq!(config.world.lag_tolerance_ticks, defaults.world.lag_tolerance_ticks);
        assert_eq!(config.world.cache_max_idle, defaults.world.cache_max_idle);
        assert_eq!(config.combat.aggro_distance, defaults.combat.aggro_distance);
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Tick rate out of range
        config.world.tick_rate_ms = 10;
        assert!(config.validate().is_err());
        config.world.tick_rate_ms = 66;

        // Collision neighbourhood too small
        config.world.collision_radius = 0;
        assert!(config.validate().is_err());
        config.world.collision_radius = 1;

        // View radius above cap
        config.world.view_radius = 5;
        assert!(config.validate().is_err());
        config.world.view_radius = 2;

        // Zero cadence
        config.combat.heal_cadence = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_autosave_ticks() {
        let mut config = ServerConfig::default();
        config.world.tick_rate_ms = 100;
        config.autosave_interval_secs = 10;
        assert_eq!(config.autosave_every_ticks(), Some(100));

        config.autosave_interval_secs = 0;
        assert_eq!(config.autosave_every_ticks(), None);
    }

    #[test]
    fn test_snapshot_worker_count() {
        let mut config = ServerConfig::default();
        assert!(config.snapshot_worker_count() >= 1);
        config.snapshot_workers = 3;
        assert_eq!(config.snapshot_worker_count(), 3);
    }

    #[test]
    fn test_world_settings() {
        let mut config = ServerConfig::default();
        config.editor_enabled = true;
        config.world.tick_rate_ms = 100;
        config.autosave_interval_secs = 10;
        let settings = config.world_settings();
        assert_eq!(settings.name, "Gommo");
        assert!(settings.editor_enabled);
        assert_eq!(settings.autosave_interval, 100);
        assert_eq!(settings.world.tick_rate_ms, 100);

        config.editor_enabled = false;
        assert!(!config.world_settings().editor_enabled);
        config.dev_mode = true;
        assert!(config.world_settings().editor_enabled);
    }
}
