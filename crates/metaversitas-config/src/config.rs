//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Remote session service settings.
    pub network: NetworkConfig,
    /// Fixed-tick simulation settings.
    pub simulation: SimulationConfig,
    /// Interaction tuning.
    pub interaction: InteractionConfig,
    /// Session created when auto-connect is enabled.
    pub session: SessionConfig,
    /// Input settings.
    pub input: InputConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Remote session service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Preferred service region (empty = best region).
    pub region: String,
    /// Custom lobby to list sessions from.
    pub lobby_id: String,
    /// Use shared topology instead of client/server.
    pub shared_mode: bool,
    /// Start the auto session immediately instead of showing the intro.
    pub auto_connect: bool,
    /// Maximum participants per session.
    pub player_limit: u32,
}

/// Simulation loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed simulation tick rate in Hz.
    pub tick_rate: u32,
    /// Maximum simulation ticks run per rendered frame.
    pub max_fixed_steps: u32,
}

/// Interaction configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InteractionConfig {
    /// Delay between two interact/uninteract presses, in seconds of
    /// simulation time.
    pub cooldown_secs: f32,
}

/// Session descriptor used for auto-connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Room name.
    pub room_name: String,
    /// Room password (empty = open room).
    pub room_password: String,
    /// Start map name (e.g. "LabFisika").
    pub start_map: String,
    /// Play mode name (e.g. "LabFisika").
    pub play_mode: String,
    /// Meeting label shown in staging.
    pub meeting: String,
    /// Allow participants to join after the session started.
    pub allow_late_join: bool,
}

/// Input configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    /// Mouse sensitivity multiplier.
    pub mouse_sensitivity: f32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            lobby_id: "metaversitas".to_string(),
            shared_mode: false,
            auto_connect: false,
            player_limit: 20,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_fixed_steps: 10,
        }
    }
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self { cooldown_secs: 1.0 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room_name: "Room1".to_string(),
            room_password: String::new(),
            start_map: "LabFisika".to_string(),
            play_mode: "LabFisika".to_string(),
            meeting: "Pertemuan 1".to_string(),
            allow_late_join: true,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            mouse_sensitivity: 1.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Load / Save / Reload ---

/// Platform config directory for the client (`<config dir>/metaversitas`).
///
/// Falls back to the working directory when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("metaversitas"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.simulation.tick_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "simulation.tick_rate",
                reason: "must be at least 1 Hz",
            });
        }
        if self.simulation.max_fixed_steps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "simulation.max_fixed_steps",
                reason: "must be at least 1",
            });
        }
        if !self.interaction.cooldown_secs.is_finite() || self.interaction.cooldown_secs < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "interaction.cooldown_secs",
                reason: "must be a non-negative number of seconds",
            });
        }
        Ok(())
    }

    /// Interaction cooldown converted to simulation ticks, rounded up and
    /// never below one tick.
    pub fn interaction_cooldown_ticks(&self) -> u32 {
        let ticks = (self.interaction.cooldown_secs.max(0.0) * self.simulation.tick_rate as f32)
            .ceil() as u32;
        ticks.max(1)
    }
}
