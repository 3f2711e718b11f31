//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Server connection settings.
    pub network: NetworkConfig,
    /// Tick intervals.
    pub session: SessionConfig,
    /// Effect names and alpha tuning.
    pub effects: EffectsConfig,
    /// Remembered login.
    pub profile: ProfileConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Which socket strategy to use.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Blocking socket with a reader thread.
    #[default]
    Blocking,
    /// Non-blocking socket on a tokio runtime.
    Evented,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address.
    pub server_address: String,
    /// Server port.
    pub server_port: u16,
    pub transport: TransportKind,
    /// TCP handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Pause before retrying a would-block read (blocking transport).
    pub read_retry_ms: u64,
    /// Upper bound for a single send in milliseconds (blocking transport).
    pub write_timeout_ms: u64,
    /// Reconnect automatically after an unexpected disconnect.
    pub auto_reconnect: bool,
    /// First reconnect delay in milliseconds.
    pub reconnect_initial_delay_ms: u64,
    /// Upper bound for the reconnect delay in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Attempts before giving up.
    pub reconnect_max_attempts: u32,
}

/// Tick intervals for the client loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds between outbound direction messages.
    pub movement_interval_s: f64,
    /// Seconds between reconciliation passes.
    pub update_interval_s: f64,
}

/// Names of the effects that drive visuals, plus the fallback decay factor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EffectsConfig {
    pub reveal: String,
    pub invisibility: String,
    pub invulnerable: String,
    pub shielded: String,
    /// Used when the join payload does not give the invisibility decay.
    pub default_decay: f64,
}

/// Last successful login.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfileConfig {
    pub last_username: Option<String>,
    pub last_server: Option<String>,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Seconds between leaderboard dumps in the headless client (0 = never).
    pub leaderboard_interval_s: f64,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 8888,
            transport: TransportKind::Blocking,
            connect_timeout_ms: 5000,
            read_retry_ms: 1,
            write_timeout_ms: 2000,
            auto_reconnect: false,
            reconnect_initial_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: 20,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            movement_interval_s: 0.1,
            update_interval_s: 1.0 / 30.0,
        }
    }
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            reveal: "reveal".to_string(),
            invisibility: "invisible".to_string(),
            invulnerable: "invulnerable".to_string(),
            shielded: "shield".to_string(),
            default_decay: 1.5,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            leaderboard_interval_s: 5.0,
        }
    }
}

/// Platform config directory for the client, e.g. `~/.config/slither`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("slither")
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
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

        let config_path = config_dir.join(CONFIG_FILE);
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
        let config_path = config_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.session.movement_interval_s) {
            return Err(ConfigError::Invalid {
                field: "session.movement_interval_s",
                reason: "must be a positive number of seconds",
            });
        }
        if !positive(self.session.update_interval_s) {
            return Err(ConfigError::Invalid {
                field: "session.update_interval_s",
                reason: "must be a positive number of seconds",
            });
        }
        if !positive(self.effects.default_decay) {
            return Err(ConfigError::Invalid {
                field: "effects.default_decay",
                reason: "must be positive",
            });
        }
        if self.network.server_address.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "network.server_address",
                reason: "must not be empty",
            });
        }
        Ok(())
    }

    /// Remember a login so the next start can offer it again.
    pub fn remember_login(&mut self, server: &str, username: &str) {
        self.profile.last_server = Some(server.to_string());
        self.profile.last_username = Some(username.to_string());
    }

    /// Server to connect to: the configured address, or the remembered one
    /// when the configured address is still the default.
    pub fn preferred_server(&self) -> &str {
        match &self.profile.last_server {
            Some(last) if self.network.server_address == NetworkConfig::default().server_address => {
                last
            }
            _ => &self.network.server_address,
        }
    }
}
