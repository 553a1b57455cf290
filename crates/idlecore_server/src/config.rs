//! Server configuration, loaded from TOML at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use idlecore_economy::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/// Default tick interval (1 Hz).
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Default cap on concurrently updating players.
pub const DEFAULT_MAX_CONCURRENT_PLAYERS: usize = 64;

/// Server settings.
///
/// ```toml
/// tick_interval_ms = 1000
/// max_concurrent_players = 64
/// catalog_path = "data/catalog.toml"
/// data_dir = "data/players"
///
/// [engine]
/// sell_refund_ratio = 0.5
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Wall-clock time between ticks.
    pub tick_interval_ms: u64,
    /// Worker pool size for the per-tick fan-out.
    pub max_concurrent_players: usize,
    /// Content catalog (`.toml` or `.json`).
    pub catalog_path: PathBuf,
    /// Directory of the JSON player store.
    pub data_dir: PathBuf,
    /// Economy engine settings.
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            max_concurrent_players: DEFAULT_MAX_CONCURRENT_PLAYERS,
            catalog_path: PathBuf::from("data/catalog.toml"),
            data_dir: PathBuf::from("data/players"),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Config`] on invalid TOML or values.
    pub fn from_toml_str(source: &str) -> ServiceResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| ServiceError::Config(format!("invalid server config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads [`ServerConfig::from_toml_str`] from a file.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Config`] if the file is unreadable or invalid.
    pub fn load(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Checks value ranges, including the nested engine settings.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Config`] naming the first bad field.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.tick_interval_ms == 0 {
            return Err(ServiceError::Config("tick_interval_ms must be positive".into()));
        }
        if self.max_concurrent_players == 0 {
            return Err(ServiceError::Config(
                "max_concurrent_players must be positive".into(),
            ));
        }
        self.engine
            .validate()
            .map_err(|e| ServiceError::Config(e.to_string()))
    }

    /// Tick interval as a duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
