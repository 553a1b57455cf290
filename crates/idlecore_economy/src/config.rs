//! # Engine Configuration
//!
//! Balance knobs that are not content: cache lifetime, log size, sell
//! refund ratio and an optional RNG seed. Loaded from TOML.
//!
//! ```toml
//! expression_cache_ttl_ms = 300000
//! player_log_capacity = 10
//! sell_refund_ratio = 0.5
//! rng_seed = 1234
//! ```

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{EconomyError, EconomyResult};

/// Economy engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lifetime of a memoized formula result.
    pub expression_cache_ttl_ms: u64,
    /// Messages kept in each player's log.
    pub player_log_capacity: usize,
    /// Fraction of base cost refunded on sell.
    pub sell_refund_ratio: f64,
    /// Fixed seed for formula randomness. Entropy when absent.
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expression_cache_ttl_ms: 300_000,
            player_log_capacity: 10,
            sell_refund_ratio: 0.5,
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::Config`] on invalid TOML or values.
    pub fn from_toml_str(source: &str) -> EconomyResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| EconomyError::Config(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads [`EngineConfig::from_toml_str`] from a file.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::Config`] if the file cannot be read or is
    /// invalid.
    pub fn load(path: impl AsRef<Path>) -> EconomyResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| EconomyError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::Config`] naming the first bad field.
    pub fn validate(&self) -> EconomyResult<()> {
        if self.expression_cache_ttl_ms == 0 {
            return Err(EconomyError::Config(
                "expression_cache_ttl_ms must be positive".into(),
            ));
        }
        if self.player_log_capacity == 0 {
            return Err(EconomyError::Config("player_log_capacity must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.sell_refund_ratio) {
            return Err(EconomyError::Config(format!(
                "sell_refund_ratio must be within [0, 1], got {}",
                self.sell_refund_ratio
            )));
        }
        Ok(())
    }

    /// Cache TTL as a duration.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.expression_cache_ttl_ms)
    }

    /// RNG for formula randomness, seeded when configured.
    #[must_use]
    pub fn make_rng(&self) -> ChaCha8Rng {
        match self.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.player_log_capacity, 10);
        assert!((config.sell_refund_ratio - 0.5).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("rng_seed = 7\nplayer_log_capacity = 3").unwrap();
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.player_log_capacity, 3);
        assert_eq!(config.expression_cache_ttl_ms, 300_000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_toml_str("sell_refund_ratio = 1.5").is_err());
        assert!(EngineConfig::from_toml_str("player_log_capacity = 0").is_err());
        assert!(EngineConfig::from_toml_str("expression_cache_ttl_ms = \"soon\"").is_err());
    }
}
