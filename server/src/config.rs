//! Ticker configuration loaded from an optional JSON file

use crate::error::ConfigError;
use crate::tick_loop::MAX_TICK_RATE;
use crate::ticker::DEFAULT_FAILURE_CAPACITY;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Default sweeps per second
pub const DEFAULT_TICK_RATE: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerConfig {
    /// Sweeps per second
    pub tick_rate: u32,
    /// Failure notifications buffered per subscriber before the oldest are dropped
    pub failure_capacity: usize,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            failure_capacity: DEFAULT_FAILURE_CAPACITY,
        }
    }
}

impl TickerConfig {
    /// Loads a config file, falling back to defaults if it does not exist
    ///
    /// Keys missing from the file take their default values. The result is
    /// validated before it is returned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(json) => {
                info!("Loaded config from {}", path.display());
                Self::from_json(&json)?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > MAX_TICK_RATE {
            return Err(ConfigError::InvalidTickRate);
        }
        if self.failure_capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::process;

    fn temp_path(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("match_server_{}_{}.json", process::id(), name))
    }

    #[test]
    fn test_defaults() {
        let config = TickerConfig::default();
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.failure_capacity, DEFAULT_FAILURE_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config = TickerConfig::from_json(r#"{ "tick_rate": 60 }"#).unwrap();
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.failure_capacity, DEFAULT_FAILURE_CAPACITY);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = TickerConfig::load(temp_path("does_not_exist")).unwrap();
        assert_eq!(config, TickerConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = temp_path("load");
        fs::write(&path, r#"{ "tick_rate": 20, "failure_capacity": 8 }"#).unwrap();

        let config = TickerConfig::load(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(config.tick_rate, 20);
        assert_eq!(config.failure_capacity, 8);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let path = temp_path("zero_rate");
        fs::write(&path, r#"{ "tick_rate": 0 }"#).unwrap();
        let result = TickerConfig::load(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(ConfigError::InvalidTickRate)));

        let config = TickerConfig {
            tick_rate: u32::MAX,
            ..TickerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTickRate)));

        let config = TickerConfig {
            failure_capacity: 0,
            ..TickerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCapacity)));
    }

    #[test]
    fn test_malformed_json() {
        match TickerConfig::from_json("{ tick_rate: ") {
            Err(ConfigError::Parse(_)) => {}
            other => panic!("Unexpected result: {:?}", other),
        }
    }
}
