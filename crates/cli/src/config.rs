//! Configuration management.
//!
//! Configuration is read from `sprintpoker.toml` and may be overridden by
//! `SPRINTPOKER_*` environment variables. Missing values fall back to
//! defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sprintpoker_core::PointDomain;
use sprintpoker_realtime::DEFAULT_CHANNEL_CAPACITY;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Estimation configuration
    #[serde(default)]
    pub estimation: EstimationConfig,
    /// Realtime configuration
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory, lost on exit
    Memory,
    /// One JSON file per record (default)
    #[default]
    Json,
    /// SQLite database file
    Sqlite,
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "json" => Ok(StorageBackend::Json),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(ConfigError::Invalid(format!("unknown storage backend '{}'", other))),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend to use
    #[serde(default)]
    pub backend: StorageBackend,
    /// Data directory
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".sprintpoker")
}

/// Estimation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationConfig {
    /// Playable point values
    #[serde(default = "default_points")]
    pub points: Vec<u32>,
    /// Whether the "?" card is playable
    #[serde(default = "default_allow_unsure")]
    pub allow_unsure: bool,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            points: default_points(),
            allow_unsure: default_allow_unsure(),
        }
    }
}

fn default_points() -> Vec<u32> {
    PointDomain::default().values().to_vec()
}

fn default_allow_unsure() -> bool {
    true
}

impl EstimationConfig {
    /// The configured point domain.
    pub fn domain(&self) -> Result<PointDomain, ConfigError> {
        PointDomain::new(self.points.iter().copied(), self.allow_unsure)
            .map_err(|e| ConfigError::Invalid(format!("estimation.points: {}", e)))
    }
}

/// Realtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Events buffered per session before slow subscribers lag
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file exists but cannot be read
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        /// File path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// File path
        path: String,
        /// Parser message
        message: String,
    },
    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from file.
    ///
    /// A missing or empty file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.message().to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides.
    ///
    /// Recognised variables:
    /// - SPRINTPOKER_STORAGE_BACKEND
    /// - SPRINTPOKER_STORAGE_PATH
    /// - SPRINTPOKER_ESTIMATION_POINTS (comma separated)
    /// - SPRINTPOKER_ESTIMATION_ALLOW_UNSURE
    /// - SPRINTPOKER_REALTIME_CHANNEL_CAPACITY
    /// - SPRINTPOKER_LOG_LEVEL
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(backend) = lookup("SPRINTPOKER_STORAGE_BACKEND") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(path) = lookup("SPRINTPOKER_STORAGE_PATH") {
            self.storage.path = PathBuf::from(path);
        }

        if let Some(points) = lookup("SPRINTPOKER_ESTIMATION_POINTS") {
            self.estimation.points = points
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| {
                    p.parse::<u32>().map_err(|_| {
                        ConfigError::Invalid(format!("SPRINTPOKER_ESTIMATION_POINTS: '{}' is not a number", p))
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(flag) = lookup("SPRINTPOKER_ESTIMATION_ALLOW_UNSURE") {
            self.estimation.allow_unsure = parse_bool(&flag).ok_or_else(|| {
                ConfigError::Invalid(format!("SPRINTPOKER_ESTIMATION_ALLOW_UNSURE: '{}'", flag))
            })?;
        }

        if let Some(capacity) = lookup("SPRINTPOKER_REALTIME_CHANNEL_CAPACITY") {
            self.realtime.channel_capacity = capacity.parse().map_err(|_| {
                ConfigError::Invalid(format!("SPRINTPOKER_REALTIME_CHANNEL_CAPACITY: '{}'", capacity))
            })?;
        }

        if let Some(level) = lookup("SPRINTPOKER_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.estimation.domain()?;
        if self.realtime.channel_capacity == 0 {
            return Err(ConfigError::Invalid("realtime.channel_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let config = Config::load(Path::new("nonexistent_sprintpoker.toml")).unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Json);
        assert_eq!(config.storage.path, PathBuf::from(".sprintpoker"));
        assert_eq!(config.estimation.points, vec![0, 1, 2, 3, 5, 8, 13, 21, 34]);
        assert!(config.estimation.allow_unsure);
        assert_eq!(config.realtime.channel_capacity, 64);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_empty_file_returns_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "   \n").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Json);
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[estimation]\npoints = [1, 2, 4, 8]\n").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.estimation.points, vec![1, 2, 4, 8]);
        assert!(config.estimation.allow_unsure);
        assert_eq!(config.storage.path, PathBuf::from(".sprintpoker"));
    }

    #[test]
    fn test_load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[storage]
backend = "sqlite"
path = "/var/lib/sprintpoker"

[estimation]
points = [1, 2, 3, 5, 8]
allow_unsure = false

[realtime]
channel_capacity = 16

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.path, PathBuf::from("/var/lib/sprintpoker"));
        assert!(!config.estimation.domain().unwrap().allows_unsure());
        assert_eq!(config.realtime.channel_capacity, 16);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_invalid_toml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[realtime]\nchannel_capacity = \"lots\"\n").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_empty_domain_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[estimation]\npoints = []\n").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("SPRINTPOKER_STORAGE_BACKEND", "Memory"),
                ("SPRINTPOKER_STORAGE_PATH", "/tmp/sp"),
                ("SPRINTPOKER_ESTIMATION_POINTS", "1, 2, 3"),
                ("SPRINTPOKER_ESTIMATION_ALLOW_UNSURE", "off"),
                ("SPRINTPOKER_REALTIME_CHANNEL_CAPACITY", "8"),
                ("SPRINTPOKER_LOG_LEVEL", "warn"),
            ]))
            .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/sp"));
        assert_eq!(config.estimation.points, vec![1, 2, 3]);
        assert!(!config.estimation.allow_unsure);
        assert_eq!(config.realtime.channel_capacity, 8);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(env(&[("SPRINTPOKER_STORAGE_BACKEND", "postgres")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = config
            .apply_overrides(env(&[("SPRINTPOKER_ESTIMATION_POINTS", "1,two")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
