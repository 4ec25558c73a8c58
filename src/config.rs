//! Configuration management for Blockscope

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Upper bound on `number` in a range request.
    #[serde(default = "default_max_range_blocks")]
    pub max_range_blocks: u64,
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_api_port(),
            request_timeout_secs: default_request_timeout(),
            max_range_blocks: default_max_range_blocks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `blockscope=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Loads `config.toml` from the working directory, falling back to defaults
/// when it is absent.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(DEFAULT_CONFIG_PATH)
}

pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        parse_config(&config_str)?
    } else {
        Config::default()
    };

    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
        config.api.port = port;
    }

    config.validate()?;
    Ok(config)
}

pub fn parse_config(config_str: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.is_empty() {
            return Err(ConfigError::Invalid(
                "database.path must be set in config.toml".to_string(),
            ));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "api.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.api.max_range_blocks == 0 {
            return Err(ConfigError::Invalid(
                "api.max_range_blocks must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8021
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_range_blocks() -> u64 {
    1000
}

fn default_database_path() -> String {
    "./data/chain.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_for_empty_config() {
        let config = parse_config("").unwrap();
        assert_eq!(config.api.port, 8021);
        assert_eq!(config.api.max_range_blocks, 1000);
        assert_eq!(config.api.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.database.path, "./data/chain.db");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_config() {
        let config = parse_config(
            r#"
            [api]
            port = 9000
            max_range_blocks = 50

            [database]
            path = "/tmp/chain.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.max_range_blocks, 50);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.database.path, "/tmp/chain.db");
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = parse_config("[database]\npath = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = parse_config("[api]\nmax_range_blocks = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = parse_config("[api]\nport = \"eighty\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");

        let missing = load_config_from("/nonexistent/blockscope.toml").unwrap();
        assert_eq!(missing.database.path, "./data/chain.db");
    }
}
