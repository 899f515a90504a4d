/*!
 * Configuration management for dvremote.
 *
 * Settings are layered: built-in defaults, then an optional file, then
 * environment variables.
 */
use std::path::{Path, PathBuf};

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Port DVRs listen on for remote-control connections
pub const DEFAULT_REMOTE_PORT: u16 = 31339;

/// Service type DVRs advertise their remote-control endpoint under
pub const DEFAULT_SERVICE_TYPE: &str = "_tivo-remote";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Prefix the first query term of an advertisement must start with
    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// Capacity of the registry's event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Port used when a device is addressed by hand rather than discovered
    #[serde(default = "default_port")]
    pub port: u16,

    /// Capacity of each session's event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.to_string()
}

fn default_event_capacity() -> usize {
    64
}

fn default_port() -> u16 {
    DEFAULT_REMOTE_PORT
}

/// Layers defaults, an optional file and environment variables into a [`Config`]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<PathBuf>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Read settings from `path` if it exists. The format follows the extension.
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read `<PREFIX>__SECTION__KEY` environment variables
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let defaults = ConfigLib::try_from(&Config::default())
            .map_err(|e| Error::config(format!("Invalid default settings: {}", e)))?;
        let mut layers = ConfigLib::builder().add_source(defaults);

        if let Some(path) = &self.config_file {
            debug!("Reading settings from {}", path.display());
            layers = layers.add_source(File::from(path.as_path()).required(false));
        }

        if let Some(prefix) = &self.environment_prefix {
            layers = layers.add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Config = layers
            .build()
            .and_then(ConfigLib::try_deserialize)
            .map_err(|e| Error::config(e.to_string()))?;

        debug!(?config, "Settings resolved");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.discovery.service_type, "_tivo-remote");
        assert_eq!(config.discovery.event_capacity, 64);
        assert_eq!(config.session.port, 31339);
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.session.port, DEFAULT_REMOTE_PORT);
    }

    #[test]
    fn test_config_builder_missing_file_uses_defaults() {
        let config = ConfigBuilder::new()
            .with_config_file("/nonexistent/dvremote.toml")
            .build()
            .unwrap();
        assert_eq!(config.discovery.service_type, DEFAULT_SERVICE_TYPE);
    }

    #[test]
    fn test_config_builder_with_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("dvremote.toml");

        {
            let mut file = File::create(&file_path).unwrap();
            file.write_all(
                br#"
                [logging]
                level = "debug"

                [discovery]
                service_type = "_dvr-remote"

                [session]
                port = 40000
            "#,
            )
            .unwrap();
        }

        let config = ConfigBuilder::new()
            .with_config_file(file_path)
            .build()
            .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.discovery.service_type, "_dvr-remote");
        assert_eq!(config.discovery.event_capacity, 64);
        assert_eq!(config.session.port, 40000);
    }

    #[test]
    fn test_config_builder_rejects_bad_values() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("dvremote.toml");
        std::fs::write(&file_path, "[session]\nport = \"not a port\"\n").unwrap();

        let err = ConfigBuilder::new()
            .with_config_file(file_path)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_builder_with_env() {
        env::set_var("DVREMOTE_TEST__LOGGING__LEVEL", "trace");
        env::set_var("DVREMOTE_TEST__SESSION__EVENT_CAPACITY", "8");

        let config = ConfigBuilder::new()
            .with_environment_prefix("dvremote_test")
            .build()
            .unwrap();

        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.session.event_capacity, 8);

        env::remove_var("DVREMOTE_TEST__LOGGING__LEVEL");
        env::remove_var("DVREMOTE_TEST__SESSION__EVENT_CAPACITY");
    }
}
