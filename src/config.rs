//! Configuration system for the Teneo node
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (TENEO_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values
//!
//! Reconnect and heartbeat timings are fixed constants of the connection
//! module and deliberately absent here.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Remote endpoint settings
    pub endpoint: EndpointSettings,

    /// Local store settings
    pub storage: StorageSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Remote endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    /// Base WebSocket address, without path or query
    pub url: String,

    /// Protocol version sent in the `version` query parameter
    pub version: String,
}

/// Local store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the JSON key-value file holding `userId`
    pub store_path: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            url: "wss://secure.ws.teneo.pro".to_string(),
            version: "v0.2".to_string(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            store_path: "localStorage.json".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl NodeConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            config = Self::from_file(&path)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e.message()),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // An explicit path must exist
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("teneo-node.toml"),
            dirs::config_dir()
                .map(|p| p.join("teneo").join("node.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".teneo").join("node.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TENEO_ENDPOINT_URL") {
            self.endpoint.url = val;
        }
        if let Ok(val) = std::env::var("TENEO_ENDPOINT_VERSION") {
            self.endpoint.version = val;
        }

        if let Ok(val) = std::env::var("TENEO_STORE_PATH") {
            self.storage.store_path = val;
        }

        if let Ok(val) = std::env::var("TENEO_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("TENEO_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("TENEO_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.storage.store_path = expand_path(&self.storage.store_path);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.url.is_empty() {
            return Err(Error::config_field_invalid("endpoint.url", "Endpoint URL cannot be empty"));
        }
        if !self.endpoint.url.starts_with("ws://") && !self.endpoint.url.starts_with("wss://") {
            return Err(Error::config_field_invalid(
                "endpoint.url",
                "Endpoint URL must start with ws:// or wss://",
            ));
        }
        if self.endpoint.version.trim().is_empty() {
            return Err(Error::config_field_invalid(
                "endpoint.version",
                "Protocol version cannot be empty",
            ));
        }

        if self.storage.store_path.is_empty() {
            return Err(Error::config_field_invalid(
                "storage.store_path",
                "Store path cannot be empty",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Get the store path as a PathBuf
    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.store_path)
    }
}

/// Expand ~ and environment variables in paths
pub fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".teneo")
                .join("node.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# Teneo Node Configuration

[endpoint]
# Base WebSocket address; /websocket?userId=...&version=... is appended
url = "wss://secure.ws.teneo.pro"

# Protocol version announced to the endpoint
version = "v0.2"

[storage]
# JSON key-value file holding your userId
store_path = "localStorage.json"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.teneo/logs/node.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
