//! Configuration system for CareLink Console
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (CARELINK_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::connection::LiveClientConfig;
use crate::error::{Error, Result};

/// Main console configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Console identity
    pub console: ConsoleSettings,

    /// Server connection settings
    pub server: ServerSettings,

    /// Dashboard view settings
    pub views: ViewSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Console identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    /// Human-readable console name (defaults to the hostname)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Server WebSocket base URL
    pub url: String,

    /// Path of the live event channel, joined onto the base URL
    pub events_path: String,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Liveness probe interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Liveness response deadline in milliseconds
    pub heartbeat_timeout_ms: u64,

    /// Maximum automatic reconnection attempts
    pub max_reconnect_attempts: u32,

    /// First reconnect delay in milliseconds (doubles per failure)
    pub initial_reconnect_delay_ms: u64,

    /// Reconnect delay cap in milliseconds
    pub max_reconnect_delay_ms: u64,
}

/// Dashboard view settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    /// Keep the analytics cards updated
    pub analytics: bool,

    /// Keep the call history updated
    pub calls: bool,

    /// Keep the ticket tracker updated
    pub tickets: bool,

    /// How many recent calls the call log retains
    pub recent_call_limit: usize,
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

// Default implementations

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            console: ConsoleSettings::default(),
            server: ServerSettings::default(),
            views: ViewSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self { name: None }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: "wss://dashboard.carelink.example".to_string(),
            events_path: "/ws/live".to_string(),
            connect_timeout_ms: 30_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 35_000,
            max_reconnect_attempts: 10,
            initial_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
        }
    }
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            analytics: true,
            calls: true,
            tickets: true,
            recent_call_limit: 50,
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

impl ServerSettings {
    /// Translate to the live connection manager's configuration
    pub fn client_config(&self) -> LiveClientConfig {
        LiveClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            initial_reconnect_delay: Duration::from_millis(self.initial_reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            ..LiveClientConfig::default()
        }
    }
}

impl ConsoleConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
            config = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let expanded = shellexpand::tilde(path);
            let path = PathBuf::from(expanded.as_ref());
            if path.exists() {
                return Ok(Some(path));
            } else {
                return Err(Error::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("carelink-console.toml"),
            PathBuf::from("config.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("carelink").join("console.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".carelink").join("console.toml"))
                .unwrap_or_default(),
            // System config (Linux)
            PathBuf::from("/etc/carelink/console.toml"),
        ];

        for path in &search_paths {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Console settings
        if let Ok(val) = std::env::var("CARELINK_CONSOLE_NAME") {
            self.console.name = Some(val);
        }

        // Server settings
        if let Ok(val) = std::env::var("CARELINK_SERVER_URL") {
            self.server.url = val;
        }
        if let Ok(val) = std::env::var("CARELINK_EVENTS_PATH") {
            self.server.events_path = val;
        }
        if let Ok(val) = std::env::var("CARELINK_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.server.connect_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("CARELINK_HEARTBEAT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.server.heartbeat_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("CARELINK_HEARTBEAT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.server.heartbeat_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("CARELINK_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.server.max_reconnect_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("CARELINK_INITIAL_RECONNECT_DELAY_MS") {
            if let Ok(n) = val.parse() {
                self.server.initial_reconnect_delay_ms = n;
            }
        }
        if let Ok(val) = std::env::var("CARELINK_MAX_RECONNECT_DELAY_MS") {
            if let Ok(n) = val.parse() {
                self.server.max_reconnect_delay_ms = n;
            }
        }

        // View settings
        if let Ok(val) = std::env::var("CARELINK_VIEW_ANALYTICS") {
            self.views.analytics = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("CARELINK_VIEW_CALLS") {
            self.views.calls = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("CARELINK_VIEW_TICKETS") {
            self.views.tickets = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("CARELINK_RECENT_CALL_LIMIT") {
            if let Ok(n) = val.parse() {
                self.views.recent_call_limit = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("CARELINK_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("CARELINK_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("CARELINK_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Validate server URL
        if self.server.url.is_empty() {
            return Err(Error::Config("Server URL cannot be empty".to_string()));
        }
        if !self.server.url.starts_with("ws://") && !self.server.url.starts_with("wss://") {
            return Err(Error::Config(
                "Server URL must start with ws:// or wss://".to_string(),
            ));
        }

        // The liveness deadline has to outlast the probe period, or every
        // heartbeat cycle would force a reconnect.
        if self.server.heartbeat_timeout_ms <= self.server.heartbeat_interval_ms {
            return Err(Error::Config(
                "heartbeat_timeout_ms must be greater than heartbeat_interval_ms".to_string(),
            ));
        }

        if self.views.recent_call_limit == 0 {
            return Err(Error::Config(
                "recent_call_limit must be at least 1".to_string(),
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// The console name, falling back to the hostname
    pub fn console_name(&self) -> String {
        self.console.name.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "carelink-console".to_string())
        })
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<()> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".carelink")
                .join("console.toml")
        });

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
    }

    // Generate default config with comments
    let config_content = generate_default_config();

    // Write the file
    fs::write(&config_path, config_content)
        .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

    println!("Configuration file created: {}", config_path.display());
    Ok(())
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# CareLink Console Configuration
# https://github.com/carelink/console

[console]
# Human-readable console name (defaults to the hostname)
# name = "Front desk"

[server]
# Server WebSocket base URL
url = "wss://dashboard.carelink.example"

# Path of the live event channel
events_path = "/ws/live"

# Connection timeout in milliseconds
connect_timeout_ms = 30000

# Liveness probe interval in milliseconds
heartbeat_interval_ms = 30000

# Liveness response deadline in milliseconds (must exceed the interval)
heartbeat_timeout_ms = 35000

# Maximum automatic reconnection attempts
max_reconnect_attempts = 10

# First reconnect delay in milliseconds (doubles per failure)
initial_reconnect_delay_ms = 1000

# Reconnect delay cap in milliseconds
max_reconnect_delay_ms = 30000

[views]
# Keep the analytics cards updated
analytics = true

# Keep the call history updated
calls = true

# Keep the ticket tracker updated
tickets = true

# How many recent calls the call log retains
recent_call_limit = 50

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.carelink/logs/console.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
