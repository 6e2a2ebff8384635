//! Configuration management
//!
//! This module handles loading, validation, and management of the Lorekeeper
//! plugin host configuration. Configuration is stored in TOML format at
//! ~/.lorekeeper/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **plugins**: Directory scanned by `lorekeeper run`
//! - **sandbox**: Per-plugin execution limits
//! - **registry**: Whether removed plugin ids may be reused
//!
//! # Path Expansion
//!
//! The configuration system expands ~ to the user's home directory and creates
//! the data directory if it doesn't exist.
//!
//! # Examples
//!
//! ```no_run
//! use lorekeeper_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! // Access configuration values
//! println!("Plugins: {:?}", config.plugins.dir);
//! println!("Hook timeout: {} ms", config.sandbox.hook_timeout_ms);
//! # Ok(())
//! # }
//! ```

use crate::registry::RegistryPolicy;
use crate::sandbox::ExecutionLimits;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
///
/// Represents the complete configuration loaded from
/// ~/.lorekeeper/config.toml. Every section has defaults, so an empty file is
/// a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core host settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Plugin discovery
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Sandbox execution limits
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Registry behaviour
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Core host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

/// Plugin discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directory holding `<name>.wasm` or `<name>.wat` files next to
    /// `<name>.manifest.json` (supports ~ expansion)
    #[serde(default = "default_plugins_dir")]
    pub dir: PathBuf,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: default_plugins_dir(),
        }
    }
}

/// Sandbox execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Upper bound for a single hook call
    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,

    /// Upper bound for executing a plugin source and reading its info
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,

    /// Linear memory cap in 64 KiB pages
    #[serde(default = "default_memory_max_pages")]
    pub memory_max_pages: u32,

    /// Instruction fuel per call (unlimited when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_limit: Option<u64>,

    /// Link WASI into plugin instances
    #[serde(default)]
    pub allow_wasi: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            hook_timeout_ms: default_hook_timeout_ms(),
            load_timeout_ms: default_load_timeout_ms(),
            memory_max_pages: default_memory_max_pages(),
            fuel_limit: None,
            allow_wasi: false,
        }
    }
}

impl SandboxConfig {
    /// Convert to the limits handed to the executor
    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            call_timeout: Duration::from_millis(self.hook_timeout_ms),
            load_timeout: Duration::from_millis(self.load_timeout_ms),
            memory_max_pages: self.memory_max_pages,
            fuel_limit: self.fuel_limit,
            allow_wasi: self.allow_wasi,
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// `allow-reuse` or `tombstone`
    #[serde(default)]
    pub policy: RegistryPolicy,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.lorekeeper")
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("~/.lorekeeper/plugins")
}

fn default_hook_timeout_ms() -> u64 {
    5_000
}

fn default_load_timeout_ms() -> u64 {
    10_000
}

fn default_memory_max_pages() -> u32 {
    // 16 MiB
    256
}

impl Config {
    /// Load configuration from the default location (~/.lorekeeper/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Validates the configuration after loading and returns descriptive errors
    /// if validation fails.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();

        // Serialize before expansion so the file keeps the portable ~ paths
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.lorekeeper/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".lorekeeper").join("config.toml"))
    }

    /// Validate and process configuration
    ///
    /// Rejects unknown log levels, zero timeouts and a zero memory cap,
    /// expands ~ in paths and creates the data directory.
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.sandbox.hook_timeout_ms == 0 {
            return Err(EngineError::Config(
                "sandbox.hook_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.sandbox.load_timeout_ms == 0 {
            return Err(EngineError::Config(
                "sandbox.load_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.sandbox.memory_max_pages == 0 {
            return Err(EngineError::Config(
                "sandbox.memory_max_pages must be greater than 0".to_string(),
            ));
        }
        if self.sandbox.fuel_limit == Some(0) {
            return Err(EngineError::Config(
                "sandbox.fuel_limit must be greater than 0 when set".to_string(),
            ));
        }

        self.plugins.dir = expand_path(&self.plugins.dir)?;
        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub(crate) fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
