//! Error types and handling
//!
//! This module provides the error type used throughout the Lorekeeper plugin
//! host. All errors implement the `ErrorExt` trait which provides
//! administrator-facing hints and indicates whether errors are recoverable.
//!
//! Plugin-originated text (trap messages, guest errors) is carried verbatim
//! in the `reason` fields. Hints never include it.
//!
//! # Examples
//!
//! ```
//! use sdk::errors::{EngineError, ErrorExt};
//!
//! let error = EngineError::DuplicatePlugin("census".to_string());
//! println!("Hint: {}", error.user_hint());
//! assert!(error.is_recoverable());
//!
//! let fatal = EngineError::IntegrityMismatch("census".to_string());
//! assert!(!fatal.is_recoverable());
//! ```

use thiserror::Error;

/// Trait for error extensions
///
/// Provides additional context for errors: an administrator-facing hint and
/// whether retrying (or fixing the input) can succeed.
pub trait ErrorExt {
    /// Returns a short hint safe to show to an administrator
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Manifest**: Malformed or inconsistent manifests
/// - **Loading**: Plugin source failed to execute or lied about its identity
/// - **Registry**: Duplicate ids, unknown ids
/// - **Capabilities**: Calls to facades the plugin was not granted
/// - **Hooks**: Failures and timeouts inside plugin callbacks
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Manifest errors
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    // Loading errors
    #[error("Plugin '{plugin_id}' failed to execute: {reason}")]
    Execution { plugin_id: String, reason: String },

    #[error("Plugin '{0}' did not produce a plugin record")]
    MissingPluginInfo(String),

    #[error("Plugin '{plugin_id}' identity mismatch on '{field}': manifest says '{expected}', plugin says '{found}'")]
    IdentityMismatch {
        plugin_id: String,
        field: &'static str,
        expected: String,
        found: String,
    },

    #[error("Source hash mismatch for plugin '{0}'")]
    IntegrityMismatch(String),

    // Registry errors
    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("Plugin id retired and cannot be reused: {0}")]
    IdRetired(String),

    #[error("Plugin not loaded: {0}")]
    PluginNotLoaded(String),

    // Capability errors
    #[error("Plugin '{plugin_id}' was not granted the {facade} facade")]
    CapabilityDenied { plugin_id: String, facade: String },

    #[error("Backing service error: {0}")]
    Service(String),

    // Hook errors
    #[error("Hook '{hook}' failed in plugin '{plugin_id}': {reason}")]
    HookFailed {
        plugin_id: String,
        hook: String,
        reason: String,
    },

    #[error("Hook '{hook}' in plugin '{plugin_id}' timed out after {timeout_ms} ms")]
    HookTimeout {
        plugin_id: String,
        hook: String,
        timeout_ms: u64,
    },

    #[error("Sandbox worker for plugin '{0}' is not running")]
    WorkerUnavailable(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::InvalidManifest(_) => "Fix the plugin manifest and try again",

            Self::Execution { .. } => "The plugin could not be run. Check the plugin logs",
            Self::MissingPluginInfo(_) => "The plugin does not export a valid plugin_info",
            Self::IdentityMismatch { .. } => {
                "The plugin does not match its approved manifest. Do not load it"
            }
            Self::IntegrityMismatch(_) => "The plugin source differs from the approved build",

            Self::DuplicatePlugin(_) => "Unload the existing plugin before loading it again",
            Self::IdRetired(_) => "This plugin id was retired. Approve a new id",
            Self::PluginNotLoaded(_) => "The plugin is not loaded",

            Self::CapabilityDenied { .. } => "Grant the permission in the manifest if intended",
            Self::Service(_) => "A backing service failed. Try again",

            Self::HookFailed { .. } => "A plugin callback failed. Check the plugin logs",
            Self::HookTimeout { .. } => "A plugin callback took too long",
            Self::WorkerUnavailable(_) => "The plugin sandbox stopped. Reload the plugin",

            Self::Serialization(_) => "Malformed data was exchanged with a plugin",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable: the approved artifact itself is untrustworthy
            Self::IdentityMismatch { .. } | Self::IntegrityMismatch(_) | Self::IdRetired(_) => {
                false
            }

            _ => true,
        }
    }
}
