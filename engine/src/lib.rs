//! Lorekeeper Engine Library
//!
//! The plugin host of the Lorekeeper worldbuilding app. It is used by both
//! the `lorekeeper` binary and the integration tests.

/// Configuration management module
pub mod config;

/// Backing services the capability facades proxy to
pub mod services;

/// Capability gate and the facades it exposes to plugins
pub mod capability;

/// Sandboxed plugin execution
pub mod sandbox;

/// Manifest identity validation
pub mod validator;

/// Registry of installed and active plugins
pub mod registry;

/// Hook delivery to active plugins
pub mod dispatcher;

/// Plugin lifecycle orchestration
pub mod manager;

/// Message bus for plugin lifecycle events
pub mod message_bus;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
