//! Lorekeeper SDK
//!
//! Shared library providing the types exchanged between the plugin host and
//! plugins. The engine depends on it, and so can guest plugins compiled to
//! WebAssembly.

/// Error types and handling
pub mod errors;

/// Manifest types
pub mod manifest;

/// Plugin records and hooks
pub mod plugin;

/// Capability wire protocol
pub mod protocol;

// Re-export commonly used types
pub use errors::{EngineError, ErrorExt};
pub use manifest::{Category, Manifest, Permission, PermissionSet};
pub use plugin::{Hook, HookSet, PluginInfo, PluginRecord};
pub use protocol::{CapabilityRequest, CapabilityResponse, FacadeKind};
