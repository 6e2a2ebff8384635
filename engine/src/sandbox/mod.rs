//! Plugin execution sandbox
//!
//! An [`Executor`] runs untrusted plugin source inside a [`Scope`] and hands
//! back what the plugin reported about itself plus a [`PluginInstance`] used
//! for every later hook call. The host never touches plugin memory directly;
//! all traffic crosses the instance boundary as bytes.
//!
//! [`wasm::WasmExecutor`] is the production implementation.

use crate::capability::Scope;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::plugin::{Hook, HookSet, PluginInfo};
use std::sync::Arc;
use std::time::Duration;

pub mod wasm;

pub use wasm::WasmExecutor;

/// Resource limits applied to every plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Upper bound for one hook call
    pub call_timeout: Duration,
    /// Upper bound for executing the source and reading `plugin_info`
    pub load_timeout: Duration,
    /// Linear memory cap in 64 KiB pages
    pub memory_max_pages: u32,
    pub fuel_limit: Option<u64>,
    pub allow_wasi: bool,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            load_timeout: Duration::from_secs(10),
            memory_max_pages: 256,
            fuel_limit: None,
            allow_wasi: false,
        }
    }
}

/// Result of executing plugin source
pub struct Execution {
    /// The plugin's unverified self-report
    pub info: PluginInfo,
    /// Hooks the plugin implements, probed once
    pub hooks: HookSet,
    pub instance: Arc<dyn PluginInstance>,
}

/// Runs plugin source inside a capability scope
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute `source` with `scope` as its only reachable host state
    ///
    /// Fails if the source is malformed, traps, or does not report a
    /// `plugin_info`. On failure nothing of the plugin stays alive.
    async fn execute(&self, source: &[u8], scope: Scope) -> Result<Execution, EngineError>;
}

/// A running, isolated plugin
#[async_trait]
pub trait PluginInstance: Send + Sync {
    /// Invoke a hook with JSON-encoded arguments
    async fn invoke(&self, hook: Hook, input: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Stop the plugin and release its resources
    async fn shutdown(&self);
}
