//! Plugin manager
//!
//! The host-facing entry point. Ties together the capability gate, the
//! sandbox executor, identity validation, the registry and hook dispatch.
//!
//! # Load pipeline
//!
//! Every plugin passes these steps in order. Failing any of them leaves the
//! registry untouched and stops the plugin's sandbox.
//!
//! 1. **Pre-checks**: manifest is well formed, id is free, source digest
//!    matches the manifest's `source_hash` when one is pinned. No plugin code
//!    has run yet.
//! 2. **Scope**: the capability gate builds the plugin's scope from the
//!    manifest permissions.
//! 3. **Execute**: the source runs inside the scope and reports its
//!    `plugin_info`, bounded by the load timeout.
//! 4. **Validate**: the report must match the manifest identity exactly.
//! 5. **Register and activate**: the record is stored, joins the active set
//!    and receives `on_activate`. A failing activation hook is logged but does
//!    not undo the load.
//!
//! # Examples
//!
//! ```no_run
//! use lorekeeper_engine::manager::PluginManager;
//! use lorekeeper_engine::services::Services;
//! use sdk::manifest::Manifest;
//! use sdk::plugin::Hook;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = PluginManager::with_wasm(Services::in_memory());
//!
//! let manifest = Manifest::from_json(&std::fs::read_to_string("census.manifest.json")?)?;
//! let source = std::fs::read("census.wasm")?;
//!
//! if manager.load(&source, &manifest).await {
//!     manager
//!         .trigger_hook(Hook::WorldLoaded, &serde_json::json!({ "worldId": "w1" }))
//!         .await;
//!     manager.unload(&manifest.id).await;
//! }
//! # Ok(())
//! # }
//! ```

use crate::capability::CapabilityGate;
use crate::config::Config;
use crate::dispatcher::{encode_args, HookDispatcher, HookOutcome, HookReport};
use crate::message_bus::{Event, MessageBus};
use crate::registry::{PluginRegistry, RegistryPolicy};
use crate::sandbox::{ExecutionLimits, Executor, WasmExecutor};
use crate::services::Services;
use crate::validator;
use sdk::errors::EngineError;
use sdk::manifest::Manifest;
use sdk::plugin::{Hook, PluginRecord};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A plugin that made it into the registry
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub record: PluginRecord,
    /// Result of `on_activate`; `NotDefined` when the plugin has none
    pub activation: HookOutcome,
}

/// Owns all plugins of one host
///
/// Mutating operations take `&mut self`. Hosts that share a manager between
/// tasks wrap it in `tokio::sync::Mutex`, which also serializes racing loads
/// of the same id: the second one is rejected as a duplicate.
pub struct PluginManager {
    services: Services,
    gate: CapabilityGate,
    executor: Arc<dyn Executor>,
    registry: PluginRegistry,
    dispatcher: HookDispatcher,
    load_timeout: Duration,
    message_bus: Option<Arc<MessageBus>>,
}

impl PluginManager {
    /// Create a manager with default limits and the `AllowReuse` policy
    pub fn new(services: Services, executor: Arc<dyn Executor>) -> Self {
        let limits = ExecutionLimits::default();
        Self {
            gate: CapabilityGate::new(services.clone()).with_max_sleep(limits.call_timeout),
            services,
            executor,
            registry: PluginRegistry::default(),
            dispatcher: HookDispatcher::new(limits.call_timeout),
            load_timeout: limits.load_timeout,
            message_bus: None,
        }
    }

    /// Create a manager running plugins in the WebAssembly sandbox
    pub fn with_wasm(services: Services) -> Self {
        Self::new(services, Arc::new(WasmExecutor::default()))
    }

    /// Create a manager from configuration
    pub fn from_config(config: &Config, services: Services) -> Self {
        let limits = config.sandbox.limits();
        Self::new(services, Arc::new(WasmExecutor::new(limits)))
            .with_limits(&limits)
            .with_policy(config.registry.policy)
    }

    /// Apply hook and load timeouts
    ///
    /// Executor limits are fixed when the executor is built.
    pub fn with_limits(mut self, limits: &ExecutionLimits) -> Self {
        self.gate = CapabilityGate::new(self.services.clone()).with_max_sleep(limits.call_timeout);
        self.dispatcher = HookDispatcher::new(limits.call_timeout);
        self.load_timeout = limits.load_timeout;
        if let Some(bus) = &self.message_bus {
            self.dispatcher.set_message_bus(bus.clone());
        }
        self
    }

    /// Replace the registry policy; call before loading anything
    pub fn with_policy(mut self, policy: RegistryPolicy) -> Self {
        self.registry = PluginRegistry::new(policy);
        self
    }

    /// Set the message bus for publishing lifecycle events
    pub fn set_message_bus(&mut self, bus: Arc<MessageBus>) {
        self.dispatcher.set_message_bus(bus.clone());
        self.message_bus = Some(bus);
    }

    /// Load and activate a plugin
    ///
    /// Returns false if the plugin was rejected at any step. Never panics or
    /// errors on plugin input; the reason is logged.
    pub async fn load(&mut self, source: &[u8], manifest: &Manifest) -> bool {
        self.try_load(source, manifest).await.is_ok()
    }

    /// Load and activate a plugin, reporting why it was rejected
    pub async fn try_load(
        &mut self,
        source: &[u8],
        manifest: &Manifest,
    ) -> Result<LoadOutcome, EngineError> {
        let record = self.install(source, manifest).await?;
        let activation = self.activate(&record.id).await?;
        Ok(LoadOutcome { record, activation })
    }

    /// Execute, validate and register a plugin without activating it
    pub async fn install(
        &mut self,
        source: &[u8],
        manifest: &Manifest,
    ) -> Result<PluginRecord, EngineError> {
        tracing::info!(plugin = %manifest.id, version = %manifest.version, "Loading plugin");

        match self.install_inner(source, manifest).await {
            Ok(record) => {
                tracing::info!(
                    plugin = %record.id,
                    hooks = ?record.hooks,
                    "Plugin installed"
                );
                self.publish(Event::PluginLoaded {
                    plugin_id: record.id.clone(),
                    version: record.version.clone(),
                })
                .await;
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(plugin = %manifest.id, error = %e, "Plugin rejected");
                self.publish(Event::PluginRejected {
                    plugin_id: manifest.id.clone(),
                    reason: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    async fn install_inner(
        &mut self,
        source: &[u8],
        manifest: &Manifest,
    ) -> Result<PluginRecord, EngineError> {
        // Pre-checks, before any plugin code runs
        manifest.validate()?;
        self.registry.check_available(&manifest.id)?;
        verify_source_hash(source, manifest)?;

        let scope = self.gate.build_scope(&manifest.id, &manifest.permissions);

        let execution = tokio::time::timeout(self.load_timeout, self.executor.execute(source, scope))
            .await
            .map_err(|_| EngineError::Execution {
                plugin_id: manifest.id.clone(),
                reason: format!(
                    "did not finish loading within {} ms",
                    self.load_timeout.as_millis()
                ),
            })??;

        if let Err(e) = validator::check_identity(&execution.info, manifest) {
            execution.instance.shutdown().await;
            return Err(e);
        }

        let record = PluginRecord::from_validated(execution.info, manifest, execution.hooks);
        self.registry
            .register(record.clone(), execution.instance)?;

        Ok(record)
    }

    /// Add an installed plugin to the active set and run `on_activate`
    ///
    /// Activating an already active plugin does nothing and reports
    /// `NotDefined`. A failing activation hook leaves the plugin active.
    pub async fn activate(&mut self, id: &str) -> Result<HookOutcome, EngineError> {
        if !self.registry.activate(id)? {
            return Ok(HookOutcome::NotDefined);
        }

        tracing::info!(plugin = %id, "Plugin activated");
        self.publish(Event::PluginActivated {
            plugin_id: id.to_string(),
        })
        .await;

        let outcome = self.run_lifecycle_hook(id, Hook::Activate).await;
        if outcome.is_failure() {
            tracing::warn!(plugin = %id, "Activation hook failed; plugin stays active");
        }
        Ok(outcome)
    }

    /// Run `on_deactivate` and take the plugin out of the active set
    ///
    /// The plugin stays installed and can be activated again.
    pub async fn deactivate(&mut self, id: &str) -> Result<HookOutcome, EngineError> {
        if !self.registry.is_active(id) {
            // Unknown ids still report PluginNotLoaded
            self.registry.deactivate(id)?;
            return Ok(HookOutcome::NotDefined);
        }

        let outcome = self.run_lifecycle_hook(id, Hook::Deactivate).await;
        self.registry.deactivate(id)?;

        tracing::info!(plugin = %id, "Plugin deactivated");
        self.publish(Event::PluginDeactivated {
            plugin_id: id.to_string(),
        })
        .await;

        Ok(outcome)
    }

    /// Unload a plugin; false if the id is unknown
    pub async fn unload(&mut self, id: &str) -> bool {
        self.try_unload(id).await.is_ok()
    }

    /// Unload a plugin, running `on_deactivate` first if it is active
    pub async fn try_unload(&mut self, id: &str) -> Result<PluginRecord, EngineError> {
        if self.registry.get(id).is_none() {
            tracing::debug!(plugin = %id, "Plugin not loaded, nothing to unload");
            return Err(EngineError::PluginNotLoaded(id.to_string()));
        }

        if self.registry.is_active(id) {
            self.run_lifecycle_hook(id, Hook::Deactivate).await;
        }

        let removed = self
            .registry
            .remove(id)
            .ok_or_else(|| EngineError::PluginNotLoaded(id.to_string()))?;
        removed.instance.shutdown().await;

        tracing::info!(plugin = %id, "Plugin unloaded");
        self.publish(Event::PluginUnloaded {
            plugin_id: id.to_string(),
        })
        .await;

        Ok(removed.record)
    }

    /// Unload every plugin, most recently installed last
    pub async fn unload_all(&mut self) {
        tracing::info!("Unloading all plugins");

        for id in self.registry.ids() {
            self.unload(&id).await;
        }

        tracing::info!("All plugins unloaded");
    }

    /// Deliver a hook to every active plugin that implements it
    pub async fn trigger_hook(&self, hook: Hook, args: &Value) -> HookReport {
        self.dispatcher.dispatch(&self.registry, hook, args).await
    }

    /// Deliver a hook by export or event name; unknown names reach nobody
    pub async fn trigger_hook_named(&self, name: &str, args: &Value) -> HookReport {
        match name.parse::<Hook>() {
            Ok(hook) => self.trigger_hook(hook, args).await,
            Err(_) => {
                tracing::debug!(hook = %name, "Unknown hook name, nothing dispatched");
                HookReport::default()
            }
        }
    }

    /// Active plugin records in activation order
    pub fn get_active_plugins(&self) -> Vec<&PluginRecord> {
        self.registry.active()
    }

    pub fn get_plugin(&self, id: &str) -> Option<&PluginRecord> {
        self.registry.get(id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.registry.is_active(id)
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    async fn run_lifecycle_hook(&self, id: &str, hook: Hook) -> HookOutcome {
        let (Some(record), Some(instance)) = (self.registry.get(id), self.registry.instance(id))
        else {
            return HookOutcome::NotDefined;
        };
        if !record.defines(hook) {
            return HookOutcome::NotDefined;
        }

        self.dispatcher
            .invoke(id, instance.as_ref(), hook, &encode_args(&Value::Null))
            .await
    }

    async fn publish(&self, event: Event) {
        if let Some(bus) = &self.message_bus {
            bus.publish(event).await;
        }
    }
}

/// Compare the source digest with the manifest's pinned `blake3:<hex>`
fn verify_source_hash(source: &[u8], manifest: &Manifest) -> Result<(), EngineError> {
    let Some(pinned) = &manifest.source_hash else {
        return Ok(());
    };

    let expected = pinned.strip_prefix("blake3:").unwrap_or(pinned);
    let computed = blake3::hash(source);

    if !computed.to_hex().as_str().eq_ignore_ascii_case(expected) {
        tracing::error!(
            plugin = %manifest.id,
            expected = %expected,
            computed = %computed.to_hex(),
            "Source hash mismatch"
        );
        return Err(EngineError::IntegrityMismatch(manifest.id.clone()));
    }

    Ok(())
}

/// Digest string for pinning a source in a manifest
pub fn source_hash(source: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(source).to_hex())
}
