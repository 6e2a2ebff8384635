//! WebAssembly executor built on Extism
//!
//! Every plugin gets its own OS thread that owns its Extism instance. The
//! host talks to that thread over a bounded channel and never shares memory
//! with it. The only import linked into the guest is `lorekeeper_call`,
//! which forwards a JSON [`CapabilityRequest`] to the plugin's [`Scope`] and
//! writes the JSON [`CapabilityResponse`] back.
//!
//! # Guest ABI
//!
//! - export `plugin_info` (required): returns JSON [`PluginInfo`]
//! - export `on_activate`, `on_deactivate`, `on_world_load`,
//!   `on_entity_created` (optional): receive JSON arguments
//! - import `extism:host/user::lorekeeper_call(request) -> response`
//!
//! Source may be a WebAssembly binary or WAT text.
//!
//! # Examples
//!
//! ```no_run
//! use lorekeeper_engine::capability::CapabilityGate;
//! use lorekeeper_engine::sandbox::{ExecutionLimits, Executor, WasmExecutor};
//! use lorekeeper_engine::services::Services;
//! use sdk::manifest::PermissionSet;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = CapabilityGate::new(Services::in_memory());
//! let scope = gate.build_scope("census", &PermissionSet::new());
//!
//! let executor = WasmExecutor::new(ExecutionLimits::default());
//! let source = std::fs::read("census.wasm")?;
//! let execution = executor.execute(&source, scope).await?;
//! println!("Plugin reports itself as {}", execution.info.name);
//! # Ok(())
//! # }
//! ```

use super::{Execution, ExecutionLimits, Executor, PluginInstance};
use crate::capability::Scope;
use async_trait::async_trait;
use extism::{
    CurrentPlugin, Function, Manifest as ExtismManifest, Plugin, PluginBuilder, UserData, Val,
    Wasm, PTR,
};
use sdk::errors::EngineError;
use sdk::plugin::{Hook, HookSet, PluginInfo};
use sdk::protocol::{CapabilityRequest, CapabilityResponse, HOST_CALL_FUNCTION};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

/// Export every plugin must provide
const PLUGIN_INFO_EXPORT: &str = "plugin_info";

/// Pending requests per plugin worker
const WORKER_QUEUE_SIZE: usize = 16;

/// Extra time Extism allows past the host-side call timeout, so the host
/// reports a timeout before the guest is interrupted
const INTERRUPT_GRACE: Duration = Duration::from_millis(250);

/// Executes plugins as isolated Extism instances
pub struct WasmExecutor {
    limits: ExecutionLimits,
}

impl WasmExecutor {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }
}

impl Default for WasmExecutor {
    fn default() -> Self {
        Self::new(ExecutionLimits::default())
    }
}

#[async_trait]
impl Executor for WasmExecutor {
    async fn execute(&self, source: &[u8], scope: Scope) -> Result<Execution, EngineError> {
        let plugin_id = scope.plugin_id().to_string();

        let wasm = wat::parse_bytes(source)
            .map_err(|e| EngineError::Execution {
                plugin_id: plugin_id.clone(),
                reason: format!("malformed source: {}", e),
            })?
            .into_owned();

        let (request_tx, request_rx) = mpsc::channel(WORKER_QUEUE_SIZE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = Worker {
            plugin_id: plugin_id.clone(),
            limits: self.limits,
            runtime: Handle::current(),
        };

        std::thread::Builder::new()
            .name("lorekeeper-plugin".to_string())
            .spawn(move || worker.run(wasm, scope, ready_tx, request_rx))?;

        let probe = ready_rx
            .await
            .map_err(|_| EngineError::WorkerUnavailable(plugin_id.clone()))??;

        tracing::debug!(
            plugin = %plugin_id,
            hooks = ?probe.hooks,
            "Plugin executed in sandbox"
        );

        Ok(Execution {
            info: probe.info,
            hooks: probe.hooks,
            instance: Arc::new(WasmInstance {
                plugin_id,
                requests: request_tx,
            }),
        })
    }
}

/// What a freshly executed plugin reported
struct Probe {
    info: PluginInfo,
    hooks: HookSet,
}

enum WorkerRequest {
    Call {
        hook: Hook,
        input: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<u8>, EngineError>>,
    },
    Shutdown,
}

/// State the `lorekeeper_call` import needs
struct HostBridge {
    scope: Scope,
    runtime: Handle,
}

struct Worker {
    plugin_id: String,
    limits: ExecutionLimits,
    runtime: Handle,
}

impl Worker {
    /// Body of the plugin thread
    fn run(
        self,
        wasm: Vec<u8>,
        scope: Scope,
        ready: oneshot::Sender<Result<Probe, EngineError>>,
        mut requests: mpsc::Receiver<WorkerRequest>,
    ) {
        let mut plugin = match self.instantiate(wasm, scope) {
            Ok(plugin) => plugin,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        let probe = self.probe(&mut plugin);
        let probed = probe.is_ok();
        if ready.send(probe).is_err() || !probed {
            // Loader gave up or the plugin is unusable
            return;
        }

        while let Some(request) = requests.blocking_recv() {
            match request {
                WorkerRequest::Call { hook, input, reply } => {
                    let result = plugin
                        .call::<&[u8], Vec<u8>>(hook.export_name(), input.as_slice())
                        .map_err(|e| EngineError::HookFailed {
                            plugin_id: self.plugin_id.clone(),
                            hook: hook.export_name().to_string(),
                            reason: e.to_string(),
                        });
                    let _ = reply.send(result);
                }
                WorkerRequest::Shutdown => break,
            }
        }

        tracing::debug!(plugin = %self.plugin_id, "Sandbox worker stopped");
    }

    fn instantiate(&self, wasm: Vec<u8>, scope: Scope) -> Result<Plugin, EngineError> {
        let manifest = ExtismManifest::new([Wasm::data(wasm)])
            .with_timeout(self.limits.call_timeout + INTERRUPT_GRACE)
            .with_memory_max(self.limits.memory_max_pages);

        let bridge = HostBridge {
            scope,
            runtime: self.runtime.clone(),
        };
        let host_fn = Function::new(
            HOST_CALL_FUNCTION,
            [PTR],
            [PTR],
            UserData::new(bridge),
            lorekeeper_call,
        );

        let builder = PluginBuilder::new(manifest)
            .with_wasi(self.limits.allow_wasi)
            .with_functions([host_fn]);
        let builder = match self.limits.fuel_limit {
            Some(fuel) => builder.with_fuel_limit(fuel),
            None => builder,
        };

        builder.build().map_err(|e| EngineError::Execution {
            plugin_id: self.plugin_id.clone(),
            reason: e.to_string(),
        })
    }

    /// Read `plugin_info` and record which hooks are exported
    fn probe(&self, plugin: &mut Plugin) -> Result<Probe, EngineError> {
        if !plugin.function_exists(PLUGIN_INFO_EXPORT) {
            return Err(EngineError::MissingPluginInfo(self.plugin_id.clone()));
        }

        let raw = plugin
            .call::<&[u8], Vec<u8>>(PLUGIN_INFO_EXPORT, b"")
            .map_err(|e| EngineError::Execution {
                plugin_id: self.plugin_id.clone(),
                reason: e.to_string(),
            })?;

        let info: PluginInfo = serde_json::from_slice(&raw).map_err(|e| {
            tracing::warn!(plugin = %self.plugin_id, error = %e, "Unparsable plugin_info");
            EngineError::MissingPluginInfo(self.plugin_id.clone())
        })?;

        let hooks = Hook::ALL
            .into_iter()
            .filter(|hook| plugin.function_exists(hook.export_name()))
            .collect();

        Ok(Probe { info, hooks })
    }
}

/// Host side of the guest's only import
fn lorekeeper_call(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostBridge>,
) -> Result<(), extism::Error> {
    let raw: Vec<u8> = plugin.memory_get_val(&inputs[0])?;

    let response = match serde_json::from_slice::<CapabilityRequest>(&raw) {
        Ok(request) => {
            let bridge = user_data.get()?;
            let bridge = bridge
                .lock()
                .map_err(|_| extism::Error::msg("host bridge lock poisoned"))?;
            bridge.runtime.block_on(bridge.scope.dispatch(request))
        }
        Err(e) => CapabilityResponse::error(format!("malformed capability request: {}", e)),
    };

    let bytes = serde_json::to_vec(&response)?;
    plugin.memory_set_val(&mut outputs[0], bytes)?;
    Ok(())
}

/// Handle to a plugin worker thread
struct WasmInstance {
    plugin_id: String,
    requests: mpsc::Sender<WorkerRequest>,
}

#[async_trait]
impl PluginInstance for WasmInstance {
    async fn invoke(&self, hook: Hook, input: &[u8]) -> Result<Vec<u8>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.requests
            .send(WorkerRequest::Call {
                hook,
                input: input.to_vec(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::WorkerUnavailable(self.plugin_id.clone()))?;

        reply_rx
            .await
            .map_err(|_| EngineError::WorkerUnavailable(self.plugin_id.clone()))?
    }

    async fn shutdown(&self) {
        if self.requests.send(WorkerRequest::Shutdown).await.is_err() {
            tracing::debug!(plugin = %self.plugin_id, "Sandbox worker already stopped");
        }
    }
}
