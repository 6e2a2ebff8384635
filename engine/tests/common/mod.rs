//! Shared fixtures for engine integration tests
//!
//! [`ScriptedExecutor`] stands in for the WebAssembly sandbox: each source is
//! a key into a table of [`Script`]s describing what the "plugin" reports and
//! how its hooks behave. [`WatPlugin`] builds real guest modules for the
//! end-to-end sandbox tests.

#![allow(dead_code)]

use async_trait::async_trait;
use lorekeeper_engine::capability::Scope;
use lorekeeper_engine::sandbox::{Execution, ExecutionLimits, Executor, PluginInstance};
use sdk::errors::EngineError;
use sdk::manifest::Manifest;
use sdk::plugin::{Hook, HookSet, PluginInfo};
use sdk::protocol::FacadeKind;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Short limits so timeout tests finish quickly
pub fn fast_limits() -> ExecutionLimits {
    ExecutionLimits {
        call_timeout: Duration::from_millis(200),
        load_timeout: Duration::from_millis(500),
        ..ExecutionLimits::default()
    }
}

/// How a scripted hook behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Complete,
    Fail,
    Hang,
}

/// Everything a scripted plugin does
#[derive(Debug, Clone)]
pub struct Script {
    pub info: Option<PluginInfo>,
    pub hooks: HashMap<Hook, Behavior>,
    pub fail_load: bool,
    pub hang_load: bool,
}

impl Script {
    /// A plugin that reports exactly the manifest identity
    pub fn matching(manifest: &Manifest) -> Self {
        Self::reporting(PluginInfo::matching(manifest))
    }

    pub fn reporting(info: PluginInfo) -> Self {
        Self {
            info: Some(info),
            hooks: HashMap::new(),
            fail_load: false,
            hang_load: false,
        }
    }

    /// A plugin that never reports an identity
    pub fn silent() -> Self {
        Self {
            info: None,
            hooks: HashMap::new(),
            fail_load: false,
            hang_load: false,
        }
    }

    pub fn with_hook(mut self, hook: Hook) -> Self {
        self.hooks.insert(hook, Behavior::Complete);
        self
    }

    pub fn failing_on(mut self, hook: Hook) -> Self {
        self.hooks.insert(hook, Behavior::Fail);
        self
    }

    pub fn hanging_on(mut self, hook: Hook) -> Self {
        self.hooks.insert(hook, Behavior::Hang);
        self
    }

    /// Source raises while it is being executed
    pub fn throwing(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Source never finishes executing
    pub fn hanging(mut self) -> Self {
        self.hang_load = true;
        self
    }
}

/// Shared record of what scripted plugins were asked to do
#[derive(Default)]
pub struct Journal {
    calls: Mutex<Vec<(String, Hook)>>,
    shutdowns: Mutex<Vec<String>>,
    scopes: Mutex<Vec<(String, BTreeSet<FacadeKind>)>>,
    executions: Mutex<usize>,
}

impl Journal {
    pub fn calls(&self) -> Vec<(String, Hook)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, plugin_id: &str, hook: Hook) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, h)| id == plugin_id && *h == hook)
            .count()
    }

    pub fn shutdowns(&self) -> Vec<String> {
        self.shutdowns.lock().unwrap().clone()
    }

    /// Facades of the scope most recently built for `plugin_id`
    pub fn scope_of(&self, plugin_id: &str) -> Option<BTreeSet<FacadeKind>> {
        self.scopes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == plugin_id)
            .map(|(_, facades)| facades.clone())
    }

    pub fn executions(&self) -> usize {
        *self.executions.lock().unwrap()
    }
}

/// Executor that runs [`Script`]s instead of guest code
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<Vec<u8>, Script>>,
    pub journal: Arc<Journal>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a script under a source; returns the source bytes
    pub fn add(&self, source: &str, script: Script) -> Vec<u8> {
        self.scripts
            .lock()
            .unwrap()
            .insert(source.as_bytes().to_vec(), script);
        source.as_bytes().to_vec()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, source: &[u8], scope: Scope) -> Result<Execution, EngineError> {
        let plugin_id = scope.plugin_id().to_string();
        *self.journal.executions.lock().unwrap() += 1;
        self.journal
            .scopes
            .lock()
            .unwrap()
            .push((plugin_id.clone(), scope.exposed()));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(source)
            .cloned()
            .ok_or_else(|| EngineError::Execution {
                plugin_id: plugin_id.clone(),
                reason: "unknown source".to_string(),
            })?;

        if script.hang_load {
            std::future::pending::<()>().await;
        }
        if script.fail_load {
            return Err(EngineError::Execution {
                plugin_id,
                reason: "ReferenceError: world is not defined".to_string(),
            });
        }
        let info = script
            .info
            .clone()
            .ok_or_else(|| EngineError::MissingPluginInfo(plugin_id.clone()))?;

        Ok(Execution {
            info,
            hooks: script.hooks.keys().copied().collect::<HookSet>(),
            instance: Arc::new(ScriptedInstance {
                plugin_id,
                hooks: script.hooks,
                journal: self.journal.clone(),
            }),
        })
    }
}

struct ScriptedInstance {
    plugin_id: String,
    hooks: HashMap<Hook, Behavior>,
    journal: Arc<Journal>,
}

#[async_trait]
impl PluginInstance for ScriptedInstance {
    async fn invoke(&self, hook: Hook, input: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.journal
            .calls
            .lock()
            .unwrap()
            .push((self.plugin_id.clone(), hook));

        match self.hooks.get(&hook) {
            Some(Behavior::Complete) => Ok(input.to_vec()),
            Some(Behavior::Hang) => std::future::pending().await,
            Some(Behavior::Fail) | None => Err(EngineError::HookFailed {
                plugin_id: self.plugin_id.clone(),
                hook: hook.export_name().to_string(),
                reason: "TypeError: cannot read properties of undefined".to_string(),
            }),
        }
    }

    async fn shutdown(&self) {
        self.journal
            .shutdowns
            .lock()
            .unwrap()
            .push(self.plugin_id.clone());
    }
}

/// Builder for WAT guest modules speaking the Extism kernel ABI
///
/// Every export body has the helpers `$emit`, `$echo_input` and `$call_host`
/// in scope.
pub struct WatPlugin {
    info: Option<String>,
    info_traps: bool,
    exports: Vec<String>,
    data: Vec<(u32, Vec<u8>)>,
}

const DATA_STRIDE: u32 = 4096;

impl WatPlugin {
    /// A module whose `plugin_info` returns `info` as JSON
    pub fn new(info: &PluginInfo) -> Self {
        Self::with_raw_info(&serde_json::to_string(info).unwrap())
    }

    pub fn matching(manifest: &Manifest) -> Self {
        Self::new(&PluginInfo::matching(manifest))
    }

    /// A module whose `plugin_info` returns arbitrary bytes
    pub fn with_raw_info(raw: &str) -> Self {
        Self {
            info: Some(raw.to_string()),
            info_traps: false,
            exports: Vec::new(),
            data: Vec::new(),
        }
    }

    /// A module without a `plugin_info` export
    pub fn without_info() -> Self {
        Self {
            info: None,
            info_traps: false,
            exports: Vec::new(),
            data: Vec::new(),
        }
    }

    /// `plugin_info` traps instead of reporting
    pub fn trapping_info(mut self) -> Self {
        self.info_traps = true;
        self
    }

    /// Export that returns its input unchanged
    pub fn echo(self, export: &str) -> Self {
        self.export(export, "(call $echo_input)")
    }

    /// Export that traps
    pub fn trap(self, export: &str) -> Self {
        self.export(export, "unreachable")
    }

    /// Export that never returns
    pub fn spin(self, export: &str) -> Self {
        self.export(export, "(loop $forever (br $forever))")
    }

    /// Export that sends `request` through `lorekeeper_call` and returns the
    /// host's response
    pub fn host_call(mut self, export: &str, request: &serde_json::Value) -> Self {
        let bytes = serde_json::to_vec(request).unwrap();
        let offset = DATA_STRIDE * (self.data.len() as u32 + 1);
        let body = format!(
            "(call $call_host (i32.const {}) (i32.const {}))",
            offset,
            bytes.len()
        );
        self.data.push((offset, bytes));
        self.export(export, &body)
    }

    fn export(mut self, export: &str, body: &str) -> Self {
        self.exports.push(format!(
            "  (func (export \"{}\") (result i32)\n    {}\n    (i32.const 0))",
            export, body
        ));
        self
    }

    pub fn build(&self) -> String {
        let mut wat = String::from(WAT_PRELUDE);

        let mut segments = self.data.clone();
        if let Some(info) = &self.info {
            segments.push((0, info.as_bytes().to_vec()));
            let body = if self.info_traps {
                "unreachable".to_string()
            } else {
                format!("(call $emit (i32.const 0) (i32.const {}))", info.len())
            };
            writeln!(
                wat,
                "  (func (export \"plugin_info\") (result i32)\n    {}\n    (i32.const 0))",
                body
            )
            .unwrap();
        }

        for (offset, bytes) in &segments {
            writeln!(wat, "  (data (i32.const {}) \"{}\")", offset, wat_escape(bytes)).unwrap();
        }
        for export in &self.exports {
            writeln!(wat, "{}", export).unwrap();
        }

        wat.push(')');
        wat
    }

    pub fn source(&self) -> Vec<u8> {
        self.build().into_bytes()
    }
}

fn wat_escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (b.is_ascii_graphic() && b != b'"' && b != b'\\') || b == b' ' {
            out.push(b as char);
        } else {
            write!(out, "\\{:02x}", b).unwrap();
        }
    }
    out
}

const WAT_PRELUDE: &str = r#"(module
  (import "extism:host/env" "alloc" (func $alloc (param i64) (result i64)))
  (import "extism:host/env" "length" (func $length (param i64) (result i64)))
  (import "extism:host/env" "store_u8" (func $store_u8 (param i64 i32)))
  (import "extism:host/env" "input_length" (func $input_length (result i64)))
  (import "extism:host/env" "input_load_u8" (func $input_load_u8 (param i64) (result i32)))
  (import "extism:host/env" "output_set" (func $output_set (param i64 i64)))
  (import "extism:host/user" "lorekeeper_call" (func $lorekeeper_call (param i64) (result i64)))
  (memory 1)
  (func $copy_out (param $ptr i32) (param $len i32) (result i64)
    (local $off i64) (local $i i32)
    (local.set $off (call $alloc (i64.extend_i32_u (local.get $len))))
    (block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $i) (local.get $len)))
        (call $store_u8
          (i64.add (local.get $off) (i64.extend_i32_u (local.get $i)))
          (i32.load8_u (i32.add (local.get $ptr) (local.get $i))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (local.get $off))
  (func $emit (param $ptr i32) (param $len i32)
    (call $output_set
      (call $copy_out (local.get $ptr) (local.get $len))
      (i64.extend_i32_u (local.get $len))))
  (func $echo_input
    (local $len i64) (local $off i64) (local $i i64)
    (local.set $len (call $input_length))
    (local.set $off (call $alloc (local.get $len)))
    (block $done
      (loop $next
        (br_if $done (i64.ge_u (local.get $i) (local.get $len)))
        (call $store_u8
          (i64.add (local.get $off) (local.get $i))
          (call $input_load_u8 (local.get $i)))
        (local.set $i (i64.add (local.get $i) (i64.const 1)))
        (br $next)))
    (call $output_set (local.get $off) (local.get $len)))
  (func $call_host (param $ptr i32) (param $len i32)
    (local $response i64)
    (local.set $response
      (call $lorekeeper_call (call $copy_out (local.get $ptr) (local.get $len))))
    (call $output_set (local.get $response) (call $length (local.get $response))))
"#;
