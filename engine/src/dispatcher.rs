//! Hook dispatch
//!
//! Delivers a hook to every active plugin that implements it, one plugin at a
//! time in activation order. Each call is bounded by the hook timeout. A
//! failing or hanging plugin is logged, reported and skipped; it is never
//! evicted and its failure never reaches the caller.

use crate::message_bus::{Event, MessageBus};
use crate::registry::PluginRegistry;
use crate::sandbox::PluginInstance;
use sdk::errors::EngineError;
use sdk::plugin::Hook;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// What happened when one plugin received a hook
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// The plugin does not implement the hook
    NotDefined,
    Completed { output: Vec<u8> },
    Failed { error: String },
    TimedOut,
}

impl HookOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, HookOutcome::Failed { .. } | HookOutcome::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginOutcome {
    pub plugin_id: String,
    pub outcome: HookOutcome,
}

/// Per-plugin results of one dispatch round
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HookReport {
    /// `None` when the hook name was not recognised
    pub hook: Option<Hook>,
    pub outcomes: Vec<PluginOutcome>,
}

impl HookReport {
    /// Plugins whose hook ran to completion
    pub fn completed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, HookOutcome::Completed { .. }))
            .map(|o| o.plugin_id.as_str())
            .collect()
    }

    /// Plugins whose hook failed or timed out
    pub fn failures(&self) -> Vec<&PluginOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.is_failure())
            .collect()
    }

    pub fn outcome(&self, plugin_id: &str) -> Option<&HookOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.plugin_id == plugin_id)
            .map(|o| &o.outcome)
    }
}

pub struct HookDispatcher {
    timeout: Duration,
    message_bus: Option<Arc<MessageBus>>,
}

impl HookDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            message_bus: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_message_bus(&mut self, bus: Arc<MessageBus>) {
        self.message_bus = Some(bus);
    }

    /// Deliver `hook` to the active plugins of `registry`
    pub async fn dispatch(
        &self,
        registry: &PluginRegistry,
        hook: Hook,
        args: &Value,
    ) -> HookReport {
        let input = encode_args(args);
        let mut outcomes = Vec::new();

        for (record, instance) in registry.active_instances() {
            let outcome = if record.defines(hook) {
                self.invoke(&record.id, instance.as_ref(), hook, &input).await
            } else {
                HookOutcome::NotDefined
            };
            outcomes.push(PluginOutcome {
                plugin_id: record.id,
                outcome,
            });
        }

        tracing::debug!(
            %hook,
            delivered = outcomes
                .iter()
                .filter(|o| o.outcome != HookOutcome::NotDefined)
                .count(),
            "Hook dispatched"
        );

        HookReport {
            hook: Some(hook),
            outcomes,
        }
    }

    /// Invoke one hook on one plugin, containing any failure
    pub async fn invoke(
        &self,
        plugin_id: &str,
        instance: &dyn PluginInstance,
        hook: Hook,
        input: &[u8],
    ) -> HookOutcome {
        let error = match tokio::time::timeout(self.timeout, instance.invoke(hook, input)).await {
            Ok(Ok(output)) => return HookOutcome::Completed { output },
            Ok(Err(e)) => e,
            Err(_) => EngineError::HookTimeout {
                plugin_id: plugin_id.to_string(),
                hook: hook.export_name().to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            },
        };

        tracing::warn!(plugin = %plugin_id, %hook, error = %error, "Plugin hook failed");

        if let Some(bus) = &self.message_bus {
            bus.publish(Event::HookFailed {
                plugin_id: plugin_id.to_string(),
                hook: hook.export_name().to_string(),
                error: error.to_string(),
            })
            .await;
        }

        match error {
            EngineError::HookTimeout { .. } => HookOutcome::TimedOut,
            other => HookOutcome::Failed {
                error: other.to_string(),
            },
        }
    }
}

/// JSON bytes handed to hooks; `null` when there are no arguments
pub(crate) fn encode_args(args: &Value) -> Vec<u8> {
    // Serializing a Value cannot fail
    serde_json::to_vec(args).unwrap_or_else(|_| b"null".to_vec())
}
