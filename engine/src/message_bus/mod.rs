//! Message bus for plugin lifecycle notifications
//!
//! The MessageBus provides a pub/sub pattern so the host application can
//! observe plugin lifecycle changes and hook failures without coupling to the
//! plugin manager. It uses bounded channels to prevent unbounded memory growth
//! and supports both specific event subscriptions and global "All"
//! subscriptions.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Event types that can be published on the message bus
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    /// A plugin passed validation and was registered
    PluginLoaded,
    /// A plugin load was refused
    PluginRejected,
    /// A plugin joined the active set
    PluginActivated,
    /// A plugin left the active set but stays installed
    PluginDeactivated,
    /// A plugin was removed from the registry
    PluginUnloaded,
    /// A plugin hook failed or timed out
    HookFailed,
    /// Subscribe to all event types
    All,
}

/// Events that can be published on the message bus
#[derive(Debug, Clone)]
pub enum Event {
    PluginLoaded { plugin_id: String, version: String },
    PluginRejected { plugin_id: String, reason: String },
    PluginActivated { plugin_id: String },
    PluginDeactivated { plugin_id: String },
    PluginUnloaded { plugin_id: String },
    /// Hook failure with the hook's export name and the error text
    HookFailed {
        plugin_id: String,
        hook: String,
        error: String,
    },
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::PluginLoaded { .. } => EventType::PluginLoaded,
            Event::PluginRejected { .. } => EventType::PluginRejected,
            Event::PluginActivated { .. } => EventType::PluginActivated,
            Event::PluginDeactivated { .. } => EventType::PluginDeactivated,
            Event::PluginUnloaded { .. } => EventType::PluginUnloaded,
            Event::HookFailed { .. } => EventType::HookFailed,
        }
    }

    /// The plugin the event is about
    pub fn plugin_id(&self) -> &str {
        match self {
            Event::PluginLoaded { plugin_id, .. }
            | Event::PluginRejected { plugin_id, .. }
            | Event::PluginActivated { plugin_id }
            | Event::PluginDeactivated { plugin_id }
            | Event::PluginUnloaded { plugin_id }
            | Event::HookFailed { plugin_id, .. } => plugin_id,
        }
    }
}

/// Message bus for pub/sub communication between components
///
/// Each subscriber gets its own bounded channel. Publishing never blocks on a
/// full or closed subscriber; the event is dropped for that subscriber.
pub struct MessageBus {
    /// Map of event types to lists of subscribers
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl MessageBus {
    /// Create a new MessageBus
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a specific event type, or `EventType::All`
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(event_type).or_default().push(tx);
        rx
    }

    /// Publish an event to all subscribers
    ///
    /// The event is sent to all subscribers of the specific event type,
    /// as well as all subscribers of EventType::All. Closed subscribers are
    /// pruned.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(?event_type, "Subscriber channel full, dropping event");
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
