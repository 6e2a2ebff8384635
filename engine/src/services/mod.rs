//! Backing services reached through capability facades
//!
//! These traits are the only contact points between plugin capabilities and
//! the host application. The host provides real implementations; this crate
//! ships in-memory ones for the CLI and tests (see [`memory`]).

use async_trait::async_trait;
use sdk::protocol::NotificationLevel;
use serde_json::Value;
use std::sync::Arc;

pub mod memory;

pub use memory::{MemoryStore, MemoryWorld, RecordingUi, Unavailable};

/// Result type for backing service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors a backing service can report
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// World content storage
///
/// Read and write accessors live on one trait; the capability gate decides
/// which of them a plugin can reach.
#[async_trait]
pub trait WorldService: Send + Sync {
    async fn get_world(&self, world_id: &str) -> Result<Value>;

    async fn get_characters(&self, world_id: &str) -> Result<Vec<Value>>;

    async fn get_locations(&self, world_id: &str) -> Result<Vec<Value>>;

    /// Create an entity and return it with its assigned id
    async fn create_entity(&self, entity_type: &str, data: Value) -> Result<Value>;

    async fn update_entity(&self, entity_type: &str, id: &str, data: Value) -> Result<Value>;

    async fn delete_entity(&self, entity_type: &str, id: &str) -> Result<()>;
}

/// Kind of UI contribution a plugin made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiContributionKind {
    MenuItem,
    ToolbarButton,
    Modal,
    Notification,
    Component,
}

/// Host user interface
///
/// Every call carries the contributing plugin's id so the host can attribute
/// and later remove its contributions.
#[async_trait]
pub trait UiService: Send + Sync {
    async fn register_menu_item(&self, plugin_id: &str, item: Value) -> Result<()>;

    async fn register_toolbar_button(&self, plugin_id: &str, button: Value) -> Result<()>;

    /// Show a modal; returns whatever the modal resolved to
    async fn show_modal(&self, plugin_id: &str, modal: Value) -> Result<Value>;

    async fn show_notification(
        &self,
        plugin_id: &str,
        message: &str,
        level: NotificationLevel,
    ) -> Result<()>;

    async fn register_component(&self, plugin_id: &str, name: &str, component: Value)
        -> Result<()>;
}

/// Flat key-value storage shared by all plugins and the host
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Returns true if the key existed
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Keys starting with `prefix`, in ascending order
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait AnalyticsService: Send + Sync {
    async fn get_metrics(&self, world_id: &str) -> Result<Value>;

    async fn get_recommendations(&self, world_id: &str) -> Result<Vec<Value>>;
}

/// Tabletop helpers. The arithmetic behind them lives in the host.
#[async_trait]
pub trait RpgService: Send + Sync {
    async fn generate_statblock(&self, creature: Value) -> Result<Value>;

    async fn calculate_encounter(&self, party: Value, monsters: Value) -> Result<Value>;

    async fn roll_dice(&self, formula: &str) -> Result<Value>;
}

/// The set of backing services a capability gate can hand out
#[derive(Clone)]
pub struct Services {
    pub world: Arc<dyn WorldService>,
    pub ui: Arc<dyn UiService>,
    pub store: Arc<dyn KeyValueStore>,
    pub analytics: Arc<dyn AnalyticsService>,
    pub rpg: Arc<dyn RpgService>,
}

impl Services {
    /// In-memory world, UI and storage; analytics and RPG report unavailable
    pub fn in_memory() -> Self {
        Self {
            world: Arc::new(MemoryWorld::new()),
            ui: Arc::new(RecordingUi::new()),
            store: Arc::new(MemoryStore::new()),
            analytics: Arc::new(Unavailable),
            rpg: Arc::new(Unavailable),
        }
    }

    pub fn with_world(mut self, world: Arc<dyn WorldService>) -> Self {
        self.world = world;
        self
    }

    pub fn with_ui(mut self, ui: Arc<dyn UiService>) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsService>) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn with_rpg(mut self, rpg: Arc<dyn RpgService>) -> Self {
        self.rpg = rpg;
        self
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::in_memory()
    }
}
