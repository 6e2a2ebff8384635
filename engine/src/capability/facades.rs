//! Capability facades
//!
//! Thin proxies over the backing services. A facade exposes only the subset of
//! a service its permission covers; `WorldReadFacade` and `WorldWriteFacade`
//! share one `WorldService` but never each other's methods.
//!
//! Each facade also knows how to answer its slice of the wire protocol
//! (`handle`), which is what sandboxed plugins reach.

use crate::services::{
    AnalyticsService, KeyValueStore, Result, RpgService, ServiceError, UiService, WorldService,
};
use sdk::protocol::{
    AnalyticsCall, HostCall, LogLevel, NotificationLevel, RpgCall, StorageCall, UiCall, UtilsCall,
    WorldReadCall, WorldWriteCall,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Accessors for world, character and location data
#[derive(Clone)]
pub struct WorldReadFacade {
    world: Arc<dyn WorldService>,
}

impl WorldReadFacade {
    pub(crate) fn new(world: Arc<dyn WorldService>) -> Self {
        Self { world }
    }

    pub async fn get_world(&self, world_id: &str) -> Result<Value> {
        self.world.get_world(world_id).await
    }

    pub async fn get_characters(&self, world_id: &str) -> Result<Vec<Value>> {
        self.world.get_characters(world_id).await
    }

    pub async fn get_locations(&self, world_id: &str) -> Result<Vec<Value>> {
        self.world.get_locations(world_id).await
    }

    pub(crate) async fn handle(&self, call: WorldReadCall) -> Result<Value> {
        match call {
            WorldReadCall::GetWorld { world_id } => self.get_world(&world_id).await,
            WorldReadCall::GetCharacters { world_id } => {
                Ok(Value::Array(self.get_characters(&world_id).await?))
            }
            WorldReadCall::GetLocations { world_id } => {
                Ok(Value::Array(self.get_locations(&world_id).await?))
            }
        }
    }
}

/// Entity mutation accessors
#[derive(Clone)]
pub struct WorldWriteFacade {
    world: Arc<dyn WorldService>,
}

impl WorldWriteFacade {
    pub(crate) fn new(world: Arc<dyn WorldService>) -> Self {
        Self { world }
    }

    pub async fn create_entity(&self, entity_type: &str, data: Value) -> Result<Value> {
        self.world.create_entity(entity_type, data).await
    }

    pub async fn update_entity(&self, entity_type: &str, id: &str, data: Value) -> Result<Value> {
        self.world.update_entity(entity_type, id, data).await
    }

    pub async fn delete_entity(&self, entity_type: &str, id: &str) -> Result<()> {
        self.world.delete_entity(entity_type, id).await
    }

    pub(crate) async fn handle(&self, call: WorldWriteCall) -> Result<Value> {
        match call {
            WorldWriteCall::CreateEntity { entity_type, data } => {
                self.create_entity(&entity_type, data).await
            }
            WorldWriteCall::UpdateEntity {
                entity_type,
                id,
                data,
            } => self.update_entity(&entity_type, &id, data).await,
            WorldWriteCall::DeleteEntity { entity_type, id } => {
                self.delete_entity(&entity_type, &id).await?;
                Ok(Value::Null)
            }
        }
    }
}

/// UI contributions, attributed to the owning plugin
#[derive(Clone)]
pub struct UiFacade {
    plugin_id: String,
    ui: Arc<dyn UiService>,
}

impl UiFacade {
    pub(crate) fn new(plugin_id: &str, ui: Arc<dyn UiService>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            ui,
        }
    }

    pub async fn register_menu_item(&self, item: Value) -> Result<()> {
        self.ui.register_menu_item(&self.plugin_id, item).await
    }

    pub async fn register_toolbar_button(&self, button: Value) -> Result<()> {
        self.ui.register_toolbar_button(&self.plugin_id, button).await
    }

    pub async fn show_modal(&self, modal: Value) -> Result<Value> {
        self.ui.show_modal(&self.plugin_id, modal).await
    }

    pub async fn show_notification(&self, message: &str, level: NotificationLevel) -> Result<()> {
        self.ui
            .show_notification(&self.plugin_id, message, level)
            .await
    }

    pub async fn register_component(&self, name: &str, component: Value) -> Result<()> {
        self.ui
            .register_component(&self.plugin_id, name, component)
            .await
    }

    pub(crate) async fn handle(&self, call: UiCall) -> Result<Value> {
        match call {
            UiCall::RegisterMenuItem { item } => self.register_menu_item(item).await?,
            UiCall::RegisterToolbarButton { button } => {
                self.register_toolbar_button(button).await?
            }
            UiCall::ShowModal { modal } => return self.show_modal(modal).await,
            UiCall::ShowNotification { message, level } => {
                self.show_notification(&message, level).await?
            }
            UiCall::RegisterComponent { name, component } => {
                self.register_component(&name, component).await?
            }
        }
        Ok(Value::Null)
    }
}

#[derive(Clone)]
pub struct AnalyticsFacade {
    analytics: Arc<dyn AnalyticsService>,
}

impl AnalyticsFacade {
    pub(crate) fn new(analytics: Arc<dyn AnalyticsService>) -> Self {
        Self { analytics }
    }

    pub async fn get_metrics(&self, world_id: &str) -> Result<Value> {
        self.analytics.get_metrics(world_id).await
    }

    pub async fn get_recommendations(&self, world_id: &str) -> Result<Vec<Value>> {
        self.analytics.get_recommendations(world_id).await
    }

    pub(crate) async fn handle(&self, call: AnalyticsCall) -> Result<Value> {
        match call {
            AnalyticsCall::GetMetrics { world_id } => self.get_metrics(&world_id).await,
            AnalyticsCall::GetRecommendations { world_id } => {
                Ok(Value::Array(self.get_recommendations(&world_id).await?))
            }
        }
    }
}

#[derive(Clone)]
pub struct RpgFacade {
    rpg: Arc<dyn RpgService>,
}

impl RpgFacade {
    pub(crate) fn new(rpg: Arc<dyn RpgService>) -> Self {
        Self { rpg }
    }

    pub async fn generate_statblock(&self, creature: Value) -> Result<Value> {
        self.rpg.generate_statblock(creature).await
    }

    pub async fn calculate_encounter(&self, party: Value, monsters: Value) -> Result<Value> {
        self.rpg.calculate_encounter(party, monsters).await
    }

    pub async fn roll_dice(&self, formula: &str) -> Result<Value> {
        self.rpg.roll_dice(formula).await
    }

    pub(crate) async fn handle(&self, call: RpgCall) -> Result<Value> {
        match call {
            RpgCall::GenerateStatblock { creature } => self.generate_statblock(creature).await,
            RpgCall::CalculateEncounter { party, monsters } => {
                self.calculate_encounter(party, monsters).await
            }
            RpgCall::RollDice { formula } => self.roll_dice(&formula).await,
        }
    }
}

/// Key-value storage confined to `plugin:<len>:<id>:`
///
/// Keys are given and returned without the prefix, so a plugin can neither
/// name nor list another plugin's keys.
#[derive(Clone)]
pub struct StorageFacade {
    prefix: String,
    store: Arc<dyn KeyValueStore>,
}

impl StorageFacade {
    pub(crate) fn new(plugin_id: &str, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            prefix: storage_prefix(plugin_id),
            store,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn scoped(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "storage key must not be empty".to_string(),
            ));
        }
        Ok(format!("{}{}", self.prefix, key))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.store.get(&self.scoped(key)?).await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.store.set(&self.scoped(key)?, value).await
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.store.remove(&self.scoped(key)?).await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys(&self.prefix)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(self.prefix.as_str()).map(str::to_string))
            .collect())
    }

    pub(crate) async fn handle(&self, call: StorageCall) -> Result<Value> {
        match call {
            StorageCall::Get { key } => Ok(self.get(&key).await?.unwrap_or(Value::Null)),
            StorageCall::Set { key, value } => {
                self.set(&key, value).await?;
                Ok(Value::Null)
            }
            StorageCall::Remove { key } => Ok(Value::Bool(self.remove(&key).await?)),
            StorageCall::Keys => Ok(json!(self.keys().await?)),
        }
    }
}

/// Storage namespace of a plugin
///
/// The byte length of the id leads, so no namespace is a prefix of another
/// even when ids contain `:`.
pub fn storage_prefix(plugin_id: &str) -> String {
    format!("plugin:{}:{}:", plugin_id.len(), plugin_id)
}

/// Small helpers with no backing service
#[derive(Clone, Default)]
pub struct UtilsFacade;

impl UtilsFacade {
    pub fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Lowercase ASCII alphanumerics joined by single dashes
    pub fn slugify(&self, text: &str) -> String {
        let mut slug = String::with_capacity(text.len());
        for c in text.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
        while slug.ends_with('-') {
            slug.pop();
        }
        slug
    }

    /// Current time as RFC 3339
    pub fn now(&self) -> String {
        chrono::Utc::now().to_rfc3339()
    }

    pub(crate) fn handle(&self, call: UtilsCall) -> Value {
        match call {
            UtilsCall::GenerateId => Value::String(self.generate_id()),
            UtilsCall::Slugify { text } => Value::String(self.slugify(&text)),
            UtilsCall::Now => Value::String(self.now()),
        }
    }
}

/// Primitives every plugin needs to run at all
#[derive(Clone)]
pub struct HostPrimitives {
    plugin_id: String,
    max_sleep: Duration,
}

impl HostPrimitives {
    pub(crate) fn new(plugin_id: &str, max_sleep: Duration) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            max_sleep,
        }
    }

    /// Emit a log line tagged with the plugin id
    pub fn log(&self, level: LogLevel, message: &str) {
        let plugin = self.plugin_id.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(plugin, guest_message = %message, "plugin log"),
            LogLevel::Info => tracing::info!(plugin, guest_message = %message, "plugin log"),
            LogLevel::Warn => tracing::warn!(plugin, guest_message = %message, "plugin log"),
            LogLevel::Error => tracing::error!(plugin, guest_message = %message, "plugin log"),
        }
    }

    /// Milliseconds since the Unix epoch
    pub fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }

    /// Sleep, clamped to the host's per-call budget
    pub async fn sleep(&self, millis: u64) -> Duration {
        let duration = Duration::from_millis(millis).min(self.max_sleep);
        tokio::time::sleep(duration).await;
        duration
    }

    pub(crate) async fn handle(&self, call: HostCall) -> Value {
        match call {
            HostCall::Log { level, message } => {
                self.log(level, &message);
                Value::Null
            }
            HostCall::Sleep { millis } => {
                let slept = self.sleep(millis).await;
                json!({ "slept_ms": slept.as_millis() as u64, "now_ms": self.now_ms() })
            }
        }
    }
}
