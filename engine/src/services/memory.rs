//! In-memory backing services

use super::{
    AnalyticsService, KeyValueStore, Result, RpgService, ServiceError, UiContributionKind,
    UiService, WorldService,
};
use async_trait::async_trait;
use sdk::protocol::NotificationLevel;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, RwLock};

/// World content held in memory
///
/// Entities are JSON objects grouped by type. Characters and locations are
/// the `character` and `location` types filtered on their `world_id` field.
#[derive(Default)]
pub struct MemoryWorld {
    worlds: RwLock<HashMap<String, Value>>,
    entities: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a world
    pub async fn insert_world(&self, world_id: &str, world: Value) {
        self.worlds.write().await.insert(world_id.to_string(), world);
    }

    /// Number of entities of a type
    pub async fn count(&self, entity_type: &str) -> usize {
        self.entities
            .read()
            .await
            .get(entity_type)
            .map(|e| e.len())
            .unwrap_or(0)
    }

    async fn in_world(&self, entity_type: &str, world_id: &str) -> Vec<Value> {
        self.entities
            .read()
            .await
            .get(entity_type)
            .map(|entities| {
                entities
                    .values()
                    .filter(|e| e.get("world_id").and_then(Value::as_str) == Some(world_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorldService for MemoryWorld {
    async fn get_world(&self, world_id: &str) -> Result<Value> {
        self.worlds
            .read()
            .await
            .get(world_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("world '{}'", world_id)))
    }

    async fn get_characters(&self, world_id: &str) -> Result<Vec<Value>> {
        Ok(self.in_world("character", world_id).await)
    }

    async fn get_locations(&self, world_id: &str) -> Result<Vec<Value>> {
        Ok(self.in_world("location", world_id).await)
    }

    async fn create_entity(&self, entity_type: &str, data: Value) -> Result<Value> {
        let Value::Object(mut fields) = data else {
            return Err(ServiceError::InvalidRequest(
                "entity data must be a JSON object".to_string(),
            ));
        };

        let id = match fields.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        fields.insert("id".to_string(), Value::String(id.clone()));
        let entity = Value::Object(fields);

        self.entities
            .write()
            .await
            .entry(entity_type.to_string())
            .or_default()
            .insert(id, entity.clone());

        Ok(entity)
    }

    async fn update_entity(&self, entity_type: &str, id: &str, data: Value) -> Result<Value> {
        let Value::Object(changes) = data else {
            return Err(ServiceError::InvalidRequest(
                "entity data must be a JSON object".to_string(),
            ));
        };

        let mut entities = self.entities.write().await;
        let entity = entities
            .get_mut(entity_type)
            .and_then(|e| e.get_mut(id))
            .ok_or_else(|| ServiceError::NotFound(format!("{} '{}'", entity_type, id)))?;

        if let Value::Object(fields) = &mut *entity {
            for (key, value) in changes {
                if key != "id" {
                    fields.insert(key, value);
                }
            }
        }

        Ok(entity.clone())
    }

    async fn delete_entity(&self, entity_type: &str, id: &str) -> Result<()> {
        self.entities
            .write()
            .await
            .get_mut(entity_type)
            .and_then(|e| e.remove(id))
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("{} '{}'", entity_type, id)))
    }
}

/// One UI call made by a plugin
#[derive(Debug, Clone, PartialEq)]
pub struct UiContribution {
    pub plugin_id: String,
    pub kind: UiContributionKind,
    pub payload: Value,
}

/// UI service that records contributions instead of rendering them
#[derive(Default)]
pub struct RecordingUi {
    contributions: Mutex<Vec<UiContribution>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contributions(&self) -> Vec<UiContribution> {
        self.contributions.lock().await.clone()
    }

    async fn record(&self, plugin_id: &str, kind: UiContributionKind, payload: Value) {
        tracing::debug!(plugin = %plugin_id, ?kind, "UI contribution recorded");
        self.contributions.lock().await.push(UiContribution {
            plugin_id: plugin_id.to_string(),
            kind,
            payload,
        });
    }
}

#[async_trait]
impl UiService for RecordingUi {
    async fn register_menu_item(&self, plugin_id: &str, item: Value) -> Result<()> {
        self.record(plugin_id, UiContributionKind::MenuItem, item).await;
        Ok(())
    }

    async fn register_toolbar_button(&self, plugin_id: &str, button: Value) -> Result<()> {
        self.record(plugin_id, UiContributionKind::ToolbarButton, button).await;
        Ok(())
    }

    async fn show_modal(&self, plugin_id: &str, modal: Value) -> Result<Value> {
        self.record(plugin_id, UiContributionKind::Modal, modal).await;
        // Nobody is there to answer
        Ok(Value::Null)
    }

    async fn show_notification(
        &self,
        plugin_id: &str,
        message: &str,
        level: NotificationLevel,
    ) -> Result<()> {
        self.record(
            plugin_id,
            UiContributionKind::Notification,
            json!({ "message": message, "level": level }),
        )
        .await;
        Ok(())
    }

    async fn register_component(
        &self,
        plugin_id: &str,
        name: &str,
        component: Value,
    ) -> Result<()> {
        self.record(
            plugin_id,
            UiContributionKind::Component,
            json!({ "name": name, "component": component }),
        )
        .await;
        Ok(())
    }
}

/// Key-value store backed by an ordered map
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Stand-in for services the host did not wire up
pub struct Unavailable;

#[async_trait]
impl AnalyticsService for Unavailable {
    async fn get_metrics(&self, _world_id: &str) -> Result<Value> {
        Err(ServiceError::Unavailable("analytics".to_string()))
    }

    async fn get_recommendations(&self, _world_id: &str) -> Result<Vec<Value>> {
        Err(ServiceError::Unavailable("analytics".to_string()))
    }
}

#[async_trait]
impl RpgService for Unavailable {
    async fn generate_statblock(&self, _creature: Value) -> Result<Value> {
        Err(ServiceError::Unavailable("rpg".to_string()))
    }

    async fn calculate_encounter(&self, _party: Value, _monsters: Value) -> Result<Value> {
        Err(ServiceError::Unavailable("rpg".to_string()))
    }

    async fn roll_dice(&self, _formula: &str) -> Result<Value> {
        Err(ServiceError::Unavailable("rpg".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_world_characters_filtered_by_world() {
        let world = MemoryWorld::new();
        world
            .create_entity("character", json!({"name": "Ana", "world_id": "w1"}))
            .await
            .unwrap();
        world
            .create_entity("character", json!({"name": "Bo", "world_id": "w2"}))
            .await
            .unwrap();

        let characters = world.get_characters("w1").await.unwrap();
        assert_eq!(characters.len(), 1);
        assert_eq!(characters[0]["name"], "Ana");
        assert!(characters[0]["id"].is_string());
    }

    #[tokio::test]
    async fn test_world_update_keeps_id() {
        let world = MemoryWorld::new();
        let created = world
            .create_entity("location", json!({"id": "l1", "name": "Keep"}))
            .await
            .unwrap();
        assert_eq!(created["id"], "l1");

        let updated = world
            .update_entity("location", "l1", json!({"id": "other", "name": "Tower"}))
            .await
            .unwrap();
        assert_eq!(updated["id"], "l1");
        assert_eq!(updated["name"], "Tower");

        world.delete_entity("location", "l1").await.unwrap();
        assert!(world.delete_entity("location", "l1").await.is_err());
    }

    #[tokio::test]
    async fn test_store_prefix_keys() {
        let store = MemoryStore::new();
        store.set("plugin:a:x", json!(1)).await.unwrap();
        store.set("plugin:a:y", json!(2)).await.unwrap();
        store.set("plugin:ab:z", json!(3)).await.unwrap();

        let keys = store.keys("plugin:a:").await.unwrap();
        assert_eq!(keys, vec!["plugin:a:x", "plugin:a:y"]);
    }

    #[tokio::test]
    async fn test_unavailable_reports_error() {
        let result = RpgService::roll_dice(&Unavailable, "1d20").await;
        assert!(matches!(result, Err(ServiceError::Unavailable(_))));
    }
}
