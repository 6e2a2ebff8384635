//! Plugin registry
//!
//! Owns every installed plugin and tracks which of them are active. Records
//! live in a slot arena; the id index and the active list hold
//! [`PluginKey`]s, never references. Freeing a slot bumps its generation, so
//! a key that outlived its plugin resolves to nothing.

use crate::sandbox::PluginInstance;
use sdk::errors::EngineError;
use sdk::plugin::PluginRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Whether an id may be registered again after removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryPolicy {
    /// Removed ids are free for reuse
    #[default]
    AllowReuse,
    /// Removed ids are retired for the lifetime of the registry
    Tombstone,
}

/// Generational handle to a registry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginKey {
    index: u32,
    generation: u32,
}

struct Entry {
    record: PluginRecord,
    instance: Arc<dyn PluginInstance>,
    /// Install sequence number
    installed: u64,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// A plugin removed from the registry, handed back for shutdown
pub struct Removed {
    pub record: PluginRecord,
    pub instance: Arc<dyn PluginInstance>,
    pub was_active: bool,
}

pub struct PluginRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_id: HashMap<String, PluginKey>,
    /// Activation order
    active: Vec<PluginKey>,
    retired: HashSet<String>,
    installs: u64,
    policy: RegistryPolicy,
}

impl PluginRegistry {
    pub fn new(policy: RegistryPolicy) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            active: Vec::new(),
            retired: HashSet::new(),
            installs: 0,
            policy,
        }
    }

    pub fn policy(&self) -> RegistryPolicy {
        self.policy
    }

    /// Check that `id` could be registered right now
    pub fn check_available(&self, id: &str) -> Result<(), EngineError> {
        if self.by_id.contains_key(id) {
            return Err(EngineError::DuplicatePlugin(id.to_string()));
        }
        if self.retired.contains(id) {
            return Err(EngineError::IdRetired(id.to_string()));
        }
        Ok(())
    }

    /// Insert an inactive plugin
    pub fn register(
        &mut self,
        record: PluginRecord,
        instance: Arc<dyn PluginInstance>,
    ) -> Result<PluginKey, EngineError> {
        self.check_available(&record.id)?;

        let id = record.id.clone();
        let entry = Some(Entry {
            record,
            instance,
            installed: self.installs,
        });
        self.installs += 1;

        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = entry;
                PluginKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry,
                });
                PluginKey {
                    index,
                    generation: 0,
                }
            }
        };

        self.by_id.insert(id, key);
        Ok(key)
    }

    /// Add to the active set; returns false if it was already active
    pub fn activate(&mut self, id: &str) -> Result<bool, EngineError> {
        let key = self.key(id)?;
        if self.active.contains(&key) {
            return Ok(false);
        }
        self.active.push(key);
        Ok(true)
    }

    /// Remove from the active set; returns false if it was not active
    pub fn deactivate(&mut self, id: &str) -> Result<bool, EngineError> {
        let key = self.key(id)?;
        let before = self.active.len();
        self.active.retain(|k| *k != key);
        Ok(self.active.len() != before)
    }

    /// Delete from the mapping and the active set
    pub fn remove(&mut self, id: &str) -> Option<Removed> {
        let key = self.by_id.remove(id)?;
        let before = self.active.len();
        self.active.retain(|k| *k != key);
        let was_active = self.active.len() != before;

        let slot = self.slots.get_mut(key.index as usize)?;
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);

        if self.policy == RegistryPolicy::Tombstone {
            self.retired.insert(id.to_string());
        }

        Some(Removed {
            record: entry.record,
            instance: entry.instance,
            was_active,
        })
    }

    pub fn get(&self, id: &str) -> Option<&PluginRecord> {
        let key = self.by_id.get(id)?;
        self.resolve(*key).map(|e| &e.record)
    }

    pub fn instance(&self, id: &str) -> Option<Arc<dyn PluginInstance>> {
        let key = self.by_id.get(id)?;
        self.resolve(*key).map(|e| e.instance.clone())
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.by_id
            .get(id)
            .map(|key| self.active.contains(key))
            .unwrap_or(false)
    }

    /// Active records in activation order
    pub fn active(&self) -> Vec<&PluginRecord> {
        self.active
            .iter()
            .filter_map(|key| self.resolve(*key))
            .map(|e| &e.record)
            .collect()
    }

    /// Active records with their instances, detached from the registry
    pub fn active_instances(&self) -> Vec<(PluginRecord, Arc<dyn PluginInstance>)> {
        self.active
            .iter()
            .filter_map(|key| self.resolve(*key))
            .map(|e| (e.record.clone(), e.instance.clone()))
            .collect()
    }

    /// Installed ids in install order
    pub fn ids(&self) -> Vec<String> {
        let mut entries: Vec<&Entry> = self
            .slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .collect();
        entries.sort_by_key(|e| e.installed);
        entries.into_iter().map(|e| e.record.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn key(&self, id: &str) -> Result<PluginKey, EngineError> {
        self.by_id
            .get(id)
            .copied()
            .ok_or_else(|| EngineError::PluginNotLoaded(id.to_string()))
    }

    fn resolve(&self, key: PluginKey) -> Option<&Entry> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_ref()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(RegistryPolicy::default())
    }
}
