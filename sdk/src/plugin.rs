//! Plugin identity, records and hooks

use crate::errors::EngineError;
use crate::manifest::{Category, Manifest, PermissionSet};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// What a plugin reports about itself from its `plugin_info` export
///
/// None of this is trusted until it has been compared with the manifest.
/// Only the identity fields are strict; a null description or a category the
/// host does not know never rejects the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(
        default,
        deserialize_with = "known_category",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<Category>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn known_category<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Category>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value(value).ok()))
}

impl PluginInfo {
    /// Build the info a plugin would need to report to match `manifest`
    pub fn matching(manifest: &Manifest) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            author: manifest.author.clone(),
            description: String::new(),
            category: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Optional callbacks a plugin may implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// Called once right after the plugin becomes active
    Activate,
    /// Called before the plugin is deactivated or unloaded
    Deactivate,
    /// A world was opened in the host
    WorldLoaded,
    /// An entity was created in the current world
    EntityCreated,
}

impl Hook {
    pub const ALL: [Hook; 4] = [
        Hook::Activate,
        Hook::Deactivate,
        Hook::WorldLoaded,
        Hook::EntityCreated,
    ];

    /// Name of the guest export implementing this hook
    pub fn export_name(&self) -> &'static str {
        match self {
            Hook::Activate => "on_activate",
            Hook::Deactivate => "on_deactivate",
            Hook::WorldLoaded => "on_world_load",
            Hook::EntityCreated => "on_entity_created",
        }
    }

    /// Host-side event name, as the web front end spells it
    pub fn event_name(&self) -> &'static str {
        match self {
            Hook::Activate => "onActivate",
            Hook::Deactivate => "onDeactivate",
            Hook::WorldLoaded => "onWorldLoad",
            Hook::EntityCreated => "onEntityCreated",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.export_name())
    }
}

impl FromStr for Hook {
    type Err = EngineError;

    /// Accepts either the export name or the event name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hook::ALL
            .into_iter()
            .find(|h| h.export_name() == s || h.event_name() == s)
            .ok_or_else(|| EngineError::Config(format!("unknown hook '{}'", s)))
    }
}

/// Which hooks a plugin implements
///
/// Computed once when the plugin is loaded. Dispatch consults this set instead
/// of probing the plugin again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSet(BTreeSet<Hook>);

impl HookSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, hook: Hook) {
        self.0.insert(hook);
    }

    pub fn contains(&self, hook: Hook) -> bool {
        self.0.contains(&hook)
    }

    pub fn iter(&self) -> impl Iterator<Item = Hook> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Hook> for HookSet {
    fn from_iter<I: IntoIterator<Item = Hook>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A validated, immutable plugin record
///
/// Identity comes from the plugin's own report after it was checked against
/// the manifest. Permissions always come from the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub permissions: PermissionSet,
    pub category: Category,
    pub hooks: HookSet,
}

impl PluginRecord {
    /// Assemble a record from a validated report and its manifest
    pub fn from_validated(info: PluginInfo, manifest: &Manifest, hooks: HookSet) -> Self {
        let category = manifest.category.or(info.category).unwrap_or_default();
        Self {
            id: info.id,
            name: info.name,
            version: info.version,
            author: info.author,
            description: info.description,
            permissions: manifest.permissions.clone(),
            category,
            hooks,
        }
    }

    /// Check if the plugin implements a hook
    pub fn defines(&self, hook: Hook) -> bool {
        self.hooks.contains(hook)
    }
}
