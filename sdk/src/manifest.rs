//! Manifest types for plugin identity and permissions
//!
//! A [`Manifest`] is authored by an administrator, out of band from the plugin
//! source. It is the only trusted statement of who a plugin is and which
//! capabilities it receives.

use crate::errors::EngineError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A single capability grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    /// Read worlds, characters and locations
    ReadWorld,
    /// Create, update and delete world entities
    WriteWorld,
    /// Register menus, toolbars, modals, notifications and components
    UiModify,
    /// Declared intent only; gates no facade yet
    NetworkExternal,
    /// Declared intent only; gates no facade yet
    FsLimited,
    /// Read analytics metrics and recommendations
    AnalyticsRead,
    /// Declared intent only; gates no facade yet
    ExportData,
    /// Statblocks, encounter difficulty and dice rolls
    RpgTools,
}

impl Permission {
    /// Every permission, in declaration order
    pub const ALL: [Permission; 8] = [
        Permission::ReadWorld,
        Permission::WriteWorld,
        Permission::UiModify,
        Permission::NetworkExternal,
        Permission::FsLimited,
        Permission::AnalyticsRead,
        Permission::ExportData,
        Permission::RpgTools,
    ];

    /// Wire name of the permission (e.g. `read-world`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadWorld => "read-world",
            Permission::WriteWorld => "write-world",
            Permission::UiModify => "ui-modify",
            Permission::NetworkExternal => "network-external",
            Permission::FsLimited => "fs-limited",
            Permission::AnalyticsRead => "analytics-read",
            Permission::ExportData => "export-data",
            Permission::RpgTools => "rpg-tools",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| EngineError::InvalidManifest(format!("unknown permission '{}'", s)))
    }
}

/// A set of permissions with no duplicates
///
/// Serialized as a JSON array. Deserialization rejects repeated entries
/// instead of collapsing them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    /// Create an empty permission set
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Build a set from permissions, failing on duplicates
    pub fn try_from_iter(
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Result<Self, EngineError> {
        let mut set = BTreeSet::new();
        for permission in permissions {
            if !set.insert(permission) {
                return Err(EngineError::InvalidManifest(format!(
                    "duplicate permission '{}'",
                    permission
                )));
            }
        }
        Ok(Self(set))
    }

    /// Check if a permission is granted
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// Iterate over the granted permissions in a stable order
    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    /// Collects permissions, collapsing duplicates
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for PermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let list = Vec::<Permission>::deserialize(deserializer)?;
        PermissionSet::try_from_iter(list).map_err(serde::de::Error::custom)
    }
}

/// UI grouping tag for a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Utilities,
    Worldbuilding,
    Rpg,
    Visualization,
    Export,
    Integration,
    Analytics,
    #[default]
    Other,
}

/// Administrator-approved plugin descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    #[serde(default)]
    pub permissions: PermissionSet,
    /// UI grouping; falls back to the plugin's own report when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Optional pinned digest of the plugin source (`blake3:<hex>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
}

impl Manifest {
    /// Create a manifest with no permissions
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            author: author.into(),
            permissions: PermissionSet::new(),
            category: None,
            source_hash: None,
        }
    }

    /// Replace the permission set
    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set the UI category
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Pin the plugin source to a digest
    pub fn with_source_hash(mut self, hash: impl Into<String>) -> Self {
        self.source_hash = Some(hash.into());
        self
    }

    /// Parse and validate a manifest from a JSON string
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let manifest: Manifest = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Serialize manifest to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check the structural rules a manifest must satisfy
    ///
    /// Identity fields are opaque, but an empty one can never be matched
    /// meaningfully and is rejected.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (field, value) in [
            ("id", &self.id),
            ("name", &self.name),
            ("version", &self.version),
            ("author", &self.author),
        ] {
            if value.trim().is_empty() {
                return Err(EngineError::InvalidManifest(format!(
                    "field '{}' must not be empty",
                    field
                )));
            }
        }

        if let Some(hash) = &self.source_hash {
            if !hash.starts_with("blake3:") {
                return Err(EngineError::InvalidManifest(format!(
                    "unsupported source hash '{}', expected 'blake3:<hex>'",
                    hash
                )));
            }
        }

        Ok(())
    }
}
