//! Capability wire protocol
//!
//! Sandboxed plugins never hold references to host objects. Every capability
//! use is a [`CapabilityRequest`] serialized to JSON and passed to the single
//! host import `lorekeeper_call`; the host answers with a
//! [`CapabilityResponse`].
//!
//! ```json
//! {"facade":"rpg","call":{"method":"roll_dice","formula":"2d6+1"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Name of the host import plugins call for every capability request
pub const HOST_CALL_FUNCTION: &str = "lorekeeper_call";

/// Facades a plugin scope can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FacadeKind {
    Storage,
    Utils,
    WorldRead,
    WorldWrite,
    Ui,
    Analytics,
    Rpg,
}

impl FacadeKind {
    pub const ALL: [FacadeKind; 7] = [
        FacadeKind::Storage,
        FacadeKind::Utils,
        FacadeKind::WorldRead,
        FacadeKind::WorldWrite,
        FacadeKind::Ui,
        FacadeKind::Analytics,
        FacadeKind::Rpg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FacadeKind::Storage => "storage",
            FacadeKind::Utils => "utils",
            FacadeKind::WorldRead => "world-read",
            FacadeKind::WorldWrite => "world-write",
            FacadeKind::Ui => "ui",
            FacadeKind::Analytics => "analytics",
            FacadeKind::Rpg => "rpg",
        }
    }
}

impl fmt::Display for FacadeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single capability request from plugin code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "facade", content = "call", rename_all = "kebab-case")]
pub enum CapabilityRequest {
    WorldRead(WorldReadCall),
    WorldWrite(WorldWriteCall),
    Ui(UiCall),
    Analytics(AnalyticsCall),
    Rpg(RpgCall),
    Storage(StorageCall),
    Utils(UtilsCall),
    /// Host primitives available to every plugin
    Host(HostCall),
}

impl CapabilityRequest {
    /// The facade this request targets, or `None` for host primitives
    pub fn facade(&self) -> Option<FacadeKind> {
        match self {
            CapabilityRequest::WorldRead(_) => Some(FacadeKind::WorldRead),
            CapabilityRequest::WorldWrite(_) => Some(FacadeKind::WorldWrite),
            CapabilityRequest::Ui(_) => Some(FacadeKind::Ui),
            CapabilityRequest::Analytics(_) => Some(FacadeKind::Analytics),
            CapabilityRequest::Rpg(_) => Some(FacadeKind::Rpg),
            CapabilityRequest::Storage(_) => Some(FacadeKind::Storage),
            CapabilityRequest::Utils(_) => Some(FacadeKind::Utils),
            CapabilityRequest::Host(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum WorldReadCall {
    GetWorld { world_id: String },
    GetCharacters { world_id: String },
    GetLocations { world_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum WorldWriteCall {
    CreateEntity { entity_type: String, data: Value },
    UpdateEntity {
        entity_type: String,
        id: String,
        data: Value,
    },
    DeleteEntity { entity_type: String, id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum UiCall {
    RegisterMenuItem { item: Value },
    RegisterToolbarButton { button: Value },
    ShowModal { modal: Value },
    ShowNotification {
        message: String,
        #[serde(default)]
        level: NotificationLevel,
    },
    RegisterComponent { name: String, component: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AnalyticsCall {
    GetMetrics { world_id: String },
    GetRecommendations { world_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RpgCall {
    GenerateStatblock { creature: Value },
    CalculateEncounter { party: Value, monsters: Value },
    RollDice { formula: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum StorageCall {
    Get { key: String },
    Set { key: String, value: Value },
    Remove { key: String },
    Keys,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum UtilsCall {
    GenerateId,
    Slugify { text: String },
    Now,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum HostCall {
    Log {
        #[serde(default)]
        level: LogLevel,
        message: String,
    },
    Sleep { millis: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Host answer to a [`CapabilityRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CapabilityResponse {
    Ok { value: Value },
    /// The facade is not part of the plugin's scope
    Denied { facade: FacadeKind },
    Error { message: String },
}

impl CapabilityResponse {
    pub fn ok(value: Value) -> Self {
        CapabilityResponse::Ok { value }
    }

    pub fn error(message: impl Into<String>) -> Self {
        CapabilityResponse::Error {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CapabilityResponse::Ok { .. })
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, CapabilityResponse::Denied { .. })
    }
}
