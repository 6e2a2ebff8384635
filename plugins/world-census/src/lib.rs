//! World Census Plugin
//!
//! Reference guest plugin for the Lorekeeper plugin host. Counts the
//! characters and locations of a world whenever one is opened, remembers the
//! last census in plugin storage and tells the user through a notification.
//!
//! Hooks provided:
//! - on_activate: log a greeting
//! - on_world_load: take a census of the opened world
//! - on_entity_created: bump a running creation counter
//!
//! Requires the `read-world` and `ui-modify` permissions. Without `ui-modify`
//! the notification is denied and the census is still returned.
//!
//! Build with `cargo build --release --target wasm32-unknown-unknown` and
//! copy `world_census.wasm` next to `world-census.manifest.json` renamed to
//! `world-census.wasm`.

use extism_pdk::*;
use sdk::plugin::PluginInfo;
use sdk::protocol::{
    CapabilityRequest, CapabilityResponse, HostCall, LogLevel, NotificationLevel, StorageCall,
    UiCall, WorldReadCall,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const PLUGIN_ID: &str = "world-census";
const CREATED_KEY: &str = "entities-created";

// ============================================================================
// Input/Output Types
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorldLoaded {
    world_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityCreated {
    entity_type: String,
}

#[derive(Serialize)]
struct Census {
    world_id: String,
    characters: usize,
    locations: usize,
    notified: bool,
}

// ============================================================================
// Plugin Functions
// ============================================================================

/// Identity checked by the host against the manifest
#[plugin_fn]
pub fn plugin_info() -> FnResult<Json<PluginInfo>> {
    Ok(Json(PluginInfo {
        id: PLUGIN_ID.to_string(),
        name: "World Census".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        author: "Lorekeeper Team".to_string(),
        description: "Counts characters and locations in each opened world".to_string(),
        category: None,
    }))
}

#[plugin_fn]
pub fn on_activate() -> FnResult<()> {
    log(LogLevel::Info, "World census ready")?;
    Ok(())
}

/// Count the world's characters and locations
#[plugin_fn]
pub fn on_world_load(Json(input): Json<WorldLoaded>) -> FnResult<Json<Census>> {
    let characters = count(WorldReadCall::GetCharacters {
        world_id: input.world_id.clone(),
    })?;
    let locations = count(WorldReadCall::GetLocations {
        world_id: input.world_id.clone(),
    })?;

    let census = Census {
        world_id: input.world_id,
        characters,
        locations,
        notified: false,
    };

    call(CapabilityRequest::Storage(StorageCall::Set {
        key: format!("census:{}", census.world_id),
        value: serde_json::to_value(&census)?,
    }))?;

    let notification = call(CapabilityRequest::Ui(UiCall::ShowNotification {
        message: format!(
            "{} characters and {} locations",
            census.characters, census.locations
        ),
        level: NotificationLevel::Info,
    }))?;

    Ok(Json(Census {
        notified: notification.is_ok(),
        ..census
    }))
}

/// Keep a running count of created entities
#[plugin_fn]
pub fn on_entity_created(Json(input): Json<EntityCreated>) -> FnResult<Json<u64>> {
    let current = match call(CapabilityRequest::Storage(StorageCall::Get {
        key: CREATED_KEY.to_string(),
    }))? {
        CapabilityResponse::Ok { value } => value.as_u64().unwrap_or(0),
        _ => 0,
    };
    let total = current + 1;

    call(CapabilityRequest::Storage(StorageCall::Set {
        key: CREATED_KEY.to_string(),
        value: Value::from(total),
    }))?;
    log(
        LogLevel::Debug,
        &format!("{} created, {} so far", input.entity_type, total),
    )?;

    Ok(Json(total))
}

// ============================================================================
// Host Access
// ============================================================================

fn call(request: CapabilityRequest) -> Result<CapabilityResponse, Error> {
    let Json(response) = unsafe { host::lorekeeper_call(Json(request))? };
    Ok(response)
}

fn count(request: WorldReadCall) -> Result<usize, Error> {
    match call(CapabilityRequest::WorldRead(request))? {
        CapabilityResponse::Ok { value } => Ok(value.as_array().map(Vec::len).unwrap_or(0)),
        CapabilityResponse::Denied { facade } => {
            Err(Error::msg(format!("{} facade not granted", facade)))
        }
        CapabilityResponse::Error { message } => Err(Error::msg(message)),
    }
}

fn log(level: LogLevel, message: &str) -> Result<(), Error> {
    call(CapabilityRequest::Host(HostCall::Log {
        level,
        message: message.to_string(),
    }))?;
    Ok(())
}

/// Host functions exposed by the Lorekeeper plugin host
///
/// Every facade call is a JSON request and answer through a single import.
/// The host decides per plugin which facades answer.
mod host {
    use extism_pdk::*;
    use sdk::protocol::{CapabilityRequest, CapabilityResponse};

    #[host_fn]
    extern "ExtismHost" {
        pub fn lorekeeper_call(request: Json<CapabilityRequest>) -> Json<CapabilityResponse>;
    }
}
