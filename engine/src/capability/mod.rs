//! Capability gate
//!
//! Turns a manifest's permission set into a [`Scope`]: the only host state a
//! plugin can reach. Storage, utils and host primitives are always present.
//! Every other facade exists in the scope only if its permission was granted;
//! there is no field to look up, so an ungranted facade cannot be reached even
//! though its backing service lives in the same process.
//!
//! | Permission       | Facade        |
//! |------------------|---------------|
//! | `read-world`     | `WorldRead`   |
//! | `write-world`    | `WorldWrite`  |
//! | `ui-modify`      | `Ui`          |
//! | `analytics-read` | `Analytics`   |
//! | `rpg-tools`      | `Rpg`         |
//!
//! `network-external`, `fs-limited` and `export-data` are accepted but gate
//! nothing yet.

use crate::services::Services;
use sdk::manifest::{Permission, PermissionSet};
use sdk::protocol::{CapabilityRequest, CapabilityResponse, FacadeKind};
use std::collections::BTreeSet;
use std::time::Duration;

pub mod facades;

pub use facades::{
    AnalyticsFacade, HostPrimitives, RpgFacade, StorageFacade, UiFacade, UtilsFacade,
    WorldReadFacade, WorldWriteFacade,
};

/// Upper bound for `host.sleep` when no limit was configured
const DEFAULT_MAX_SLEEP: Duration = Duration::from_secs(5);

/// Facade unlocked by a permission, if any
pub fn facade_for(permission: Permission) -> Option<FacadeKind> {
    match permission {
        Permission::ReadWorld => Some(FacadeKind::WorldRead),
        Permission::WriteWorld => Some(FacadeKind::WorldWrite),
        Permission::UiModify => Some(FacadeKind::Ui),
        Permission::AnalyticsRead => Some(FacadeKind::Analytics),
        Permission::RpgTools => Some(FacadeKind::Rpg),
        Permission::NetworkExternal | Permission::FsLimited | Permission::ExportData => None,
    }
}

/// Builds plugin scopes over a fixed set of backing services
#[derive(Clone)]
pub struct CapabilityGate {
    services: Services,
    max_sleep: Duration,
}

impl CapabilityGate {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            max_sleep: DEFAULT_MAX_SLEEP,
        }
    }

    /// Cap for a single `host.sleep` request
    pub fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    /// Construct the scope a plugin with these permissions receives
    pub fn build_scope(&self, plugin_id: &str, permissions: &PermissionSet) -> Scope {
        let granted = |p: Permission| permissions.contains(p);

        let scope = Scope {
            plugin_id: plugin_id.to_string(),
            storage: StorageFacade::new(plugin_id, self.services.store.clone()),
            utils: UtilsFacade,
            host: HostPrimitives::new(plugin_id, self.max_sleep),
            world_read: granted(Permission::ReadWorld)
                .then(|| WorldReadFacade::new(self.services.world.clone())),
            world_write: granted(Permission::WriteWorld)
                .then(|| WorldWriteFacade::new(self.services.world.clone())),
            ui: granted(Permission::UiModify)
                .then(|| UiFacade::new(plugin_id, self.services.ui.clone())),
            analytics: granted(Permission::AnalyticsRead)
                .then(|| AnalyticsFacade::new(self.services.analytics.clone())),
            rpg: granted(Permission::RpgTools)
                .then(|| RpgFacade::new(self.services.rpg.clone())),
        };

        tracing::debug!(
            plugin = %plugin_id,
            facades = ?scope.exposed(),
            "Capability scope built"
        );

        scope
    }
}

/// The restricted surface handed to one plugin
pub struct Scope {
    plugin_id: String,
    storage: StorageFacade,
    utils: UtilsFacade,
    host: HostPrimitives,
    world_read: Option<WorldReadFacade>,
    world_write: Option<WorldWriteFacade>,
    ui: Option<UiFacade>,
    analytics: Option<AnalyticsFacade>,
    rpg: Option<RpgFacade>,
}

impl Scope {
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Exactly the facades present in this scope
    pub fn exposed(&self) -> BTreeSet<FacadeKind> {
        let mut exposed = BTreeSet::from([FacadeKind::Storage, FacadeKind::Utils]);
        let optional = [
            (FacadeKind::WorldRead, self.world_read.is_some()),
            (FacadeKind::WorldWrite, self.world_write.is_some()),
            (FacadeKind::Ui, self.ui.is_some()),
            (FacadeKind::Analytics, self.analytics.is_some()),
            (FacadeKind::Rpg, self.rpg.is_some()),
        ];
        exposed.extend(
            optional
                .into_iter()
                .filter(|(_, present)| *present)
                .map(|(kind, _)| kind),
        );
        exposed
    }

    pub fn storage(&self) -> &StorageFacade {
        &self.storage
    }

    pub fn utils(&self) -> &UtilsFacade {
        &self.utils
    }

    pub fn host(&self) -> &HostPrimitives {
        &self.host
    }

    pub fn world_read(&self) -> Option<&WorldReadFacade> {
        self.world_read.as_ref()
    }

    pub fn world_write(&self) -> Option<&WorldWriteFacade> {
        self.world_write.as_ref()
    }

    pub fn ui(&self) -> Option<&UiFacade> {
        self.ui.as_ref()
    }

    pub fn analytics(&self) -> Option<&AnalyticsFacade> {
        self.analytics.as_ref()
    }

    pub fn rpg(&self) -> Option<&RpgFacade> {
        self.rpg.as_ref()
    }

    /// Answer a capability request from plugin code
    ///
    /// Requests for a facade this scope does not hold are answered `Denied`
    /// without touching any service. Service errors come back as `Error`.
    pub async fn dispatch(&self, request: CapabilityRequest) -> CapabilityResponse {
        let result = match request {
            CapabilityRequest::Host(call) => Ok(self.host.handle(call).await),
            CapabilityRequest::Utils(call) => Ok(self.utils.handle(call)),
            CapabilityRequest::Storage(call) => self.storage.handle(call).await,
            CapabilityRequest::WorldRead(call) => match &self.world_read {
                Some(facade) => facade.handle(call).await,
                None => return self.deny(FacadeKind::WorldRead),
            },
            CapabilityRequest::WorldWrite(call) => match &self.world_write {
                Some(facade) => facade.handle(call).await,
                None => return self.deny(FacadeKind::WorldWrite),
            },
            CapabilityRequest::Ui(call) => match &self.ui {
                Some(facade) => facade.handle(call).await,
                None => return self.deny(FacadeKind::Ui),
            },
            CapabilityRequest::Analytics(call) => match &self.analytics {
                Some(facade) => facade.handle(call).await,
                None => return self.deny(FacadeKind::Analytics),
            },
            CapabilityRequest::Rpg(call) => match &self.rpg {
                Some(facade) => facade.handle(call).await,
                None => return self.deny(FacadeKind::Rpg),
            },
        };

        match result {
            Ok(value) => CapabilityResponse::ok(value),
            Err(e) => {
                tracing::debug!(plugin = %self.plugin_id, error = %e, "Capability call failed");
                CapabilityResponse::error(e.to_string())
            }
        }
    }

    fn deny(&self, facade: FacadeKind) -> CapabilityResponse {
        tracing::warn!(
            plugin = %self.plugin_id,
            %facade,
            "Permission denied: facade not granted"
        );
        CapabilityResponse::Denied { facade }
    }
}
