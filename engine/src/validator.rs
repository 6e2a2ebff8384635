//! Identity validation
//!
//! A plugin's self-report is compared against its manifest on the four
//! identity fields. Nothing else is cross-checked. Permissions come from the
//! manifest only; category comes from the manifest when it names one and
//! otherwise from the plugin's report, for grouping.

use sdk::errors::EngineError;
use sdk::manifest::Manifest;
use sdk::plugin::PluginInfo;

/// True iff id, name, version and author are byte-equal
pub fn validate(info: &PluginInfo, manifest: &Manifest) -> bool {
    check_identity(info, manifest).is_ok()
}

/// Like [`validate`], naming the first field that differs
pub fn check_identity(info: &PluginInfo, manifest: &Manifest) -> Result<(), EngineError> {
    let fields = [
        ("id", &manifest.id, &info.id),
        ("name", &manifest.name, &info.name),
        ("version", &manifest.version, &info.version),
        ("author", &manifest.author, &info.author),
    ];

    for (field, expected, found) in fields {
        if expected != found {
            return Err(EngineError::IdentityMismatch {
                plugin_id: manifest.id.clone(),
                field,
                expected: expected.clone(),
                found: found.clone(),
            });
        }
    }

    Ok(())
}
