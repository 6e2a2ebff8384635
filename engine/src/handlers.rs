//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - check: Validate a manifest and show the facades it grants
//! - load: Load one plugin, optionally fire a hook, unload it
//! - run: Load a plugins directory and fire the world-loaded hook
//!
//! Every handler builds its own in-memory host; nothing persists between runs.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::capability::CapabilityGate;
use crate::config::{expand_path, Config};
use crate::dispatcher::{HookOutcome, HookReport};
use crate::manager::PluginManager;
use crate::services::Services;
use sdk::manifest::Manifest;
use sdk::plugin::{Hook, PluginRecord};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Suffix pairing a plugin source with its manifest
const MANIFEST_SUFFIX: &str = ".manifest.json";

/// A plugin source found next to its manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPlugin {
    pub source: PathBuf,
    pub manifest: PathBuf,
}

/// Validate a manifest and print the facades its permissions grant
pub async fn handle_check(manifest_path: &Path, format: OutputFormat) -> Result<()> {
    let manifest = read_manifest(manifest_path).await?;
    manifest.validate()?;

    let gate = CapabilityGate::new(Services::in_memory());
    let scope = gate.build_scope(&manifest.id, &manifest.permissions);
    let facades: Vec<&str> = scope.exposed().iter().map(|f| f.as_str()).collect();

    match format {
        OutputFormat::Text => {
            println!("✓ Manifest valid: {} v{}", manifest.id, manifest.version);
            println!("  Name:     {}", manifest.name);
            println!("  Author:   {}", manifest.author);
            if let Some(category) = manifest.category {
                println!("  Category: {:?}", category);
            }
            println!("  Facades:  {}", facades.join(", "));
        }
        OutputFormat::Json => {
            let output = json!({
                "status": "valid",
                "id": manifest.id,
                "version": manifest.version,
                "facades": facades,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Load one plugin into a fresh host, optionally fire a hook, unload it
pub async fn handle_load(
    source_path: &Path,
    manifest_path: &Path,
    hook: Option<&str>,
    args: Option<&str>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let manifest = read_manifest(manifest_path).await?;
    let source = tokio::fs::read(source_path)
        .await
        .with_context(|| format!("Failed to read plugin source {}", source_path.display()))?;
    let args: Value = match args {
        Some(raw) => serde_json::from_str(raw).context("Hook arguments are not valid JSON")?,
        None => Value::Null,
    };

    let mut manager = PluginManager::from_config(config, Services::in_memory());

    let outcome = match manager.try_load(&source, &manifest).await {
        Ok(outcome) => outcome,
        Err(e) => {
            match format {
                OutputFormat::Text => println!("✗ Plugin rejected: {}", e),
                OutputFormat::Json => {
                    let output = json!({
                        "status": "rejected",
                        "id": manifest.id,
                        "error": e.to_string(),
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
            return Err(e.into());
        }
    };

    let report = match hook {
        Some(name) => Some(manager.trigger_hook_named(name, &args).await),
        None => None,
    };

    match format {
        OutputFormat::Text => {
            print_record(&outcome.record);
            println!("  Activation: {}", describe(&outcome.activation));
            if let Some(report) = &report {
                println!();
                print_report(report);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "status": "loaded",
                "plugin": outcome.record,
                "activation": outcome_json(&outcome.activation),
                "hook": report.as_ref().map(report_json),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    manager.unload_all().await;
    Ok(())
}

/// Load every plugin in a directory, fire `WorldLoaded`, unload them all
pub async fn handle_run(
    dir: Option<PathBuf>,
    world: &str,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let dir = match dir {
        Some(dir) => expand_path(&dir)?,
        None => config.plugins.dir.clone(),
    };
    let discovered = discover_plugins(&dir).await?;

    let mut manager = PluginManager::from_config(config, Services::in_memory());
    let mut rejected = Vec::new();

    for plugin in &discovered {
        let loaded = async {
            let manifest = read_manifest(&plugin.manifest).await?;
            let source = tokio::fs::read(&plugin.source).await?;
            manager.try_load(&source, &manifest).await?;
            anyhow::Ok(())
        }
        .await;

        if let Err(e) = loaded {
            tracing::warn!(source = %plugin.source.display(), error = %e, "Skipping plugin");
            rejected.push((plugin.source.clone(), e.to_string()));
        }
    }

    let report = manager
        .trigger_hook(Hook::WorldLoaded, &json!({ "worldId": world }))
        .await;

    match format {
        OutputFormat::Text => {
            println!("Plugins in {}:", dir.display());
            println!();
            for record in manager.get_active_plugins() {
                print_record(record);
            }
            for (source, error) in &rejected {
                println!("✗ {}: {}", source.display(), error);
            }
            println!();
            print_report(&report);
        }
        OutputFormat::Json => {
            let output = json!({
                "dir": dir,
                "active": manager.get_active_plugins(),
                "rejected": rejected
                    .iter()
                    .map(|(source, error)| json!({ "source": source, "error": error }))
                    .collect::<Vec<_>>(),
                "hook": report_json(&report),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    manager.unload_all().await;
    Ok(())
}

/// Find `<name>.wasm` or `<name>.wat` files with a `<name>.manifest.json`
///
/// Sources without a manifest are skipped. Results are sorted by path so
/// load order is stable.
pub async fn discover_plugins(dir: &Path) -> Result<Vec<DiscoveredPlugin>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read plugins directory {}", dir.display()))?;

    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_source = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("wasm") | Some("wat")
        );
        if !is_source {
            continue;
        }

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let manifest = dir.join(format!("{}{}", stem, MANIFEST_SUFFIX));
        if manifest.exists() {
            found.push(DiscoveredPlugin {
                source: path,
                manifest,
            });
        } else {
            tracing::debug!(source = %path.display(), "No manifest next to plugin source");
        }
    }

    found.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(found)
}

async fn read_manifest(path: &Path) -> Result<Manifest> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    Ok(Manifest::from_json(&raw)?)
}

fn print_record(record: &PluginRecord) {
    let hooks: Vec<&str> = record.hooks.iter().map(|h| h.event_name()).collect();
    println!("✓ {} v{} by {}", record.id, record.version, record.author);
    println!("  Category: {:?}", record.category);
    println!("  Hooks:    {}", hooks.join(", "));
}

fn print_report(report: &HookReport) {
    let Some(hook) = report.hook else {
        println!("Unknown hook, nothing dispatched");
        return;
    };

    println!("Hook {}:", hook.event_name());
    for outcome in &report.outcomes {
        println!("  {}: {}", outcome.plugin_id, describe(&outcome.outcome));
    }
}

fn describe(outcome: &HookOutcome) -> String {
    match outcome {
        HookOutcome::NotDefined => "not defined".to_string(),
        HookOutcome::Completed { output } if output.is_empty() => "completed".to_string(),
        HookOutcome::Completed { output } => {
            format!("completed: {}", String::from_utf8_lossy(output))
        }
        HookOutcome::Failed { error } => format!("failed: {}", error),
        HookOutcome::TimedOut => "timed out".to_string(),
    }
}

fn outcome_json(outcome: &HookOutcome) -> Value {
    match outcome {
        HookOutcome::NotDefined => json!({ "status": "not_defined" }),
        HookOutcome::Completed { output } => json!({
            "status": "completed",
            "output": String::from_utf8_lossy(output),
        }),
        HookOutcome::Failed { error } => json!({ "status": "failed", "error": error }),
        HookOutcome::TimedOut => json!({ "status": "timed_out" }),
    }
}

fn report_json(report: &HookReport) -> Value {
    json!({
        "hook": report.hook.map(|h| h.event_name()),
        "outcomes": report
            .outcomes
            .iter()
            .map(|o| json!({ "plugin": o.plugin_id, "outcome": outcome_json(&o.outcome) }))
            .collect::<Vec<_>>(),
    })
}
