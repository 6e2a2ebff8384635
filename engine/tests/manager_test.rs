//! Integration tests for the plugin manager
//!
//! Drives the full load / dispatch / unload lifecycle against a scripted
//! executor, so every failure mode can be produced on demand.

mod common;

use common::{fast_limits, Script, ScriptedExecutor};
use lorekeeper_engine::dispatcher::HookOutcome;
use lorekeeper_engine::manager::{source_hash, PluginManager};
use lorekeeper_engine::message_bus::{Event, EventType, MessageBus};
use lorekeeper_engine::registry::RegistryPolicy;
use lorekeeper_engine::services::Services;
use sdk::errors::EngineError;
use sdk::manifest::{Category, Manifest};
use sdk::plugin::{Hook, PluginInfo};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn manifest(id: &str) -> Manifest {
    Manifest::new(id, format!("{} plugin", id), "1.0.0", "lorekeeper")
}

fn manager_with(executor: &Arc<ScriptedExecutor>) -> PluginManager {
    PluginManager::new(Services::in_memory(), executor.clone()).with_limits(&fast_limits())
}

fn active_ids(manager: &PluginManager) -> Vec<String> {
    manager
        .get_active_plugins()
        .iter()
        .map(|r| r.id.clone())
        .collect()
}

#[tokio::test]
async fn test_load_activates_once() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let source = executor.add("census", Script::matching(&m).with_hook(Hook::Activate));
    let mut manager = manager_with(&executor);

    assert!(manager.load(&source, &m).await);

    assert_eq!(active_ids(&manager), vec!["census"]);
    assert_eq!(executor.journal.count("census", Hook::Activate), 1);
    assert_eq!(manager.get_plugin("census").unwrap().version, "1.0.0");
}

#[tokio::test]
async fn test_load_without_activate_hook() {
    let executor = ScriptedExecutor::new();
    let m = manifest("quiet");
    let source = executor.add("quiet", Script::matching(&m));
    let mut manager = manager_with(&executor);

    let outcome = manager.try_load(&source, &m).await.unwrap();

    assert_eq!(outcome.activation, HookOutcome::NotDefined);
    assert!(manager.is_active("quiet"));
    assert!(executor.journal.calls().is_empty());
}

#[tokio::test]
async fn test_identity_mismatch_rejected() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let mut impostor = PluginInfo::matching(&m);
    impostor.id = "census-pro".to_string();
    let source = executor.add("impostor", Script::reporting(impostor).with_hook(Hook::Activate));
    let mut manager = manager_with(&executor);

    let result = manager.try_load(&source, &m).await;

    assert!(matches!(
        result,
        Err(EngineError::IdentityMismatch { field: "id", .. })
    ));
    assert!(manager.get_plugin("census").is_none());
    assert!(manager.get_active_plugins().is_empty());
    assert_eq!(executor.journal.count("census", Hook::Activate), 0);
    assert_eq!(executor.journal.shutdowns(), vec!["census"]);
}

#[tokio::test]
async fn test_author_mismatch_rejected() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let mut info = PluginInfo::matching(&m);
    info.author = "someone else".to_string();
    let source = executor.add("census", Script::reporting(info));
    let mut manager = manager_with(&executor);

    assert!(!manager.load(&source, &m).await);
    assert!(manager.registry().is_empty());
}

#[tokio::test]
async fn test_throwing_source_rejected() {
    let executor = ScriptedExecutor::new();
    let m = manifest("broken");
    let source = executor.add("broken", Script::matching(&m).throwing());
    let mut manager = manager_with(&executor);

    let result = manager.try_load(&source, &m).await;

    assert!(matches!(result, Err(EngineError::Execution { .. })));
    assert!(manager.registry().is_empty());
}

#[tokio::test]
async fn test_missing_plugin_info_rejected() {
    let executor = ScriptedExecutor::new();
    let m = manifest("silent");
    let source = executor.add("silent", Script::silent());
    let mut manager = manager_with(&executor);

    let result = manager.try_load(&source, &m).await;

    assert!(matches!(result, Err(EngineError::MissingPluginInfo(_))));
    assert!(manager.registry().is_empty());
}

#[tokio::test]
async fn test_hanging_source_times_out() {
    let executor = ScriptedExecutor::new();
    let m = manifest("stuck");
    let source = executor.add("stuck", Script::matching(&m).hanging());
    let mut manager = manager_with(&executor);

    let started = Instant::now();
    let result = manager.try_load(&source, &m).await;

    assert!(matches!(result, Err(EngineError::Execution { .. })));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(manager.registry().is_empty());
}

#[tokio::test]
async fn test_invalid_manifest_rejected_before_execution() {
    let executor = ScriptedExecutor::new();
    let m = Manifest::new("census", "", "1.0.0", "lorekeeper");
    let source = executor.add("census", Script::matching(&m));
    let mut manager = manager_with(&executor);

    let result = manager.try_load(&source, &m).await;

    assert!(matches!(result, Err(EngineError::InvalidManifest(_))));
    assert_eq!(executor.journal.executions(), 0);
}

#[tokio::test]
async fn test_source_hash_mismatch_rejected_before_execution() {
    let executor = ScriptedExecutor::new();
    let m = manifest("pinned").with_source_hash(source_hash(b"approved build"));
    let source = executor.add("tampered build", Script::matching(&m));
    let mut manager = manager_with(&executor);

    let result = manager.try_load(&source, &m).await;

    assert!(matches!(result, Err(EngineError::IntegrityMismatch(_))));
    assert_eq!(executor.journal.executions(), 0);
}

#[tokio::test]
async fn test_source_hash_match_loads() {
    let executor = ScriptedExecutor::new();
    let m = manifest("pinned").with_source_hash(source_hash(b"pinned"));
    let source = executor.add("pinned", Script::matching(&m));
    let mut manager = manager_with(&executor);

    assert!(manager.load(&source, &m).await);
}

#[tokio::test]
async fn test_unload_unknown_returns_false() {
    let executor = ScriptedExecutor::new();
    let mut manager = manager_with(&executor);

    assert!(!manager.unload("ghost").await);
    assert!(matches!(
        manager.try_unload("ghost").await,
        Err(EngineError::PluginNotLoaded(_))
    ));
}

#[tokio::test]
async fn test_unload_runs_deactivate_and_removes() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let source = executor.add(
        "census",
        Script::matching(&m)
            .with_hook(Hook::Deactivate)
            .with_hook(Hook::WorldLoaded),
    );
    let mut manager = manager_with(&executor);
    assert!(manager.load(&source, &m).await);

    assert!(manager.unload("census").await);

    assert_eq!(executor.journal.count("census", Hook::Deactivate), 1);
    assert!(manager.get_plugin("census").is_none());
    assert!(!manager.is_active("census"));
    assert_eq!(executor.journal.shutdowns(), vec!["census"]);

    let report = manager.trigger_hook(Hook::WorldLoaded, &json!({})).await;
    assert!(report.outcomes.is_empty());
    assert!(!manager.unload("census").await);
}

#[tokio::test]
async fn test_unload_inactive_skips_deactivate() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let source = executor.add("census", Script::matching(&m).with_hook(Hook::Deactivate));
    let mut manager = manager_with(&executor);

    manager.install(&source, &m).await.unwrap();
    assert!(!manager.is_active("census"));

    assert!(manager.unload("census").await);
    assert_eq!(executor.journal.count("census", Hook::Deactivate), 0);
}

#[tokio::test]
async fn test_failing_deactivate_still_unloads() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let source = executor.add("census", Script::matching(&m).failing_on(Hook::Deactivate));
    let mut manager = manager_with(&executor);
    assert!(manager.load(&source, &m).await);

    assert!(manager.unload("census").await);
    assert!(manager.get_plugin("census").is_none());
}

#[tokio::test]
async fn test_dispatch_isolates_throwing_plugin() {
    let executor = ScriptedExecutor::new();
    let mut manager = manager_with(&executor);

    for (id, failing) in [("a", false), ("b", true), ("c", false)] {
        let m = manifest(id);
        let script = if failing {
            Script::matching(&m).failing_on(Hook::WorldLoaded)
        } else {
            Script::matching(&m).with_hook(Hook::WorldLoaded)
        };
        let source = executor.add(id, script);
        assert!(manager.load(&source, &m).await);
    }

    let report = manager
        .trigger_hook(Hook::WorldLoaded, &json!({ "worldId": "w1" }))
        .await;

    assert_eq!(report.completed(), vec!["a", "c"]);
    assert!(matches!(
        report.outcome("b"),
        Some(HookOutcome::Failed { .. })
    ));
    assert_eq!(executor.journal.count("c", Hook::WorldLoaded), 1);
    assert_eq!(active_ids(&manager), vec!["a", "b", "c"]);

    let delivered: Vec<_> = executor
        .journal
        .calls()
        .into_iter()
        .filter(|(_, hook)| *hook == Hook::WorldLoaded)
        .map(|(id, _)| id)
        .collect();
    assert_eq!(delivered, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_dispatch_passes_args() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let source = executor.add("census", Script::matching(&m).with_hook(Hook::EntityCreated));
    let mut manager = manager_with(&executor);
    assert!(manager.load(&source, &m).await);

    let args = json!({ "entityType": "character", "id": "c1" });
    let report = manager.trigger_hook(Hook::EntityCreated, &args).await;

    assert_eq!(
        report.outcome("census"),
        Some(&HookOutcome::Completed {
            output: serde_json::to_vec(&args).unwrap()
        })
    );
}

#[tokio::test]
async fn test_dispatch_by_name() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let source = executor.add("census", Script::matching(&m).with_hook(Hook::WorldLoaded));
    let mut manager = manager_with(&executor);
    assert!(manager.load(&source, &m).await);

    let report = manager.trigger_hook_named("onWorldLoad", &json!({})).await;
    assert_eq!(report.hook, Some(Hook::WorldLoaded));
    assert_eq!(report.completed(), vec!["census"]);

    let report = manager.trigger_hook_named("onWorldSave", &json!({})).await;
    assert_eq!(report.hook, None);
    assert!(report.outcomes.is_empty());
}

#[tokio::test]
async fn test_hook_timeout_is_contained() {
    let executor = ScriptedExecutor::new();
    let mut manager = manager_with(&executor);

    let slow = manifest("slow");
    let source = executor.add("slow", Script::matching(&slow).hanging_on(Hook::WorldLoaded));
    assert!(manager.load(&source, &slow).await);

    let fast = manifest("fast");
    let source = executor.add("fast", Script::matching(&fast).with_hook(Hook::WorldLoaded));
    assert!(manager.load(&source, &fast).await);

    let started = Instant::now();
    let report = manager.trigger_hook(Hook::WorldLoaded, &json!({})).await;

    assert_eq!(report.outcome("slow"), Some(&HookOutcome::TimedOut));
    assert_eq!(report.completed(), vec!["fast"]);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(manager.is_active("slow"));
}

#[tokio::test]
async fn test_duplicate_rejected_without_execution() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let source = executor.add("census", Script::matching(&m));
    let mut manager = manager_with(&executor);

    assert!(manager.load(&source, &m).await);
    let result = manager.try_load(&source, &m).await;

    assert!(matches!(result, Err(EngineError::DuplicatePlugin(_))));
    assert_eq!(executor.journal.executions(), 1);
    assert_eq!(manager.registry().len(), 1);
}

#[tokio::test]
async fn test_reload_after_unload() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let source = executor.add("census", Script::matching(&m).with_hook(Hook::Activate));
    let mut manager = manager_with(&executor);

    assert!(manager.load(&source, &m).await);
    assert!(manager.unload("census").await);
    assert!(manager.load(&source, &m).await);

    assert_eq!(executor.journal.count("census", Hook::Activate), 2);
    assert!(manager.is_active("census"));
}

#[tokio::test]
async fn test_tombstone_policy_retires_ids() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let source = executor.add("census", Script::matching(&m));
    let mut manager = manager_with(&executor).with_policy(RegistryPolicy::Tombstone);

    assert!(manager.load(&source, &m).await);
    assert!(manager.unload("census").await);

    let result = manager.try_load(&source, &m).await;
    assert!(matches!(result, Err(EngineError::IdRetired(_))));
    assert_eq!(executor.journal.executions(), 1);
}

#[tokio::test]
async fn test_activation_failure_keeps_plugin_active() {
    let executor = ScriptedExecutor::new();
    let m = manifest("flaky");
    let source = executor.add(
        "flaky",
        Script::matching(&m)
            .failing_on(Hook::Activate)
            .with_hook(Hook::Deactivate),
    );
    let mut manager = manager_with(&executor);

    let outcome = manager.try_load(&source, &m).await.unwrap();

    assert!(matches!(outcome.activation, HookOutcome::Failed { .. }));
    assert!(manager.is_active("flaky"));

    assert!(manager.unload("flaky").await);
    assert_eq!(executor.journal.count("flaky", Hook::Deactivate), 1);
}

#[tokio::test]
async fn test_install_then_activate() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let source = executor.add(
        "census",
        Script::matching(&m)
            .with_hook(Hook::Activate)
            .with_hook(Hook::Deactivate)
            .with_hook(Hook::WorldLoaded),
    );
    let mut manager = manager_with(&executor);

    manager.install(&source, &m).await.unwrap();
    let report = manager.trigger_hook(Hook::WorldLoaded, &json!({})).await;
    assert!(report.outcomes.is_empty());

    let outcome = manager.activate("census").await.unwrap();
    assert!(matches!(outcome, HookOutcome::Completed { .. }));
    assert_eq!(
        manager.activate("census").await.unwrap(),
        HookOutcome::NotDefined
    );
    assert_eq!(executor.journal.count("census", Hook::Activate), 1);

    manager.deactivate("census").await.unwrap();
    assert!(!manager.is_active("census"));
    assert!(manager.get_plugin("census").is_some());
    assert_eq!(executor.journal.count("census", Hook::Deactivate), 1);

    assert!(matches!(
        manager.activate("ghost").await,
        Err(EngineError::PluginNotLoaded(_))
    ));
}

#[tokio::test]
async fn test_category_precedence() {
    let executor = ScriptedExecutor::new();
    let mut manager = manager_with(&executor);

    let from_manifest = manifest("a").with_category(Category::Rpg);
    let mut info = PluginInfo::matching(&from_manifest);
    info.category = Some(Category::Export);
    let source = executor.add("a", Script::reporting(info));
    assert!(manager.load(&source, &from_manifest).await);

    let from_guest = manifest("b");
    let mut info = PluginInfo::matching(&from_guest);
    info.category = Some(Category::Visualization);
    let source = executor.add("b", Script::reporting(info));
    assert!(manager.load(&source, &from_guest).await);

    let unset = manifest("c");
    let source = executor.add("c", Script::matching(&unset));
    assert!(manager.load(&source, &unset).await);

    assert_eq!(manager.get_plugin("a").unwrap().category, Category::Rpg);
    assert_eq!(
        manager.get_plugin("b").unwrap().category,
        Category::Visualization
    );
    assert_eq!(manager.get_plugin("c").unwrap().category, Category::Other);
}

#[tokio::test]
async fn test_unload_all() {
    let executor = ScriptedExecutor::new();
    let mut manager = manager_with(&executor);

    for id in ["a", "b", "c"] {
        let m = manifest(id);
        let source = executor.add(id, Script::matching(&m).with_hook(Hook::Deactivate));
        assert!(manager.load(&source, &m).await);
    }

    manager.unload_all().await;

    assert!(manager.registry().is_empty());
    assert_eq!(executor.journal.shutdowns().len(), 3);
    assert_eq!(executor.journal.count("b", Hook::Deactivate), 1);
}

#[tokio::test]
async fn test_lifecycle_events_published() {
    let executor = ScriptedExecutor::new();
    let bus = Arc::new(MessageBus::new());
    let mut events = bus.subscribe(EventType::All).await;

    let mut manager = manager_with(&executor);
    manager.set_message_bus(bus);

    let good = manifest("good");
    let source = executor.add("good", Script::matching(&good).failing_on(Hook::WorldLoaded));
    assert!(manager.load(&source, &good).await);

    let bad = manifest("bad");
    let source = executor.add("bad", Script::matching(&bad).throwing());
    assert!(!manager.load(&source, &bad).await);

    manager.trigger_hook(Hook::WorldLoaded, &json!({})).await;
    assert!(manager.unload("good").await);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert!(matches!(&seen[0], Event::PluginLoaded { plugin_id, .. } if plugin_id == "good"));
    assert!(matches!(&seen[1], Event::PluginActivated { plugin_id } if plugin_id == "good"));
    assert!(matches!(&seen[2], Event::PluginRejected { plugin_id, .. } if plugin_id == "bad"));
    assert!(matches!(&seen[3], Event::HookFailed { plugin_id, .. } if plugin_id == "good"));
    assert!(matches!(&seen[4], Event::PluginUnloaded { plugin_id } if plugin_id == "good"));
    assert_eq!(seen.len(), 5);
}

#[tokio::test]
async fn test_concurrent_loads_of_same_id() {
    let executor = ScriptedExecutor::new();
    let m = manifest("census");
    let source = executor.add("census", Script::matching(&m));
    let manager = Arc::new(tokio::sync::Mutex::new(manager_with(&executor)));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let manager = manager.clone();
        let source = source.clone();
        let m = m.clone();
        handles.push(tokio::spawn(async move {
            manager.lock().await.load(&source, &m).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(manager.lock().await.registry().len(), 1);
}
