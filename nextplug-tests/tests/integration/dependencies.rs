//! Dependency resolution integration tests
//!
//! Installability checks, conflicts, host bounds, cycles and ordering, both
//! through the manager and against a standalone graph.

use anyhow::Result;
use nextplug_core::config::{DependencySettings, EngineConfig};
use nextplug_core::dependency::{satisfies, ConflictKind, DependencyGraph, NodeStatus, Resolution};
use nextplug_tests::prelude::*;

fn versioned(id: &str, version: &str) -> PluginMetadata {
    PluginMetadata::new(id, id, version)
        .with_author("NextPlug Tests")
        .with_license("MIT")
}

fn host(version: &str) -> EngineConfig {
    let mut config = EngineConfig::testing();
    config.host_version = version.to_string();
    config
}

/// Installability follows dependency presence and version ranges
#[tokio::test]
async fn test_dependency_satisfaction() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.manager
        .install_plugin(versioned("storage", "1.2.0"), echo_plugin("storage"))
        .await?;

    let check = ctx.manager.can_install(&versioned("app", "1.0.0").with_dependency("storage", "^1.0.0"));
    assert!(check.can_install);
    assert!(check.reason.is_none());
    assert!(check.missing_dependencies.is_empty());

    let check = ctx.manager.can_install(&versioned("app", "1.0.0").with_dependency("storage", "^2.0.0"));
    assert!(!check.can_install);
    assert_eq!(check.reason, Some(BlockReason::DependenciesNotSatisfied));
    assert_eq!(check.missing_dependencies, vec!["storage@^2.0.0 (installed: 1.2.0)".to_string()]);

    let check = ctx.manager.can_install(
        &versioned("app", "1.0.0")
            .with_dependency("storage", ">=1.0.0 <2.0.0")
            .with_dependency("cache", "1.0.0"),
    );
    assert!(!check.can_install);
    assert_eq!(check.missing_dependencies, vec!["cache@1.0.0".to_string()]);

    ctx.teardown().await
}

/// A refused check becomes a dependency error on install
#[tokio::test]
async fn test_install_refused_for_missing_dependency() -> Result<()> {
    let ctx = TestContext::new()?;

    let err = ctx
        .manager
        .install_plugin(versioned("app", "1.0.0").with_dependency("cache", "^1.0.0"), echo_plugin("app"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DependencyError);
    assert!(err.to_string().contains("dependencies_not_satisfied"));
    assert!(ctx.manager.get_plugin("app").is_none());
    assert!(ctx.manager.get_config("app").is_none());

    ctx.teardown().await
}

/// Direct, api and resource conflicts are all reported
#[tokio::test]
async fn test_conflicts_detected() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.manager.install_plugin(echo_metadata("echo"), echo_plugin("echo")).await?;
    ctx.manager
        .install_plugin(versioned("legacy", "0.9.0"), echo_plugin("legacy"))
        .await?;

    let direct = versioned("modern", "1.0.0").with_conflict("legacy");
    let check = ctx.manager.can_install(&direct);
    assert!(!check.can_install);
    assert_eq!(check.reason, Some(BlockReason::ConflictsDetected));
    assert_eq!(check.conflicts.len(), 1);
    assert_eq!(check.conflicts[0].kind, ConflictKind::Direct);

    let api = versioned("mirror", "1.0.0").with_tool(OperationSpec::new("echo", "Another echo"));
    let check = ctx.manager.can_install(&api);
    assert_eq!(check.reason, Some(BlockReason::ConflictsDetected));
    assert_eq!(check.conflicts[0].kind, ConflictKind::Api);
    assert_eq!(check.conflicts[0].plugin_id, "echo");

    let resource = versioned("status", "1.0.0").with_resource(ResourceSpec::new("status", "json", "plugin://echo/status"));
    let check = ctx.manager.can_install(&resource);
    assert_eq!(check.conflicts[0].kind, ConflictKind::Resource);
    assert_eq!(check.conflicts[0].subject, "plugin://echo/status");

    let resolutions = ctx.manager.context().dependencies.resolve_conflicts(&direct);
    assert_eq!(
        resolutions,
        vec![Resolution::UninstallConflicting {
            plugin_id: "legacy".to_string(),
            reason: "direct conflict with legacy (legacy)".to_string(),
        }]
    );

    ctx.teardown().await
}

/// Host version bounds block the install
#[tokio::test]
async fn test_host_version_bounds() -> Result<()> {
    let ctx = TestContext::with_config(host("2.3.0"))?;

    let fits = versioned("fits", "1.0.0").with_host_versions(Some("2.0.0"), Some("3.0.0"));
    assert!(ctx.manager.can_install(&fits).can_install);

    let too_new = versioned("too-new", "1.0.0").with_host_versions(Some("3.0.0"), None);
    let check = ctx.manager.can_install(&too_new);
    assert!(!check.can_install);
    assert_eq!(check.reason, Some(BlockReason::CompatibilityIssues));
    assert_eq!(check.compatibility_issues, vec!["requires host >= 3.0.0, running 2.3.0".to_string()]);

    let too_old = versioned("too-old", "1.0.0").with_host_versions(None, Some("2.2.9"));
    let check = ctx.manager.can_install(&too_old);
    assert_eq!(check.reason, Some(BlockReason::CompatibilityIssues));

    ctx.teardown().await
}

/// Peer dependencies warn, and only block when configured to
#[tokio::test]
async fn test_peer_dependency_warnings() -> Result<()> {
    let peer = versioned("theme", "1.0.0").with_peer_dependency("ui-kit", "^4.0.0");

    let lenient = TestContext::new()?;
    let check = lenient.manager.can_install(&peer);
    assert!(check.can_install);
    assert_eq!(check.warnings, vec!["peer dependency ui-kit@^4.0.0 is not installed".to_string()]);
    lenient.manager.install_plugin(peer.clone(), echo_plugin("theme")).await?;
    lenient.teardown().await?;

    let mut config = EngineConfig::testing();
    config.dependency.block_on_warnings = true;
    let strict = TestContext::with_config(config)?;
    let check = strict.manager.can_install(&peer);
    assert!(!check.can_install);
    assert_eq!(check.reason, Some(BlockReason::CompatibilityIssues));
    strict.teardown().await
}

/// Cycles block unless the policy allows them
#[test]
fn test_cycle_detection() {
    let graph = DependencyGraph::new(DependencySettings::default(), "1.0.0");
    graph.add_plugin(&versioned("b", "1.0.0").with_dependency("a", "^1.0.0"));

    let candidate = versioned("a", "1.0.0").with_dependency("b", "^1.0.0");
    let check = graph.can_install(&candidate);
    assert!(!check.can_install);
    assert_eq!(check.reason, Some(BlockReason::CircularDependency));
    assert_eq!(check.cycle, Some(vec!["a".to_string(), "b".to_string(), "a".to_string()]));

    let permissive = DependencyGraph::new(
        DependencySettings {
            block_on_warnings: false,
            block_on_cycles: false,
        },
        "1.0.0",
    );
    permissive.add_plugin(&versioned("b", "1.0.0").with_dependency("a", "^1.0.0"));
    assert!(permissive.can_install(&candidate).can_install);

    permissive.add_plugin(&candidate);
    let cycles = permissive.detect_cycles();
    assert_eq!(cycles.len(), 1);
    assert_eq!(permissive.stats().cycles, 1);
    assert!(permissive.install_order(&["a", "b"]).is_err());

    let tree = permissive.dependency_tree("a").unwrap();
    assert_eq!(tree.children[0].id, "b");
    assert!(tree.children[0].children[0].circular);
}

/// Install order puts dependencies first
#[test]
fn test_install_order() {
    let graph = DependencyGraph::new(DependencySettings::default(), "1.0.0");
    graph.add_plugin(&versioned("core", "1.0.0"));
    graph.add_plugin(&versioned("db", "1.0.0").with_dependency("core", "^1.0.0"));
    graph.add_plugin(&versioned("api", "1.0.0").with_dependency("db", "^1.0.0").with_dependency("core", "*"));
    graph.add_plugin(&versioned("cli", "1.0.0"));

    let order = graph.install_order(&["api", "cli", "core", "db"]).unwrap();
    assert_eq!(order, vec!["core", "db", "api", "cli"]);

    assert_eq!(graph.dependents("core"), vec!["api".to_string(), "db".to_string()]);
    let stats = graph.stats();
    assert_eq!(stats.nodes, 4);
    assert_eq!(stats.edges, 3);
    assert_eq!(stats.orphaned, 1);
    assert_eq!(stats.max_depth, 2);

    let err = graph.install_order(&["ghost"]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

/// npm-style ranges
#[test]
fn test_range_matching() {
    assert!(satisfies("1.4.2", "^1.2.0"));
    assert!(!satisfies("2.0.0", "^1.2.0"));
    assert!(satisfies("1.2.9", "~1.2.0"));
    assert!(!satisfies("1.3.0", "~1.2.0"));
    assert!(satisfies("1.0.0", "1.0.0"));
    assert!(!satisfies("1.0.1", "1.0.0"));
    assert!(satisfies("3.1.0", "^1.0.0 || ^3.0.0"));
    assert!(satisfies("1.5.0", "1.0.0 - 2.0.0"));
    assert!(satisfies("0.0.1", "*"));
    assert!(satisfies("9.9.9", "latest"));
    assert!(!satisfies("not-a-version", "*"));
}

/// Dependents block uninstall and upgrades outside their declared range
#[tokio::test]
async fn test_dependents_guard_uninstall_and_update() -> Result<()> {
    let ctx = TestContext::new()?;
    let storage = ctx.install_active(versioned("storage", "1.2.0"), echo_plugin("storage")).await?;
    let app = ctx
        .manager
        .install_plugin(versioned("app", "1.0.0").with_dependency("storage", "^1.0.0"), echo_plugin("app"))
        .await?;

    let err = ctx.manager.uninstall("storage").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::DependencyError);
    assert!(err.to_string().contains("required by app"));

    let graph = &ctx.manager.context().dependencies;
    assert_eq!(graph.node("storage").map(|n| n.status), Some(NodeStatus::Active));
    assert_eq!(graph.node("app").map(|n| n.status), Some(NodeStatus::Installed));

    // A breaking upgrade is refused and the running version stays in place
    let err = ctx
        .manager
        .update_plugin(versioned("storage", "2.0.0"), echo_plugin("storage"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DependencyError);
    assert!(err.to_string().contains("app requires storage@^1.0.0"));
    assert_eq!(storage.metadata().version, "1.2.0");
    assert_eq!(storage.state(), PluginState::Active);
    assert_eq!(graph.node("storage").map(|n| n.version), Some("1.2.0".to_string()));

    let upgraded = ctx
        .manager
        .update_plugin(versioned("storage", "1.3.0"), echo_plugin("storage"))
        .await?;
    assert_eq!(upgraded.state(), PluginState::Active);
    ctx.manager.enable("app").await?;
    assert_eq!(app.state(), PluginState::Active);

    ctx.manager.uninstall("app").await?;
    ctx.manager.uninstall("storage").await?;
    assert!(ctx.manager.list_plugins().is_empty());

    ctx.teardown().await
}
