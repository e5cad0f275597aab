//! Integration tests for branch lifecycle workflows.

use branchsync::{
    BranchRelation, CreateOptions, EndpointRole, EndpointView, EngineConfig, MemoryRepository,
    OperationState, Orchestrator, RepositoryAdapter, SyncStatus, SyncStrategy, Topology,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn setup() -> (Topology, MemoryRepository, Orchestrator) {
    init_tracing();
    let topology = Topology::new("main").unwrap();
    let local = topology.local().unwrap();
    let orchestrator = Orchestrator::new(EngineConfig::default()).unwrap();
    (topology, local, orchestrator)
}

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// --- Create / Delete ---

#[test]
fn test_create_then_delete() {
    let (topology, local, orch) = setup();

    orch.create(&local, "feature", BranchRelation::None).unwrap();
    assert_eq!(local.current_branch().unwrap(), "feature");
    assert!(topology.remote().head("feature").unwrap().is_some());

    orch.delete(&local, "feature").unwrap();
    assert_eq!(local.current_branch().unwrap(), "main");
    assert!(!local.list_local_branches().unwrap().contains("feature"));
    assert!(topology.remote().head("feature").unwrap().is_none());

    // Deleting again is harmless
    let trace = orch.delete(&local, "feature").unwrap();
    assert!(trace.is_completed());
    assert_eq!(local.current_branch().unwrap(), "main");
}

#[test]
fn test_delete_unpushed_branch() {
    let (topology, local, orch) = setup();

    orch.create_with(&local, CreateOptions::feature("scratch").with_publish(false))
        .unwrap();
    orch.delete(&local, "scratch").unwrap();

    assert!(!local.list_local_branches().unwrap().contains("scratch"));
    assert!(topology.remote().head("scratch").unwrap().is_none());
}

#[test]
fn test_delete_from_another_branch() {
    let (_topology, local, orch) = setup();

    orch.create(&local, "one", BranchRelation::None).unwrap();
    orch.create(&local, "two", BranchRelation::None).unwrap();
    orch.delete(&local, "one").unwrap();

    // Delete always lands on main
    assert_eq!(local.current_branch().unwrap(), "main");
    assert!(local.list_local_branches().unwrap().contains("two"));
}

#[test]
fn test_operation_traces_walk_every_state() {
    let (_topology, local, orch) = setup();

    let trace = orch.create(&local, "feature", BranchRelation::None).unwrap();
    assert_eq!(
        trace.states(),
        &[
            OperationState::Started,
            OperationState::LocalApplied,
            OperationState::RemoteApplied,
            OperationState::PeerConverged,
            OperationState::Completed,
        ]
    );
    assert_eq!(trace.endpoint, EndpointRole::Local);
}

// --- Sync ---

#[test]
fn test_sync_feature_ahead_of_main() {
    let (topology, local, orch) = setup();

    orch.create(&local, "feature", BranchRelation::Ahead).unwrap();
    let feature_head = local.branch_head("feature").unwrap().unwrap();
    assert_eq!(orch.out_of_sync_count(&local).unwrap(), 1);

    let report = orch.sync(&local).unwrap();
    assert!(report.is_complete());
    assert_eq!(orch.out_of_sync_count(&local).unwrap(), 0);
    assert_eq!(local.current_branch().unwrap(), "feature");

    // Main now carries the feature's commit, locally and on the remote
    let main_head = local.branch_head("main").unwrap().unwrap();
    assert!(topology.objects().is_ancestor(&feature_head, &main_head).unwrap());
    assert_eq!(topology.remote().head("main").unwrap(), Some(main_head));
}

#[test]
fn test_sync_feature_behind_main() {
    let (_topology, local, orch) = setup();

    orch.create(&local, "feature", BranchRelation::Behind).unwrap();
    assert_eq!(
        orch.divergence().main_status(&local, "feature").unwrap(),
        SyncStatus::Behind
    );

    orch.sync(&local).unwrap();
    assert_eq!(
        orch.divergence().main_status(&local, "feature").unwrap(),
        SyncStatus::InSync
    );
}

#[test]
fn test_sync_returns_to_starting_branch() {
    let (_topology, local, orch) = setup();

    orch.create(&local, "alpha", BranchRelation::Ahead).unwrap();
    orch.create(&local, "beta", BranchRelation::Ahead).unwrap();
    local.checkout("alpha").unwrap();

    orch.sync(&local).unwrap();
    assert_eq!(local.current_branch().unwrap(), "alpha");
}

#[test]
fn test_sync_keeps_non_feature_one_way() {
    let (topology, local, orch) = setup();

    orch.create_with(&local, CreateOptions::non_feature("release"))
        .unwrap();
    let hotfix = local.commit("release", "hotfix").unwrap();
    orch.create(&local, "feature", BranchRelation::Ahead).unwrap();

    orch.sync(&local).unwrap();
    assert_eq!(orch.out_of_sync_count(&local).unwrap(), 0);

    // Release took main's changes but main never took the hotfix
    let main_head = local.branch_head("main").unwrap().unwrap();
    let release_head = local.branch_head("release").unwrap().unwrap();
    assert!(topology.objects().is_ancestor(&main_head, &release_head).unwrap());
    assert!(!topology.objects().is_ancestor(&hotfix, &main_head).unwrap());
}

#[test]
fn test_sync_picks_up_peer_commits() {
    let (topology, local, orch) = setup();
    let peer = topology.peer("coworker").unwrap();

    orch.create(&local, "feature", BranchRelation::None).unwrap();

    peer.fetch().unwrap();
    peer.create_branch("feature", "origin/feature").unwrap();
    let peer_commit = peer.commit("feature", "coworker work").unwrap();
    peer.push("feature").unwrap();

    local.commit("feature", "my work").unwrap();
    let report = orch.sync(&local).unwrap();
    assert!(report.is_complete(), "{:?}", report.failed);

    let head = local.branch_head("feature").unwrap().unwrap();
    assert!(topology.objects().is_ancestor(&peer_commit, &head).unwrap());
    assert_eq!(orch.out_of_sync_count(&local).unwrap(), 0);
}

#[test]
fn test_sync_rebase_strategy_publishes_rewritten_branches() {
    init_tracing();
    let topology = Topology::new("main").unwrap();
    let local = topology.local().unwrap();
    let orch =
        Orchestrator::new(EngineConfig::default().with_strategy(SyncStrategy::Rebase)).unwrap();

    orch.create(&local, "one", BranchRelation::Ahead).unwrap();
    orch.create(&local, "two", BranchRelation::Ahead).unwrap();
    orch.create(&local, "three", BranchRelation::Ahead).unwrap();

    let report = orch.sync(&local).unwrap();
    assert!(report.is_complete(), "{:?}", report.failed);
    assert_eq!(orch.out_of_sync_count(&local).unwrap(), 0);

    // Rebasing keeps history linear
    let main_head = local.branch_head("main").unwrap().unwrap();
    assert!(!topology.objects().get(&main_head).unwrap().is_merge());
}

#[test]
fn test_unpushed_commits_keep_count_non_zero() {
    let (_topology, local, orch) = setup();

    orch.create(&local, "feature", BranchRelation::None).unwrap();
    orch.sync(&local).unwrap();
    assert_eq!(orch.out_of_sync_count(&local).unwrap(), 0);

    local.commit("feature", "wip").unwrap();
    assert_eq!(orch.out_of_sync_count(&local).unwrap(), 1);
    local.commit("feature", "more wip").unwrap();
    assert_eq!(orch.out_of_sync_count(&local).unwrap(), 1);
}

// --- Cleanup / Ship ---

#[test]
fn test_cleanup_keeps_registered_non_feature() {
    let (topology, local, orch) = setup();

    orch.create(&local, "feature-a", BranchRelation::Ahead).unwrap();
    orch.create(&local, "release", BranchRelation::None).unwrap();
    orch.classifier().register_non_feature("release").unwrap();
    orch.create(&local, "feature-b", BranchRelation::None).unwrap();

    let report = orch.cleanup(&local).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.kept, vec!["release".to_string()]);

    let view = EndpointView::capture(&local).unwrap();
    assert_eq!(
        view.existing_branches(),
        names(&["main", "origin/main", "release", "origin/release"])
    );
    assert!(topology.remote().head("release").unwrap().is_some());
}

#[test]
fn test_cleanup_removes_remote_only_branches() {
    let (topology, local, orch) = setup();
    let peer = topology.peer("coworker").unwrap();

    orch.create(&peer, "theirs", BranchRelation::Ahead).unwrap();
    local.fetch().unwrap();
    assert!(local.list_remote_branches().unwrap().contains("origin/theirs"));

    let report = orch.cleanup(&local).unwrap();
    assert_eq!(report.deleted, vec!["theirs".to_string()]);
    assert!(topology.remote().head("theirs").unwrap().is_none());
}

#[test]
fn test_ship_feature() {
    let (topology, local, orch) = setup();

    orch.create(&local, "feature", BranchRelation::Ahead).unwrap();
    local.commit("feature", "second").unwrap();
    local.commit("feature", "third").unwrap();
    let before = local.branch_head("main").unwrap().unwrap();

    orch.ship(&local, "feature", "Add feature").unwrap();

    let main_head = local.branch_head("main").unwrap().unwrap();
    let squashed = topology.objects().get(&main_head).unwrap();
    assert_eq!(squashed.message, "Add feature");
    assert_eq!(squashed.parents, vec![before]);
    assert_eq!(local.current_branch().unwrap(), "main");
    assert!(!local.list_local_branches().unwrap().contains("feature"));
    assert!(topology.remote().head("feature").unwrap().is_none());
}

#[test]
fn test_ship_keeps_other_checkout() {
    let (_topology, local, orch) = setup();

    orch.create(&local, "feature", BranchRelation::Ahead).unwrap();
    orch.create(&local, "other", BranchRelation::None).unwrap();

    orch.ship(&local, "feature", "Ship it").unwrap();
    assert_eq!(local.current_branch().unwrap(), "other");
}

// --- Configuration ---

#[test]
fn test_registry_survives_restart() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::default().with_registry(dir.path().join("branches.json"));
    let topology = Topology::new("main").unwrap();
    let local = topology.local().unwrap();

    {
        let orch = Orchestrator::new(config.clone()).unwrap();
        orch.create_with(&local, CreateOptions::non_feature("production"))
            .unwrap();
    }

    let orch = Orchestrator::new(config).unwrap();
    assert!(!orch.classifier().is_feature("production"));

    let report = orch.cleanup(&local).unwrap();
    assert!(report.deleted.is_empty());
    assert!(local.list_local_branches().unwrap().contains("production"));
}

#[test]
fn test_custom_main_branch() {
    init_tracing();
    let topology = Topology::new("trunk").unwrap();
    let local = topology.local().unwrap();
    let config = EngineConfig {
        main_branch: "trunk".to_string(),
        ..EngineConfig::default()
    };
    let orch = Orchestrator::new(config).unwrap();

    orch.create(&local, "feature", BranchRelation::Ahead).unwrap();
    orch.sync(&local).unwrap();
    orch.delete(&local, "feature").unwrap();

    assert_eq!(local.current_branch().unwrap(), "trunk");
    assert_eq!(orch.out_of_sync_count(&local).unwrap(), 0);
}

// --- Properties ---

fn branch_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}".prop_filter("main is reserved", |n| n != "main")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_create_checks_out_branch(name in branch_name()) {
        let topology = Topology::new("main").unwrap();
        let local = topology.local().unwrap();
        let orch = Orchestrator::new(EngineConfig::default()).unwrap();

        orch.create(&local, &name, BranchRelation::None).unwrap();
        prop_assert_eq!(local.current_branch().unwrap(), name);
    }

    #[test]
    fn prop_create_delete_is_idempotent(name in branch_name()) {
        let topology = Topology::new("main").unwrap();
        let local = topology.local().unwrap();
        let orch = Orchestrator::new(EngineConfig::default()).unwrap();

        orch.create(&local, &name, BranchRelation::Ahead).unwrap();
        orch.delete(&local, &name).unwrap();
        prop_assert!(!local.list_local_branches().unwrap().contains(&name));
        prop_assert_eq!(local.current_branch().unwrap(), "main");

        orch.delete(&local, &name).unwrap();
        prop_assert_eq!(local.current_branch().unwrap(), "main");
    }

    #[test]
    fn prop_sync_clears_divergence(relations in prop::collection::vec(0u8..3, 1..6)) {
        let topology = Topology::new("main").unwrap();
        let local = topology.local().unwrap();
        let orch = Orchestrator::new(EngineConfig::default()).unwrap();

        for (i, relation) in relations.iter().enumerate() {
            let relation = match relation {
                0 => BranchRelation::None,
                1 => BranchRelation::Behind,
                _ => BranchRelation::Ahead,
            };
            orch.create(&local, &format!("feature-{}", i), relation).unwrap();
        }

        let report = orch.sync(&local).unwrap();
        prop_assert!(report.is_complete());
        prop_assert_eq!(orch.out_of_sync_count(&local).unwrap(), 0);
    }
}
