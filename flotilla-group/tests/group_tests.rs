//! Group lifecycle integration tests: exclusive membership, all-or-nothing
//! updates, feature teardown on delete and the reconcile guard.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flotilla_core::{
    ClusterGroup, ClusterId, ClusterRegistry, ClusterStatus, Feature, FeatureRecord, GroupStore,
    Inventory, InventoryCluster, InventoryRegistry, OrgId, ReconcileState,
};
use flotilla_group::{ClusterGroupError, ClusterGroupManager, FeatureError, FeatureHandler, FeatureManager};
use serde_json::{json, Value};
use tempfile::TempDir;

const ORG: OrgId = OrgId(1);

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Rejects any prospective group containing the cluster named in the
/// `deny` property; records every reconcile it sees.
#[derive(Default)]
struct FenceHandler {
    reconciles: Mutex<Vec<(bool, Vec<ClusterId>)>>,
}

impl FenceHandler {
    fn reconciles(&self) -> Vec<(bool, Vec<ClusterId>)> {
        self.reconciles.lock().expect("lock").clone()
    }
}

#[async_trait]
impl FeatureHandler for FenceHandler {
    fn name(&self) -> &str {
        "fence"
    }

    async fn validate_properties(
        &self,
        _group: &ClusterGroup,
        _current: Option<&Value>,
        proposed: &Value,
    ) -> Result<(), FeatureError> {
        match proposed.get("deny") {
            Some(Value::Number(_)) | None => Ok(()),
            Some(_) => Err(FeatureError::rejected("deny must be a cluster id")),
        }
    }

    async fn validate_state(&self, feature: &Feature) -> Result<(), FeatureError> {
        let Some(deny) = feature.properties.get("deny").and_then(Value::as_u64) else {
            return Ok(());
        };
        if feature.group.is_member(ClusterId(deny as u32)) {
            return Err(FeatureError::rejected(format!("cluster {deny} is fenced off")));
        }
        Ok(())
    }

    async fn reconcile_state(&self, feature: &Feature) -> Result<(), FeatureError> {
        self.reconciles
            .lock()
            .expect("lock")
            .push((feature.enabled, feature.group.member_ids()));
        Ok(())
    }

    async fn members_status(
        &self,
        _feature: &Feature,
    ) -> Result<BTreeMap<String, String>, FeatureError> {
        Ok(BTreeMap::new())
    }
}

fn cluster(id: u32, name: &str) -> InventoryCluster {
    InventoryCluster {
        id: ClusterId(id),
        org_id: ORG,
        name: name.into(),
        cloud: "google".into(),
        distribution: "gke".into(),
        status: ClusterStatus::Running,
        ready: true,
        kubeconfig_path: None,
        kubeconfig: None,
    }
}

struct Harness {
    _home: TempDir,
    store: Arc<GroupStore>,
    registry: Arc<dyn ClusterRegistry>,
    fence: Arc<FenceHandler>,
    groups: ClusterGroupManager,
}

fn harness() -> Harness {
    let home = TempDir::new().expect("home");
    let store = Arc::new(GroupStore::at(home.path()));
    let registry: Arc<dyn ClusterRegistry> = Arc::new(InventoryRegistry::from_inventory(Inventory {
        organizations: Default::default(),
        clusters: vec![cluster(1, "a"), cluster(2, "b"), cluster(3, "c")],
    }));
    let fence = Arc::new(FenceHandler::default());
    let features = Arc::new(
        FeatureManager::new(store.clone(), registry.clone()).with_handler(fence.clone()),
    );
    let groups = ClusterGroupManager::new(
        store.clone(),
        registry.clone(),
        features,
        vec![ClusterStatus::Running],
    );
    Harness {
        _home: home,
        store,
        registry,
        fence,
        groups,
    }
}

// ---------------------------------------------------------------------------
// 1. Membership invariants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cluster_belongs_to_at_most_one_group() {
    let h = harness();
    h.groups
        .create_group(ORG, "first", &[ClusterId(1)])
        .await
        .expect("create first");

    let err = h
        .groups
        .create_group(ORG, "second", &[ClusterId(2), ClusterId(1)])
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterGroupError::MemberAlreadyInGroup { cluster_id: ClusterId(1), .. }), "got: {err}");
    assert_eq!(h.store.list_groups().expect("list").len(), 1);
}

#[tokio::test]
async fn unknown_member_is_reported_with_org() {
    let h = harness();
    let err = h
        .groups
        .create_group(ORG, "g", &[ClusterId(42)])
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterGroupError::MemberClusterNotFound { cluster_id: ClusterId(42), .. }));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn group_names_are_unique_per_org() {
    let h = harness();
    h.groups.create_group(ORG, "edge", &[ClusterId(1)]).await.expect("edge");
    let other = h.groups.create_group(ORG, "core", &[ClusterId(2)]).await.expect("core");

    let err = h.groups.create_group(ORG, "edge", &[ClusterId(3)]).await.unwrap_err();
    assert!(matches!(err, ClusterGroupError::AlreadyExists { .. }));

    let err = h
        .groups
        .update_group(ORG, other.id, Some("edge"), &[ClusterId(2)])
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterGroupError::AlreadyExists { .. }));
}

// ---------------------------------------------------------------------------
// 2. Update is all-or-nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_update_leaves_group_untouched() {
    let h = harness();
    let group = h
        .groups
        .create_group(ORG, "g", &[ClusterId(1)])
        .await
        .expect("create");
    h.groups
        .features()
        .enable_feature(group.id, "fence", json!({ "deny": 3 }))
        .await
        .expect("enable fence");
    let reconciles_before = h.fence.reconciles().len();

    let err = h
        .groups
        .update_group(ORG, group.id, Some("renamed"), &[ClusterId(1), ClusterId(2), ClusterId(3)])
        .await
        .unwrap_err();
    match &err {
        ClusterGroupError::UpdateRejected { feature, reason } => {
            assert_eq!(feature, "fence");
            assert!(reason.contains("fenced off"), "got: {reason}");
        }
        other => panic!("expected UpdateRejected, got {other}"),
    }

    let stored = h.store.load_group(group.id).expect("load");
    assert_eq!(stored.members, vec![ClusterId(1)]);
    assert_eq!(stored.name, "g");
    assert_eq!(h.fence.reconciles().len(), reconciles_before);
}

#[tokio::test]
async fn approved_update_reconciles_enabled_features_only() {
    let h = harness();
    let group = h
        .groups
        .create_group(ORG, "g", &[ClusterId(1)])
        .await
        .expect("create");
    h.groups
        .features()
        .enable_feature(group.id, "fence", json!({}))
        .await
        .expect("enable");
    h.groups
        .features()
        .disable_feature(group.id, "fence")
        .await
        .expect("disable");
    let before = h.fence.reconciles().len();

    let updated = h
        .groups
        .update_group(ORG, group.id, None, &[ClusterId(1), ClusterId(2)])
        .await
        .expect("update");
    assert_eq!(updated.member_ids(), vec![ClusterId(1), ClusterId(2)]);
    assert_eq!(h.fence.reconciles().len(), before, "disabled feature must not reconcile");

    h.groups
        .features()
        .enable_feature(group.id, "fence", json!({}))
        .await
        .expect("re-enable");
    h.groups
        .update_group(ORG, group.id, None, &[ClusterId(2)])
        .await
        .expect("update");
    let last = h.fence.reconciles().pop().expect("reconciled");
    assert_eq!(last, (true, vec![ClusterId(2)]));
}

// ---------------------------------------------------------------------------
// 3. Remove cluster / delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn removing_clusters_shrinks_then_deletes_group() {
    let h = harness();
    let group = h
        .groups
        .create_group(ORG, "g", &[ClusterId(1), ClusterId(2)])
        .await
        .expect("create");

    assert_eq!(
        h.groups.remove_cluster_from_group(ClusterId(3)).await.expect("noop"),
        None
    );
    assert_eq!(
        h.groups.remove_cluster_from_group(ClusterId(2)).await.expect("remove b"),
        Some(group.id)
    );
    assert_eq!(h.store.load_group(group.id).expect("load").members, vec![ClusterId(1)]);
    assert_eq!(h.groups.group_id_of_cluster(ClusterId(2)).expect("lookup"), None);

    h.groups.remove_cluster_from_group(ClusterId(1)).await.expect("remove a");
    let err = h.groups.get_group(ORG, group.id).await.unwrap_err();
    assert!(matches!(err, ClusterGroupError::NotFound { .. }));
}

#[tokio::test]
async fn delete_tears_down_enabled_features() {
    let h = harness();
    let group = h
        .groups
        .create_group(ORG, "g", &[ClusterId(1)])
        .await
        .expect("create");
    h.groups
        .features()
        .enable_feature(group.id, "fence", json!({}))
        .await
        .expect("enable");

    h.groups.delete_group(ORG, group.id).await.expect("delete");

    let last = h.fence.reconciles().pop().expect("teardown reconcile");
    assert_eq!(last, (false, vec![ClusterId(1)]));
    assert!(h.store.list_groups().expect("list").is_empty());
    assert_eq!(h.groups.group_id_of_cluster(ClusterId(1)).expect("lookup"), None);
}

#[tokio::test]
async fn delete_aborts_while_feature_reconciles() {
    let h = harness();
    let group = h
        .groups
        .create_group(ORG, "g", &[ClusterId(1)])
        .await
        .expect("create");
    let mut row = FeatureRecord::enabled("fence");
    row.reconcile_state = ReconcileState::InProgress;
    h.store.save_feature(group.id, &row).expect("seed");

    let err = h.groups.delete_group(ORG, group.id).await.unwrap_err();
    assert!(matches!(err, ClusterGroupError::ReconcileInProgress { .. }), "got: {err}");
    assert!(h.fence.reconciles().is_empty());
    assert!(h.store.load_group(group.id).is_ok());
}

// ---------------------------------------------------------------------------
// 4. Engines
// ---------------------------------------------------------------------------

#[tokio::test]
async fn independently_configured_engines_coexist() {
    let h = harness();
    let group = h
        .groups
        .create_group(ORG, "g", &[ClusterId(1)])
        .await
        .expect("create");

    let bare = FeatureManager::new(h.store.clone(), h.registry.clone());
    let err = bare
        .enable_feature(group.id, "fence", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterGroupError::FeatureNotRegistered { .. }));

    h.groups
        .features()
        .enable_feature(group.id, "fence", json!({}))
        .await
        .expect("configured engine knows fence");

    let names: Vec<String> = bare
        .list_features(group.id)
        .await
        .expect("list")
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["deployment".to_string(), "fence".to_string()]);
}

#[tokio::test]
async fn get_with_status_reports_live_status() {
    let h = harness();
    let group = h
        .groups
        .create_group(ORG, "g", &[ClusterId(1), ClusterId(2)])
        .await
        .expect("create");
    let view = h.groups.get_group_with_status(ORG, group.id).await.expect("get");
    assert!(view
        .members
        .iter()
        .all(|m| m.status == Some(ClusterStatus::Running)));
    assert_eq!(h.groups.list_groups(ORG).await.expect("list").len(), 1);
    assert!(h.groups.list_groups(OrgId(9)).await.expect("list").is_empty());
}
