//! Cluster group lifecycle.
//!
//! Every membership change goes validate → persist → reconcile: candidate
//! members are resolved and checked, every enabled feature gets a chance to
//! veto the prospective group, and only then is the new member set written and
//! the enabled features converged.

use std::collections::BTreeSet;
use std::sync::Arc;

use flotilla_core::{
    ClusterGroup, ClusterId, ClusterRegistry, ClusterStatus, FeatureRecord, GroupId, GroupRecord,
    GroupStore, Member, OrgId, DEPLOYMENT_FEATURE,
};

use crate::error::ClusterGroupError;
use crate::feature::FeatureManager;
use crate::members::{member_from_handle, resolve_group};

pub struct ClusterGroupManager {
    store: Arc<GroupStore>,
    clusters: Arc<dyn ClusterRegistry>,
    features: Arc<FeatureManager>,
    schedulable: Vec<ClusterStatus>,
}

impl ClusterGroupManager {
    /// `schedulable` lists the cluster statuses allowed to join a group.
    pub fn new(
        store: Arc<GroupStore>,
        clusters: Arc<dyn ClusterRegistry>,
        features: Arc<FeatureManager>,
        schedulable: Vec<ClusterStatus>,
    ) -> Self {
        Self {
            store,
            clusters,
            features,
            schedulable,
        }
    }

    pub fn features(&self) -> &Arc<FeatureManager> {
        &self.features
    }

    // -----------------------------------------------------------------------
    // 1. Reads
    // -----------------------------------------------------------------------

    pub async fn get_group(
        &self,
        org_id: OrgId,
        group_id: GroupId,
    ) -> Result<ClusterGroup, ClusterGroupError> {
        let record = self.load_in_org(org_id, group_id)?;
        Ok(resolve_group(self.clusters.as_ref(), &record, false).await)
    }

    /// Like [`Self::get_group`] but each member also carries its live status.
    pub async fn get_group_with_status(
        &self,
        org_id: OrgId,
        group_id: GroupId,
    ) -> Result<ClusterGroup, ClusterGroupError> {
        let record = self.load_in_org(org_id, group_id)?;
        Ok(resolve_group(self.clusters.as_ref(), &record, true).await)
    }

    pub async fn list_groups(&self, org_id: OrgId) -> Result<Vec<ClusterGroup>, ClusterGroupError> {
        let mut groups = Vec::new();
        for record in self.store.list_groups_in_org(org_id)? {
            groups.push(resolve_group(self.clusters.as_ref(), &record, false).await);
        }
        Ok(groups)
    }

    pub fn group_id_of_cluster(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Option<GroupId>, ClusterGroupError> {
        Ok(self.store.find_group_of_cluster(cluster_id)?.map(|g| g.id))
    }

    fn load_in_org(&self, org_id: OrgId, group_id: GroupId) -> Result<GroupRecord, ClusterGroupError> {
        let record = self.store.load_group(group_id)?;
        if record.org_id != org_id {
            return Err(ClusterGroupError::NotFound { group_id });
        }
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // 2. Create
    // -----------------------------------------------------------------------

    /// Create a group of `members` with the `deployment` feature enabled.
    pub async fn create_group(
        &self,
        org_id: OrgId,
        name: &str,
        members: &[ClusterId],
    ) -> Result<ClusterGroup, ClusterGroupError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClusterGroupError::EmptyName);
        }
        if members.is_empty() {
            return Err(ClusterGroupError::NoMembers);
        }
        if self.store.find_group_by_name(org_id, name)?.is_some() {
            return Err(ClusterGroupError::AlreadyExists {
                org_id,
                name: name.to_string(),
            });
        }

        let groups = self.store.list_groups()?;
        for cluster_id in unique(members) {
            self.check_member(org_id, cluster_id, None, &groups, true)
                .await?;
        }

        let record = self.store.create_group(
            org_id,
            name,
            members,
            [FeatureRecord::enabled(DEPLOYMENT_FEATURE)],
        )?;
        tracing::info!(group = %record.id, org = %org_id, name, members = record.members.len(), "cluster group created");
        Ok(resolve_group(self.clusters.as_ref(), &record, false).await)
    }

    /// Resolve one candidate and enforce the per-member join rules.
    ///
    /// `this_group` is the group being updated; its current members pass the
    /// grouping check. The status check applies when `joining` is set.
    async fn check_member(
        &self,
        org_id: OrgId,
        cluster_id: ClusterId,
        this_group: Option<GroupId>,
        groups: &[GroupRecord],
        joining: bool,
    ) -> Result<Member, ClusterGroupError> {
        let handle = match self.clusters.get_cluster_by_id(org_id, cluster_id).await {
            Ok(handle) => handle,
            Err(err) if err.is_not_found() => {
                return Err(ClusterGroupError::MemberClusterNotFound { org_id, cluster_id })
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(other) = groups
            .iter()
            .find(|g| Some(g.id) != this_group && g.members.contains(&cluster_id))
        {
            return Err(ClusterGroupError::MemberAlreadyInGroup {
                cluster_id,
                group_id: other.id,
            });
        }

        if joining {
            let status = handle.status().await?;
            if !self.schedulable.contains(&status) {
                return Err(ClusterGroupError::UnableToJoin {
                    cluster_id,
                    cluster_name: handle.name().to_string(),
                    status,
                });
            }
        }

        Ok(member_from_handle(handle.as_ref(), false).await)
    }

    // -----------------------------------------------------------------------
    // 3. Update / remove member
    // -----------------------------------------------------------------------

    /// Replace the member set of a group and optionally rename it.
    ///
    /// Nothing is persisted unless every candidate passes its checks and every
    /// enabled feature accepts the prospective group.
    pub async fn update_group(
        &self,
        org_id: OrgId,
        group_id: GroupId,
        new_name: Option<&str>,
        members: &[ClusterId],
    ) -> Result<ClusterGroup, ClusterGroupError> {
        let record = self.load_in_org(org_id, group_id)?;
        let new_name = new_name.map(str::trim);
        if new_name.is_some_and(str::is_empty) {
            return Err(ClusterGroupError::EmptyName);
        }
        if members.is_empty() {
            return Err(ClusterGroupError::NoMembers);
        }
        if let Some(name) = new_name {
            if let Some(other) = self.store.find_group_by_name(org_id, name)? {
                if other.id != group_id {
                    return Err(ClusterGroupError::AlreadyExists {
                        org_id,
                        name: name.to_string(),
                    });
                }
            }
        }

        let groups = self.store.list_groups()?;
        let mut resolved = Vec::with_capacity(members.len());
        for cluster_id in unique(members) {
            let joining = !record.members.contains(&cluster_id);
            resolved.push(
                self.check_member(org_id, cluster_id, Some(group_id), &groups, joining)
                    .await?,
            );
        }

        self.apply_membership(&record, new_name, resolved).await?;
        self.get_group(org_id, group_id).await
    }

    /// Drop `cluster_id` from whichever group holds it.
    ///
    /// Returns the affected group, or `None` when the cluster is ungrouped.
    /// Removing the last member deletes the group.
    pub async fn remove_cluster_from_group(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Option<GroupId>, ClusterGroupError> {
        let Some(record) = self.store.find_group_of_cluster(cluster_id)? else {
            return Ok(None);
        };

        let mut remaining = record.clone();
        remaining.members.retain(|id| *id != cluster_id);
        if remaining.members.is_empty() {
            tracing::info!(group = %record.id, cluster = %cluster_id, "last member removed; deleting cluster group");
            self.delete_group(record.org_id, record.id).await?;
            return Ok(Some(record.id));
        }

        let prospective = resolve_group(self.clusters.as_ref(), &remaining, false).await;
        self.apply_membership(&record, None, prospective.members)
            .await?;
        Ok(Some(record.id))
    }

    async fn apply_membership(
        &self,
        record: &GroupRecord,
        new_name: Option<&str>,
        members: Vec<Member>,
    ) -> Result<(), ClusterGroupError> {
        let prospective = ClusterGroup {
            id: record.id,
            uid: record.uid,
            org_id: record.org_id,
            name: new_name.unwrap_or(&record.name).to_string(),
            members,
            enabled_features: record.enabled_features(),
        };
        self.features.validate_membership(&prospective).await?;

        let diff = self
            .store
            .update_members(record.id, new_name, &prospective.member_ids())?;
        tracing::info!(
            group = %record.id,
            added = ?diff.added,
            removed = ?diff.removed,
            "cluster group membership updated",
        );

        self.features.reconcile_enabled_features(record.id).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 4. Delete
    // -----------------------------------------------------------------------

    /// Disable and tear down every enabled feature, then delete the group.
    ///
    /// Aborts if a feature is mid-reconcile. A failed teardown is recorded on
    /// the feature row and does not stop the deletion.
    pub async fn delete_group(&self, org_id: OrgId, group_id: GroupId) -> Result<(), ClusterGroupError> {
        self.load_in_org(org_id, group_id)?;
        for feature in self.features.disable_and_reconcile_all(group_id).await? {
            if let Some(err) = &feature.last_reconcile_error {
                tracing::warn!(group = %group_id, feature = %feature.name, error = %err, "feature teardown failed");
            }
        }
        self.store.delete_group(group_id)?;
        tracing::info!(group = %group_id, org = %org_id, "cluster group deleted");
        Ok(())
    }
}

/// `ids` with duplicates removed, first occurrence wins.
fn unique(ids: &[ClusterId]) -> Vec<ClusterId> {
    let mut seen = BTreeSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::{Inventory, InventoryCluster, InventoryRegistry};
    use rstest::rstest;
    use tempfile::TempDir;

    fn cluster(id: u32, name: &str, status: ClusterStatus) -> InventoryCluster {
        InventoryCluster {
            id: ClusterId(id),
            org_id: OrgId(1),
            name: name.into(),
            cloud: "amazon".into(),
            distribution: "eks".into(),
            status,
            ready: true,
            kubeconfig_path: None,
            kubeconfig: None,
        }
    }

    fn manager(clusters: Vec<InventoryCluster>) -> (TempDir, ClusterGroupManager) {
        let home = TempDir::new().expect("home");
        let store = Arc::new(GroupStore::at(home.path()));
        let registry: Arc<dyn ClusterRegistry> = Arc::new(InventoryRegistry::from_inventory(Inventory {
            organizations: Default::default(),
            clusters,
        }));
        let features = Arc::new(FeatureManager::new(store.clone(), registry.clone()));
        let manager = ClusterGroupManager::new(
            store,
            registry,
            features,
            vec![ClusterStatus::Running, ClusterStatus::Warning],
        );
        (home, manager)
    }

    #[test]
    fn unique_keeps_first_occurrence_order() {
        let ids = [ClusterId(3), ClusterId(1), ClusterId(3), ClusterId(2)];
        assert_eq!(unique(&ids), vec![ClusterId(3), ClusterId(1), ClusterId(2)]);
    }

    #[rstest]
    #[case(ClusterStatus::Creating)]
    #[case(ClusterStatus::Deleting)]
    #[case(ClusterStatus::Error)]
    #[case(ClusterStatus::Unknown)]
    #[tokio::test]
    async fn unschedulable_status_cannot_join(#[case] status: ClusterStatus) {
        let (_home, manager) = manager(vec![cluster(1, "a", status)]);
        let err = manager
            .create_group(OrgId(1), "g", &[ClusterId(1)])
            .await
            .unwrap_err();
        match err {
            ClusterGroupError::UnableToJoin { status: got, .. } => assert_eq!(got, status),
            other => panic!("expected UnableToJoin, got {other}"),
        }
    }

    #[tokio::test]
    async fn create_rejects_blank_name_and_empty_members() {
        let (_home, manager) = manager(vec![cluster(1, "a", ClusterStatus::Running)]);
        assert!(matches!(
            manager.create_group(OrgId(1), "  ", &[ClusterId(1)]).await,
            Err(ClusterGroupError::EmptyName)
        ));
        assert!(matches!(
            manager.create_group(OrgId(1), "g", &[]).await,
            Err(ClusterGroupError::NoMembers)
        ));
    }

    #[tokio::test]
    async fn create_seeds_deployment_feature() {
        let (_home, manager) = manager(vec![cluster(1, "a", ClusterStatus::Running)]);
        let group = manager
            .create_group(OrgId(1), "g", &[ClusterId(1)])
            .await
            .expect("create");
        assert!(group.enabled_features.contains(DEPLOYMENT_FEATURE));
        assert_eq!(group.members[0].name, "a");
        assert_eq!(group.members[0].status, None);
    }

    #[tokio::test]
    async fn other_org_cannot_see_group() {
        let (_home, manager) = manager(vec![cluster(1, "a", ClusterStatus::Running)]);
        let group = manager
            .create_group(OrgId(1), "g", &[ClusterId(1)])
            .await
            .expect("create");
        let err = manager.get_group(OrgId(2), group.id).await.unwrap_err();
        assert!(matches!(err, ClusterGroupError::NotFound { .. }));
    }

    #[tokio::test]
    async fn existing_member_in_error_state_does_not_block_update() {
        let (home, manager) = manager(vec![
            cluster(1, "a", ClusterStatus::Running),
            cluster(2, "b", ClusterStatus::Running),
        ]);
        let group = manager
            .create_group(OrgId(1), "g", &[ClusterId(1)])
            .await
            .expect("create");

        // Cluster 1 degrades after joining.
        let store = Arc::new(GroupStore::at(home.path()));
        let registry: Arc<dyn ClusterRegistry> = Arc::new(InventoryRegistry::from_inventory(Inventory {
            organizations: Default::default(),
            clusters: vec![
                cluster(1, "a", ClusterStatus::Error),
                cluster(2, "b", ClusterStatus::Running),
            ],
        }));
        let features = Arc::new(FeatureManager::new(store.clone(), registry.clone()));
        let degraded = ClusterGroupManager::new(store, registry, features, vec![ClusterStatus::Running]);

        let updated = degraded
            .update_group(OrgId(1), group.id, None, &[ClusterId(1), ClusterId(2)])
            .await
            .expect("update");
        assert_eq!(updated.member_ids(), vec![ClusterId(1), ClusterId(2)]);
    }
}
