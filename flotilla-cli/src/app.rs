//! Wiring shared by every command: home directory, config, registry, store,
//! ledger and the managers built on top of them.

use std::sync::Arc;

use anyhow::{Context, Result};

use flotilla_core::{
    config, paths, ClusterGroup, ClusterId, ClusterRegistry, GroupId, GroupStore,
    InventoryRegistry, OrgId,
};
use flotilla_deploy::{DeploymentFeature, DeploymentLedger, DeploymentManager, FanoutLimits, HelmCli};
use flotilla_group::{ClusterGroupManager, FeatureManager};

pub struct App {
    pub org: OrgId,
    pub org_name: String,
    pub json: bool,
    pub registry: Arc<InventoryRegistry>,
    pub store: Arc<GroupStore>,
    pub deployments: Arc<DeploymentManager>,
    pub groups: ClusterGroupManager,
}

impl App {
    pub fn open(org: OrgId, json: bool) -> Result<Self> {
        let home = paths::resolve_home().context("could not determine home directory")?;
        let config = config::load_at(&home).context("failed to load configuration")?;
        tracing::debug!(home = %home.display(), org = %org, "flotilla home resolved");

        let registry = Arc::new(InventoryRegistry::at(&home));
        let org_name = registry
            .org_name(org)
            .context("failed to read the cluster inventory")?;
        let clusters: Arc<dyn ClusterRegistry> = registry.clone();

        let store = Arc::new(GroupStore::at(&home));
        let ledger = Arc::new(DeploymentLedger::at(&home));
        let installer = Arc::new(HelmCli::new(config.helm.binary.clone(), &home));
        let deployments = Arc::new(
            DeploymentManager::new(ledger, clusters.clone(), installer)
                .with_limits(FanoutLimits::from(&config.fanout))
                .with_default_namespace(config.default_namespace.clone()),
        );

        let features = Arc::new(
            FeatureManager::new(store.clone(), clusters.clone())
                .with_handler(Arc::new(DeploymentFeature::new(deployments.clone()))),
        );
        let groups = ClusterGroupManager::new(
            store.clone(),
            clusters,
            features,
            config.schedulable_statuses,
        );

        Ok(Self {
            org,
            org_name,
            json,
            registry,
            store,
            deployments,
            groups,
        })
    }

    /// A group given by numeric id or by name within the organization.
    pub fn group_id(&self, group: &str) -> Result<GroupId> {
        if let Ok(id) = group.parse::<u32>() {
            return Ok(GroupId(id));
        }
        self.store
            .find_group_by_name(self.org, group)
            .context("failed to read cluster groups")?
            .map(|record| record.id)
            .with_context(|| format!("cluster group '{group}' not found in organization {}", self.org))
    }

    pub async fn group(&self, group: &str) -> Result<ClusterGroup> {
        let id = self.group_id(group)?;
        self.groups
            .get_group(self.org, id)
            .await
            .with_context(|| format!("failed to load cluster group '{group}'"))
    }

    /// A cluster given by numeric id or by name within the organization.
    pub async fn cluster_id(&self, cluster: &str) -> Result<ClusterId> {
        if let Ok(id) = cluster.parse::<u32>() {
            return Ok(ClusterId(id));
        }
        let handle = self
            .registry
            .get_cluster_by_name(self.org, cluster)
            .await
            .with_context(|| format!("cluster '{cluster}' not found"))?;
        Ok(handle.id())
    }

    pub async fn cluster_ids(&self, clusters: &[String]) -> Result<Vec<ClusterId>> {
        let mut ids = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            ids.push(self.cluster_id(cluster).await?);
        }
        Ok(ids)
    }
}
