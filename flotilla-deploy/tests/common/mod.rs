//! Shared fixtures: an in-memory chart installer and a wired-up group +
//! deployment stack over a temporary home.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flotilla_core::{
    ClusterGroup, ClusterId, ClusterRegistry, ClusterStatus, GroupId, GroupStore, Inventory,
    InventoryCluster, InventoryRegistry, OrgId,
};
use flotilla_deploy::{
    ChartInstaller, ChartRef, DeploymentFeature, DeploymentLedger, DeploymentManager,
    DeploymentSpec, InstallerError, Release, ResolvedChart,
};
use flotilla_group::{ClusterGroupManager, FeatureManager};
use serde_json::Value;
use tempfile::TempDir;

pub const ORG: OrgId = OrgId(1);
pub const NS: &str = "default";

type ReleaseKey = (String, String, String);

/// Installer that keeps releases in memory, keyed by the kubeconfig text
/// (which the fixtures set to the cluster name).
#[derive(Default)]
pub struct FakeInstaller {
    releases: Mutex<HashMap<ReleaseKey, Release>>,
    unreachable: Mutex<BTreeSet<String>>,
    installs: AtomicUsize,
    install_orgs: Mutex<Vec<String>>,
}

impl FakeInstaller {
    fn key(cluster: &str, namespace: &str, release: &str) -> ReleaseKey {
        (cluster.to_string(), namespace.to_string(), release.to_string())
    }

    fn cluster(&self, kubeconfig: &[u8]) -> Result<String, InstallerError> {
        let cluster = String::from_utf8_lossy(kubeconfig).to_string();
        if self.unreachable.lock().expect("lock").contains(&cluster) {
            return Err(InstallerError::Unreachable(format!("cluster {cluster} is unreachable")));
        }
        Ok(cluster)
    }

    /// Install a release directly, bypassing the ledger.
    pub fn seed(&self, cluster: &str, release: &str, values: Value) {
        self.releases.lock().expect("lock").insert(
            Self::key(cluster, NS, release),
            Release {
                name: release.to_string(),
                namespace: NS.to_string(),
                chart_name: "nginx".to_string(),
                chart_version: "1.0.0".to_string(),
                phase: "deployed".to_string(),
                values,
            },
        );
    }

    pub fn release_on(&self, cluster: &str, release: &str) -> Option<Release> {
        self.releases
            .lock()
            .expect("lock")
            .get(&Self::key(cluster, NS, release))
            .cloned()
    }

    /// Change the installed values behind the manager's back.
    pub fn tamper(&self, cluster: &str, release: &str, values: Value) {
        if let Some(found) = self
            .releases
            .lock()
            .expect("lock")
            .get_mut(&Self::key(cluster, NS, release))
        {
            found.values = values;
        }
    }

    /// Uninstall a release behind the manager's back.
    pub fn remove(&self, cluster: &str, release: &str) {
        self.releases
            .lock()
            .expect("lock")
            .remove(&Self::key(cluster, NS, release));
    }

    pub fn set_unreachable(&self, cluster: &str, unreachable: bool) {
        let mut set = self.unreachable.lock().expect("lock");
        if unreachable {
            set.insert(cluster.to_string());
        } else {
            set.remove(cluster);
        }
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    /// Organization passed to every install so far, in call order.
    pub fn install_orgs(&self) -> Vec<String> {
        self.install_orgs.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ChartInstaller for FakeInstaller {
    async fn resolve_chart(
        &self,
        _org_name: &str,
        chart: &ChartRef,
    ) -> Result<ResolvedChart, InstallerError> {
        if chart.name == "missing" {
            return Err(InstallerError::ChartNotFound {
                chart: chart.name.clone(),
                reason: "no such chart".to_string(),
            });
        }
        Ok(ResolvedChart {
            reference: chart.name.clone(),
            name: chart.name.rsplit('/').next().unwrap_or_default().to_string(),
            version: chart.version.clone().unwrap_or_else(|| "1.0.0".to_string()),
            package: chart.package.clone(),
        })
    }

    async fn get_release(
        &self,
        kubeconfig: &[u8],
        namespace: &str,
        release: &str,
    ) -> Result<Option<Release>, InstallerError> {
        let cluster = self.cluster(kubeconfig)?;
        Ok(self
            .releases
            .lock()
            .expect("lock")
            .get(&Self::key(&cluster, namespace, release))
            .cloned())
    }

    async fn install_or_upgrade(
        &self,
        org_name: &str,
        kubeconfig: &[u8],
        namespace: &str,
        release: &str,
        chart: &ResolvedChart,
        values: &Value,
    ) -> Result<Release, InstallerError> {
        let cluster = self.cluster(kubeconfig)?;
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.install_orgs.lock().expect("lock").push(org_name.to_string());
        let installed = Release {
            name: release.to_string(),
            namespace: namespace.to_string(),
            chart_name: chart.name.clone(),
            chart_version: chart.version.clone(),
            phase: "deployed".to_string(),
            values: values.clone(),
        };
        self.releases
            .lock()
            .expect("lock")
            .insert(Self::key(&cluster, namespace, release), installed.clone());
        Ok(installed)
    }

    async fn delete_release(
        &self,
        kubeconfig: &[u8],
        namespace: &str,
        release: &str,
    ) -> Result<(), InstallerError> {
        let cluster = self.cluster(kubeconfig)?;
        self.releases
            .lock()
            .expect("lock")
            .remove(&Self::key(&cluster, namespace, release));
        Ok(())
    }
}

pub struct Harness {
    pub home: TempDir,
    pub store: Arc<GroupStore>,
    pub ledger: Arc<DeploymentLedger>,
    pub installer: Arc<FakeInstaller>,
    pub deployments: Arc<DeploymentManager>,
    pub groups: ClusterGroupManager,
}

fn inventory_cluster(id: u32, name: &str) -> InventoryCluster {
    InventoryCluster {
        id: ClusterId(id),
        org_id: ORG,
        name: name.to_string(),
        cloud: "google".to_string(),
        distribution: "gke".to_string(),
        status: ClusterStatus::Running,
        ready: true,
        kubeconfig_path: None,
        kubeconfig: Some(name.to_string()),
    }
}

/// Clusters `a` (1), `b` (2) and `c` (3) in organization 1.
pub fn harness() -> Harness {
    let home = TempDir::new().expect("home");
    let store = Arc::new(GroupStore::at(home.path()));
    let ledger = Arc::new(DeploymentLedger::at(home.path()));
    let registry: Arc<dyn ClusterRegistry> = Arc::new(InventoryRegistry::from_inventory(Inventory {
        organizations: [(ORG, "acme".to_string())].into_iter().collect(),
        clusters: vec![
            inventory_cluster(1, "a"),
            inventory_cluster(2, "b"),
            inventory_cluster(3, "c"),
        ],
    }));
    let installer = Arc::new(FakeInstaller::default());
    let deployments = Arc::new(DeploymentManager::new(
        ledger.clone(),
        registry.clone(),
        installer.clone(),
    ));
    let features = Arc::new(
        FeatureManager::new(store.clone(), registry.clone())
            .with_handler(Arc::new(DeploymentFeature::new(deployments.clone()))),
    );
    let groups = ClusterGroupManager::new(
        store.clone(),
        registry,
        features,
        vec![ClusterStatus::Running],
    );
    Harness {
        home,
        store,
        ledger,
        installer,
        deployments,
        groups,
    }
}

impl Harness {
    pub async fn create_group(&self, members: &[u32]) -> ClusterGroup {
        let ids: Vec<ClusterId> = members.iter().copied().map(ClusterId).collect();
        self.groups
            .create_group(ORG, "g", &ids)
            .await
            .expect("create group")
    }

    pub async fn group(&self, id: GroupId) -> ClusterGroup {
        self.groups.get_group(ORG, id).await.expect("get group")
    }
}

pub fn web_spec(values: Value) -> DeploymentSpec {
    DeploymentSpec {
        release_name: "web".to_string(),
        chart: ChartRef {
            name: "stable/nginx".to_string(),
            version: Some("1.0.0".to_string()),
            package: None,
        },
        values,
        ..Default::default()
    }
}
