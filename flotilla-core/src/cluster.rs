//! Cluster registry contract and a file-backed inventory implementation.
//!
//! The registry resolves an organization + cluster identifier to a live
//! [`ClusterHandle`]. Flotilla never provisions clusters; it only reads them.
//!
//! # Inventory format (`~/.flotilla/clusters.yaml`)
//!
//! ```yaml
//! organizations:
//!   1: acme
//! clusters:
//!   - id: 10
//!     org_id: 1
//!     name: eu-west
//!     cloud: amazon
//!     distribution: eks
//!     status: RUNNING
//!     kubeconfig_path: kube/eu-west.yaml   # relative to ~/.flotilla/
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClusterRegistryError;
use crate::paths;
use crate::types::{ClusterId, ClusterStatus, OrgId};

/// A live handle on one cluster.
#[async_trait]
pub trait ClusterHandle: Send + Sync + fmt::Debug {
    fn id(&self) -> ClusterId;
    fn org_id(&self) -> OrgId;
    fn name(&self) -> &str;
    fn cloud(&self) -> &str;
    fn distribution(&self) -> &str;

    async fn status(&self) -> Result<ClusterStatus, ClusterRegistryError>;
    async fn is_ready(&self) -> Result<bool, ClusterRegistryError>;

    /// Raw kubeconfig used to reach the cluster's API server.
    async fn kubeconfig(&self) -> Result<Vec<u8>, ClusterRegistryError>;
}

/// Resolves cluster identifiers to handles.
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    async fn get_cluster_by_id(
        &self,
        org_id: OrgId,
        cluster_id: ClusterId,
    ) -> Result<Arc<dyn ClusterHandle>, ClusterRegistryError>;

    async fn get_cluster_by_id_only(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Arc<dyn ClusterHandle>, ClusterRegistryError>;

    async fn get_cluster_by_name(
        &self,
        org_id: OrgId,
        name: &str,
    ) -> Result<Arc<dyn ClusterHandle>, ClusterRegistryError>;
}

// ---------------------------------------------------------------------------
// Inventory documents
// ---------------------------------------------------------------------------

/// One cluster entry of the inventory file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCluster {
    pub id: ClusterId,
    pub org_id: OrgId,
    pub name: String,
    #[serde(default)]
    pub cloud: String,
    #[serde(default)]
    pub distribution: String,
    #[serde(default)]
    pub status: ClusterStatus,
    #[serde(default = "default_ready")]
    pub ready: bool,
    /// Path to a kubeconfig file; relative paths resolve against `~/.flotilla/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_path: Option<PathBuf>,
    /// Inline kubeconfig, used when `kubeconfig_path` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
}

fn default_ready() -> bool {
    true
}

/// Root of `clusters.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub organizations: BTreeMap<OrgId, String>,
    #[serde(default)]
    pub clusters: Vec<InventoryCluster>,
}

impl Inventory {
    /// Load the inventory at `path`; a missing file is an empty inventory.
    pub fn load(path: &Path) -> Result<Self, ClusterRegistryError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ClusterRegistryError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&contents).map_err(|e| ClusterRegistryError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

// ---------------------------------------------------------------------------
// InventoryRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Source {
    /// Re-read on every lookup.
    File { path: PathBuf, base_dir: PathBuf },
    Fixed(Inventory),
}

/// [`ClusterRegistry`] backed by `clusters.yaml` (or a fixed in-memory inventory).
#[derive(Debug)]
pub struct InventoryRegistry {
    source: Source,
}

impl InventoryRegistry {
    /// Registry over `<home>/.flotilla/clusters.yaml`.
    pub fn at(home: &Path) -> Self {
        Self {
            source: Source::File {
                path: paths::inventory_path(home),
                base_dir: paths::flotilla_root(home),
            },
        }
    }

    /// Registry over a fixed inventory; relative kubeconfig paths resolve
    /// against the current directory.
    pub fn from_inventory(inventory: Inventory) -> Self {
        Self {
            source: Source::Fixed(inventory),
        }
    }

    pub fn inventory(&self) -> Result<Inventory, ClusterRegistryError> {
        match &self.source {
            Source::File { path, .. } => Inventory::load(path),
            Source::Fixed(inventory) => Ok(inventory.clone()),
        }
    }

    /// Display name of an organization, falling back to its id.
    pub fn org_name(&self, org_id: OrgId) -> Result<String, ClusterRegistryError> {
        Ok(self
            .inventory()?
            .organizations
            .get(&org_id)
            .cloned()
            .unwrap_or_else(|| org_id.to_string()))
    }

    fn base_dir(&self) -> PathBuf {
        match &self.source {
            Source::File { base_dir, .. } => base_dir.clone(),
            Source::Fixed(_) => PathBuf::new(),
        }
    }

    fn find(
        &self,
        org_id: Option<OrgId>,
        label: String,
        predicate: impl Fn(&InventoryCluster) -> bool,
    ) -> Result<Arc<dyn ClusterHandle>, ClusterRegistryError> {
        let entry = self
            .inventory()?
            .clusters
            .into_iter()
            .find(|c| predicate(c) && org_id.map_or(true, |org| c.org_id == org))
            .ok_or(ClusterRegistryError::NotFound {
                org_id,
                cluster: label,
            })?;
        Ok(Arc::new(InventoryClusterHandle {
            entry,
            base_dir: self.base_dir(),
        }))
    }
}

#[async_trait]
impl ClusterRegistry for InventoryRegistry {
    async fn get_cluster_by_id(
        &self,
        org_id: OrgId,
        cluster_id: ClusterId,
    ) -> Result<Arc<dyn ClusterHandle>, ClusterRegistryError> {
        self.find(Some(org_id), cluster_id.to_string(), |c| c.id == cluster_id)
    }

    async fn get_cluster_by_id_only(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Arc<dyn ClusterHandle>, ClusterRegistryError> {
        self.find(None, cluster_id.to_string(), |c| c.id == cluster_id)
    }

    async fn get_cluster_by_name(
        &self,
        org_id: OrgId,
        name: &str,
    ) -> Result<Arc<dyn ClusterHandle>, ClusterRegistryError> {
        self.find(Some(org_id), name.to_string(), |c| c.name == name)
    }
}

/// Handle over one inventory entry.
#[derive(Debug, Clone)]
pub struct InventoryClusterHandle {
    entry: InventoryCluster,
    base_dir: PathBuf,
}

#[async_trait]
impl ClusterHandle for InventoryClusterHandle {
    fn id(&self) -> ClusterId {
        self.entry.id
    }

    fn org_id(&self) -> OrgId {
        self.entry.org_id
    }

    fn name(&self) -> &str {
        &self.entry.name
    }

    fn cloud(&self) -> &str {
        &self.entry.cloud
    }

    fn distribution(&self) -> &str {
        &self.entry.distribution
    }

    async fn status(&self) -> Result<ClusterStatus, ClusterRegistryError> {
        Ok(self.entry.status)
    }

    async fn is_ready(&self) -> Result<bool, ClusterRegistryError> {
        Ok(self.entry.ready)
    }

    async fn kubeconfig(&self) -> Result<Vec<u8>, ClusterRegistryError> {
        if let Some(path) = &self.entry.kubeconfig_path {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                self.base_dir.join(path)
            };
            return std::fs::read(&path).map_err(|e| ClusterRegistryError::Io { path, source: e });
        }
        match &self.entry.kubeconfig {
            Some(inline) => Ok(inline.as_bytes().to_vec()),
            None => Err(ClusterRegistryError::MissingKubeconfig {
                cluster: self.entry.name.clone(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: u32, org: u32, name: &str) -> InventoryCluster {
        InventoryCluster {
            id: ClusterId(id),
            org_id: OrgId(org),
            name: name.to_string(),
            cloud: "amazon".into(),
            distribution: "eks".into(),
            status: ClusterStatus::Running,
            ready: true,
            kubeconfig_path: None,
            kubeconfig: Some(format!("cluster: {name}")),
        }
    }

    fn registry() -> InventoryRegistry {
        InventoryRegistry::from_inventory(Inventory {
            organizations: [(OrgId(1), "acme".to_string())].into_iter().collect(),
            clusters: vec![entry(1, 1, "a"), entry(2, 2, "b")],
        })
    }

    #[tokio::test]
    async fn lookup_is_scoped_by_org() {
        let reg = registry();
        let a = reg.get_cluster_by_id(OrgId(1), ClusterId(1)).await.expect("a");
        assert_eq!(a.name(), "a");

        let err = reg.get_cluster_by_id(OrgId(1), ClusterId(2)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("organization 1"), "got: {err}");

        let b = reg.get_cluster_by_id_only(ClusterId(2)).await.expect("b");
        assert_eq!(b.org_id(), OrgId(2));
    }

    #[tokio::test]
    async fn lookup_by_name_and_inline_kubeconfig() {
        let reg = registry();
        let a = reg.get_cluster_by_name(OrgId(1), "a").await.expect("a");
        assert_eq!(a.kubeconfig().await.expect("kubeconfig"), b"cluster: a".to_vec());
        assert_eq!(a.status().await.expect("status"), ClusterStatus::Running);
    }

    #[test]
    fn org_name_falls_back_to_id() {
        let reg = registry();
        assert_eq!(reg.org_name(OrgId(1)).expect("name"), "acme");
        assert_eq!(reg.org_name(OrgId(7)).expect("name"), "7");
    }

    #[tokio::test]
    async fn file_backed_inventory_resolves_relative_kubeconfig() {
        let home = TempDir::new().expect("home");
        let root = paths::flotilla_root(home.path());
        std::fs::create_dir_all(root.join("kube")).expect("mkdir");
        std::fs::write(root.join("kube/a.yaml"), "apiVersion: v1\n").expect("write kubeconfig");
        std::fs::write(
            paths::inventory_path(home.path()),
            "clusters:\n  - id: 1\n    org_id: 1\n    name: a\n    status: RUNNING\n    kubeconfig_path: kube/a.yaml\n",
        )
        .expect("write inventory");

        let reg = InventoryRegistry::at(home.path());
        let a = reg.get_cluster_by_id(OrgId(1), ClusterId(1)).await.expect("a");
        assert_eq!(a.kubeconfig().await.expect("kubeconfig"), b"apiVersion: v1\n".to_vec());
        assert!(a.is_ready().await.expect("ready"));
    }

    #[test]
    fn missing_inventory_is_empty() {
        let home = TempDir::new().expect("home");
        let reg = InventoryRegistry::at(home.path());
        assert!(reg.inventory().expect("inventory").clusters.is_empty());
    }
}
