//! Deployment ledger: desired state per (group, release).
//!
//! One JSON document per deployment at
//! `<home>/.flotilla/deployments/<group_id>/<release>.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the group store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flotilla_core::{paths, ClusterId, GroupId};

use crate::chart::ResolvedChart;
use crate::error::{io_err, DeploymentError};

/// One deployment as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub group_id: GroupId,
    pub release_name: String,
    /// Organization whose chart repositories resolved the chart.
    pub org_name: String,
    pub namespace: String,
    pub chart: ResolvedChart,
    /// Base values applied on every target.
    #[serde(default)]
    pub values: Value,
    /// Per-cluster value overrides keyed by cluster name.
    #[serde(default)]
    pub overrides: BTreeMap<String, Value>,
    /// Clusters the release has been dispatched to and not yet removed from.
    #[serde(default)]
    pub targets: BTreeMap<ClusterId, TargetRow>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One (deployment, cluster) row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRow {
    /// Name at the time of the last dispatch; kept for ex-member reporting.
    pub cluster_name: String,
    pub dispatched_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Record `cluster` as a target, refreshing its name and dispatch time.
    pub fn add_target(&mut self, cluster: ClusterId, cluster_name: &str) {
        self.targets.insert(
            cluster,
            TargetRow {
                cluster_name: cluster_name.to_string(),
                dispatched_at: Utc::now(),
            },
        );
    }
}

/// Persistence for deployment records.
#[derive(Debug)]
pub struct DeploymentLedger {
    home: PathBuf,
    write_lock: Mutex<()>,
}

impl DeploymentLedger {
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn record_path(&self, group: GroupId, release: &str) -> PathBuf {
        paths::group_deployments_dir(&self.home, group).join(format!("{release}.json"))
    }

    pub fn find(
        &self,
        group: GroupId,
        release: &str,
    ) -> Result<Option<DeploymentRecord>, DeploymentError> {
        let path = self.record_path(group, release);
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    /// Load one record. Returns `DeploymentError::NotFound` if absent.
    pub fn load(&self, group: GroupId, release: &str) -> Result<DeploymentRecord, DeploymentError> {
        self.find(group, release)?
            .ok_or_else(|| DeploymentError::NotFound {
                group_id: group,
                release: release.to_string(),
            })
    }

    /// Every deployment of `group`, sorted by release name.
    pub fn list(&self, group: GroupId) -> Result<Vec<DeploymentRecord>, DeploymentError> {
        let dir = paths::group_deployments_dir(&self.home, group);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let path = entry.path();
            // Orphan .json.tmp files from an interrupted write have extension "tmp".
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            records.push(read_record(&path)?);
        }
        records.sort_by(|a, b| a.release_name.cmp(&b.release_name));
        Ok(records)
    }

    /// Atomic save: serialize → `.json.tmp` sibling → `chmod 0600` → `rename`.
    pub fn save(&self, record: &DeploymentRecord) -> Result<(), DeploymentError> {
        let _guard = self.lock();
        let dir = paths::group_deployments_dir(&self.home, record.group_id);
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            set_dir_permissions(&dir)?;
        }
        let path = self.record_path(record.group_id, &record.release_name);
        let tmp = path.with_extension("json.tmp");

        let mut record = record.clone();
        record.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    pub fn delete(&self, group: GroupId, release: &str) -> Result<(), DeploymentError> {
        let _guard = self.lock();
        let path = self.record_path(group, release);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(DeploymentError::NotFound {
                    group_id: group,
                    release: release.to_string(),
                })
            }
            Err(err) => Err(io_err(&path, err)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_record(path: &Path) -> Result<DeploymentRecord, DeploymentError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents).map_err(|e| DeploymentError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), DeploymentError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), DeploymentError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), DeploymentError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), DeploymentError> {
    Ok(())
}

#[cfg(test)]
pub(crate) fn sample_record(group: GroupId, release: &str) -> DeploymentRecord {
    let now = Utc::now();
    DeploymentRecord {
        group_id: group,
        release_name: release.to_string(),
        org_name: "acme".into(),
        namespace: "default".into(),
        chart: ResolvedChart {
            reference: "stable/nginx".into(),
            name: "nginx".into(),
            version: "1.0.0".into(),
            package: None,
        },
        values: serde_json::json!({ "replicas": 1 }),
        overrides: BTreeMap::new(),
        targets: BTreeMap::new(),
        created_at: now,
        updated_at: now,
    }
}
