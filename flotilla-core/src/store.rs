//! YAML-backed cluster group repository.
//!
//! # Storage layout
//!
//! ```text
//! ~/.flotilla/groups/
//!   <group_id>.yaml   (group row, membership rows and feature rows, mode 0600)
//!   last_id           (highest id ever allocated; ids are never reused)
//! ```
//!
//! Every mutation is read-modify-write against the file under the store's write
//! lock, so mutations issued through one `GroupStore` are serialised. Nothing is
//! cached between calls.
//!
//! # API pattern
//!
//! - `GroupStore::at(home)`: explicit home; used in tests with `TempDir`
//! - `GroupStore::open()`: derives home from `FLOTILLA_HOME` / `dirs::home_dir()`

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use uuid::Uuid;

use crate::error::{io_err, StoreError};
use crate::paths;
use crate::types::{
    ClusterId, FeatureRecord, GroupId, GroupRecord, MembershipDiff, OrgId, ReconcileState,
};

/// Persistence for group, membership and feature rows.
#[derive(Debug)]
pub struct GroupStore {
    home: PathBuf,
    write_lock: Mutex<()>,
}

impl GroupStore {
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `GroupStore::at` convenience wrapper.
    pub fn open() -> Result<Self, StoreError> {
        Ok(Self::at(paths::resolve_home()?))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    // -----------------------------------------------------------------------
    // 1. Reads
    // -----------------------------------------------------------------------

    /// Load one group. Returns `StoreError::GroupNotFound` if absent.
    pub fn load_group(&self, id: GroupId) -> Result<GroupRecord, StoreError> {
        let path = paths::group_path(&self.home, id);
        if !path.exists() {
            return Err(StoreError::GroupNotFound { group_id: id });
        }
        read_group(&path)
    }

    /// Every stored group, sorted by id.
    pub fn list_groups(&self) -> Result<Vec<GroupRecord>, StoreError> {
        let dir = paths::groups_dir(&self.home);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut groups = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("yaml") {
                continue;
            }
            groups.push(read_group(&path)?);
        }
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    pub fn list_groups_in_org(&self, org_id: OrgId) -> Result<Vec<GroupRecord>, StoreError> {
        let mut groups = self.list_groups()?;
        groups.retain(|g| g.org_id == org_id);
        Ok(groups)
    }

    pub fn find_group_by_name(
        &self,
        org_id: OrgId,
        name: &str,
    ) -> Result<Option<GroupRecord>, StoreError> {
        Ok(self
            .list_groups()?
            .into_iter()
            .find(|g| g.org_id == org_id && g.name == name))
    }

    /// The group that currently contains `cluster`, if any.
    pub fn find_group_of_cluster(
        &self,
        cluster: ClusterId,
    ) -> Result<Option<GroupRecord>, StoreError> {
        Ok(self
            .list_groups()?
            .into_iter()
            .find(|g| g.members.contains(&cluster)))
    }

    pub fn find_feature(
        &self,
        group: GroupId,
        name: &str,
    ) -> Result<Option<FeatureRecord>, StoreError> {
        Ok(self.load_group(group)?.features.get(name).cloned())
    }

    /// Load one feature row. Returns `StoreError::FeatureNotFound` if absent.
    pub fn load_feature(&self, group: GroupId, name: &str) -> Result<FeatureRecord, StoreError> {
        self.find_feature(group, name)?
            .ok_or_else(|| StoreError::FeatureNotFound {
                group_id: group,
                feature: name.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // 2. Group mutations
    // -----------------------------------------------------------------------

    /// Insert a new group with `members` and the given seed feature rows.
    ///
    /// Name uniqueness (per org) and member exclusivity are re-checked under the
    /// write lock.
    pub fn create_group(
        &self,
        org_id: OrgId,
        name: &str,
        members: &[ClusterId],
        features: impl IntoIterator<Item = FeatureRecord>,
    ) -> Result<GroupRecord, StoreError> {
        let _guard = self.lock();
        let existing = self.list_groups()?;

        if existing.iter().any(|g| g.org_id == org_id && g.name == name) {
            return Err(StoreError::GroupNameTaken {
                org_id,
                name: name.to_string(),
            });
        }
        ensure_ungrouped(&existing, members, None)?;

        let id = self.next_group_id(&existing)?;
        let now = Utc::now();
        let record = GroupRecord {
            id,
            uid: Uuid::new_v4(),
            org_id,
            name: name.to_string(),
            members: dedup_members(members),
            features: features
                .into_iter()
                .map(|f| (f.name.clone(), f))
                .collect(),
            created_at: now,
            updated_at: now,
        };
        self.save_group(&record)?;
        self.save_last_id(id)?;
        tracing::debug!(group = %id, org = %org_id, name, "created cluster group");
        Ok(record)
    }

    /// Replace the member set (and optionally the name) of a group.
    ///
    /// Returns the added/removed membership rows.
    pub fn update_members(
        &self,
        id: GroupId,
        new_name: Option<&str>,
        members: &[ClusterId],
    ) -> Result<MembershipDiff, StoreError> {
        let _guard = self.lock();
        let existing = self.list_groups()?;
        let mut record = existing
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or(StoreError::GroupNotFound { group_id: id })?;

        if let Some(name) = new_name {
            if existing
                .iter()
                .any(|g| g.id != id && g.org_id == record.org_id && g.name == name)
            {
                return Err(StoreError::GroupNameTaken {
                    org_id: record.org_id,
                    name: name.to_string(),
                });
            }
            record.name = name.to_string();
        }
        ensure_ungrouped(&existing, members, Some(id))?;

        let members = dedup_members(members);
        let before: BTreeSet<ClusterId> = record.members.iter().copied().collect();
        let after: BTreeSet<ClusterId> = members.iter().copied().collect();
        let diff = MembershipDiff {
            added: after.difference(&before).copied().collect(),
            removed: before.difference(&after).copied().collect(),
        };

        record.members = members;
        record.updated_at = Utc::now();
        self.save_group(&record)?;
        tracing::debug!(
            group = %id,
            added = diff.added.len(),
            removed = diff.removed.len(),
            "updated cluster group members",
        );
        Ok(diff)
    }

    /// Delete the group document, including its membership and feature rows,
    /// and whatever deployment records are still filed under its id.
    pub fn delete_group(&self, id: GroupId) -> Result<(), StoreError> {
        let _guard = self.lock();
        let path = paths::group_path(&self.home, id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::GroupNotFound { group_id: id })
            }
            Err(err) => return Err(io_err(&path, err)),
        }

        let deployments = paths::group_deployments_dir(&self.home, id);
        match std::fs::remove_dir_all(&deployments) {
            Ok(()) => {
                tracing::debug!(group = %id, "removed leftover deployment records");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&deployments, err)),
        }
    }

    // -----------------------------------------------------------------------
    // 3. Feature rows
    // -----------------------------------------------------------------------

    /// Insert or replace a feature row.
    pub fn save_feature(&self, group: GroupId, feature: &FeatureRecord) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut record = self.load_group(group)?;
        let mut feature = feature.clone();
        feature.updated_at = Utc::now();
        record.features.insert(feature.name.clone(), feature);
        self.save_group(&record)
    }

    pub fn delete_feature(&self, group: GroupId, name: &str) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut record = self.load_group(group)?;
        if record.features.remove(name).is_none() {
            return Err(StoreError::FeatureNotFound {
                group_id: group,
                feature: name.to_string(),
            });
        }
        self.save_group(&record)
    }

    /// Compare-and-set a feature row into `IN_PROGRESS`.
    ///
    /// Fails with `StoreError::ReconcileInProgress` when the persisted state is
    /// already `IN_PROGRESS`; the check and the write happen under one lock.
    pub fn begin_reconcile(&self, group: GroupId, name: &str) -> Result<FeatureRecord, StoreError> {
        let _guard = self.lock();
        let mut record = self.load_group(group)?;
        let feature = record
            .features
            .get_mut(name)
            .ok_or_else(|| StoreError::FeatureNotFound {
                group_id: group,
                feature: name.to_string(),
            })?;
        if feature.reconcile_state == ReconcileState::InProgress {
            return Err(StoreError::ReconcileInProgress {
                group_id: group,
                feature: name.to_string(),
            });
        }
        feature.reconcile_state = ReconcileState::InProgress;
        feature.updated_at = Utc::now();
        let snapshot = feature.clone();
        self.save_group(&record)?;
        Ok(snapshot)
    }

    /// Record the outcome of a reconcile started with [`Self::begin_reconcile`].
    ///
    /// `Ok` stores `SUCCESS` and clears the last error; `Err` stores `FAILED`
    /// together with the message.
    pub fn finish_reconcile(
        &self,
        group: GroupId,
        name: &str,
        outcome: Result<(), String>,
    ) -> Result<FeatureRecord, StoreError> {
        let _guard = self.lock();
        let mut record = self.load_group(group)?;
        let feature = record
            .features
            .get_mut(name)
            .ok_or_else(|| StoreError::FeatureNotFound {
                group_id: group,
                feature: name.to_string(),
            })?;
        match outcome {
            Ok(()) => {
                feature.reconcile_state = ReconcileState::Success;
                feature.last_reconcile_error = None;
            }
            Err(message) => {
                feature.reconcile_state = ReconcileState::Failed;
                feature.last_reconcile_error = Some(message);
            }
        }
        feature.updated_at = Utc::now();
        let snapshot = feature.clone();
        self.save_group(&record)?;
        Ok(snapshot)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// One past the larger of the persisted high-water mark and every stored id.
    fn next_group_id(&self, existing: &[GroupRecord]) -> Result<GroupId, StoreError> {
        let path = paths::group_sequence_path(&self.home);
        let last = match std::fs::read_to_string(&path) {
            Ok(contents) => contents
                .trim()
                .parse::<u32>()
                .map_err(|e| StoreError::Sequence {
                    path: path.clone(),
                    reason: e.to_string(),
                })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(io_err(&path, err)),
        };
        let stored = existing.iter().map(|g| g.id.0).max().unwrap_or(0);
        Ok(GroupId(last.max(stored) + 1))
    }

    fn save_last_id(&self, id: GroupId) -> Result<(), StoreError> {
        let path = paths::group_sequence_path(&self.home);
        let tmp = path.with_file_name("last_id.tmp");
        std::fs::write(&tmp, format!("{id}\n")).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomic save: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
    fn save_group(&self, record: &GroupRecord) -> Result<(), StoreError> {
        let dir = paths::groups_dir(&self.home);
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            set_dir_permissions(&dir)?;
        }
        let path = paths::group_path(&self.home, record.id);
        let tmp = path.with_file_name(format!("{}.yaml.tmp", record.id));

        let yaml = serde_yaml::to_string(record)?;
        std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }
}

fn read_group(path: &Path) -> Result<GroupRecord, StoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn ensure_ungrouped(
    groups: &[GroupRecord],
    members: &[ClusterId],
    except: Option<GroupId>,
) -> Result<(), StoreError> {
    for group in groups {
        if Some(group.id) == except {
            continue;
        }
        if let Some(cluster) = members.iter().find(|c| group.members.contains(c)) {
            return Err(StoreError::ClusterAlreadyGrouped {
                cluster_id: *cluster,
                group_id: group.id,
            });
        }
    }
    Ok(())
}

/// Keeps first-seen order while dropping repeats.
fn dedup_members(members: &[ClusterId]) -> Vec<ClusterId> {
    let mut seen = BTreeSet::new();
    members.iter().copied().filter(|c| seen.insert(*c)).collect()
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
