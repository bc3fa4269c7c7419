//! Domain types shared by the group engine and the deployment feature.
//!
//! Persisted rows (`GroupRecord`, `FeatureRecord`) are what the store writes;
//! resolved views (`ClusterGroup`, `Member`, `Feature`) are rebuilt on every read
//! from those rows plus the cluster registry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Name of the built-in multi-cluster deployment feature. Seeded as enabled on
/// every new cluster group.
pub const DEPLOYMENT_FEATURE: &str = "deployment";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Organization identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub u32);

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for OrgId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Cluster identifier, as assigned by the cluster registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for ClusterId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Cluster group identifier, allocated by the group store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for GroupId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status reported by the cluster registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    Creating,
    Running,
    Warning,
    Updating,
    Deleting,
    Error,
    #[default]
    Unknown,
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterStatus::Creating => "CREATING",
            ClusterStatus::Running => "RUNNING",
            ClusterStatus::Warning => "WARNING",
            ClusterStatus::Updating => "UPDATING",
            ClusterStatus::Deleting => "DELETING",
            ClusterStatus::Error => "ERROR",
            ClusterStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Reconcile state of a feature row.
///
/// Legal transitions: `{None, Success, Failed} -> InProgress -> {Success, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileState {
    #[default]
    None,
    InProgress,
    Success,
    Failed,
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileState::None => "NONE",
            ReconcileState::InProgress => "IN_PROGRESS",
            ReconcileState::Success => "SUCCESS",
            ReconcileState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Persisted rows
// ---------------------------------------------------------------------------

/// One feature row, keyed by (group, name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub reconcile_state: ReconcileState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl FeatureRecord {
    /// A fresh, disabled row with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            properties: Value::Null,
            reconcile_state: ReconcileState::None,
            last_reconcile_error: None,
            updated_at: Utc::now(),
        }
    }

    /// A fresh row that starts out enabled.
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            enabled: true,
            ..Self::new(name)
        }
    }
}

/// A cluster group as stored on disk: membership rows and feature rows are
/// embedded in the group document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub uid: Uuid,
    pub org_id: OrgId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<ClusterId>,
    #[serde(default)]
    pub features: BTreeMap<String, FeatureRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GroupRecord {
    pub fn enabled_features(&self) -> BTreeSet<String> {
        self.features
            .values()
            .filter(|f| f.enabled)
            .map(|f| f.name.clone())
            .collect()
    }
}

/// Outcome of persisting a new member set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: Vec<ClusterId>,
    pub removed: Vec<ClusterId>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Resolved views
// ---------------------------------------------------------------------------

/// A member cluster with display attributes resolved through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: ClusterId,
    pub name: String,
    pub cloud: String,
    pub distribution: String,
    /// Only populated by "with status" reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ClusterStatus>,
}

/// A cluster group with resolved members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterGroup {
    pub id: GroupId,
    pub uid: Uuid,
    pub org_id: OrgId,
    pub name: String,
    pub members: Vec<Member>,
    pub enabled_features: BTreeSet<String>,
}

impl ClusterGroup {
    pub fn member_ids(&self) -> Vec<ClusterId> {
        self.members.iter().map(|m| m.id).collect()
    }

    pub fn is_member(&self, cluster: ClusterId) -> bool {
        self.members.iter().any(|m| m.id == cluster)
    }

    pub fn member(&self, cluster: ClusterId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == cluster)
    }
}

/// The view of a feature handed to feature handlers: the row plus its group.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub group: ClusterGroup,
    pub name: String,
    pub enabled: bool,
    pub properties: Value,
    pub reconcile_state: ReconcileState,
    pub last_reconcile_error: Option<String>,
}

impl Feature {
    pub fn from_record(group: ClusterGroup, record: FeatureRecord) -> Self {
        Self {
            group,
            name: record.name,
            enabled: record.enabled,
            properties: record.properties,
            reconcile_state: record.reconcile_state,
            last_reconcile_error: record.last_reconcile_error,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
