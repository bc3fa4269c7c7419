//! Multi-cluster release orchestration for one cluster group.
//!
//! Every call that touches clusters scatters one unit of work per target and
//! gathers exactly that many [`TargetClusterStatus`] entries. A failure on one
//! cluster is recorded on its entry; it never fails the call.
//!
//! | operation  | targets                          | ledger effect                      |
//! |------------|----------------------------------|------------------------------------|
//! | create     | every member                     | new record, members as targets     |
//! | update     | every member                     | chart/values replaced or merged    |
//! | sync       | members, then ex-member targets  | ex-member rows dropped on success  |
//! | delete     | every recorded target            | rows dropped on success (or force) |

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flotilla_core::{ClusterGroup, ClusterId, ClusterRegistry, Member, OrgId, DEPLOYMENT_FEATURE};

use crate::chart::{ChartInstaller, ChartRef, Release};
use crate::error::DeploymentError;
use crate::fanout::{scatter_gather, FanoutLimits, Gathered, TimedOut};
use crate::ledger::{DeploymentLedger, DeploymentRecord};
use crate::staleness::{deep_merge, is_stale_deployment, values_digest, DesiredRelease};

const MAX_RELEASE_NAME: usize = 53;

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

/// Create or update request for one release.
#[derive(Debug, Clone, Default)]
pub struct DeploymentSpec {
    pub release_name: String,
    pub chart: ChartRef,
    /// Defaults to the manager's namespace on create; fixed after creation.
    pub namespace: Option<String>,
    pub values: Value,
    /// Value overrides keyed by member cluster name.
    pub overrides: BTreeMap<String, Value>,
    /// On update, deep-merge into the recorded values instead of replacing them.
    pub reuse_values: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    NotInstalled,
    Installed,
    Stale,
    Unknown,
    Succeeded,
    Failed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotInstalled => "NOT_INSTALLED",
            Self::Installed => "INSTALLED",
            Self::Stale => "STALE",
            Self::Unknown => "UNKNOWN",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Outcome or observed state of a release on one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetClusterStatus {
    pub cluster_id: ClusterId,
    pub cluster_name: String,
    pub cloud: String,
    pub distribution: String,
    pub status: DeploymentStatus,
    /// Installer phase when the release exists, e.g. `deployed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetClusterStatus {
    fn new(cluster_id: ClusterId, cluster_name: &str, status: DeploymentStatus) -> Self {
        Self {
            cluster_id,
            cluster_name: cluster_name.to_string(),
            cloud: String::new(),
            distribution: String::new(),
            status,
            phase: None,
            stale: false,
            version: None,
            values: None,
            error: None,
        }
    }

    fn for_member(member: &Member, status: DeploymentStatus) -> Self {
        Self {
            cloud: member.cloud.clone(),
            distribution: member.distribution.clone(),
            ..Self::new(member.id, &member.name, status)
        }
    }

    fn failed(mut self, error: impl fmt::Display) -> Self {
        self.status = DeploymentStatus::Failed;
        self.error = Some(error.to_string());
        self
    }

    fn with_release(mut self, release: &Release) -> Self {
        self.phase = Some(release.phase.clone());
        self.version = Some(release.chart_version.clone());
        self.values = Some(release.values.clone());
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == DeploymentStatus::Failed
    }
}

/// Ledger view of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub release_name: String,
    pub namespace: String,
    pub chart_name: String,
    pub chart_version: String,
    pub values_digest: String,
    pub targets: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&DeploymentRecord> for DeploymentSummary {
    fn from(record: &DeploymentRecord) -> Self {
        Self {
            release_name: record.release_name.clone(),
            namespace: record.namespace.clone(),
            chart_name: record.chart.name.clone(),
            chart_version: record.chart.version.clone(),
            values_digest: values_digest(&record.values),
            targets: record.targets.len(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// A deployment with live per-cluster state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentDetails {
    pub record: DeploymentRecord,
    /// Members first (completion order), then ex-member targets as `STALE`.
    pub targets: Vec<TargetClusterStatus>,
}

// ---------------------------------------------------------------------------
// DeploymentManager
// ---------------------------------------------------------------------------

pub struct DeploymentManager {
    ledger: Arc<DeploymentLedger>,
    clusters: Arc<dyn ClusterRegistry>,
    installer: Arc<dyn ChartInstaller>,
    limits: FanoutLimits,
    default_namespace: String,
}

impl DeploymentManager {
    pub fn new(
        ledger: Arc<DeploymentLedger>,
        clusters: Arc<dyn ClusterRegistry>,
        installer: Arc<dyn ChartInstaller>,
    ) -> Self {
        Self {
            ledger,
            clusters,
            installer,
            limits: FanoutLimits::default(),
            default_namespace: "default".to_string(),
        }
    }

    pub fn with_limits(mut self, limits: FanoutLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    pub fn limits(&self) -> FanoutLimits {
        self.limits
    }

    /// Ledger records of `group`, sorted by release name.
    pub fn records(&self, group: &ClusterGroup) -> Result<Vec<DeploymentRecord>, DeploymentError> {
        self.ledger.list(group.id)
    }

    pub fn list_deployments(
        &self,
        group: &ClusterGroup,
    ) -> Result<Vec<DeploymentSummary>, DeploymentError> {
        Ok(self.records(group)?.iter().map(DeploymentSummary::from).collect())
    }

    // -----------------------------------------------------------------------
    // 1. Create / update
    // -----------------------------------------------------------------------

    pub async fn create_deployment(
        &self,
        group: &ClusterGroup,
        org_name: &str,
        spec: DeploymentSpec,
    ) -> Result<Vec<TargetClusterStatus>, DeploymentError> {
        ensure_enabled(group)?;
        let release = validate_release_name(&spec.release_name)?;
        validate_overrides(group, &spec.overrides)?;
        let namespace = spec
            .namespace
            .clone()
            .unwrap_or_else(|| self.default_namespace.clone());

        if !self
            .is_release_name_available(group, &release, &namespace)
            .await?
        {
            return Err(DeploymentError::AlreadyExists {
                group_id: group.id,
                release,
            });
        }

        let chart = self.installer.resolve_chart(org_name, &spec.chart).await?;
        let now = Utc::now();
        let mut record = DeploymentRecord {
            group_id: group.id,
            release_name: release,
            org_name: org_name.to_string(),
            namespace,
            chart,
            values: spec.values,
            overrides: spec.overrides,
            targets: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        for member in &group.members {
            record.add_target(member.id, &member.name);
        }
        self.ledger.save(&record)?;
        tracing::info!(
            group = %group.id,
            release = %record.release_name,
            chart = %record.chart.name,
            version = %record.chart.version,
            "deployment created",
        );

        Ok(self.install_on_members(group, &record).await)
    }

    pub async fn update_deployment(
        &self,
        group: &ClusterGroup,
        org_name: &str,
        spec: DeploymentSpec,
    ) -> Result<Vec<TargetClusterStatus>, DeploymentError> {
        ensure_enabled(group)?;
        let release = validate_release_name(&spec.release_name)?;
        let mut record = self.ledger.load(group.id, &release)?;
        validate_overrides(group, &spec.overrides)?;

        if let Some(namespace) = spec.namespace.as_deref() {
            if namespace != record.namespace {
                tracing::warn!(
                    release = %release,
                    recorded = %record.namespace,
                    requested = namespace,
                    "namespace is fixed at creation; keeping the recorded one",
                );
            }
        }

        record.chart = self.installer.resolve_chart(org_name, &spec.chart).await?;
        record.org_name = org_name.to_string();
        if spec.reuse_values {
            if !spec.values.is_null() {
                deep_merge(&mut record.values, &spec.values);
            }
            for (cluster, overlay) in spec.overrides {
                deep_merge(record.overrides.entry(cluster).or_insert(Value::Null), &overlay);
            }
        } else {
            record.values = spec.values;
            record.overrides = spec.overrides;
        }
        for member in &group.members {
            record.add_target(member.id, &member.name);
        }
        self.ledger.save(&record)?;
        tracing::info!(group = %group.id, release = %release, reuse_values = spec.reuse_values, "deployment updated");

        Ok(self.install_on_members(group, &record).await)
    }

    /// `false` when the ledger already holds `release` or any member already
    /// runs a release of that name in `namespace`. Probe errors do not block.
    pub async fn is_release_name_available(
        &self,
        group: &ClusterGroup,
        release: &str,
        namespace: &str,
    ) -> Result<bool, DeploymentError> {
        if self.ledger.find(group.id, release)?.is_some() {
            return Ok(false);
        }
        let gathered = scatter_gather(group.members.clone(), self.limits, |member| {
            self.probe_release(group.org_id, member.id, namespace, release)
        })
        .await;

        let mut available = true;
        for Gathered { item, outcome } in gathered {
            match outcome {
                Ok(Ok(true)) => {
                    tracing::info!(release, cluster = %item.name, "release name already installed on member");
                    available = false;
                }
                Ok(Ok(false)) => {}
                Ok(Err(err)) => {
                    tracing::warn!(release, cluster = %item.name, error = %err, "release name probe failed")
                }
                Err(timeout) => {
                    tracing::warn!(release, cluster = %item.name, error = %timeout, "release name probe failed")
                }
            }
        }
        Ok(available)
    }

    // -----------------------------------------------------------------------
    // 2. Sync
    // -----------------------------------------------------------------------

    /// Converge `release` onto the current membership.
    ///
    /// Members that are missing the release or drifted from the desired state
    /// are re-installed; members already current are reported as-is. Then the
    /// release is removed from every recorded target that left the group.
    pub async fn sync_deployment(
        &self,
        group: &ClusterGroup,
        release: &str,
    ) -> Result<Vec<TargetClusterStatus>, DeploymentError> {
        ensure_enabled(group)?;
        let mut record = self.ledger.load(group.id, release)?;
        for member in &group.members {
            record.add_target(member.id, &member.name);
        }
        self.ledger.save(&record)?;

        let org = group.org_id;
        let gathered = scatter_gather(group.members.clone(), self.limits, |member| {
            self.sync_member(org, member, &record)
        })
        .await;
        let mut entries = settle(gathered, |member, timeout| {
            TargetClusterStatus::for_member(&member, DeploymentStatus::Failed).failed(timeout)
        });

        let record = self.ledger.load(group.id, release)?;
        let leavers: Vec<(ClusterId, String)> = record
            .targets
            .iter()
            .filter(|(id, _)| !group.is_member(**id))
            .map(|(id, row)| (*id, row.cluster_name.clone()))
            .collect();
        if !leavers.is_empty() {
            entries.extend(self.remove_targets(org, record, leavers, false, false).await?);
        }

        log_outcome(group, release, "sync", &entries);
        Ok(entries)
    }

    async fn sync_member(
        &self,
        org: OrgId,
        member: Member,
        record: &DeploymentRecord,
    ) -> TargetClusterStatus {
        let observed = self.status_on_member(org, &member, record).await;
        match observed.status {
            DeploymentStatus::Installed => observed,
            _ => self.install_on_member(org, member, record).await,
        }
    }

    // -----------------------------------------------------------------------
    // 3. Delete
    // -----------------------------------------------------------------------

    /// Remove `release` from every recorded target.
    ///
    /// A target row is dropped once its removal succeeds, or unconditionally
    /// with `force`. The deployment record goes once no target rows remain.
    pub async fn delete_deployment(
        &self,
        group: &ClusterGroup,
        release: &str,
        force: bool,
    ) -> Result<Vec<TargetClusterStatus>, DeploymentError> {
        let record = self.ledger.load(group.id, release)?;
        let targets: Vec<(ClusterId, String)> = record
            .targets
            .iter()
            .map(|(id, row)| (*id, row.cluster_name.clone()))
            .collect();

        let entries = if targets.is_empty() {
            self.ledger.delete(group.id, release)?;
            Vec::new()
        } else {
            self.remove_targets(group.org_id, record, targets, force, true)
                .await?
        };
        log_outcome(group, release, "delete", &entries);
        Ok(entries)
    }

    async fn remove_targets(
        &self,
        org: OrgId,
        mut record: DeploymentRecord,
        targets: Vec<(ClusterId, String)>,
        force: bool,
        drop_when_empty: bool,
    ) -> Result<Vec<TargetClusterStatus>, DeploymentError> {
        let gathered = scatter_gather(targets, self.limits, |(cluster_id, name)| {
            let record = &record;
            async move { self.delete_on_target(org, cluster_id, &name, record).await }
        })
        .await;
        let entries = settle(gathered, |(cluster_id, name), timeout| {
            TargetClusterStatus::new(cluster_id, &name, DeploymentStatus::Failed).failed(timeout)
        });

        for entry in &entries {
            if entry.status == DeploymentStatus::Succeeded || force {
                record.targets.remove(&entry.cluster_id);
            }
        }

        if drop_when_empty && record.targets.is_empty() {
            self.ledger.delete(record.group_id, &record.release_name)?;
            tracing::info!(group = %record.group_id, release = %record.release_name, "deployment record removed");
        } else {
            self.ledger.save(&record)?;
        }
        Ok(entries)
    }

    // -----------------------------------------------------------------------
    // 4. Read
    // -----------------------------------------------------------------------

    /// Live status of `release` on every member, followed by a `STALE` entry
    /// for every recorded target that is no longer a member.
    pub async fn get_deployment(
        &self,
        group: &ClusterGroup,
        release: &str,
    ) -> Result<DeploymentDetails, DeploymentError> {
        let record = self.ledger.load(group.id, release)?;
        let org = group.org_id;
        let gathered = scatter_gather(group.members.clone(), self.limits, |member| {
            let record = &record;
            async move { self.status_on_member(org, &member, record).await }
        })
        .await;
        let mut targets = settle(gathered, |member, timeout| {
            let mut entry = TargetClusterStatus::for_member(&member, DeploymentStatus::Unknown);
            entry.error = Some(timeout.to_string());
            entry
        });

        for (cluster_id, row) in &record.targets {
            if group.is_member(*cluster_id) {
                continue;
            }
            let mut entry = TargetClusterStatus::new(*cluster_id, &row.cluster_name, DeploymentStatus::Stale);
            entry.stale = true;
            if let Ok(handle) = self.clusters.get_cluster_by_id_only(*cluster_id).await {
                entry.cloud = handle.cloud().to_string();
                entry.distribution = handle.distribution().to_string();
            }
            targets.push(entry);
        }

        Ok(DeploymentDetails { record, targets })
    }

    // -----------------------------------------------------------------------
    // Per-cluster units of work
    // -----------------------------------------------------------------------

    async fn install_on_members(
        &self,
        group: &ClusterGroup,
        record: &DeploymentRecord,
    ) -> Vec<TargetClusterStatus> {
        let org = group.org_id;
        let gathered = scatter_gather(group.members.clone(), self.limits, |member| {
            self.install_on_member(org, member, record)
        })
        .await;
        let entries = settle(gathered, |member, timeout| {
            TargetClusterStatus::for_member(&member, DeploymentStatus::Failed).failed(timeout)
        });
        log_outcome(group, &record.release_name, "install", &entries);
        entries
    }

    async fn install_on_member(
        &self,
        org: OrgId,
        member: Member,
        record: &DeploymentRecord,
    ) -> TargetClusterStatus {
        let entry = TargetClusterStatus::for_member(&member, DeploymentStatus::Succeeded);
        let kubeconfig = match self.kubeconfig(org, member.id).await {
            Ok(kubeconfig) => kubeconfig,
            Err(err) => return entry.failed(err),
        };
        let desired = DesiredRelease::for_cluster(record, &member.name);
        match self
            .installer
            .install_or_upgrade(
                &record.org_name,
                &kubeconfig,
                &record.namespace,
                &record.release_name,
                &record.chart,
                &desired.values,
            )
            .await
        {
            Ok(release) => entry.with_release(&release),
            Err(err) => entry.failed(err),
        }
    }

    async fn status_on_member(
        &self,
        org: OrgId,
        member: &Member,
        record: &DeploymentRecord,
    ) -> TargetClusterStatus {
        let mut entry = TargetClusterStatus::for_member(member, DeploymentStatus::Unknown);
        let probe = match self.kubeconfig(org, member.id).await {
            Ok(kubeconfig) => self
                .installer
                .get_release(&kubeconfig, &record.namespace, &record.release_name)
                .await
                .map_err(DeploymentError::from),
            Err(err) => Err(err),
        };

        match probe {
            Err(err) => {
                entry.error = Some(err.to_string());
                entry
            }
            Ok(None) => {
                entry.status = DeploymentStatus::NotInstalled;
                entry.stale = true;
                entry
            }
            Ok(Some(release)) => {
                let desired = DesiredRelease::for_cluster(record, &member.name);
                entry.stale = is_stale_deployment(&desired, &release);
                entry.status = if entry.stale {
                    DeploymentStatus::Stale
                } else {
                    DeploymentStatus::Installed
                };
                entry.with_release(&release)
            }
        }
    }

    async fn delete_on_target(
        &self,
        org: OrgId,
        cluster_id: ClusterId,
        recorded_name: &str,
        record: &DeploymentRecord,
    ) -> TargetClusterStatus {
        let entry = TargetClusterStatus::new(cluster_id, recorded_name, DeploymentStatus::Succeeded);
        let handle = match self.clusters.get_cluster_by_id(org, cluster_id).await {
            Ok(handle) => handle,
            Err(err) if err.is_not_found() => {
                // The cluster itself is gone; nothing is left to uninstall.
                tracing::info!(cluster = %cluster_id, release = %record.release_name, "target cluster no longer registered");
                return entry;
            }
            Err(err) => return entry.failed(err),
        };
        let entry = TargetClusterStatus {
            cloud: handle.cloud().to_string(),
            distribution: handle.distribution().to_string(),
            ..entry
        };

        let kubeconfig = match handle.kubeconfig().await {
            Ok(kubeconfig) => kubeconfig,
            Err(err) => return entry.failed(err),
        };
        match self
            .installer
            .delete_release(&kubeconfig, &record.namespace, &record.release_name)
            .await
        {
            Ok(()) => entry,
            Err(err) => entry.failed(err),
        }
    }

    /// Whether `cluster` already runs a release named `release` in `namespace`.
    pub async fn probe_release(
        &self,
        org: OrgId,
        cluster: ClusterId,
        namespace: &str,
        release: &str,
    ) -> Result<bool, DeploymentError> {
        let kubeconfig = self.kubeconfig(org, cluster).await?;
        Ok(self
            .installer
            .get_release(&kubeconfig, namespace, release)
            .await?
            .is_some())
    }

    async fn kubeconfig(&self, org: OrgId, cluster: ClusterId) -> Result<Vec<u8>, DeploymentError> {
        let handle = self.clusters.get_cluster_by_id(org, cluster).await?;
        Ok(handle.kubeconfig().await?)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn settle<I>(
    gathered: Vec<Gathered<I, TargetClusterStatus>>,
    on_timeout: impl Fn(I, TimedOut) -> TargetClusterStatus,
) -> Vec<TargetClusterStatus> {
    gathered
        .into_iter()
        .map(|g| match g.outcome {
            Ok(entry) => entry,
            Err(timeout) => on_timeout(g.item, timeout),
        })
        .collect()
}

fn log_outcome(group: &ClusterGroup, release: &str, action: &str, entries: &[TargetClusterStatus]) {
    let failed: Vec<&str> = entries
        .iter()
        .filter(|e| e.is_failed())
        .map(|e| e.cluster_name.as_str())
        .collect();
    if failed.is_empty() {
        tracing::info!(group = %group.id, release, action, clusters = entries.len(), "deployment fan-out finished");
    } else {
        tracing::warn!(group = %group.id, release, action, ?failed, "deployment fan-out finished with failures");
    }
}

fn ensure_enabled(group: &ClusterGroup) -> Result<(), DeploymentError> {
    if group.enabled_features.contains(DEPLOYMENT_FEATURE) {
        Ok(())
    } else {
        Err(DeploymentError::FeatureDisabled { group_id: group.id })
    }
}

/// Trimmed release name, checked against the installer's naming rules.
fn validate_release_name(name: &str) -> Result<String, DeploymentError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DeploymentError::EmptyReleaseName);
    }
    let invalid = |reason: &str| DeploymentError::InvalidReleaseName {
        release: name.to_string(),
        reason: reason.to_string(),
    };
    if name.len() > MAX_RELEASE_NAME {
        return Err(invalid("longer than 53 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(invalid("only lowercase letters, digits, '-' and '.' are allowed"));
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(invalid("must start and end with a letter or digit"));
    }
    Ok(name.to_string())
}

fn validate_overrides(
    group: &ClusterGroup,
    overrides: &BTreeMap<String, Value>,
) -> Result<(), DeploymentError> {
    match overrides
        .keys()
        .find(|name| !group.members.iter().any(|m| &m.name == *name))
    {
        Some(name) => Err(DeploymentError::UnknownTargetCluster {
            group_id: group.id,
            cluster: name.clone(),
        }),
        None => Ok(()),
    }
}
