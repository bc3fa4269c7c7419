//! The built-in `deployment` feature.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use flotilla_core::{ClusterGroup, Feature, DEPLOYMENT_FEATURE};
use flotilla_group::{FeatureError, FeatureHandler};

use crate::fanout::scatter_gather;
use crate::manager::{DeploymentManager, DeploymentStatus, TargetClusterStatus};

/// Gates the group's releases while enabled, and removes them from every
/// cluster once disabled.
pub struct DeploymentFeature {
    deployments: Arc<DeploymentManager>,
}

impl DeploymentFeature {
    pub fn new(deployments: Arc<DeploymentManager>) -> Self {
        Self { deployments }
    }

    fn summarize(release: &str, entries: &[TargetClusterStatus]) -> Option<String> {
        let failures: Vec<String> = entries
            .iter()
            .filter(|e| e.is_failed())
            .map(|e| {
                format!(
                    "{}: {}",
                    e.cluster_name,
                    e.error.as_deref().unwrap_or("failed")
                )
            })
            .collect();
        (!failures.is_empty()).then(|| format!("release '{release}' failed on {}", failures.join(", ")))
    }
}

#[async_trait]
impl FeatureHandler for DeploymentFeature {
    fn name(&self) -> &str {
        DEPLOYMENT_FEATURE
    }

    async fn validate_properties(
        &self,
        _group: &ClusterGroup,
        _current: Option<&Value>,
        proposed: &Value,
    ) -> Result<(), FeatureError> {
        let empty = match proposed {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if empty {
            Ok(())
        } else {
            Err(FeatureError::rejected("the deployment feature takes no properties"))
        }
    }

    /// Rejects a prospective member that already runs one of the group's
    /// releases outside the ledger.
    async fn validate_state(&self, feature: &Feature) -> Result<(), FeatureError> {
        let group = &feature.group;
        for record in self.deployments.records(group)? {
            let newcomers: Vec<_> = group
                .members
                .iter()
                .filter(|m| !record.targets.contains_key(&m.id))
                .cloned()
                .collect();
            if newcomers.is_empty() {
                continue;
            }
            let gathered = scatter_gather(newcomers, self.deployments.limits(), |member| {
                self.deployments.probe_release(
                    group.org_id,
                    member.id,
                    &record.namespace,
                    &record.release_name,
                )
            })
            .await;
            for g in gathered {
                match g.outcome {
                    Ok(Ok(true)) => {
                        return Err(FeatureError::rejected(format!(
                            "release '{}' is already installed on cluster '{}'",
                            record.release_name, g.item.name
                        )))
                    }
                    Ok(Ok(false)) => {}
                    Ok(Err(err)) => tracing::warn!(
                        release = %record.release_name,
                        cluster = %g.item.name,
                        error = %err,
                        "could not probe prospective member",
                    ),
                    Err(timeout) => tracing::warn!(
                        release = %record.release_name,
                        cluster = %g.item.name,
                        error = %timeout,
                        "could not probe prospective member",
                    ),
                }
            }
        }
        Ok(())
    }

    /// Enabled: releases stay as recorded; membership drift is left for an
    /// explicit sync. Disabled: every release is force-deleted everywhere.
    async fn reconcile_state(&self, feature: &Feature) -> Result<(), FeatureError> {
        let group = &feature.group;
        if feature.enabled {
            tracing::debug!(group = %group.id, "deployment feature enabled; releases left to explicit sync");
            return Ok(());
        }

        let mut failures = Vec::new();
        for record in self.deployments.records(group)? {
            let release = record.release_name;
            match self.deployments.delete_deployment(group, &release, true).await {
                Ok(entries) => failures.extend(Self::summarize(&release, &entries)),
                Err(err) => {
                    tracing::warn!(group = %group.id, release = %release, error = %err, "release teardown failed");
                    failures.push(format!("release '{release}': {err}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FeatureError::failed(failures.join("; ")))
        }
    }

    /// `READY`, `STALE` or `FAILED` per member across all of the group's
    /// releases; the worst state wins.
    async fn members_status(
        &self,
        feature: &Feature,
    ) -> Result<BTreeMap<String, String>, FeatureError> {
        let group = &feature.group;
        let mut worst: BTreeMap<String, u8> = group
            .members
            .iter()
            .map(|m| (m.name.clone(), 0))
            .collect();

        for record in self.deployments.records(group)? {
            let details = self
                .deployments
                .get_deployment(group, &record.release_name)
                .await?;
            for entry in details
                .targets
                .iter()
                .filter(|e| group.is_member(e.cluster_id))
            {
                let rank = match entry.status {
                    DeploymentStatus::Installed => 0,
                    DeploymentStatus::Stale | DeploymentStatus::NotInstalled => 1,
                    _ => 2,
                };
                let slot = worst.entry(entry.cluster_name.clone()).or_insert(0);
                *slot = (*slot).max(rank);
            }
        }

        Ok(worst
            .into_iter()
            .map(|(name, rank)| {
                let label = match rank {
                    0 => "READY",
                    1 => "STALE",
                    _ => "FAILED",
                };
                (name, label.to_string())
            })
            .collect())
    }
}
