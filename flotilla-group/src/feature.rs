//! Feature reconciliation engine.
//!
//! A [`FeatureHandler`] implements one cross-cluster capability. Handlers are
//! registered by name on a [`FeatureManager`] instance; the manager owns the
//! enable/update/disable lifecycle and the reconcile state machine:
//!
//! ```text
//! {NONE, SUCCESS, FAILED} -> IN_PROGRESS -> {SUCCESS, FAILED}
//! ```
//!
//! Disabling never tears anything down by itself. Teardown is the handler's
//! job on the next reconcile of a disabled feature.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use flotilla_core::{
    ClusterGroup, ClusterRegistry, Feature, FeatureRecord, GroupId, GroupStore, ReconcileState,
};

use crate::error::{ClusterGroupError, FeatureError};
use crate::members::resolve_group;

/// Capability contract implemented by every feature.
#[async_trait]
pub trait FeatureHandler: Send + Sync {
    /// Registry key, e.g. `"deployment"`.
    fn name(&self) -> &str;

    /// Check proposed properties. `current` is `Some` only while the feature
    /// is enabled.
    async fn validate_properties(
        &self,
        group: &ClusterGroup,
        current: Option<&Value>,
        proposed: &Value,
    ) -> Result<(), FeatureError>;

    /// Check an enabled feature against a prospective (not yet persisted)
    /// group membership.
    async fn validate_state(&self, feature: &Feature) -> Result<(), FeatureError>;

    /// Idempotently converge the feature. A disabled feature must tear down
    /// whatever it manages.
    async fn reconcile_state(&self, feature: &Feature) -> Result<(), FeatureError>;

    /// Per-member status keyed by cluster name.
    async fn members_status(
        &self,
        feature: &Feature,
    ) -> Result<BTreeMap<String, String>, FeatureError>;
}

/// Name-keyed handler table plus the feature lifecycle.
pub struct FeatureManager {
    store: Arc<GroupStore>,
    clusters: Arc<dyn ClusterRegistry>,
    handlers: HashMap<String, Arc<dyn FeatureHandler>>,
}

impl FeatureManager {
    pub fn new(store: Arc<GroupStore>, clusters: Arc<dyn ClusterRegistry>) -> Self {
        Self {
            store,
            clusters,
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` under its name, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn FeatureHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn FeatureHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Sorted names of the registered handlers.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn handler(&self, name: &str) -> Result<Arc<dyn FeatureHandler>, ClusterGroupError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterGroupError::FeatureNotRegistered {
                feature: name.to_string(),
            })
    }

    async fn load_group(&self, group_id: GroupId) -> Result<ClusterGroup, ClusterGroupError> {
        let record = self.store.load_group(group_id)?;
        Ok(resolve_group(self.clusters.as_ref(), &record, false).await)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get_feature(
        &self,
        group_id: GroupId,
        name: &str,
    ) -> Result<Feature, ClusterGroupError> {
        let group = self.load_group(group_id).await?;
        let record = self.store.load_feature(group_id, name)?;
        Ok(Feature::from_record(group, record))
    }

    /// Every feature row of the group, enabled or not, sorted by name.
    pub async fn list_features(&self, group_id: GroupId) -> Result<Vec<Feature>, ClusterGroupError> {
        let record = self.store.load_group(group_id)?;
        let group = resolve_group(self.clusters.as_ref(), &record, false).await;
        Ok(record
            .features
            .into_values()
            .map(|f| Feature::from_record(group.clone(), f))
            .collect())
    }

    pub async fn members_status(
        &self,
        group_id: GroupId,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterGroupError> {
        let handler = self.handler(name)?;
        let feature = self.get_feature(group_id, name).await?;
        handler
            .members_status(&feature)
            .await
            .map_err(|source| ClusterGroupError::Feature {
                feature: name.to_string(),
                source,
            })
    }

    // -----------------------------------------------------------------------
    // Enable / update / disable
    // -----------------------------------------------------------------------

    /// Enable `name` with `properties`, then reconcile it.
    ///
    /// A failed reconcile is recorded on the returned feature; it does not undo
    /// the enable.
    pub async fn enable_feature(
        &self,
        group_id: GroupId,
        name: &str,
        properties: Value,
    ) -> Result<Feature, ClusterGroupError> {
        self.enable_or_update(group_id, name, properties, true).await
    }

    /// Replace the properties of an existing feature row, then reconcile it.
    pub async fn update_feature(
        &self,
        group_id: GroupId,
        name: &str,
        properties: Value,
    ) -> Result<Feature, ClusterGroupError> {
        self.enable_or_update(group_id, name, properties, false).await
    }

    async fn enable_or_update(
        &self,
        group_id: GroupId,
        name: &str,
        properties: Value,
        enable: bool,
    ) -> Result<Feature, ClusterGroupError> {
        let handler = self.handler(name)?;
        let group = self.load_group(group_id).await?;

        let mut record = match self.store.find_feature(group_id, name)? {
            Some(record) => record,
            None if enable => FeatureRecord::new(name),
            None => {
                return Err(ClusterGroupError::FeatureNotFound {
                    group_id,
                    feature: name.to_string(),
                })
            }
        };

        let current = record.enabled.then_some(&record.properties);
        handler
            .validate_properties(&group, current, &properties)
            .await
            .map_err(|err| ClusterGroupError::InvalidProperties {
                feature: name.to_string(),
                reason: err.to_string(),
            })?;

        if enable {
            record.enabled = true;
        }
        record.properties = properties;
        self.store.save_feature(group_id, &record)?;
        tracing::info!(group = %group_id, feature = name, enable, "feature properties saved");

        match self.reconcile_feature(group_id, name).await {
            Ok(feature) => Ok(feature),
            Err(ClusterGroupError::ReconcileInProgress { .. }) => {
                tracing::warn!(
                    group = %group_id,
                    feature = name,
                    "reconcile already running; new properties apply on its next pass",
                );
                self.get_feature(group_id, name).await
            }
            Err(err) => Err(err),
        }
    }

    /// Flip the feature to disabled. Teardown happens on the next reconcile.
    pub async fn disable_feature(
        &self,
        group_id: GroupId,
        name: &str,
    ) -> Result<(), ClusterGroupError> {
        let mut record = self.store.load_feature(group_id, name)?;
        record.enabled = false;
        self.store.save_feature(group_id, &record)?;
        tracing::info!(group = %group_id, feature = name, "feature disabled");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reconcile
    // -----------------------------------------------------------------------

    /// Run the handler's reconcile for one feature.
    ///
    /// Rejects with `ReconcileInProgress` without calling the handler when the
    /// persisted state is `IN_PROGRESS`. A handler failure is stored on the
    /// row and returned as part of the `Ok` feature.
    pub async fn reconcile_feature(
        &self,
        group_id: GroupId,
        name: &str,
    ) -> Result<Feature, ClusterGroupError> {
        let handler = self.handler(name)?;
        let record = self.store.begin_reconcile(group_id, name)?;

        let outcome = match self.load_group(group_id).await {
            Ok(group) => {
                let feature = Feature::from_record(group, record);
                handler
                    .reconcile_state(&feature)
                    .await
                    .map_err(|err| err.to_string())
            }
            Err(err) => Err(err.to_string()),
        };

        if let Err(reason) = &outcome {
            tracing::warn!(group = %group_id, feature = name, error = %reason, "feature reconcile failed");
        } else {
            tracing::info!(group = %group_id, feature = name, "feature reconciled");
        }

        let record = self.store.finish_reconcile(group_id, name, outcome)?;
        let group = self.load_group(group_id).await?;
        Ok(Feature::from_record(group, record))
    }

    /// Reconcile every enabled feature of the group; disabled rows are skipped.
    pub async fn reconcile_enabled_features(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<Feature>, ClusterGroupError> {
        let record = self.store.load_group(group_id)?;
        let mut reconciled = Vec::new();
        for name in record.enabled_features() {
            match self.reconcile_feature(group_id, &name).await {
                Ok(feature) => reconciled.push(feature),
                Err(err @ ClusterGroupError::ReconcileInProgress { .. })
                | Err(err @ ClusterGroupError::FeatureNotRegistered { .. }) => {
                    tracing::warn!(group = %group_id, feature = %name, error = %err, "feature skipped");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(reconciled)
    }

    /// Disable every enabled feature, then reconcile each so handlers tear down
    /// what they manage. Used before a group is deleted.
    pub async fn disable_and_reconcile_all(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<Feature>, ClusterGroupError> {
        let record = self.store.load_group(group_id)?;
        if let Some(busy) = record
            .features
            .values()
            .find(|f| f.enabled && f.reconcile_state == ReconcileState::InProgress)
        {
            return Err(ClusterGroupError::ReconcileInProgress {
                group_id,
                feature: busy.name.clone(),
            });
        }

        let enabled = record.enabled_features();
        for name in &enabled {
            self.disable_feature(group_id, name).await?;
        }

        let mut torn_down = Vec::new();
        for name in &enabled {
            match self.reconcile_feature(group_id, name).await {
                Ok(feature) => torn_down.push(feature),
                Err(err @ ClusterGroupError::FeatureNotRegistered { .. }) => {
                    tracing::warn!(group = %group_id, feature = %name, error = %err, "no handler to tear down feature");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(torn_down)
    }

    /// Ask every enabled feature's handler to accept `prospective`.
    ///
    /// The first rejection wins and is reported as `UpdateRejected`.
    pub async fn validate_membership(
        &self,
        prospective: &ClusterGroup,
    ) -> Result<(), ClusterGroupError> {
        let record = self.store.load_group(prospective.id)?;
        for feature in record.features.into_values().filter(|f| f.enabled) {
            let name = feature.name.clone();
            let Some(handler) = self.handlers.get(&name) else {
                tracing::warn!(group = %prospective.id, feature = %name, "enabled feature has no handler; skipping validation");
                continue;
            };
            let feature = Feature::from_record(prospective.clone(), feature);
            if let Err(err) = handler.validate_state(&feature).await {
                return Err(ClusterGroupError::UpdateRejected {
                    feature: name,
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
