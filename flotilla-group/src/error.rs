//! Error types for flotilla-group.

use thiserror::Error;

use flotilla_core::{ClusterId, ClusterRegistryError, ClusterStatus, GroupId, OrgId, StoreError};

/// Error returned by a feature handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    /// The handler refuses the proposed properties or membership.
    #[error("{reason}")]
    Rejected { reason: String },

    /// The handler could not converge the feature.
    #[error("{reason}")]
    Failed { reason: String },
}

impl FeatureError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// All errors that can arise from cluster group and feature operations.
#[derive(Debug, Error)]
pub enum ClusterGroupError {
    #[error("cluster group {group_id} not found")]
    NotFound { group_id: GroupId },

    #[error("cluster group '{name}' already exists in organization {org_id}")]
    AlreadyExists { org_id: OrgId, name: String },

    #[error("cluster group name must not be empty")]
    EmptyName,

    #[error("a cluster group needs at least one member")]
    NoMembers,

    #[error("member cluster {cluster_id} not found in organization {org_id}")]
    MemberClusterNotFound { org_id: OrgId, cluster_id: ClusterId },

    #[error("cluster {cluster_id} is already a member of cluster group {group_id}")]
    MemberAlreadyInGroup {
        cluster_id: ClusterId,
        group_id: GroupId,
    },

    #[error("cluster '{cluster_name}' ({cluster_id}) cannot join a cluster group while {status}")]
    UnableToJoin {
        cluster_id: ClusterId,
        cluster_name: String,
        status: ClusterStatus,
    },

    #[error("cluster group update rejected by feature '{feature}': {reason}")]
    UpdateRejected { feature: String, reason: String },

    #[error("feature '{feature}' is not registered")]
    FeatureNotRegistered { feature: String },

    #[error("feature '{feature}' not found on cluster group {group_id}")]
    FeatureNotFound { group_id: GroupId, feature: String },

    #[error("invalid properties for feature '{feature}': {reason}")]
    InvalidProperties { feature: String, reason: String },

    #[error("feature '{feature}' on cluster group {group_id} is already being reconciled")]
    ReconcileInProgress { group_id: GroupId, feature: String },

    #[error("feature '{feature}' failed: {source}")]
    Feature {
        feature: String,
        #[source]
        source: FeatureError,
    },

    #[error("cluster registry error: {0}")]
    Registry(#[from] ClusterRegistryError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ClusterGroupError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::GroupNotFound { group_id } => Self::NotFound { group_id },
            StoreError::GroupNameTaken { org_id, name } => Self::AlreadyExists { org_id, name },
            StoreError::ClusterAlreadyGrouped {
                cluster_id,
                group_id,
            } => Self::MemberAlreadyInGroup {
                cluster_id,
                group_id,
            },
            StoreError::FeatureNotFound { group_id, feature } => {
                Self::FeatureNotFound { group_id, feature }
            }
            StoreError::ReconcileInProgress { group_id, feature } => {
                Self::ReconcileInProgress { group_id, feature }
            }
            other => Self::Store(other),
        }
    }
}

impl ClusterGroupError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::MemberClusterNotFound { .. } | Self::FeatureNotFound { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. }
                | Self::MemberAlreadyInGroup { .. }
                | Self::UnableToJoin { .. }
                | Self::UpdateRejected { .. }
                | Self::ReconcileInProgress { .. }
        )
    }
}
