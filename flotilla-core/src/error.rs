//! Error types for flotilla-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ClusterId, GroupId, OrgId};

/// All errors that can arise from group store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure, annotated with the path being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse group document at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The group id high-water mark is unreadable.
    #[error("corrupt group id sequence at {path}: {reason}")]
    Sequence { path: PathBuf, reason: String },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or FLOTILLA_HOME")]
    HomeNotFound,

    #[error("cluster group {group_id} not found")]
    GroupNotFound { group_id: GroupId },

    #[error("cluster group name '{name}' is already used in organization {org_id}")]
    GroupNameTaken { org_id: OrgId, name: String },

    #[error("cluster {cluster_id} is already a member of cluster group {group_id}")]
    ClusterAlreadyGrouped {
        cluster_id: ClusterId,
        group_id: GroupId,
    },

    #[error("feature '{feature}' not found on cluster group {group_id}")]
    FeatureNotFound { group_id: GroupId, feature: String },

    #[error("feature '{feature}' on cluster group {group_id} is already being reconciled")]
    ReconcileInProgress { group_id: GroupId, feature: String },
}

/// Errors surfaced by a [`crate::cluster::ClusterRegistry`].
#[derive(Debug, Error)]
pub enum ClusterRegistryError {
    #[error("cluster {cluster} not found{}", org_suffix(.org_id))]
    NotFound {
        org_id: Option<OrgId>,
        cluster: String,
    },

    #[error("no kubeconfig available for cluster '{cluster}'")]
    MissingKubeconfig { cluster: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cluster inventory at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cluster registry error: {0}")]
    Backend(String),
}

impl ClusterRegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterRegistryError::NotFound { .. })
    }
}

fn org_suffix(org_id: &Option<OrgId>) -> String {
    match org_id {
        Some(org) => format!(" in organization {org}"),
        None => String::new(),
    }
}

/// Errors loading `config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
