//! Error types for flotilla-deploy.

use std::path::PathBuf;

use thiserror::Error;

use flotilla_core::{ClusterRegistryError, GroupId};
use flotilla_group::FeatureError;

/// Failures reported by a [`crate::chart::ChartInstaller`].
#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("chart '{chart}' could not be resolved: {reason}")]
    ChartNotFound { chart: String, reason: String },

    /// The installer process could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The installer process exited non-zero.
    #[error("{program} {action} failed ({status}): {stderr}")]
    Command {
        program: String,
        action: String,
        status: String,
        stderr: String,
    },

    /// The installer printed something that does not parse.
    #[error("unexpected {program} output: {reason}")]
    Output { program: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Unreachable(String),
}

/// All errors that can arise from deployment operations.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("deployment '{release}' not found in cluster group {group_id}")]
    NotFound { group_id: GroupId, release: String },

    #[error("deployment '{release}' already exists in cluster group {group_id}")]
    AlreadyExists { group_id: GroupId, release: String },

    #[error("release name must not be empty")]
    EmptyReleaseName,

    #[error("invalid release name '{release}': {reason}")]
    InvalidReleaseName { release: String, reason: String },

    #[error("value override targets '{cluster}', which is not a member of cluster group {group_id}")]
    UnknownTargetCluster { group_id: GroupId, cluster: String },

    #[error("the deployment feature is disabled on cluster group {group_id}")]
    FeatureDisabled { group_id: GroupId },

    #[error("installer error: {0}")]
    Installer(#[from] InstallerError),

    #[error("cluster registry error: {0}")]
    Registry(#[from] ClusterRegistryError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ledger document could not be parsed.
    #[error("failed to parse deployment ledger at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("deployment ledger JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeploymentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<DeploymentError> for FeatureError {
    fn from(err: DeploymentError) -> Self {
        match err {
            DeploymentError::AlreadyExists { .. } | DeploymentError::UnknownTargetCluster { .. } => {
                FeatureError::rejected(err.to_string())
            }
            other => FeatureError::failed(other.to_string()),
        }
    }
}

/// Convenience constructor for [`DeploymentError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DeploymentError {
    DeploymentError::Io {
        path: path.into(),
        source,
    }
}
