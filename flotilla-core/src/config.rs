//! `~/.flotilla/config.yaml`: operator-tunable settings.
//!
//! Every field has a default; a missing file yields [`Config::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths;
use crate::types::ClusterStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fanout: FanoutSettings,
    /// Cluster statuses that may join a cluster group.
    pub schedulable_statuses: Vec<ClusterStatus>,
    /// Namespace used when a deployment request does not name one.
    pub default_namespace: String,
    pub helm: HelmSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fanout: FanoutSettings::default(),
            schedulable_statuses: vec![ClusterStatus::Running, ClusterStatus::Warning],
            default_namespace: "default".to_string(),
            helm: HelmSettings::default(),
        }
    }
}

impl Config {
    pub fn is_schedulable(&self, status: ClusterStatus) -> bool {
        self.schedulable_statuses.contains(&status)
    }
}

/// Limits applied to every multi-cluster scatter/gather.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutSettings {
    /// Maximum clusters contacted at once; `None` means one task per cluster.
    pub max_concurrency: Option<usize>,
    /// Per-cluster deadline in seconds; `None` disables it.
    pub per_cluster_timeout_secs: Option<u64>,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            max_concurrency: Some(16),
            per_cluster_timeout_secs: Some(600),
        }
    }
}

impl FanoutSettings {
    pub fn per_cluster_timeout(&self) -> Option<Duration> {
        self.per_cluster_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmSettings {
    pub binary: PathBuf,
}

impl Default for HelmSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("helm"),
        }
    }
}

/// Load `<home>/.flotilla/config.yaml`, or defaults when it does not exist.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = paths::config_path(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
        path: path.clone(),
        source: e,
    })?;
    // An empty file parses as unit, not as a mapping.
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}
