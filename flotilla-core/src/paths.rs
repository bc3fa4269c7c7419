//! On-disk layout under `<home>/.flotilla/`.
//!
//! ```text
//! ~/.flotilla/
//!   config.yaml                         (optional; defaults apply when absent)
//!   clusters.yaml                       (cluster inventory)
//!   groups/<group_id>.yaml              (group + members + feature rows)
//!   groups/last_id                      (group id high-water mark)
//!   deployments/<group_id>/<release>.json
//!   helm/<org_name>/                    (org-scoped helm repository environment)
//! ```

use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::types::GroupId;

/// Environment variable that overrides the home directory.
pub const HOME_ENV: &str = "FLOTILLA_HOME";

pub fn flotilla_root(home: &Path) -> PathBuf {
    home.join(".flotilla")
}

pub fn config_path(home: &Path) -> PathBuf {
    flotilla_root(home).join("config.yaml")
}

pub fn inventory_path(home: &Path) -> PathBuf {
    flotilla_root(home).join("clusters.yaml")
}

pub fn groups_dir(home: &Path) -> PathBuf {
    flotilla_root(home).join("groups")
}

pub fn group_path(home: &Path, group: GroupId) -> PathBuf {
    groups_dir(home).join(format!("{group}.yaml"))
}

pub fn group_sequence_path(home: &Path) -> PathBuf {
    groups_dir(home).join("last_id")
}

pub fn deployments_dir(home: &Path) -> PathBuf {
    flotilla_root(home).join("deployments")
}

pub fn group_deployments_dir(home: &Path, group: GroupId) -> PathBuf {
    deployments_dir(home).join(group.to_string())
}

pub fn helm_env_dir(home: &Path, org_name: &str) -> PathBuf {
    flotilla_root(home).join("helm").join(org_name)
}

/// `$FLOTILLA_HOME` if set, otherwise the user's home directory.
pub fn resolve_home() -> Result<PathBuf, StoreError> {
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}
