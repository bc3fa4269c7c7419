//! Chart installer contract.
//!
//! The deployment manager never talks to a cluster directly; every install,
//! status probe and uninstall goes through a [`ChartInstaller`] handed the
//! target cluster's raw kubeconfig.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InstallerError;

/// What the operator asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartRef {
    /// Chart reference, e.g. `bitnami/nginx`.
    pub name: String,
    /// Exact version; `None` resolves to the newest available.
    pub version: Option<String>,
    /// Raw packaged chart (`.tgz`); when present it is installed as-is.
    pub package: Option<Vec<u8>>,
}

/// A chart with concrete coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedChart {
    /// Reference handed back to the installer on install.
    pub reference: String,
    /// Chart name from the chart metadata.
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_bytes")]
    pub package: Option<Vec<u8>>,
}

/// A release as reported by the installer on one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub chart_name: String,
    pub chart_version: String,
    /// Installer-specific phase, e.g. `deployed` or `failed`.
    pub phase: String,
    /// User-supplied values the release was rendered with.
    pub values: Value,
}

#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Pin `chart` to concrete coordinates within the organization's chart
    /// repositories.
    async fn resolve_chart(
        &self,
        org_name: &str,
        chart: &ChartRef,
    ) -> Result<ResolvedChart, InstallerError>;

    /// `Ok(None)` when no release with that name exists.
    async fn get_release(
        &self,
        kubeconfig: &[u8],
        namespace: &str,
        release: &str,
    ) -> Result<Option<Release>, InstallerError>;

    /// Install or upgrade against the same organization repositories that
    /// resolved `chart`.
    async fn install_or_upgrade(
        &self,
        org_name: &str,
        kubeconfig: &[u8],
        namespace: &str,
        release: &str,
        chart: &ResolvedChart,
        values: &Value,
    ) -> Result<Release, InstallerError>;

    /// Removing a release that does not exist succeeds.
    async fn delete_release(
        &self,
        kubeconfig: &[u8],
        namespace: &str,
        release: &str,
    ) -> Result<(), InstallerError>;
}

/// Serde adapter storing raw chart packages as hex text.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|text| hex::decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
