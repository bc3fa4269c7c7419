//! [`ChartInstaller`] backed by the `helm` binary.
//!
//! Each call writes the cluster's kubeconfig (and, when needed, the values and
//! the chart package) to private temporary files and runs one `helm`
//! subcommand against them. Repository configuration is scoped per
//! organization under `~/.flotilla/helm/<org>/`.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::process::Command;

use flotilla_core::paths;

use crate::chart::{ChartInstaller, ChartRef, Release, ResolvedChart};
use crate::error::InstallerError;

const NOT_FOUND_MARKER: &str = "release: not found";

#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: PathBuf,
    home: PathBuf,
}

impl HelmCli {
    pub fn new(binary: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            home: home.into(),
        }
    }

    fn program(&self) -> String {
        self.binary.display().to_string()
    }

    /// `helm <args>`, pointed at `org_name`'s repository environment when given.
    fn command(&self, args: &[String], org_name: Option<&str>) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(args);
        if let Some(org) = org_name {
            let env_dir = paths::helm_env_dir(&self.home, org);
            command
                .env("HELM_REPOSITORY_CONFIG", env_dir.join("repositories.yaml"))
                .env("HELM_REPOSITORY_CACHE", env_dir.join("cache"));
        }
        command
    }

    /// Run `helm <args>`; `Ok(None)` when helm reports a missing release.
    async fn run(
        &self,
        action: &str,
        args: &[String],
        org_name: Option<&str>,
    ) -> Result<Option<Vec<u8>>, InstallerError> {
        let mut command = self.command(args, org_name);
        tracing::debug!(program = %self.program(), action, ?args, "running helm");
        let output = command.output().await.map_err(|source| InstallerError::Spawn {
            program: self.program(),
            source,
        })?;

        if output.status.success() {
            return Ok(Some(output.stdout));
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains(NOT_FOUND_MARKER) {
            return Ok(None);
        }
        Err(InstallerError::Command {
            program: self.program(),
            action: action.to_string(),
            status: output.status.to_string(),
            stderr,
        })
    }

    fn parse_release(&self, stdout: &[u8]) -> Result<Release, InstallerError> {
        parse_release(stdout).map_err(|e| InstallerError::Output {
            program: self.program(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ChartInstaller for HelmCli {
    async fn resolve_chart(
        &self,
        org_name: &str,
        chart: &ChartRef,
    ) -> Result<ResolvedChart, InstallerError> {
        let package_file = chart
            .package
            .as_deref()
            .map(|bytes| write_temp("flotilla-chart-", ".tgz", bytes))
            .transpose()?;

        let mut args = vec!["show".to_string(), "chart".to_string()];
        match &package_file {
            Some(file) => args.push(file.path().display().to_string()),
            None => {
                args.push(chart.name.clone());
                if let Some(version) = &chart.version {
                    args.extend(["--version".to_string(), version.clone()]);
                }
            }
        }

        let stdout = self
            .run("show chart", &args, Some(org_name))
            .await?
            .ok_or_else(|| InstallerError::ChartNotFound {
                chart: chart.name.clone(),
                reason: "not found in the organization's repositories".to_string(),
            })?;
        let meta: ChartMetadata = serde_yaml::from_slice(&stdout).map_err(|e| InstallerError::ChartNotFound {
            chart: chart.name.clone(),
            reason: format!("unreadable chart metadata: {e}"),
        })?;

        Ok(ResolvedChart {
            reference: chart.name.clone(),
            name: meta.name,
            version: meta.version,
            package: chart.package.clone(),
        })
    }

    async fn get_release(
        &self,
        kubeconfig: &[u8],
        namespace: &str,
        release: &str,
    ) -> Result<Option<Release>, InstallerError> {
        let kubeconfig = write_temp("flotilla-kubeconfig-", ".yaml", kubeconfig)?;
        let args = vec![
            "status".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--kubeconfig".to_string(),
            kubeconfig.path().display().to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        match self.run("status", &args, None).await? {
            Some(stdout) => self.parse_release(&stdout).map(Some),
            None => Ok(None),
        }
    }

    async fn install_or_upgrade(
        &self,
        org_name: &str,
        kubeconfig: &[u8],
        namespace: &str,
        release: &str,
        chart: &ResolvedChart,
        values: &Value,
    ) -> Result<Release, InstallerError> {
        let kubeconfig = write_temp("flotilla-kubeconfig-", ".yaml", kubeconfig)?;
        let rendered = serde_json::to_vec(values).map_err(|e| InstallerError::Output {
            program: self.program(),
            reason: e.to_string(),
        })?;
        // JSON is valid YAML, so helm accepts it as a values file.
        let values_file = write_temp("flotilla-values-", ".json", &rendered)?;
        let package_file = chart
            .package
            .as_deref()
            .map(|bytes| write_temp("flotilla-chart-", ".tgz", bytes))
            .transpose()?;

        let args = upgrade_args(
            release,
            namespace,
            chart,
            package_file.as_ref().map(NamedTempFile::path),
            kubeconfig.path(),
            values_file.path(),
        );
        let stdout = self
            .run("upgrade --install", &args, Some(org_name))
            .await?
            .ok_or_else(|| InstallerError::Output {
                program: self.program(),
                reason: format!("release '{release}' vanished during install"),
            })?;
        self.parse_release(&stdout)
    }

    async fn delete_release(
        &self,
        kubeconfig: &[u8],
        namespace: &str,
        release: &str,
    ) -> Result<(), InstallerError> {
        let kubeconfig = write_temp("flotilla-kubeconfig-", ".yaml", kubeconfig)?;
        let args = vec![
            "uninstall".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--kubeconfig".to_string(),
            kubeconfig.path().display().to_string(),
        ];
        if self.run("uninstall", &args, None).await?.is_none() {
            tracing::debug!(release, namespace, "release already absent");
        }
        Ok(())
    }
}

fn upgrade_args(
    release: &str,
    namespace: &str,
    chart: &ResolvedChart,
    package: Option<&Path>,
    kubeconfig: &Path,
    values: &Path,
) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.to_string(),
    ];
    match package {
        Some(path) => args.push(path.display().to_string()),
        None => {
            args.push(chart.reference.clone());
            args.extend(["--version".to_string(), chart.version.clone()]);
        }
    }
    args.extend([
        "--namespace".to_string(),
        namespace.to_string(),
        "--create-namespace".to_string(),
        "--kubeconfig".to_string(),
        kubeconfig.display().to_string(),
        "--values".to_string(),
        values.display().to_string(),
        "--reset-values".to_string(),
        "--wait".to_string(),
        "--output".to_string(),
        "json".to_string(),
    ]);
    args
}

fn write_temp(prefix: &str, suffix: &str, bytes: &[u8]) -> Result<NamedTempFile, InstallerError> {
    let io = |source: std::io::Error| InstallerError::Io {
        path: std::env::temp_dir(),
        source,
    };
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()
        .map_err(io)?;
    file.write_all(bytes).map_err(io)?;
    file.flush().map_err(io)?;
    Ok(file)
}

// ---------------------------------------------------------------------------
// helm JSON / YAML output
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartMetadata {
    name: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct HelmRelease {
    name: String,
    namespace: String,
    info: HelmInfo,
    chart: HelmChart,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Deserialize)]
struct HelmInfo {
    status: String,
}

#[derive(Debug, Deserialize)]
struct HelmChart {
    metadata: ChartMetadata,
}

fn parse_release(stdout: &[u8]) -> Result<Release, serde_json::Error> {
    let raw: HelmRelease = serde_json::from_slice(stdout)?;
    Ok(Release {
        name: raw.name,
        namespace: raw.namespace,
        chart_name: raw.chart.metadata.name,
        chart_version: raw.chart.metadata.version,
        phase: raw.info.status,
        values: raw.config,
    })
}
