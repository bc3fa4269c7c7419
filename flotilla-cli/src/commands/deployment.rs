//! `flotilla deployment ...`: releases replicated across a cluster group.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use flotilla_deploy::staleness::values_diff;
use flotilla_deploy::{
    ChartRef, DeploymentRecord, DeploymentSpec, DeploymentSummary, DesiredRelease,
    TargetClusterStatus,
};

use crate::app::App;
use crate::output::{print_json, print_table, report_entries, status_label};

#[derive(Subcommand, Debug)]
pub enum DeploymentCommand {
    /// Install a new release on every member of a group.
    Create(SpecArgs),

    /// Change the chart or values of a release and roll it out.
    Update(SpecArgs),

    /// Re-install drifted members and remove the release from ex-members.
    Sync(ReleaseTarget),

    /// Remove a release from every cluster it was installed on.
    Delete {
        #[command(flatten)]
        target: ReleaseTarget,

        /// Forget clusters whose uninstall failed.
        #[arg(long)]
        force: bool,
    },

    /// Show live per-cluster state of a release.
    Get {
        #[command(flatten)]
        target: ReleaseTarget,

        /// Print a values diff for every drifted member.
        #[arg(long)]
        diff: bool,
    },

    /// List the releases recorded for a group.
    List {
        /// Group id or name.
        group: String,
    },
}

#[derive(Args, Debug)]
pub struct ReleaseTarget {
    /// Group id or name.
    pub group: String,

    /// Release name.
    pub release: String,
}

#[derive(Args, Debug)]
pub struct SpecArgs {
    #[command(flatten)]
    pub target: ReleaseTarget,

    /// Chart reference, e.g. `bitnami/nginx`.
    #[arg(long)]
    pub chart: String,

    /// Chart version; defaults to the newest available.
    #[arg(long = "version", value_name = "VERSION")]
    pub chart_version: Option<String>,

    /// Packaged chart (`.tgz`) to install instead of fetching `--chart`.
    #[arg(long, value_name = "FILE")]
    pub package: Option<PathBuf>,

    /// Namespace; only honoured on create.
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,

    /// YAML values file applied on every member.
    #[arg(long = "values", short = 'f', value_name = "FILE")]
    pub values: Option<PathBuf>,

    /// Per-cluster values, as `<cluster>=<file>`; repeatable.
    #[arg(long = "override", value_name = "CLUSTER=FILE")]
    pub overrides: Vec<String>,

    /// Merge into the recorded values instead of replacing them (update only).
    #[arg(long)]
    pub reuse_values: bool,
}

impl SpecArgs {
    fn into_spec(self) -> Result<DeploymentSpec> {
        let package = self
            .package
            .as_deref()
            .map(|path| {
                std::fs::read(path)
                    .with_context(|| format!("failed to read chart package {}", path.display()))
            })
            .transpose()?;
        let values = match self.values.as_deref() {
            Some(path) => read_values(path)?,
            None => Value::Null,
        };
        let mut overrides = BTreeMap::new();
        for raw in &self.overrides {
            let (cluster, file) = raw
                .split_once('=')
                .ok_or_else(|| anyhow!("--override expects <cluster>=<file>, got '{raw}'"))?;
            overrides.insert(cluster.to_string(), read_values(Path::new(file))?);
        }

        Ok(DeploymentSpec {
            release_name: self.target.release,
            chart: ChartRef {
                name: self.chart,
                version: self.chart_version,
                package,
            },
            namespace: self.namespace,
            values,
            overrides,
            reuse_values: self.reuse_values,
        })
    }
}

fn read_values(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read values file {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse values file {}", path.display()))
}

#[derive(Serialize)]
struct DetailsJson<'a> {
    record: &'a DeploymentRecord,
    targets: &'a [TargetClusterStatus],
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "release")]
    release: String,
    #[tabled(rename = "namespace")]
    namespace: String,
    #[tabled(rename = "chart")]
    chart: String,
    #[tabled(rename = "targets")]
    targets: usize,
    #[tabled(rename = "values")]
    digest: String,
    #[tabled(rename = "updated")]
    updated: String,
}

impl From<DeploymentSummary> for SummaryRow {
    fn from(s: DeploymentSummary) -> Self {
        Self {
            release: s.release_name,
            namespace: s.namespace,
            chart: format!("{}-{}", s.chart_name, s.chart_version),
            targets: s.targets,
            digest: s.values_digest.chars().take(12).collect(),
            updated: s.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

pub async fn run(app: &App, cmd: DeploymentCommand) -> Result<ExitCode> {
    match cmd {
        DeploymentCommand::Create(args) => create_or_update(app, args, true).await,
        DeploymentCommand::Update(args) => create_or_update(app, args, false).await,
        DeploymentCommand::Sync(target) => sync(app, target).await,
        DeploymentCommand::Delete { target, force } => delete(app, target, force).await,
        DeploymentCommand::Get { target, diff } => get(app, target, diff).await,
        DeploymentCommand::List { group } => list(app, &group).await,
    }
}

async fn create_or_update(app: &App, args: SpecArgs, create: bool) -> Result<ExitCode> {
    let group = app.group(&args.target.group).await?;
    let release = args.target.release.clone();
    let spec = args.into_spec()?;
    let entries = if create {
        app.deployments
            .create_deployment(&group, &app.org_name, spec)
            .await
            .with_context(|| format!("failed to create deployment '{release}'"))?
    } else {
        app.deployments
            .update_deployment(&group, &app.org_name, spec)
            .await
            .with_context(|| format!("failed to update deployment '{release}'"))?
    };
    report_entries(app.json, &entries)
}

async fn sync(app: &App, target: ReleaseTarget) -> Result<ExitCode> {
    let group = app.group(&target.group).await?;
    let entries = app
        .deployments
        .sync_deployment(&group, &target.release)
        .await
        .with_context(|| format!("failed to sync deployment '{}'", target.release))?;
    report_entries(app.json, &entries)
}

async fn delete(app: &App, target: ReleaseTarget, force: bool) -> Result<ExitCode> {
    let group = app.group(&target.group).await?;
    let entries = app
        .deployments
        .delete_deployment(&group, &target.release, force)
        .await
        .with_context(|| format!("failed to delete deployment '{}'", target.release))?;
    report_entries(app.json, &entries)
}

async fn get(app: &App, target: ReleaseTarget, diff: bool) -> Result<ExitCode> {
    let group = app.group(&target.group).await?;
    let details = app
        .deployments
        .get_deployment(&group, &target.release)
        .await
        .with_context(|| format!("failed to load deployment '{}'", target.release))?;

    if app.json {
        print_json(&DetailsJson {
            record: &details.record,
            targets: &details.targets,
        })?;
        return Ok(ExitCode::SUCCESS);
    }

    let record = &details.record;
    println!(
        "{} | chart {}-{} | namespace {} | {} targets",
        record.release_name, record.chart.name, record.chart.version, record.namespace,
        record.targets.len(),
    );
    report_entries(false, &details.targets)?;

    if diff {
        for entry in details.targets.iter().filter(|e| e.stale) {
            let Some(installed) = entry.values.as_ref() else {
                println!("{}: {}", entry.cluster_name, status_label(entry.status));
                continue;
            };
            let desired = DesiredRelease::for_cluster(record, &entry.cluster_name);
            print!("{}", values_diff(installed, &desired.values, &entry.cluster_name));
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn list(app: &App, group: &str) -> Result<ExitCode> {
    let group = app.group(group).await?;
    let summaries = app
        .deployments
        .list_deployments(&group)
        .with_context(|| format!("failed to list deployments of '{}'", group.name))?;
    if app.json {
        print_json(&summaries)?;
    } else if summaries.is_empty() {
        println!("No deployments in cluster group '{}'.", group.name);
    } else {
        print_table(summaries.into_iter().map(SummaryRow::from).collect());
    }
    Ok(ExitCode::SUCCESS)
}
