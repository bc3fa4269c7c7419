//! Shared table/JSON rendering.

use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use flotilla_core::ClusterGroup;
use flotilla_deploy::{DeploymentStatus, TargetClusterStatus};

/// Exit status of a command whose per-cluster entries include a failure.
pub const PARTIAL_FAILURE: u8 = 2;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON output")?
    );
    Ok(())
}

pub fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

pub fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::from(PARTIAL_FAILURE)
    } else {
        ExitCode::SUCCESS
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct MemberRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "cluster")]
    name: String,
    #[tabled(rename = "cloud")]
    cloud: String,
    #[tabled(rename = "distribution")]
    distribution: String,
    #[tabled(rename = "status")]
    status: String,
}

pub fn print_group(group: &ClusterGroup) {
    let features: Vec<&str> = group.enabled_features.iter().map(String::as_str).collect();
    println!(
        "{} (id {}) | {} members | features: {}",
        group.name.bold(),
        group.id,
        group.members.len(),
        if features.is_empty() {
            "none".to_string()
        } else {
            features.join(", ")
        },
    );
    let rows: Vec<MemberRow> = group
        .members
        .iter()
        .map(|m| MemberRow {
            id: m.id.to_string(),
            name: m.name.clone(),
            cloud: m.cloud.clone(),
            distribution: m.distribution.clone(),
            status: m.status.map_or_else(|| "-".to_string(), |s| s.to_string()),
        })
        .collect();
    print_table(rows);
}

// ---------------------------------------------------------------------------
// Per-cluster entries
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "cluster")]
    cluster: String,
    #[tabled(rename = "cloud")]
    cloud: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "version")]
    version: String,
    #[tabled(rename = "detail")]
    detail: String,
}

pub fn status_label(status: DeploymentStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        DeploymentStatus::Installed | DeploymentStatus::Succeeded => label.green().bold(),
        DeploymentStatus::Stale | DeploymentStatus::NotInstalled => label.yellow().bold(),
        DeploymentStatus::Unknown => label.bright_black().bold(),
        DeploymentStatus::Failed => label.red().bold(),
    }
}

/// Print `entries` as a table (or JSON) and pick the exit code.
pub fn report_entries(json: bool, entries: &[TargetClusterStatus]) -> Result<ExitCode> {
    let failed = entries.iter().any(TargetClusterStatus::is_failed);
    if json {
        print_json(entries)?;
        return Ok(exit_code(failed));
    }

    if entries.is_empty() {
        println!("No target clusters.");
        return Ok(exit_code(failed));
    }
    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|e| EntryRow {
            cluster: e.cluster_name.clone(),
            cloud: e.cloud.clone(),
            status: status_label(e.status).to_string(),
            version: e.version.clone().unwrap_or_else(|| "-".to_string()),
            detail: e
                .error
                .clone()
                .or_else(|| e.phase.clone())
                .unwrap_or_default(),
        })
        .collect();
    print_table(rows);

    let failures = entries.iter().filter(|e| e.is_failed()).count();
    if failures > 0 {
        eprintln!(
            "{} {failures} of {} clusters failed",
            "!".red().bold(),
            entries.len()
        );
    }
    Ok(exit_code(failed))
}
