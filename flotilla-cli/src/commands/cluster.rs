//! `flotilla cluster list`

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use flotilla_core::{ClusterId, ClusterStatus};

use crate::app::App;
use crate::output::{print_json, print_table};

#[derive(Subcommand, Debug)]
pub enum ClusterCommand {
    /// List the organization's clusters and the group each belongs to.
    List,
}

#[derive(Serialize, Tabled)]
struct ClusterRow {
    #[tabled(rename = "id")]
    id: ClusterId,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "cloud")]
    cloud: String,
    #[tabled(rename = "distribution")]
    distribution: String,
    #[tabled(rename = "status")]
    status: ClusterStatus,
    #[tabled(rename = "group", display_with = "display_group")]
    group: Option<String>,
}

fn display_group(group: &Option<String>) -> String {
    group.clone().unwrap_or_else(|| "-".to_string())
}

pub async fn run(app: &App, cmd: ClusterCommand) -> Result<ExitCode> {
    match cmd {
        ClusterCommand::List => list(app),
    }
}

fn list(app: &App) -> Result<ExitCode> {
    let inventory = app
        .registry
        .inventory()
        .context("failed to read the cluster inventory")?;
    let groups = app
        .store
        .list_groups_in_org(app.org)
        .context("failed to read cluster groups")?;
    let group_of: BTreeMap<ClusterId, String> = groups
        .iter()
        .flat_map(|g| g.members.iter().map(move |id| (*id, g.name.clone())))
        .collect();

    let rows: Vec<ClusterRow> = inventory
        .clusters
        .into_iter()
        .filter(|c| c.org_id == app.org)
        .map(|c| ClusterRow {
            group: group_of.get(&c.id).cloned(),
            id: c.id,
            name: c.name,
            cloud: c.cloud,
            distribution: c.distribution,
            status: c.status,
        })
        .collect();

    if app.json {
        print_json(&rows)?;
    } else if rows.is_empty() {
        println!("No clusters registered for organization '{}'.", app.org_name);
    } else {
        print_table(rows);
    }
    Ok(ExitCode::SUCCESS)
}
