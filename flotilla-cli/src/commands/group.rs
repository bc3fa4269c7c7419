//! `flotilla group ...`: cluster group lifecycle.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::Tabled;

use flotilla_core::GroupId;

use crate::app::App;
use crate::output::{exit_code, print_group, print_json, print_table};

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
    /// Create a cluster group; the deployment feature starts enabled.
    Create(CreateArgs),

    /// Replace the members of a group, optionally renaming it.
    Update(UpdateArgs),

    /// Tear down every enabled feature and delete the group.
    Delete {
        /// Group id or name.
        group: String,
    },

    /// Show one group and its members.
    Get {
        /// Group id or name.
        group: String,

        /// Also query each member's live status.
        #[arg(long)]
        status: bool,
    },

    /// List the organization's groups.
    List,

    /// Remove a cluster from whichever group holds it.
    RemoveCluster {
        /// Cluster id or name.
        cluster: String,
    },
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    pub name: String,

    /// Member cluster id or name; repeat for each member.
    #[arg(long = "cluster", short = 'c', required = true)]
    pub clusters: Vec<String>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Group id or name.
    pub group: String,

    /// New group name.
    #[arg(long)]
    pub name: Option<String>,

    /// The complete new member set; repeat for each member.
    #[arg(long = "cluster", short = 'c', required = true)]
    pub clusters: Vec<String>,
}

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "members")]
    members: String,
    #[tabled(rename = "features")]
    features: String,
}

pub async fn run(app: &App, cmd: GroupCommand) -> Result<ExitCode> {
    match cmd {
        GroupCommand::Create(args) => create(app, args).await,
        GroupCommand::Update(args) => update(app, args).await,
        GroupCommand::Delete { group } => delete(app, &group).await,
        GroupCommand::Get { group, status } => get(app, &group, status).await,
        GroupCommand::List => list(app).await,
        GroupCommand::RemoveCluster { cluster } => remove_cluster(app, &cluster).await,
    }
}

async fn create(app: &App, args: CreateArgs) -> Result<ExitCode> {
    let members = app.cluster_ids(&args.clusters).await?;
    let group = app
        .groups
        .create_group(app.org, &args.name, &members)
        .await
        .with_context(|| format!("failed to create cluster group '{}'", args.name))?;

    if app.json {
        print_json(&group)?;
    } else {
        println!("✓ Created cluster group '{}' (id {})", group.name, group.id);
        print_group(&group);
    }
    Ok(ExitCode::SUCCESS)
}

async fn update(app: &App, args: UpdateArgs) -> Result<ExitCode> {
    let id = app.group_id(&args.group)?;
    let members = app.cluster_ids(&args.clusters).await?;
    let group = app
        .groups
        .update_group(app.org, id, args.name.as_deref(), &members)
        .await
        .with_context(|| format!("failed to update cluster group '{}'", args.group))?;

    let failed = reconcile_failures(app, group.id).await?;
    if app.json {
        print_json(&group)?;
    } else {
        println!("✓ Updated cluster group '{}'", group.name);
        print_group(&group);
        for (feature, error) in &failed {
            eprintln!("{} feature '{feature}' failed to reconcile: {error}", "!".red().bold());
        }
    }
    Ok(exit_code(!failed.is_empty()))
}

async fn delete(app: &App, group: &str) -> Result<ExitCode> {
    let id = app.group_id(group)?;
    app.groups
        .delete_group(app.org, id)
        .await
        .with_context(|| format!("failed to delete cluster group '{group}'"))?;
    if !app.json {
        println!("✓ Deleted cluster group '{group}'");
    }
    Ok(ExitCode::SUCCESS)
}

async fn get(app: &App, group: &str, status: bool) -> Result<ExitCode> {
    let id = app.group_id(group)?;
    let loaded = if status {
        app.groups.get_group_with_status(app.org, id).await
    } else {
        app.groups.get_group(app.org, id).await
    };
    let group = loaded.with_context(|| format!("failed to load cluster group '{group}'"))?;

    if app.json {
        print_json(&group)?;
    } else {
        print_group(&group);
    }
    Ok(ExitCode::SUCCESS)
}

async fn list(app: &App) -> Result<ExitCode> {
    let groups = app
        .groups
        .list_groups(app.org)
        .await
        .context("failed to list cluster groups")?;
    if app.json {
        print_json(&groups)?;
        return Ok(ExitCode::SUCCESS);
    }

    if groups.is_empty() {
        println!("No cluster groups in organization '{}'.", app.org_name);
        println!("Run: flotilla group create <name> --cluster <id|name>");
        return Ok(ExitCode::SUCCESS);
    }
    let rows: Vec<GroupRow> = groups
        .iter()
        .map(|g| GroupRow {
            id: g.id.to_string(),
            name: g.name.clone(),
            members: g
                .members
                .iter()
                .map(|m| m.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            features: g
                .enabled_features
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();
    print_table(rows);
    Ok(ExitCode::SUCCESS)
}

async fn remove_cluster(app: &App, cluster: &str) -> Result<ExitCode> {
    let id = app.cluster_id(cluster).await?;
    let group = app
        .groups
        .remove_cluster_from_group(id)
        .await
        .with_context(|| format!("failed to remove cluster '{cluster}' from its group"))?;

    match group {
        Some(group_id) if !app.json => {
            println!("✓ Removed cluster '{cluster}' from cluster group {group_id}")
        }
        None if !app.json => println!("Cluster '{cluster}' is not in a cluster group."),
        _ => print_json(&serde_json::json!({ "cluster": id, "group": group }))?,
    }
    Ok(ExitCode::SUCCESS)
}

/// Enabled features whose last reconcile failed.
async fn reconcile_failures(app: &App, group: GroupId) -> Result<Vec<(String, String)>> {
    let features = app
        .groups
        .features()
        .list_features(group)
        .await
        .context("failed to read feature state")?;
    Ok(features
        .into_iter()
        .filter(|f| f.enabled)
        .filter_map(|f| f.last_reconcile_error.map(|err| (f.name, err)))
        .collect())
}
