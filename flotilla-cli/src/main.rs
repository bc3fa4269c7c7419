//! Flotilla: cluster groups and multi-cluster releases.
//!
//! # Usage
//!
//! ```text
//! flotilla group create <name> --cluster <id|name>...
//! flotilla group update <group> [--name <new>] --cluster <id|name>...
//! flotilla group delete|get|list ...
//! flotilla group remove-cluster <cluster>
//! flotilla feature enable|update|disable|reconcile|get|list|status ...
//! flotilla deployment create|update|sync|delete|get|list ...
//! flotilla cluster list
//! ```
//!
//! Multi-cluster commands exit with status 2 when any cluster failed.

mod app;
mod commands;
mod output;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use app::App;
use commands::{
    cluster::ClusterCommand, deployment::DeploymentCommand, feature::FeatureCommand,
    group::GroupCommand,
};
use flotilla_core::OrgId;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "flotilla",
    version,
    about = "Group Kubernetes clusters and keep releases converged across them",
    long_about = None,
)]
struct Cli {
    /// Organization the command acts in.
    #[arg(long, global = true, default_value_t = 1)]
    org: u32,

    /// Emit machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Log progress to stderr (`RUST_LOG` takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create, change and inspect cluster groups.
    Group {
        #[command(subcommand)]
        command: GroupCommand,
    },

    /// Manage features enabled on a cluster group.
    Feature {
        #[command(subcommand)]
        command: FeatureCommand,
    },

    /// Manage releases replicated across a cluster group.
    Deployment {
        #[command(subcommand)]
        command: DeploymentCommand,
    },

    /// Inspect the cluster inventory.
    Cluster {
        #[command(subcommand)]
        command: ClusterCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let app = App::open(OrgId(cli.org), cli.json)?;
    match cli.command {
        Commands::Group { command } => commands::group::run(&app, command).await,
        Commands::Feature { command } => commands::feature::run(&app, command).await,
        Commands::Deployment { command } => commands::deployment::run(&app, command).await,
        Commands::Cluster { command } => commands::cluster::run(&app, command).await,
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
