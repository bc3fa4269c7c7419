//! `flotilla feature ...`: features enabled on a cluster group.

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use flotilla_core::{Feature, ReconcileState};

use crate::app::App;
use crate::output::{exit_code, print_json, print_table};

#[derive(Subcommand, Debug)]
pub enum FeatureCommand {
    /// Enable a feature and reconcile it.
    Enable(PropertiesArgs),

    /// Replace an existing feature's properties and reconcile it.
    Update(PropertiesArgs),

    /// Disable a feature. Its resources are removed on the next reconcile.
    Disable {
        #[command(flatten)]
        target: FeatureTarget,

        /// Reconcile right away instead of on the next pass.
        #[arg(long)]
        reconcile: bool,
    },

    /// Converge a feature on the group's current membership.
    Reconcile(FeatureTarget),

    /// Show one feature.
    Get(FeatureTarget),

    /// List every feature row of a group.
    List {
        /// Group id or name.
        group: String,
    },

    /// Per-member state reported by the feature.
    Status(FeatureTarget),
}

#[derive(Args, Debug)]
pub struct FeatureTarget {
    /// Group id or name.
    pub group: String,

    /// Feature name, e.g. `deployment`.
    pub feature: String,
}

#[derive(Args, Debug)]
pub struct PropertiesArgs {
    #[command(flatten)]
    pub target: FeatureTarget,

    /// Feature properties as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub properties: Option<String>,
}

impl PropertiesArgs {
    fn properties(&self) -> Result<Value> {
        match self.properties.as_deref() {
            None => Ok(Value::Object(Default::default())),
            Some(raw) => serde_json::from_str(raw).context("--properties is not valid JSON"),
        }
    }
}

#[derive(Serialize)]
struct FeatureJson<'a> {
    group: String,
    name: &'a str,
    enabled: bool,
    properties: &'a Value,
    reconcile_state: ReconcileState,
    last_reconcile_error: Option<&'a str>,
}

impl<'a> From<&'a Feature> for FeatureJson<'a> {
    fn from(f: &'a Feature) -> Self {
        Self {
            group: f.group.name.clone(),
            name: &f.name,
            enabled: f.enabled,
            properties: &f.properties,
            reconcile_state: f.reconcile_state,
            last_reconcile_error: f.last_reconcile_error.as_deref(),
        }
    }
}

#[derive(Tabled)]
struct FeatureRow {
    #[tabled(rename = "feature")]
    name: String,
    #[tabled(rename = "enabled")]
    enabled: bool,
    #[tabled(rename = "reconcile")]
    state: String,
    #[tabled(rename = "properties")]
    properties: String,
    #[tabled(rename = "last error")]
    error: String,
}

impl From<&Feature> for FeatureRow {
    fn from(f: &Feature) -> Self {
        Self {
            name: f.name.clone(),
            enabled: f.enabled,
            state: state_label(f.reconcile_state),
            properties: f.properties.to_string(),
            error: f.last_reconcile_error.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
struct MemberStatusRow {
    #[tabled(rename = "cluster")]
    cluster: String,
    #[tabled(rename = "state")]
    state: String,
}

pub async fn run(app: &App, cmd: FeatureCommand) -> Result<ExitCode> {
    match cmd {
        FeatureCommand::Enable(args) => enable_or_update(app, args, true).await,
        FeatureCommand::Update(args) => enable_or_update(app, args, false).await,
        FeatureCommand::Disable { target, reconcile } => disable(app, target, reconcile).await,
        FeatureCommand::Reconcile(target) => reconcile(app, target).await,
        FeatureCommand::Get(target) => get(app, target).await,
        FeatureCommand::List { group } => list(app, &group).await,
        FeatureCommand::Status(target) => status(app, target).await,
    }
}

async fn enable_or_update(app: &App, args: PropertiesArgs, enable: bool) -> Result<ExitCode> {
    let properties = args.properties()?;
    let FeatureTarget { group, feature } = &args.target;
    let id = app.group_id(group)?;
    let features = app.groups.features();
    let result = if enable {
        features.enable_feature(id, feature, properties).await
    } else {
        features.update_feature(id, feature, properties).await
    };
    let verb = if enable { "enable" } else { "update" };
    let feature = result.with_context(|| format!("failed to {verb} feature '{feature}' on '{group}'"))?;
    report_feature(app, &feature)
}

async fn disable(app: &App, target: FeatureTarget, reconcile_now: bool) -> Result<ExitCode> {
    let id = app.group_id(&target.group)?;
    app.groups
        .features()
        .disable_feature(id, &target.feature)
        .await
        .with_context(|| format!("failed to disable feature '{}'", target.feature))?;
    if reconcile_now {
        return reconcile(app, target).await;
    }
    if !app.json {
        println!("✓ Disabled feature '{}' on '{}'", target.feature, target.group);
        println!(
            "Run 'flotilla feature reconcile {} {}' to remove what it manages.",
            target.group, target.feature
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn reconcile(app: &App, target: FeatureTarget) -> Result<ExitCode> {
    let id = app.group_id(&target.group)?;
    let feature = app
        .groups
        .features()
        .reconcile_feature(id, &target.feature)
        .await
        .with_context(|| format!("failed to reconcile feature '{}'", target.feature))?;
    report_feature(app, &feature)
}

async fn get(app: &App, target: FeatureTarget) -> Result<ExitCode> {
    let id = app.group_id(&target.group)?;
    let feature = app
        .groups
        .features()
        .get_feature(id, &target.feature)
        .await
        .with_context(|| format!("failed to load feature '{}'", target.feature))?;
    if app.json {
        print_json(&FeatureJson::from(&feature))?;
    } else {
        print_table(vec![FeatureRow::from(&feature)]);
    }
    Ok(ExitCode::SUCCESS)
}

async fn list(app: &App, group: &str) -> Result<ExitCode> {
    let id = app.group_id(group)?;
    let features = app
        .groups
        .features()
        .list_features(id)
        .await
        .with_context(|| format!("failed to list features of '{group}'"))?;
    if app.json {
        let payload: Vec<FeatureJson> = features.iter().map(FeatureJson::from).collect();
        print_json(&payload)?;
    } else if features.is_empty() {
        println!("No features on '{group}'.");
    } else {
        print_table(features.iter().map(FeatureRow::from).collect());
    }
    Ok(ExitCode::SUCCESS)
}

async fn status(app: &App, target: FeatureTarget) -> Result<ExitCode> {
    let id = app.group_id(&target.group)?;
    let states: BTreeMap<String, String> = app
        .groups
        .features()
        .members_status(id, &target.feature)
        .await
        .with_context(|| format!("failed to read status of feature '{}'", target.feature))?;
    if app.json {
        print_json(&states)?;
    } else {
        let rows = states
            .into_iter()
            .map(|(cluster, state)| MemberStatusRow { cluster, state })
            .collect();
        print_table::<MemberStatusRow>(rows);
    }
    Ok(ExitCode::SUCCESS)
}

fn report_feature(app: &App, feature: &Feature) -> Result<ExitCode> {
    let failed = feature.reconcile_state == ReconcileState::Failed;
    if app.json {
        print_json(&FeatureJson::from(feature))?;
        return Ok(exit_code(failed));
    }
    println!(
        "Feature '{}' on '{}': {} | reconcile {}",
        feature.name,
        feature.group.name,
        if feature.enabled { "enabled" } else { "disabled" },
        state_label(feature.reconcile_state),
    );
    if let Some(err) = &feature.last_reconcile_error {
        eprintln!("{} {err}", "!".red().bold());
    }
    Ok(exit_code(failed))
}

fn state_label(state: ReconcileState) -> String {
    let label = state.to_string();
    match state {
        ReconcileState::Success => label.green().bold().to_string(),
        ReconcileState::Failed => label.red().bold().to_string(),
        ReconcileState::InProgress => label.yellow().bold().to_string(),
        ReconcileState::None => label.bright_black().to_string(),
    }
}
