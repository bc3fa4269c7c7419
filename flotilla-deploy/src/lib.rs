//! # flotilla-deploy
//!
//! The `deployment` feature: one named release replicated across every member
//! of a cluster group.
//!
//! [`DeploymentManager`] drives install/upgrade/sync/delete through a
//! [`ChartInstaller`] ([`HelmCli`] in production) and records desired state in
//! the [`DeploymentLedger`]. [`DeploymentFeature`] plugs the manager into the
//! group feature engine.

pub mod chart;
pub mod error;
pub mod fanout;
pub mod feature;
pub mod helm;
pub mod ledger;
pub mod manager;
pub mod staleness;

pub use chart::{ChartInstaller, ChartRef, Release, ResolvedChart};
pub use error::{DeploymentError, InstallerError};
pub use fanout::FanoutLimits;
pub use feature::DeploymentFeature;
pub use helm::HelmCli;
pub use ledger::{DeploymentLedger, DeploymentRecord};
pub use manager::{
    DeploymentDetails, DeploymentManager, DeploymentSpec, DeploymentStatus, DeploymentSummary,
    TargetClusterStatus,
};
pub use staleness::{is_stale_deployment, DesiredRelease};
