//! Flotilla core library: domain types, group persistence, cluster registry,
//! configuration, errors.
//!
//! - [`types`]: newtypes, persisted rows and resolved views
//! - [`error`]: [`StoreError`], [`ClusterRegistryError`], [`ConfigError`]
//! - [`store`]: YAML group repository
//! - [`cluster`]: registry contract + inventory implementation
//! - [`config`]: `config.yaml`
//! - [`paths`]: on-disk layout

pub mod cluster;
pub mod config;
pub mod error;
pub mod paths;
pub mod store;
pub mod types;

pub use cluster::{ClusterHandle, ClusterRegistry, Inventory, InventoryCluster, InventoryRegistry};
pub use config::Config;
pub use error::{ClusterRegistryError, ConfigError, StoreError};
pub use store::GroupStore;
pub use types::{
    ClusterGroup, ClusterId, ClusterStatus, Feature, FeatureRecord, GroupId, GroupRecord, Member,
    MembershipDiff, OrgId, ReconcileState, DEPLOYMENT_FEATURE,
};
