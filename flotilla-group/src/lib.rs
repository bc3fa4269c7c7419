//! Cluster group membership and the feature reconciliation engine.
//!
//! - [`manager`]: [`ClusterGroupManager`], group lifecycle
//! - [`feature`]: [`FeatureHandler`] contract and the [`FeatureManager`] engine
//! - [`members`]: resolving stored membership into [`flotilla_core::ClusterGroup`]
//! - [`error`]: [`ClusterGroupError`], [`FeatureError`]

pub mod error;
pub mod feature;
pub mod manager;
pub mod members;

pub use error::{ClusterGroupError, FeatureError};
pub use feature::{FeatureHandler, FeatureManager};
pub use manager::ClusterGroupManager;
pub use members::resolve_group;
