//! Resolving stored membership rows into [`ClusterGroup`] views.

use flotilla_core::{ClusterGroup, ClusterHandle, ClusterRegistry, ClusterStatus, GroupRecord, Member};

/// Build the resolved view of `record`.
///
/// Display attributes come from the registry at read time. A member the
/// registry cannot resolve is kept with empty attributes (and `UNKNOWN` status
/// when `with_status`) so a vanished cluster never hides group state.
pub async fn resolve_group(
    clusters: &dyn ClusterRegistry,
    record: &GroupRecord,
    with_status: bool,
) -> ClusterGroup {
    let mut members = Vec::with_capacity(record.members.len());
    for cluster_id in &record.members {
        match clusters.get_cluster_by_id(record.org_id, *cluster_id).await {
            Ok(handle) => members.push(member_from_handle(handle.as_ref(), with_status).await),
            Err(err) => {
                tracing::warn!(
                    group = %record.id,
                    cluster = %cluster_id,
                    error = %err,
                    "member cluster could not be resolved",
                );
                members.push(Member {
                    id: *cluster_id,
                    name: String::new(),
                    cloud: String::new(),
                    distribution: String::new(),
                    status: with_status.then_some(ClusterStatus::Unknown),
                });
            }
        }
    }

    ClusterGroup {
        id: record.id,
        uid: record.uid,
        org_id: record.org_id,
        name: record.name.clone(),
        members,
        enabled_features: record.enabled_features(),
    }
}

pub(crate) async fn member_from_handle(handle: &dyn ClusterHandle, with_status: bool) -> Member {
    let status = if with_status {
        Some(handle.status().await.unwrap_or(ClusterStatus::Unknown))
    } else {
        None
    };
    Member {
        id: handle.id(),
        name: handle.name().to_string(),
        cloud: handle.cloud().to_string(),
        distribution: handle.distribution().to_string(),
        status,
    }
}
