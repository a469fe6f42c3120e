// ClusterSet orchestration — the domain logic layered over
// `metadata::storage`'s CRUD, grounded on
// `modules/adminapi/cluster_set/cluster_set_impl.cc`'s primary-switch and
// view-change machinery.

use crate::error::AdminError;
use crate::metadata::{ClusterSetMetadata, MetadataStorage};

/// Monotonic view identifiers: every topology-changing ClusterSet
/// operation (primary switch, member add/remove) stamps a new, strictly
/// increasing `view_id` so routers can detect a stale cached topology
/// (spec.md §5 ordering guarantees).
pub async fn next_view_id(storage: &MetadataStorage, cluster_set_id: &str) -> crate::Result<u64> {
    Ok(storage
        .latest_view(cluster_set_id)
        .await?
        .map(|v| v.view_id + 1)
        .unwrap_or(1))
}

/// Promotes `new_primary_cluster_id` to PRIMARY within `cluster_set_id`,
/// invalidating every cluster that was not involved in the switch's quorum
/// (spec.md §4.7 "force" semantics are the caller's responsibility — this
/// only persists the outcome already decided upstream).
pub async fn promote_primary(
    storage: &MetadataStorage,
    cluster_set_id: &str,
    new_primary_cluster_id: &str,
    invalidate: &[String],
) -> crate::Result<u64> {
    let view_id = next_view_id(storage, cluster_set_id).await?;
    storage
        .switch_clusterset_primary(cluster_set_id, new_primary_cluster_id, invalidate, view_id)
        .await?;
    Ok(view_id)
}

/// Registers a brand-new ClusterSet rooted at `cluster_id`, which becomes
/// its initial primary cluster.
pub async fn create_clusterset(
    storage: &MetadataStorage,
    cluster_set_id: &str,
    domain_name: &str,
    cluster_id: &str,
) -> crate::Result<()> {
    storage
        .insert_clusterset(&ClusterSetMetadata {
            cluster_set_id: cluster_set_id.to_string(),
            domain_name: domain_name.to_string(),
        })
        .await?;
    storage
        .insert_clusterset_member(&crate::metadata::ClusterSetMember {
            cluster_set_id: cluster_set_id.to_string(),
            cluster_id: cluster_id.to_string(),
            master_cluster_id: cluster_id.to_string(),
            primary_cluster: true,
            invalidated: false,
        })
        .await
}

/// Detaches `cluster_id` from its ClusterSet entirely, dropping all
/// clusterset bookkeeping that doesn't belong to it. Used when a cluster is
/// removed from the set and regains standalone status (spec.md §4.3
/// `cleanup_for_cluster`).
pub async fn detach_cluster(storage: &MetadataStorage, cluster_id: &str) -> crate::Result<()> {
    storage.cleanup_for_cluster(cluster_id).await
}

/// A primary switch may only target a cluster that is both a known member
/// of the set and not already marked invalidated.
pub fn validate_switch_target(
    members: &[crate::metadata::ClusterSetMember],
    target_cluster_id: &str,
) -> crate::Result<()> {
    let target = members.iter().find(|m| m.cluster_id == target_cluster_id);
    match target {
        Some(m) if m.invalidated => Err(AdminError::BadArgument(format!(
            "cluster {target_cluster_id} is invalidated and cannot become primary"
        ))),
        Some(_) => Ok(()),
        None => Err(AdminError::BadArgument(format!(
            "cluster {target_cluster_id} is not a member of this cluster set"
        ))),
    }
}
