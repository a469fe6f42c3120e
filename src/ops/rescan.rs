// `rescan()` — reconciles cluster metadata with what Group Replication
// actually reports: members present in GR but missing from metadata
// ("unmanaged"), members in metadata but gone from GR ("obsolete"), and a
// metadata `topology_type` that no longer matches the group's reported
// mode. Ported from `modules/adminapi/cluster/cluster_impl.cc`'s
// `rescan()`.

use crate::metadata::{ClusterMetadata, ClusterTopologyType, InstanceMetadata, MetadataStorage};
use crate::topology::GroupInformation;

#[derive(Debug, Default)]
pub struct RescanReport {
    /// In GR, not in metadata — an administrator added it outside the API.
    pub unmanaged_members: Vec<String>,
    /// In metadata, not in GR — the member left the group without going
    /// through `remove_instance`.
    pub obsolete_members: Vec<String>,
    /// Metadata said one topology mode, GR reports another.
    pub topology_mismatch: Option<(ClusterTopologyType, bool)>,
}

pub fn diff_membership(metadata: &[InstanceMetadata], group: &GroupInformation) -> RescanReport {
    let mut report = RescanReport::default();

    for member in &group.members {
        if !metadata.iter().any(|m| m.uuid == member.uuid) {
            report.unmanaged_members.push(member.uuid.clone());
        }
    }
    for inst in metadata {
        if !group.members.iter().any(|m| m.uuid == inst.uuid) {
            report.obsolete_members.push(inst.uuid.clone());
        }
    }
    report
}

pub fn diff_topology(cluster: &ClusterMetadata, group: &GroupInformation) -> Option<(ClusterTopologyType, bool)> {
    let metadata_single = cluster.topology_type == ClusterTopologyType::SinglePrimary;
    if metadata_single != group.single_primary_mode {
        Some((cluster.topology_type, group.single_primary_mode))
    } else {
        None
    }
}

/// Removes every obsolete member's metadata row; adopting unmanaged
/// members is left to the caller (it needs an explicit `add_instance`
/// invocation per spec.md §4.7, since it may require provisioning).
pub async fn apply_obsolete_removals(storage: &MetadataStorage, obsolete: &[String]) -> crate::Result<()> {
    for uuid in obsolete {
        storage.remove_instance(uuid).await?;
    }
    Ok(())
}

/// Updates metadata's `topology_type` to match what GR actually reports —
/// used when `rescan()` is invoked with `update_topology_mode = true`.
pub async fn apply_topology_correction(
    storage: &MetadataStorage,
    cluster_id: &str,
    group_single_primary: bool,
) -> crate::Result<()> {
    let corrected = if group_single_primary {
        ClusterTopologyType::SinglePrimary
    } else {
        ClusterTopologyType::MultiPrimary
    };
    storage.update_cluster_topology_type(cluster_id, corrected).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Member, MemberRole, MemberState};

    fn group(members: Vec<Member>, single_primary: bool) -> GroupInformation {
        GroupInformation { members, single_primary_mode: single_primary, has_quorum: true, primary_uuid: None }
    }

    #[test]
    fn diff_membership_finds_unmanaged_and_obsolete() {
        let metadata = vec![InstanceMetadata::new("c1", "a", "a:3306")];
        let group = group(
            vec![Member { uuid: "b".into(), endpoint: "b:3306".into(), state: MemberState::Online, role: MemberRole::Primary }],
            true,
        );
        let report = diff_membership(&metadata, &group);
        assert_eq!(report.unmanaged_members, vec!["b".to_string()]);
        assert_eq!(report.obsolete_members, vec!["a".to_string()]);
    }

    #[test]
    fn diff_topology_reports_mismatch() {
        let cluster = ClusterMetadata { topology_type: ClusterTopologyType::SinglePrimary, ..Default::default() };
        let group = group(vec![], false);
        assert_eq!(diff_topology(&cluster, &group), Some((ClusterTopologyType::SinglePrimary, false)));
    }

    #[test]
    fn diff_topology_is_none_when_modes_agree() {
        let cluster = ClusterMetadata { topology_type: ClusterTopologyType::SinglePrimary, ..Default::default() };
        let group = group(vec![], true);
        assert_eq!(diff_topology(&cluster, &group), None);
    }
}
