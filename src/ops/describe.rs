// `describe()` — a read-only snapshot of cluster topology for display,
// combining metadata with live GR state. Ported from
// `modules/adminapi/cluster/describe.cc`.

use crate::instance::Instance;
use crate::metadata::{ClusterMetadata, InstanceMetadata};
use crate::topology::{get_group_information, GroupInformation};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct InstanceDescription {
    pub uuid: String,
    pub label: String,
    pub endpoint: String,
    pub role: &'static str,
    pub state: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterDescription {
    pub cluster_name: String,
    pub topology_type: &'static str,
    pub instances: Vec<InstanceDescription>,
}

fn state_label(state: crate::topology::MemberState) -> &'static str {
    use crate::topology::MemberState::*;
    match state {
        Online => "ONLINE",
        Recovering => "RECOVERING",
        Offline => "OFFLINE",
        Error => "ERROR",
        Unreachable => "UNREACHABLE",
    }
}

fn topology_label(t: crate::metadata::ClusterTopologyType) -> &'static str {
    use crate::metadata::ClusterTopologyType::*;
    match t {
        SinglePrimary => "SINGLE_PRIMARY",
        MultiPrimary => "MULTI_PRIMARY",
        None => "NONE",
    }
}

pub fn build_description(cluster: &ClusterMetadata, instances: &[InstanceMetadata], group: &GroupInformation) -> ClusterDescription {
    let mut described = Vec::with_capacity(instances.len());
    for inst in instances {
        let live = group.members.iter().find(|m| m.uuid == inst.uuid);
        let (role, state) = match live {
            Some(m) => (
                if m.role == crate::topology::MemberRole::Primary { "PRIMARY" } else { "SECONDARY" },
                state_label(m.state),
            ),
            None => ("SECONDARY", "(MISSING)"),
        };
        described.push(InstanceDescription {
            uuid: inst.uuid.clone(),
            label: inst.label.clone(),
            endpoint: inst.endpoint.clone(),
            role,
            state,
        });
    }
    ClusterDescription {
        cluster_name: cluster.cluster_name.clone(),
        topology_type: topology_label(cluster.topology_type),
        instances: described,
    }
}

pub async fn describe(instance: &Instance, cluster: &ClusterMetadata, members: &[InstanceMetadata]) -> crate::Result<ClusterDescription> {
    let group = get_group_information(instance).await?;
    Ok(build_description(cluster, members, &group))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Member, MemberRole, MemberState};

    #[test]
    fn missing_live_member_is_reported_as_missing() {
        let cluster = ClusterMetadata { cluster_name: "c1".into(), ..Default::default() };
        let instances = vec![InstanceMetadata::new("c1", "a", "a:3306")];
        let group = GroupInformation { members: vec![], single_primary_mode: true, has_quorum: false, primary_uuid: None };
        let desc = build_description(&cluster, &instances, &group);
        assert_eq!(desc.instances[0].state, "(MISSING)");
    }

    #[test]
    fn live_primary_is_reported_with_role_and_state() {
        let cluster = ClusterMetadata { cluster_name: "c1".into(), ..Default::default() };
        let instances = vec![InstanceMetadata::new("c1", "a", "a:3306")];
        let group = GroupInformation {
            members: vec![Member { uuid: "a".into(), endpoint: "a:3306".into(), state: MemberState::Online, role: MemberRole::Primary }],
            single_primary_mode: true,
            has_quorum: true,
            primary_uuid: Some("a".into()),
        };
        let desc = build_description(&cluster, &instances, &group);
        assert_eq!(desc.instances[0].role, "PRIMARY");
        assert_eq!(desc.instances[0].state, "ONLINE");
    }
}
