// Metadata data model (spec.md §3), grounded on
// `modules/adminapi/common/metadata_storage.h`'s `Instance_metadata` /
// `Cluster_metadata` / `Cluster_set_member_metadata` / `Router_metadata`.

use std::collections::HashMap;

pub type ClusterId = String;
pub type ClusterSetId = String;
pub type InstanceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClusterType {
    GroupReplication,
    AsyncReplication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterTopologyType {
    SinglePrimary,
    MultiPrimary,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceType {
    GroupMember,
    AsyncMember,
    ReadReplica,
    None,
}

#[derive(Debug, Clone, Default)]
pub struct InstanceMetadata {
    pub cluster_id: ClusterId,
    pub instance_id: InstanceId,
    pub uuid: String,
    pub endpoint: String,
    pub xendpoint: String,
    pub grendpoint: String,
    pub server_id: u32,
    pub label: String,
    pub hidden_from_router: bool,
    pub tags: HashMap<String, String>,
    pub instance_type: Option<InstanceType>,
    pub group_name: String,
    // Async-replication only.
    pub master_id: Option<InstanceId>,
    pub master_uuid: Option<String>,
    pub primary_master: bool,
    pub invalidated: bool,
}

impl InstanceMetadata {
    pub fn new(cluster_id: impl Into<String>, uuid: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            uuid: uuid.into(),
            endpoint: endpoint.into(),
            instance_type: Some(InstanceType::GroupMember),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClusterMetadata {
    pub cluster_id: ClusterId,
    pub cluster_set_id: Option<ClusterSetId>,
    pub cluster_name: String,
    pub cluster_type: Option<ClusterType>,
    pub topology_type: ClusterTopologyType,
    pub group_name: String,
    pub attributes: HashMap<String, String>,
    pub tags: HashMap<String, String>,
}

impl Default for ClusterTopologyType {
    fn default() -> Self {
        ClusterTopologyType::None
    }
}

#[derive(Debug, Clone)]
pub struct ClusterSetMetadata {
    pub cluster_set_id: ClusterSetId,
    pub domain_name: String,
}

#[derive(Debug, Clone)]
pub struct ClusterSetMember {
    pub cluster_set_id: ClusterSetId,
    pub cluster_id: ClusterId,
    pub master_cluster_id: ClusterId,
    pub primary_cluster: bool,
    pub invalidated: bool,
}

#[derive(Debug, Clone)]
pub struct ClusterSetView {
    pub cluster_set_id: ClusterSetId,
    pub view_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RouterMetadata {
    pub name: String,
    pub hostname: String,
    pub rw_port: Option<u16>,
    pub ro_port: Option<u16>,
    pub rw_x_port: Option<u16>,
    pub ro_x_port: Option<u16>,
    pub rw_split_port: Option<u16>,
    pub last_checkin: Option<String>,
    pub version: Option<String>,
    pub target_cluster: Option<String>,
    pub tags: HashMap<String, String>,
}

/// §3 invariant: each `server_uuid` appears in at most one `cluster_id`; at
/// most one SINGLE_PRIMARY member carries `primary_master = true`.
pub fn validate_invariants(
    cluster: &ClusterMetadata,
    instances: &[InstanceMetadata],
) -> crate::Result<()> {
    let mut seen_uuids = std::collections::HashSet::new();
    for inst in instances {
        if !seen_uuids.insert(inst.uuid.clone()) {
            return Err(crate::error::AdminError::DuplicateUuid(inst.uuid.clone()));
        }
    }

    let primaries = instances.iter().filter(|i| i.primary_master).count();
    match cluster.topology_type {
        ClusterTopologyType::SinglePrimary => {
            if primaries > 1 {
                return Err(crate::error::AdminError::Logic(
                    "more than one primary_master in a SINGLE_PRIMARY cluster".into(),
                ));
            }
        }
        ClusterTopologyType::MultiPrimary => {
            if primaries != 0 {
                return Err(crate::error::AdminError::Logic(
                    "MULTI_PRIMARY cluster must have no primary_master flags set".into(),
                ));
            }
        }
        ClusterTopologyType::None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_primary_allows_exactly_one_primary() {
        let cluster = ClusterMetadata {
            topology_type: ClusterTopologyType::SinglePrimary,
            ..Default::default()
        };
        let mut a = InstanceMetadata::new("c1", "uuid-a", "a:3306");
        a.primary_master = true;
        let b = InstanceMetadata::new("c1", "uuid-b", "b:3306");
        assert!(validate_invariants(&cluster, &[a, b]).is_ok());
    }

    #[test]
    fn single_primary_rejects_two_primaries() {
        let cluster = ClusterMetadata {
            topology_type: ClusterTopologyType::SinglePrimary,
            ..Default::default()
        };
        let mut a = InstanceMetadata::new("c1", "uuid-a", "a:3306");
        a.primary_master = true;
        let mut b = InstanceMetadata::new("c1", "uuid-b", "b:3306");
        b.primary_master = true;
        assert!(validate_invariants(&cluster, &[a, b]).is_err());
    }

    #[test]
    fn multi_primary_rejects_any_primary_flag() {
        let cluster = ClusterMetadata {
            topology_type: ClusterTopologyType::MultiPrimary,
            ..Default::default()
        };
        let mut a = InstanceMetadata::new("c1", "uuid-a", "a:3306");
        a.primary_master = true;
        assert!(validate_invariants(&cluster, &[a]).is_err());
    }

    #[test]
    fn duplicate_uuid_is_rejected() {
        let cluster = ClusterMetadata::default();
        let a = InstanceMetadata::new("c1", "uuid-a", "a:3306");
        let b = InstanceMetadata::new("c1", "uuid-a", "b:3306");
        assert!(validate_invariants(&cluster, &[a, b]).is_err());
    }
}
