// `switch_to_single_primary_mode` / `switch_to_multi_primary_mode` —
// reconfigures group mode and the matching auto-increment settings, then
// updates cluster metadata to match. Ported from
// `modules/adminapi/cluster/switch_to_single_primary_mode.cc` and its
// multi-primary counterpart.

use crate::command::Command;
use crate::instance::Instance;
use crate::metadata::{ClusterMetadata, ClusterTopologyType, MetadataStorage};
use async_trait::async_trait;

/// `(auto_increment_increment, auto_increment_offset)` per spec.md §4.7:
/// MULTI_PRIMARY spreads inserts across up to 7 members keyed by
/// `server_id`; SINGLE_PRIMARY always uses the simple `(1, 2)` pair.
pub fn auto_increment_settings(topology: ClusterTopologyType, server_id: u32) -> (u32, u32) {
    match topology {
        ClusterTopologyType::MultiPrimary => (7, 1 + server_id % 7),
        _ => (1, 2),
    }
}

pub struct SwitchTopology<'a> {
    members: &'a [Instance],
    storage: &'a MetadataStorage,
    cluster: ClusterMetadata,
    target: ClusterTopologyType,
    previous: ClusterTopologyType,
}

impl<'a> SwitchTopology<'a> {
    pub fn new(members: &'a [Instance], storage: &'a MetadataStorage, cluster: ClusterMetadata, target: ClusterTopologyType) -> Self {
        let previous = cluster.topology_type;
        Self { members, storage, cluster, target, previous }
    }
}

#[async_trait]
impl<'a> Command for SwitchTopology<'a> {
    async fn prepare(&mut self) -> crate::Result<()> {
        if self.cluster.topology_type == self.target {
            return Err(crate::error::AdminError::BadArgument(
                "cluster is already in the requested topology mode".into(),
            ));
        }
        Ok(())
    }

    async fn execute(&mut self) -> crate::Result<()> {
        let udf = match self.target {
            ClusterTopologyType::MultiPrimary => "group_replication_switch_to_multi_primary_mode",
            _ => "group_replication_switch_to_single_primary_mode",
        };
        for member in self.members {
            member.execute(&format!("SELECT {udf}()")).await?;
            let (increment, offset) = auto_increment_settings(self.target, member.server_id());
            member.set_sysvar("auto_increment_increment", &increment.to_string(), true).await?;
            member.set_sysvar("auto_increment_offset", &offset.to_string(), true).await?;
        }
        self.storage
            .update_cluster_topology_type(&self.cluster.cluster_id, self.target)
            .await
    }

    async fn rollback(&mut self) {
        for member in self.members {
            let (increment, offset) = auto_increment_settings(self.previous, member.server_id());
            if let Err(e) = member.set_sysvar("auto_increment_increment", &increment.to_string(), true).await {
                tracing::warn!(target: "ops::switch_topology", error = %e, "failed to restore auto_increment_increment");
            }
            if let Err(e) = member.set_sysvar("auto_increment_offset", &offset.to_string(), true).await {
                tracing::warn!(target: "ops::switch_topology", error = %e, "failed to restore auto_increment_offset");
            }
        }
    }

    async fn finish(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_primary_spreads_offset_across_seven_members() {
        assert_eq!(auto_increment_settings(ClusterTopologyType::MultiPrimary, 0), (7, 1));
        assert_eq!(auto_increment_settings(ClusterTopologyType::MultiPrimary, 7), (7, 1));
        assert_eq!(auto_increment_settings(ClusterTopologyType::MultiPrimary, 8), (7, 2));
    }

    #[test]
    fn single_primary_always_uses_fixed_pair() {
        assert_eq!(auto_increment_settings(ClusterTopologyType::SinglePrimary, 99), (1, 2));
    }
}
