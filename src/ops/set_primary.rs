// `set_primary_instance` — moves the PRIMARY role to a different member of
// a SINGLE_PRIMARY group via `group_replication_set_as_primary`, then
// updates metadata to match. Ported from
// `modules/adminapi/cluster/set_primary_instance.cc`.

use crate::async_repl;
use crate::command::{Command, Preconditions};
use crate::error::AdminError;
use crate::instance::Instance;
use crate::metadata::{ClusterMetadata, ClusterTopologyType, MetadataStorage};
use crate::topology::get_group_information;
use async_trait::async_trait;

/// Channel a non-primary ClusterSet member replicates through; GR refuses to
/// elect a new PRIMARY while it's running (spec.md §4.7).
const CLUSTERSET_REPLICATION_CHANNEL: &str = "clusterset_replication";

pub struct SetPrimaryInstance<'a> {
    current_primary: &'a Instance,
    new_primary_uuid: String,
    storage: &'a MetadataStorage,
    cluster: ClusterMetadata,
    previous_primary_uuid: Option<String>,
    channel_stopped: bool,
}

impl<'a> SetPrimaryInstance<'a> {
    pub fn new(current_primary: &'a Instance, new_primary_uuid: impl Into<String>, storage: &'a MetadataStorage, cluster: ClusterMetadata) -> Self {
        Self {
            current_primary,
            new_primary_uuid: new_primary_uuid.into(),
            storage,
            cluster,
            previous_primary_uuid: None,
            channel_stopped: false,
        }
    }
}

#[async_trait]
impl<'a> Command for SetPrimaryInstance<'a> {
    async fn prepare(&mut self) -> crate::Result<()> {
        if self.cluster.topology_type != ClusterTopologyType::SinglePrimary {
            return Err(AdminError::OperationRequiresSinglePrimary);
        }
        let instances = self.storage.get_instances_by_cluster(&self.cluster.cluster_id).await?;
        Preconditions::target_in_cluster(&self.cluster, &instances, &self.new_primary_uuid)?;

        let group = get_group_information(self.current_primary).await?;
        Preconditions::topology_mode_agrees(&self.cluster, &group)?;
        self.previous_primary_uuid = group.primary_uuid;
        Ok(())
    }

    async fn execute(&mut self) -> crate::Result<()> {
        // GR refuses to elect a PRIMARY while a non-primary ClusterSet
        // member's async replication channel is running; stop it first.
        if let Some(member) = self.storage.get_clusterset_member(&self.cluster.cluster_id).await? {
            if !member.primary_cluster {
                async_repl::stop_channel(self.current_primary, CLUSTERSET_REPLICATION_CHANNEL).await?;
                self.channel_stopped = true;
            }
        }

        self.current_primary
            .execute(&format!(
                "SELECT group_replication_set_as_primary('{}')",
                self.new_primary_uuid
            ))
            .await?;
        self.storage
            .set_primary_instance(&self.cluster.cluster_id, &self.new_primary_uuid)
            .await
    }

    async fn rollback(&mut self) {
        if let Some(previous) = self.previous_primary_uuid.clone() {
            if let Err(e) = self
                .current_primary
                .execute(&format!("SELECT group_replication_set_as_primary('{previous}')"))
                .await
            {
                tracing::warn!(target: "ops::set_primary", error = %e, "failed to restore previous primary during rollback");
            }
        }
        if self.channel_stopped {
            if let Err(e) = async_repl::start_channel(self.current_primary, CLUSTERSET_REPLICATION_CHANNEL).await {
                tracing::warn!(target: "ops::set_primary", error = %e, "failed to restart clusterset replication channel during rollback");
            }
        }
    }

    async fn finish(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::test_support::MockSession;
    use std::sync::Arc;

    fn instance() -> Instance {
        let session = Arc::new(MockSession::default());
        Instance::new(session, "p".into(), 1, "8.0.34".into())
    }

    #[tokio::test]
    async fn set_primary_rejects_multi_primary_cluster() {
        let primary = instance();
        let storage = MetadataStorage::new(instance());
        let cluster = ClusterMetadata {
            topology_type: crate::metadata::ClusterTopologyType::MultiPrimary,
            ..Default::default()
        };
        let mut cmd = SetPrimaryInstance::new(&primary, "new-uuid", &storage, cluster);
        assert!(matches!(cmd.prepare().await, Err(AdminError::OperationRequiresSinglePrimary)));
    }

    #[tokio::test]
    async fn execute_stops_async_channel_on_non_primary_clusterset_member() {
        use crate::instance::{QueryResult, SqlValue};
        use std::collections::HashMap;

        let member_sql = "SELECT cluster_set_id, cluster_id, master_cluster_id, primary_cluster, invalidated \
             FROM mysql_innodb_cluster_metadata.clusterset_members WHERE cluster_id = 'c1'";
        let mut row = HashMap::new();
        row.insert("cluster_set_id".to_string(), SqlValue::Str("cs1".into()));
        row.insert("cluster_id".to_string(), SqlValue::Str("c1".into()));
        row.insert("master_cluster_id".to_string(), SqlValue::Str("c0".into()));
        row.insert("primary_cluster".to_string(), SqlValue::Bool(false));
        row.insert("invalidated".to_string(), SqlValue::Bool(false));

        let session = Arc::new(MockSession {
            query_responses: HashMap::from([(member_sql.to_string(), QueryResult { rows: vec![row] })]),
            ..Default::default()
        });
        let primary = Instance::new(session.clone(), "p".into(), 1, "8.0.34".into());
        let storage = MetadataStorage::new(Instance::new(session.clone(), "p".into(), 1, "8.0.34".into()));
        let cluster = ClusterMetadata {
            cluster_id: "c1".into(),
            topology_type: crate::metadata::ClusterTopologyType::SinglePrimary,
            ..Default::default()
        };
        let mut cmd = SetPrimaryInstance::new(&primary, "new-uuid", &storage, cluster);
        assert!(cmd.execute().await.is_ok());
        assert!(cmd.channel_stopped);
        assert!(session
            .queries
            .lock()
            .unwrap()
            .iter()
            .any(|q| q.contains("STOP SLAVE FOR CHANNEL 'clusterset_replication'")));
    }
}
