// `remove_instance` — the one command whose rollback is NOT the generic
// undo-log reversal: removing a member from GR before the metadata delete
// commits would strand it, so here MySQL state changes first and metadata
// follows, with explicit `undo_*` helpers instead of `UndoLog` (spec.md
// §4.7 documented exception). Ported from
// `modules/adminapi/cluster/remove_instance.cc`.

use crate::command::{Command, Preconditions};
use crate::instance::Instance;
use crate::metadata::{ClusterMetadata, InstanceMetadata, MetadataStorage};

pub struct RemoveInstanceOptions {
    pub force: bool,
}

pub struct RemoveInstance<'a> {
    target: &'a Instance,
    storage: &'a MetadataStorage,
    cluster: ClusterMetadata,
    options: RemoveInstanceOptions,
    removed_from_group: bool,
    saved_metadata: Option<InstanceMetadata>,
}

impl<'a> RemoveInstance<'a> {
    pub fn new(target: &'a Instance, storage: &'a MetadataStorage, cluster: ClusterMetadata, options: RemoveInstanceOptions) -> Self {
        Self { target, storage, cluster, options, removed_from_group: false, saved_metadata: None }
    }

    /// Reverses the GR side of an interrupted removal: re-adding the
    /// instance to the group is out of scope here (that's `add_instance`'s
    /// job); this only restores `super_read_only` if we'd set it.
    async fn undo_group_removal(&self) {
        if let Err(e) = self.target.set_sysvar("super_read_only", "0", true).await {
            tracing::warn!(target: "ops::remove_instance", error = %e, "failed to undo super_read_only during rollback");
        }
    }
}

#[async_trait::async_trait]
impl<'a> Command for RemoveInstance<'a> {
    async fn prepare(&mut self) -> crate::Result<()> {
        let instances = self.storage.get_instances_by_cluster(&self.cluster.cluster_id).await?;
        if !self.options.force {
            Preconditions::not_last_member(&instances)?;
        }
        Preconditions::target_in_cluster(&self.cluster, &instances, self.target.uuid())?;
        self.saved_metadata = instances.into_iter().find(|i| i.uuid == self.target.uuid());
        Ok(())
    }

    async fn execute(&mut self) -> crate::Result<()> {
        // MySQL state first: stop GR on the target so it leaves the group
        // cleanly before its metadata row disappears.
        if let Err(e) = self.target.execute("STOP GROUP_REPLICATION").await {
            if !self.options.force {
                return Err(e);
            }
            tracing::warn!(target: "ops::remove_instance", error = %e, "STOP GROUP_REPLICATION failed, continuing due to force");
        }
        self.removed_from_group = true;

        self.storage.remove_instance(self.target.uuid()).await
    }

    async fn rollback(&mut self) {
        if self.removed_from_group {
            self.undo_group_removal().await;
        }
        if let Some(saved) = self.saved_metadata.clone() {
            if let Err(e) = self.storage.insert_instance(&saved).await {
                tracing::warn!(target: "ops::remove_instance", error = %e, "failed to restore instance metadata during rollback");
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

    fn instance(uuid: &str) -> Instance {
        let session = Arc::new(MockSession::default());
        Instance::new(session, uuid.into(), 1, "8.0.34".into())
    }

    #[tokio::test]
    async fn remove_instance_fails_precondition_without_membership() {
        let target = instance("missing");
        let storage = MetadataStorage::new(instance("md"));
        let cluster = ClusterMetadata { cluster_id: "c1".into(), ..Default::default() };
        let mut cmd = RemoveInstance::new(&target, &storage, cluster, RemoveInstanceOptions { force: false });
        assert!(cmd.prepare().await.is_err());
    }
}
