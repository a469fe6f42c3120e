// C6: Command framework — the prepare/execute/rollback/finish lifecycle
// every mutating AdminAPI operation follows, ported from
// `modules/adminapi/common/base_cluster_impl.h`'s `Command` and the
// shared-precondition checks in `modules/adminapi/common/preconditions.cc`.

use crate::error::AdminError;
use crate::instance::Instance;
use crate::metadata::ClusterMetadata;
use crate::topology::{get_group_information, GroupInformation};
use async_trait::async_trait;

/// Uniform lifecycle for a cluster-mutating operation (spec.md §4.6).
/// `finish` always runs, even after a failed `execute`; `rollback` only
/// runs when `execute` itself returned an error.
#[async_trait]
pub trait Command: Send + Sync {
    /// Validates preconditions and gathers what `execute` will need.
    /// Returning `Err` here skips `execute` and `rollback` but still calls
    /// `finish`.
    async fn prepare(&mut self) -> crate::Result<()>;

    /// Performs the mutation. Metadata changes should happen first,
    /// recorded with an undo log, so an error here can be rolled back.
    async fn execute(&mut self) -> crate::Result<()>;

    /// Best-effort reversal of whatever `execute` already committed.
    /// Invoked only when `execute` returns `Err`. Must never panic or
    /// propagate — log and continue.
    async fn rollback(&mut self);

    /// Idempotent cleanup (restoring `super_read_only`, releasing locks).
    /// Always invoked exactly once, regardless of outcome. Must never
    /// throw; log instead.
    async fn finish(&mut self);
}

/// Drives a `Command` through its full lifecycle, matching the ordering the
/// original enforces everywhere it builds one of these (spec.md §4.6).
pub async fn run(mut command: impl Command) -> crate::Result<()> {
    let prepared = command.prepare().await;
    if let Err(e) = prepared {
        command.finish().await;
        return Err(e);
    }

    let result = command.execute().await;
    if result.is_err() {
        command.rollback().await;
    }
    command.finish().await;
    result
}

/// Credentials resolved for a command, falling back to the pool's default
/// auth when the caller didn't specify one explicitly (spec.md §4.1).
#[derive(Debug, Clone, Default)]
pub struct ResolvedAuth {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ResolvedAuth {
    pub fn resolve(explicit: ResolvedAuth, default: &crate::config::AuthOptions) -> crate::Result<Self> {
        if explicit.user.is_some() {
            return Ok(explicit);
        }
        if default.has_user() {
            return Ok(ResolvedAuth {
                user: default.user.clone(),
                password: default.password.clone(),
            });
        }
        Err(AdminError::MissingAuth)
    }
}

/// Shared precondition checks composed into each operation's `prepare`,
/// rather than inherited from a `Base_command` base class (spec.md §4.6
/// "composed, not inherited").
pub struct Preconditions;

impl Preconditions {
    /// Fails with `TargetNotInCluster` unless `uuid` appears in the
    /// cluster's metadata instance list.
    pub fn target_in_cluster(cluster: &ClusterMetadata, instances: &[crate::metadata::InstanceMetadata], uuid: &str) -> crate::Result<()> {
        let _ = cluster;
        if instances.iter().any(|i| i.uuid == uuid) {
            Ok(())
        } else {
            Err(AdminError::TargetNotInCluster)
        }
    }

    /// Fails with `TopologyModeMismatch` unless the metadata's recorded
    /// `topology_type` agrees with what Group Replication itself reports.
    pub fn topology_mode_agrees(cluster: &ClusterMetadata, group: &GroupInformation) -> crate::Result<()> {
        use crate::metadata::ClusterTopologyType;
        let metadata_single = cluster.topology_type == ClusterTopologyType::SinglePrimary;
        if metadata_single != group.single_primary_mode {
            return Err(AdminError::TopologyModeMismatch);
        }
        Ok(())
    }

    /// Fails with `LastMemberCannotRemove` when only one instance remains.
    pub fn not_last_member(instances: &[crate::metadata::InstanceMetadata]) -> crate::Result<()> {
        if instances.len() <= 1 {
            Err(AdminError::LastMemberCannotRemove)
        } else {
            Ok(())
        }
    }

    /// Sets `super_read_only=1` on `instance`, returning a guard that
    /// restores the previous value on drop-equivalent `restore()` — callers
    /// invoke `restore()` from their command's `finish()`.
    pub async fn set_super_read_only(instance: &Instance) -> crate::Result<SuperReadOnlyGuard> {
        let previous = instance.query_bool("super_read_only", true).await?;
        instance.set_sysvar("super_read_only", "1", true).await?;
        Ok(SuperReadOnlyGuard {
            instance: instance.clone(),
            previous,
        })
    }

    pub async fn check_reachable_with_group(instance: &Instance) -> crate::Result<GroupInformation> {
        get_group_information(instance).await
    }
}

/// Restores `super_read_only` to what it was before a command forced it on.
pub struct SuperReadOnlyGuard {
    instance: Instance,
    previous: bool,
}

impl SuperReadOnlyGuard {
    pub async fn restore(self) {
        let value = if self.previous { "1" } else { "0" };
        if let Err(e) = self.instance.set_sysvar("super_read_only", value, true).await {
            tracing::warn!(target: "command", uuid = self.instance.uuid(), error = %e, "failed to restore super_read_only");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::test_support::MockSession;
    use crate::metadata::InstanceMetadata;
    use std::sync::{Arc, Mutex};

    fn instance() -> Instance {
        let session = Arc::new(MockSession::default());
        Instance::new(session, "u".into(), 1, "8.0.34".into())
    }

    struct RecordingCommand {
        log: Arc<Mutex<Vec<&'static str>>>,
        fail_execute: bool,
    }

    #[async_trait]
    impl Command for RecordingCommand {
        async fn prepare(&mut self) -> crate::Result<()> {
            self.log.lock().unwrap().push("prepare");
            Ok(())
        }
        async fn execute(&mut self) -> crate::Result<()> {
            self.log.lock().unwrap().push("execute");
            if self.fail_execute {
                Err(AdminError::Logic("boom".into()))
            } else {
                Ok(())
            }
        }
        async fn rollback(&mut self) {
            self.log.lock().unwrap().push("rollback");
        }
        async fn finish(&mut self) {
            self.log.lock().unwrap().push("finish");
        }
    }

    #[tokio::test]
    async fn successful_command_skips_rollback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cmd = RecordingCommand { log: log.clone(), fail_execute: false };
        assert!(run(cmd).await.is_ok());
        assert_eq!(*log.lock().unwrap(), vec!["prepare", "execute", "finish"]);
    }

    #[tokio::test]
    async fn failed_execute_triggers_rollback_then_finish() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cmd = RecordingCommand { log: log.clone(), fail_execute: true };
        assert!(run(cmd).await.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["prepare", "execute", "rollback", "finish"]);
    }

    #[test]
    fn target_in_cluster_fails_for_unknown_uuid() {
        let cluster = ClusterMetadata::default();
        let instances = vec![InstanceMetadata::new("c1", "uuid-a", "a:3306")];
        assert!(Preconditions::target_in_cluster(&cluster, &instances, "uuid-a").is_ok());
        assert!(matches!(
            Preconditions::target_in_cluster(&cluster, &instances, "uuid-z"),
            Err(AdminError::TargetNotInCluster)
        ));
    }

    #[test]
    fn not_last_member_rejects_single_instance_cluster() {
        let instances = vec![InstanceMetadata::new("c1", "uuid-a", "a:3306")];
        assert!(matches!(
            Preconditions::not_last_member(&instances),
            Err(AdminError::LastMemberCannotRemove)
        ));
    }

    #[tokio::test]
    async fn set_super_read_only_sets_flag_then_restore_resets_it() {
        let inst = instance();
        let guard = Preconditions::set_super_read_only(&inst).await.unwrap();
        guard.restore().await;
    }
}
