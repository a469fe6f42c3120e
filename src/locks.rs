// C5: Global Locks — the FTWRL-based barrier used before any topology
// change that must freeze writes across the whole group, ported from
// `modules/adminapi/common/global_topology_check.cc` and
// `mysqlshdk/libs/mysql/lock_service.h`'s advisory `GET_LOCK` helper.

use crate::error::AdminError;
use crate::instance::Instance;
use crate::util::CancelToken;
use std::time::Duration;

/// Advisory-lock fencing name and default timeout used to serialize
/// concurrent AdminAPI operations against the same cluster (spec.md §4.5).
pub const ADMIN_LOCK_NAME: &str = "AdminAPI_lock";
pub const ADMIN_LOCK_TIMEOUT_SECS: u64 = 1;

/// Fences a metadata schema upgrade against concurrent upgrade attempts from
/// another session, held on the target plus every reachable group member
/// before the backup copy step (spec.md §4.4 step 1, §6).
pub const UPGRADE_LOCK_NAME: &str = "mysql_innodb_cluster_metadata.upgrade_in_progress";
pub const UPGRADE_LOCK_TIMEOUT_SECS: u64 = 1;

/// Finds the member in `uuid`'s role is PRIMARY among `candidates`, or
/// fails with `PrimaryNotAvailable` if the group's reported primary isn't
/// one of the instances the caller is holding open.
pub fn find_primary<'a>(candidates: &'a [Instance], primary_uuid: &str) -> crate::Result<&'a Instance> {
    candidates
        .iter()
        .find(|i| i.uuid() == primary_uuid)
        .ok_or(AdminError::PrimaryNotAvailable)
}

async fn current_gtid_executed(instance: &Instance) -> crate::Result<String> {
    instance.query_string("gtid_executed", true).await
}

/// Blocks until `instance`'s `@@GLOBAL.GTID_EXECUTED` is a superset of
/// `target_gtid_set`, or `timeout` elapses.
pub async fn wait_for_gtid_set(
    instance: &Instance,
    target_gtid_set: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> crate::Result<()> {
    if target_gtid_set.is_empty() {
        return Ok(());
    }
    let target = target_gtid_set.to_string();
    crate::util::wait_for(
        move || {
            let instance = instance.clone();
            let target = target.clone();
            async move {
                let sql = format!("SELECT GTID_SUBSET('{target}', @@GLOBAL.GTID_EXECUTED) AS subset");
                let result = instance.query(&sql).await?;
                Ok(result
                    .first()
                    .and_then(|row| row.get("subset"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false))
            }
        },
        timeout,
        Duration::from_millis(200),
        cancel,
    )
    .await
    .map_err(|e| match e {
        AdminError::GtidSyncTimeout => AdminError::GtidSyncTimeout,
        other => other,
    })
}

/// Pre-syncs every secondary in parallel before the PRIMARY is frozen —
/// a secondary that's already caught up won't need to wait again once the
/// real FTWRL-bounded GTID set is known (spec.md §4.5 step 2).
pub async fn presync_secondaries(
    secondaries: &[Instance],
    target_gtid_set: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> crate::Result<()> {
    let mut set = tokio::task::JoinSet::new();
    for secondary in secondaries {
        let secondary = secondary.clone();
        let target = target_gtid_set.to_string();
        let timeout = timeout;
        let cancel = cancel.clone();
        set.spawn(async move { wait_for_gtid_set(&secondary, &target, timeout, &cancel).await });
    }

    let mut failed = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(_)) => failed.push("secondary".to_string()),
            Err(_) => failed.push("task panicked".to_string()),
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(AdminError::GtidSyncError(failed))
    }
}

/// Holds `FLUSH TABLES WITH READ LOCK` on the PRIMARY plus `LOCK TABLES`
/// on every synced secondary. Released via `release()`; dropping without
/// releasing only logs a warning, since `UNLOCK TABLES` needs an async
/// round-trip a `Drop` impl can't make.
pub struct GlobalLock {
    held: Vec<Instance>,
    released: bool,
}

impl GlobalLock {
    /// Executes the full sequence from spec.md §4.5:
    /// FTWRL on PRIMARY, `super_read_only=1`, `FLUSH BINARY LOGS`, re-read
    /// GTID, then serially sync and lock each secondary in turn.
    pub async fn acquire(
        primary: &Instance,
        secondaries: &[Instance],
        gtid_timeout: Duration,
        cancel: &CancelToken,
    ) -> crate::Result<Self> {
        if !secondaries.is_empty() {
            let presync_target = current_gtid_executed(primary).await?;
            presync_secondaries(secondaries, &presync_target, gtid_timeout, cancel).await?;
        }

        primary.execute("FLUSH TABLES WITH READ LOCK").await?;
        let mut held = vec![primary.clone()];

        if let Err(e) = primary.set_sysvar("super_read_only", "1", true).await {
            release_all(&held).await;
            return Err(e);
        }
        if let Err(e) = primary.execute("FLUSH BINARY LOGS").await {
            release_all(&held).await;
            return Err(e);
        }

        let gtid_set = match current_gtid_executed(primary).await {
            Ok(g) => g,
            Err(e) => {
                release_all(&held).await;
                return Err(e);
            }
        };

        for secondary in secondaries {
            if let Err(e) = wait_for_gtid_set(secondary, &gtid_set, gtid_timeout, cancel).await {
                release_all(&held).await;
                return Err(e);
            }
            if let Err(e) = secondary.execute("FLUSH TABLES WITH READ LOCK").await {
                release_all(&held).await;
                return Err(e);
            }
            held.push(secondary.clone());
        }

        Ok(Self { held, released: false })
    }

    /// Runs `UNLOCK TABLES` on every held session; failures are logged, not
    /// propagated, since the caller is already past the point of no return
    /// on whatever mutation it performed under the lock.
    pub async fn release(mut self) {
        release_all(&self.held).await;
        self.released = true;
    }
}

async fn release_all(held: &[Instance]) {
    for instance in held {
        if let Err(e) = instance.execute("UNLOCK TABLES").await {
            tracing::warn!(target: "locks", uuid = instance.uuid(), error = %e, "UNLOCK TABLES failed");
        }
    }
}

impl Drop for GlobalLock {
    fn drop(&mut self) {
        if !self.released && !self.held.is_empty() {
            tracing::warn!(target: "locks", "GlobalLock dropped without release(); tables remain locked until session close");
        }
    }
}

/// `GET_LOCK(ADMIN_LOCK_NAME, ADMIN_LOCK_TIMEOUT_SECS)` fencing used to
/// serialize concurrent AdminAPI invocations against one cluster.
pub async fn acquire_advisory_lock(instance: &Instance, name: &str, timeout: Duration) -> crate::Result<bool> {
    let sql = format!("SELECT GET_LOCK('{name}', {}) AS acquired", timeout.as_secs());
    let result = instance.query(&sql).await?;
    let acquired = result
        .first()
        .and_then(|row| row.get("acquired"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !acquired {
        return Err(AdminError::LockAcquireFailed(name.to_string()));
    }
    Ok(acquired)
}

pub async fn release_advisory_lock(instance: &Instance, name: &str) -> crate::Result<()> {
    instance
        .execute(&format!("SELECT RELEASE_LOCK('{name}')"))
        .await
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

    #[test]
    fn find_primary_locates_matching_uuid() {
        let a = instance("a");
        let b = instance("b");
        let found = find_primary(&[a, b], "b");
        assert!(found.is_ok());
        assert_eq!(found.unwrap().uuid(), "b");
    }

    #[test]
    fn find_primary_fails_when_primary_not_among_candidates() {
        let a = instance("a");
        let result = find_primary(&[a], "missing");
        assert!(matches!(result, Err(AdminError::PrimaryNotAvailable)));
    }

    #[tokio::test]
    async fn wait_for_gtid_set_short_circuits_on_empty_target() {
        let inst = instance("a");
        let cancel = CancelToken::new();
        let result = wait_for_gtid_set(&inst, "", Duration::from_secs(1), &cancel).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn acquire_global_lock_holds_primary_and_secondaries() {
        let primary = instance("p");
        let secondary = instance("s");
        let cancel = CancelToken::new();
        let lock = GlobalLock::acquire(&primary, &[secondary], Duration::from_millis(50), &cancel).await;
        assert!(lock.is_ok());
        lock.unwrap().release().await;
    }

    #[tokio::test]
    async fn acquire_advisory_lock_fails_when_get_lock_returns_zero() {
        let session = Arc::new(MockSession::default());
        let inst = Instance::new(session, "a".into(), 1, "8.0.34".into());
        // MockSession's default query response is empty, so `acquired`
        // resolves to `false` via `unwrap_or(false)`.
        let result = acquire_advisory_lock(&inst, ADMIN_LOCK_NAME, Duration::from_secs(ADMIN_LOCK_TIMEOUT_SECS)).await;
        assert!(matches!(result, Err(AdminError::LockAcquireFailed(_))));
    }
}
