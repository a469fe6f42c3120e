// `rescan()`'s recovery-account reset path and the standalone
// `reset_recovery_accounts_password` command — recreates every member's
// recovery account in one pass. Ported from
// `modules/adminapi/cluster/cluster_set_status.cc`'s account-repair step.

use crate::accounts::{cleanup_legacy_accounts, rotate_replication_user, RecoveryAccount};
use crate::instance::Instance;

pub struct ResetOutcome {
    pub rotated: Vec<(String, RecoveryAccount)>,
    pub legacy_dropped: Vec<String>,
}

/// Rotates the recovery account for every member in `targets`, using
/// `primary` to issue the `CREATE USER`/`GRANT` statements, then sweeps
/// legacy pre-8.0.27 account names.
pub async fn reset_recovery_accounts(
    primary: &Instance,
    targets: &[Instance],
    allowed_host: &str,
) -> crate::Result<ResetOutcome> {
    let mut rotated = Vec::with_capacity(targets.len());
    for target in targets {
        let account = rotate_replication_user(primary, target, target.server_id(), allowed_host).await?;
        rotated.push((target.uuid().to_string(), account));
    }
    let legacy_dropped = cleanup_legacy_accounts(primary).await?;
    Ok(ResetOutcome { rotated, legacy_dropped })
}
