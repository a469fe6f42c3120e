// C8: Replication Account Manager — creates and reconciles the
// `mysql_innodb_cluster_<server_id>` recovery accounts, ported from
// `modules/adminapi/common/accounts.cc` / `api_options.h`'s naming scheme.

use crate::error::AdminError;
use crate::instance::Instance;
use rand::Rng;

const PASSWORD_LEN: usize = 32;
const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const LEGACY_PREFIX: &str = "mysql_innodb_cluster_r";

pub fn recovery_account_name(server_id: u32) -> String {
    format!("mysql_innodb_cluster_{server_id}")
}

fn generate_password() -> String {
    let mut rng = rand::rng();
    (0..PASSWORD_LEN)
        .map(|_| {
            let idx = rng.random_range(0..PASSWORD_ALPHABET.len());
            PASSWORD_ALPHABET[idx] as char
        })
        .collect()
}

/// A freshly minted recovery account. `password` is never logged or stored
/// in metadata in cleartext — only the account name is persisted.
pub struct RecoveryAccount {
    pub user: String,
    pub host: String,
    pub password: String,
}

/// Creates (or replaces) the recovery account for `server_id` on `primary`,
/// granting `REPLICATION SLAVE` scoped to `allowed_host` (spec.md §4.8).
pub async fn create_replication_user(
    primary: &Instance,
    server_id: u32,
    allowed_host: &str,
) -> crate::Result<RecoveryAccount> {
    let user = recovery_account_name(server_id);
    let password = generate_password();

    primary
        .execute(&format!("DROP USER IF EXISTS '{user}'@'{allowed_host}'"))
        .await?;
    primary
        .execute(&format!(
            "CREATE USER '{user}'@'{allowed_host}' IDENTIFIED BY '{password}'"
        ))
        .await?;
    primary
        .execute(&format!(
            "GRANT REPLICATION SLAVE ON *.* TO '{user}'@'{allowed_host}'"
        ))
        .await?;
    primary
        .execute(&format!(
            "GRANT BACKUP_ADMIN ON *.* TO '{user}'@'{allowed_host}'"
        ))
        .await?;

    Ok(RecoveryAccount { user, host: allowed_host.to_string(), password })
}

/// Reissues credentials for an existing recovery account and updates the
/// channel to use them (spec.md §4.8, "reconciliation" path when the
/// channel is stopped).
pub async fn rotate_replication_user(
    primary: &Instance,
    target: &Instance,
    server_id: u32,
    allowed_host: &str,
) -> crate::Result<RecoveryAccount> {
    let account = create_replication_user(primary, server_id, allowed_host).await?;
    crate::async_repl::change_master_to(target, &account, "group_replication_recovery").await?;
    Ok(account)
}

/// The recovery-channel user currently configured on `instance`, read from
/// `performance_schema.replication_connection_configuration`.
pub async fn current_channel_user(instance: &Instance, channel: &str) -> crate::Result<Option<String>> {
    let sql = format!(
        "SELECT USER FROM performance_schema.replication_connection_configuration \
         WHERE CHANNEL_NAME = '{channel}'"
    );
    let result = instance.query(&sql).await?;
    Ok(result
        .first()
        .and_then(|row| row.get("USER"))
        .and_then(|v| v.as_str())
        .map(str::to_string))
}

/// Rescan-time reconciliation: if the channel's configured user doesn't
/// match what `server_id` should be using, and the channel is stopped,
/// recreate the account and reissue `CHANGE MASTER TO`. Never drops the
/// mismatched account outright — only recreates and rewires (spec.md §4.8).
pub async fn reconcile_recovery_account(
    primary: &Instance,
    target: &Instance,
    server_id: u32,
    allowed_host: &str,
    channel: &str,
    channel_running: bool,
) -> crate::Result<Option<RecoveryAccount>> {
    let expected = recovery_account_name(server_id);
    let current = current_channel_user(target, channel).await?;

    if current.as_deref() == Some(expected.as_str()) {
        return Ok(None);
    }
    if channel_running {
        return Err(AdminError::Logic(format!(
            "recovery channel {channel} is running with a stale user; stop it before reconciling"
        )));
    }

    Ok(Some(rotate_replication_user(primary, target, server_id, allowed_host).await?))
}

/// Drops any account matching the pre-8.0.27 `mysql_innodb_cluster_r*`
/// naming scheme, run once when adopting a cluster created by an older
/// version (spec.md §4.8).
pub async fn cleanup_legacy_accounts(primary: &Instance) -> crate::Result<Vec<String>> {
    let sql = format!(
        "SELECT CONCAT(User, '@', Host) AS account FROM mysql.user WHERE User LIKE '{LEGACY_PREFIX}%'"
    );
    let result = primary.query(&sql).await?;
    let mut dropped = Vec::new();
    for row in &result.rows {
        if let Some(account) = row.get("account").and_then(|v| v.as_str()) {
            primary.execute(&format!("DROP USER IF EXISTS {account}")).await?;
            dropped.push(account.to_string());
        }
    }
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::test_support::MockSession;
    use std::sync::Arc;

    fn instance() -> Instance {
        let session = Arc::new(MockSession::default());
        Instance::new(session, "u".into(), 42, "8.0.34".into())
    }

    #[test]
    fn recovery_account_name_embeds_server_id() {
        assert_eq!(recovery_account_name(42), "mysql_innodb_cluster_42");
    }

    #[test]
    fn generated_passwords_are_full_length_and_never_repeat_trivially() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), PASSWORD_LEN);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn create_replication_user_issues_create_and_grants() {
        let primary = instance();
        let account = create_replication_user(&primary, 7, "%").await.unwrap();
        assert_eq!(account.user, "mysql_innodb_cluster_7");
        assert_eq!(account.password.len(), PASSWORD_LEN);
    }

    #[tokio::test]
    async fn reconcile_is_noop_when_user_already_matches() {
        let primary = instance();
        let target = instance();
        // MockSession's default query response is empty, so `current` is
        // `None`, which is treated as a mismatch requiring the channel to
        // be stopped before reconciling.
        let result = reconcile_recovery_account(&primary, &target, 42, "%", "group_replication_recovery", true).await;
        assert!(result.is_err());
    }
}
