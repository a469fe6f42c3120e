// Async (source/replica) replication channel helpers, ported from
// `mysqlshdk/libs/mysql/async_replication.cc`. Used both for ClusterSet
// inter-cluster replication and GR's own recovery channel.

use crate::accounts::RecoveryAccount;
use crate::instance::Instance;

/// `CHANGE MASTER TO ... FOR CHANNEL '<channel>'`, using
/// `MASTER_AUTO_POSITION = 1` as the original always does for GR-adjacent
/// channels (spec.md §4.8 / §6).
pub async fn change_master_to(
    target: &Instance,
    account: &RecoveryAccount,
    channel: &str,
) -> crate::Result<()> {
    let sql = format!(
        "CHANGE MASTER TO MASTER_USER = '{}', MASTER_PASSWORD = '{}', MASTER_AUTO_POSITION = 1 \
         FOR CHANNEL '{channel}'",
        account.user, account.password,
    );
    target.execute(&sql).await
}

/// `CHANGE MASTER TO MASTER_HOST = ..., MASTER_PORT = ...` pointed at a new
/// source, preserving the existing credentials — used when a ClusterSet's
/// primary cluster moves (spec.md §4.8).
pub async fn redirect_channel(target: &Instance, host: &str, port: u16, channel: &str) -> crate::Result<()> {
    target
        .execute(&format!(
            "CHANGE MASTER TO MASTER_HOST = '{host}', MASTER_PORT = {port}, MASTER_AUTO_POSITION = 1 \
             FOR CHANNEL '{channel}'"
        ))
        .await
}

pub async fn start_channel(target: &Instance, channel: &str) -> crate::Result<()> {
    target
        .execute(&format!("START SLAVE FOR CHANNEL '{channel}'"))
        .await
}

pub async fn stop_channel(target: &Instance, channel: &str) -> crate::Result<()> {
    target
        .execute(&format!("STOP SLAVE FOR CHANNEL '{channel}'"))
        .await
}

/// `true` once `performance_schema.replication_connection_status` reports
/// the channel's I/O and SQL threads both running.
pub async fn channel_is_running(target: &Instance, channel: &str) -> crate::Result<bool> {
    let sql = format!(
        "SELECT SERVICE_STATE FROM performance_schema.replication_connection_status \
         WHERE CHANNEL_NAME = '{channel}'"
    );
    let result = target.query(&sql).await?;
    Ok(result
        .first()
        .and_then(|row| row.get("SERVICE_STATE"))
        .and_then(|v| v.as_str())
        .map(|s| s.eq_ignore_ascii_case("ON"))
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::test_support::MockSession;
    use std::sync::Arc;

    fn instance() -> Instance {
        let session = Arc::new(MockSession::default());
        Instance::new(session, "u".into(), 1, "8.0.34".into())
    }

    #[tokio::test]
    async fn change_master_to_issues_auto_position_channel_statement() {
        let target = instance();
        let account = RecoveryAccount {
            user: "mysql_innodb_cluster_1".into(),
            host: "%".into(),
            password: "secret".into(),
        };
        assert!(change_master_to(&target, &account, "group_replication_recovery").await.is_ok());
    }

    #[tokio::test]
    async fn channel_is_running_defaults_false_without_a_row() {
        let target = instance();
        assert!(!channel_is_running(&target, "group_replication_recovery").await.unwrap());
    }
}
