// Typed snapshot of `performance_schema.replication_group_members`, used by
// both the pool's PRIMARY-resolution algorithm and the topology-changing
// commands. Grounded on `mysqlshdk/libs/mysql/group_replication.h`'s
// `Member` / `Topology_mode`.

use crate::instance::Instance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Online,
    Recovering,
    Offline,
    Error,
    Unreachable,
}

impl MemberState {
    fn from_str(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "ONLINE" => MemberState::Online,
            "RECOVERING" => MemberState::Recovering,
            "OFFLINE" => MemberState::Offline,
            "ERROR" => MemberState::Error,
            _ => MemberState::Unreachable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyMode {
    SinglePrimary,
    MultiPrimary,
    None,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub uuid: String,
    pub endpoint: String,
    pub state: MemberState,
    pub role: MemberRole,
}

#[derive(Debug, Clone)]
pub struct GroupInformation {
    pub members: Vec<Member>,
    pub single_primary_mode: bool,
    pub has_quorum: bool,
    pub primary_uuid: Option<String>,
}

/// Three-state result for "is GR installed/running" (spec.md §9, second
/// Open Question): the original conflated "plugin not installed" with
/// "installed but stopped", a distinction callers actually need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrPluginState {
    NotInstalled,
    InstalledStopped,
    InstalledRunning,
}

/// Reads `SHOW PLUGINS` for `group_replication` plus whether a group name is
/// currently set, to distinguish "plugin not installed" from "installed but
/// stopped" (spec.md §9, second Open Question).
pub async fn read_gr_plugin_state(instance: &Instance) -> crate::Result<GrPluginState> {
    let rows = instance
        .query("SELECT PLUGIN_STATUS AS v FROM information_schema.plugins WHERE PLUGIN_NAME = 'group_replication'")
        .await?;
    let status = rows.first().and_then(|row| row.get("v")).and_then(|v| v.as_str()).map(str::to_owned);
    let Some(status) = status else {
        return Ok(GrPluginState::NotInstalled);
    };
    if !status.eq_ignore_ascii_case("ACTIVE") {
        return Ok(GrPluginState::InstalledStopped);
    }
    let group_name = instance.query_string("group_replication_group_name", true).await?;
    if group_name.is_empty() {
        Ok(GrPluginState::InstalledStopped)
    } else {
        Ok(GrPluginState::InstalledRunning)
    }
}

/// A strict majority of non-UNREACHABLE members, per GR semantics.
pub fn has_quorum(members: &[Member]) -> bool {
    if members.is_empty() {
        return false;
    }
    let reachable = members
        .iter()
        .filter(|m| m.state != MemberState::Unreachable)
        .count();
    reachable * 2 > members.len()
}

/// Reads `performance_schema.replication_group_members` plus
/// `@@group_replication_single_primary_mode` from `instance`.
pub async fn get_group_information(instance: &Instance) -> crate::Result<GroupInformation> {
    let rows = instance
        .query(
            "SELECT MEMBER_ID, MEMBER_HOST, MEMBER_PORT, MEMBER_STATE, MEMBER_ROLE \
             FROM performance_schema.replication_group_members",
        )
        .await?;

    let mut members = Vec::with_capacity(rows.rows.len());
    let mut primary_uuid = None;
    for row in &rows.rows {
        let uuid = row
            .get("MEMBER_ID")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let host = row.get("MEMBER_HOST").and_then(|v| v.as_str()).unwrap_or_default();
        let port = row.get("MEMBER_PORT").and_then(|v| v.as_i64()).unwrap_or(0);
        let state = MemberState::from_str(
            row.get("MEMBER_STATE").and_then(|v| v.as_str()).unwrap_or(""),
        );
        let role_str = row.get("MEMBER_ROLE").and_then(|v| v.as_str()).unwrap_or("");
        let role = if role_str.eq_ignore_ascii_case("PRIMARY") {
            primary_uuid = Some(uuid.clone());
            MemberRole::Primary
        } else {
            MemberRole::Secondary
        };
        members.push(Member {
            uuid,
            endpoint: format!("{host}:{port}"),
            state,
            role,
        });
    }

    let single_primary_mode = instance
        .query_bool("group_replication_single_primary_mode", true)
        .await?;
    let quorum = has_quorum(&members);

    Ok(GroupInformation {
        members,
        single_primary_mode,
        has_quorum: quorum,
        primary_uuid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::test_support::MockSession;
    use crate::instance::{QueryResult, Row, SqlValue};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn member(uuid: &str, state: MemberState, role: MemberRole) -> Member {
        Member { uuid: uuid.into(), endpoint: "h:1".into(), state, role }
    }

    fn instance_with(responses: HashMap<String, QueryResult>) -> Instance {
        let session = Arc::new(MockSession { query_responses: responses, ..Default::default() });
        Instance::new(session, "u".into(), 1, "8.0.34".into())
    }

    fn row_result(column: &str, value: &str) -> QueryResult {
        let mut row = Row::new();
        row.insert(column.into(), SqlValue::Str(value.into()));
        QueryResult { rows: vec![row] }
    }

    #[tokio::test]
    async fn plugin_state_is_not_installed_when_absent_from_plugins_table() {
        let instance = instance_with(HashMap::new());
        assert_eq!(read_gr_plugin_state(&instance).await.unwrap(), GrPluginState::NotInstalled);
    }

    #[tokio::test]
    async fn plugin_state_is_installed_stopped_when_disabled() {
        let mut responses = HashMap::new();
        responses.insert(
            "SELECT PLUGIN_STATUS AS v FROM information_schema.plugins WHERE PLUGIN_NAME = 'group_replication'".to_string(),
            row_result("v", "DISABLED"),
        );
        let instance = instance_with(responses);
        assert_eq!(read_gr_plugin_state(&instance).await.unwrap(), GrPluginState::InstalledStopped);
    }

    #[tokio::test]
    async fn plugin_state_is_installed_running_with_active_plugin_and_group_name() {
        let mut responses = HashMap::new();
        responses.insert(
            "SELECT PLUGIN_STATUS AS v FROM information_schema.plugins WHERE PLUGIN_NAME = 'group_replication'".to_string(),
            row_result("v", "ACTIVE"),
        );
        responses.insert("SELECT @@GLOBAL.group_replication_group_name AS v".to_string(), row_result("v", "grp-1"));
        let instance = instance_with(responses);
        assert_eq!(read_gr_plugin_state(&instance).await.unwrap(), GrPluginState::InstalledRunning);
    }

    #[test]
    fn quorum_requires_strict_majority_of_reachable() {
        let members = vec![
            member("a", MemberState::Online, MemberRole::Primary),
            member("b", MemberState::Online, MemberRole::Secondary),
            member("c", MemberState::Unreachable, MemberRole::Secondary),
        ];
        assert!(has_quorum(&members));
    }

    #[test]
    fn quorum_fails_when_majority_unreachable() {
        let members = vec![
            member("a", MemberState::Unreachable, MemberRole::Primary),
            member("b", MemberState::Unreachable, MemberRole::Secondary),
            member("c", MemberState::Online, MemberRole::Secondary),
        ];
        assert!(!has_quorum(&members));
    }

    #[test]
    fn empty_group_has_no_quorum() {
        assert!(!has_quorum(&[]));
    }
}
