// C2: Instance Pool — caches Instances keyed by endpoint/UUID; resolves
// PRIMARY, SECONDARY, or any-member given a group identifier. Grounded on
// `modules/adminapi/common/instance_pool.{h,cc}`.

use crate::config::AuthOptions;
use crate::error::AdminError;
use crate::instance::{ConnectionOptions, Instance, PoolReturn, SessionFactory, SqlSession};
use crate::metadata::types::{ClusterMetadata, InstanceMetadata};
use crate::topology::{self, MemberRole, MemberState};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Eagerly pulled on `set_metadata`; refreshed only on explicit request
/// (spec.md §4.2 "Metadata Cache").
#[derive(Debug, Clone, Default)]
pub struct MetadataCache {
    pub instances: Vec<InstanceMetadata>,
    pub clusters: Vec<ClusterMetadata>,
}

impl MetadataCache {
    pub fn endpoint_for_uuid(&self, uuid: &str) -> Option<&str> {
        self.instances
            .iter()
            .find(|i| i.uuid == uuid)
            .map(|i| i.endpoint.as_str())
    }

    pub fn instance_with_uuid(&self, uuid: &str) -> Option<&InstanceMetadata> {
        self.instances.iter().find(|i| i.uuid == uuid)
    }

    pub fn members_of_group(&self, group_name: &str) -> Vec<&InstanceMetadata> {
        self.instances.iter().filter(|i| i.group_name == group_name).collect()
    }

    pub fn cluster(&self, cluster_id: &str) -> Option<&ClusterMetadata> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }
}

struct PoolEntry {
    instance: Instance,
    leased: bool,
}

struct PoolInner {
    entries: Mutex<Vec<PoolEntry>>,
    metadata: Mutex<Option<MetadataCache>>,
    default_auth: Mutex<AuthOptions>,
    recent_primaries: Mutex<HashSet<String>>,
    factory: Arc<dyn SessionFactory>,
    #[allow(dead_code)]
    allow_password_prompt: bool,
}

/// A per-command scoped singleton (spec.md §5): caches Instances, resolves
/// topology roles, and releases everything it still owns when dropped.
#[derive(Clone)]
pub struct InstancePool(Arc<PoolInner>);

impl PoolReturn for PoolInner {
    fn return_instance(&self, uuid: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.instance.uuid() == uuid) {
            entry.leased = false;
        }
    }
}

impl InstancePool {
    pub fn new(factory: Arc<dyn SessionFactory>, allow_password_prompt: bool) -> Self {
        Self(Arc::new(PoolInner {
            entries: Mutex::new(Vec::new()),
            metadata: Mutex::new(None),
            default_auth: Mutex::new(AuthOptions::default()),
            recent_primaries: Mutex::new(HashSet::new()),
            factory,
            allow_password_prompt,
        }))
    }

    pub fn set_default_auth_options(&self, auth: AuthOptions) {
        *self.0.default_auth.lock().unwrap() = auth;
    }

    pub fn set_metadata(&self, cache: MetadataCache) {
        *self.0.metadata.lock().unwrap() = Some(cache);
    }

    pub fn refresh_metadata_cache(&self, cache: MetadataCache) {
        self.set_metadata(cache);
    }

    fn with_auth(&self, opts: &ConnectionOptions) -> crate::Result<ConnectionOptions> {
        let mut opts = opts.clone();
        if opts.user.is_none() {
            let default = self.0.default_auth.lock().unwrap();
            if let Some(user) = default.user.clone() {
                opts.user = Some(user);
                opts.password = default.password.clone();
            } else {
                return Err(AdminError::MissingAuth);
            }
        }
        Ok(opts)
    }

    /// Registers an externally created Instance as leased (spec.md §4.2
    /// `adopt`).
    pub fn adopt(&self, instance: Instance) -> Instance {
        instance.set_owner(self.0.clone());
        instance.set_session_factory(self.0.factory.clone());
        let mut entries = self.0.entries.lock().unwrap();
        entries.push(PoolEntry { instance: instance.clone(), leased: true });
        instance
    }

    /// Opens a raw session, reusing a matching non-leased entry if present.
    pub async fn connect_unchecked(&self, opts: &ConnectionOptions) -> crate::Result<Instance> {
        let opts = self.with_auth(opts)?;
        let endpoint = opts.endpoint();

        {
            let mut entries = self.0.entries.lock().unwrap();
            if let Some(entry) = entries
                .iter_mut()
                .find(|e| !e.leased && e.instance.connection_options().endpoint() == endpoint)
            {
                entry.leased = true;
                return Ok(entry.instance.clone());
            }
        }

        let session = self
            .0
            .factory
            .connect(&opts)
            .await
            .map_err(AdminError::from)?;
        let uuid = session.query("SELECT @@server_uuid AS v").await;
        let uuid = match uuid {
            Ok(r) => r.first().and_then(|row| row.get("v").and_then(|v| v.as_str().map(str::to_owned))).unwrap_or_default(),
            Err(e) => return Err(AdminError::from(e)),
        };
        let server_id = session
            .query("SELECT @@server_id AS v")
            .await
            .ok()
            .and_then(|r| r.first().and_then(|row| row.get("v").and_then(|v| v.as_i64())))
            .unwrap_or(0) as u32;
        let version = session
            .query("SELECT VERSION() AS v")
            .await
            .ok()
            .and_then(|r| r.first().and_then(|row| row.get("v").and_then(|v| v.as_str().map(str::to_owned))))
            .unwrap_or_default();

        let instance = Instance::new(session, uuid, server_id, version);
        instance.set_owner(self.0.clone());
        instance.set_session_factory(self.0.factory.clone());
        self.0.entries.lock().unwrap().push(PoolEntry { instance: instance.clone(), leased: true });
        Ok(instance)
    }

    /// Looks the endpoint up in the metadata cache, then delegates to
    /// `connect_unchecked`. Fails `METADATA_INFO_MISSING` if blank.
    pub async fn connect_unchecked_uuid(&self, uuid: &str) -> crate::Result<Instance> {
        let endpoint = {
            let cache = self.0.metadata.lock().unwrap();
            cache
                .as_ref()
                .and_then(|c| c.endpoint_for_uuid(uuid))
                .map(str::to_owned)
        };
        let endpoint = endpoint.ok_or(AdminError::MetadataInfoMissing)?;
        if endpoint.is_empty() {
            return Err(AdminError::MetadataInfoMissing);
        }
        let (host, port) = split_endpoint(&endpoint)?;
        self.connect_unchecked(&ConnectionOptions { host, port, ..Default::default() }).await
    }

    fn candidates_for_group(&self, group_name: &str) -> Vec<String> {
        self.0
            .metadata
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.members_of_group(group_name).into_iter().map(|i| i.uuid.clone()).collect())
            .unwrap_or_default()
    }

    /// The core routing algorithm (spec.md §4.2). Tries instances that were
    /// recently seen as PRIMARY first, falling back to the rest.
    pub async fn connect_group_primary(&self, group_name: &str) -> crate::Result<Instance> {
        let candidates = self.candidates_for_group(group_name);
        if candidates.is_empty() {
            return Err(AdminError::MetadataMissing);
        }

        let recent: HashSet<String> = self.0.recent_primaries.lock().unwrap().clone();
        let (recent_first, rest): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|uuid| recent.contains(uuid));

        for uuid in recent_first.into_iter().chain(rest) {
            if let Some(instance) = self.try_via(&uuid).await? {
                return Ok(instance);
            }
        }
        Err(AdminError::GroupHasNoPrimary)
    }

    /// `try_via` from spec.md §4.2: resolves whether `uuid` (or whoever it
    /// points to as PRIMARY) is reachable and quorate.
    async fn try_via(&self, uuid: &str) -> crate::Result<Option<Instance>> {
        let instance = match self.connect_unchecked_uuid(uuid).await {
            Ok(i) => i,
            Err(e) if e.is_connection_error() => return Ok(None),
            Err(e) => return Err(e),
        };

        let info = match topology::get_group_information(&instance).await {
            Ok(info) => info,
            Err(e) => {
                instance.release().await;
                if e.is_connection_error() {
                    return Ok(None);
                }
                return Err(e);
            }
        };

        if !info.has_quorum {
            instance.release().await;
            return Err(AdminError::GroupHasNoQuorum);
        }

        match &info.primary_uuid {
            Some(primary) if primary == uuid => {
                self.0.recent_primaries.lock().unwrap().insert(uuid.to_string());
                Ok(Some(instance))
            }
            Some(primary) => {
                self.0.recent_primaries.lock().unwrap().insert(primary.clone());
                instance.release().await;
                Ok(Some(self.connect_unchecked_uuid(primary).await?))
            }
            None => {
                self.0.recent_primaries.lock().unwrap().remove(uuid);
                instance.release().await;
                Ok(None)
            }
        }
    }

    /// Returns any ONLINE non-primary member; fails `GROUP_UNAVAILABLE` if
    /// none, `GROUP_UNREACHABLE` if every socket is dead.
    pub async fn connect_group_secondary(&self, group_name: &str) -> crate::Result<Instance> {
        let candidates = self.candidates_for_group(group_name);
        let mut reachable = 0usize;

        for uuid in candidates {
            let instance = match self.connect_unchecked_uuid(&uuid).await {
                Ok(i) => {
                    reachable += 1;
                    i
                }
                Err(e) if e.is_connection_error() => continue,
                Err(e) => return Err(e),
            };

            match self.check_group_member(&instance, false).await {
                Ok((_, _, _, is_primary)) if !is_primary => return Ok(instance),
                Ok(_) => {
                    instance.release().await;
                }
                Err(_) => {
                    instance.release().await;
                }
            }
        }

        if reachable == 0 {
            Err(AdminError::GroupUnreachable)
        } else {
            Err(AdminError::GroupUnavailable)
        }
    }

    /// Returns any ONLINE or RECOVERING member holding quorum.
    pub async fn connect_group_member(&self, group_name: &str) -> crate::Result<Instance> {
        let candidates = self.candidates_for_group(group_name);
        let mut reachable = 0usize;

        for uuid in candidates {
            let instance = match self.connect_unchecked_uuid(&uuid).await {
                Ok(i) => {
                    reachable += 1;
                    i
                }
                Err(e) if e.is_connection_error() => continue,
                Err(e) => return Err(e),
            };

            if self.check_group_member(&instance, true).await.is_ok() {
                return Ok(instance);
            }
            instance.release().await;
        }

        if reachable == 0 {
            Err(AdminError::GroupUnreachable)
        } else {
            Err(AdminError::GroupUnavailable)
        }
    }

    /// Fails with `GROUP_REPLICATION_NOT_RUNNING`,
    /// `GROUP_MEMBER_NOT_IN_QUORUM`, or `GROUP_MEMBER_NOT_ONLINE`, else
    /// returns `(member_id, group_name, single_primary_mode, is_primary)`.
    pub async fn check_group_member(
        &self,
        instance: &Instance,
        allow_recovering: bool,
    ) -> crate::Result<(String, String, bool, bool)> {
        let group_name = instance.query_string("group_replication_group_name", true).await?;
        if group_name.is_empty() {
            return Err(AdminError::GroupReplicationNotRunning);
        }

        let info = topology::get_group_information(instance).await?;
        if !info.has_quorum {
            return Err(AdminError::GroupMemberNotInQuorum);
        }

        let uuid = instance.uuid().to_string();
        let member = info.members.iter().find(|m| m.uuid == uuid);
        let state_ok = match member {
            Some(m) if m.state == MemberState::Online => true,
            Some(m) if allow_recovering && m.state == MemberState::Recovering => true,
            _ => false,
        };
        if !state_ok {
            return Err(AdminError::GroupMemberNotOnline);
        }

        let is_primary = member.map(|m| m.role == MemberRole::Primary).unwrap_or(false);
        Ok((uuid, group_name, info.single_primary_mode, is_primary))
    }

    /// Returns a session that is a valid (quorum-holding) member of
    /// `instance`'s cluster, using `instance` itself when it already
    /// qualifies.
    pub async fn connect_cluster_member_of(&self, instance: &Instance) -> crate::Result<Instance> {
        if self.check_group_member(instance, true).await.is_ok() {
            instance.retain();
            return Ok(instance.clone());
        }

        let group_name = {
            let cache = self.0.metadata.lock().unwrap();
            cache
                .as_ref()
                .and_then(|c| c.instance_with_uuid(instance.uuid()))
                .map(|i| i.group_name.clone())
        };
        let group_name = group_name.ok_or(AdminError::MemberMetadataMissing)?;
        self.connect_group_member(&group_name).await
    }
}

fn split_endpoint(endpoint: &str) -> crate::Result<(String, u16)> {
    if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| AdminError::BadArgument(format!("invalid endpoint: {endpoint}")))?;
        let port = rest
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| AdminError::BadArgument(format!("invalid endpoint: {endpoint}")))?;
        return Ok((host.to_string(), port));
    }
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| AdminError::BadArgument(format!("invalid endpoint: {endpoint}")))?;
    let port = port
        .parse()
        .map_err(|_| AdminError::BadArgument(format!("invalid endpoint: {endpoint}")))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SqlError;
    use crate::instance::{QueryResult, Row, SqlValue};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSession {
        endpoint: ConnectionOptions,
        uuid: String,
        responses: HashMap<String, QueryResult>,
        fail_connect: bool,
    }

    #[async_trait]
    impl SqlSession for StubSession {
        async fn query(&self, sql: &str) -> std::result::Result<QueryResult, SqlError> {
            if sql.contains("@@server_uuid") {
                let mut row = Row::new();
                row.insert("v".into(), SqlValue::Str(self.uuid.clone()));
                return Ok(QueryResult { rows: vec![row] });
            }
            Ok(self.responses.get(sql).cloned().unwrap_or_default())
        }
        async fn execute(&self, _sql: &str) -> std::result::Result<(), SqlError> {
            Ok(())
        }
        fn connection_options(&self) -> ConnectionOptions {
            self.endpoint.clone()
        }
        async fn close(&self) {}
    }

    fn members_query_result(rows: Vec<(&str, &str, i64, &str, &str)>) -> QueryResult {
        QueryResult {
            rows: rows
                .into_iter()
                .map(|(uuid, host, port, state, role)| {
                    let mut row = Row::new();
                    row.insert("MEMBER_ID".into(), SqlValue::Str(uuid.into()));
                    row.insert("MEMBER_HOST".into(), SqlValue::Str(host.into()));
                    row.insert("MEMBER_PORT".into(), SqlValue::Int(port));
                    row.insert("MEMBER_STATE".into(), SqlValue::Str(state.into()));
                    row.insert("MEMBER_ROLE".into(), SqlValue::Str(role.into()));
                    row
                })
                .collect(),
        }
    }

    struct StubFactory {
        sessions: Mutex<HashMap<String, Arc<StubSession>>>,
        connect_calls: AtomicUsize,
    }

    #[async_trait]
    impl SessionFactory for StubFactory {
        async fn connect(&self, opts: &ConnectionOptions) -> std::result::Result<Arc<dyn SqlSession>, SqlError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            let sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get(&opts.endpoint())
                .cloned()
                .ok_or_else(|| SqlError { code: 2003, sqlstate: "HY000".into(), message: "refused".into() })?;
            if session.fail_connect {
                return Err(SqlError { code: 2003, sqlstate: "HY000".into(), message: "refused".into() });
            }
            Ok(session)
        }
    }

    fn metadata_with_group(group: &str, members: &[(&str, &str)]) -> MetadataCache {
        MetadataCache {
            instances: members
                .iter()
                .map(|(uuid, endpoint)| {
                    let mut im = InstanceMetadata::new("c1", *uuid, *endpoint);
                    im.group_name = group.to_string();
                    im
                })
                .collect(),
            clusters: vec![],
        }
    }

    #[tokio::test]
    async fn connect_group_primary_resolves_via_member_list() {
        let mut resp_a = HashMap::new();
        resp_a.insert(
            "SELECT MEMBER_ID, MEMBER_HOST, MEMBER_PORT, MEMBER_STATE, MEMBER_ROLE FROM performance_schema.replication_group_members".to_string(),
            members_query_result(vec![
                ("uuid-a", "a", 3306, "ONLINE", "PRIMARY"),
                ("uuid-b", "b", 3306, "ONLINE", "SECONDARY"),
            ]),
        );
        let session_a = Arc::new(StubSession {
            endpoint: ConnectionOptions { host: "a".into(), port: 3306, ..Default::default() },
            uuid: "uuid-a".into(),
            responses: resp_a,
            fail_connect: false,
        });

        let mut sessions = HashMap::new();
        sessions.insert("a:3306".to_string(), session_a);
        let factory = Arc::new(StubFactory { sessions: Mutex::new(sessions), connect_calls: AtomicUsize::new(0) });

        let pool = InstancePool::new(factory, false);
        pool.set_default_auth_options(AuthOptions { user: Some("root".into()), password: None, scheme: None });
        pool.set_metadata(metadata_with_group("g1", &[("uuid-a", "a:3306"), ("uuid-b", "b:3306")]));

        let instance = pool.connect_group_primary("g1").await.unwrap();
        assert_eq!(instance.uuid(), "uuid-a");
    }

    #[tokio::test]
    async fn connect_group_primary_fails_without_quorum() {
        let mut resp_a = HashMap::new();
        resp_a.insert(
            "SELECT MEMBER_ID, MEMBER_HOST, MEMBER_PORT, MEMBER_STATE, MEMBER_ROLE FROM performance_schema.replication_group_members".to_string(),
            members_query_result(vec![
                ("uuid-a", "a", 3306, "UNREACHABLE", "SECONDARY"),
                ("uuid-b", "b", 3306, "UNREACHABLE", "PRIMARY"),
            ]),
        );
        let session_a = Arc::new(StubSession {
            endpoint: ConnectionOptions { host: "a".into(), port: 3306, ..Default::default() },
            uuid: "uuid-a".into(),
            responses: resp_a,
            fail_connect: false,
        });
        let mut sessions = HashMap::new();
        sessions.insert("a:3306".to_string(), session_a);
        let factory = Arc::new(StubFactory { sessions: Mutex::new(sessions), connect_calls: AtomicUsize::new(0) });

        let pool = InstancePool::new(factory, false);
        pool.set_default_auth_options(AuthOptions { user: Some("root".into()), password: None, scheme: None });
        pool.set_metadata(metadata_with_group("g1", &[("uuid-a", "a:3306")]));

        let err = pool.connect_group_primary("g1").await.unwrap_err();
        assert!(matches!(err, AdminError::GroupHasNoQuorum));
    }

    #[tokio::test]
    async fn connect_unchecked_uuid_fails_on_blank_endpoint() {
        let factory = Arc::new(StubFactory { sessions: Mutex::new(HashMap::new()), connect_calls: AtomicUsize::new(0) });
        let pool = InstancePool::new(factory, false);
        pool.set_metadata(MetadataCache::default());
        let err = pool.connect_unchecked_uuid("missing-uuid").await.unwrap_err();
        assert!(matches!(err, AdminError::MetadataInfoMissing));
    }

    #[tokio::test]
    async fn connect_unchecked_without_user_fails_missing_auth() {
        let factory = Arc::new(StubFactory { sessions: Mutex::new(HashMap::new()), connect_calls: AtomicUsize::new(0) });
        let pool = InstancePool::new(factory, false);
        let err = pool
            .connect_unchecked(&ConnectionOptions { host: "a".into(), port: 3306, ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::MissingAuth));
    }

    #[test]
    fn split_endpoint_handles_ipv6_brackets() {
        let (host, port) = split_endpoint("[::1]:3306").unwrap();
        assert_eq!(host, "::1");
        assert_eq!(port, 3306);
    }
}
