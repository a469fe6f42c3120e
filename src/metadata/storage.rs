// C3: Metadata Storage — typed CRUD over the catalog schema, wrapping all
// multi-statement changes in a transaction with rollback-on-error and an
// undo log for cross-operation rollback (spec.md §4.3).

use crate::error::AdminError;
use crate::instance::Instance;
use crate::metadata::types::{
    ClusterMetadata, ClusterSetMember, ClusterSetMetadata, ClusterSetView, ClusterTopologyType,
    ClusterType, InstanceMetadata, InstanceType, RouterMetadata,
};
use crate::metadata::undo::UndoLog;
use std::collections::HashMap;

fn sql_quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn opt_quote(s: &Option<String>) -> String {
    match s {
        Some(v) => sql_quote(v),
        None => "NULL".to_string(),
    }
}

fn tags_to_json(tags: &HashMap<String, String>) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "{}".to_string())
}

fn json_to_tags(s: &str) -> HashMap<String, String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn cluster_type_str(t: ClusterType) -> &'static str {
    match t {
        ClusterType::GroupReplication => "GROUP_REPLICATION",
        ClusterType::AsyncReplication => "ASYNC_REPLICATION",
    }
}

fn parse_cluster_type(s: &str) -> ClusterType {
    match s {
        "ASYNC_REPLICATION" => ClusterType::AsyncReplication,
        _ => ClusterType::GroupReplication,
    }
}

fn topology_type_str(t: ClusterTopologyType) -> &'static str {
    match t {
        ClusterTopologyType::SinglePrimary => "SINGLE_PRIMARY",
        ClusterTopologyType::MultiPrimary => "MULTI_PRIMARY",
        ClusterTopologyType::None => "NONE",
    }
}

fn parse_topology_type(s: &str) -> ClusterTopologyType {
    match s {
        "SINGLE_PRIMARY" => ClusterTopologyType::SinglePrimary,
        "MULTI_PRIMARY" => ClusterTopologyType::MultiPrimary,
        _ => ClusterTopologyType::None,
    }
}

fn instance_type_str(t: InstanceType) -> &'static str {
    match t {
        InstanceType::GroupMember => "GROUP_MEMBER",
        InstanceType::AsyncMember => "ASYNC_MEMBER",
        InstanceType::ReadReplica => "READ_REPLICA",
        InstanceType::None => "NONE",
    }
}

fn parse_instance_type(s: &str) -> InstanceType {
    match s {
        "ASYNC_MEMBER" => InstanceType::AsyncMember,
        "READ_REPLICA" => InstanceType::ReadReplica,
        "NONE" => InstanceType::None,
        _ => InstanceType::GroupMember,
    }
}

/// Shared handle to an in-flight transaction's undo log — cloneable so it
/// can be moved into the `body` future alongside the `Instance` while
/// `transaction()` still holds a reference to run it on failure.
#[derive(Clone, Default)]
pub struct UndoHandle(std::sync::Arc<parking_lot::Mutex<UndoLog>>);

impl UndoHandle {
    pub fn record(&self, inverse_sql: impl Into<String>) {
        self.0.lock().record(inverse_sql);
    }

    async fn rollback(&self, instance: &Instance) {
        let log = self.0.lock().clone();
        log.rollback(instance).await;
    }
}

/// Wraps a single Instance that hosts
/// `mysql_innodb_cluster_metadata`. All writes go through `transaction()`.
pub struct MetadataStorage {
    session: Instance,
}

impl MetadataStorage {
    pub fn new(session: Instance) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Instance {
        &self.session
    }

    /// Runs `body`, wrapping it in `BEGIN`/`COMMIT`; any error triggers
    /// `ROLLBACK` before propagating (spec.md §4.3). `body` receives its own
    /// clone of the session and an `UndoHandle` it can record inverse
    /// statements into as it goes.
    pub async fn transaction<F, Fut, T>(&self, body: F) -> crate::Result<T>
    where
        F: FnOnce(Instance, UndoHandle) -> Fut,
        Fut: std::future::Future<Output = crate::Result<T>>,
    {
        self.session.execute("BEGIN").await?;
        let undo = UndoHandle::default();
        match body(self.session.clone(), undo.clone()).await {
            Ok(value) => {
                self.session.execute("COMMIT").await?;
                Ok(value)
            }
            Err(e) => {
                undo.rollback(&self.session).await;
                if let Err(rollback_err) = self.session.execute("ROLLBACK").await {
                    tracing::warn!(target: "metadata::storage", error = %rollback_err, "ROLLBACK failed");
                }
                Err(e)
            }
        }
    }

    // ---- Schema presence ----

    pub async fn check_version(&self) -> crate::Result<Option<(u32, u32, u32)>> {
        let result = self
            .session
            .query("SELECT major, minor, patch FROM mysql_innodb_cluster_metadata.schema_version")
            .await;
        match result {
            Ok(r) => Ok(r.first().map(|row| {
                (
                    row.get("major").and_then(|v| v.as_i64()).unwrap_or(0) as u32,
                    row.get("minor").and_then(|v| v.as_i64()).unwrap_or(0) as u32,
                    row.get("patch").and_then(|v| v.as_i64()).unwrap_or(0) as u32,
                )
            })),
            Err(_) => Ok(None),
        }
    }

    // ---- Clusters ----

    pub async fn insert_cluster(&self, cluster: &ClusterMetadata) -> crate::Result<()> {
        if self.get_cluster(&cluster.cluster_id).await?.is_some() {
            return Err(AdminError::BadArgument(format!(
                "cluster {} already exists",
                cluster.cluster_id
            )));
        }
        let sql = format!(
            "INSERT INTO mysql_innodb_cluster_metadata.clusters \
             (cluster_id, cluster_set_id, cluster_name, cluster_type, topology_type, group_name, attributes, tags) \
             VALUES ({}, {}, {}, {}, {}, {}, {}, {})",
            sql_quote(&cluster.cluster_id),
            opt_quote(&cluster.cluster_set_id),
            sql_quote(&cluster.cluster_name),
            sql_quote(cluster_type_str(cluster.cluster_type.unwrap_or(ClusterType::GroupReplication))),
            sql_quote(topology_type_str(cluster.topology_type)),
            sql_quote(&cluster.group_name),
            sql_quote(&tags_to_json(&cluster.attributes)),
            sql_quote(&tags_to_json(&cluster.tags)),
        );
        self.session.execute(&sql).await
    }

    pub async fn get_cluster(&self, cluster_id: &str) -> crate::Result<Option<ClusterMetadata>> {
        let sql = format!(
            "SELECT cluster_id, cluster_set_id, cluster_name, cluster_type, topology_type, \
             group_name, attributes, tags FROM mysql_innodb_cluster_metadata.clusters \
             WHERE cluster_id = {}",
            sql_quote(cluster_id)
        );
        let result = self.session.query(&sql).await?;
        Ok(result.first().map(row_to_cluster))
    }

    pub async fn remove_cluster(&self, cluster_id: &str) -> crate::Result<()> {
        let sql = format!(
            "DELETE FROM mysql_innodb_cluster_metadata.clusters WHERE cluster_id = {}",
            sql_quote(cluster_id)
        );
        self.session.execute(&sql).await
    }

    pub async fn update_cluster_topology_type(
        &self,
        cluster_id: &str,
        topology_type: ClusterTopologyType,
    ) -> crate::Result<()> {
        let sql = format!(
            "UPDATE mysql_innodb_cluster_metadata.clusters SET topology_type = {} \
             WHERE cluster_id = {}",
            sql_quote(topology_type_str(topology_type)),
            sql_quote(cluster_id)
        );
        self.session.execute(&sql).await
    }

    pub async fn set_cluster_tag(&self, cluster_id: &str, key: &str, value: &str) -> crate::Result<()> {
        let mut cluster = self
            .get_cluster(cluster_id)
            .await?
            .ok_or(AdminError::MetadataMissing)?;
        cluster.tags.insert(key.to_string(), value.to_string());
        let sql = format!(
            "UPDATE mysql_innodb_cluster_metadata.clusters SET tags = {} WHERE cluster_id = {}",
            sql_quote(&tags_to_json(&cluster.tags)),
            sql_quote(cluster_id)
        );
        self.session.execute(&sql).await
    }

    pub async fn unset_cluster_tag(&self, cluster_id: &str, key: &str) -> crate::Result<()> {
        let mut cluster = self
            .get_cluster(cluster_id)
            .await?
            .ok_or(AdminError::MetadataMissing)?;
        cluster.tags.remove(key);
        let sql = format!(
            "UPDATE mysql_innodb_cluster_metadata.clusters SET tags = {} WHERE cluster_id = {}",
            sql_quote(&tags_to_json(&cluster.tags)),
            sql_quote(cluster_id)
        );
        self.session.execute(&sql).await
    }

    // ---- Instances ----

    /// Enforces the §3 uniqueness invariants before writing.
    pub async fn insert_instance(&self, instance: &InstanceMetadata) -> crate::Result<()> {
        let existing = self.get_instances_by_cluster(&instance.cluster_id).await?;
        if existing.iter().any(|i| i.uuid == instance.uuid) {
            return Err(AdminError::DuplicateUuid(instance.uuid.clone()));
        }
        if existing.iter().any(|i| i.endpoint == instance.endpoint) {
            return Err(AdminError::DuplicateAddress(instance.endpoint.clone()));
        }

        let sql = format!(
            "INSERT INTO mysql_innodb_cluster_metadata.instances \
             (cluster_id, uuid, endpoint, xendpoint, grendpoint, server_id, label, \
              hidden_from_router, instance_type, group_name, master_id, master_uuid, \
              primary_master, invalidated, tags) \
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            sql_quote(&instance.cluster_id),
            sql_quote(&instance.uuid),
            sql_quote(&instance.endpoint),
            sql_quote(&instance.xendpoint),
            sql_quote(&instance.grendpoint),
            instance.server_id,
            sql_quote(&instance.label),
            instance.hidden_from_router as i32,
            sql_quote(instance_type_str(instance.instance_type.unwrap_or(InstanceType::GroupMember))),
            sql_quote(&instance.group_name),
            instance.master_id.map(|v| v.to_string()).unwrap_or_else(|| "NULL".into()),
            opt_quote(&instance.master_uuid),
            instance.primary_master as i32,
            instance.invalidated as i32,
            sql_quote(&tags_to_json(&instance.tags)),
        );
        self.session.execute(&sql).await
    }

    pub async fn get_instances_by_cluster(&self, cluster_id: &str) -> crate::Result<Vec<InstanceMetadata>> {
        let sql = format!(
            "SELECT cluster_id, uuid, endpoint, xendpoint, grendpoint, server_id, label, \
             hidden_from_router, instance_type, group_name, master_id, master_uuid, \
             primary_master, invalidated, tags FROM mysql_innodb_cluster_metadata.instances \
             WHERE cluster_id = {}",
            sql_quote(cluster_id)
        );
        let result = self.session.query(&sql).await?;
        Ok(result.rows.iter().map(row_to_instance).collect())
    }

    pub async fn get_instance_by_uuid(&self, uuid: &str) -> crate::Result<Option<InstanceMetadata>> {
        let sql = format!(
            "SELECT cluster_id, uuid, endpoint, xendpoint, grendpoint, server_id, label, \
             hidden_from_router, instance_type, group_name, master_id, master_uuid, \
             primary_master, invalidated, tags FROM mysql_innodb_cluster_metadata.instances \
             WHERE uuid = {}",
            sql_quote(uuid)
        );
        let result = self.session.query(&sql).await?;
        Ok(result.first().map(row_to_instance))
    }

    pub async fn remove_instance(&self, uuid: &str) -> crate::Result<()> {
        let sql = format!(
            "DELETE FROM mysql_innodb_cluster_metadata.instances WHERE uuid = {}",
            sql_quote(uuid)
        );
        self.session.execute(&sql).await
    }

    pub async fn set_instance_invalidated(&self, uuid: &str, invalidated: bool) -> crate::Result<()> {
        let sql = format!(
            "UPDATE mysql_innodb_cluster_metadata.instances SET invalidated = {} WHERE uuid = {}",
            invalidated as i32,
            sql_quote(uuid)
        );
        self.session.execute(&sql).await
    }

    /// At most one primary per SINGLE_PRIMARY cluster: clears every other
    /// member's flag in the same statement set as setting the new one.
    pub async fn set_primary_instance(&self, cluster_id: &str, uuid: &str) -> crate::Result<()> {
        let clear = format!(
            "UPDATE mysql_innodb_cluster_metadata.instances SET primary_master = 0 \
             WHERE cluster_id = {}",
            sql_quote(cluster_id)
        );
        self.session.execute(&clear).await?;
        let set = format!(
            "UPDATE mysql_innodb_cluster_metadata.instances SET primary_master = 1 WHERE uuid = {}",
            sql_quote(uuid)
        );
        self.session.execute(&set).await
    }

    pub async fn set_instance_tag(&self, uuid: &str, key: &str, value: &str) -> crate::Result<()> {
        let mut inst = self
            .get_instance_by_uuid(uuid)
            .await?
            .ok_or(AdminError::MemberMetadataMissing)?;
        inst.tags.insert(key.to_string(), value.to_string());
        let sql = format!(
            "UPDATE mysql_innodb_cluster_metadata.instances SET tags = {} WHERE uuid = {}",
            sql_quote(&tags_to_json(&inst.tags)),
            sql_quote(uuid)
        );
        self.session.execute(&sql).await
    }

    pub async fn unset_instance_tag(&self, uuid: &str, key: &str) -> crate::Result<()> {
        let mut inst = self
            .get_instance_by_uuid(uuid)
            .await?
            .ok_or(AdminError::MemberMetadataMissing)?;
        inst.tags.remove(key);
        let sql = format!(
            "UPDATE mysql_innodb_cluster_metadata.instances SET tags = {} WHERE uuid = {}",
            sql_quote(&tags_to_json(&inst.tags)),
            sql_quote(uuid)
        );
        self.session.execute(&sql).await
    }

    pub async fn update_instance_server_id(&self, uuid: &str, server_id: u32) -> crate::Result<()> {
        let sql = format!(
            "UPDATE mysql_innodb_cluster_metadata.instances SET server_id = {} WHERE uuid = {}",
            server_id,
            sql_quote(uuid)
        );
        self.session.execute(&sql).await
    }

    // ---- Routers ----

    pub async fn insert_router(&self, router: &RouterMetadata) -> crate::Result<()> {
        let sql = format!(
            "INSERT INTO mysql_innodb_cluster_metadata.routers \
             (router_name, hostname, rw_port, ro_port, rw_x_port, ro_x_port, rw_split_port, \
              version, target_cluster, tags) VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            sql_quote(&router.name),
            sql_quote(&router.hostname),
            opt_port(router.rw_port),
            opt_port(router.ro_port),
            opt_port(router.rw_x_port),
            opt_port(router.ro_x_port),
            opt_port(router.rw_split_port),
            opt_quote(&router.version),
            opt_quote(&router.target_cluster),
            sql_quote(&tags_to_json(&router.tags)),
        );
        self.session.execute(&sql).await
    }

    pub async fn update_router_last_checkin(&self, name: &str) -> crate::Result<()> {
        let sql = format!(
            "UPDATE mysql_innodb_cluster_metadata.routers SET last_checkin = NOW() \
             WHERE router_name = {}",
            sql_quote(name)
        );
        self.session.execute(&sql).await
    }

    pub async fn remove_router(&self, name: &str) -> crate::Result<()> {
        let sql = format!(
            "DELETE FROM mysql_innodb_cluster_metadata.routers WHERE router_name = {}",
            sql_quote(name)
        );
        self.session.execute(&sql).await
    }

    // ---- ClusterSet ----

    pub async fn insert_clusterset(&self, cs: &ClusterSetMetadata) -> crate::Result<()> {
        let sql = format!(
            "INSERT INTO mysql_innodb_cluster_metadata.clustersets (cluster_set_id, domain_name) \
             VALUES ({}, {})",
            sql_quote(&cs.cluster_set_id),
            sql_quote(&cs.domain_name),
        );
        self.session.execute(&sql).await
    }

    pub async fn insert_clusterset_member(&self, member: &ClusterSetMember) -> crate::Result<()> {
        let sql = format!(
            "INSERT INTO mysql_innodb_cluster_metadata.clusterset_members \
             (cluster_set_id, cluster_id, master_cluster_id, primary_cluster, invalidated) \
             VALUES ({}, {}, {}, {}, {})",
            sql_quote(&member.cluster_set_id),
            sql_quote(&member.cluster_id),
            sql_quote(&member.master_cluster_id),
            member.primary_cluster as i32,
            member.invalidated as i32,
        );
        self.session.execute(&sql).await
    }

    /// Records the new primary and invalidated list in one transaction —
    /// readers observe either the pre- or post-switch view (spec.md §4.3).
    pub async fn switch_clusterset_primary(
        &self,
        cluster_set_id: &str,
        new_primary_cluster_id: &str,
        invalidate: &[String],
        new_view_id: u64,
    ) -> crate::Result<()> {
        self.transaction(|session, undo| {
            let cluster_set_id = cluster_set_id.to_string();
            let new_primary = new_primary_cluster_id.to_string();
            let invalidate = invalidate.to_vec();
            async move {
                let clear = format!(
                    "UPDATE mysql_innodb_cluster_metadata.clusterset_members SET primary_cluster = 0 \
                     WHERE cluster_set_id = {}",
                    sql_quote(&cluster_set_id)
                );
                session.execute(&clear).await?;
                undo.record(format!(
                    "UPDATE mysql_innodb_cluster_metadata.clusterset_members SET primary_cluster = 1 \
                     WHERE cluster_id = {}",
                    sql_quote(&new_primary)
                ));

                let set = format!(
                    "UPDATE mysql_innodb_cluster_metadata.clusterset_members SET primary_cluster = 1 \
                     WHERE cluster_id = {}",
                    sql_quote(&new_primary)
                );
                session.execute(&set).await?;

                for cluster_id in &invalidate {
                    let inv = format!(
                        "UPDATE mysql_innodb_cluster_metadata.clusterset_members SET invalidated = 1 \
                         WHERE cluster_id = {}",
                        sql_quote(cluster_id)
                    );
                    session.execute(&inv).await?;
                }

                let view = format!(
                    "INSERT INTO mysql_innodb_cluster_metadata.clusterset_views (cluster_set_id, view_id) \
                     VALUES ({}, {})",
                    sql_quote(&cluster_set_id),
                    new_view_id
                );
                session.execute(&view).await
            }
        })
        .await
    }

    pub async fn latest_view(&self, cluster_set_id: &str) -> crate::Result<Option<ClusterSetView>> {
        let sql = format!(
            "SELECT cluster_set_id, view_id FROM mysql_innodb_cluster_metadata.clusterset_views \
             WHERE cluster_set_id = {} ORDER BY view_id DESC LIMIT 1",
            sql_quote(cluster_set_id)
        );
        let result = self.session.query(&sql).await?;
        Ok(result.first().map(|row| ClusterSetView {
            cluster_set_id: row.get("cluster_set_id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            view_id: row.get("view_id").and_then(|v| v.as_i64()).unwrap_or(0) as u64,
        }))
    }

    pub async fn get_clusterset_member(&self, cluster_id: &str) -> crate::Result<Option<ClusterSetMember>> {
        let sql = format!(
            "SELECT cluster_set_id, cluster_id, master_cluster_id, primary_cluster, invalidated \
             FROM mysql_innodb_cluster_metadata.clusterset_members WHERE cluster_id = {}",
            sql_quote(cluster_id)
        );
        let result = self.session.query(&sql).await?;
        Ok(result.first().map(|row| ClusterSetMember {
            cluster_set_id: row.get("cluster_set_id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            cluster_id: row.get("cluster_id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            master_cluster_id: row.get("master_cluster_id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            primary_cluster: row.get("primary_cluster").and_then(|v| v.as_bool()).unwrap_or(false),
            invalidated: row.get("invalidated").and_then(|v| v.as_bool()).unwrap_or(false),
        }))
    }

    /// Drops all rows in `clusterset_members`, `clusterset_views`, and
    /// instances of any other cluster, atomically — used when a cluster is
    /// detached from a ClusterSet and regains independence (spec.md §4.3).
    pub async fn cleanup_for_cluster(&self, cluster_id: &str) -> crate::Result<()> {
        let cluster_id = cluster_id.to_string();
        self.transaction(move |session, _undo| {
            let cluster_id = cluster_id.clone();
            async move {
                session
                    .execute(&format!(
                        "DELETE FROM mysql_innodb_cluster_metadata.clusterset_members \
                         WHERE cluster_id != {}",
                        sql_quote(&cluster_id)
                    ))
                    .await?;
                session
                    .execute("DELETE FROM mysql_innodb_cluster_metadata.clusterset_views")
                    .await?;
                session
                    .execute(&format!(
                        "DELETE FROM mysql_innodb_cluster_metadata.instances WHERE cluster_id != {}",
                        sql_quote(&cluster_id)
                    ))
                    .await?;
                session
                    .execute(&format!(
                        "DELETE FROM mysql_innodb_cluster_metadata.clusters WHERE cluster_id != {}",
                        sql_quote(&cluster_id)
                    ))
                    .await
            }
        })
        .await
    }
}

fn opt_port(p: Option<u16>) -> String {
    p.map(|v| v.to_string()).unwrap_or_else(|| "NULL".into())
}

fn row_to_cluster(row: &HashMap<String, crate::instance::SqlValue>) -> ClusterMetadata {
    ClusterMetadata {
        cluster_id: row.get("cluster_id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        cluster_set_id: row.get("cluster_set_id").and_then(|v| v.as_str()).map(str::to_string),
        cluster_name: row.get("cluster_name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        cluster_type: Some(parse_cluster_type(row.get("cluster_type").and_then(|v| v.as_str()).unwrap_or(""))),
        topology_type: parse_topology_type(row.get("topology_type").and_then(|v| v.as_str()).unwrap_or("")),
        group_name: row.get("group_name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        attributes: row.get("attributes").and_then(|v| v.as_str()).map(json_to_tags).unwrap_or_default(),
        tags: row.get("tags").and_then(|v| v.as_str()).map(json_to_tags).unwrap_or_default(),
    }
}

fn row_to_instance(row: &HashMap<String, crate::instance::SqlValue>) -> InstanceMetadata {
    InstanceMetadata {
        cluster_id: row.get("cluster_id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        instance_id: row.get("instance_id").and_then(|v| v.as_i64()).unwrap_or(0),
        uuid: row.get("uuid").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        endpoint: row.get("endpoint").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        xendpoint: row.get("xendpoint").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        grendpoint: row.get("grendpoint").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        server_id: row.get("server_id").and_then(|v| v.as_i64()).unwrap_or(0) as u32,
        label: row.get("label").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        hidden_from_router: row.get("hidden_from_router").and_then(|v| v.as_bool()).unwrap_or(false),
        tags: row.get("tags").and_then(|v| v.as_str()).map(json_to_tags).unwrap_or_default(),
        instance_type: Some(parse_instance_type(row.get("instance_type").and_then(|v| v.as_str()).unwrap_or(""))),
        group_name: row.get("group_name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        master_id: row.get("master_id").and_then(|v| v.as_i64()),
        master_uuid: row.get("master_uuid").and_then(|v| v.as_str()).map(str::to_string),
        primary_master: row.get("primary_master").and_then(|v| v.as_bool()).unwrap_or(false),
        invalidated: row.get("invalidated").and_then(|v| v.as_bool()).unwrap_or(false),
    }
}
