// Metadata schema DDL (spec.md §6, "bit-exact"). Embedded as SQL string
// constants and applied once by `create_cluster` / the schema upgrade path,
// never through an ORM — grounded on the raw-SQL style throughout
// `mysqlshdk/libs/mysql/group_replication.h`.

pub const CURRENT_MAJOR: u32 = 2;
pub const CURRENT_MINOR: u32 = 1;
pub const CURRENT_PATCH: u32 = 0;

pub const SCHEMA_NAME: &str = "mysql_innodb_cluster_metadata";
pub const BACKUP_SCHEMA_NAME: &str = "mysql_innodb_cluster_metadata_bkp";
pub const PREVIOUS_SCHEMA_NAME: &str = "mysql_innodb_cluster_metadata_previous";

pub const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS mysql_innodb_cluster_metadata";

pub const CREATE_CLUSTERS_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS mysql_innodb_cluster_metadata.clusters (
  cluster_id VARCHAR(36) PRIMARY KEY,
  cluster_set_id VARCHAR(36) NULL,
  cluster_name VARCHAR(256) NOT NULL,
  cluster_type VARCHAR(32) NOT NULL,
  topology_type VARCHAR(32) NOT NULL,
  group_name VARCHAR(36) NOT NULL,
  attributes JSON,
  tags JSON
)";

pub const CREATE_INSTANCES_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS mysql_innodb_cluster_metadata.instances (
  instance_id BIGINT AUTO_INCREMENT PRIMARY KEY,
  cluster_id VARCHAR(36) NOT NULL,
  uuid VARCHAR(36) NOT NULL UNIQUE,
  endpoint VARCHAR(256) NOT NULL UNIQUE,
  xendpoint VARCHAR(256),
  grendpoint VARCHAR(256),
  server_id INT UNSIGNED NOT NULL DEFAULT 0,
  label VARCHAR(256),
  hidden_from_router TINYINT(1) NOT NULL DEFAULT 0,
  instance_type VARCHAR(32) NOT NULL DEFAULT 'GROUP_MEMBER',
  group_name VARCHAR(36),
  master_id BIGINT NULL,
  master_uuid VARCHAR(36) NULL,
  primary_master TINYINT(1) NOT NULL DEFAULT 0,
  invalidated TINYINT(1) NOT NULL DEFAULT 0,
  tags JSON
)";

pub const CREATE_ROUTERS_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS mysql_innodb_cluster_metadata.routers (
  router_id BIGINT AUTO_INCREMENT PRIMARY KEY,
  router_name VARCHAR(256) NOT NULL,
  hostname VARCHAR(256) NOT NULL,
  rw_port INT NULL,
  ro_port INT NULL,
  rw_x_port INT NULL,
  ro_x_port INT NULL,
  rw_split_port INT NULL,
  last_checkin TIMESTAMP NULL,
  version VARCHAR(32) NULL,
  target_cluster VARCHAR(36) NULL,
  tags JSON
)";

pub const CREATE_CLUSTERSET_MEMBERS_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS mysql_innodb_cluster_metadata.clusterset_members (
  cluster_set_id VARCHAR(36) NOT NULL,
  cluster_id VARCHAR(36) NOT NULL PRIMARY KEY,
  master_cluster_id VARCHAR(36) NOT NULL,
  primary_cluster TINYINT(1) NOT NULL DEFAULT 0,
  invalidated TINYINT(1) NOT NULL DEFAULT 0
)";

pub const CREATE_CLUSTERSET_VIEWS_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS mysql_innodb_cluster_metadata.clusterset_views (
  cluster_set_id VARCHAR(36) NOT NULL,
  view_id BIGINT UNSIGNED NOT NULL,
  PRIMARY KEY (cluster_set_id, view_id)
)";

pub fn create_schema_version_view(major: u32, minor: u32, patch: u32) -> String {
    format!(
        "CREATE OR REPLACE SQL SECURITY INVOKER VIEW mysql_innodb_cluster_metadata.schema_version \
         (major, minor, patch) AS SELECT {major}, {minor}, {patch}"
    )
}

pub fn create_backup_stage_view(stage: &str) -> String {
    format!(
        "CREATE OR REPLACE SQL SECURITY INVOKER VIEW {BACKUP_SCHEMA_NAME}.backup_stage \
         (stage) AS SELECT '{stage}'"
    )
}

/// All DDL needed to stand up a fresh metadata schema at the current
/// version, in execution order.
pub fn install_statements() -> Vec<String> {
    vec![
        CREATE_SCHEMA.to_string(),
        CREATE_CLUSTERS_TABLE.to_string(),
        CREATE_INSTANCES_TABLE.to_string(),
        CREATE_ROUTERS_TABLE.to_string(),
        CREATE_CLUSTERSET_MEMBERS_TABLE.to_string(),
        CREATE_CLUSTERSET_VIEWS_TABLE.to_string(),
        create_schema_version_view(CURRENT_MAJOR, CURRENT_MINOR, CURRENT_PATCH),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_statements_creates_schema_before_tables() {
        let stmts = install_statements();
        assert_eq!(stmts[0], CREATE_SCHEMA);
        assert!(stmts.iter().any(|s| s.contains("clusters")));
        assert!(stmts.iter().any(|s| s.contains("schema_version")));
    }

    #[test]
    fn schema_version_view_embeds_literal_triple() {
        let sql = create_schema_version_view(2, 1, 0);
        assert!(sql.contains("SELECT 2, 1, 0"));
    }
}
