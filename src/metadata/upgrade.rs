// C4: Metadata Schema Upgrade — a crash-safe state machine for moving the
// catalog schema forward a version at a time, grounded on
// `modules/adminapi/upgrade_metadata.cc`'s staged backup/upgrade/cleanup.

use crate::error::AdminError;
use crate::instance::Instance;
use crate::metadata::schema_ddl::{
    self, BACKUP_SCHEMA_NAME, CURRENT_MAJOR, CURRENT_MINOR, CURRENT_PATCH, PREVIOUS_SCHEMA_NAME,
};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub const CURRENT: SchemaVersion = SchemaVersion::new(CURRENT_MAJOR, CURRENT_MINOR, CURRENT_PATCH);
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The upgrade process's crash-recovery state, derived from which schemas
/// and backup-stage markers are present — never stored directly, always
/// recomputed (spec.md §4.4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalState {
    /// No metadata schema at all; install fresh.
    None,
    /// Schema present and already at `SchemaVersion::CURRENT`.
    Ok,
    /// Backup copy exists but no upgrade marker yet — a crash occurred
    /// before the upgrade transaction began.
    SettingUpgradeVersion,
    /// Backup exists and upgrade is in progress.
    Upgrading,
    /// Upgrade transformations finished but backup/previous cleanup hasn't
    /// run yet.
    Done,
    /// Only stale backup/previous artifacts remain; safe to drop them.
    Cleanup,
}

pub struct SchemaProbe {
    pub current_exists: bool,
    pub current_version: Option<SchemaVersion>,
    pub backup_exists: bool,
    pub previous_exists: bool,
    /// The backup schema's `backup_stage` view value — the authoritative
    /// signal the original reads via `SELECT stage FROM …backup_stage`
    /// (spec.md §4.4.4). `None` when the view isn't there to read.
    pub backup_stage: Option<String>,
}

/// Reads live/backup/previous schema presence plus the `backup_stage`
/// marker off `instance`, the inputs `compute_logical_state` needs.
pub async fn probe_schema(instance: &Instance) -> crate::Result<SchemaProbe> {
    let current_exists = schema_exists(instance, schema_ddl::SCHEMA_NAME).await?;
    let backup_exists = schema_exists(instance, BACKUP_SCHEMA_NAME).await?;
    let previous_exists = schema_exists(instance, PREVIOUS_SCHEMA_NAME).await?;

    let current_version = if current_exists {
        read_version(instance, schema_ddl::SCHEMA_NAME).await?
    } else {
        None
    };

    let backup_stage = if backup_exists {
        read_backup_stage(instance).await?
    } else {
        None
    };

    Ok(SchemaProbe {
        current_exists,
        current_version,
        backup_exists,
        previous_exists,
        backup_stage,
    })
}

async fn schema_exists(instance: &Instance, name: &str) -> crate::Result<bool> {
    let sql = format!("SELECT COUNT(*) AS n FROM information_schema.schemata WHERE schema_name = '{name}'");
    let rows = instance.query(&sql).await?;
    Ok(rows.first().and_then(|row| row.get("n")).and_then(|v| v.as_i64()).unwrap_or(0) > 0)
}

async fn read_version(instance: &Instance, schema: &str) -> crate::Result<Option<SchemaVersion>> {
    let sql = format!("SELECT major, minor, patch FROM {schema}.schema_version");
    let rows = instance.query(&sql).await?;
    Ok(rows.first().map(|row| {
        SchemaVersion::new(
            row.get("major").and_then(|v| v.as_i64()).unwrap_or(0) as u32,
            row.get("minor").and_then(|v| v.as_i64()).unwrap_or(0) as u32,
            row.get("patch").and_then(|v| v.as_i64()).unwrap_or(0) as u32,
        )
    }))
}

async fn read_backup_stage(instance: &Instance) -> crate::Result<Option<String>> {
    let sql = format!("SELECT stage FROM {BACKUP_SCHEMA_NAME}.backup_stage");
    let rows = instance.query(&sql).await?;
    Ok(rows.first().and_then(|row| row.get("stage")).and_then(|v| v.as_str()).map(str::to_owned))
}

/// Computes the logical state from the `backup_stage` marker, not from
/// schema presence alone — this is what makes recovery crash-safe: restart
/// at any point and the same inputs produce the same decision (spec.md
/// §4.4.4).
pub fn compute_logical_state(probe: &SchemaProbe) -> LogicalState {
    if !probe.current_exists {
        return LogicalState::None;
    }
    if !probe.backup_exists {
        return LogicalState::Ok;
    }
    match probe.backup_stage.as_deref() {
        Some("SETTING_UPGRADE_VERSION") => LogicalState::SettingUpgradeVersion,
        Some("UPGRADING") => LogicalState::Upgrading,
        Some("DONE") => LogicalState::Done,
        _ => LogicalState::Cleanup,
    }
}

/// One step of a version-to-version transformation, grounded on the
/// original's per-version SQL scripts.
#[async_trait::async_trait]
pub trait BackupHandler: Send + Sync {
    fn from_version(&self) -> SchemaVersion;
    fn to_version(&self) -> SchemaVersion;

    /// Copies the rows this step needs out of the live schema into the
    /// backup schema, before any destructive change.
    async fn backup(&self, instance: &Instance) -> crate::Result<()>;

    /// Applies the DDL/data transformation to the live schema.
    async fn upgrade(&self, instance: &Instance) -> crate::Result<()>;

    /// Reverses `upgrade()` by restoring the live schema's rows from what
    /// `backup` copied out, for recovery out of the `UPGRADING` state
    /// (spec.md §4.4 Recovery; ported from
    /// `metadata_management_mysql.cc::cleanup()`'s backup-restore path).
    async fn restore(&self, instance: &Instance) -> crate::Result<()>;

    /// Drops whatever this step's `backup` created. Deliberately best-effort:
    /// the original tolerates foreign-key loss here (spec.md §9 Open
    /// Question — 1.0.1 upgrade is a documented deviation, see below).
    async fn finish(&self, instance: &Instance) -> crate::Result<()>;
}

/// The 1.0.1 step drops foreign keys on both the live and backup copies of
/// `instances` before altering `cluster_id`'s width; if `finish` fails
/// after `upgrade` succeeds, those FKs are NOT recreated. This mirrors the
/// original behavior exactly rather than "fixing" it, per the decision
/// recorded in DESIGN.md.
pub struct V101BackupHandler;

#[async_trait::async_trait]
impl BackupHandler for V101BackupHandler {
    fn from_version(&self) -> SchemaVersion {
        SchemaVersion::new(1, 0, 1)
    }

    fn to_version(&self) -> SchemaVersion {
        SchemaVersion::new(2, 0, 0)
    }

    async fn backup(&self, instance: &Instance) -> crate::Result<()> {
        instance
            .execute(&format!(
                "CREATE TABLE {BACKUP_SCHEMA_NAME}.instances AS SELECT * FROM mysql_innodb_cluster_metadata.instances"
            ))
            .await?;
        instance
            .execute(&format!(
                "ALTER TABLE {BACKUP_SCHEMA_NAME}.instances DROP FOREIGN KEY IF EXISTS instances_ibfk_1"
            ))
            .await
    }

    async fn upgrade(&self, instance: &Instance) -> crate::Result<()> {
        instance
            .execute("ALTER TABLE mysql_innodb_cluster_metadata.instances DROP FOREIGN KEY IF EXISTS instances_ibfk_1")
            .await?;
        instance
            .execute("ALTER TABLE mysql_innodb_cluster_metadata.instances MODIFY cluster_id VARCHAR(36) NOT NULL")
            .await
    }

    async fn restore(&self, instance: &Instance) -> crate::Result<()> {
        instance
            .execute("DROP TABLE IF EXISTS mysql_innodb_cluster_metadata.instances")
            .await?;
        instance
            .execute(&format!(
                "CREATE TABLE mysql_innodb_cluster_metadata.instances AS SELECT * FROM {BACKUP_SCHEMA_NAME}.instances"
            ))
            .await
    }

    async fn finish(&self, instance: &Instance) -> crate::Result<()> {
        // Intentionally does not recreate the foreign key — see doc comment.
        instance
            .execute(&format!("DROP TABLE IF EXISTS {BACKUP_SCHEMA_NAME}.instances"))
            .await
    }
}

pub struct SchemaUpgrader {
    handlers: BTreeMap<SchemaVersion, Box<dyn BackupHandler>>,
}

impl Default for SchemaUpgrader {
    fn default() -> Self {
        let mut handlers: BTreeMap<SchemaVersion, Box<dyn BackupHandler>> = BTreeMap::new();
        let v101 = V101BackupHandler;
        handlers.insert(v101.from_version(), Box::new(V101BackupHandler));
        Self { handlers }
    }
}

impl SchemaUpgrader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn BackupHandler>) {
        self.handlers.insert(handler.from_version(), handler);
    }

    /// Runs the staged upgrade from `from` to `SchemaVersion::CURRENT` on
    /// `instance`, holding the upgrade advisory lock on it and every
    /// reachable member of `members` for the duration (spec.md §4.4 step 1,
    /// §6). A member that refuses the lock aborts the upgrade; one that's
    /// simply unreachable is skipped, same as the original's "best effort
    /// across the group" locking.
    pub async fn upgrade(&self, instance: &Instance, members: &[Instance], from: SchemaVersion) -> crate::Result<()> {
        if from == SchemaVersion::CURRENT {
            return Ok(());
        }

        let mut locked = Vec::new();
        for member in std::iter::once(instance).chain(members.iter()) {
            match crate::locks::acquire_advisory_lock(
                member,
                crate::locks::UPGRADE_LOCK_NAME,
                Duration::from_secs(crate::locks::UPGRADE_LOCK_TIMEOUT_SECS),
            )
            .await
            {
                Ok(_) => locked.push(member.clone()),
                Err(e) if e.is_connection_error() => {
                    tracing::warn!(target: "metadata::upgrade", uuid = member.uuid(), "member unreachable, skipping upgrade lock");
                }
                Err(e) => {
                    release_upgrade_locks(&locked).await;
                    return Err(e);
                }
            }
        }

        let result = self.run_upgrade_steps(instance, from).await;
        release_upgrade_locks(&locked).await;
        result
    }

    /// The actual staged transformation, run while the upgrade lock is
    /// held. spec.md §4.4:
    /// 1. `SETTING_UPGRADE_VERSION` backup-schema copy
    /// 2. per-step backup/upgrade
    /// 3. `DONE` marker
    /// 4. cleanup of backup/previous schemas
    async fn run_upgrade_steps(&self, instance: &Instance, from: SchemaVersion) -> crate::Result<()> {
        instance
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS {BACKUP_SCHEMA_NAME}"))
            .await?;
        instance
            .execute(&schema_ddl::create_backup_stage_view("SETTING_UPGRADE_VERSION"))
            .await?;

        let mut version = from;
        for (step_from, handler) in self.handlers.range(from..) {
            if *step_from != version {
                continue;
            }
            instance
                .execute(&schema_ddl::create_backup_stage_view("UPGRADING"))
                .await?;
            handler.backup(instance).await?;
            handler.upgrade(instance).await?;
            version = handler.to_version();
        }

        if version != SchemaVersion::CURRENT {
            return Err(AdminError::UpgradeFailed(format!(
                "no upgrade path from {from} to {}",
                SchemaVersion::CURRENT
            )));
        }

        instance
            .execute(&schema_ddl::create_schema_version_view(
                CURRENT_MAJOR,
                CURRENT_MINOR,
                CURRENT_PATCH,
            ))
            .await?;
        instance
            .execute(&schema_ddl::create_backup_stage_view("DONE"))
            .await?;

        self.cleanup(instance, from).await
    }

    /// Drops backup/previous schemas and runs each applied handler's
    /// `finish()`. Safe to call repeatedly (spec.md §4.4 recovery table).
    pub async fn cleanup(&self, instance: &Instance, from: SchemaVersion) -> crate::Result<()> {
        let mut version = from;
        for (step_from, handler) in self.handlers.range(from..) {
            if *step_from != version {
                continue;
            }
            handler.finish(instance).await?;
            version = handler.to_version();
        }
        instance
            .execute(&format!("DROP SCHEMA IF EXISTS {BACKUP_SCHEMA_NAME}"))
            .await?;
        instance
            .execute(&format!("DROP SCHEMA IF EXISTS {PREVIOUS_SCHEMA_NAME}"))
            .await
    }

    /// Restores the live schema from `mysql_innodb_cluster_metadata_bkp`,
    /// undoing whatever step was in progress via the `from`-keyed handler's
    /// `restore()`, resets `schema_version` back to `from`, and drops the
    /// backup (spec.md §4.4 Recovery, `UPGRADING` case).
    pub async fn restore_from_backup(&self, instance: &Instance, from: SchemaVersion) -> crate::Result<()> {
        if let Some(handler) = self.handlers.get(&from) {
            handler.restore(instance).await?;
        }
        instance
            .execute(&schema_ddl::create_schema_version_view(from.major, from.minor, from.patch))
            .await?;
        instance
            .execute(&format!("DROP SCHEMA IF EXISTS {BACKUP_SCHEMA_NAME}"))
            .await?;
        instance
            .execute(&format!("DROP SCHEMA IF EXISTS {PREVIOUS_SCHEMA_NAME}"))
            .await
    }

    /// Recovers from whatever `LogicalState` a prior crashed upgrade left
    /// behind, per spec.md §4.4 Recovery / §4.4.4:
    /// - `SETTING_UPGRADE_VERSION`: no destructive change happened yet —
    ///   restore `schema_version` from backup (abort) and drop backups.
    /// - `UPGRADING`: the schema was mid-transformation — restore it from
    ///   the backup copy and set `schema_version` back to `from`.
    /// - `DONE` / `CLEANUP`: the transformation finished; only cleanup
    ///   remains.
    pub async fn recover(
        &self,
        instance: &Instance,
        state: LogicalState,
        from: SchemaVersion,
    ) -> crate::Result<()> {
        match state {
            LogicalState::None | LogicalState::Ok => Ok(()),
            LogicalState::SettingUpgradeVersion => {
                instance
                    .execute(&schema_ddl::create_schema_version_view(from.major, from.minor, from.patch))
                    .await?;
                instance
                    .execute(&format!("DROP SCHEMA IF EXISTS {BACKUP_SCHEMA_NAME}"))
                    .await?;
                instance
                    .execute(&format!("DROP SCHEMA IF EXISTS {PREVIOUS_SCHEMA_NAME}"))
                    .await
            }
            LogicalState::Upgrading => self.restore_from_backup(instance, from).await,
            LogicalState::Done | LogicalState::Cleanup => self.cleanup(instance, from).await,
        }
    }
}

async fn release_upgrade_locks(locked: &[Instance]) {
    for member in locked {
        if let Err(e) =
            crate::locks::release_advisory_lock(member, crate::locks::UPGRADE_LOCK_NAME).await
        {
            tracing::warn!(target: "metadata::upgrade", uuid = member.uuid(), error = %e, "failed to release upgrade lock");
        }
    }
}
