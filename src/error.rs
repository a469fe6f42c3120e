// Error types for the InnoDB cluster admin control plane.
//
// Every variant carries a stable numeric code mirroring the `DBA_*` symbolic
// names used by the admin API this crate re-implements; renaming a variant
// is a breaking change for callers that match on `code()`.

use thiserror::Error;

/// A `(errno, sqlstate, message)` triple surfaced by the SQL session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    pub code: u32,
    pub sqlstate: String,
    pub message: String,
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MySQL error {} ({}): {}", self.code, self.sqlstate, self.message)
    }
}

/// Driver connect-error codes in this inclusive range are treated as
/// "unreachable" rather than propagated, mirroring the original's
/// `CR_MIN_ERROR..CR_MAX_ERROR` window.
pub const CR_MIN_ERROR: u32 = 2000;
pub const CR_MAX_ERROR: u32 = 2999;

impl SqlError {
    pub fn is_connection_error(&self) -> bool {
        (CR_MIN_ERROR..=CR_MAX_ERROR).contains(&self.code)
    }
}

#[derive(Error, Debug, Clone)]
pub enum AdminError {
    // --- Precondition ---
    #[error("target instance is not a member of the cluster")]
    TargetNotInCluster,

    #[error("cluster has only one member, use dissolve() instead")]
    LastMemberCannotRemove,

    #[error("this operation requires a cluster in SINGLE_PRIMARY mode")]
    OperationRequiresSinglePrimary,

    #[error("cluster metadata topology_type does not match the group's observed mode; run rescan()")]
    TopologyModeMismatch,

    #[error("invalid argument: {0}")]
    BadArgument(String),

    #[error("duplicate address in metadata: {0}")]
    DuplicateAddress(String),

    #[error("duplicate server_uuid in metadata: {0}")]
    DuplicateUuid(String),

    // --- Resource / availability ---
    #[error("could not reach any member of the group")]
    GroupUnreachable,

    #[error("no members of the group are available")]
    GroupUnavailable,

    #[error("group does not have quorum")]
    GroupHasNoQuorum,

    #[error("could not find a PRIMARY for the group")]
    GroupHasNoPrimary,

    #[error("PRIMARY is not present among the supplied instances")]
    PrimaryNotAvailable,

    // --- Metadata state ---
    #[error("metadata schema not found")]
    MetadataMissing,

    #[error("metadata is missing required connection information")]
    MetadataInfoMissing,

    #[error("metadata for member is missing")]
    MemberMetadataMissing,

    #[error("cluster-set primary cluster is undefined")]
    AsyncPrimaryUndefined,

    #[error("no active cluster was found")]
    ActiveClusterNotFound,

    // --- Time-bound ---
    #[error("timed out waiting for GTID sync")]
    GtidSyncTimeout,

    #[error("error while waiting for GTID sync on: {0:?}")]
    GtidSyncError(Vec<String>),

    // --- Member state ---
    #[error("group replication is not running on the target instance")]
    GroupReplicationNotRunning,

    #[error("member is not ONLINE")]
    GroupMemberNotOnline,

    #[error("member is not in quorum")]
    GroupMemberNotInQuorum,

    // --- Auth / pool ---
    #[error("no user was specified and no default credentials are set")]
    MissingAuth,

    // --- Schema lifecycle ---
    #[error("metadata schema upgrade failed and requires recovery: {0}")]
    UpgradeFailed(String),

    #[error("metadata schema setup failed and is incomplete, drop it and retry: {0}")]
    SetupFailed(String),

    #[error("invalid schema logical state: {0}")]
    InvalidSchemaState(String),

    // --- Cancellation ---
    #[error("operation was cancelled")]
    Cancelled,

    // --- Locking ---
    #[error("could not acquire advisory lock on: {0}")]
    LockAcquireFailed(String),

    // --- Driver / connection ---
    #[error("{0}")]
    Sql(SqlError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("logic error: {0}")]
    Logic(String),
}

impl AdminError {
    /// Stable numeric code, analogous to `SHERR_DBA_*` in the original.
    pub fn code(&self) -> i32 {
        match self {
            AdminError::TargetNotInCluster => 1001,
            AdminError::LastMemberCannotRemove => 1002,
            AdminError::OperationRequiresSinglePrimary => 1003,
            AdminError::TopologyModeMismatch => 1004,
            AdminError::BadArgument(_) => 1005,
            AdminError::DuplicateAddress(_) => 1006,
            AdminError::DuplicateUuid(_) => 1007,
            AdminError::GroupUnreachable => 2001,
            AdminError::GroupUnavailable => 2002,
            AdminError::GroupHasNoQuorum => 2003,
            AdminError::GroupHasNoPrimary => 2004,
            AdminError::PrimaryNotAvailable => 2005,
            AdminError::MetadataMissing => 3001,
            AdminError::MetadataInfoMissing => 3002,
            AdminError::MemberMetadataMissing => 3003,
            AdminError::AsyncPrimaryUndefined => 3004,
            AdminError::ActiveClusterNotFound => 3005,
            AdminError::GtidSyncTimeout => 4001,
            AdminError::GtidSyncError(_) => 4002,
            AdminError::GroupReplicationNotRunning => 5001,
            AdminError::GroupMemberNotOnline => 5002,
            AdminError::GroupMemberNotInQuorum => 5003,
            AdminError::MissingAuth => 6001,
            AdminError::UpgradeFailed(_) => 7001,
            AdminError::SetupFailed(_) => 7002,
            AdminError::InvalidSchemaState(_) => 7003,
            AdminError::Cancelled => 8001,
            AdminError::LockAcquireFailed(_) => 8002,
            AdminError::Sql(_) => 9001,
            AdminError::Connection(_) => 9002,
            AdminError::Logic(_) => 9999,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        match self {
            AdminError::Sql(e) => e.is_connection_error(),
            AdminError::Connection(_) => true,
            _ => false,
        }
    }
}

impl From<SqlError> for AdminError {
    fn from(e: SqlError) -> Self {
        AdminError::Sql(e)
    }
}

pub type Result<T> = std::result::Result<T, AdminError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_range_matches_cr_window() {
        let err = SqlError {
            code: 2013,
            sqlstate: "HY000".into(),
            message: "Lost connection".into(),
        };
        assert!(err.is_connection_error());
        let admin: AdminError = err.into();
        assert!(admin.is_connection_error());
    }

    #[test]
    fn non_connection_error_is_not_reclassified() {
        let err = SqlError {
            code: 1062,
            sqlstate: "23000".into(),
            message: "Duplicate entry".into(),
        };
        assert!(!err.is_connection_error());
    }

    #[test]
    fn codes_are_stable_and_unique_within_kind() {
        assert_eq!(AdminError::TargetNotInCluster.code(), 1001);
        assert_eq!(AdminError::GroupHasNoPrimary.code(), 2004);
        assert_eq!(AdminError::GtidSyncTimeout.code(), 4001);
    }
}
