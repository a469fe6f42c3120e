// C3/C4: catalog schema types, CRUD storage, DDL, and the crash-safe
// upgrade state machine (spec.md §3, §4.3, §4.4).

pub mod schema_ddl;
pub mod storage;
pub mod types;
pub mod undo;
pub mod upgrade;

pub use storage::{MetadataStorage, UndoHandle};
pub use types::{
    ClusterId, ClusterMetadata, ClusterSetId, ClusterSetMember, ClusterSetMetadata,
    ClusterSetView, ClusterTopologyType, ClusterType, InstanceId, InstanceMetadata, InstanceType,
    RouterMetadata,
};
pub use undo::UndoLog;
pub use upgrade::{
    compute_logical_state, probe_schema, BackupHandler, LogicalState, SchemaProbe, SchemaUpgrader,
    SchemaVersion,
};
