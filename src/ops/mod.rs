// C7: Cluster Operations — one module per AdminAPI command, each either
// implementing `crate::command::Command` directly or, for read-only /
// best-effort operations that don't fit the prepare/execute/rollback
// shape, exposing plain async functions (spec.md §4.7).

pub mod add_instance;
pub mod create_cluster;
pub mod describe;
pub mod dissolve;
pub mod options;
pub mod remove_instance;
pub mod rescan;
pub mod reset_recovery_accounts;
pub mod set_primary;
pub mod switch_topology;
