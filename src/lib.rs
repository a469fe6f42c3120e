// MySQL InnoDB Cluster admin control plane — a reimplementation of the
// AdminAPI core: instance pooling, catalog metadata, crash-safe schema
// upgrade, global locking, and the cluster-mutating commands built on top.

pub mod accounts;
pub mod async_repl;
pub mod clusterset;
pub mod command;
pub mod config;
pub mod console;
pub mod error;
pub mod instance;
pub mod locks;
pub mod metadata;
pub mod ops;
pub mod pool;
pub mod topology;
pub mod util;

pub use config::AdminConfig;
pub use error::{AdminError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
