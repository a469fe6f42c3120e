// C1: Instance — a live, reference-counted session to one MySQL server.
//
// The wire protocol itself is out of scope (spec.md §1); `SqlSession` is the
// minimal contract the core needs from whatever driver the embedding
// application supplies.

use crate::error::{AdminError, SqlError};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(n) => Some(*n),
            SqlValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Int(n) => Some(*n != 0),
            _ => None,
        }
    }
}

pub type Row = HashMap<String, SqlValue>;

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub schema: Option<String>,
    pub ssl_mode: Option<String>,
    pub connect_timeout_ms: u64,
    /// Must exceed the caller's chosen `gtid_sync_timeout` (spec.md §4.5) —
    /// FTWRL itself never times out, so this is the only escape hatch.
    pub read_timeout_ms: u64,
}

impl ConnectionOptions {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The minimal session contract the core drives. Implemented by whatever
/// MySQL driver the embedding application links in.
#[async_trait]
pub trait SqlSession: Send + Sync {
    async fn query(&self, sql: &str) -> std::result::Result<QueryResult, SqlError>;
    async fn execute(&self, sql: &str) -> std::result::Result<(), SqlError>;
    fn connection_options(&self) -> ConnectionOptions;
    async fn close(&self);
}

/// Notified when an instance's retain count drops to zero, so the pool can
/// reclaim or close it.
pub trait PoolReturn: Send + Sync {
    fn return_instance(&self, uuid: &str);
}

/// Supplied by the embedding application: given connection options, open a
/// fresh `SqlSession`. This is the seam where the real MySQL wire driver
/// plugs in (spec.md §1, "the low-level MySQL wire driver" is out of scope).
/// `Instance::clean_connect` uses this to reopen a dropped connection with
/// the instance's original options.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, opts: &ConnectionOptions) -> std::result::Result<Arc<dyn SqlSession>, SqlError>;
}

/// SQL verbosity gate for the scrubbing logger (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlVerbosity {
    Off,
    NonSelect,
    All,
}

fn password_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(IDENTIFIED\s+(?:WITH\s+\S+\s+)?BY\s+)'(?:[^'\\]|\\.)*'").unwrap()
    })
}

/// Replaces password literals in a SQL statement with `****`, so logs never
/// carry cleartext credentials.
pub fn scrub_sql(sql: &str) -> String {
    password_pattern().replace_all(sql, "$1'****'").into_owned()
}

fn is_read_only_statement(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    trimmed.len() >= 6
        && (trimmed[..6].eq_ignore_ascii_case("SELECT")
            || trimmed[..4].eq_ignore_ascii_case("SHOW"))
}

struct InstanceInner {
    session: RwLock<Arc<dyn SqlSession>>,
    uuid: String,
    server_id: u32,
    version: String,
    retain_count: AtomicI64,
    owner: std::sync::Mutex<Option<Arc<dyn PoolReturn>>>,
    factory: std::sync::Mutex<Option<Arc<dyn SessionFactory>>>,
    verbosity: SqlVerbosity,
}

/// A live session to one MySQL server, with SQL-log scrubbing and retain /
/// release ownership semantics (spec.md §4.1).
#[derive(Clone)]
pub struct Instance(Arc<InstanceInner>);

impl Instance {
    pub fn new(session: Arc<dyn SqlSession>, uuid: String, server_id: u32, version: String) -> Self {
        Self(Arc::new(InstanceInner {
            session: RwLock::new(session),
            uuid,
            server_id,
            version,
            retain_count: AtomicI64::new(1),
            owner: std::sync::Mutex::new(None),
            factory: std::sync::Mutex::new(None),
            verbosity: SqlVerbosity::NonSelect,
        }))
    }

    pub(crate) fn set_owner(&self, owner: Arc<dyn PoolReturn>) {
        *self.0.owner.lock().unwrap() = Some(owner);
    }

    /// Records the factory used to reopen this instance's connection on
    /// `clean_connect()`. Set by the pool alongside `set_owner`.
    pub(crate) fn set_session_factory(&self, factory: Arc<dyn SessionFactory>) {
        *self.0.factory.lock().unwrap() = Some(factory);
    }

    pub fn uuid(&self) -> &str {
        &self.0.uuid
    }

    pub fn server_id(&self) -> u32 {
        self.0.server_id
    }

    pub fn get_version(&self) -> &str {
        &self.0.version
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        self.0.session.read().unwrap().connection_options()
    }

    /// Always `@@report_host:port`, per spec.md §4.1.
    pub fn get_canonical_address(&self) -> String {
        canonical_address(&self.connection_options())
    }

    fn log_sql(&self, sql: &str) {
        let verbosity = self.0.verbosity;
        if verbosity == SqlVerbosity::Off {
            return;
        }
        if verbosity == SqlVerbosity::NonSelect && is_read_only_statement(sql) {
            return;
        }
        tracing::debug!(target: "instance::sql", uuid = %self.0.uuid, sql = %scrub_sql(sql));
    }

    pub async fn query(&self, sql: &str) -> crate::Result<QueryResult> {
        self.log_sql(sql);
        let session = self.0.session.read().unwrap().clone();
        session.query(sql).await.map_err(AdminError::from)
    }

    pub async fn execute(&self, sql: &str) -> crate::Result<()> {
        self.log_sql(sql);
        let session = self.0.session.read().unwrap().clone();
        session.execute(sql).await.map_err(AdminError::from)
    }

    /// Reopens the connection with the same options after a drop (spec.md
    /// §4.1 "Failure modes"). Fails with `MissingAuth`-equivalent logic error
    /// if this instance was never handed a `SessionFactory` by its pool.
    pub async fn clean_connect(&self) -> crate::Result<()> {
        let factory = self.0.factory.lock().unwrap().clone();
        let factory = factory.ok_or_else(|| {
            AdminError::Logic("instance has no session factory to reconnect with".into())
        })?;
        let opts = self.connection_options();
        let old_session = self.0.session.read().unwrap().clone();
        old_session.close().await;
        let new_session = factory.connect(&opts).await.map_err(AdminError::from)?;
        *self.0.session.write().unwrap() = new_session;
        Ok(())
    }

    async fn query_scalar(&self, sql: &str, column: &str) -> crate::Result<Option<SqlValue>> {
        let result = self.query(sql).await?;
        Ok(result.first().and_then(|row| row.get(column).cloned()))
    }

    pub async fn query_bool(&self, sysvar: &str, global: bool) -> crate::Result<bool> {
        let scope = if global { "GLOBAL" } else { "SESSION" };
        let sql = format!("SELECT @@{scope}.{sysvar} AS v");
        Ok(self
            .query_scalar(&sql, "v")
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    pub async fn query_int(&self, sysvar: &str, global: bool) -> crate::Result<i64> {
        let scope = if global { "GLOBAL" } else { "SESSION" };
        let sql = format!("SELECT @@{scope}.{sysvar} AS v");
        Ok(self
            .query_scalar(&sql, "v")
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }

    pub async fn query_string(&self, sysvar: &str, global: bool) -> crate::Result<String> {
        let scope = if global { "GLOBAL" } else { "SESSION" };
        let sql = format!("SELECT @@{scope}.{sysvar} AS v");
        Ok(self
            .query_scalar(&sql, "v")
            .await?
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default())
    }

    pub async fn set_sysvar(&self, name: &str, value: &str, global: bool) -> crate::Result<()> {
        let scope = if global { "GLOBAL" } else { "SESSION" };
        self.execute(&format!("SET {scope} {name} = {value}")).await
    }

    /// Increments the retain count; the pool won't hand this instance to
    /// anyone else while it is retained.
    pub fn retain(&self) {
        self.0.retain_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the retain count; at zero, returns the instance to its
    /// owning pool (or closes it, if unowned).
    pub async fn release(&self) {
        let remaining = self.0.retain_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining <= 0 {
            let owner = self.0.owner.lock().unwrap().clone();
            match owner {
                Some(pool) => pool.return_instance(&self.0.uuid),
                None => self.0.session.read().unwrap().clone().close().await,
            }
        }
    }

    /// Detaches from the pool; retain()/release() semantics stay unchanged.
    pub fn steal(&self) {
        *self.0.owner.lock().unwrap() = None;
    }

    pub fn is_owned(&self) -> bool {
        self.0.owner.lock().unwrap().is_some()
    }
}

/// Normalizes `@@report_host:port`, bracketing IPv6 literals (spec.md §8
/// boundary behaviors).
pub fn canonical_address(opts: &ConnectionOptions) -> String {
    if opts.host.contains(':') && !opts.host.starts_with('[') {
        format!("[{}]:{}", opts.host, opts.port)
    } else {
        format!("{}:{}", opts.host, opts.port)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    pub struct MockSession {
        pub opts: ConnectionOptions,
        pub queries: StdMutex<Vec<String>>,
        pub query_responses: HashMap<String, QueryResult>,
    }

    #[async_trait]
    impl SqlSession for MockSession {
        async fn query(&self, sql: &str) -> std::result::Result<QueryResult, SqlError> {
            self.queries.lock().unwrap().push(sql.to_string());
            Ok(self.query_responses.get(sql).cloned().unwrap_or_default())
        }

        async fn execute(&self, sql: &str) -> std::result::Result<(), SqlError> {
            self.queries.lock().unwrap().push(sql.to_string());
            Ok(())
        }

        fn connection_options(&self) -> ConnectionOptions {
            self.opts.clone()
        }

        async fn close(&self) {}
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockSession;
    use super::*;

    #[test]
    fn scrub_sql_redacts_password_literal() {
        let sql = "CREATE USER 'repl'@'%' IDENTIFIED BY 'sekret123'";
        let scrubbed = scrub_sql(sql);
        assert!(!scrubbed.contains("sekret123"));
        assert!(scrubbed.contains("****"));
    }

    #[test]
    fn scrub_sql_leaves_non_password_statements_untouched() {
        let sql = "SELECT * FROM performance_schema.replication_group_members";
        assert_eq!(scrub_sql(sql), sql);
    }

    #[test]
    fn canonical_address_brackets_ipv6() {
        let opts = ConnectionOptions { host: "::1".to_string(), port: 3306, ..Default::default() };
        assert_eq!(canonical_address(&opts), "[::1]:3306");
    }

    #[test]
    fn canonical_address_leaves_ipv4_unbracketed() {
        let opts = ConnectionOptions { host: "10.0.0.1".to_string(), port: 3306, ..Default::default() };
        assert_eq!(canonical_address(&opts), "10.0.0.1:3306");
    }

    #[tokio::test]
    async fn release_without_owner_closes_session() {
        let session = Arc::new(MockSession::default());
        let instance = Instance::new(session, "uuid-1".into(), 1, "8.0.34".into());
        assert!(!instance.is_owned());
        instance.release().await;
    }

    #[tokio::test]
    async fn clean_connect_without_factory_is_a_logic_error() {
        let session = Arc::new(MockSession::default());
        let instance = Instance::new(session, "uuid-1".into(), 1, "8.0.34".into());
        assert!(matches!(instance.clean_connect().await, Err(AdminError::Logic(_))));
    }

    #[tokio::test]
    async fn clean_connect_swaps_in_a_freshly_opened_session() {
        struct ReconnectFactory(AtomicI64);

        #[async_trait]
        impl SessionFactory for ReconnectFactory {
            async fn connect(&self, opts: &ConnectionOptions) -> std::result::Result<Arc<dyn SqlSession>, SqlError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(MockSession { opts: opts.clone(), ..Default::default() }))
            }
        }

        let session = Arc::new(MockSession::default());
        let instance = Instance::new(session, "uuid-1".into(), 1, "8.0.34".into());
        let factory = Arc::new(ReconnectFactory(AtomicI64::new(0)));
        instance.set_session_factory(factory.clone());

        instance.clean_connect().await.unwrap();
        assert_eq!(factory.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retain_requires_matching_release_count() {
        let session = Arc::new(MockSession::default());
        let instance = Instance::new(session, "uuid-1".into(), 1, "8.0.34".into());
        instance.retain();
        instance.retain();
        assert_eq!(instance.0.retain_count.load(Ordering::SeqCst), 3);
        instance.release().await;
        assert_eq!(instance.0.retain_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn is_read_only_statement_detects_select_and_show() {
        assert!(is_read_only_statement("SELECT 1"));
        assert!(is_read_only_statement("SHOW VARIABLES"));
        assert!(!is_read_only_statement("INSERT INTO t VALUES (1)"));
    }
}
