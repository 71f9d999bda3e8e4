//! Typed accessor over the relational directory: collection name → owning
//! cluster id, and cluster id → ordered host list. Hides reconnection and
//! transient-error discipline behind [`DirectoryClient`]; callers that need
//! a test seam use the [`DirectoryBackend`] trait instead.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection, Row};
use tracing::warn;

use crate::config::DirectoryConfig;
use crate::memoizer::Memoizer;

/// One row of the `node` table: a single host within a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRow {
    pub name: String,
    pub hostname: String,
    pub node_number: i32,
}

/// Error surfaced by a single directory operation, already classified.
#[derive(Debug, Clone)]
pub enum DirectoryError {
    /// Connection loss, I/O, protocol errors — recovered locally by
    /// reconnecting and retrying; never meant to reach the router's caller.
    Transient(String),
    /// Syntax, permission, or programming errors — propagated upward.
    Fatal(String),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::Transient(m) => write!(f, "transient directory error: {m}"),
            DirectoryError::Fatal(m) => write!(f, "fatal directory error: {m}"),
        }
    }
}

fn classify(err: sqlx::Error) -> DirectoryError {
    match err {
        sqlx::Error::Database(db_err) => DirectoryError::Fatal(db_err.to_string()),
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnDecode { .. } => DirectoryError::Fatal(err.to_string()),
        other => DirectoryError::Transient(other.to_string()),
    }
}

/// The two directory operations the router needs, as a trait so tests can
/// supply a fake that never touches a real database.
///
/// Both operations take a `cache_write` callback alongside `cache_check`.
/// Implementations must invoke `cache_write` with the freshly-queried value
/// while still holding whatever lock serializes the query (the memoizer's
/// mutex for [`DirectoryClient`]) — never after releasing it. Only that
/// ordering guarantees that a waiter blocked on the same lock observes the
/// write via its own `cache_check` instead of issuing a redundant query.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    async fn cluster_id_for_collection(
        &self,
        name: &str,
        cache_check: &mut (dyn FnMut() -> Option<Option<i64>> + Send),
        cache_write: &mut (dyn FnMut(Option<i64>) + Send),
    ) -> Result<Option<i64>, DirectoryError>;

    async fn cluster_info(
        &self,
        cluster_id: i64,
        cache_check: &mut (dyn FnMut() -> Option<Vec<NodeRow>> + Send),
        cache_write: &mut (dyn FnMut(Vec<NodeRow>) + Send),
    ) -> Result<Vec<NodeRow>, DirectoryError>;
}

/// Lazily-connected, generation-tagged connection slot. The generation
/// counter lets a task that just failed a query tell, after reacquiring the
/// lock following its back-off sleep, whether some other task already
/// replaced the connection — at which point it skips reconnecting itself
/// and simply retries the query on the fresh connection.
struct ConnSlot {
    conn: Option<PgConnection>,
    generation: u64,
}

/// Production directory client backed by a single `sqlx::PgConnection`,
/// matching the "one connection, one re-entrant-or-flat mutex" discipline
/// described in the component contract rather than a full connection pool —
/// the directory is not on the request hot path once its results are
/// cached, so pooling would add complexity without a throughput benefit.
pub struct DirectoryClient {
    memo: Memoizer<ConnSlot>,
    config: DirectoryConfig,
}

impl DirectoryClient {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            memo: Memoizer::new(ConnSlot {
                conn: None,
                generation: 0,
            }),
            config,
        }
    }

    fn connect_options(config: &DirectoryConfig) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
    }

    /// Connect, retrying forever with a fixed one-second delay on failure.
    /// Runs while the slot's mutex is held, so it blocks every other
    /// directory caller for its entire duration — matching the spec's
    /// "caller is blocked for the entire duration" failure semantics.
    async fn connect_with_retry(config: &DirectoryConfig) -> PgConnection {
        let opts = Self::connect_options(config);
        loop {
            match PgConnection::connect_with(&opts).await {
                Ok(conn) => return conn,
                Err(err) => {
                    warn!(error = %err, "directory connection failed, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn ensure_connected(slot: &mut ConnSlot, config: &DirectoryConfig) -> &mut PgConnection {
        if slot.conn.is_none() {
            slot.conn = Some(Self::connect_with_retry(config).await);
            slot.generation += 1;
        }
        slot.conn.as_mut().expect("just connected")
    }

    fn table(&self, bare: &str) -> String {
        match &self.config.schema {
            Some(schema) => format!("{schema}.{bare}"),
            None => bare.to_string(),
        }
    }

    async fn query_cluster_id(
        slot: &mut ConnSlot,
        config: &DirectoryConfig,
        table: &str,
        name: &str,
    ) -> Result<Option<i64>, DirectoryError> {
        let conn = Self::ensure_connected(slot, config).await;
        let sql = format!("select cluster_id from {table} where name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(conn)
            .await
            .map_err(classify)?;
        Ok(row.map(|r| r.get::<i64, _>("cluster_id")))
    }

    async fn query_cluster_info(
        slot: &mut ConnSlot,
        config: &DirectoryConfig,
        table: &str,
        cluster_id: i64,
    ) -> Result<Vec<NodeRow>, DirectoryError> {
        let conn = Self::ensure_connected(slot, config).await;
        let sql = format!(
            "select name, hostname, node_number_in_cluster from {table} \
             where cluster_id = $1 order by node_number_in_cluster"
        );
        let rows = sqlx::query(&sql)
            .bind(cluster_id)
            .fetch_all(conn)
            .await
            .map_err(classify)?;
        Ok(rows
            .into_iter()
            .map(|r| NodeRow {
                name: r.get("name"),
                hostname: r.get("hostname"),
                node_number: r.get("node_number_in_cluster"),
            })
            .collect())
    }
}

#[async_trait]
impl DirectoryBackend for DirectoryClient {
    async fn cluster_id_for_collection(
        &self,
        name: &str,
        cache_check: &mut (dyn FnMut() -> Option<Option<i64>> + Send),
        cache_write: &mut (dyn FnMut(Option<i64>) + Send),
    ) -> Result<Option<i64>, DirectoryError> {
        let table = self.table("collection");
        let config = &self.config;
        self.memo
            .run(
                || cache_check(),
                |slot| Self::query_cluster_id(slot, config, &table, name),
                |value: &Option<i64>| cache_write(*value),
            )
            .await
    }

    async fn cluster_info(
        &self,
        cluster_id: i64,
        cache_check: &mut (dyn FnMut() -> Option<Vec<NodeRow>> + Send),
        cache_write: &mut (dyn FnMut(Vec<NodeRow>) + Send),
    ) -> Result<Vec<NodeRow>, DirectoryError> {
        let table = self.table("node");
        let config = &self.config;
        self.memo
            .run(
                || cache_check(),
                |slot| Self::query_cluster_info(slot, config, &table, cluster_id),
                |value: &Vec<NodeRow>| cache_write(value.clone()),
            )
            .await
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Fake directory backend for tests: configurable fixed responses, an
    /// optional artificial delay (for stampede tests), and a call counter.
    pub struct FakeDirectory {
        pub collections: HashMap<String, i64>,
        pub clusters: HashMap<i64, Vec<NodeRow>>,
        pub delay: Duration,
        pub calls: AtomicUsize,
        lock: Mutex<()>,
    }

    impl FakeDirectory {
        pub fn new() -> Self {
            Self {
                collections: HashMap::new(),
                clusters: HashMap::new(),
                delay: Duration::from_millis(0),
                calls: AtomicUsize::new(0),
                lock: Mutex::new(()),
            }
        }

        /// Register a known collection → cluster mapping. Collections never
        /// registered here are "no such collection" (the directory returns
        /// no row), matching the real table's absence-of-a-row semantics.
        pub fn with_collection(mut self, name: &str, cluster_id: i64) -> Self {
            self.collections.insert(name.to_string(), cluster_id);
            self
        }

        pub fn with_cluster(mut self, cluster_id: i64, hosts: Vec<&str>) -> Self {
            let rows = hosts
                .into_iter()
                .enumerate()
                .map(|(i, h)| NodeRow {
                    name: format!("node-{i}"),
                    hostname: h.to_string(),
                    node_number: i as i32,
                })
                .collect();
            self.clusters.insert(cluster_id, rows);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DirectoryBackend for Arc<FakeDirectory> {
        async fn cluster_id_for_collection(
            &self,
            name: &str,
            cache_check: &mut (dyn FnMut() -> Option<Option<i64>> + Send),
            cache_write: &mut (dyn FnMut(Option<i64>) + Send),
        ) -> Result<Option<i64>, DirectoryError> {
            // Collapse concurrent calls the same way the real client does,
            // so stampede tests exercise the same serialize+recheck shape.
            // `cache_write` runs before the lock is released, matching the
            // contract `DirectoryBackend` documents.
            let _guard = self.lock.lock().await;
            if let Some(v) = cache_check() {
                return Ok(v);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let result = self.collections.get(name).copied();
            cache_write(result);
            Ok(result)
        }

        async fn cluster_info(
            &self,
            cluster_id: i64,
            cache_check: &mut (dyn FnMut() -> Option<Vec<NodeRow>> + Send),
            cache_write: &mut (dyn FnMut(Vec<NodeRow>) + Send),
        ) -> Result<Vec<NodeRow>, DirectoryError> {
            let _guard = self.lock.lock().await;
            if let Some(v) = cache_check() {
                return Ok(v);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let result = self.clusters.get(&cluster_id).cloned().unwrap_or_default();
            cache_write(result.clone());
            Ok(result)
        }
    }
}
