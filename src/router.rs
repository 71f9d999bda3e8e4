//! Request routing facade (spec.md §4.5): parses the virtual hostname,
//! classifies the method, resolves the owning cluster, selects a healthy
//! host, and formats the decision. This is the one piece external callers
//! (the ingress HTTP proxy) actually talk to.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CollectionCache, ClusterCache, ClusterRecord, DEFAULT_COLLECTION_CACHE_CAPACITY};
use crate::config::RouterConfig;
use crate::directory::{DirectoryBackend, NodeRow};
use crate::liveness::LivenessBackend;
use crate::liveness::LivenessOracle;
use crate::selector::{select_host, SelectionOutcome};

/// A routing decision: either proxy to a backend, or reject the request
/// with a synthesized minimal HTTP/1.0 response (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Proxy to this backend. `"host:port"` for data-tier traffic,
    /// `"host"` alone for management traffic (the recipient picks the
    /// port).
    Remote(String),
    /// Reject with a synthesized `HTTP/1.0 <code> <reason>\r\n\r\n<body>`
    /// response.
    Close(String),
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        400 => "Bad Request",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "unknown",
    }
}

fn reject(code: u16, reason: Option<&str>) -> RouteDecision {
    let phrase = reason_phrase(code);
    debug!(code, phrase, reason, "rejecting request");
    let body = reason.unwrap_or(phrase);
    RouteDecision::Close(format!("HTTP/1.0 {code} {phrase}\r\n\r\n{body}"))
}

/// The router's view of an HTTP method, classified into the tier it is
/// routed to (spec.md §4.5 step 5).
enum MethodClass {
    Read,
    Write,
    Unsupported,
}

fn classify_method(method: &str) -> MethodClass {
    match method {
        "POST" | "DELETE" | "PUT" | "PATCH" => MethodClass::Write,
        "HEAD" | "GET" => MethodClass::Read,
        _ => MethodClass::Unsupported,
    }
}

/// The router facade, threaded explicitly through the proxy shell rather
/// than hidden behind a process-wide singleton (spec.md §9 "Global state").
pub struct Router<D: DirectoryBackend, L: LivenessBackend> {
    config: RouterConfig,
    directory: D,
    liveness: LivenessOracle<L>,
    collections: CollectionCache,
    clusters: ClusterCache,
    management_dest: Mutex<VecDeque<String>>,
    request_counter: AtomicU64,
}

impl<D: DirectoryBackend, L: LivenessBackend> Router<D, L> {
    pub fn new(config: RouterConfig, directory: D, liveness_backend: L, hash_name: String) -> Self {
        let management_dest = Mutex::new(config.management_api_request_dest.clone());
        Self {
            liveness: LivenessOracle::new(liveness_backend, hash_name),
            collections: CollectionCache::new(DEFAULT_COLLECTION_CACHE_CAPACITY),
            clusters: ClusterCache::new(),
            management_dest,
            request_counter: AtomicU64::new(0),
            config,
            directory,
        }
    }

    fn parse_collection<'a>(&self, hostname: &'a str) -> &'a str {
        let offset = hostname.len() - (self.config.service_domain.len() + 1);
        &hostname[..offset]
    }

    /// Resolve the cluster id owning `collection`, consulting the
    /// collection cache first and falling back to a memoized directory
    /// query on a miss (spec.md §4.5 step 7).
    ///
    /// `cache_write` is handed to the directory backend and, for a real
    /// [`crate::directory::DirectoryClient`], runs inside the memoizer's
    /// lock — so the write lands before any other waiter queued on that
    /// lock gets a chance to run its own `cache_check`. That ordering is
    /// what collapses concurrent misses on the same collection to exactly
    /// one directory query (spec.md §8, "two concurrent misses ... exactly
    /// one directory query").
    async fn cluster_id_for_collection(&self, collection: &str) -> Result<Option<i64>, crate::error::RouterError> {
        if let Some(cached) = self.collections.get(collection) {
            return Ok(cached);
        }

        let collections = &self.collections;
        let mut cache_check = move || collections.get(collection);
        let mut cache_write = move |result: Option<i64>| {
            self.collections.put(collection.to_string(), result);
        };
        let result = self
            .directory
            .cluster_id_for_collection(collection, &mut cache_check, &mut cache_write)
            .await?;

        Ok(result)
    }

    /// Resolve the cluster record for `cluster_id`, consulting the cluster
    /// cache first and falling back to a memoized directory query on a
    /// miss (spec.md §4.5 step 8).
    ///
    /// The `ClusterRecord` itself (and its rotation state) is constructed
    /// exactly once, inside `cache_write`, which — for the real directory
    /// client — runs before the memoizer's lock is released. A waiter that
    /// instead hits `cache_check` never builds its own record; it relies on
    /// the writer's `clusters.put` having already landed and fetches the
    /// same `Arc` back below, preserving rotation identity across callers.
    async fn cluster_record(&self, cluster_id: i64) -> Result<Arc<ClusterRecord>, crate::error::RouterError> {
        if let Some(record) = self.clusters.get(cluster_id) {
            return Ok(record);
        }

        let clusters = &self.clusters;
        let mut cache_check = move || clusters.get(cluster_id).map(|r| r.rows.clone());
        let mut cache_write = move |rows: Vec<NodeRow>| {
            self.clusters
                .put(cluster_id, Arc::new(ClusterRecord::new(rows)));
        };
        self.directory
            .cluster_info(cluster_id, &mut cache_check, &mut cache_write)
            .await?;

        // Either branch above leaves the record in `self.clusters` before
        // returning: `cache_write` just inserted it, or `cache_check`
        // matched because some other caller's `cache_write` already did.
        self.clusters
            .get(cluster_id)
            .ok_or_else(|| crate::error::RouterError::Internal("cluster cache write lost a race".to_string()))
    }

    /// Route one request. Mirrors spec.md §4.5 steps 1-11 exactly; every
    /// rejection is a terminal `return` (no fall-through, per the Design
    /// Notes' "open question" about the original's inconsistent
    /// `self._reject(...)` calls).
    pub async fn route(
        &self,
        hostname: Option<&str>,
        method: &str,
        path: &str,
        query_string: &str,
    ) -> Result<RouteDecision, crate::error::RouterError> {
        let request_num = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(request_num, ?hostname, method, path, query_string, "routing request");

        let hostname = match hostname {
            Some(h) if h.ends_with(self.config.service_domain.as_str()) => h,
            _ => return Ok(reject(404, None)),
        };

        if hostname == self.config.service_domain {
            let target = {
                let mut dest = self.management_dest.lock();
                dest.rotate_left(1);
                dest.front().cloned()
            };
            return match target {
                Some(target) => {
                    debug!(request_num, target, "management traffic");
                    Ok(RouteDecision::Remote(target))
                }
                None => Ok(reject(503, Some("No management destination configured"))),
            };
        }

        let dest_port = match classify_method(method) {
            MethodClass::Write => self.config.web_writer_port,
            MethodClass::Read => self.config.web_server_port,
            MethodClass::Unsupported => return Ok(reject(400, Some("Unknown method"))),
        };

        let collection = self.parse_collection(hostname);

        let cluster_id = match self.cluster_id_for_collection(collection).await? {
            Some(id) => id,
            None => return Ok(reject(404, Some("No such collection"))),
        };

        let record = self.cluster_record(cluster_id).await?;
        if record.host_count() == 0 {
            return Ok(reject(404, Some("No such collection")));
        }

        match select_host(&record, dest_port, &self.liveness).await {
            SelectionOutcome::Selected(host) => {
                info!(request_num, host, dest_port, "routed");
                Ok(RouteDecision::Remote(format!("{host}:{dest_port}")))
            }
            SelectionOutcome::Timeout => {
                warn!(request_num, collection, "no available host within availability timeout");
                Ok(reject(503, Some("Retry later")))
            }
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl<D: DirectoryBackend, L: LivenessBackend> Router<D, L> {
    /// Seed the liveness oracle's DNS cache for `host` with a loopback
    /// address, so integration tests can exercise routing without a real
    /// resolver.
    pub async fn seed_host_dns(&self, host: &str) {
        self.liveness.seed_dns(host, "127.0.0.1".parse().unwrap());
    }
}
