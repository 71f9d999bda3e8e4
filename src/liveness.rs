//! Bulk liveness lookup against the shared health-probe store (spec.md
//! §4.4). The oracle is advisory only: every failure mode it can hit
//! degrades toward "assume reachable" rather than blocking traffic, because
//! a false negative here just means one request gets routed away from a
//! briefly-unreachable host, while a false positive on "down" could stall
//! routing entirely.

use std::collections::HashSet;
use std::net::IpAddr;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::warn;

/// Error from the raw bulk read. The oracle always treats this as "fail
/// open" at the call site — the type exists so backends have something to
/// return and so tests can assert the failure path is reached.
#[derive(Debug, Clone)]
pub struct LivenessError(pub String);

impl std::fmt::Display for LivenessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "liveness store error: {}", self.0)
    }
}

/// Raw bulk-read seam so the oracle can be tested without a live Redis.
#[async_trait]
pub trait LivenessBackend: Send + Sync {
    /// Read `keys` as fields of `hash` in one round trip. The result vector
    /// has the same length and order as `keys`; `None` at a position means
    /// that field had no value.
    async fn bulk_get(&self, hash: &str, keys: &[String]) -> Result<Vec<Option<String>>, LivenessError>;
}

/// Redis-backed liveness backend using an auto-reconnecting connection
/// manager — a dead manager simply fails the next `HMGET`, which the oracle
/// already treats as a fail-open condition, so no extra reconnect logic is
/// needed here (unlike the directory client, which is on a path where
/// blocking the caller until reconnected is the correct behavior).
pub struct RedisLivenessBackend {
    manager: redis::aio::ConnectionManager,
}

impl RedisLivenessBackend {
    pub async fn connect(url: &str) -> Result<Self, LivenessError> {
        let client = redis::Client::open(url).map_err(|e| LivenessError(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| LivenessError(e.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl LivenessBackend for RedisLivenessBackend {
    async fn bulk_get(&self, hash: &str, keys: &[String]) -> Result<Vec<Option<String>>, LivenessError> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        conn.hmget(hash, keys)
            .await
            .map_err(|e| LivenessError(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct LivenessStatus {
    reachable: bool,
}

/// Liveness oracle: resolves hosts, reads their reachability in one bulk
/// round trip, and applies the fail-open degradation rules.
pub struct LivenessOracle<B: LivenessBackend> {
    backend: B,
    hash_name: String,
    dns_cache: DashMap<String, IpAddr>,
}

impl<B: LivenessBackend> LivenessOracle<B> {
    pub fn new(backend: B, hash_name: String) -> Self {
        Self {
            backend,
            hash_name,
            dns_cache: DashMap::new(),
        }
    }

    /// Resolve `host` to an address, memoizing the result for the rest of
    /// the process's lifetime (spec.md §3: "resolved ... exactly once").
    async fn resolve(&self, host: &str) -> std::io::Result<IpAddr> {
        if let Some(addr) = self.dns_cache.get(host) {
            return Ok(*addr);
        }
        let mut addrs = tokio::net::lookup_host((host, 0)).await?;
        let addr = addrs
            .next()
            .map(|sa| sa.ip())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"))?;
        self.dns_cache.insert(host.to_string(), addr);
        Ok(addr)
    }

    /// Return the subset of `hosts` believed reachable on `port`. Degrades
    /// open (returns the full input) if the store is unreachable or if no
    /// host has any recorded status at all.
    pub async fn available(&self, hosts: &[String], port: u16) -> HashSet<String> {
        if hosts.is_empty() {
            return HashSet::new();
        }

        let mut keys = Vec::with_capacity(hosts.len());
        for host in hosts {
            match self.resolve(host).await {
                Ok(addr) => keys.push(format!("{addr}:{port}")),
                Err(err) => {
                    warn!(host = %host, error = %err, "dns resolution failed, treating as unknown");
                    // An address we can't resolve can never match a liveness
                    // key; push a key that will simply never be present.
                    keys.push(format!("unresolved:{host}:{port}"));
                }
            }
        }

        let values = match self.backend.bulk_get(&self.hash_name, &keys).await {
            Ok(values) => values,
            Err(err) => {
                warn!(error = %err, hash = %self.hash_name, "liveness store unreachable, failing open");
                return hosts.iter().cloned().collect();
            }
        };

        let mut available = HashSet::new();
        let mut unknown = Vec::new();

        for (idx, value) in values.into_iter().enumerate() {
            let host = &hosts[idx];
            match value {
                None => unknown.push(host.clone()),
                Some(raw) => match serde_json::from_str::<LivenessStatus>(&raw) {
                    Ok(status) if status.reachable => {
                        available.insert(host.clone());
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(host = %host, error = %err, "cannot decode liveness value, treating as unknown");
                        unknown.push(host.clone());
                    }
                },
            }
        }

        if !unknown.is_empty() {
            warn!(hash = %self.hash_name, ?unknown, "no liveness info for some hosts");
            if unknown.len() == hosts.len() {
                return hosts.iter().cloned().collect();
            }
        }

        available
    }
}

#[cfg(any(test, feature = "test-util"))]
impl<B: LivenessBackend> LivenessOracle<B> {
    /// Pre-populate the DNS memoization cache so tests don't depend on a
    /// real resolver for made-up hostnames — the production code path
    /// (`resolve`) still runs for any host not seeded this way.
    pub fn seed_dns(&self, host: &str, addr: IpAddr) {
        self.dns_cache.insert(host.to_string(), addr);
    }
}

/// Build the liveness hash name this process reads, matching the external
/// prober's naming convention (spec.md §6).
pub fn web_monitor_hash_name(process_hostname: &str) -> String {
    format!("nimbus.io.web_monitor.{process_hostname}")
}

#[cfg(any(test, feature = "test-util"))]
pub mod fakes {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    /// Fake liveness backend driven by a fixed key → raw JSON map, or a
    /// forced error to exercise the fail-open path.
    pub struct FakeLiveness {
        pub values: Mutex<StdHashMap<String, String>>,
        pub fail: bool,
    }

    impl FakeLiveness {
        pub fn new() -> Self {
            Self {
                values: Mutex::new(StdHashMap::new()),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                values: Mutex::new(StdHashMap::new()),
                fail: true,
            }
        }

        pub fn set_reachable(&self, key: &str, reachable: bool) {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), format!("{{\"reachable\":{reachable}}}"));
        }
    }

    #[async_trait]
    impl LivenessBackend for FakeLiveness {
        async fn bulk_get(&self, _hash: &str, keys: &[String]) -> Result<Vec<Option<String>>, LivenessError> {
            if self.fail {
                return Err(LivenessError("connection refused".to_string()));
            }
            let values = self.values.lock().unwrap();
            Ok(keys.iter().map(|k| values.get(k).cloned()).collect())
        }
    }
}
