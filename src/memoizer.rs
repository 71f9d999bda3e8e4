//! Stampede-safe memoization for directory lookups.
//!
//! When the directory is slow or briefly unreachable, many concurrent
//! request tasks would otherwise each block, then each issue the same query
//! the moment it recovers. `Memoizer` collapses that into a single
//! in-flight query: callers serialize on one lock, re-check an in-memory
//! cache immediately after acquiring it, and only the caller that still
//! finds the cache empty pays the cost of the query. Everyone else observes
//! the value the first caller wrote back.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::directory::DirectoryError;

/// Delay between reconnect attempts when a guarded operation reports a
/// transient failure. Matches the fixed one-second back-off the directory
/// client promises callers.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Generic decorator around a guarded resource `S` (e.g. a directory
/// connection slot) that serializes access and collapses concurrent misses.
///
/// `S` is whatever state the wrapped operation needs exclusive access to.
/// The memoizer itself knows nothing about what `S` is for — it only
/// provides the locking and retry discipline described in the component's
/// contract.
pub struct Memoizer<S> {
    state: Mutex<S>,
}

impl<S> Memoizer<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Run `query` against the guarded state, first giving `cache_check` a
    /// chance to short-circuit. Protocol (mirrors the component contract):
    ///
    /// 1. Acquire the single mutex guarding `S`.
    /// 2. Run `cache_check`; if it returns `Some`, use that value.
    /// 3. Otherwise run `query` under the lock.
    /// 4. On success, run `write_back` under the *same* lock acquisition
    ///    before returning, so the next waiter's `cache_check` is guaranteed
    ///    to observe it — this is what makes concurrent misses collapse to
    ///    one query rather than one query per waiter still queued on the
    ///    lock when the first query completes.
    /// 5. On a transient error, release the lock, sleep, and restart from 1.
    /// 6. On a fatal error, propagate immediately.
    pub async fn run<T, C, Q, Fut, W>(
        &self,
        mut cache_check: C,
        mut query: Q,
        mut write_back: W,
    ) -> Result<T, DirectoryError>
    where
        C: FnMut() -> Option<T>,
        Q: FnMut(&mut S) -> Fut,
        Fut: Future<Output = Result<T, DirectoryError>>,
        W: FnMut(&T),
    {
        loop {
            let mut guard = self.state.lock().await;

            if let Some(value) = cache_check() {
                return Ok(value);
            }

            match query(&mut guard).await {
                Ok(value) => {
                    write_back(&value);
                    return Ok(value);
                }
                Err(DirectoryError::Fatal(msg)) => return Err(DirectoryError::Fatal(msg)),
                Err(DirectoryError::Transient(msg)) => {
                    warn!(error = %msg, "directory operation failed transiently, retrying");
                    drop(guard);
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            }
        }
    }
}
