//! State shared by every transport drawing from the same pool

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use scout_store::LruCache;
use serde_json::Value;
use tracing::debug;

use crate::transport::ResponseCallback;

static GLOBAL_POOL: Lazy<Arc<TransportPool>> = Lazy::new(|| Arc::new(TransportPool::new()));

/// Response cache, in-flight requests and concurrency cap shared across transports
///
/// Two transports given the same pool see each other's cached responses and
/// coalesce onto each other's in-flight requests, so a URL is fetched at most
/// once at a time no matter how many engines ask for it.
pub struct TransportPool {
    pub(crate) state: Mutex<PoolState>,
}

pub(crate) struct PoolState {
    pub(crate) cache: LruCache<String, Value>,
    pub(crate) pending: HashMap<String, Vec<ResponseCallback>>,
    pub(crate) pending_count: usize,
    pub(crate) max_pending: usize,
}

impl TransportPool {
    pub const DEFAULT_CACHE_SIZE: usize = 10;
    pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 6;

    pub fn new() -> Self {
        Self::with_cache_size(Self::DEFAULT_CACHE_SIZE)
    }

    pub fn with_cache_size(cache_size: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                cache: LruCache::new(cache_size),
                pending: HashMap::new(),
                pending_count: 0,
                max_pending: Self::DEFAULT_MAX_PENDING_REQUESTS,
            }),
        }
    }

    /// The process-wide pool used when none is supplied
    pub fn global() -> Arc<TransportPool> {
        Arc::clone(&GLOBAL_POOL)
    }

    /// Cap the number of simultaneous fetches (at least one)
    pub fn set_max_pending_requests(&self, max: usize) {
        self.state.lock().max_pending = max.max(1);
    }

    pub fn max_pending_requests(&self) -> usize {
        self.state.lock().max_pending
    }

    /// Forget every cached response
    pub fn reset_cache(&self) {
        let mut state = self.state.lock();
        debug!("Dropping {} cached responses", state.cache.len());
        state.cache.reset();
    }

    /// Number of fetches currently in flight
    pub fn pending_requests(&self) -> usize {
        self.state.lock().pending_count
    }

    pub fn cached_responses(&self) -> usize {
        self.state.lock().cache.len()
    }

    pub(crate) fn cached(&self, url: &str) -> Option<Value> {
        self.state.lock().cache.get(url).cloned()
    }
}

impl Default for TransportPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransportPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransportPool")
            .field("cached", &state.cache.len())
            .field("pending", &state.pending_count)
            .field("max_pending", &state.max_pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_max_pending_is_at_least_one() {
        let pool = TransportPool::new();
        assert_eq!(pool.max_pending_requests(), 6);
        pool.set_max_pending_requests(0);
        assert_eq!(pool.max_pending_requests(), 1);
    }

    #[test]
    fn test_reset_cache() {
        let pool = TransportPool::with_cache_size(2);
        pool.state.lock().cache.set("u".to_string(), json!(1));
        assert_eq!(pool.cached("u"), Some(json!(1)));

        pool.reset_cache();
        assert_eq!(pool.cached_responses(), 0);
        assert_eq!(pool.cached("u"), None);
    }

    #[test]
    fn test_global_pool_is_shared() {
        assert!(Arc::ptr_eq(&TransportPool::global(), &TransportPool::global()));
    }
}
