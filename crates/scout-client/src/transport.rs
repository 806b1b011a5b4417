//! Transport - cached, coalescing, rate-limited remote fetches

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use scout_core::{RateLimit, RequestOptions};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::fetch::Fetcher;
use crate::pool::TransportPool;
use crate::rate_limit::RateLimiter;

/// Receives the outcome of a [`Transport::get`]
pub type ResponseCallback = Box<dyn FnOnce(Result<Value>) + Send>;

/// Per-transport behaviour
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    /// Debounce or throttle outgoing requests
    pub rate_limit: Option<RateLimit>,
    /// Read from and write to the pool's response cache
    pub cache: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            rate_limit: None,
            cache: true,
        }
    }
}

/// Fetches remote suggestions through a shared [`TransportPool`]
///
/// Identical concurrent requests are coalesced into one fetch, and at most
/// `max_pending_requests` fetches run at once across the pool. A request
/// over that cap waits in a single on-deck slot; a newer one replaces it.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    pool: Arc<TransportPool>,
    fetcher: Arc<dyn Fetcher>,
    use_cache: bool,
    limiter: Option<RateLimiter<Call>>,
    state: Mutex<TransportState>,
}

#[derive(Default)]
struct TransportState {
    cancelled: bool,
    last_url: Option<String>,
    on_deck: Option<Call>,
}

struct Call {
    url: String,
    request: RequestOptions,
    callback: ResponseCallback,
}

impl Transport {
    /// Create a transport drawing from `pool`
    pub fn new(
        pool: Arc<TransportPool>,
        fetcher: Arc<dyn Fetcher>,
        options: TransportOptions,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<TransportInner>| {
            let limiter = options.rate_limit.map(|policy| {
                let weak = weak.clone();
                RateLimiter::new(policy, move |call: Call| {
                    if let Some(inner) = weak.upgrade() {
                        inner.dispatch(call);
                    }
                })
            });

            TransportInner {
                pool,
                fetcher,
                use_cache: options.cache,
                limiter,
                state: Mutex::new(TransportState::default()),
            }
        });

        Self { inner }
    }

    /// Request `url`, delivering the outcome to `callback`
    ///
    /// Returns true when the response came from the cache. Cached responses
    /// are still delivered from a spawned task, never before this returns.
    pub fn get(&self, url: &str, request: RequestOptions, callback: ResponseCallback) -> bool {
        {
            let mut state = self.inner.state.lock();
            state.cancelled = false;
            state.last_url = Some(url.to_string());
        }

        if self.inner.use_cache {
            if let Some(response) = self.inner.pool.cached(url) {
                debug!("Serving {} from response cache", url);
                tokio::spawn(async move { callback(Ok(response)) });
                return true;
            }
        }

        let call = Call {
            url: url.to_string(),
            request,
            callback,
        };
        match &self.inner.limiter {
            Some(limiter) => limiter.call(call),
            None => self.inner.dispatch(call),
        }
        false
    }

    /// Drop any request of this transport that has not been sent yet
    ///
    /// In-flight fetches still complete and fill the cache.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        state.cancelled = true;
        state.on_deck = None;
    }

    pub fn pool(&self) -> &Arc<TransportPool> {
        &self.inner.pool
    }
}

impl TransportInner {
    fn dispatch(self: &Arc<Self>, call: Call) {
        {
            let state = self.state.lock();
            if state.cancelled || state.last_url.as_deref() != Some(call.url.as_str()) {
                debug!("Dropping superseded request for {}", call.url);
                return;
            }
        }

        let mut pool = self.pool.state.lock();
        if let Some(waiting) = pool.pending.get_mut(&call.url) {
            debug!("Joining in-flight request for {}", call.url);
            waiting.push(call.callback);
            return;
        }

        if pool.pending_count < pool.max_pending {
            pool.pending_count += 1;
            pool.pending.insert(call.url.clone(), vec![call.callback]);
            drop(pool);
            self.spawn_fetch(call.url, call.request);
        } else {
            drop(pool);
            debug!("Request limit reached, parking {} on deck", call.url);
            if let Some(replaced) = self.state.lock().on_deck.replace(call) {
                debug!("Discarding on-deck request for {}", replaced.url);
            }
        }
    }

    fn spawn_fetch(self: &Arc<Self>, url: String, request: RequestOptions) {
        debug!("Fetching {}", url);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = inner.fetcher.fetch(&url, &request).await;
            inner.complete(&url, result);
        });
    }

    fn complete(self: &Arc<Self>, url: &str, result: Result<Value>) {
        let callbacks = {
            let mut pool = self.pool.state.lock();
            pool.pending_count = pool.pending_count.saturating_sub(1);
            if let (true, Ok(response)) = (self.use_cache, &result) {
                pool.cache.set(url.to_string(), response.clone());
            }
            pool.pending.remove(url).unwrap_or_default()
        };

        if let Err(e) = &result {
            warn!("Request for {} failed: {}", url, e);
        }
        for callback in callbacks {
            callback(result.clone());
        }

        let on_deck = self.state.lock().on_deck.take();
        if let Some(call) = on_deck {
            debug!("Sending on-deck request for {}", call.url);
            self.dispatch(call);
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("pool", &self.inner.pool)
            .field("cache", &self.inner.use_cache)
            .field("limiter", &self.inner.limiter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, Semaphore};

    /// Fetcher that blocks until permits are released
    struct GatedFetcher {
        gate: Semaphore,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl GatedFetcher {
        fn closed() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn open() -> Arc<Self> {
            let fetcher = Self::closed();
            fetcher.gate.add_permits(1000);
            fetcher
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for GatedFetcher {
        async fn fetch(&self, url: &str, _options: &RequestOptions) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(url.to_string());
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| ClientError::Connection(e.to_string()))?;
            permit.forget();

            if url.contains("fail") {
                Err(ClientError::Connection("refused".into()))
            } else {
                Ok(json!({ "url": url }))
            }
        }
    }

    type Received = (&'static str, Result<Value>);

    fn channel() -> (mpsc::UnboundedSender<Received>, mpsc::UnboundedReceiver<Received>) {
        mpsc::unbounded_channel()
    }

    fn reply(tx: &mpsc::UnboundedSender<Received>, tag: &'static str) -> ResponseCallback {
        let tx = tx.clone();
        Box::new(move |result| {
            let _ = tx.send((tag, result));
        })
    }

    fn transport(pool: &Arc<TransportPool>, fetcher: &Arc<GatedFetcher>) -> Transport {
        Transport::new(
            Arc::clone(pool),
            Arc::clone(fetcher) as Arc<dyn Fetcher>,
            TransportOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_identical_requests_are_coalesced() {
        let pool = Arc::new(TransportPool::new());
        let fetcher = GatedFetcher::closed();
        let transport = transport(&pool, &fetcher);
        let (tx, mut rx) = channel();

        assert!(!transport.get("http://x.test/q", RequestOptions::default(), reply(&tx, "a")));
        assert!(!transport.get("http://x.test/q", RequestOptions::default(), reply(&tx, "b")));
        fetcher.gate.add_permits(1);

        let (first, first_result) = rx.recv().await.unwrap();
        let (second, second_result) = rx.recv().await.unwrap();
        assert_eq!((first, second), ("a", "b"));
        assert_eq!(first_result, second_result);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(pool.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_pool_coalesces_across_transports() {
        let pool = Arc::new(TransportPool::new());
        let fetcher = GatedFetcher::closed();
        let first = transport(&pool, &fetcher);
        let second = transport(&pool, &fetcher);
        let (tx, mut rx) = channel();

        first.get("http://x.test/q", RequestOptions::default(), reply(&tx, "first"));
        second.get("http://x.test/q", RequestOptions::default(), reply(&tx, "second"));
        fetcher.gate.add_permits(1);

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_on_deck_slot_keeps_only_newest() {
        let pool = Arc::new(TransportPool::new());
        pool.set_max_pending_requests(1);
        let fetcher = GatedFetcher::closed();
        let transport = transport(&pool, &fetcher);
        let (tx, mut rx) = channel();

        transport.get("http://x.test/a", RequestOptions::default(), reply(&tx, "a"));
        transport.get("http://x.test/b", RequestOptions::default(), reply(&tx, "b"));
        transport.get("http://x.test/c", RequestOptions::default(), reply(&tx, "c"));
        fetcher.gate.add_permits(2);

        assert_eq!(rx.recv().await.unwrap().0, "a");
        assert_eq!(rx.recv().await.unwrap().0, "c");
        assert!(rx.try_recv().is_err());
        assert_eq!(
            *fetcher.seen.lock(),
            vec!["http://x.test/a".to_string(), "http://x.test/c".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cache_hit_is_delivered_asynchronously() {
        let pool = Arc::new(TransportPool::new());
        let fetcher = GatedFetcher::open();
        let transport = transport(&pool, &fetcher);
        let (tx, mut rx) = channel();

        transport.get("http://x.test/q", RequestOptions::default(), reply(&tx, "miss"));
        rx.recv().await.unwrap();
        assert_eq!(pool.cached_responses(), 1);

        let delivered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&delivered);
        let tx_hit = tx.clone();
        let hit = transport.get(
            "http://x.test/q",
            RequestOptions::default(),
            Box::new(move |result| {
                flag.store(true, Ordering::SeqCst);
                let _ = tx_hit.send(("hit", result));
            }),
        );
        assert!(hit);
        assert!(!delivered.load(Ordering::SeqCst));

        let (tag, result) = rx.recv().await.unwrap();
        assert_eq!(tag, "hit");
        assert_eq!(result.unwrap(), json!({ "url": "http://x.test/q" }));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let pool = Arc::new(TransportPool::new());
        let fetcher = GatedFetcher::open();
        let transport = transport(&pool, &fetcher);
        let (tx, mut rx) = channel();

        transport.get("http://x.test/fail", RequestOptions::default(), reply(&tx, "one"));
        assert!(rx.recv().await.unwrap().1.is_err());
        assert_eq!(pool.cached_responses(), 0);

        assert!(!transport.get("http://x.test/fail", RequestOptions::default(), reply(&tx, "two")));
        assert!(rx.recv().await.unwrap().1.is_err());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_uncached_transport_skips_pool_cache() {
        let pool = Arc::new(TransportPool::new());
        let fetcher = GatedFetcher::open();
        let transport = Transport::new(
            Arc::clone(&pool),
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            TransportOptions {
                cache: false,
                ..Default::default()
            },
        );
        let (tx, mut rx) = channel();

        transport.get("http://x.test/q", RequestOptions::default(), reply(&tx, "one"));
        rx.recv().await.unwrap();
        transport.get("http://x.test/q", RequestOptions::default(), reply(&tx, "two"));
        rx.recv().await.unwrap();

        assert_eq!(pool.cached_responses(), 0);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancel_drops_on_deck_request() {
        let pool = Arc::new(TransportPool::new());
        pool.set_max_pending_requests(1);
        let fetcher = GatedFetcher::closed();
        let transport = transport(&pool, &fetcher);
        let (tx, mut rx) = channel();

        transport.get("http://x.test/a", RequestOptions::default(), reply(&tx, "a"));
        transport.get("http://x.test/b", RequestOptions::default(), reply(&tx, "b"));
        transport.cancel();
        fetcher.gate.add_permits(2);

        assert_eq!(rx.recv().await.unwrap().0, "a");
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_transport_sends_latest_query() {
        let pool = Arc::new(TransportPool::new());
        let fetcher = GatedFetcher::open();
        let transport = Transport::new(
            Arc::clone(&pool),
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            TransportOptions {
                rate_limit: Some(RateLimit::Debounce(Duration::from_millis(300))),
                cache: true,
            },
        );
        let (tx, mut rx) = channel();

        let requests = [
            ("http://x.test/a", "a"),
            ("http://x.test/ab", "ab"),
            ("http://x.test/abc", "abc"),
        ];
        for (url, tag) in requests {
            transport.get(url, RequestOptions::default(), reply(&tx, tag));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let (tag, result) = rx.recv().await.unwrap();
        assert_eq!(tag, "abc");
        assert_eq!(result.unwrap(), json!({ "url": "http://x.test/abc" }));
        assert_eq!(fetcher.calls(), 1);
    }
}
