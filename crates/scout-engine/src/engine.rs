//! The suggestion engine and its builder

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use scout_client::{DefaultFetcher, Fetcher, Transport, TransportOptions, TransportPool};
use scout_core::{
    datums_from_response, resolve_url, system_clock, Datum, DatumTokenizer, DupDetector,
    LocalSource, PrefetchOptions, QueryTokenizer, RemoteOptions, ResponseFilter, SharedClock,
    Sorter,
};
use scout_search::{SearchIndex, SerializedIndex};
use scout_store::{PersistentStore, Substrate};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};

/// Completion of [`SuggestionEngine::initialize`], shareable between waiters
pub type Initialization = Shared<BoxFuture<'static, Result<()>>>;

/// Callback-style lookup, as handed to an autocomplete widget
pub type Source = Arc<dyn Fn(&str, Box<dyn FnOnce(Vec<Datum>) + Send>) + Send + Sync>;

const DATA_KEY: &str = "data";
const PROTOCOL_KEY: &str = "protocol";
const THUMBPRINT_KEY: &str = "thumbprint";

/// Builder for [`SuggestionEngine`]
pub struct EngineBuilder {
    limit: usize,
    sorter: Option<Sorter>,
    dup_detector: Option<DupDetector>,
    datum_tokenizer: Option<DatumTokenizer>,
    query_tokenizer: Option<QueryTokenizer>,
    local: Option<LocalSource>,
    prefetch: Option<PrefetchOptions>,
    remote: Option<RemoteOptions>,
    fetcher: Option<Arc<dyn Fetcher>>,
    pool: Option<Arc<TransportPool>>,
    max_pending_requests: Option<usize>,
    substrate: Option<Arc<dyn Substrate>>,
    clock: Option<SharedClock>,
}

impl EngineBuilder {
    pub const DEFAULT_LIMIT: usize = 5;

    /// Maximum number of suggestions per query
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn sorter(
        mut self,
        sorter: impl Fn(&Datum, &Datum) -> std::cmp::Ordering + Send + Sync + 'static,
    ) -> Self {
        self.sorter = Some(Arc::new(sorter));
        self
    }

    /// Treat a remote suggestion as a duplicate of an existing one when this returns true
    pub fn dup_detector(
        mut self,
        detector: impl Fn(&Datum, &Datum) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.dup_detector = Some(Arc::new(detector));
        self
    }

    pub fn datum_tokenizer(mut self, tokenizer: DatumTokenizer) -> Self {
        self.datum_tokenizer = Some(tokenizer);
        self
    }

    pub fn query_tokenizer(mut self, tokenizer: QueryTokenizer) -> Self {
        self.query_tokenizer = Some(tokenizer);
        self
    }

    pub fn local(mut self, local: impl Into<LocalSource>) -> Self {
        self.local = Some(local.into());
        self
    }

    pub fn prefetch(mut self, prefetch: impl Into<PrefetchOptions>) -> Self {
        self.prefetch = Some(prefetch.into());
        self
    }

    pub fn remote(mut self, remote: impl Into<RemoteOptions>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    /// Replace the default HTTP/file fetcher
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Share response cache and request limits with other engines on `pool`
    ///
    /// Defaults to [`TransportPool::global`].
    pub fn pool(mut self, pool: Arc<TransportPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Cap simultaneous remote requests on the engine's pool
    pub fn max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = Some(max);
        self
    }

    /// Where prefetched data is persisted; without one nothing is persisted
    pub fn substrate(mut self, substrate: Arc<dyn Substrate>) -> Self {
        self.substrate = Some(substrate);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and create the engine
    pub fn build(self) -> Result<SuggestionEngine> {
        if self.local.is_none() && self.prefetch.is_none() && self.remote.is_none() {
            return Err(EngineError::Config(
                "one of local, prefetch or remote is required".into(),
            ));
        }
        if let Some(prefetch) = &self.prefetch {
            if prefetch.url.trim().is_empty() {
                return Err(EngineError::Config("prefetch url is empty".into()));
            }
        }
        if let Some(remote) = &self.remote {
            if remote.url.trim().is_empty() {
                return Err(EngineError::Config("remote url is empty".into()));
            }
        }

        let mut index = SearchIndex::builder();
        if let Some(tokenizer) = self.datum_tokenizer {
            index = index.datum_tokenizer(tokenizer);
        }
        if let Some(tokenizer) = self.query_tokenizer {
            index = index.query_tokenizer(tokenizer);
        }
        let index = index
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(DefaultFetcher::new()) as Arc<dyn Fetcher>);
        let pool = self.pool.unwrap_or_else(TransportPool::global);
        if let Some(max) = self.max_pending_requests {
            pool.set_max_pending_requests(max);
        }

        let clock = self.clock.unwrap_or_else(system_clock);
        let storage = self.prefetch.as_ref().map(|prefetch| {
            PersistentStore::with_clock(prefetch.cache_key(), self.substrate.clone(), clock)
        });

        let transport = self.remote.as_ref().map(|remote| {
            Transport::new(
                Arc::clone(&pool),
                Arc::clone(&fetcher),
                TransportOptions {
                    rate_limit: Some(remote.rate_limit),
                    cache: remote.cache,
                },
            )
        });

        Ok(SuggestionEngine {
            inner: Arc::new(EngineInner {
                limit: self.limit,
                sorter: self.sorter,
                dup_detector: self.dup_detector,
                local: self.local,
                prefetch: self.prefetch,
                remote: self.remote,
                index: RwLock::new(index),
                storage,
                transport,
                fetcher,
                pool,
                generation: AtomicU64::new(0),
                initialization: Mutex::new(None),
            }),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            sorter: None,
            dup_detector: None,
            datum_tokenizer: None,
            query_tokenizer: None,
            local: None,
            prefetch: None,
            remote: None,
            fetcher: None,
            pool: None,
            max_pending_requests: None,
            substrate: None,
            clock: None,
        }
    }
}

/// Autocomplete suggestion engine
///
/// Local and prefetched data are searched synchronously through an in-memory
/// index. When that yields fewer than `limit` matches and a remote source is
/// configured, the remote endpoint backfills the result. Local matches always
/// come first and are never displaced.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct SuggestionEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    limit: usize,
    sorter: Option<Sorter>,
    dup_detector: Option<DupDetector>,
    local: Option<LocalSource>,
    prefetch: Option<PrefetchOptions>,
    remote: Option<RemoteOptions>,
    index: RwLock<SearchIndex>,
    storage: Option<PersistentStore>,
    transport: Option<Transport>,
    fetcher: Arc<dyn Fetcher>,
    pool: Arc<TransportPool>,
    generation: AtomicU64,
    initialization: Mutex<Option<Initialization>>,
}

impl SuggestionEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Load prefetched and local data into the index
    ///
    /// Loading starts on a spawned task right away, so the returned handle
    /// may be dropped. Later calls return the first handle unless `force`
    /// is set, which reloads.
    pub fn initialize(&self, force: bool) -> Initialization {
        let mut slot = self.inner.initialization.lock();
        if !force {
            if let Some(existing) = slot.as_ref() {
                return existing.clone();
            }
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.load().await });
        let initialization = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(EngineError::Aborted(e.to_string())),
            }
        }
        .boxed()
        .shared();

        *slot = Some(initialization.clone());
        initialization
    }

    /// Index additional datums
    pub fn add<I>(&self, data: I)
    where
        I: IntoIterator<Item = Datum>,
    {
        self.inner.index.write().add(data);
    }

    /// Look up suggestions for `query`
    ///
    /// When the local index satisfies the limit, or there is no remote
    /// source, `callback` runs before this returns. Otherwise it runs once the
    /// remote response arrives, with local matches backfilled by remote ones.
    /// A later `get` supersedes this one: its callback is then dropped
    /// without being called. Remote lookups need a tokio runtime.
    pub fn get(&self, query: &str, callback: impl FnOnce(Vec<Datum>) + Send + 'static) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut matches = self.inner.index.read().get(query);
        self.inner.sort(&mut matches);
        matches.truncate(self.inner.limit);

        let (remote, transport) = match (&self.inner.remote, &self.inner.transport) {
            (Some(remote), Some(transport)) if matches.len() < self.inner.limit => {
                (remote, transport)
            }
            (_, transport) => {
                if let Some(transport) = transport {
                    transport.cancel();
                }
                callback(matches);
                return;
            }
        };

        let url = remote.build_url(query);
        debug!("Backfilling {} local matches from {}", matches.len(), url);

        let inner = Arc::clone(&self.inner);
        let on_response = Box::new(move |result: scout_client::Result<Value>| {
            if inner.generation.load(Ordering::SeqCst) != generation {
                debug!("Discarding stale response for generation {}", generation);
                return;
            }
            match result {
                Ok(response) => {
                    let filter = inner.remote.as_ref().and_then(|r| r.filter.as_ref());
                    let remote_matches = filter_response(filter, response);
                    callback(inner.backfill(matches, remote_matches));
                }
                Err(e) => {
                    debug!("Remote lookup failed: {}", e);
                    callback(inner.backfill(matches, Vec::new()));
                }
            }
        });
        transport.get(&url, remote.request_options.clone(), on_response);
    }

    /// Look up suggestions, waiting for any remote backfill
    ///
    /// Returns `None` if a later lookup superseded this one.
    pub async fn suggest(&self, query: &str) -> Option<Vec<Datum>> {
        let (tx, rx) = oneshot::channel();
        self.get(query, move |datums| {
            let _ = tx.send(datums);
        });
        rx.await.ok()
    }

    /// Adapter for widgets taking a callback-style source
    pub fn source(&self) -> Source {
        let engine = self.clone();
        Arc::new(move |query: &str, callback: Box<dyn FnOnce(Vec<Datum>) + Send>| {
            engine.get(query, callback)
        })
    }

    /// Empty the search index
    pub fn clear(&self) {
        self.inner.index.write().reset();
    }

    /// Forget the persisted prefetch data
    pub async fn clear_prefetch_cache(&self) {
        if let Some(storage) = &self.inner.storage {
            storage.clear().await;
        }
    }

    /// Reset the response cache shared by every engine on this pool
    pub fn clear_remote_cache(&self) {
        if self.inner.transport.is_some() {
            self.inner.pool.reset_cache();
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Number of indexed datums
    pub fn len(&self) -> usize {
        self.inner.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.index.read().is_empty()
    }
}

impl EngineInner {
    async fn load(&self) -> Result<()> {
        let mut outcome = Ok(());
        self.index.write().reset();

        if let Some(prefetch) = &self.prefetch {
            if let Err(e) = self.load_prefetch(prefetch).await {
                warn!("{}", e);
                outcome = Err(e);
            }
        }

        if let Some(local) = &self.local {
            let data = local.resolve();
            debug!("Adding {} local datums", data.len());
            self.index.write().add(data);
        }

        outcome
    }

    async fn load_prefetch(&self, prefetch: &PrefetchOptions) -> Result<()> {
        let thumbprint = format!("{}{}", env!("CARGO_PKG_VERSION"), prefetch.thumbprint);
        let protocol = resolve_url(&prefetch.url)
            .map(|url| url.scheme().to_string())
            .unwrap_or_default();

        if let Some(snapshot) = self.restore(&thumbprint, &protocol).await {
            let count = snapshot.datums.len();
            let restored = self.index.write().bootstrap(snapshot);
            match restored {
                Ok(()) => {
                    info!("Restored {} prefetched datums for {}", count, prefetch.url);
                    return Ok(());
                }
                Err(e) => warn!("Ignoring persisted index for {}: {}", prefetch.url, e),
            }
        }

        let response = self
            .fetcher
            .fetch(&prefetch.url, &prefetch.request_options)
            .await
            .map_err(|e| EngineError::Prefetch(format!("{}: {}", prefetch.url, e)))?;
        let data = filter_response(prefetch.filter.as_ref(), response);

        let snapshot = {
            let mut index = self.index.write();
            index.reset();
            index.add(data);
            index.serialize()
        };
        info!("Prefetched {} datums from {}", snapshot.datums.len(), prefetch.url);

        if let Some(storage) = &self.storage {
            let ttl = Some(prefetch.ttl);
            storage.set(DATA_KEY, &snapshot, ttl).await;
            storage.set(PROTOCOL_KEY, &protocol, ttl).await;
            storage.set(THUMBPRINT_KEY, &thumbprint, ttl).await;
        }
        Ok(())
    }

    async fn restore(&self, thumbprint: &str, protocol: &str) -> Option<SerializedIndex> {
        let storage = self.storage.as_ref()?;

        let stored_thumbprint: String = storage.get(THUMBPRINT_KEY).await?;
        let stored_protocol: String = storage.get(PROTOCOL_KEY).await?;
        if stored_thumbprint != thumbprint || stored_protocol != protocol {
            debug!(
                "Persisted prefetch is stale ({} over {}, want {} over {})",
                stored_thumbprint, stored_protocol, thumbprint, protocol
            );
            return None;
        }

        storage.get(DATA_KEY).await
    }

    fn sort(&self, datums: &mut [Datum]) {
        if let Some(sorter) = &self.sorter {
            datums.sort_by(|a, b| sorter(a, b));
        }
    }

    /// Append remote datums to `matches` until the limit, skipping duplicates
    fn backfill(&self, mut matches: Vec<Datum>, remote: Vec<Datum>) -> Vec<Datum> {
        for candidate in remote {
            if matches.len() >= self.limit {
                break;
            }
            let duplicate = self.dup_detector.as_ref().is_some_and(|is_duplicate| {
                matches.iter().any(|existing| is_duplicate(&candidate, existing))
            });
            if !duplicate {
                matches.push(candidate);
            }
        }

        self.sort(&mut matches);
        matches
    }
}

fn filter_response(filter: Option<&ResponseFilter>, response: Value) -> Vec<Datum> {
    match filter {
        Some(filter) => filter.apply(response),
        None => datums_from_response(response).unwrap_or_else(|| {
            warn!("Response is not an array and no filter is configured, ignoring it");
            Vec::new()
        }),
    }
}

impl fmt::Debug for SuggestionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuggestionEngine")
            .field("limit", &self.inner.limit)
            .field("local", &self.inner.local)
            .field("prefetch", &self.inner.prefetch)
            .field("remote", &self.inner.remote)
            .field("index", &*self.inner.index.read())
            .finish()
    }
}
