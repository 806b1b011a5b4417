//! Engine configuration files

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use scout_core::tokenize::{datum, obj, query};
use scout_core::{
    Datum, Method, PrefetchOptions, RateLimit, RemoteOptions, RequestOptions, ResponseFilter,
};
use scout_store::DirectorySubstrate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{info, warn};

use crate::engine::{EngineBuilder, SuggestionEngine};
use crate::error::{EngineError, Result};

/// Serialized form of an engine configuration
///
/// ```json
/// {
///   "limit": 8,
///   "fields": ["name"],
///   "tokenizer": "nonword",
///   "prefetch": "data/countries.json",
///   "remote": {
///     "url": "https://api.example.com/search?q=%QUERY",
///     "rate_limit": { "type": "throttle", "wait_ms": 200 }
///   },
///   "cache_dir": "/var/cache/scout"
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum suggestions per query
    pub limit: Option<usize>,

    /// Object fields to tokenize; empty tokenizes the whole datum
    pub fields: Vec<String>,

    pub tokenizer: TokenizerKind,

    /// Field compared to detect duplicate remote suggestions
    pub dedupe_by: Option<String>,

    /// Field suggestions are ordered by
    pub sort_by: Option<String>,

    /// Inline datums
    pub local: Vec<Datum>,

    pub prefetch: Option<PrefetchConfig>,

    pub remote: Option<RemoteConfig>,

    /// Directory persisting prefetched data between runs
    pub cache_dir: Option<PathBuf>,

    pub max_pending_requests: Option<usize>,
}

/// How datums and queries are split into tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// Split on whitespace runs
    #[default]
    Whitespace,

    /// Split on anything that is not a letter, digit or underscore
    Nonword,
}

/// A prefetch source: a bare URL or a full description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefetchConfig {
    Url(String),
    Detailed(PrefetchSettings),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchSettings {
    pub url: String,

    #[serde(default)]
    pub cache_key: Option<String>,

    #[serde(default)]
    pub thumbprint: String,

    /// Lifetime of the persisted copy
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    #[serde(default)]
    pub filter: Option<FilterConfig>,

    #[serde(default)]
    pub request: RequestConfig,
}

/// A remote source: a bare URL template or a full description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteConfig {
    Url(String),
    Detailed(RemoteSettings),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// URL template containing the wildcard
    pub url: String,

    #[serde(default)]
    pub wildcard: Option<String>,

    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,

    #[serde(default)]
    pub filter: Option<FilterConfig>,

    #[serde(default)]
    pub request: RequestConfig,

    /// Whether responses go through the shared response cache
    #[serde(default)]
    pub cache: Option<bool>,
}

/// Built-in response filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    /// Turn an array of strings into objects holding each string under `field`
    WrapStrings { field: String },

    /// Read the array stored under `key`
    Pluck { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateLimitConfig {
    Debounce { wait_ms: u64 },
    Throttle { wait_ms: u64 },
}

/// Request details passed to the fetcher
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub method: Method,

    /// `Name: value` lines
    pub headers: Vec<String>,

    pub body: Option<String>,

    pub timeout_ms: Option<u64>,
}

impl EngineConfig {
    /// Parse a configuration from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Read a JSON configuration file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&json)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Turn the configuration into a builder
    ///
    /// A `cache_dir` that cannot be opened is logged and persistence is
    /// left disabled.
    pub async fn into_builder(self) -> Result<EngineBuilder> {
        let (datum_tokenizer, query_tokenizer) = match (self.tokenizer, self.fields.is_empty()) {
            (TokenizerKind::Whitespace, true) => (datum::whitespace(), query::whitespace()),
            (TokenizerKind::Nonword, true) => (datum::nonword(), query::nonword()),
            (TokenizerKind::Whitespace, false) => {
                (obj::whitespace(self.fields), query::whitespace())
            }
            (TokenizerKind::Nonword, false) => (obj::nonword(self.fields), query::nonword()),
        };

        let mut builder = SuggestionEngine::builder()
            .datum_tokenizer(datum_tokenizer)
            .query_tokenizer(query_tokenizer);

        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        if let Some(field) = self.dedupe_by {
            builder = builder.dup_detector(move |a, b| field_of(a, &field) == field_of(b, &field));
        }
        if let Some(field) = self.sort_by {
            builder = builder
                .sorter(move |a, b| compare_values(field_of(a, &field), field_of(b, &field)));
        }
        if !self.local.is_empty() {
            builder = builder.local(self.local);
        }
        if let Some(prefetch) = self.prefetch {
            builder = builder.prefetch(prefetch.into_options()?);
        }
        if let Some(remote) = self.remote {
            builder = builder.remote(remote.into_options()?);
        }
        if let Some(max) = self.max_pending_requests {
            builder = builder.max_pending_requests(max);
        }
        if let Some(dir) = self.cache_dir {
            match DirectorySubstrate::open(&dir).await {
                Ok(substrate) => builder = builder.substrate(Arc::new(substrate)),
                Err(e) => warn!("Cache directory {:?} unusable, not persisting: {}", dir, e),
            }
        }

        Ok(builder)
    }
}

impl PrefetchConfig {
    pub fn into_options(self) -> Result<PrefetchOptions> {
        let settings = match self {
            PrefetchConfig::Url(url) => return Ok(PrefetchOptions::new(url)),
            PrefetchConfig::Detailed(settings) => settings,
        };

        let mut options = PrefetchOptions::new(settings.url)
            .with_thumbprint(settings.thumbprint)
            .with_request_options(settings.request.into_options()?);
        if let Some(cache_key) = settings.cache_key {
            options = options.with_cache_key(cache_key);
        }
        if let Some(ttl) = settings.ttl_secs {
            options = options.with_ttl(Duration::from_secs(ttl));
        }
        if let Some(filter) = settings.filter {
            options = options.with_filter(filter.into_filter());
        }
        Ok(options)
    }
}

impl RemoteConfig {
    pub fn into_options(self) -> Result<RemoteOptions> {
        let settings = match self {
            RemoteConfig::Url(url) => return Ok(RemoteOptions::new(url)),
            RemoteConfig::Detailed(settings) => settings,
        };

        let mut options =
            RemoteOptions::new(settings.url).with_request_options(settings.request.into_options()?);
        if let Some(wildcard) = settings.wildcard {
            options = options.with_wildcard(wildcard);
        }
        if let Some(rate_limit) = settings.rate_limit {
            options = options.with_rate_limit(rate_limit.into());
        }
        if let Some(filter) = settings.filter {
            options = options.with_filter(filter.into_filter());
        }
        if let Some(cache) = settings.cache {
            options = options.with_cache(cache);
        }
        Ok(options)
    }
}

impl FilterConfig {
    pub fn into_filter(self) -> ResponseFilter {
        match self {
            FilterConfig::WrapStrings { field } => ResponseFilter::wrap_strings(field),
            FilterConfig::Pluck { key } => ResponseFilter::pluck(key),
        }
    }
}

impl From<RateLimitConfig> for RateLimit {
    fn from(config: RateLimitConfig) -> Self {
        match config {
            RateLimitConfig::Debounce { wait_ms } => {
                RateLimit::Debounce(Duration::from_millis(wait_ms))
            }
            RateLimitConfig::Throttle { wait_ms } => {
                RateLimit::Throttle(Duration::from_millis(wait_ms))
            }
        }
    }
}

impl RequestConfig {
    pub fn into_options(self) -> Result<RequestOptions> {
        let headers = self
            .headers
            .iter()
            .map(|line| RequestOptions::parse_header(line))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        Ok(RequestOptions {
            method: self.method,
            headers,
            body: self.body,
            timeout: self.timeout_ms.map(Duration::from_millis),
        })
    }
}

/// The value under `field`, or the whole datum when it has none
fn field_of<'a>(datum: &'a Datum, field: &str) -> &'a Value {
    datum.get(field).unwrap_or(datum)
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
