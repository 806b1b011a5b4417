//! Source descriptors - where suggestions come from
//!
//! An engine draws from up to three sources:
//! - `LocalSource`: data handed over in-process
//! - `PrefetchOptions`: a bulk dataset fetched once and persisted between sessions
//! - `RemoteOptions`: an endpoint queried per keystroke

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{CoreError, Result};
use crate::Datum;

/// Orders suggestions before they are handed back
pub type Sorter = Arc<dyn Fn(&Datum, &Datum) -> Ordering + Send + Sync>;

/// Decides whether a remote suggestion duplicates one already present
pub type DupDetector = Arc<dyn Fn(&Datum, &Datum) -> bool + Send + Sync>;

/// Builds a remote URL from the configured template and the raw query
pub type UrlBuilder = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Default lifetime of a persisted prefetch dataset
pub const DEFAULT_PREFETCH_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Placeholder replaced by the encoded query in remote URL templates
pub const DEFAULT_WILDCARD: &str = "%QUERY";

/// Default wait for remote rate limiting
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_millis(300);

/// Turns a raw fetched response into datums
#[derive(Clone)]
pub struct ResponseFilter(Arc<dyn Fn(Value) -> Vec<Datum> + Send + Sync>);

impl ResponseFilter {
    /// Wrap an arbitrary transformation
    pub fn new(filter: impl Fn(Value) -> Vec<Datum> + Send + Sync + 'static) -> Self {
        Self(Arc::new(filter))
    }

    /// Turn an array of strings into objects carrying the string under `field`
    ///
    /// Non-string elements pass through unchanged.
    pub fn wrap_strings(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(move |response| {
            datums_from_response(response)
                .unwrap_or_default()
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => {
                        let mut object = Map::new();
                        object.insert(field.clone(), Value::String(s));
                        Value::Object(object)
                    }
                    other => other,
                })
                .collect()
        })
    }

    /// Read the array stored under `key` of an object response
    pub fn pluck(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(move |mut response| {
            response
                .get_mut(&key)
                .map(Value::take)
                .and_then(datums_from_response)
                .unwrap_or_default()
        })
    }

    pub fn apply(&self, response: Value) -> Vec<Datum> {
        (self.0)(response)
    }
}

impl fmt::Debug for ResponseFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseFilter(..)")
    }
}

/// Elements of an array response, or `None` for any other shape
pub fn datums_from_response(response: Value) -> Option<Vec<Datum>> {
    match response {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

/// Data supplied in-process
#[derive(Clone)]
pub enum LocalSource {
    /// A fixed collection
    Static(Vec<Datum>),

    /// A producer called each time the engine initializes
    Lazy(Arc<dyn Fn() -> Vec<Datum> + Send + Sync>),
}

impl LocalSource {
    pub fn lazy(producer: impl Fn() -> Vec<Datum> + Send + Sync + 'static) -> Self {
        Self::Lazy(Arc::new(producer))
    }

    /// Materialize the datums
    pub fn resolve(&self) -> Vec<Datum> {
        match self {
            LocalSource::Static(datums) => datums.clone(),
            LocalSource::Lazy(producer) => producer(),
        }
    }
}

impl From<Vec<Datum>> for LocalSource {
    fn from(datums: Vec<Datum>) -> Self {
        Self::Static(datums)
    }
}

impl fmt::Debug for LocalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalSource::Static(datums) => f.debug_tuple("Static").field(&datums.len()).finish(),
            LocalSource::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

/// How remote lookups are paced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimit {
    /// Fire only after the given quiet period; superseded calls are dropped
    Debounce(Duration),

    /// Fire at most once per window, deferring the latest call to the window boundary
    Throttle(Duration),
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit::Debounce(DEFAULT_RATE_LIMIT_WAIT)
    }
}

/// HTTP method used by a fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
}

/// Options passed through to the fetcher
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Parse a `Name: value` header line
    pub fn parse_header(line: &str) -> Result<(String, String)> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidHeader(line.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidHeader(line.to_string()));
        }
        Ok((name.to_string(), value.trim().to_string()))
    }
}

/// A bulk dataset fetched at initialization and cached persistently
#[derive(Debug, Clone)]
pub struct PrefetchOptions {
    /// Where the dataset lives
    pub url: String,

    /// Storage namespace (defaults to the URL)
    pub cache_key: Option<String>,

    /// Changing this invalidates a previously persisted copy
    pub thumbprint: String,

    /// How long a persisted copy stays valid
    pub ttl: Duration,

    pub filter: Option<ResponseFilter>,

    pub request_options: RequestOptions,
}

impl PrefetchOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cache_key: None,
            thumbprint: String::new(),
            ttl: DEFAULT_PREFETCH_TTL,
            filter: None,
            request_options: RequestOptions::default(),
        }
    }

    pub fn with_cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.cache_key = Some(cache_key.into());
        self
    }

    pub fn with_thumbprint(mut self, thumbprint: impl Into<String>) -> Self {
        self.thumbprint = thumbprint.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_filter(mut self, filter: ResponseFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_request_options(mut self, options: RequestOptions) -> Self {
        self.request_options = options;
        self
    }

    /// Namespace used for the persisted copy
    pub fn cache_key(&self) -> &str {
        self.cache_key.as_deref().unwrap_or(&self.url)
    }
}

impl From<&str> for PrefetchOptions {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for PrefetchOptions {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

/// An endpoint queried for matches the local index cannot supply
#[derive(Clone)]
pub struct RemoteOptions {
    /// URL template containing the wildcard token
    pub url: String,

    pub wildcard: String,

    /// Overrides wildcard substitution when set
    pub url_builder: Option<UrlBuilder>,

    pub rate_limit: RateLimit,

    pub filter: Option<ResponseFilter>,

    pub request_options: RequestOptions,

    /// Whether responses go through the shared response cache
    pub cache: bool,
}

impl RemoteOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            wildcard: DEFAULT_WILDCARD.to_string(),
            url_builder: None,
            rate_limit: RateLimit::default(),
            filter: None,
            request_options: RequestOptions::default(),
            cache: true,
        }
    }

    pub fn with_wildcard(mut self, wildcard: impl Into<String>) -> Self {
        self.wildcard = wildcard.into();
        self
    }

    pub fn with_url_builder(
        mut self,
        builder: impl Fn(&str, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.url_builder = Some(Arc::new(builder));
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_filter(mut self, filter: ResponseFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_request_options(mut self, options: RequestOptions) -> Self {
        self.request_options = options;
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// The URL to request for a query
    ///
    /// The first occurrence of the wildcard is replaced by the form-encoded query.
    pub fn build_url(&self, query: &str) -> String {
        if let Some(builder) = &self.url_builder {
            return builder(&self.url, query);
        }
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        self.url.replacen(&self.wildcard, &encoded, 1)
    }
}

impl From<&str> for RemoteOptions {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for RemoteOptions {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

impl fmt::Debug for RemoteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteOptions")
            .field("url", &self.url)
            .field("wildcard", &self.wildcard)
            .field("url_builder", &self.url_builder.is_some())
            .field("rate_limit", &self.rate_limit)
            .field("filter", &self.filter)
            .field("request_options", &self.request_options)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Resolve a configured location to a URL
///
/// Absolute URLs are parsed as-is; anything else is taken as a filesystem
/// path relative to the working directory.
pub fn resolve_url(raw: &str) -> Result<Url> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = Path::new(raw);
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()?.join(path)
            };
            Url::from_file_path(&absolute)
                .map_err(|_| CoreError::InvalidPath(absolute.display().to_string()))
        }
        Err(e) => Err(CoreError::InvalidUrl(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_url_replaces_first_wildcard() {
        let remote = RemoteOptions::new("https://api.test/search?q=%QUERY&echo=%QUERY");
        assert_eq!(
            remote.build_url("new york&co"),
            "https://api.test/search?q=new+york%26co&echo=%QUERY"
        );
    }

    #[test]
    fn test_build_url_custom_wildcard_and_builder() {
        let remote = RemoteOptions::new("https://api.test/{q}").with_wildcard("{q}");
        assert_eq!(remote.build_url("abc"), "https://api.test/abc");

        let remote = RemoteOptions::new("https://api.test/")
            .with_url_builder(|url, query| format!("{url}{}", query.to_uppercase()));
        assert_eq!(remote.build_url("abc"), "https://api.test/ABC");
    }

    #[test]
    fn test_string_shorthand() {
        let prefetch: PrefetchOptions = "data/countries.json".into();
        assert_eq!(prefetch.cache_key(), "data/countries.json");
        assert_eq!(prefetch.ttl, DEFAULT_PREFETCH_TTL);

        let remote: RemoteOptions = "https://api.test/%QUERY".into();
        assert_eq!(remote.rate_limit, RateLimit::Debounce(DEFAULT_RATE_LIMIT_WAIT));
        assert!(remote.cache);
    }

    #[test]
    fn test_wrap_strings_filter() {
        let filter = ResponseFilter::wrap_strings("name");
        let datums = filter.apply(json!(["Chile", 7]));
        assert_eq!(datums, vec![json!({ "name": "Chile" }), json!(7)]);
        assert!(filter.apply(json!({ "not": "an array" })).is_empty());
    }

    #[test]
    fn test_pluck_filter() {
        let filter = ResponseFilter::pluck("results");
        let datums = filter.apply(json!({ "results": [{ "id": 1 }], "total": 1 }));
        assert_eq!(datums, vec![json!({ "id": 1 })]);
        assert!(filter.apply(json!({ "total": 0 })).is_empty());
    }

    #[test]
    fn test_lazy_local_source() {
        let local = LocalSource::lazy(|| vec![json!("a"), json!("b")]);
        assert_eq!(local.resolve().len(), 2);
    }

    #[test]
    fn test_parse_header() {
        let (name, value) = RequestOptions::parse_header("Authorization: Bearer x:y").unwrap();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer x:y");
        assert!(RequestOptions::parse_header("no-colon").is_err());
        assert!(RequestOptions::parse_header(": empty").is_err());
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url("https://a.test/x").unwrap().scheme(), "https");
        assert_eq!(resolve_url("data/list.json").unwrap().scheme(), "file");
    }
}
