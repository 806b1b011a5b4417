//! Fetchers - the capability to retrieve a URL as JSON

use std::path::PathBuf;

use async_trait::async_trait;
use scout_core::{resolve_url, Method, RequestOptions};
use serde_json::Value;
use tokio::fs;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Retrieves a URL and decodes the body as JSON
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &RequestOptions) -> Result<Value>;
}

/// Fetcher for `http` and `https` URLs
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, TLS settings, default headers)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &RequestOptions) -> Result<Value> {
        let mut request = match options.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout
            } else {
                ClientError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        debug!("Fetched {} ({})", url, status);
        response
            .json::<Value>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Fetcher for `file://` URLs and bare filesystem paths
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl FileFetcher {
    fn path_of(raw: &str) -> Result<PathBuf> {
        let url = resolve_url(raw).map_err(|e| ClientError::UnsupportedUrl(e.to_string()))?;
        if url.scheme() != "file" {
            return Err(ClientError::UnsupportedUrl(raw.to_string()));
        }
        url.to_file_path()
            .map_err(|_| ClientError::UnsupportedUrl(raw.to_string()))
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, url: &str, _options: &RequestOptions) -> Result<Value> {
        let path = Self::path_of(url)?;
        let body = fs::read_to_string(&path)
            .await
            .map_err(|e| ClientError::Io(format!("{}: {}", path.display(), e)))?;

        debug!("Read {} bytes from {:?}", body.len(), path);
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Routes each URL to the HTTP or file fetcher by scheme
#[derive(Debug, Clone, Default)]
pub struct DefaultFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Fetcher for DefaultFetcher {
    async fn fetch(&self, url: &str, options: &RequestOptions) -> Result<Value> {
        let resolved = resolve_url(url).map_err(|e| ClientError::UnsupportedUrl(e.to_string()))?;
        match resolved.scheme() {
            "http" | "https" => self.http.fetch(url, options).await,
            "file" => self.file.fetch(url, options).await,
            other => Err(ClientError::UnsupportedUrl(format!(
                "{} (scheme '{}')",
                url, other
            ))),
        }
    }
}
