//! Error types for scout-client

use thiserror::Error;

/// Why a fetch failed
///
/// Cloneable because one failure is delivered to every caller waiting on the
/// same request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Timeout")]
    Timeout,

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
