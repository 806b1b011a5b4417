//! Error types for scout-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
