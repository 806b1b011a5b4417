//! Error types for scout-store

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Substrate unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid store path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
