//! Error types for scout-search

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Missing tokenizer: {0}")]
    MissingTokenizer(&'static str),

    #[error("Corrupt index snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SearchError>;
