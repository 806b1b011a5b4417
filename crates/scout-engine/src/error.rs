//! Error types for scout-engine

use thiserror::Error;

/// Errors surfaced by the engine
///
/// Cloneable so every holder of an initialization handle sees the outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Prefetch failed: {0}")]
    Prefetch(String),

    #[error("Initialization aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
