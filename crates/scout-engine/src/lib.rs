//! Scout Engine - Ranked, de-duplicated suggestions
//!
//! This crate provides:
//! - `SuggestionEngine`, which merges an in-memory search index (fed by local
//!   and prefetched data) with a remote endpoint queried through a transport
//! - `EngineBuilder` for programmatic configuration
//! - `EngineConfig`, the serde (JSON) form of the same configuration

pub mod config;
pub mod engine;
pub mod error;

pub use config::*;
pub use engine::*;
pub use error::*;
