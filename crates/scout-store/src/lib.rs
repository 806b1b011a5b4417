//! Scout Store - Caching and persistence
//!
//! This crate provides:
//! - A fixed-capacity LRU cache with O(1) get and set
//! - A namespaced, TTL-aware key-value store that degrades to a no-op
//! - Durable substrates backing that store (in-memory and directory-based)

pub mod error;
pub mod lru;
pub mod persistent;
pub mod substrate;

pub use error::*;
pub use lru::*;
pub use persistent::*;
pub use substrate::*;
