//! Scout Search - Token trie index for autocomplete lookups
//!
//! This crate provides:
//! - A character trie where every prefix node remembers the datums passing through it
//! - Multi-token AND queries answered by intersecting sorted id lists
//! - Snapshots of the whole index for persistence and later bootstrap

pub mod error;
pub mod index;
pub mod trie;

pub use error::*;
pub use index::*;
pub use trie::*;
