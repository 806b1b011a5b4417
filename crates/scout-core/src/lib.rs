//! Scout Core - Core types and tokenizers for the suggestion engine
//!
//! This crate defines the fundamental pieces shared by every other Scout crate:
//! - `Datum`: The opaque record that gets indexed and suggested
//! - `tokenize`: Splitting text and datums into normalized tokens
//! - `source`: Descriptors for local, prefetched and remote data sources
//! - `clock`: Wall-clock access that tests can control

pub mod clock;
pub mod error;
pub mod source;
pub mod tokenize;

pub use clock::*;
pub use error::*;
pub use source::*;
pub use tokenize::{DatumTokenizer, QueryTokenizer};

/// A single indexed record. Opaque to the index; tokenizers decide what is searchable.
pub type Datum = serde_json::Value;
