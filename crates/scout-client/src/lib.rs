//! Scout Client - Fetching suggestion data
//!
//! This crate provides:
//! - The `Fetcher` capability, with HTTP and file implementations
//! - A `Transport` that caches responses, coalesces identical in-flight
//!   requests and caps concurrency with a single on-deck slot
//! - Debounce and throttle rate limiting
//! - `TransportPool`, the state shared by every transport using it

pub mod error;
pub mod fetch;
pub mod pool;
pub mod rate_limit;
pub mod transport;

pub use error::*;
pub use fetch::*;
pub use pool::*;
pub use rate_limit::*;
pub use transport::*;
