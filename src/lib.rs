//! A GC-avoiding, fixed-capacity, bytes-oriented key/value cache.
//!
//! Storage is split into two generations ("segments"); writes always land
//! in the active one, and a segment that runs out of room or hits its
//! entry cap is reset and swapped in wholesale rather than evicted from key
//! by key. See [`Cache`] for the entry point.

mod arena;
mod cache;
mod config;
mod error;
mod hash;
mod index;
mod segment;
mod shard_table;

pub use cache::{Cache, RotateCallback};
pub use config::Config;
pub use error::CacheError;
