//! Cache capability for the latest known record.
//!
//! The cache holds at most one useful entry, the JSON wire form of the last
//! observed [`Record`](lastinfo_core::Record) under
//! [`LAST_INFO_KEY`](lastinfo_core::LAST_INFO_KEY). Every operation takes an
//! explicit timeout; a slow cache is reported as
//! [`CacheError::Timeout`](lastinfo_core::CacheError::Timeout), never waited
//! on indefinitely.

mod lmdb_backend;
mod memory;
mod traits;

pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory::InMemoryCacheStore;
pub use traits::{CacheRecordExt, CacheStats, CacheStore};
