//! Lazily built, reference-counted index readers and the cache that owns
//! them.
//!
//! - [`ReaderHandle`]: one opened reader with its reference count and
//!   exactly-once close.
//! - [`IndexReaderCache`]: identity → handle mapping with single-build
//!   get-or-create and atomic bulk eviction.
//! - [`CacheRegistry`]: the database-wide owner of the cache, wired to
//!   schema events.

pub mod cache;
pub mod handle;
pub mod registry;
pub mod stats;

pub use cache::IndexReaderCache;
pub use handle::{ReaderGuard, ReaderHandle};
pub use registry::CacheRegistry;
pub use stats::{CacheStats, CacheStatsSnapshot};
