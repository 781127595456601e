use super::cache::IndexReaderCache;
use super::handle::ReaderGuard;
use crate::error::Result;
use crate::schema::SchemaListener;
use crate::storage::IndexStorage;
use crate::types::IndexIdentity;
use std::sync::Arc;

/// Owns the one reader cache of an open database.
///
/// Created by [`crate::Database::open`] and torn down by
/// [`crate::Database::shutdown`]. The query path reaches readers through
/// [`reader`](Self::reader); administrative operations reach the cache
/// through [`cache`](Self::cache).
pub struct CacheRegistry<S: IndexStorage> {
    cache: Arc<IndexReaderCache<S>>,
}

impl<S: IndexStorage> CacheRegistry<S> {
    pub fn new(storage: Arc<S>) -> Self {
        CacheRegistry {
            cache: Arc::new(IndexReaderCache::new(storage)),
        }
    }

    /// Reader for `identity`, built on first use.
    pub fn reader(&self, identity: &IndexIdentity) -> Result<ReaderGuard<S>> {
        self.cache.get_or_create(identity)
    }

    pub fn cache(&self) -> &Arc<IndexReaderCache<S>> {
        &self.cache
    }

    pub fn shutdown(&self) -> usize {
        self.cache.shutdown()
    }
}

impl<S: IndexStorage> SchemaListener for CacheRegistry<S> {
    // Readers stay lazy: the first query against the index builds one.
    fn index_created(&self, identity: &IndexIdentity) {
        tracing::debug!("[reader-cache] Index {} registered", identity);
    }

    fn index_dropped(&self, identity: &IndexIdentity) {
        if self.cache.evict(identity) {
            tracing::info!("[reader-cache] Evicted reader for dropped index {}", identity);
        }
    }
}
