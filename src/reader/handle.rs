use super::stats::CacheStats;
use crate::error::{GriddleError, Result};
use crate::storage::IndexStorage;
use crate::types::IndexIdentity;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// High bit of `state`: the handle has been detached from the cache.
const EVICTED: usize = 1 << (usize::BITS - 1);
const REFS_MASK: usize = !EVICTED;

/// One opened index reader plus the bookkeeping that decides when it may be
/// closed.
///
/// The reference count and the evicted flag live in the same atomic word.
/// That makes "evicted with zero references" a single observable transition,
/// so exactly one thread sees it and closes, and no `acquire` can slip in
/// after it.
///
/// The underlying reader is closed (via [`IndexStorage::close_reader`])
/// exactly once:
/// - by [`mark_evicted`](Self::mark_evicted) when nothing holds it, or
/// - by the release that drops the last reference after eviction, or
/// - by [`force_close`](Self::force_close) at cache teardown.
pub struct ReaderHandle<S: IndexStorage> {
    identity: IndexIdentity,
    reader: S::Reader,
    storage: Arc<S>,
    state: AtomicUsize,
    closed: AtomicBool,
    stats: Arc<CacheStats>,
}

impl<S: IndexStorage> ReaderHandle<S> {
    pub(crate) fn new(
        identity: IndexIdentity,
        reader: S::Reader,
        storage: Arc<S>,
        stats: Arc<CacheStats>,
    ) -> Self {
        ReaderHandle {
            identity,
            reader,
            storage,
            state: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            stats,
        }
    }

    pub fn identity(&self) -> &IndexIdentity {
        &self.identity
    }

    /// Check out a reference. Fails once the handle is closed, or once it has
    /// been evicted and drained (its close is then already underway).
    pub fn acquire(self: &Arc<Self>) -> Result<ReaderGuard<S>> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if self.closed.load(Ordering::Acquire) || current == EVICTED {
                return Err(GriddleError::ResourceClosed(self.identity.to_string()));
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(ReaderGuard {
                        handle: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Only called from `ReaderGuard::drop`, so every release pairs with one
    /// successful acquire.
    fn release(&self) {
        let prev = self.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev & REFS_MASK > 0, "release without acquire");
        if prev == EVICTED | 1 {
            self.close();
        }
    }

    /// Detach from the cache. Closes now if unreferenced, otherwise the last
    /// release closes. Returns false if the handle was already evicted.
    pub fn mark_evicted(&self) -> bool {
        let prev = self.state.fetch_or(EVICTED, Ordering::AcqRel);
        if prev & EVICTED != 0 {
            return false;
        }
        if prev & REFS_MASK == 0 {
            self.close();
        }
        true
    }

    /// Teardown path: close regardless of outstanding references. Guards
    /// still alive keep their memory valid but no new acquire succeeds.
    pub fn force_close(&self) -> bool {
        self.state.fetch_or(EVICTED, Ordering::AcqRel);
        self.close()
    }

    fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if let Err(e) = self.storage.close_reader(&self.reader) {
            tracing::warn!(
                "[reader-cache] Closing reader for {} failed: {}",
                self.identity,
                e
            );
        }
        self.stats.inc_close();
        true
    }

    pub fn ref_count(&self) -> usize {
        self.state.load(Ordering::Acquire) & REFS_MASK
    }

    pub fn is_evicted(&self) -> bool {
        self.state.load(Ordering::Acquire) & EVICTED != 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<S: IndexStorage> Drop for ReaderHandle<S> {
    fn drop(&mut self) {
        // Reached without a close only when the owning cache itself is
        // dropped without shutdown.
        if !self.is_closed() {
            tracing::debug!(
                "[reader-cache] Closing reader for {} on drop",
                self.identity
            );
            self.close();
        }
    }
}

/// A checked-out reference to a cached reader. Dereferences to the reader;
/// dropping it releases the reference.
pub struct ReaderGuard<S: IndexStorage> {
    handle: Arc<ReaderHandle<S>>,
}

impl<S: IndexStorage> ReaderGuard<S> {
    pub fn handle(&self) -> &Arc<ReaderHandle<S>> {
        &self.handle
    }

    pub fn identity(&self) -> &IndexIdentity {
        &self.handle.identity
    }

    /// Explicit release; same as dropping the guard.
    pub fn release(self) {}
}

impl<S: IndexStorage> Deref for ReaderGuard<S> {
    type Target = S::Reader;

    fn deref(&self) -> &S::Reader {
        &self.handle.reader
    }
}

impl<S: IndexStorage> Drop for ReaderGuard<S> {
    fn drop(&mut self) {
        self.handle.release();
    }
}
