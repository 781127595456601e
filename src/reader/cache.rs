use super::handle::{ReaderGuard, ReaderHandle};
use super::stats::{CacheStats, CacheStatsSnapshot};
use crate::error::{GriddleError, Result};
use crate::storage::IndexStorage;
use crate::types::IndexIdentity;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

/// Per-identity slot. The `OnceCell` is what serializes builders: the first
/// caller runs the build, concurrent callers block in `get_or_init` and
/// reuse the outcome, failure included. A failed slot is then unmapped so the
/// next caller retries.
type Slot<S> = Arc<OnceCell<Result<Arc<ReaderHandle<S>>>>>;

fn built_handle<S: IndexStorage>(slot: &Slot<S>) -> Option<Arc<ReaderHandle<S>>> {
    slot.get().and_then(|outcome| outcome.as_ref().ok()).cloned()
}

/// Concurrent identity → reader cache.
///
/// The slot map sits behind an `RwLock` used as a generation switch:
/// lookups and inserts take the read side for the length of one map
/// operation (never across a build), and [`clear_all`](Self::clear_all)
/// takes the write side to swap in an empty map. A lookup therefore sees
/// either the old map or the new one, never a half-cleared one.
pub struct IndexReaderCache<S: IndexStorage> {
    storage: Arc<S>,
    slots: RwLock<DashMap<IndexIdentity, Slot<S>>>,
    shut_down: AtomicBool,
    stats: Arc<CacheStats>,
}

impl<S: IndexStorage> IndexReaderCache<S> {
    pub fn new(storage: Arc<S>) -> Self {
        IndexReaderCache {
            storage,
            slots: RwLock::new(DashMap::new()),
            shut_down: AtomicBool::new(false),
            stats: Arc::new(CacheStats::default()),
        }
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, DashMap<IndexIdentity, Slot<S>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_for(&self, identity: &IndexIdentity) -> Slot<S> {
        let slots = self.read_slots();
        if let Some(slot) = slots.get(identity) {
            return Arc::clone(&slot);
        }
        let slot = slots
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()));
        Arc::clone(&slot)
    }

    fn is_attached(&self, identity: &IndexIdentity, slot: &Slot<S>) -> bool {
        self.read_slots()
            .get(identity)
            .map(|current| Arc::ptr_eq(&current, slot))
            .unwrap_or(false)
    }

    fn forget_failed(&self, identity: &IndexIdentity, slot: &Slot<S>) {
        self.read_slots()
            .remove_if(identity, |_, current| Arc::ptr_eq(current, slot));
    }

    fn build(&self, identity: &IndexIdentity) -> Result<Arc<ReaderHandle<S>>> {
        match self.storage.open_reader(identity) {
            Ok(reader) => {
                self.stats.inc_build();
                tracing::debug!("[reader-cache] Built reader for {}", identity);
                Ok(Arc::new(ReaderHandle::new(
                    identity.clone(),
                    reader,
                    Arc::clone(&self.storage),
                    Arc::clone(&self.stats),
                )))
            }
            Err(e) => {
                self.stats.inc_build_failure();
                tracing::warn!("[reader-cache] Building reader for {} failed: {}", identity, e);
                Err(GriddleError::BuildFailed {
                    index: identity.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Return the cached reader for `identity` with a reference held,
    /// building it first if absent.
    ///
    /// At most one build runs per identity; concurrent first callers wait for
    /// it and share its outcome. A build failure is returned to all of them as
    /// [`GriddleError::BuildFailed`] and nothing is cached.
    pub fn get_or_create(&self, identity: &IndexIdentity) -> Result<ReaderGuard<S>> {
        loop {
            if self.shut_down.load(Ordering::Acquire) {
                return Err(GriddleError::DatabaseShutdown);
            }

            let slot = self.slot_for(identity);
            let mut built = false;
            let handle = match slot.get_or_init(|| {
                built = true;
                self.build(identity)
            }) {
                Ok(handle) => Arc::clone(handle),
                Err(e) => {
                    if built {
                        self.forget_failed(identity, &slot);
                    }
                    return Err(e.clone());
                }
            };

            match handle.acquire() {
                Ok(guard) => {
                    if built {
                        self.stats.inc_miss();
                        // A clear or drop may have detached the slot while we
                        // were building; the handle then belongs to nobody.
                        if !self.is_attached(identity, &slot) {
                            handle.mark_evicted();
                        }
                    } else {
                        self.stats.inc_hit();
                    }
                    if self.shut_down.load(Ordering::Acquire) {
                        drop(guard);
                        self.evict(identity);
                        return Err(GriddleError::DatabaseShutdown);
                    }
                    return Ok(guard);
                }
                Err(e @ GriddleError::ResourceClosed(_)) => {
                    // Evicted and drained between lookup and acquire: the
                    // slot is gone from the map and the next pass rebuilds.
                    // Closed while still mapped means the cache invariant
                    // broke; surface it.
                    if self.is_attached(identity, &slot) {
                        tracing::error!(
                            "[reader-cache] Reader for {} is closed but still cached",
                            identity
                        );
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Detach every cached reader in one step and mark each evicted.
    ///
    /// Returns how many readers the detached mapping held. Readers still in
    /// use close when their last reference is released; slots whose build
    /// was in flight are not counted and get evicted by their builder.
    pub fn clear_all(&self) -> usize {
        let detached = self.detach_all();
        for handle in &detached {
            handle.mark_evicted();
        }
        self.stats.add_evictions(detached.len());
        detached.len()
    }

    fn detach_all(&self) -> Vec<Arc<ReaderHandle<S>>> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let old = std::mem::take(&mut *slots);
        drop(slots);
        old.into_iter().filter_map(|(_, slot)| built_handle(&slot)).collect()
    }

    /// Evict a single identity. Returns true if a built reader was removed.
    pub fn evict(&self, identity: &IndexIdentity) -> bool {
        let removed = self.read_slots().remove(identity);
        match removed.and_then(|(_, slot)| built_handle(&slot)) {
            Some(handle) => {
                handle.mark_evicted();
                self.stats.add_evictions(1);
                true
            }
            None => false,
        }
    }

    /// Teardown: detach everything, close every reader regardless of
    /// references, and refuse further lookups. Returns the number closed.
    pub fn shutdown(&self) -> usize {
        self.shut_down.store(true, Ordering::Release);
        let detached = self.detach_all();
        let closed = detached.iter().filter(|h| h.force_close()).count();
        if !detached.is_empty() {
            tracing::info!(
                "[shutdown] Closed {} of {} cached readers",
                closed,
                detached.len()
            );
        }
        closed
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Number of built readers currently mapped.
    pub fn len(&self) -> usize {
        self.read_slots()
            .iter()
            .filter(|slot| built_handle(slot.value()).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, identity: &IndexIdentity) -> bool {
        self.read_slots()
            .get(identity)
            .map(|slot| built_handle(slot.value()).is_some())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}
