use super::{IndexStorage, StorageError};
use crate::types::{EntityKind, IndexIdentity, PropertyValue};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

pub type IndexKey = Vec<PropertyValue>;

/// Sorted key → entity-id postings for one index.
#[derive(Debug, Default, Clone)]
pub struct IndexEntries {
    postings: BTreeMap<IndexKey, BTreeSet<u64>>,
}

impl IndexEntries {
    pub fn insert(&mut self, key: IndexKey, id: u64) {
        self.postings.entry(key).or_default().insert(id);
    }

    pub fn remove(&mut self, key: &IndexKey, id: u64) {
        if let Some(ids) = self.postings.get_mut(key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.postings.remove(key);
            }
        }
    }

    pub fn get(&self, key: &[PropertyValue]) -> Vec<u64> {
        self.postings
            .get(key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of (key, id) pairs.
    pub fn len(&self) -> usize {
        self.postings.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }
}

struct StoredIndex {
    entries: Arc<RwLock<IndexEntries>>,
    online: AtomicBool,
}

/// Read handle over one index's postings.
///
/// Shares the live postings with the storage, so writes committed after the
/// reader was opened are visible to it. Dropping the index detaches the
/// postings from the storage but a reader still holding them keeps working.
pub struct IndexReader {
    identity: IndexIdentity,
    entries: Arc<RwLock<IndexEntries>>,
    serial: u64,
}

impl IndexReader {
    pub fn identity(&self) -> &IndexIdentity {
        &self.identity
    }

    /// Exact-match lookup. `key` holds one value per indexed property.
    pub fn seek(&self, key: &[PropertyValue]) -> Vec<u64> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
    }

    pub fn entry_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Distinguishes separately opened readers over the same index.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

/// In-memory [`IndexStorage`] whose postings are maintained by the database
/// write path.
#[derive(Default)]
pub struct MemoryIndexStorage {
    indexes: DashMap<IndexIdentity, Arc<StoredIndex>>,
    open_readers: AtomicUsize,
    next_serial: AtomicU64,
}

impl MemoryIndexStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty, not yet online index. Returns false if it exists.
    pub fn create_index(&self, identity: IndexIdentity) -> bool {
        let mut created = false;
        self.indexes.entry(identity).or_insert_with(|| {
            created = true;
            Arc::new(StoredIndex {
                entries: Arc::new(RwLock::new(IndexEntries::default())),
                online: AtomicBool::new(false),
            })
        });
        created
    }

    pub fn drop_index(&self, identity: &IndexIdentity) -> bool {
        self.indexes.remove(identity).is_some()
    }

    pub fn contains(&self, identity: &IndexIdentity) -> bool {
        self.indexes.contains_key(identity)
    }

    pub fn is_online(&self, identity: &IndexIdentity) -> bool {
        self.indexes
            .get(identity)
            .map(|idx| idx.online.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Install the postings computed by a population pass and flip the index
    /// online. The caller must keep writers out between computing `entries`
    /// and this call.
    pub fn populate(&self, identity: &IndexIdentity, entries: IndexEntries) -> Result<(), StorageError> {
        let idx = self
            .indexes
            .get(identity)
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| StorageError::MissingIndex(identity.to_string()))?;
        *idx.entries.write().unwrap_or_else(PoisonError::into_inner) = entries;
        idx.online.store(true, Ordering::Release);
        Ok(())
    }

    /// Keep every index covering `tokens` in step with one entity change.
    /// `before` is `None` for a create, `after` is `None` for a delete.
    pub fn apply_update(
        &self,
        kind: EntityKind,
        tokens: &[String],
        id: u64,
        before: Option<&BTreeMap<String, PropertyValue>>,
        after: Option<&BTreeMap<String, PropertyValue>>,
    ) {
        for entry in self.indexes.iter() {
            let identity = entry.key();
            if identity.kind != kind || !tokens.contains(&identity.token) {
                continue;
            }
            let old_key = before.and_then(|p| identity.key_of(p));
            let new_key = after.and_then(|p| identity.key_of(p));
            if old_key == new_key {
                continue;
            }
            let mut entries = entry
                .value()
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(k) = old_key {
                entries.remove(&k, id);
            }
            if let Some(k) = new_key {
                entries.insert(k, id);
            }
        }
    }

    pub fn indexes(&self) -> Vec<IndexIdentity> {
        let mut ids: Vec<_> = self.indexes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Readers opened and not yet closed.
    pub fn open_reader_count(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }
}

impl IndexStorage for MemoryIndexStorage {
    type Reader = IndexReader;

    fn open_reader(&self, identity: &IndexIdentity) -> Result<IndexReader, StorageError> {
        let idx = self
            .indexes
            .get(identity)
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| StorageError::MissingIndex(identity.to_string()))?;
        if !idx.online.load(Ordering::Acquire) {
            return Err(StorageError::NotOnline(identity.to_string()));
        }
        self.open_readers.fetch_add(1, Ordering::SeqCst);
        Ok(IndexReader {
            identity: identity.clone(),
            entries: Arc::clone(&idx.entries),
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn close_reader(&self, reader: &IndexReader) -> Result<(), StorageError> {
        let prev = self.open_readers.fetch_sub(1, Ordering::SeqCst);
        if prev == 0 {
            self.open_readers.store(0, Ordering::SeqCst);
            return Err(StorageError::Io(format!(
                "close of reader {} over {} with no open readers",
                reader.serial,
                reader.identity
            )));
        }
        Ok(())
    }
}
