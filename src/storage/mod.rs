//! Index storage: the collaborator that owns index data and hands out
//! readers over it.
//!
//! The reader cache only ever talks to [`IndexStorage`]; it never inspects
//! the reader type itself.

pub mod memory;

use crate::types::IndexIdentity;
use thiserror::Error;

pub use memory::{IndexEntries, IndexReader, MemoryIndexStorage};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("index {0} does not exist")]
    MissingIndex(String),

    #[error("index {0} is not online")]
    NotOnline(String),

    #[error("storage IO error: {0}")]
    Io(String),
}

/// Opens and closes readers over one index's data.
///
/// `open_reader` may be slow (it stands for mapping segment files), which is
/// why readers are cached. `close_reader` releases whatever the reader pinned
/// and is called at most once per reader.
pub trait IndexStorage: Send + Sync + 'static {
    type Reader: Send + Sync + 'static;

    fn open_reader(&self, identity: &IndexIdentity) -> Result<Self::Reader, StorageError>;

    fn close_reader(&self, reader: &Self::Reader) -> Result<(), StorageError>;
}
