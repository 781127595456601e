//! Griddle: an embeddable property-graph store whose schema index readers are
//! built lazily, shared across queries, and evicted in bulk by
//! `CALL db.clearIndexCaches`.

pub mod config;
pub mod database;
pub mod error;
pub mod graph;
pub mod procedures;
pub mod query;
pub mod reader;
pub mod schema;
pub mod storage;
pub mod types;

pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{GriddleError, Result};
pub use procedures::{ClearCachesOperation, Procedure, ProcedureRegistry};
pub use reader::{CacheRegistry, CacheStatsSnapshot, IndexReaderCache, ReaderGuard, ReaderHandle};
pub use schema::{IndexDescriptor, IndexState, SchemaListener, SchemaManager};
pub use storage::{IndexStorage, MemoryIndexStorage, StorageError};
pub use types::{
    EntityKind, IndexIdentity, Node, NodeId, PropertyValue, QueryResult, Relationship,
    RelationshipId, ResultValue, Row,
};
