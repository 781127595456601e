use crate::error::{GriddleError, Result};
use crate::reader::CacheRegistry;
use crate::schema::SchemaManager;
use crate::storage::IndexStorage;
use crate::types::{PropertyValue, QueryResult, ResultValue, Row};
use std::collections::HashMap;
use std::sync::Arc;

/// A zero-argument administrative procedure reachable through `CALL`.
pub trait Procedure: Send + Sync {
    fn name(&self) -> &'static str;
    fn call(&self) -> Result<QueryResult>;
}

/// Name → procedure lookup. Names are matched exactly.
#[derive(Default)]
pub struct ProcedureRegistry {
    procedures: HashMap<&'static str, Arc<dyn Procedure>>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, procedure: Arc<dyn Procedure>) {
        self.procedures.insert(procedure.name(), procedure);
    }

    /// Make `procedure` reachable under an additional name.
    pub fn register_alias(&mut self, alias: &'static str, procedure: Arc<dyn Procedure>) {
        self.procedures.insert(alias, procedure);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Procedure>> {
        self.procedures
            .get(name)
            .cloned()
            .ok_or_else(|| GriddleError::ProcedureNotFound(name.to_string()))
    }

    pub fn call(&self, name: &str) -> Result<QueryResult> {
        self.get(name)?.call()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.procedures.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

fn single_row(pairs: Vec<(&str, PropertyValue)>) -> QueryResult {
    let columns = pairs.iter().map(|(k, _)| k.to_string()).collect();
    let row: Row = pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), ResultValue::Value(v)))
        .collect();
    QueryResult {
        columns,
        rows: vec![row],
    }
}

/// `db.clearIndexCaches`: evicts every cached index reader and reports how
/// many were removed.
///
/// Readers still checked out by running queries stay open until released;
/// the count reflects detachment, not physical close.
pub struct ClearCachesOperation<S: IndexStorage> {
    registry: Arc<CacheRegistry<S>>,
}

impl<S: IndexStorage> ClearCachesOperation<S> {
    pub const NAME: &'static str = "db.clearIndexCaches";
    /// Vendor-qualified name that existing admin scripts call.
    pub const QUALIFIED_NAME: &'static str = "db.ericsson.clearIndexCaches";

    pub fn new(registry: Arc<CacheRegistry<S>>) -> Self {
        ClearCachesOperation { registry }
    }

    pub fn run(&self) -> usize {
        let removed = self.registry.cache().clear_all();
        tracing::info!("Removed {} cached readers", removed);
        removed
    }
}

impl<S: IndexStorage> Procedure for ClearCachesOperation<S> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn call(&self) -> Result<QueryResult> {
        let removed = self.run();
        Ok(single_row(vec![(
            "removed",
            PropertyValue::Integer(removed as i64),
        )]))
    }
}

/// `db.indexes`: one row per index with its population state.
pub struct ListIndexesProcedure {
    schema: Arc<SchemaManager>,
}

impl ListIndexesProcedure {
    pub const NAME: &'static str = "db.indexes";

    pub fn new(schema: Arc<SchemaManager>) -> Self {
        ListIndexesProcedure { schema }
    }
}

impl Procedure for ListIndexesProcedure {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn call(&self) -> Result<QueryResult> {
        let rows = self
            .schema
            .list()
            .into_iter()
            .map(|desc| {
                let mut row = Row::new();
                row.insert(
                    "index".to_string(),
                    ResultValue::Value(desc.identity.to_string().into()),
                );
                row.insert(
                    "state".to_string(),
                    ResultValue::Value(desc.state.to_string().into()),
                );
                row
            })
            .collect();
        Ok(QueryResult {
            columns: vec!["index".to_string(), "state".to_string()],
            rows,
        })
    }
}

/// `db.readerCacheStats`: current cache size plus lifetime counters.
pub struct ReaderCacheStatsProcedure<S: IndexStorage> {
    registry: Arc<CacheRegistry<S>>,
}

impl<S: IndexStorage> ReaderCacheStatsProcedure<S> {
    pub const NAME: &'static str = "db.readerCacheStats";

    pub fn new(registry: Arc<CacheRegistry<S>>) -> Self {
        ReaderCacheStatsProcedure { registry }
    }
}

impl<S: IndexStorage> Procedure for ReaderCacheStatsProcedure<S> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn call(&self) -> Result<QueryResult> {
        let cache = self.registry.cache();
        let stats = cache.stats();
        let count = |n: u64| PropertyValue::Integer(n as i64);
        Ok(single_row(vec![
            ("cached", PropertyValue::Integer(cache.len() as i64)),
            ("hits", count(stats.hits)),
            ("misses", count(stats.misses)),
            ("builds", count(stats.builds)),
            ("build_failures", count(stats.build_failures)),
            ("evictions", count(stats.evictions)),
            ("closes", count(stats.closes)),
        ]))
    }
}

/// The procedures every database registers at open.
pub fn builtin<S: IndexStorage>(
    registry: &Arc<CacheRegistry<S>>,
    schema: &Arc<SchemaManager>,
) -> ProcedureRegistry {
    let mut procedures = ProcedureRegistry::new();
    let clear: Arc<dyn Procedure> = Arc::new(ClearCachesOperation::new(Arc::clone(registry)));
    procedures.register_alias(ClearCachesOperation::<S>::QUALIFIED_NAME, Arc::clone(&clear));
    procedures.register(clear);
    procedures.register(Arc::new(ListIndexesProcedure::new(Arc::clone(schema))));
    procedures.register(Arc::new(ReaderCacheStatsProcedure::new(Arc::clone(
        registry,
    ))));
    procedures
}
