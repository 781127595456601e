use crate::config::DatabaseConfig;
use crate::error::{GriddleError, Result};
use crate::graph::{GraphStore, Properties};
use crate::procedures::{self, ClearCachesOperation, ProcedureRegistry};
use crate::query::{self, MatchQuery, ReturnItem, Statement};
use crate::reader::{CacheRegistry, IndexReaderCache};
use crate::schema::{IndexDescriptor, IndexState, SchemaManager};
use crate::storage::MemoryIndexStorage;
use crate::types::{
    EntityKind, IndexIdentity, Node, NodeId, PropertyValue, QueryResult, Relationship,
    ResultValue, Row,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// An open graph database: node store, schema indexes, and the reader cache
/// that index seeks go through.
///
/// Writers hold the graph write lock across the mutation and the matching
/// index update; population holds the read lock across snapshot and install.
/// Index postings therefore never miss a write.
pub struct Database {
    config: DatabaseConfig,
    graph: Arc<RwLock<GraphStore>>,
    storage: Arc<MemoryIndexStorage>,
    schema: Arc<SchemaManager>,
    registry: Arc<CacheRegistry<MemoryIndexStorage>>,
    procedures: ProcedureRegistry,
    shut_down: AtomicBool,
}

impl Database {
    /// Open a database, restoring `graph.json` and `schema.json` from the
    /// data directory when one is configured. Restored indexes repopulate
    /// like freshly created ones.
    pub fn open(config: DatabaseConfig) -> Result<Arc<Self>> {
        let mut graph = GraphStore::new();
        let mut restored = Vec::new();
        if let Some(dir) = &config.data_dir {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(path) = config.graph_path().filter(|p| p.exists()) {
            graph = GraphStore::load(&path)?;
        }
        if let Some(path) = config.schema_path().filter(|p| p.exists()) {
            restored = load_schema(&path)?;
        }

        let db = Self::assemble(config, graph);

        if !restored.is_empty() {
            tracing::info!(
                "[startup] Restoring {} index definition(s)",
                restored.len()
            );
        }
        for identity in restored {
            db.create_index(identity)?;
        }
        Ok(db)
    }

    pub fn in_memory() -> Arc<Self> {
        Self::assemble(DatabaseConfig::default(), GraphStore::new())
    }

    fn assemble(config: DatabaseConfig, graph: GraphStore) -> Arc<Self> {
        let storage = Arc::new(MemoryIndexStorage::new());
        let schema = Arc::new(SchemaManager::new());
        let registry = Arc::new(CacheRegistry::new(Arc::clone(&storage)));
        schema.register_listener(registry.clone());
        let procedures = procedures::builtin(&registry, &schema);
        Arc::new(Database {
            config,
            graph: Arc::new(RwLock::new(graph)),
            storage,
            schema,
            registry,
            procedures,
            shut_down: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(GriddleError::DatabaseShutdown);
        }
        Ok(())
    }

    fn read_graph(&self) -> RwLockReadGuard<'_, GraphStore> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_graph(&self) -> RwLockWriteGuard<'_, GraphStore> {
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parse and run one statement.
    pub fn execute(&self, statement: &str) -> Result<QueryResult> {
        self.ensure_open()?;
        match query::parse(statement)? {
            Statement::CreateIndex(identity) => {
                self.create_index(identity)?;
                Ok(QueryResult::empty())
            }
            Statement::DropIndex(identity) => {
                self.drop_index(&identity)?;
                Ok(QueryResult::empty())
            }
            Statement::Match(m) => self.run_match(&m),
            Statement::Call { procedure } => self.call_procedure(&procedure),
        }
    }

    fn run_match(&self, m: &MatchQuery) -> Result<QueryResult> {
        let is_match = |node: &Node| {
            node.has_label(&m.label)
                && m
                    .predicates
                    .iter()
                    .all(|p| node.property(&p.property) == Some(&p.value))
        };

        let nodes: Vec<Node> = match &m.index_hint {
            Some(hint) => {
                let ids = self.seek(hint, m)?;
                let graph = self.read_graph();
                ids.iter()
                    .filter_map(|id| graph.node(*id))
                    .filter(|&n| is_match(n))
                    .cloned()
                    .collect()
            }
            None => self
                .read_graph()
                .nodes_with_label(&m.label)
                .filter(|&n| is_match(n))
                .cloned()
                .collect(),
        };

        let columns = m.columns();
        let rows = nodes
            .into_iter()
            .map(|node| {
                let mut row = Row::with_capacity(columns.len());
                for (column, item) in columns.iter().zip(&m.returns) {
                    let value = match item {
                        ReturnItem::Entity => ResultValue::Node(node.clone()),
                        ReturnItem::Property(p) => node
                            .property(p)
                            .cloned()
                            .map(ResultValue::Value)
                            .unwrap_or(ResultValue::Null),
                    };
                    row.insert(column.clone(), value);
                }
                row
            })
            .collect();

        Ok(QueryResult { columns, rows })
    }

    /// Index seek through the reader cache. The reader is released before the
    /// graph is read.
    fn seek(&self, hint: &IndexIdentity, m: &MatchQuery) -> Result<Vec<NodeId>> {
        match self.schema.state(hint) {
            None => return Err(GriddleError::IndexNotFound(hint.to_string())),
            Some(IndexState::Online) => {}
            Some(state) => {
                return Err(GriddleError::IndexNotOnline(format!("{} is {}", hint, state)))
            }
        }
        let key = hint
            .properties
            .iter()
            .map(|p| {
                m.predicate_value(p).cloned().ok_or_else(|| {
                    GriddleError::InvalidQuery(format!(
                        "USING INDEX {} needs an equality predicate on {}.{}",
                        hint, m.variable, p
                    ))
                })
            })
            .collect::<Result<Vec<PropertyValue>>>()?;

        let reader = self.registry.reader(hint)?;
        let ids = reader.seek(&key);
        reader.release();
        Ok(ids)
    }

    pub fn create_node(&self, labels: &[&str], properties: &[(&str, PropertyValue)]) -> Result<Node> {
        self.ensure_open()?;
        let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        let properties: Properties = properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        let mut graph = self.write_graph();
        let node = graph.create_node(labels, properties);
        self.storage.apply_update(
            EntityKind::Node,
            &node.labels,
            node.id,
            None,
            Some(&node.properties),
        );
        Ok(node)
    }

    pub fn set_node_property(&self, id: NodeId, key: &str, value: PropertyValue) -> Result<Node> {
        self.ensure_open()?;
        let mut graph = self.write_graph();
        let (before, node) = graph.set_node_property(id, key, value)?;
        self.storage.apply_update(
            EntityKind::Node,
            &node.labels,
            id,
            Some(&before),
            Some(&node.properties),
        );
        Ok(node)
    }

    pub fn delete_node(&self, id: NodeId) -> Result<()> {
        self.ensure_open()?;
        let mut graph = self.write_graph();
        let node = graph.delete_node(id)?;
        self.storage.apply_update(
            EntityKind::Node,
            &node.labels,
            id,
            Some(&node.properties),
            None,
        );
        Ok(())
    }

    pub fn create_relationship(
        &self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
        properties: &[(&str, PropertyValue)],
    ) -> Result<Relationship> {
        self.ensure_open()?;
        let properties: Properties = properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        let mut graph = self.write_graph();
        let rel = graph.create_relationship(start, end, rel_type, properties)?;
        self.storage.apply_update(
            EntityKind::Relationship,
            std::slice::from_ref(&rel.rel_type),
            rel.id,
            None,
            Some(&rel.properties),
        );
        Ok(rel)
    }

    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.read_graph().node(id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.read_graph().node_count()
    }

    /// Register the index and start populating it. The index answers seeks
    /// once [`await_indexes_online`](Self::await_indexes_online) returns.
    pub fn create_index(&self, identity: IndexIdentity) -> Result<()> {
        self.ensure_open()?;
        self.schema.create_index(identity.clone())?;
        self.storage.create_index(identity.clone());

        if !self.config.populate_in_background {
            populate(&self.graph, &self.storage, &self.schema, &identity);
            return Ok(());
        }

        let graph = Arc::clone(&self.graph);
        let storage = Arc::clone(&self.storage);
        let schema = Arc::clone(&self.schema);
        let target = identity.clone();
        let spawned = std::thread::Builder::new()
            .name("griddle-populate".to_string())
            .spawn(move || populate(&graph, &storage, &schema, &target));
        if let Err(e) = spawned {
            tracing::warn!(
                "[schema] Could not spawn population thread for {} ({}), populating inline",
                identity,
                e
            );
            populate(&self.graph, &self.storage, &self.schema, &identity);
        }
        Ok(())
    }

    /// Drop the index. Its cached reader, if any, is evicted by the cache
    /// registry's schema listener; queries holding it finish first.
    pub fn drop_index(&self, identity: &IndexIdentity) -> Result<()> {
        self.ensure_open()?;
        if !self.schema.contains(identity) {
            return Err(GriddleError::IndexNotFound(identity.to_string()));
        }
        self.storage.drop_index(identity);
        self.schema.drop_index(identity)
    }

    pub fn index_state(&self, identity: &IndexIdentity) -> Option<IndexState> {
        self.schema.state(identity)
    }

    pub fn indexes(&self) -> Vec<IndexDescriptor> {
        self.schema.list()
    }

    /// Wait for every index to finish populating, bounded by
    /// `index_await_timeout`.
    pub async fn await_indexes_online(&self) -> Result<()> {
        self.ensure_open()?;
        self.schema
            .await_indexes_online(self.config.index_await_timeout)
            .await
    }

    pub fn call_procedure(&self, name: &str) -> Result<QueryResult> {
        self.ensure_open()?;
        self.procedures.call(name)
    }

    pub fn procedure_names(&self) -> Vec<&'static str> {
        self.procedures.names()
    }

    /// Same as `CALL db.clearIndexCaches`.
    pub fn clear_index_caches(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(ClearCachesOperation::new(Arc::clone(&self.registry)).run())
    }

    pub fn reader_cache(&self) -> &Arc<IndexReaderCache<MemoryIndexStorage>> {
        self.registry.cache()
    }

    pub fn cache_registry(&self) -> &Arc<CacheRegistry<MemoryIndexStorage>> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<MemoryIndexStorage> {
        &self.storage
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Write the graph and index definitions to the data directory. No-op for
    /// in-memory databases.
    pub fn checkpoint(&self) -> Result<()> {
        self.ensure_open()?;
        self.write_snapshot()
    }

    fn write_snapshot(&self) -> Result<()> {
        let (Some(graph_path), Some(schema_path)) =
            (self.config.graph_path(), self.config.schema_path())
        else {
            return Ok(());
        };
        self.read_graph().save(&graph_path)?;
        let identities: Vec<IndexIdentity> =
            self.schema.list().into_iter().map(|d| d.identity).collect();
        save_schema(&schema_path, &identities)?;
        tracing::debug!(
            "[checkpoint] Wrote {} and {} index definition(s)",
            graph_path.display(),
            identities.len()
        );
        Ok(())
    }

    /// Close every cached reader and write the final snapshot. Idempotent;
    /// afterwards every operation fails with `DatabaseShutdown`.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.registry.shutdown();
        let result = self.write_snapshot();
        if let Err(e) = &result {
            tracing::error!("[shutdown] Final snapshot failed: {}", e);
        }
        tracing::info!("[shutdown] Database closed");
        result
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

/// Compute postings from the current graph and flip the index online. A
/// storage refusal marks the index failed; a drop in the meantime makes
/// both outcomes no-ops.
fn populate(
    graph: &RwLock<GraphStore>,
    storage: &MemoryIndexStorage,
    schema: &SchemaManager,
    identity: &IndexIdentity,
) {
    let graph = graph.read().unwrap_or_else(PoisonError::into_inner);
    let entries = graph.index_entries(identity);
    let count = entries.len();
    match storage.populate(identity, entries) {
        Ok(()) => {
            schema.set_state(identity, IndexState::Online);
            tracing::info!("[schema] Index {} online with {} entries", identity, count);
        }
        Err(e) => schema.set_state(identity, IndexState::Failed(e.to_string())),
    }
}

fn load_schema(path: &Path) -> Result<Vec<IndexIdentity>> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn save_schema(path: &Path, identities: &[IndexIdentity]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(identities)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn person() -> IndexIdentity {
        IndexIdentity::node("Person", &["firstname"])
    }

    fn inline() -> Arc<Database> {
        Database::open(DatabaseConfig {
            populate_in_background: false,
            ..DatabaseConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn inline_population_is_online_immediately() {
        let db = inline();
        db.create_node(&["Person"], &[("firstname", "Anton".into())])
            .unwrap();
        db.create_index(person()).unwrap();
        assert_eq!(db.index_state(&person()), Some(IndexState::Online));
    }

    #[test]
    fn writes_after_population_reach_the_index() {
        let db = inline();
        db.create_index(person()).unwrap();
        let anton = db
            .create_node(&["Person"], &[("firstname", "Anton".into())])
            .unwrap();

        let seek = "MATCH (p:Person) USING INDEX p:Person(firstname) \
                    WHERE p.firstname = 'Anton' RETURN p";
        assert_eq!(db.execute(seek).unwrap().len(), 1);

        db.set_node_property(anton.id, "firstname", "Bertil".into())
            .unwrap();
        assert_eq!(db.execute(seek).unwrap().len(), 0);

        db.set_node_property(anton.id, "firstname", "Anton".into())
            .unwrap();
        db.delete_node(anton.id).unwrap();
        assert_eq!(db.execute(seek).unwrap().len(), 0);
    }

    #[test]
    fn seek_requires_online_index_and_full_key() {
        let db = inline();
        let missing = db.execute(
            "MATCH (p:Person) USING INDEX p:Person(firstname) WHERE p.firstname = 'A' RETURN p",
        );
        assert!(matches!(missing, Err(GriddleError::IndexNotFound(_))));

        db.create_index(person()).unwrap();
        let no_key = db.execute("MATCH (p:Person) USING INDEX p:Person(firstname) RETURN p");
        assert!(matches!(no_key, Err(GriddleError::InvalidQuery(_))));

        db.create_index(IndexIdentity::node("City", &["name"])).unwrap();
        db.schema
            .set_state(&IndexIdentity::node("City", &["name"]), IndexState::Populating);
        let populating =
            db.execute("MATCH (c:City) USING INDEX c:City(name) WHERE c.name = 'Malmo' RETURN c");
        assert!(matches!(populating, Err(GriddleError::IndexNotOnline(_))));
    }

    #[test]
    fn label_scan_never_builds_a_reader() {
        let db = inline();
        db.create_index(person()).unwrap();
        db.create_node(&["Person"], &[("firstname", "Anton".into())])
            .unwrap();
        let result = db
            .execute("MATCH (p:Person) WHERE p.firstname = 'Anton' RETURN p.firstname, p.age")
            .unwrap();
        assert_eq!(result.columns, vec!["p.firstname", "p.age"]);
        assert_eq!(
            result.rows[0]["p.firstname"],
            ResultValue::Value("Anton".into())
        );
        assert_eq!(result.rows[0]["p.age"], ResultValue::Null);
        assert!(db.reader_cache().is_empty());
        assert_eq!(db.storage().open_reader_count(), 0);
    }

    #[test]
    fn relationship_writes_update_relationship_indexes() {
        let db = inline();
        let since = IndexIdentity::relationship("KNOWS", &["since"]);
        db.create_index(since.clone()).unwrap();
        let a = db.create_node(&["Person"], &[]).unwrap();
        let b = db.create_node(&["Person"], &[]).unwrap();
        let rel = db
            .create_relationship(a.id, b.id, "KNOWS", &[("since", 2019i64.into())])
            .unwrap();

        let reader = db.cache_registry().reader(&since).unwrap();
        assert_eq!(reader.seek(&[2019i64.into()]), vec![rel.id]);
    }

    #[test]
    fn drop_index_evicts_cached_reader() {
        let db = inline();
        db.create_index(person()).unwrap();
        db.execute(
            "MATCH (p:Person) USING INDEX p:Person(firstname) WHERE p.firstname = 'A' RETURN p",
        )
        .unwrap();
        assert!(db.reader_cache().contains(&person()));

        db.execute("DROP INDEX ON :Person(firstname)").unwrap();
        assert!(!db.reader_cache().contains(&person()));
        assert_eq!(db.storage().open_reader_count(), 0);
        assert_eq!(db.clear_index_caches().unwrap(), 0);
        assert!(matches!(
            db.drop_index(&person()),
            Err(GriddleError::IndexNotFound(_))
        ));
    }

    #[test]
    fn shutdown_is_idempotent_and_final() {
        let db = inline();
        db.create_index(person()).unwrap();
        db.execute(
            "MATCH (p:Person) USING INDEX p:Person(firstname) WHERE p.firstname = 'A' RETURN p",
        )
        .unwrap();

        db.shutdown().unwrap();
        db.shutdown().unwrap();
        assert!(db.is_shut_down());
        assert_eq!(db.storage().open_reader_count(), 0);
        assert!(matches!(
            db.execute("CALL db.indexes"),
            Err(GriddleError::DatabaseShutdown)
        ));
        assert!(matches!(
            db.create_node(&["Person"], &[]),
            Err(GriddleError::DatabaseShutdown)
        ));
    }

    #[tokio::test]
    async fn background_population_comes_online() {
        let db = Database::open(DatabaseConfig {
            index_await_timeout: Duration::from_secs(5),
            ..DatabaseConfig::default()
        })
        .unwrap();
        for i in 0..100i64 {
            db.create_node(&["Person"], &[("n", i.into())]).unwrap();
        }
        db.execute("CREATE INDEX ON :Person(n)").unwrap();
        db.await_indexes_online().await.unwrap();

        let result = db
            .execute("MATCH (p:Person) USING INDEX p:Person(n) WHERE p.n = 42 RETURN p.n")
            .unwrap();
        assert_eq!(result.rows[0]["p.n"], ResultValue::Value(42i64.into()));
    }

    #[test]
    fn snapshot_round_trips_through_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            populate_in_background: false,
            ..DatabaseConfig::default()
        }
        .with_data_dir(dir.path());

        let db = Database::open(config.clone()).unwrap();
        db.create_node(&["Person"], &[("firstname", "Anton".into())])
            .unwrap();
        db.create_index(person()).unwrap();
        db.shutdown().unwrap();

        let reopened = Database::open(config).unwrap();
        assert_eq!(reopened.node_count(), 1);
        assert_eq!(reopened.index_state(&person()), Some(IndexState::Online));
        let result = reopened
            .execute(
                "MATCH (p:Person) USING INDEX p:Person(firstname) \
                 WHERE p.firstname = 'Anton' RETURN p",
            )
            .unwrap();
        assert_eq!(result.len(), 1);
    }
}
