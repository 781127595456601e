use crate::error::{GriddleError, Result};
use crate::types::IndexIdentity;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum IndexState {
    Populating,
    Online,
    Failed(String),
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexState::Populating => write!(f, "POPULATING"),
            IndexState::Online => write!(f, "ONLINE"),
            IndexState::Failed(_) => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexDescriptor {
    pub identity: IndexIdentity,
    pub state: IndexState,
    pub created_at: DateTime<Utc>,
}

/// Receives index lifecycle events from [`SchemaManager`].
pub trait SchemaListener: Send + Sync {
    fn index_created(&self, identity: &IndexIdentity);
    fn index_dropped(&self, identity: &IndexIdentity);
}

/// Index definitions and their online state.
///
/// Population itself is driven by the database; this type only records
/// state transitions and fans out create/drop events.
#[derive(Default)]
pub struct SchemaManager {
    indexes: DashMap<IndexIdentity, IndexDescriptor>,
    listeners: RwLock<Vec<Arc<dyn SchemaListener>>>,
}

impl SchemaManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_listener(&self, listener: Arc<dyn SchemaListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn listeners(&self) -> Vec<Arc<dyn SchemaListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a new index in `Populating` state.
    pub fn create_index(&self, identity: IndexIdentity) -> Result<()> {
        match self.indexes.entry(identity.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(GriddleError::IndexAlreadyExists(identity.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(IndexDescriptor {
                    identity: identity.clone(),
                    state: IndexState::Populating,
                    created_at: Utc::now(),
                });
            }
        }
        tracing::info!("[schema] Index {} created", identity);
        for listener in self.listeners() {
            listener.index_created(&identity);
        }
        Ok(())
    }

    pub fn drop_index(&self, identity: &IndexIdentity) -> Result<()> {
        if self.indexes.remove(identity).is_none() {
            return Err(GriddleError::IndexNotFound(identity.to_string()));
        }
        tracing::info!("[schema] Index {} dropped", identity);
        for listener in self.listeners() {
            listener.index_dropped(identity);
        }
        Ok(())
    }

    /// No-op if the index was dropped in the meantime.
    pub fn set_state(&self, identity: &IndexIdentity, state: IndexState) {
        if let Some(mut desc) = self.indexes.get_mut(identity) {
            match &state {
                IndexState::Failed(reason) => {
                    tracing::error!("[schema] Index {} failed: {}", identity, reason)
                }
                other => tracing::debug!("[schema] Index {} is now {}", identity, other),
            }
            desc.state = state;
        }
    }

    pub fn state(&self, identity: &IndexIdentity) -> Option<IndexState> {
        self.indexes.get(identity).map(|d| d.state.clone())
    }

    pub fn contains(&self, identity: &IndexIdentity) -> bool {
        self.indexes.contains_key(identity)
    }

    /// All indexes, sorted by identity.
    pub fn list(&self) -> Vec<IndexDescriptor> {
        let mut all: Vec<_> = self.indexes.iter().map(|d| d.value().clone()).collect();
        all.sort_by(|a, b| a.identity.cmp(&b.identity));
        all
    }

    pub fn pending_count(&self) -> usize {
        self.indexes
            .iter()
            .filter(|d| d.value().state == IndexState::Populating)
            .count()
    }

    fn first_failed(&self) -> Option<String> {
        self.indexes.iter().find_map(|d| match &d.value().state {
            IndexState::Failed(reason) => {
                Some(format!("{} (population failed: {})", d.key(), reason))
            }
            _ => None,
        })
    }

    /// Wait until no index is populating. A failed index is an error, since
    /// it will never come online.
    pub async fn await_indexes_online(&self, timeout: Duration) -> Result<()> {
        let wait = async {
            loop {
                if let Some(failed) = self.first_failed() {
                    return Err(GriddleError::IndexNotOnline(failed));
                }
                if self.pending_count() == 0 {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(GriddleError::IndexAwaitTimeout {
                pending: self.pending_count(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl SchemaListener for RecordingListener {
        fn index_created(&self, identity: &IndexIdentity) {
            self.events.lock().unwrap().push(format!("created {}", identity));
        }

        fn index_dropped(&self, identity: &IndexIdentity) {
            self.events.lock().unwrap().push(format!("dropped {}", identity));
        }
    }

    fn person() -> IndexIdentity {
        IndexIdentity::node("Person", &["firstname"])
    }

    #[test]
    fn create_starts_populating() {
        let schema = SchemaManager::new();
        schema.create_index(person()).unwrap();
        assert_eq!(schema.state(&person()), Some(IndexState::Populating));
        assert_eq!(schema.pending_count(), 1);
    }

    #[test]
    fn create_twice_is_an_error() {
        let schema = SchemaManager::new();
        schema.create_index(person()).unwrap();
        assert!(matches!(
            schema.create_index(person()),
            Err(GriddleError::IndexAlreadyExists(_))
        ));
    }

    #[test]
    fn drop_missing_is_an_error() {
        let schema = SchemaManager::new();
        assert!(matches!(
            schema.drop_index(&person()),
            Err(GriddleError::IndexNotFound(_))
        ));
    }

    #[test]
    fn listeners_see_create_and_drop() {
        let schema = SchemaManager::new();
        let listener = Arc::new(RecordingListener::default());
        schema.register_listener(listener.clone());

        schema.create_index(person()).unwrap();
        schema.drop_index(&person()).unwrap();

        let events = listener.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "created :Person(firstname)".to_string(),
                "dropped :Person(firstname)".to_string()
            ]
        );
    }

    #[test]
    fn set_state_after_drop_is_ignored() {
        let schema = SchemaManager::new();
        schema.create_index(person()).unwrap();
        schema.drop_index(&person()).unwrap();
        schema.set_state(&person(), IndexState::Online);
        assert_eq!(schema.state(&person()), None);
    }

    #[test]
    fn list_is_sorted() {
        let schema = SchemaManager::new();
        schema.create_index(person()).unwrap();
        schema
            .create_index(IndexIdentity::node("City", &["name"]))
            .unwrap();
        let tokens: Vec<_> = schema
            .list()
            .into_iter()
            .map(|d| d.identity.token)
            .collect();
        assert_eq!(tokens, vec!["City", "Person"]);
    }

    #[tokio::test]
    async fn await_returns_once_online() {
        let schema = Arc::new(SchemaManager::new());
        schema.create_index(person()).unwrap();

        let flipper = Arc::clone(&schema);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flipper.set_state(&person(), IndexState::Online);
        });

        schema
            .await_indexes_online(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(schema.state(&person()), Some(IndexState::Online));
    }

    #[tokio::test]
    async fn await_times_out() {
        let schema = SchemaManager::new();
        schema.create_index(person()).unwrap();
        match schema.await_indexes_online(Duration::from_millis(50)).await {
            Err(GriddleError::IndexAwaitTimeout { pending, .. }) => assert_eq!(pending, 1),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn await_fails_fast_on_failed_index() {
        let schema = SchemaManager::new();
        schema.create_index(person()).unwrap();
        schema.set_state(&person(), IndexState::Failed("boom".into()));
        match schema.await_indexes_online(Duration::from_secs(5)).await {
            Err(GriddleError::IndexNotOnline(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected IndexNotOnline, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn await_with_no_indexes_is_immediate() {
        let schema = SchemaManager::new();
        schema
            .await_indexes_online(Duration::from_millis(1))
            .await
            .unwrap();
    }
}
