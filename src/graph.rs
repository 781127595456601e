use crate::error::{GriddleError, Result};
use crate::storage::IndexEntries;
use crate::types::{
    EntityKind, IndexIdentity, Node, NodeId, PropertyValue, Relationship, RelationshipId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub type Properties = BTreeMap<String, PropertyValue>;

/// Nodes and relationships. Not synchronized; the database wraps it in a
/// lock and keeps index postings in step with every mutation.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GraphStore {
    nodes: BTreeMap<NodeId, Node>,
    relationships: BTreeMap<RelationshipId, Relationship>,
    next_node_id: NodeId,
    next_relationship_id: RelationshipId,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_node(&mut self, labels: Vec<String>, properties: Properties) -> Node {
        let id = self.next_node_id;
        self.next_node_id += 1;
        let node = Node {
            id,
            labels,
            properties,
        };
        self.nodes.insert(id, node.clone());
        node
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Returns the node's properties before and after the change.
    pub fn set_node_property(
        &mut self,
        id: NodeId,
        key: &str,
        value: PropertyValue,
    ) -> Result<(Properties, Node)> {
        let node = self.nodes.get_mut(&id).ok_or(GriddleError::NodeNotFound(id))?;
        let before = node.properties.clone();
        node.properties.insert(key.to_string(), value);
        Ok((before, node.clone()))
    }

    /// Deleting a node that still has relationships is refused.
    pub fn delete_node(&mut self, id: NodeId) -> Result<Node> {
        if !self.nodes.contains_key(&id) {
            return Err(GriddleError::NodeNotFound(id));
        }
        if self
            .relationships
            .values()
            .any(|r| r.start == id || r.end == id)
        {
            return Err(GriddleError::InvalidQuery(format!(
                "node {} still has relationships",
                id
            )));
        }
        self.nodes.remove(&id).ok_or(GriddleError::NodeNotFound(id))
    }

    pub fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
        properties: Properties,
    ) -> Result<Relationship> {
        for id in [start, end] {
            if !self.nodes.contains_key(&id) {
                return Err(GriddleError::NodeNotFound(id));
            }
        }
        let id = self.next_relationship_id;
        self.next_relationship_id += 1;
        let rel = Relationship {
            id,
            rel_type: rel_type.to_string(),
            start,
            end,
            properties,
        };
        self.relationships.insert(id, rel.clone());
        Ok(rel)
    }

    pub fn nodes_with_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.values().filter(move |n| n.has_label(label))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Postings for `identity` computed from the current contents.
    pub fn index_entries(&self, identity: &IndexIdentity) -> IndexEntries {
        let mut entries = IndexEntries::default();
        match identity.kind {
            EntityKind::Node => {
                for node in self.nodes_with_label(&identity.token) {
                    if let Some(key) = identity.key_of(&node.properties) {
                        entries.insert(key, node.id);
                    }
                }
            }
            EntityKind::Relationship => {
                for rel in self
                    .relationships
                    .values()
                    .filter(|r| r.rel_type == identity.token)
                {
                    if let Some(key) = identity.key_of(&rel.properties) {
                        entries.insert(key, rel.id);
                    }
                }
            }
        }
        entries
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Write through a temp file and rename so a crash never leaves a torn
    /// snapshot.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
