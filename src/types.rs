use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Node identifier, assigned sequentially by the graph store.
pub type NodeId = u64;
/// Relationship identifier, assigned sequentially by the graph store.
pub type RelationshipId = u64;

/// Whether an index covers nodes (by label) or relationships (by type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Relationship,
}

/// Identifies one schema index: the label or relationship type it covers and
/// its property keys, in declaration order.
///
/// Equality is structural, so two identities built from the same label and
/// keys always hit the same reader cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexIdentity {
    pub kind: EntityKind,
    pub token: String,
    pub properties: Vec<String>,
}

impl IndexIdentity {
    pub fn node<S: Into<String>>(label: S, properties: &[&str]) -> Self {
        IndexIdentity {
            kind: EntityKind::Node,
            token: label.into(),
            properties: properties.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn relationship<S: Into<String>>(rel_type: S, properties: &[&str]) -> Self {
        IndexIdentity {
            kind: EntityKind::Relationship,
            token: rel_type.into(),
            properties: properties.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Extract this index's key from a property map. `None` when any key
    /// property is missing, which means the entity is not indexed.
    pub fn key_of(&self, properties: &BTreeMap<String, PropertyValue>) -> Option<Vec<PropertyValue>> {
        self.properties
            .iter()
            .map(|p| properties.get(p).cloned())
            .collect()
    }
}

impl fmt::Display for IndexIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let props = self.properties.join(", ");
        match self.kind {
            EntityKind::Node => write!(f, ":{}({})", self.token, props),
            EntityKind::Relationship => write!(f, ":[{}]({})", self.token, props),
        }
    }
}

/// A stored property value. Floats are deliberately absent: index keys need a
/// total order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Integer(i)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub labels: Vec<String>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Node {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub rel_type: String,
    pub start: NodeId,
    pub end: NodeId,
    pub properties: BTreeMap<String, PropertyValue>,
}

/// One value in a query result row. `Null` stands for a property the
/// matched node does not have.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultValue {
    Node(Node),
    Value(PropertyValue),
    Null,
}

impl ResultValue {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            ResultValue::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&PropertyValue> {
        match self {
            ResultValue::Value(v) => Some(v),
            _ => None,
        }
    }
}

pub type Row = indexmap::IndexMap<String, ResultValue>;

/// Rows returned by [`crate::Database::execute`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_equality_is_structural() {
        let a = IndexIdentity::node("Person", &["firstname"]);
        let b = IndexIdentity::node(String::from("Person"), &["firstname"]);
        assert_eq!(a, b);
        assert_ne!(a, IndexIdentity::relationship("Person", &["firstname"]));
        assert_ne!(a, IndexIdentity::node("Person", &["lastname"]));
    }

    #[test]
    fn identity_display() {
        assert_eq!(
            IndexIdentity::node("Person", &["firstname", "lastname"]).to_string(),
            ":Person(firstname, lastname)"
        );
        assert_eq!(
            IndexIdentity::relationship("KNOWS", &["since"]).to_string(),
            ":[KNOWS](since)"
        );
    }

    #[test]
    fn key_of_requires_every_property() {
        let id = IndexIdentity::node("Person", &["firstname", "age"]);
        let mut props = BTreeMap::new();
        props.insert("firstname".to_string(), PropertyValue::from("Anton"));
        assert_eq!(id.key_of(&props), None);

        props.insert("age".to_string(), PropertyValue::from(31i64));
        assert_eq!(
            id.key_of(&props),
            Some(vec![PropertyValue::from("Anton"), PropertyValue::from(31i64)])
        );
    }

    #[test]
    fn property_value_json_is_untagged() {
        let v: PropertyValue = serde_json::from_str("\"Anton\"").unwrap();
        assert_eq!(v, PropertyValue::Text("Anton".into()));
        let v: PropertyValue = serde_json::from_str("42").unwrap();
        assert_eq!(v, PropertyValue::Integer(42));
        let v: PropertyValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, PropertyValue::Bool(true));
    }

    #[test]
    fn missing_result_value_is_json_null() {
        assert_eq!(serde_json::to_string(&ResultValue::Null).unwrap(), "null");
        assert_eq!(
            serde_json::to_string(&ResultValue::Value(31i64.into())).unwrap(),
            "31"
        );
    }
}
