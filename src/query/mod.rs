//! The small query language understood by [`crate::Database::execute`].
//!
//! ```text
//! CREATE INDEX ON :Person(firstname)
//! DROP INDEX ON :[KNOWS](since)
//! MATCH (n:Person) USING INDEX n:Person(firstname) WHERE n.firstname = 'Anton' RETURN n
//! CALL db.clearIndexCaches()
//! ```

mod parser;

pub use parser::parse;

use crate::types::{IndexIdentity, PropertyValue};

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateIndex(IndexIdentity),
    DropIndex(IndexIdentity),
    Match(MatchQuery),
    /// Procedure invocation, e.g. `CALL db.clearIndexCaches()`.
    Call { procedure: String },
}

/// `MATCH (variable:label) [USING INDEX ...] [WHERE ...] RETURN ...`
///
/// Without an index hint the match is a label scan and never touches the
/// reader cache.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchQuery {
    pub variable: String,
    pub label: String,
    pub index_hint: Option<IndexIdentity>,
    pub predicates: Vec<Predicate>,
    pub returns: Vec<ReturnItem>,
}

/// Equality test on one property of the matched variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub property: String,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnItem {
    Entity,
    Property(String),
}

impl MatchQuery {
    /// Result column name for each return item, `n` or `n.firstname`.
    pub fn columns(&self) -> Vec<String> {
        self.returns
            .iter()
            .map(|item| match item {
                ReturnItem::Entity => self.variable.clone(),
                ReturnItem::Property(p) => format!("{}.{}", self.variable, p),
            })
            .collect()
    }

    /// The predicate value for `property`, if the WHERE clause has one.
    pub fn predicate_value(&self, property: &str) -> Option<&PropertyValue> {
        self.predicates
            .iter()
            .find(|p| p.property == property)
            .map(|p| &p.value)
    }
}
