//! Relationship (directed edge) in the property graph.

use serde::{Deserialize, Serialize};

use super::{NodeId, PropertyMap, Value};

/// Opaque relationship identifier (`rel-<12 hex>` once committed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelId(pub String);

impl RelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RelId {
    fn from(s: &str) -> Self {
        RelId(s.to_owned())
    }
}

impl From<String> for RelId {
    fn from(s: String) -> Self {
        RelId(s)
    }
}

impl std::fmt::Display for RelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traversal direction relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(rename = "out")]
    Outgoing,
    #[serde(rename = "in")]
    Incoming,
    Both,
}

/// A directed relationship between two nodes.
///
/// Endpoints are node ids, never pointers; both must reference live nodes
/// at creation time. Wire form (dag-json):
/// `{"id": str, "type": str, "start_node": str, "end_node": str, "properties": {..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelId,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub start_node: NodeId,
    pub end_node: NodeId,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl Relationship {
    pub fn new(
        id: impl Into<RelId>,
        rel_type: impl Into<String>,
        start_node: impl Into<NodeId>,
        end_node: impl Into<NodeId>,
    ) -> Self {
        Self {
            id: id.into(),
            rel_type: rel_type.into(),
            start_node: start_node.into(),
            end_node: end_node.into(),
            properties: PropertyMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// The "other" end of the relationship as seen from the given node.
    pub fn other_node(&self, from: &NodeId) -> Option<&NodeId> {
        if *from == self.start_node {
            Some(&self.end_node)
        } else if *from == self.end_node {
            Some(&self.start_node)
        } else {
            None
        }
    }

    /// True when this relationship touches `node` in the given direction.
    pub fn matches_direction(&self, node: &NodeId, direction: Direction) -> bool {
        match direction {
            Direction::Outgoing => self.start_node == *node,
            Direction::Incoming => self.end_node == *node,
            Direction::Both => self.start_node == *node || self.end_node == *node,
        }
    }
}
