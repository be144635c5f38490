//! Import/export of whole graphs.
//!
//! [`GraphData`] is the interchange form: nodes, relationships, metadata.
//! Formats:
//! - JSON — canonical, round-trip safe.
//! - Pajek — `*Vertices` / `*Edges` text; structure only, properties are
//!   not representable.
//! - CAR (feature `car`) — dag-cbor block wrapped in a CARv1 archive.

#[cfg(feature = "car")]
pub mod car;

use serde::{Deserialize, Serialize};

use crate::engine::GraphEngine;
use crate::model::{Node, RelId, Relationship};
use crate::{Error, Result};

/// Counts and version tag carried with every export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub node_count: usize,
    pub relationship_count: usize,
    pub version: String,
}

/// A complete graph in interchange form. Structural equality is the
/// round-trip law for the JSON format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
    pub metadata: GraphMetadata,
}

impl GraphData {
    pub fn new(nodes: Vec<Node>, relationships: Vec<Relationship>) -> Self {
        let metadata = GraphMetadata {
            node_count: nodes.len(),
            relationship_count: relationships.len(),
            version: "1.0".to_owned(),
        };
        Self {
            nodes,
            relationships,
            metadata,
        }
    }

    /// Snapshot the live index of an engine.
    pub fn from_engine(engine: &GraphEngine) -> Self {
        Self::new(engine.all_nodes(), engine.all_relationships())
    }

    /// Load this graph into an engine (idempotent upserts).
    pub fn into_engine(&self, engine: &GraphEngine) {
        for node in &self.nodes {
            engine.put_node(node.clone());
        }
        for rel in &self.relationships {
            engine.put_relationship(rel.clone());
        }
    }

    // ========================================================================
    // JSON
    // ========================================================================

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Deserialization(e.to_string()))
    }

    // ========================================================================
    // Pajek
    // ========================================================================

    /// Serialize as a Pajek network: vertices named by node id, edges
    /// labeled with the relationship type. Properties and labels are not
    /// representable in Pajek and are dropped.
    pub fn to_pajek(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("*Vertices {}\n", self.nodes.len()));
        for (i, node) in self.nodes.iter().enumerate() {
            out.push_str(&format!("{} \"{}\"\n", i + 1, node.id));
        }
        out.push_str("*Edges\n");
        for rel in &self.relationships {
            let src = self.nodes.iter().position(|n| n.id == rel.start_node);
            let dst = self.nodes.iter().position(|n| n.id == rel.end_node);
            if let (Some(src), Some(dst)) = (src, dst) {
                out.push_str(&format!("{} {} \"{}\"\n", src + 1, dst + 1, rel.rel_type));
            }
        }
        out
    }

    /// Parse a Pajek network. Comment lines starting with `%` are skipped;
    /// vertex names become node ids.
    pub fn from_pajek(text: &str) -> Result<Self> {
        #[derive(PartialEq)]
        enum Section {
            Preamble,
            Vertices,
            Edges,
        }

        let mut section = Section::Preamble;
        let mut nodes: Vec<Node> = Vec::new();
        let mut relationships: Vec<Relationship> = Vec::new();
        let mut rel_counter = 0usize;

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('%') {
                continue;
            }
            let lower = line.to_lowercase();
            if lower.starts_with("*vertices") {
                section = Section::Vertices;
                continue;
            }
            if lower.starts_with("*edges") || lower.starts_with("*arcs") {
                section = Section::Edges;
                continue;
            }

            match section {
                Section::Preamble => {
                    return Err(Error::Deserialization(format!(
                        "pajek line {} outside any section: '{line}'",
                        line_no + 1
                    )))
                }
                Section::Vertices => {
                    let name = quoted_part(line)
                        .map(str::to_owned)
                        .or_else(|| line.split_whitespace().nth(1).map(str::to_owned))
                        .ok_or_else(|| {
                            Error::Deserialization(format!(
                                "pajek vertex line {} has no name: '{line}'",
                                line_no + 1
                            ))
                        })?;
                    nodes.push(Node::new(name));
                }
                Section::Edges => {
                    let mut parts = line.split_whitespace();
                    let src = parse_index(parts.next(), line_no)?;
                    let dst = parse_index(parts.next(), line_no)?;
                    if src == 0 || src > nodes.len() || dst == 0 || dst > nodes.len() {
                        return Err(Error::Deserialization(format!(
                            "pajek edge line {} references unknown vertex: '{line}'",
                            line_no + 1
                        )));
                    }
                    let rel_type = quoted_part(line).unwrap_or("RELATED_TO").to_owned();
                    rel_counter += 1;
                    relationships.push(Relationship {
                        id: RelId(format!("rel-pajek-{rel_counter:06}")),
                        rel_type,
                        start_node: nodes[src - 1].id.clone(),
                        end_node: nodes[dst - 1].id.clone(),
                        properties: Default::default(),
                    });
                }
            }
        }

        Ok(Self::new(nodes, relationships))
    }

    // ========================================================================
    // CAR
    // ========================================================================

    /// Encode as a CARv1 archive with a single dag-cbor root block.
    #[cfg(feature = "car")]
    pub fn to_car(&self) -> Result<Vec<u8>> {
        car::encode(self)
    }

    #[cfg(not(feature = "car"))]
    pub fn to_car(&self) -> Result<Vec<u8>> {
        Err(Error::MissingDependency(
            "CAR export requires the 'car' feature (cid, multihash, serde_ipld_dagcbor)".into(),
        ))
    }

    /// Decode a CARv1 archive; the archive must declare at least one root.
    #[cfg(feature = "car")]
    pub fn from_car(bytes: &[u8]) -> Result<Self> {
        car::decode(bytes)
    }

    #[cfg(not(feature = "car"))]
    pub fn from_car(_bytes: &[u8]) -> Result<Self> {
        Err(Error::MissingDependency(
            "CAR import requires the 'car' feature (cid, multihash, serde_ipld_dagcbor)".into(),
        ))
    }
}

fn quoted_part(line: &str) -> Option<&str> {
    let start = line.find('"')?;
    let end = line.rfind('"')?;
    if end > start {
        Some(&line[start + 1..end])
    } else {
        None
    }
}

fn parse_index(part: Option<&str>, line_no: usize) -> Result<usize> {
    part.and_then(|p| p.parse::<usize>().ok()).ok_or_else(|| {
        Error::Deserialization(format!("pajek line {}: expected vertex index", line_no + 1))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeId, Value};
    use pretty_assertions::assert_eq;

    fn sample() -> GraphData {
        let a = Node::new("node-a").with_labels(["Person"]).with_property("name", "Alice");
        let b = Node::new("node-b").with_labels(["Person"]).with_property("name", "Bob");
        let rel = Relationship::new("rel-1", "KNOWS", "node-a", "node-b").with_property("since", 2020);
        GraphData::new(vec![a, b], vec![rel])
    }

    #[test]
    fn test_json_round_trip() {
        let original = sample();
        let text = original.to_json_string().unwrap();
        let restored = GraphData::from_json_str(&text).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_json_garbage_is_deserialization_error() {
        assert!(matches!(
            GraphData::from_json_str("{broken"),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_pajek_round_trip_structure() {
        let original = sample();
        let text = original.to_pajek();
        assert!(text.starts_with("*Vertices 2"));
        let restored = GraphData::from_pajek(&text).unwrap();
        assert_eq!(restored.nodes.len(), 2);
        assert_eq!(restored.relationships.len(), 1);
        assert_eq!(restored.nodes[0].id, NodeId::from("node-a"));
        assert_eq!(restored.relationships[0].rel_type, "KNOWS");
        assert_eq!(restored.relationships[0].start_node, NodeId::from("node-a"));
    }

    #[test]
    fn test_pajek_skips_comments() {
        let text = "% a comment\n*Vertices 1\n1 \"node-x\"\n% another\n*Edges\n";
        let restored = GraphData::from_pajek(text).unwrap();
        assert_eq!(restored.nodes.len(), 1);
        assert!(restored.relationships.is_empty());
    }

    #[test]
    fn test_pajek_bad_edge_is_error() {
        let text = "*Vertices 1\n1 \"node-x\"\n*Edges\n1 9 \"K\"\n";
        assert!(matches!(
            GraphData::from_pajek(text),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_engine_bridge() {
        let engine = GraphEngine::new();
        sample().into_engine(&engine);
        let exported = GraphData::from_engine(&engine);
        assert_eq!(exported.metadata.node_count, 2);
        assert_eq!(exported.metadata.relationship_count, 1);
        assert_eq!(
            exported.nodes[0].get("name"),
            Some(&Value::from("Alice"))
        );
    }

    #[cfg(not(feature = "car"))]
    #[test]
    fn test_car_without_feature_reports_dependency() {
        let err = sample().to_car().unwrap_err();
        assert!(matches!(err, Error::MissingDependency(_)));
        assert!(matches!(
            GraphData::from_car(&[]),
            Err(Error::MissingDependency(_))
        ));
    }
}
