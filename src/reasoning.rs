//! Cross-document traversal over a document–entity bipartite graph.
//!
//! Documents mention entities; shared entities connect documents. This
//! module finds those connections, generates reasoning paths by bounded
//! DFS, and discovers indirect document links by BFS over entity
//! relationships. Pure graph traversal — no extraction, ranking models, or
//! answer generation.

use std::collections::{HashSet, VecDeque};

use hashbrown::HashMap;
use tracing::debug;

use crate::model::Relationship;

/// A document participating in cross-document reasoning.
#[derive(Debug, Clone)]
pub struct DocumentNode {
    pub id: String,
    pub entities: Vec<String>,
    pub relevance_score: f64,
}

impl DocumentNode {
    pub fn new(id: impl Into<String>, entities: Vec<String>, relevance_score: f64) -> Self {
        Self {
            id: id.into(),
            entities,
            relevance_score,
        }
    }
}

/// A connection between two documents mediated by shared or chained
/// entities.
#[derive(Debug, Clone)]
pub struct EntityConnection {
    pub source_doc: String,
    pub target_doc: String,
    pub entity: String,
    pub strength: f64,
}

/// How deep reasoning paths are allowed to grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningDepth {
    Basic,
    Moderate,
    Deep,
}

impl ReasoningDepth {
    fn max_path_length(&self) -> usize {
        match self {
            ReasoningDepth::Basic => 2,
            ReasoningDepth::Moderate => 3,
            ReasoningDepth::Deep => 5,
        }
    }
}

/// Pairwise direct connections: documents sharing at least one entity.
/// Strength is the Jaccard similarity of their entity sets; one connection
/// is reported per shared entity.
pub fn connect_documents(documents: &[DocumentNode]) -> Vec<EntityConnection> {
    let mut connections = Vec::new();
    for (i, source) in documents.iter().enumerate() {
        let source_set: HashSet<&str> = source.entities.iter().map(String::as_str).collect();
        for target in &documents[i + 1..] {
            let target_set: HashSet<&str> = target.entities.iter().map(String::as_str).collect();
            let shared: Vec<&str> = source_set.intersection(&target_set).copied().collect();
            if shared.is_empty() {
                continue;
            }
            let union = source_set.union(&target_set).count();
            let strength = shared.len() as f64 / union as f64;
            for entity in shared {
                connections.push(EntityConnection {
                    source_doc: source.id.clone(),
                    target_doc: target.id.clone(),
                    entity: entity.to_owned(),
                    strength,
                });
            }
        }
    }
    debug!(count = connections.len(), "direct document connections");
    connections
}

/// Generate reasoning paths by DFS over the document connection graph.
///
/// Starts from the three most relevant documents; a document appears at
/// most once per path, and path length is capped by `depth`.
pub fn traversal_paths(
    documents: &[DocumentNode],
    connections: &[EntityConnection],
    depth: ReasoningDepth,
) -> Vec<Vec<String>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for doc in documents {
        adjacency.entry(doc.id.as_str()).or_default();
    }
    for conn in connections {
        adjacency
            .entry(conn.source_doc.as_str())
            .or_default()
            .push(conn.target_doc.as_str());
        adjacency
            .entry(conn.target_doc.as_str())
            .or_default()
            .push(conn.source_doc.as_str());
    }

    let max_len = depth.max_path_length();
    let mut sorted: Vec<&DocumentNode> = documents.iter().collect();
    sorted.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    fn dfs(
        current: &str,
        path: &mut Vec<String>,
        depth: usize,
        max_len: usize,
        adjacency: &HashMap<&str, Vec<&str>>,
        paths: &mut Vec<Vec<String>>,
    ) {
        if depth >= max_len {
            paths.push(path.clone());
            return;
        }
        for &neighbor in adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]) {
            if path.iter().any(|p| p == neighbor) {
                continue;
            }
            path.push(neighbor.to_owned());
            dfs(neighbor, path, depth + 1, max_len, adjacency, paths);
            path.pop();
        }
    }

    let mut paths = Vec::new();
    for doc in sorted.iter().take(3) {
        let mut path = vec![doc.id.clone()];
        dfs(&doc.id, &mut path, 0, max_len, &adjacency, &mut paths);
    }
    debug!(count = paths.len(), "traversal paths");
    paths
}

/// Discover indirect document connections by BFS over an entity adjacency
/// built from graph relationships (edges are traversed in both directions).
///
/// At most 3 paths are reported per document pair; only paths whose length
/// lies in `(1, max_hops]` count, with strength `1 / path_length`.
pub fn multi_hop_connections(
    documents: &[DocumentNode],
    relationships: &[Relationship],
    max_hops: usize,
) -> Vec<EntityConnection> {
    let mut entity_graph: HashMap<&str, Vec<&str>> = HashMap::new();
    for rel in relationships {
        entity_graph
            .entry(rel.start_node.as_str())
            .or_default()
            .push(rel.end_node.as_str());
        entity_graph
            .entry(rel.end_node.as_str())
            .or_default()
            .push(rel.start_node.as_str());
    }

    let mut connections = Vec::new();
    for (i, source) in documents.iter().enumerate() {
        for target in &documents[i + 1..] {
            let target_entities: HashSet<&str> =
                target.entities.iter().map(String::as_str).collect();

            for start in source.entities.iter().take(10) {
                if !entity_graph.contains_key(start.as_str()) {
                    continue;
                }
                let mut queue: VecDeque<(&str, Vec<&str>)> = VecDeque::new();
                queue.push_back((start.as_str(), vec![start.as_str()]));
                let mut visited: HashSet<&str> = HashSet::from([start.as_str()]);
                let mut paths_found = 0;

                while let Some((current, path)) = queue.pop_front() {
                    if paths_found >= 3 {
                        break;
                    }
                    if target_entities.contains(current) && path.len() >= 2 {
                        let path_length = path.len() - 1;
                        if path_length > 1 && path_length <= max_hops {
                            connections.push(EntityConnection {
                                source_doc: source.id.clone(),
                                target_doc: target.id.clone(),
                                entity: path.join(" -> "),
                                strength: 1.0 / path_length as f64,
                            });
                            paths_found += 1;
                        }
                    }
                    if path.len() < max_hops {
                        for &next in entity_graph.get(current).map(Vec::as_slice).unwrap_or(&[])
                        {
                            if visited.insert(next) {
                                let mut next_path = path.clone();
                                next_path.push(next);
                                queue.push_back((next, next_path));
                            }
                        }
                    }
                }
            }
        }
    }
    debug!(count = connections.len(), "multi-hop connections");
    connections
}

/// Jaccard similarity over whitespace-split words. Equal non-empty strings
/// are 1.0; disjoint word sets 0.0.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}
