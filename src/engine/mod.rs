//! # Graph Engine
//!
//! Owns the node and relationship tables and persists every mutation as a
//! content-addressed block. Tables support concurrent reads with exclusive
//! writes (reader-writer locks per table); block persistence is write-behind
//! — a failed block write is logged and the in-memory state kept, because
//! the WAL, not the block store, is the durability source for transactional
//! writes.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Direction, Node, NodeId, PropertyMap, RelId, Relationship, Value};
use crate::storage::{BlockStore, Cid, LruMap};
use crate::wal::{Operation, OperationType, WriteAheadLog};
use crate::{Error, Result};

// ============================================================================
// Pattern steps
// ============================================================================

/// One step of a traversal pattern: alternating relationship- and
/// node-steps describing a graph shape to match.
#[derive(Debug, Clone)]
pub enum PatternStep {
    Rel {
        rel_type: Option<String>,
        direction: Direction,
        variable: Option<String>,
    },
    Node {
        variable: Option<String>,
        labels: Vec<String>,
    },
}

/// A set of variable bindings produced by pattern traversal.
pub type Bindings = std::collections::HashMap<String, Value>;

// ============================================================================
// Stats / snapshot documents
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub relationship_count: usize,
    pub storage_backend: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotMeta {
    node_count: usize,
    relationship_count: usize,
    version: String,
}

#[derive(Serialize, Deserialize)]
struct SnapshotDoc {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
    metadata: SnapshotMeta,
}

const SNAPSHOT_VERSION: &str = "1.0";

// ============================================================================
// Undo records
// ============================================================================

/// Inversion record for one applied operation, used for rollback when no
/// pre-commit snapshot exists.
#[derive(Debug)]
pub enum Undo {
    NodeWrite { id: NodeId, previous: Option<Node> },
    NodeDelete { node: Option<Node> },
    RelWrite { id: RelId, previous: Option<Relationship> },
    RelDelete { rel: Option<Relationship> },
}

// ============================================================================
// GraphEngine
// ============================================================================

/// Core graph engine: CRUD, traversal, snapshotting.
pub struct GraphEngine {
    nodes: RwLock<HashMap<NodeId, Node>>,
    relationships: RwLock<HashMap<RelId, Relationship>>,
    node_cids: RwLock<HashMap<NodeId, Cid>>,
    rel_cids: RwLock<HashMap<RelId, Cid>>,
    storage: Option<Arc<dyn BlockStore>>,
    block_cache: LruMap<Cid, serde_json::Value>,
    default_pin: bool,
}

impl GraphEngine {
    /// In-memory engine without persistence.
    pub fn new() -> Self {
        Self::build(None, 1024, true)
    }

    /// Engine persisting every mutation to `storage`.
    pub fn with_storage(storage: Arc<dyn BlockStore>, cache_capacity: usize, default_pin: bool) -> Self {
        Self::build(Some(storage), cache_capacity, default_pin)
    }

    fn build(storage: Option<Arc<dyn BlockStore>>, cache_capacity: usize, default_pin: bool) -> Self {
        debug!(persistence = storage.is_some(), "graph engine initialized");
        Self {
            nodes: RwLock::new(HashMap::new()),
            relationships: RwLock::new(HashMap::new()),
            node_cids: RwLock::new(HashMap::new()),
            rel_cids: RwLock::new(HashMap::new()),
            storage,
            block_cache: LruMap::new(cache_capacity),
            default_pin,
        }
    }

    pub fn has_persistence(&self) -> bool {
        self.storage.is_some()
    }

    pub fn get_stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.nodes.read().len(),
            relationship_count: self.relationships.read().len(),
            storage_backend: self.storage.as_ref().map(|s| s.backend_name().to_owned()),
        }
    }

    // ========================================================================
    // Node CRUD
    // ========================================================================

    /// Create a node with a fresh id. Persistence failures are logged, not
    /// fatal — the in-memory node is still returned.
    pub fn create_node(&self, labels: Vec<String>, properties: PropertyMap) -> Node {
        let node = Node {
            id: NodeId(format!("node-{}", short_hex())),
            labels,
            properties,
        };
        self.nodes.write().insert(node.id.clone(), node.clone());
        self.persist_node(&node);
        info!(id = %node.id, labels = ?node.labels, "created node");
        node
    }

    /// Cache-first lookup; on miss, read through the CID map to storage.
    /// Storage and decode failures are logged and yield `None`.
    pub fn get_node(&self, id: &NodeId) -> Option<Node> {
        if let Some(node) = self.nodes.read().get(id) {
            return Some(node.clone());
        }
        let cid = self.node_cids.read().get(id).cloned()?;
        match self.read_block(&cid) {
            Ok(value) => match serde_json::from_value::<Node>(value) {
                Ok(node) => {
                    self.nodes.write().insert(id.clone(), node.clone());
                    debug!(id = %id, cid = %cid, "node loaded from storage");
                    Some(node)
                }
                Err(e) => {
                    warn!(id = %id, cid = %cid, error = %e, "stored node undecodable");
                    None
                }
            },
            Err(e) => {
                warn!(id = %id, cid = %cid, error = %e, "failed to load node");
                None
            }
        }
    }

    /// Merge `properties` into the node (new keys overwrite) and re-persist.
    /// Returns the updated node, or `None` for an unknown id.
    pub fn update_node(&self, id: &NodeId, properties: PropertyMap) -> Option<Node> {
        let updated = {
            let mut nodes = self.nodes.write();
            let node = nodes.get_mut(id)?;
            node.properties.extend(properties);
            node.clone()
        };
        self.persist_node(&updated);
        info!(id = %id, "updated node");
        Some(updated)
    }

    /// Remove a node from the live index and its CID mapping. The block is
    /// not unpinned — snapshots may still reference it.
    pub fn delete_node(&self, id: &NodeId) -> bool {
        let removed = self.nodes.write().remove(id).is_some();
        if removed {
            self.node_cids.write().remove(id);
            info!(id = %id, "deleted node");
        }
        removed
    }

    /// Idempotent upsert under a caller-supplied id. Used by WAL replay,
    /// snapshot load, and migration import.
    pub fn put_node(&self, node: Node) -> Option<Node> {
        let previous = self.nodes.write().insert(node.id.clone(), node.clone());
        self.persist_node(&node);
        previous
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    /// Create a directed relationship. Both endpoints must be live nodes.
    pub fn create_relationship(
        &self,
        rel_type: impl Into<String>,
        start_node: &NodeId,
        end_node: &NodeId,
        properties: PropertyMap,
    ) -> Result<Relationship> {
        if self.get_node(start_node).is_none() {
            return Err(Error::EntityNotFound(format!("start node {start_node}")));
        }
        if self.get_node(end_node).is_none() {
            return Err(Error::EntityNotFound(format!("end node {end_node}")));
        }
        let rel = Relationship {
            id: RelId(format!("rel-{}", short_hex())),
            rel_type: rel_type.into(),
            start_node: start_node.clone(),
            end_node: end_node.clone(),
            properties,
        };
        self.relationships.write().insert(rel.id.clone(), rel.clone());
        self.persist_relationship(&rel);
        info!(start = %rel.start_node, rel_type = %rel.rel_type, end = %rel.end_node, "created relationship");
        Ok(rel)
    }

    pub fn get_relationship(&self, id: &RelId) -> Option<Relationship> {
        if let Some(rel) = self.relationships.read().get(id) {
            return Some(rel.clone());
        }
        let cid = self.rel_cids.read().get(id).cloned()?;
        match self.read_block(&cid) {
            Ok(value) => match serde_json::from_value::<Relationship>(value) {
                Ok(rel) => {
                    self.relationships.write().insert(id.clone(), rel.clone());
                    Some(rel)
                }
                Err(e) => {
                    warn!(id = %id, cid = %cid, error = %e, "stored relationship undecodable");
                    None
                }
            },
            Err(e) => {
                warn!(id = %id, cid = %cid, error = %e, "failed to load relationship");
                None
            }
        }
    }

    pub fn delete_relationship(&self, id: &RelId) -> bool {
        let removed = self.relationships.write().remove(id).is_some();
        if removed {
            self.rel_cids.write().remove(id);
            info!(id = %id, "deleted relationship");
        }
        removed
    }

    pub fn put_relationship(&self, rel: Relationship) -> Option<Relationship> {
        let previous = self.relationships.write().insert(rel.id.clone(), rel.clone());
        self.persist_relationship(&rel);
        previous
    }

    // ========================================================================
    // Scans and traversal
    // ========================================================================

    /// Relationships touching `node_id` in `direction`, optionally filtered
    /// by type. Scans the relationship table — O(R).
    pub fn get_relationships(
        &self,
        node_id: &NodeId,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Vec<Relationship> {
        let rels = self.relationships.read();
        let mut results: Vec<Relationship> = rels
            .values()
            .filter(|rel| rel.matches_direction(node_id, direction))
            .filter(|rel| rel_type.map_or(true, |t| rel.rel_type == t))
            .cloned()
            .collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(node = %node_id, count = results.len(), "collected relationships");
        results
    }

    /// Conjunctive filter: a node must carry every requested label and every
    /// requested property/value pair. `limit = Some(0)` yields an empty list.
    pub fn find_nodes(
        &self,
        labels: Option<&[String]>,
        properties: Option<&PropertyMap>,
        limit: Option<usize>,
    ) -> Vec<Node> {
        if limit == Some(0) {
            return Vec::new();
        }
        let nodes = self.nodes.read();
        let mut results: Vec<Node> = Vec::new();
        let mut candidates: Vec<&Node> = nodes.values().collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        for node in candidates {
            if let Some(wanted) = labels {
                if !wanted.iter().all(|label| node.has_label(label)) {
                    continue;
                }
            }
            if let Some(props) = properties {
                if !props.iter().all(|(k, v)| node.get(k) == Some(v)) {
                    continue;
                }
            }
            results.push(node.clone());
            if let Some(limit) = limit {
                if results.len() >= limit {
                    break;
                }
            }
        }
        debug!(count = results.len(), "find_nodes");
        results
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.read().values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn all_relationships(&self) -> Vec<Relationship> {
        let mut rels: Vec<Relationship> = self.relationships.read().values().cloned().collect();
        rels.sort_by(|a, b| a.id.cmp(&b.id));
        rels
    }

    /// Iteratively extend partial bindings along a pattern of alternating
    /// relationship- and node-steps. Orphan relationships (target node not
    /// present) terminate that branch silently.
    pub fn traverse_pattern(
        &self,
        start_nodes: &[Node],
        pattern: &[PatternStep],
        limit: Option<usize>,
    ) -> Vec<Bindings> {
        let mut results: Vec<Bindings> = Vec::new();

        'starts: for start in start_nodes {
            let mut bindings = Bindings::new();
            bindings.insert("start".to_owned(), Value::Node(Box::new(start.clone())));
            let mut frontier = vec![(bindings, start.id.clone())];

            let mut i = 0;
            while i < pattern.len() {
                let PatternStep::Rel { rel_type, direction, variable } = &pattern[i] else {
                    i += 1;
                    continue;
                };
                let node_step = match pattern.get(i + 1) {
                    Some(PatternStep::Node { variable, labels }) => Some((variable, labels)),
                    _ => None,
                };

                let mut extended = Vec::new();
                for (partial, tip) in &frontier {
                    let rels = self.get_relationships(tip, *direction, rel_type.as_deref());
                    for rel in rels {
                        let target_id = match direction {
                            Direction::Incoming => rel.start_node.clone(),
                            _ => rel.end_node.clone(),
                        };
                        let Some(target) = self.get_node(&target_id) else {
                            continue;
                        };
                        if let Some((_, labels)) = node_step {
                            if !labels.is_empty() && !labels.iter().any(|l| target.has_label(l)) {
                                continue;
                            }
                        }
                        let mut next = partial.clone();
                        if let Some(var) = variable {
                            next.insert(var.clone(), Value::Relationship(Box::new(rel.clone())));
                        }
                        if let Some((Some(var), _)) = node_step {
                            next.insert(var.clone(), Value::Node(Box::new(target.clone())));
                        }
                        extended.push((next, target_id));
                    }
                }
                frontier = extended;
                i += if node_step.is_some() { 2 } else { 1 };
            }

            for (bindings, _) in frontier {
                results.push(bindings);
                if let Some(limit) = limit {
                    if results.len() >= limit {
                        break 'starts;
                    }
                }
            }
        }
        debug!(matches = results.len(), "pattern traversal");
        results
    }

    /// BFS over outgoing relationships from `start` to `end`, bounded by
    /// `max_depth`. Each branch carries its own visited set, so cyclic
    /// graphs terminate. A path is an ordered list of relationships; no
    /// zero-length path is produced when `start == end`.
    pub fn find_paths(
        &self,
        start: &NodeId,
        end: &NodeId,
        max_depth: usize,
        rel_type: Option<&str>,
    ) -> Vec<Vec<Relationship>> {
        let mut paths = Vec::new();
        let mut queue: std::collections::VecDeque<(NodeId, Vec<Relationship>, std::collections::HashSet<NodeId>)> =
            std::collections::VecDeque::new();
        queue.push_back((start.clone(), Vec::new(), std::collections::HashSet::from([start.clone()])));

        while let Some((current, path, visited)) = queue.pop_front() {
            if path.len() >= max_depth {
                continue;
            }
            for rel in self.get_relationships(&current, Direction::Outgoing, rel_type) {
                let target = rel.end_node.clone();
                if target == *end {
                    let mut found = path.clone();
                    found.push(rel);
                    paths.push(found);
                    continue;
                }
                if visited.contains(&target) {
                    continue;
                }
                let mut next_visited = visited.clone();
                next_visited.insert(target.clone());
                let mut next_path = path.clone();
                next_path.push(rel);
                queue.push_back((target, next_path, next_visited));
            }
        }
        debug!(count = paths.len(), start = %start, end = %end, "find_paths");
        paths
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Serialize the full live index into a single snapshot block and return
    /// its CID.
    pub fn save_graph(&self) -> Result<Cid> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| Error::Storage("graph persistence is disabled".to_owned()))?;

        let nodes = self.all_nodes();
        let relationships = self.all_relationships();
        let doc = SnapshotDoc {
            metadata: SnapshotMeta {
                node_count: nodes.len(),
                relationship_count: relationships.len(),
                version: SNAPSHOT_VERSION.to_owned(),
            },
            nodes,
            relationships,
        };
        let value = serde_json::to_value(&doc).map_err(|e| Error::Serialization(e.to_string()))?;
        let cid = storage.put_json(&value, true)?;
        info!(cid = %cid, nodes = doc.metadata.node_count, relationships = doc.metadata.relationship_count, "graph saved");
        Ok(cid)
    }

    /// Replace the live index with a stored snapshot. Caches are cleared
    /// first; on failure the engine is left empty rather than half-loaded.
    pub fn load_graph(&self, root_cid: &Cid) -> Result<()> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| Error::Storage("graph persistence is disabled".to_owned()))?;

        let value = storage.get_json(root_cid)?;
        let doc: SnapshotDoc =
            serde_json::from_value(value).map_err(|e| Error::Deserialization(e.to_string()))?;

        self.block_cache.clear();
        {
            let mut nodes = self.nodes.write();
            let mut rels = self.relationships.write();
            let mut node_cids = self.node_cids.write();
            let mut rel_cids = self.rel_cids.write();
            nodes.clear();
            rels.clear();
            node_cids.clear();
            rel_cids.clear();
            for node in doc.nodes {
                nodes.insert(node.id.clone(), node);
            }
            for rel in doc.relationships {
                rels.insert(rel.id.clone(), rel);
            }
        }
        info!(cid = %root_cid, "graph loaded");
        Ok(())
    }

    // ========================================================================
    // WAL operations
    // ========================================================================

    /// Apply a logged operation, returning the inversion record.
    pub fn apply_operation(&self, op: &Operation) -> Result<Undo> {
        match op.op_type {
            OperationType::WriteNode => {
                let node: Node = serde_json::from_value(op.data.clone())
                    .map_err(|e| Error::Transaction(format!("bad WRITE_NODE payload: {e}")))?;
                let previous = self.put_node(node);
                Ok(Undo::NodeWrite {
                    id: NodeId(op.target_id.clone()),
                    previous,
                })
            }
            OperationType::DeleteNode => {
                let id = NodeId(op.target_id.clone());
                let node = self.nodes.read().get(&id).cloned();
                self.delete_node(&id);
                Ok(Undo::NodeDelete { node })
            }
            OperationType::WriteRel => {
                let rel: Relationship = serde_json::from_value(op.data.clone())
                    .map_err(|e| Error::Transaction(format!("bad WRITE_REL payload: {e}")))?;
                let previous = self.put_relationship(rel);
                Ok(Undo::RelWrite {
                    id: RelId(op.target_id.clone()),
                    previous,
                })
            }
            OperationType::DeleteRel => {
                let id = RelId(op.target_id.clone());
                let rel = self.relationships.read().get(&id).cloned();
                self.delete_relationship(&id);
                Ok(Undo::RelDelete { rel })
            }
        }
    }

    /// Invert one applied operation.
    pub fn revert(&self, undo: Undo) {
        match undo {
            Undo::NodeWrite { id, previous } => match previous {
                Some(node) => {
                    self.nodes.write().insert(id, node);
                }
                None => {
                    self.delete_node(&id);
                }
            },
            Undo::NodeDelete { node } => {
                if let Some(node) = node {
                    self.nodes.write().insert(node.id.clone(), node);
                }
            }
            Undo::RelWrite { id, previous } => match previous {
                Some(rel) => {
                    self.relationships.write().insert(id, rel);
                }
                None => {
                    self.delete_relationship(&id);
                }
            },
            Undo::RelDelete { rel } => {
                if let Some(rel) = rel {
                    self.relationships.write().insert(rel.id.clone(), rel);
                }
            }
        }
    }

    /// Replay committed WAL operations in chronological order. Returns the
    /// number of operations applied.
    pub fn recover_from_wal(&self, wal: &WriteAheadLog) -> Result<usize> {
        let ops = wal.recover();
        let count = ops.len();
        for op in &ops {
            self.apply_operation(op)?;
        }
        info!(operations = count, "recovered from WAL");
        Ok(count)
    }

    // ========================================================================
    // Persistence plumbing
    // ========================================================================

    fn persist_node(&self, node: &Node) {
        let Some(storage) = &self.storage else { return };
        match serde_json::to_value(node) {
            Ok(value) => match storage.put_json(&value, self.default_pin) {
                Ok(cid) => {
                    self.block_cache.put(cid.clone(), value);
                    self.node_cids.write().insert(node.id.clone(), cid);
                }
                Err(e) => warn!(id = %node.id, error = %e, "failed to persist node"),
            },
            Err(e) => warn!(id = %node.id, error = %e, "failed to serialize node"),
        }
    }

    fn persist_relationship(&self, rel: &Relationship) {
        let Some(storage) = &self.storage else { return };
        match serde_json::to_value(rel) {
            Ok(value) => match storage.put_json(&value, self.default_pin) {
                Ok(cid) => {
                    self.block_cache.put(cid.clone(), value);
                    self.rel_cids.write().insert(rel.id.clone(), cid);
                }
                Err(e) => warn!(id = %rel.id, error = %e, "failed to persist relationship"),
            },
            Err(e) => warn!(id = %rel.id, error = %e, "failed to serialize relationship"),
        }
    }

    fn read_block(&self, cid: &Cid) -> Result<serde_json::Value> {
        if let Some(value) = self.block_cache.get(cid) {
            return Ok(value);
        }
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| Error::Storage("graph persistence is disabled".to_owned()))?;
        let value = storage.get_json(cid)?;
        self.block_cache.put(cid.clone(), value.clone());
        Ok(value)
    }
}

impl Default for GraphEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn short_hex() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..12].to_owned()
}
