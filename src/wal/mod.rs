//! # Write-Ahead Log
//!
//! An append-only, hash-linked chain of transaction entries stored as CID
//! blocks. Each entry carries the CID of its predecessor; the first entry
//! has none. The WAL is the serialization point for durable writes: `append`
//! is an exclusive critical section, while `read`, `recover`,
//! `verify_integrity`, `get_stats`, and `get_transaction_history` are
//! concurrent-safe readers.
//!
//! Crash recovery replays `recover()` — the operations of COMMITTED entries
//! in chronological order. Chain traversal always carries a visited set so a
//! corrupt (cyclic) chain terminates instead of looping.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{Node, NodeId, RelId, Relationship};
use crate::storage::{BlockStore, Cid};
use crate::{Error, Result};

// ============================================================================
// Operations
// ============================================================================

/// What a logged operation does to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    WriteNode,
    DeleteNode,
    WriteRel,
    DeleteRel,
}

/// A single buffered/logged graph mutation.
///
/// `data` holds the full post-image for writes (the node or relationship
/// record) and is null for deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub target_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Operation {
    pub fn write_node(node: &Node) -> Self {
        Self {
            op_type: OperationType::WriteNode,
            target_id: node.id.0.clone(),
            data: serde_json::to_value(node).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn delete_node(id: &NodeId) -> Self {
        Self {
            op_type: OperationType::DeleteNode,
            target_id: id.0.clone(),
            data: serde_json::Value::Null,
        }
    }

    pub fn write_rel(rel: &Relationship) -> Self {
        Self {
            op_type: OperationType::WriteRel,
            target_id: rel.id.0.clone(),
            data: serde_json::to_value(rel).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn delete_rel(id: &RelId) -> Self {
        Self {
            op_type: OperationType::DeleteRel,
            target_id: id.0.clone(),
            data: serde_json::Value::Null,
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Lifecycle state a transaction was in when its entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Pending,
    Committed,
    Aborted,
}

/// Summary written by `compact`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub up_to: Cid,
    pub compacted_entries: u64,
}

/// One immutable entry in the hash-linked chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub txn_id: String,
    /// Seconds since the epoch; monotonic per appender.
    pub timestamp: f64,
    pub operations: Vec<Operation>,
    pub txn_state: TransactionState,
    #[serde(default)]
    pub prev_wal_cid: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
}

impl WalEntry {
    pub fn new(
        txn_id: impl Into<String>,
        operations: Vec<Operation>,
        txn_state: TransactionState,
    ) -> Self {
        Self {
            txn_id: txn_id.into(),
            timestamp: clock_seconds(),
            operations,
            txn_state,
            prev_wal_cid: None,
            checkpoint: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

fn clock_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// ============================================================================
// Stats
// ============================================================================

/// Return value of [`WriteAheadLog::get_stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalStats {
    pub head_cid: Option<Cid>,
    pub entry_count: u64,
    pub needs_compaction: bool,
    pub compaction_threshold: u64,
}

// ============================================================================
// WriteAheadLog
// ============================================================================

struct WalInner {
    head_cid: Option<Cid>,
    entry_count: u64,
    compaction_threshold: u64,
    last_issued_timestamp: f64,
}

/// Append-only hash-linked transaction log over a [`BlockStore`].
pub struct WriteAheadLog {
    store: Arc<dyn BlockStore>,
    inner: Mutex<WalInner>,
}

impl WriteAheadLog {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self::with_compaction_threshold(store, 100)
    }

    pub fn with_compaction_threshold(store: Arc<dyn BlockStore>, threshold: u64) -> Self {
        Self {
            store,
            inner: Mutex::new(WalInner {
                head_cid: None,
                entry_count: 0,
                compaction_threshold: threshold.max(1),
                last_issued_timestamp: 0.0,
            }),
        }
    }

    /// Reattach to a persisted chain head, e.g. after a restart. Entry count
    /// restarts at zero; compaction pressure is per-process.
    pub fn attach_head(&self, head_cid: Option<Cid>, entry_count: u64) {
        let mut inner = self.inner.lock();
        inner.head_cid = head_cid;
        inner.entry_count = entry_count;
    }

    pub fn set_compaction_threshold(&self, threshold: u64) {
        self.inner.lock().compaction_threshold = threshold.max(1);
    }

    pub fn head_cid(&self) -> Option<Cid> {
        self.inner.lock().head_cid.clone()
    }

    /// A strictly increasing timestamp for entries produced by this appender.
    pub fn issue_timestamp(&self) -> f64 {
        let mut inner = self.inner.lock();
        let now = clock_seconds();
        let issued = if now > inner.last_issued_timestamp {
            now
        } else {
            inner.last_issued_timestamp + 1e-6
        };
        inner.last_issued_timestamp = issued;
        issued
    }

    /// Append an entry: link it to the current head, persist it, advance the
    /// head. Exclusive critical section — appends are totally ordered.
    pub fn append(&self, mut entry: WalEntry) -> Result<Cid> {
        let mut inner = self.inner.lock();
        entry.prev_wal_cid = inner.head_cid.clone();
        let cid = self.persist(&entry)?;
        inner.head_cid = Some(cid.clone());
        inner.entry_count += 1;
        debug!(txn_id = %entry.txn_id, cid = %cid, "appended WAL entry");
        Ok(cid)
    }

    fn persist(&self, entry: &WalEntry) -> Result<Cid> {
        let value =
            serde_json::to_value(entry).map_err(|e| Error::Serialization(e.to_string()))?;
        self.store.put_json(&value, true)
    }

    /// Iterate entries newest-first by walking `prev_wal_cid` links. A
    /// bounded visited set makes traversal of a corrupt, cyclic chain
    /// terminate; undecodable entries end the walk silently.
    pub fn read(&self) -> WalReader {
        WalReader {
            store: Arc::clone(&self.store),
            next: self.head_cid(),
            visited: HashSet::new(),
        }
    }

    /// Operations of COMMITTED entries in chronological order, ready to be
    /// re-applied. Empty for an empty WAL.
    pub fn recover(&self) -> Vec<Operation> {
        let mut committed: Vec<WalEntry> = self
            .read()
            .filter(|entry| entry.txn_state == TransactionState::Committed)
            .collect();
        committed.reverse();
        committed
            .into_iter()
            .flat_map(|entry| entry.operations)
            .collect()
    }

    /// All entries for a transaction, newest-first.
    pub fn get_transaction_history(&self, txn_id: &str) -> Vec<WalEntry> {
        self.read().filter(|entry| entry.txn_id == txn_id).collect()
    }

    /// Write a checkpoint entry summarizing the chain up to `up_to` and
    /// reset the entry counter. Valid on an empty WAL.
    pub fn compact(&self, up_to: &Cid) -> Result<Cid> {
        let mut inner = self.inner.lock();
        let compacted_entries = inner.entry_count;
        let now = clock_seconds();
        let timestamp = if now > inner.last_issued_timestamp {
            now
        } else {
            inner.last_issued_timestamp + 1e-6
        };
        inner.last_issued_timestamp = timestamp;

        let mut entry = WalEntry::new(
            format!("checkpoint-{}", short_hex()),
            Vec::new(),
            TransactionState::Committed,
        )
        .with_timestamp(timestamp);
        entry.checkpoint = Some(Checkpoint {
            up_to: up_to.clone(),
            compacted_entries,
        });
        entry.prev_wal_cid = inner.head_cid.clone();

        let cid = self.persist(&entry)?;
        inner.head_cid = Some(cid.clone());
        inner.entry_count = 0;
        debug!(cid = %cid, compacted_entries, "wrote WAL checkpoint");
        Ok(cid)
    }

    /// Walk the chain and confirm link validity and non-increasing
    /// timestamps. Never errors; an empty WAL is trivially valid. Broken or
    /// cyclic links, undecodable entries, and out-of-order timestamps all
    /// yield `false`.
    pub fn verify_integrity(&self) -> bool {
        let mut visited: HashSet<Cid> = HashSet::new();
        let mut current = self.head_cid();
        let mut previous_timestamp: Option<f64> = None;

        while let Some(cid) = current {
            if !visited.insert(cid.clone()) {
                warn!(cid = %cid, "WAL chain contains a cycle");
                return false;
            }
            let entry = match self.decode(&cid) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(cid = %cid, error = %e, "WAL entry unreadable");
                    return false;
                }
            };
            if let Some(previous) = previous_timestamp {
                if entry.timestamp > previous {
                    warn!(cid = %cid, "WAL timestamps out of order");
                    return false;
                }
            }
            previous_timestamp = Some(entry.timestamp);
            current = entry.prev_wal_cid;
        }
        true
    }

    pub fn get_stats(&self) -> WalStats {
        let inner = self.inner.lock();
        WalStats {
            head_cid: inner.head_cid.clone(),
            entry_count: inner.entry_count,
            needs_compaction: inner.entry_count >= inner.compaction_threshold,
            compaction_threshold: inner.compaction_threshold,
        }
    }

    fn decode(&self, cid: &Cid) -> Result<WalEntry> {
        let value = self.store.get_json(cid)?;
        serde_json::from_value(value).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Newest-first iterator over the WAL chain.
pub struct WalReader {
    store: Arc<dyn BlockStore>,
    next: Option<Cid>,
    visited: HashSet<Cid>,
}

impl Iterator for WalReader {
    type Item = WalEntry;

    fn next(&mut self) -> Option<WalEntry> {
        let cid = self.next.take()?;
        if !self.visited.insert(cid.clone()) {
            warn!(cid = %cid, "WAL read stopped at cycle");
            return None;
        }
        let value = self.store.get_json(&cid).ok()?;
        let entry: WalEntry = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(cid = %cid, error = %e, "WAL read stopped at undecodable entry");
                return None;
            }
        };
        self.next = entry.prev_wal_cid.clone();
        Some(entry)
    }
}

fn short_hex() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..12].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EmbeddedStore;
    use pretty_assertions::assert_eq;

    fn make_wal() -> WriteAheadLog {
        WriteAheadLog::new(Arc::new(EmbeddedStore::new()))
    }

    fn make_op(id: &str) -> Operation {
        Operation {
            op_type: OperationType::WriteNode,
            target_id: id.to_owned(),
            data: serde_json::json!({"labels": ["Test"], "properties": {"name": id}}),
        }
    }

    fn make_entry(txn_id: &str, state: TransactionState, n_ops: usize, ts: f64) -> WalEntry {
        let ops = (0..n_ops).map(|i| make_op(&format!("n_{i}"))).collect();
        WalEntry::new(txn_id, ops, state).with_timestamp(ts)
    }

    #[test]
    fn test_head_changes_after_each_append() {
        let wal = make_wal();
        let mut heads = HashSet::new();
        for i in 0..5 {
            let cid = wal
                .append(make_entry(&format!("txn-{i}"), TransactionState::Committed, 1, 1000.0 + i as f64))
                .unwrap();
            heads.insert(cid);
        }
        assert_eq!(heads.len(), 5);
    }

    #[test]
    fn test_chain_length_equals_append_count() {
        let wal = make_wal();
        for i in 0..7 {
            wal.append(make_entry(&format!("txn-{i}"), TransactionState::Committed, 1, 1000.0 + i as f64))
                .unwrap();
        }
        assert_eq!(wal.read().count(), 7);
    }

    #[test]
    fn test_first_entry_has_no_prev() {
        let wal = make_wal();
        wal.append(make_entry("txn-0", TransactionState::Committed, 1, 1000.0))
            .unwrap();
        let entries: Vec<_> = wal.read().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].prev_wal_cid, None);
    }

    #[test]
    fn test_read_is_reverse_chronological() {
        let wal = make_wal();
        for i in 0..5 {
            wal.append(make_entry(&format!("txn-{i}"), TransactionState::Committed, 1, 1000.0 + i as f64))
                .unwrap();
        }
        let entries: Vec<_> = wal.read().collect();
        for pair in entries.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
        let ids: Vec<_> = entries.iter().map(|e| e.txn_id.as_str()).collect();
        assert_eq!(ids, ["txn-4", "txn-3", "txn-2", "txn-1", "txn-0"]);
    }

    #[test]
    fn test_recover_skips_aborted() {
        let wal = make_wal();
        wal.append(make_entry("t0", TransactionState::Committed, 2, 1000.0)).unwrap();
        wal.append(make_entry("t1", TransactionState::Aborted, 2, 1001.0)).unwrap();
        wal.append(make_entry("t2", TransactionState::Committed, 2, 1002.0)).unwrap();

        let ops = wal.recover();
        assert_eq!(ops.len(), 4);
        // Chronological: t0's ops precede t2's.
        assert_eq!(ops[0].target_id, "n_0");
        assert_eq!(ops[1].target_id, "n_1");
    }

    #[test]
    fn test_empty_wal() {
        let wal = make_wal();
        assert_eq!(wal.read().count(), 0);
        assert!(wal.recover().is_empty());
        assert!(wal.verify_integrity());
        let stats = wal.get_stats();
        assert_eq!(stats.head_cid, None);
        assert_eq!(stats.entry_count, 0);
        assert!(!stats.needs_compaction);
    }

    #[test]
    fn test_compaction_resets_entry_count_and_moves_head() {
        let wal = make_wal();
        let mut cids = Vec::new();
        for i in 0..5 {
            cids.push(
                wal.append(make_entry(&format!("txn-{i}"), TransactionState::Committed, 1, 1000.0 + i as f64))
                    .unwrap(),
            );
        }
        let old_head = wal.head_cid().unwrap();
        let new_head = wal.compact(&cids[2]).unwrap();
        assert_ne!(new_head, old_head);
        assert_eq!(wal.head_cid(), Some(new_head));
        assert_eq!(wal.get_stats().entry_count, 0);
        assert!(!wal.get_stats().needs_compaction);
    }

    #[test]
    fn test_compact_empty_wal() {
        let wal = make_wal();
        let head = wal.compact(&Cid::from("bafyempty")).unwrap();
        assert_eq!(wal.head_cid(), Some(head));
        assert!(!wal.get_stats().needs_compaction);
    }

    #[test]
    fn test_needs_compaction_threshold() {
        let wal = make_wal();
        wal.set_compaction_threshold(3);
        for i in 0..2 {
            wal.append(make_entry(&format!("t{i}"), TransactionState::Committed, 1, 1000.0 + i as f64))
                .unwrap();
        }
        assert!(!wal.get_stats().needs_compaction);
        wal.append(make_entry("t2", TransactionState::Committed, 1, 1002.0)).unwrap();
        assert!(wal.get_stats().needs_compaction);
    }

    #[test]
    fn test_read_terminates_on_cycle() {
        let store = Arc::new(EmbeddedStore::new());
        let wal = WriteAheadLog::new(Arc::clone(&store) as Arc<dyn BlockStore>);
        let cid1 = wal.append(make_entry("cycle-1", TransactionState::Committed, 1, 1001.0)).unwrap();
        let cid2 = wal.append(make_entry("cycle-2", TransactionState::Committed, 1, 1002.0)).unwrap();

        // Corrupt the chain: a copy of entry 1 now points forward at entry 2,
        // and the head is moved onto the corrupt block.
        let mut entry1 = store.get_json(&cid1).unwrap();
        entry1["prev_wal_cid"] = serde_json::json!(cid2.as_str());
        let corrupt = store.put_json(&entry1, true).unwrap();
        wal.attach_head(Some(corrupt), 3);

        let entries: Vec<_> = wal.read().collect();
        assert!(entries.len() <= 3);
        assert!(!wal.verify_integrity());
    }

    #[test]
    fn test_transaction_history_filters() {
        let wal = make_wal();
        wal.append(make_entry("txn-A", TransactionState::Committed, 1, 1001.0)).unwrap();
        wal.append(make_entry("txn-B", TransactionState::Committed, 1, 1002.0)).unwrap();
        wal.append(make_entry("txn-A", TransactionState::Aborted, 1, 1003.0)).unwrap();

        let history = wal.get_transaction_history("txn-A");
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.txn_id == "txn-A"));
        assert!(wal.get_transaction_history("txn-Z").is_empty());
    }

    #[test]
    fn test_verify_integrity_out_of_order_timestamps() {
        let wal = make_wal();
        wal.append(make_entry("txn-high", TransactionState::Committed, 1, 2000.0)).unwrap();
        wal.append(make_entry("txn-low", TransactionState::Committed, 1, 500.0)).unwrap();
        // Walking newest-first sees 500.0 then 2000.0 — an increase.
        assert!(!wal.verify_integrity());
    }

    #[test]
    fn test_issue_timestamp_monotonic() {
        let wal = make_wal();
        let a = wal.issue_timestamp();
        let b = wal.issue_timestamp();
        let c = wal.issue_timestamp();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_entry_wire_format() {
        let entry = make_entry("txn-wire", TransactionState::Committed, 1, 1234.5);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["txn_id"], "txn-wire");
        assert_eq!(json["txn_state"], "COMMITTED");
        assert_eq!(json["operations"][0]["type"], "WRITE_NODE");
        assert_eq!(json["prev_wal_cid"], serde_json::Value::Null);
        assert!(json.get("checkpoint").is_none());
    }
}
