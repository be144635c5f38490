//! WAL invariants over a real block store, plus crash recovery through the
//! transaction manager.

use std::sync::Arc;

use proptest::prelude::*;

use cidgraph::storage::EmbeddedStore;
use cidgraph::{
    BlockStore, GraphEngine, Operation, OperationType, TransactionManager, TransactionState,
    WalEntry, WriteAheadLog,
};

fn wal_over(store: Arc<EmbeddedStore>) -> WriteAheadLog {
    WriteAheadLog::new(store as Arc<dyn BlockStore>)
}

fn entry(txn_id: &str, state: TransactionState, n_ops: usize, ts: f64) -> WalEntry {
    let ops = (0..n_ops)
        .map(|i| Operation {
            op_type: OperationType::WriteNode,
            target_id: format!("{txn_id}-n{i}"),
            data: serde_json::json!({
                "id": format!("{txn_id}-n{i}"),
                "labels": ["Test"],
                "properties": {"name": format!("{txn_id}-n{i}")}
            }),
        })
        .collect();
    WalEntry::new(txn_id, ops, state).with_timestamp(ts)
}

// ============================================================================
// Recovery skips aborted entries
// ============================================================================

#[test]
fn test_recover_returns_committed_ops_chronologically() {
    let wal = wal_over(Arc::new(EmbeddedStore::new()));
    wal.append(entry("t0", TransactionState::Committed, 2, 1000.0)).unwrap();
    wal.append(entry("t1", TransactionState::Aborted, 2, 1001.0)).unwrap();
    wal.append(entry("t2", TransactionState::Committed, 2, 1002.0)).unwrap();

    let ops = wal.recover();
    assert_eq!(ops.len(), 4);
    let targets: Vec<&str> = ops.iter().map(|op| op.target_id.as_str()).collect();
    assert_eq!(targets, ["t0-n0", "t0-n1", "t2-n0", "t2-n1"]);
    assert!(ops.iter().all(|op| !op.target_id.starts_with("t1")));
}

// ============================================================================
// Chain shape
// ============================================================================

#[test]
fn test_read_is_newest_first_and_chain_linked() {
    let wal = wal_over(Arc::new(EmbeddedStore::new()));
    for i in 0..5 {
        wal.append(entry(
            &format!("txn-{i}"),
            TransactionState::Committed,
            1,
            1000.0 + i as f64,
        ))
        .unwrap();
    }

    let entries: Vec<WalEntry> = wal.read().collect();
    assert_eq!(entries.len(), 5);
    for pair in entries.windows(2) {
        assert!(pair[0].timestamp >= pair[1].timestamp);
    }
    assert!(entries.last().unwrap().prev_wal_cid.is_none());
    for e in &entries[..entries.len() - 1] {
        assert!(e.prev_wal_cid.is_some());
    }
    assert!(wal.verify_integrity());
}

#[test]
fn test_cycle_terminates_read_and_fails_integrity() {
    let store = Arc::new(EmbeddedStore::new());
    let wal = WriteAheadLog::new(Arc::clone(&store) as Arc<dyn BlockStore>);
    let cid1 = wal.append(entry("c1", TransactionState::Committed, 1, 1001.0)).unwrap();
    let cid2 = wal.append(entry("c2", TransactionState::Committed, 1, 1002.0)).unwrap();

    let mut corrupted = store.get_json(&cid1).unwrap();
    corrupted["prev_wal_cid"] = serde_json::json!(cid2.as_str());
    let corrupt_cid = store.put_json(&corrupted, true).unwrap();
    wal.attach_head(Some(corrupt_cid), 3);

    assert!(wal.read().count() <= 3);
    assert!(!wal.verify_integrity());
}

#[test]
fn test_compaction_checkpoint() {
    let wal = wal_over(Arc::new(EmbeddedStore::new()));
    wal.set_compaction_threshold(3);
    for i in 0..3 {
        wal.append(entry(
            &format!("t{i}"),
            TransactionState::Committed,
            1,
            1000.0 + i as f64,
        ))
        .unwrap();
    }
    assert!(wal.get_stats().needs_compaction);

    let head = wal.head_cid().unwrap();
    let checkpoint_head = wal.compact(&head).unwrap();
    assert_ne!(checkpoint_head, head);

    let stats = wal.get_stats();
    assert_eq!(stats.entry_count, 0);
    assert!(!stats.needs_compaction);

    // The checkpoint entry records what it replaced.
    let newest = wal.read().next().unwrap();
    let checkpoint = newest.checkpoint.expect("checkpoint entry");
    assert_eq!(checkpoint.up_to, head);
    assert_eq!(checkpoint.compacted_entries, 3);
}

// ============================================================================
// Crash recovery through the transaction manager
// ============================================================================

#[test]
fn test_engine_rebuild_from_wal() {
    let store = Arc::new(EmbeddedStore::new());
    let engine = Arc::new(GraphEngine::with_storage(
        Arc::clone(&store) as Arc<dyn BlockStore>,
        64,
        true,
    ));
    let wal = Arc::new(WriteAheadLog::new(Arc::clone(&store) as Arc<dyn BlockStore>));
    let manager = TransactionManager::new(engine, Arc::clone(&wal));

    for i in 0..3 {
        let mut txn = manager.begin(Default::default()).unwrap();
        let node = cidgraph::Node::new(format!("node-fixed-{i}"))
            .with_labels(["Durable"])
            .with_property("i", i as i64);
        txn.record(Operation::write_node(&node)).unwrap();
        manager.commit(&mut txn).unwrap();
    }

    // An aborted transaction leaves no trace for recovery.
    let mut doomed = manager.begin(Default::default()).unwrap();
    doomed
        .record(Operation::write_node(&cidgraph::Node::new("node-ghost")))
        .unwrap();
    manager.rollback(&mut doomed).unwrap();

    let fresh = GraphEngine::with_storage(store as Arc<dyn BlockStore>, 64, true);
    let replayed = fresh.recover_from_wal(&wal).unwrap();
    assert_eq!(replayed, 3);
    assert_eq!(fresh.all_nodes().len(), 3);
    assert!(fresh.get_node(&"node-ghost".into()).is_none());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// After N sequential appends, read() yields exactly N entries in
    /// non-increasing timestamp order.
    #[test]
    fn prop_chain_length_and_order(n in 0usize..12) {
        let wal = wal_over(Arc::new(EmbeddedStore::new()));
        for i in 0..n {
            wal.append(entry(
                &format!("txn-{i}"),
                TransactionState::Committed,
                1,
                1000.0 + i as f64,
            )).unwrap();
        }
        let entries: Vec<WalEntry> = wal.read().collect();
        prop_assert_eq!(entries.len(), n);
        for pair in entries.windows(2) {
            prop_assert!(pair[0].timestamp >= pair[1].timestamp);
        }
        prop_assert!(wal.verify_integrity());
    }

    /// recover() yields exactly the operations of committed entries, in
    /// chronological order.
    #[test]
    fn prop_recover_matches_committed(states in proptest::collection::vec(any::<bool>(), 0..10)) {
        let wal = wal_over(Arc::new(EmbeddedStore::new()));
        let mut expected = Vec::new();
        for (i, committed) in states.iter().enumerate() {
            let state = if *committed {
                TransactionState::Committed
            } else {
                TransactionState::Aborted
            };
            let e = entry(&format!("txn-{i}"), state, 2, 1000.0 + i as f64);
            if *committed {
                expected.extend(e.operations.iter().map(|op| op.target_id.clone()));
            }
            wal.append(e).unwrap();
        }
        let recovered: Vec<String> = wal.recover().into_iter().map(|op| op.target_id).collect();
        prop_assert_eq!(recovered, expected);
    }
}
