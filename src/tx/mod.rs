//! # Transactions
//!
//! Transactions buffer operations — they are not applied to the engine until
//! commit. Commit writes a single COMMITTED entry to the WAL first; only
//! after the entry is durable are the operations applied, in recorded order.
//! A WAL failure therefore aborts the transaction with nothing applied, and
//! crash recovery replays exactly the committed entries.
//!
//! Rollback uses two strategies, in order: restore the pre-commit snapshot
//! captured at begin (SERIALIZABLE, or on request), else reverse the applied
//! operations using the engine's inversion records.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{GraphEngine, Undo};
use crate::storage::Cid;
use crate::wal::{Operation, TransactionState, WalEntry, WriteAheadLog};
use crate::{Error, Result};

// ============================================================================
// Isolation
// ============================================================================

/// Declared isolation level of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Options for [`TransactionManager::begin`].
#[derive(Debug, Clone, Default)]
pub struct TxnOptions {
    pub isolation: Option<IsolationLevel>,
    pub timeout: Option<Duration>,
    /// Capture a rollback snapshot even below SERIALIZABLE.
    pub snapshot: bool,
}

// ============================================================================
// Transaction
// ============================================================================

/// A single transaction: an id, an isolation level, and a buffer of
/// operations awaiting commit.
pub struct Transaction {
    id: String,
    state: TransactionState,
    isolation: IsolationLevel,
    operations: Vec<Operation>,
    snapshot_cid: Option<Cid>,
    deadline: Option<Instant>,
}

impl Transaction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn is_pending(&self) -> bool {
        self.state == TransactionState::Pending
    }

    pub fn has_writes(&self) -> bool {
        !self.operations.is_empty()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn snapshot_cid(&self) -> Option<&Cid> {
        self.snapshot_cid.as_ref()
    }

    /// Buffer an operation. Fails once the transaction has left PENDING or
    /// its deadline expired.
    pub fn record(&mut self, op: Operation) -> Result<()> {
        self.check_open()?;
        self.operations.push(op);
        Ok(())
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        match self.state {
            TransactionState::Pending => {}
            TransactionState::Committed => {
                return Err(Error::Transaction(format!(
                    "transaction {} already committed",
                    self.id
                )))
            }
            TransactionState::Aborted => {
                return Err(Error::TransactionAborted(self.id.clone()))
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::TransactionTimeout(format!(
                    "transaction {} exceeded its timeout",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// TransactionManager
// ============================================================================

/// Begins, commits, and rolls back transactions over one engine + WAL pair.
pub struct TransactionManager {
    engine: Arc<GraphEngine>,
    wal: Arc<WriteAheadLog>,
    isolation_default: IsolationLevel,
    snapshot_on_begin: bool,
}

impl TransactionManager {
    pub fn new(engine: Arc<GraphEngine>, wal: Arc<WriteAheadLog>) -> Self {
        Self {
            engine,
            wal,
            isolation_default: IsolationLevel::ReadCommitted,
            snapshot_on_begin: false,
        }
    }

    pub fn with_defaults(
        mut self,
        isolation_default: IsolationLevel,
        snapshot_on_begin: bool,
    ) -> Self {
        self.isolation_default = isolation_default;
        self.snapshot_on_begin = snapshot_on_begin;
        self
    }

    pub fn engine(&self) -> &Arc<GraphEngine> {
        &self.engine
    }

    pub fn wal(&self) -> &Arc<WriteAheadLog> {
        &self.wal
    }

    /// Begin a PENDING transaction. A pre-commit snapshot is captured for
    /// SERIALIZABLE isolation, or when requested, provided persistence is
    /// enabled; capture failure is a transaction error.
    pub fn begin(&self, options: TxnOptions) -> Result<Transaction> {
        let isolation = options.isolation.unwrap_or(self.isolation_default);
        let wants_snapshot =
            isolation == IsolationLevel::Serializable || options.snapshot || self.snapshot_on_begin;

        let snapshot_cid = if wants_snapshot && self.engine.has_persistence() {
            Some(self.capture_snapshot()?)
        } else {
            None
        };

        let txn = Transaction {
            id: format!("txn-{}", short_hex()),
            state: TransactionState::Pending,
            isolation,
            operations: Vec::new(),
            snapshot_cid,
            deadline: options.timeout.map(|t| Instant::now() + t),
        };
        debug!(txn_id = %txn.id, ?isolation, "transaction started");
        Ok(txn)
    }

    fn capture_snapshot(&self) -> Result<Cid> {
        self.engine
            .save_graph()
            .map_err(|e| Error::Transaction(format!("snapshot capture failed: {e}")))
    }

    /// Commit: WAL entry first, then apply. Returns the transaction id for
    /// bookmark construction.
    pub fn commit(&self, txn: &mut Transaction) -> Result<String> {
        if let Err(e) = txn.check_open() {
            if matches!(e, Error::TransactionTimeout(_)) {
                txn.state = TransactionState::Aborted;
                txn.operations.clear();
            }
            return Err(e);
        }

        let entry = WalEntry::new(
            txn.id.clone(),
            txn.operations.clone(),
            TransactionState::Committed,
        )
        .with_timestamp(self.wal.issue_timestamp());

        if let Err(e) = self.wal.append(entry) {
            txn.state = TransactionState::Aborted;
            warn!(txn_id = %txn.id, error = %e, "WAL append failed, transaction aborted");
            return Err(Error::Transaction(format!(
                "WAL append failed for {}: {e}",
                txn.id
            )));
        }

        let mut undos: Vec<Undo> = Vec::with_capacity(txn.operations.len());
        for op in &txn.operations {
            match self.engine.apply_operation(op) {
                Ok(undo) => undos.push(undo),
                Err(e) => {
                    self.unapply(txn, undos);
                    txn.state = TransactionState::Aborted;
                    return match e {
                        Error::TransactionAborted(_) => Err(e),
                        other => Err(Error::Transaction(format!(
                            "apply failed for {}: {other}",
                            txn.id
                        ))),
                    };
                }
            }
        }

        txn.state = TransactionState::Committed;
        info!(txn_id = %txn.id, operations = txn.operations.len(), "transaction committed");
        Ok(txn.id.clone())
    }

    /// Abort a transaction. Buffered (unapplied) operations are discarded;
    /// if a pre-commit snapshot exists it is restored.
    pub fn rollback(&self, txn: &mut Transaction) -> Result<()> {
        if txn.state == TransactionState::Committed {
            return Err(Error::Transaction(format!(
                "transaction {} already committed",
                txn.id
            )));
        }
        if let Some(cid) = txn.snapshot_cid.clone() {
            if self.engine.has_persistence() {
                self.engine
                    .load_graph(&cid)
                    .map_err(|e| Error::Transaction(format!("snapshot restore failed: {e}")))?;
            }
        }
        txn.operations.clear();
        txn.state = TransactionState::Aborted;
        info!(txn_id = %txn.id, "transaction rolled back");
        Ok(())
    }

    fn unapply(&self, txn: &Transaction, undos: Vec<Undo>) {
        if let Some(cid) = &txn.snapshot_cid {
            if self.engine.has_persistence() {
                if self.engine.load_graph(cid).is_ok() {
                    return;
                }
                warn!(txn_id = %txn.id, "snapshot restore failed, reversing operations");
            }
        }
        for undo in undos.into_iter().rev() {
            self.engine.revert(undo);
        }
    }
}

fn short_hex() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..12].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, PropertyMap, Value};
    use crate::storage::{BlockStore, Cid, Codec, EmbeddedStore};
    use crate::storage::BackendInfo;
    use pretty_assertions::assert_eq;

    fn make_manager() -> TransactionManager {
        let store: Arc<dyn BlockStore> = Arc::new(EmbeddedStore::new());
        let engine = Arc::new(GraphEngine::with_storage(Arc::clone(&store), 64, true));
        let wal = Arc::new(WriteAheadLog::new(store));
        TransactionManager::new(engine, wal)
    }

    fn write_op(id: &str) -> Operation {
        Operation::write_node(&Node::new(id).with_labels(["T"]).with_property("v", 1))
    }

    #[test]
    fn test_commit_applies_buffered_operations() {
        let manager = make_manager();
        let mut txn = manager.begin(TxnOptions::default()).unwrap();
        txn.record(write_op("node-a")).unwrap();
        txn.record(write_op("node-b")).unwrap();

        // Nothing is applied before commit.
        assert!(manager.engine().get_node(&"node-a".into()).is_none());

        let txn_id = manager.commit(&mut txn).unwrap();
        assert_eq!(txn_id, txn.id());
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(manager.engine().get_node(&"node-a".into()).is_some());
        assert!(manager.engine().get_node(&"node-b".into()).is_some());

        // Exactly one WAL entry for the transaction, committed.
        let history = manager.wal().get_transaction_history(txn.id());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].txn_state, TransactionState::Committed);
        assert_eq!(history[0].operations.len(), 2);
    }

    #[test]
    fn test_rollback_discards_buffer() {
        let manager = make_manager();
        let mut txn = manager.begin(TxnOptions::default()).unwrap();
        txn.record(write_op("node-x")).unwrap();
        manager.rollback(&mut txn).unwrap();

        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(manager.engine().get_node(&"node-x".into()).is_none());
        assert!(manager.wal().get_transaction_history(txn.id()).is_empty());
        // Recording after abort fails.
        assert!(matches!(
            txn.record(write_op("node-y")),
            Err(Error::TransactionAborted(_))
        ));
    }

    #[test]
    fn test_serializable_captures_snapshot() {
        let manager = make_manager();
        manager
            .engine()
            .create_node(vec!["Keep".into()], PropertyMap::new());
        let txn = manager
            .begin(TxnOptions {
                isolation: Some(IsolationLevel::Serializable),
                ..Default::default()
            })
            .unwrap();
        assert!(txn.snapshot_cid().is_some());
    }

    #[test]
    fn test_snapshot_rollback_restores_state() {
        let manager = make_manager();
        let keep = manager
            .engine()
            .create_node(vec!["Keep".into()], PropertyMap::new());

        let mut txn = manager
            .begin(TxnOptions {
                snapshot: true,
                ..Default::default()
            })
            .unwrap();
        // Out-of-band mutation after the snapshot; rollback rewinds it.
        manager.engine().delete_node(&keep.id);
        assert!(manager.engine().get_node(&keep.id).is_none());

        manager.rollback(&mut txn).unwrap();
        assert!(manager.engine().get_node(&keep.id).is_some());
    }

    #[test]
    fn test_timeout_aborts_commit() {
        let manager = make_manager();
        let mut txn = manager
            .begin(TxnOptions {
                timeout: Some(Duration::from_millis(1)),
                ..Default::default()
            })
            .unwrap();
        txn.record(write_op("node-late")).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let err = manager.commit(&mut txn).unwrap_err();
        assert!(matches!(err, Error::TransactionTimeout(_)));
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(manager.engine().get_node(&"node-late".into()).is_none());
    }

    #[test]
    fn test_wal_failure_aborts_without_applying() {
        /// Store that accepts reads but refuses writes.
        struct FailingStore;
        impl BlockStore for FailingStore {
            fn put(&self, _: &[u8], _: Codec, _: bool) -> crate::Result<Cid> {
                Err(Error::Storage("disk full".to_owned()))
            }
            fn get(&self, cid: &Cid) -> crate::Result<Vec<u8>> {
                Err(Error::Storage(format!("block not found: {cid}")))
            }
            fn unpin(&self, _: &Cid) -> crate::Result<()> {
                Ok(())
            }
            fn backend_name(&self) -> &'static str {
                "failing"
            }
            fn probe(&self) -> crate::Result<BackendInfo> {
                Err(Error::IpldStorage("failing".to_owned()))
            }
        }

        let engine = Arc::new(GraphEngine::new());
        let wal = Arc::new(WriteAheadLog::new(Arc::new(FailingStore)));
        let manager = TransactionManager::new(engine, wal);

        let mut txn = manager.begin(TxnOptions::default()).unwrap();
        txn.record(write_op("node-doomed")).unwrap();
        let err = manager.commit(&mut txn).unwrap_err();
        assert!(matches!(err, Error::Transaction(_)));
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(manager.engine().get_node(&"node-doomed".into()).is_none());
    }

    #[test]
    fn test_crash_recovery_replays_committed_only() {
        let store: Arc<dyn BlockStore> = Arc::new(EmbeddedStore::new());
        let engine = Arc::new(GraphEngine::with_storage(Arc::clone(&store), 64, true));
        let wal = Arc::new(WriteAheadLog::new(Arc::clone(&store)));
        let manager = TransactionManager::new(engine, Arc::clone(&wal));

        let mut committed = manager.begin(TxnOptions::default()).unwrap();
        committed.record(write_op("node-durable")).unwrap();
        manager.commit(&mut committed).unwrap();

        let mut aborted = manager.begin(TxnOptions::default()).unwrap();
        aborted.record(write_op("node-ghost")).unwrap();
        manager.rollback(&mut aborted).unwrap();

        // "Crash": fresh engine over the same store, replay the WAL.
        let reborn = GraphEngine::with_storage(store, 64, true);
        let replayed = reborn.recover_from_wal(&wal).unwrap();
        assert_eq!(replayed, 1);
        assert!(reborn.get_node(&"node-durable".into()).is_some());
        assert!(reborn.get_node(&"node-ghost".into()).is_none());
        assert_eq!(
            reborn.get_node(&"node-durable".into()).unwrap().get("v"),
            Some(&Value::from(1))
        );
    }
}
