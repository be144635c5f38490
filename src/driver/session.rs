//! Sessions and explicit transactions.
//!
//! A session is caller-owned and used by one caller at a time; different
//! sessions on the same driver are independent. `run` is auto-commit; an
//! explicit [`SessionTransaction`] is a scoped resource whose drop rolls
//! back anything uncommitted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::execution::{run_pipeline_with_deadline, QueryResult};
use crate::model::PropertyMap;
use crate::tx::{Transaction, TransactionManager, TxnOptions};
use crate::{Error, Result};

use super::bookmarks::{Bookmark, Bookmarks};

/// Per-session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Database name; the driver default when absent.
    pub database: Option<String>,
    /// Initial causal tokens from earlier sessions.
    pub bookmarks: Vec<String>,
    /// Per-transaction timeout.
    pub timeout: Option<Duration>,
    /// Per-query cooperative deadline.
    pub query_timeout: Option<Duration>,
}

pub(super) struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

/// A session over one database, with bookmark tracking and retryable
/// transaction helpers.
pub struct Session {
    manager: Arc<TransactionManager>,
    database: String,
    bookmarks: Bookmarks,
    timeout: Option<Duration>,
    query_timeout: Option<Duration>,
    retry: RetryPolicy,
    closed: bool,
}

impl Session {
    pub(super) fn new(
        manager: Arc<TransactionManager>,
        database: String,
        config: SessionConfig,
        retry: RetryPolicy,
    ) -> Self {
        // The engine is in-process: every committed transaction is already
        // visible, so any initial bookmark is satisfied on arrival rather
        // than downgraded.
        let bookmarks = Bookmarks::from_strings(&config.bookmarks);
        Self {
            manager,
            database,
            bookmarks,
            timeout: config.timeout,
            query_timeout: config.query_timeout,
            retry,
            closed: false,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Run a query in an auto-commit transaction. Pipeline failures ride in
    /// the result summary; commit failures, invalid parameters, and a closed
    /// session are errors.
    pub fn run(&mut self, query: &str, params: PropertyMap) -> Result<QueryResult> {
        self.ensure_open()?;
        validate_params(&params)?;

        let mut txn = self.manager.begin(self.txn_options())?;
        let deadline = self.query_timeout.map(|t| std::time::Instant::now() + t);
        let result = run_pipeline_with_deadline(
            self.manager.engine(),
            Some(&mut txn),
            query,
            &params,
            deadline,
        );

        if result.is_err() {
            // Buffered writes of a failed query are discarded.
            if txn.has_writes() {
                if let Err(e) = self.manager.rollback(&mut txn) {
                    warn!(error = %e, "rollback after failed query");
                }
            }
            return Ok(result);
        }

        if txn.has_writes() {
            let txn_id = self.manager.commit(&mut txn)?;
            self.note_commit(&txn_id);
        }
        Ok(result)
    }

    /// Begin an explicit transaction. The handle is a scoped resource:
    /// dropping it without `commit` rolls back.
    pub fn begin_transaction(&mut self) -> Result<SessionTransaction<'_>> {
        self.ensure_open()?;
        let options = self.txn_options();
        let txn = self.manager.begin(options)?;
        debug!(txn_id = txn.id(), "explicit transaction started");
        Ok(SessionTransaction {
            session: self,
            txn: Some(txn),
        })
    }

    /// Run `work` in a transaction, retrying on retryable errors with
    /// exponential backoff. Read flavor of [`Session::write_transaction`].
    pub fn read_transaction<T>(
        &mut self,
        work: impl FnMut(&mut SessionTransaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.transaction_with_retry(work)
    }

    /// Run `work` in a transaction with retry; commits when `work` succeeds.
    pub fn write_transaction<T>(
        &mut self,
        work: impl FnMut(&mut SessionTransaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.transaction_with_retry(work)
    }

    fn transaction_with_retry<T>(
        &mut self,
        mut work: impl FnMut(&mut SessionTransaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.ensure_open()?;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut handle = self.begin_transaction()?;
            let outcome = work(&mut handle);

            let error = match outcome {
                Ok(value) => match handle.commit() {
                    Ok(_) => return Ok(value),
                    Err(e) => e,
                },
                Err(e) => {
                    let _ = handle.rollback();
                    e
                }
            };

            if attempt >= max_attempts || !error.is_retryable() {
                return Err(error);
            }
            debug!(attempt, error = %error, "retrying transaction");
            std::thread::sleep(backoff);
            backoff = backoff.saturating_mul(2);
        }
    }

    /// The most recent bookmark for this session's database.
    pub fn last_bookmark(&self) -> Option<String> {
        self.bookmarks
            .get_latest_by_database(&self.database)
            .map(Bookmark::to_string)
    }

    /// All bookmarks observed or produced by this session.
    pub fn last_bookmarks(&self) -> Vec<String> {
        self.bookmarks.get_all()
    }

    /// Close the session. Idempotent; later operations fail with
    /// [`Error::SessionClosed`].
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn txn_options(&self) -> TxnOptions {
        TxnOptions {
            isolation: None,
            timeout: self.timeout,
            snapshot: false,
        }
    }

    fn note_commit(&mut self, txn_id: &str) {
        let bookmark = Bookmark::new(txn_id, self.database.clone());
        debug!(bookmark = %bookmark, "commit bookmarked");
        self.bookmarks.add(bookmark);
    }
}

/// An explicit transaction scoped to a session borrow. Uncommitted
/// transactions roll back on drop, which also covers session close.
pub struct SessionTransaction<'s> {
    session: &'s mut Session,
    txn: Option<Transaction>,
}

impl SessionTransaction<'_> {
    pub fn id(&self) -> &str {
        self.txn.as_ref().map(Transaction::id).unwrap_or("")
    }

    /// Run a query inside this transaction. Writes buffer on the
    /// transaction until commit.
    pub fn run(&mut self, query: &str, params: PropertyMap) -> Result<QueryResult> {
        validate_params(&params)?;
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| Error::TransactionAborted("transaction already finished".into()))?;
        let deadline = self
            .session
            .query_timeout
            .map(|t| std::time::Instant::now() + t);
        Ok(run_pipeline_with_deadline(
            self.session.manager.engine(),
            Some(txn),
            query,
            &params,
            deadline,
        ))
    }

    /// Commit and return the bookmark string for the transaction.
    pub fn commit(mut self) -> Result<String> {
        let mut txn = self
            .txn
            .take()
            .ok_or_else(|| Error::TransactionAborted("transaction already finished".into()))?;
        let txn_id = self.session.manager.commit(&mut txn)?;
        self.session.note_commit(&txn_id);
        Ok(Bookmark::new(txn_id, self.session.database.clone()).to_string())
    }

    /// Roll the transaction back explicitly.
    pub fn rollback(mut self) -> Result<()> {
        match self.txn.take() {
            Some(mut txn) => self.session.manager.rollback(&mut txn),
            None => Ok(()),
        }
    }
}

impl Drop for SessionTransaction<'_> {
    fn drop(&mut self) {
        if let Some(mut txn) = self.txn.take() {
            if txn.is_pending() {
                if let Err(e) = self.session.manager.rollback(&mut txn) {
                    warn!(txn_id = txn.id(), error = %e, "rollback on drop failed");
                }
            }
        }
    }
}

/// Reserved parameter names begin with `_`.
fn validate_params(params: &PropertyMap) -> Result<()> {
    for name in params.keys() {
        if name.starts_with('_') {
            return Err(Error::Validation(format!(
                "parameter names beginning with '_' are reserved: ${name}"
            )));
        }
    }
    Ok(())
}
