//! # Driver
//!
//! The Neo4j-shaped entry point: construct a [`Driver`] from a URI, open
//! [`Session`]s against it, run Cypher. The driver owns the shared block
//! store, graph engine, WAL, and transaction manager; sessions hold shared
//! references and may run on parallel threads independently.
//!
//! ## URIs
//!
//! | URI | Backend |
//! |-----|---------|
//! | `ipfs+embedded://` | In-process [`EmbeddedStore`] |
//! | `ipfs://host:port` | External IPFS daemon (feature `daemon`) |

pub mod bookmarks;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{BackendKind, EngineConfig};
use crate::engine::GraphEngine;
use crate::storage::{BackendInfo, BlockStore, EmbeddedStore};
use crate::tx::{IsolationLevel, TransactionManager};
use crate::wal::WriteAheadLog;
use crate::{Error, Result};

pub use bookmarks::{Bookmark, Bookmarks};
pub use session::{Session, SessionConfig, SessionTransaction};

/// Basic-auth style credentials. The embedded backend ignores them; the
/// daemon backend forwards them when the daemon requires auth.
#[derive(Debug, Clone)]
pub struct Auth {
    pub user: String,
    pub token: String,
}

/// Driver-level configuration (everything a URI does not express).
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub database: String,
    pub auth: Option<Auth>,
    pub default_pin: bool,
    pub cache_capacity: usize,
    pub wal_compaction_threshold: u64,
    pub retry_max_attempts: u32,
    pub retry_initial_backoff_ms: u64,
    pub isolation_default: IsolationLevel,
    pub snapshot_on_begin: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            database: config.database,
            auth: None,
            default_pin: config.default_pin,
            cache_capacity: config.cache_capacity,
            wal_compaction_threshold: config.wal_compaction_threshold,
            retry_max_attempts: config.retry_max_attempts,
            retry_initial_backoff_ms: config.retry_initial_backoff_ms,
            isolation_default: config.isolation_default,
            snapshot_on_begin: config.snapshot_on_begin,
        }
    }
}

impl DriverConfig {
    pub fn with_auth(mut self, user: impl Into<String>, token: impl Into<String>) -> Self {
        self.auth = Some(Auth {
            user: user.into(),
            token: token.into(),
        });
        self
    }
}

/// URI-addressed driver over a content-addressed graph engine.
pub struct Driver {
    store: Arc<dyn BlockStore>,
    manager: Arc<TransactionManager>,
    database: String,
    auth: Option<Auth>,
    retry_max_attempts: u32,
    retry_initial_backoff_ms: u64,
}

impl Driver {
    /// Construct a driver for `uri`. An `ipfs://` URI without the `daemon`
    /// feature compiled in fails immediately with a clear dependency error.
    pub fn new(uri: &str, config: DriverConfig) -> Result<Self> {
        let store = open_store(uri)?;
        Ok(Self::with_store(store, config))
    }

    /// Build a driver from a parsed [`EngineConfig`].
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let uri = match config.backend {
            BackendKind::Embedded => "ipfs+embedded://".to_owned(),
            BackendKind::Ipfs => format!(
                "ipfs://{}",
                config.endpoint.as_deref().unwrap_or_default()
            ),
        };
        Self::new(
            &uri,
            DriverConfig {
                database: config.database.clone(),
                auth: None,
                default_pin: config.default_pin,
                cache_capacity: config.cache_capacity,
                wal_compaction_threshold: config.wal_compaction_threshold,
                retry_max_attempts: config.retry_max_attempts,
                retry_initial_backoff_ms: config.retry_initial_backoff_ms,
                isolation_default: config.isolation_default,
                snapshot_on_begin: config.snapshot_on_begin,
            },
        )
    }

    /// Assemble the engine/WAL/transaction-manager stack over a store.
    pub fn with_store(store: Arc<dyn BlockStore>, config: DriverConfig) -> Self {
        let engine = Arc::new(GraphEngine::with_storage(
            Arc::clone(&store),
            config.cache_capacity,
            config.default_pin,
        ));
        let wal = Arc::new(WriteAheadLog::with_compaction_threshold(
            Arc::clone(&store),
            config.wal_compaction_threshold,
        ));
        let manager = Arc::new(
            TransactionManager::new(engine, wal)
                .with_defaults(config.isolation_default, config.snapshot_on_begin),
        );
        info!(backend = store.backend_name(), database = %config.database, "driver ready");
        Self {
            store,
            manager,
            database: config.database,
            auth: config.auth,
            retry_max_attempts: config.retry_max_attempts,
            retry_initial_backoff_ms: config.retry_initial_backoff_ms,
        }
    }

    /// Probe the underlying backend and return a descriptive report.
    pub fn verify_connectivity(&self) -> Result<BackendInfo> {
        self.store.probe()
    }

    /// Open a session. Sessions are independent; a session itself is used
    /// by one caller at a time.
    pub fn session(&self, config: SessionConfig) -> Session {
        let database = config
            .database
            .clone()
            .unwrap_or_else(|| self.database.clone());
        Session::new(
            Arc::clone(&self.manager),
            database,
            config,
            session::RetryPolicy {
                max_attempts: self.retry_max_attempts,
                initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
            },
        )
    }

    /// Shared graph engine (advanced use: traversal APIs, migration).
    pub fn engine(&self) -> &Arc<GraphEngine> {
        self.manager.engine()
    }

    /// Shared WAL (advanced use: recovery, compaction, integrity checks).
    pub fn wal(&self) -> &Arc<WriteAheadLog> {
        self.manager.wal()
    }

    pub fn auth(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    /// Release the driver. Sessions already opened keep working; this exists
    /// for API parity with drop-based cleanup.
    pub fn close(self) {}
}

fn open_store(uri: &str) -> Result<Arc<dyn BlockStore>> {
    if let Some(_rest) = uri.strip_prefix("ipfs+embedded://") {
        return Ok(Arc::new(EmbeddedStore::new()));
    }
    if let Some(endpoint) = uri.strip_prefix("ipfs://") {
        if endpoint.is_empty() {
            return Err(Error::Validation(
                "ipfs:// URI requires host:port".to_owned(),
            ));
        }
        #[cfg(feature = "daemon")]
        {
            return Ok(Arc::new(crate::storage::DaemonStore::new(endpoint)?));
        }
        #[cfg(not(feature = "daemon"))]
        {
            return Err(Error::MissingDependency(format!(
                "connecting to ipfs://{endpoint} requires the 'daemon' feature"
            )));
        }
    }
    Err(Error::Validation(format!(
        "unsupported URI '{uri}' (expected ipfs:// or ipfs+embedded://)"
    )))
}
