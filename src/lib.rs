//! # cidgraph — Content-Addressed Property Graph Database
//!
//! A property graph database that persists nodes, relationships, and whole
//! graph snapshots as immutable IPLD blocks (addressed by CIDs) while
//! exposing a Neo4j-shaped driver/session/transaction surface and a Cypher
//! query pipeline.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: [`BlockStore`] is the contract between the graph
//!    engine and any content-addressed store
//! 2. **Clean DTOs**: [`Node`], [`Relationship`], [`Value`] cross all
//!    boundaries
//! 3. **Parser owns nothing**: Cypher → AST → IR is a pure function chain
//! 4. **WAL is the durability source**: block persistence is write-behind;
//!    the hash-linked write-ahead log is what crash recovery replays
//!
//! ## Quick Start
//!
//! ```rust
//! use cidgraph::driver::{Driver, DriverConfig, SessionConfig};
//! use cidgraph::PropertyMap;
//!
//! # fn example() -> cidgraph::Result<()> {
//! let driver = Driver::new("ipfs+embedded://", DriverConfig::default())?;
//! let mut session = driver.session(SessionConfig::default());
//!
//! session.run("CREATE (n:Person {name: 'Alice', age: 30})", PropertyMap::new())?;
//! let result = session.run("MATCH (n:Person) RETURN n.name", PropertyMap::new())?;
//! for record in result.records() {
//!     println!("{:?}", record.get("n.name"));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Feature | URI | Description |
//! |---------|---------|-----|-------------|
//! | Embedded | (default) | `ipfs+embedded://` | In-process content-addressed store |
//! | Daemon | `daemon` | `ipfs://host:port` | External IPFS daemon over its HTTP API |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod config;
pub mod storage;
pub mod engine;
pub mod cypher;
pub mod execution;
pub mod wal;
pub mod tx;
pub mod driver;
pub mod migrate;
pub mod reasoning;

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{Direction, Node, NodeId, PropertyMap, RelId, Relationship, Value};
pub use storage::{BlockStore, Cid, Codec, EmbeddedStore};
pub use engine::GraphEngine;
pub use execution::{QueryResult, Record, Summary};
pub use wal::{Operation, OperationType, TransactionState, WalEntry, WriteAheadLog};
pub use tx::{IsolationLevel, Transaction, TransactionManager};
pub use driver::{Bookmark, Bookmarks, Driver, Session};
pub use config::EngineConfig;

// ============================================================================
// Error Types
// ============================================================================

/// Stage of the query pipeline a failure was observed in. Carried by the
/// result [`Summary`] so callers can observe errors through the standard
/// channel instead of an exception path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Compile,
    Execute,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Parse => write!(f, "parse"),
            Stage::Compile => write!(f, "compile"),
            Stage::Execute => write!(f, "execute"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backend I/O failure or connection refused. Retryable.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Connectivity check failed or unexpected backend error.
    #[error("IPLD storage error: {0}")]
    IpldStorage(String),

    /// A value could not be persisted.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Corrupt bytes or invalid JSON on retrieval.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Node or relationship id not present when the operation requires it.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Cypher syntax error.
    #[error("Cypher syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    /// IR execution failure.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Query deadline exceeded.
    #[error("Query timeout: {0}")]
    QueryTimeout(String),

    /// Generic transaction failure: commit apply failed, snapshot capture
    /// failed. The transaction ends ABORTED.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Two transactions violated the declared isolation level. Retryable.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// Explicit or cascaded abort. Not retryable.
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// Transaction timeout expired. Retryable.
    #[error("Transaction timeout: {0}")]
    TransactionTimeout(String),

    /// Invalid or unknown configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input (reserved parameter names, bad URIs).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A feature-gated dependency is not compiled in.
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// The session has been closed.
    #[error("Session is closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors the driver retry loops are allowed to re-attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::TransactionConflict(_) | Error::TransactionTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
