//! Engine configuration.
//!
//! One strict key set, deserialized with serde. Unknown keys are rejected —
//! a typoed option should fail loudly instead of silently using a default.

use serde::{Deserialize, Serialize};

use crate::tx::IsolationLevel;
use crate::{Error, Result};

/// Which block store backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process content-addressed store.
    Embedded,
    /// External IPFS daemon (feature `daemon`).
    Ipfs,
}

/// Full configuration surface. Every field has a default; a config built
/// from `{}` is the embedded single-process setup used in tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    pub backend: BackendKind,
    /// `host:port` of the IPFS daemon API. Required when `backend = ipfs`.
    pub endpoint: Option<String>,
    pub database: String,
    /// Pin blocks written by engine persistence.
    pub default_pin: bool,
    pub wal_compaction_threshold: u64,
    pub cache_capacity: usize,
    pub retry_max_attempts: u32,
    pub retry_initial_backoff_ms: u64,
    pub isolation_default: IsolationLevel,
    /// Capture a rollback snapshot at every `begin`, not only for
    /// SERIALIZABLE transactions.
    pub snapshot_on_begin: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Embedded,
            endpoint: None,
            database: "default".to_owned(),
            default_pin: true,
            wal_compaction_threshold: 100,
            cache_capacity: 1024,
            retry_max_attempts: 3,
            retry_initial_backoff_ms: 50,
            isolation_default: IsolationLevel::ReadCommitted,
            snapshot_on_begin: false,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a JSON document. Unknown keys and type
    /// mismatches are configuration errors.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Ipfs {
            match &self.endpoint {
                Some(ep) if ep.contains(':') => {}
                Some(ep) => {
                    return Err(Error::Config(format!(
                        "endpoint '{ep}' is not host:port"
                    )))
                }
                None => {
                    return Err(Error::Config(
                        "backend 'ipfs' requires an endpoint".to_owned(),
                    ))
                }
            }
        }
        if self.cache_capacity == 0 {
            return Err(Error::Config("cache_capacity must be positive".to_owned()));
        }
        if self.retry_max_attempts == 0 {
            return Err(Error::Config(
                "retry_max_attempts must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config.backend, BackendKind::Embedded);
        assert_eq!(config.database, "default");
        assert!(config.default_pin);
        assert_eq!(config.wal_compaction_threshold, 100);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = EngineConfig::from_json_str(r#"{"cache_capcity": 10}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_ipfs_backend_requires_endpoint() {
        let err = EngineConfig::from_json_str(r#"{"backend": "ipfs"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let ok = EngineConfig::from_json_str(
            r#"{"backend": "ipfs", "endpoint": "localhost:5001"}"#,
        )
        .unwrap();
        assert_eq!(ok.endpoint.as_deref(), Some("localhost:5001"));
    }

    #[test]
    fn test_isolation_parsing() {
        let config = EngineConfig::from_json_str(
            r#"{"isolation_default": "SERIALIZABLE", "snapshot_on_begin": true}"#,
        )
        .unwrap();
        assert_eq!(config.isolation_default, IsolationLevel::Serializable);
        assert!(config.snapshot_on_begin);
    }
}
