//! In-process content-addressed block store.
//!
//! The reference implementation of [`BlockStore`]: a hash table from CID to
//! bytes behind an `RwLock`. Used by `ipfs+embedded://` drivers and by every
//! test that does not need a live daemon.

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::{derive_cid, BackendInfo, BlockStore, Cid, Codec};
use crate::{Error, Result};

struct Block {
    bytes: Vec<u8>,
    pinned: bool,
}

/// In-memory content-addressed storage.
#[derive(Default)]
pub struct EmbeddedStore {
    blocks: RwLock<HashMap<Cid, Block>>,
}

impl EmbeddedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_count(&self) -> u64 {
        self.blocks.read().len() as u64
    }

    pub fn is_pinned(&self, cid: &Cid) -> bool {
        self.blocks.read().get(cid).map(|b| b.pinned).unwrap_or(false)
    }
}

impl BlockStore for EmbeddedStore {
    fn put(&self, bytes: &[u8], codec: Codec, pin: bool) -> Result<Cid> {
        let cid = derive_cid(bytes, codec);
        let mut blocks = self.blocks.write();
        match blocks.get_mut(&cid) {
            Some(existing) => {
                // Idempotent re-put; a pin request upgrades the block.
                existing.pinned |= pin;
            }
            None => {
                blocks.insert(
                    cid.clone(),
                    Block {
                        bytes: bytes.to_vec(),
                        pinned: pin,
                    },
                );
                debug!(cid = %cid, codec = codec.name(), size = bytes.len(), "stored block");
            }
        }
        Ok(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        self.blocks
            .read()
            .get(cid)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| Error::Storage(format!("block not found: {cid}")))
    }

    fn unpin(&self, cid: &Cid) -> Result<()> {
        if let Some(block) = self.blocks.write().get_mut(cid) {
            block.pinned = false;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "embedded"
    }

    fn probe(&self) -> Result<BackendInfo> {
        Ok(BackendInfo {
            backend: "embedded".to_owned(),
            endpoint: None,
            version: Some(env!("CARGO_PKG_VERSION").to_owned()),
            block_count: Some(self.block_count()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_put_get_round_trip() {
        let store = EmbeddedStore::new();
        let cid = store.put(b"payload", Codec::Raw, false).unwrap();
        assert_eq!(store.get(&cid).unwrap(), b"payload");
    }

    #[test]
    fn test_put_idempotent() {
        let store = EmbeddedStore::new();
        let a = store.put(b"same", Codec::DagJson, false).unwrap();
        let b = store.put(b"same", Codec::DagJson, true).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.block_count(), 1);
        assert!(store.is_pinned(&a));
    }

    #[test]
    fn test_get_missing_is_storage_error() {
        let store = EmbeddedStore::new();
        let err = store.get(&Cid::from("bafy0000")).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_unpin_absent_is_ok() {
        let store = EmbeddedStore::new();
        store.unpin(&Cid::from("bafy0000")).unwrap();

        let cid = store.put(b"x", Codec::Raw, true).unwrap();
        store.unpin(&cid).unwrap();
        assert!(!store.is_pinned(&cid));
        // Unpinning twice is still fine.
        store.unpin(&cid).unwrap();
    }

    #[test]
    fn test_get_json_errors() {
        let store = EmbeddedStore::new();
        let cid = store.put(b"{not json", Codec::DagJson, false).unwrap();
        assert!(matches!(store.get_json(&cid), Err(Error::Deserialization(_))));
        assert!(matches!(
            store.get_json(&Cid::from("bafymissing")),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_put_json_key_order_is_canonical() {
        let store = EmbeddedStore::new();
        let a: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(
            store.put_json(&a, false).unwrap(),
            store.put_json(&b, false).unwrap()
        );
    }

    proptest! {
        #[test]
        fn prop_content_addressing(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let store = EmbeddedStore::new();
            let a = store.put(&bytes, Codec::Raw, false).unwrap();
            let b = store.put(&bytes, Codec::Raw, false).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(store.get(&a).unwrap(), bytes);
        }
    }
}
