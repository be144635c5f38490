//! External IPFS daemon backend (feature `daemon`).
//!
//! Talks to a Kubo-compatible daemon over its HTTP API. The daemon computes
//! CIDs itself; this backend forwards its answers instead of deriving hashes
//! locally.

use serde::Deserialize;
use tracing::debug;

use super::{BackendInfo, BlockStore, Cid, Codec};
use crate::{Error, Result};

/// Block store backed by an IPFS daemon at `host:port`.
pub struct DaemonStore {
    endpoint: String,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct BlockPutResponse {
    #[serde(rename = "Key")]
    key: String,
}

#[derive(Deserialize)]
struct VersionResponse {
    #[serde(rename = "Version")]
    version: String,
}

impl DaemonStore {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        if !endpoint.contains(':') {
            return Err(Error::Validation(format!(
                "daemon endpoint '{endpoint}' is not host:port"
            )));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self { endpoint, client })
    }

    fn api(&self, path: &str) -> String {
        format!("http://{}/api/v0/{path}", self.endpoint)
    }
}

impl BlockStore for DaemonStore {
    fn put(&self, bytes: &[u8], codec: Codec, pin: bool) -> Result<Cid> {
        let form = reqwest::blocking::multipart::Form::new().part(
            "data",
            reqwest::blocking::multipart::Part::bytes(bytes.to_vec()).file_name("block"),
        );
        let response = self
            .client
            .post(self.api(&format!(
                "block/put?cid-codec={}&pin={}",
                codec.name(),
                pin
            )))
            .multipart(form)
            .send()
            .map_err(|e| Error::Storage(format!("block/put failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Storage(format!("block/put failed: {e}")))?;
        let parsed: BlockPutResponse = response
            .json()
            .map_err(|e| Error::Storage(format!("block/put response: {e}")))?;
        debug!(cid = %parsed.key, size = bytes.len(), "stored block in daemon");
        Ok(Cid(parsed.key))
    }

    fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.api(&format!("block/get?arg={cid}")))
            .send()
            .map_err(|e| Error::Storage(format!("block/get failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Storage(format!("block/get {cid} failed: {e}")))?;
        let bytes = response
            .bytes()
            .map_err(|e| Error::Storage(format!("block/get body: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn unpin(&self, cid: &Cid) -> Result<()> {
        // Absence of the pin is not an error.
        let _ = self
            .client
            .post(self.api(&format!("pin/rm?arg={cid}")))
            .send()
            .map_err(|e| Error::Storage(format!("pin/rm failed: {e}")))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "ipfs-daemon"
    }

    fn probe(&self) -> Result<BackendInfo> {
        let response = self
            .client
            .post(self.api("version"))
            .send()
            .map_err(|e| Error::IpldStorage(format!("daemon unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| Error::IpldStorage(format!("daemon version probe: {e}")))?;
        let parsed: VersionResponse = response
            .json()
            .map_err(|e| Error::IpldStorage(format!("daemon version response: {e}")))?;
        Ok(BackendInfo {
            backend: "ipfs-daemon".to_owned(),
            endpoint: Some(self.endpoint.clone()),
            version: Some(parsed.version),
            block_count: None,
        })
    }
}
