//! CARv1 (Content Addressable aRchive) encoding of a [`GraphData`] export.
//!
//! Layout: `varint(len) || header` followed by one or more
//! `varint(len) || CID || payload` sections. The header is a dag-cbor map
//! `{roots, version}`; the graph itself is a single dag-cbor block whose
//! CID is the declared root.

use cid::Cid as IpldCid;
use multihash::Multihash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::GraphData;
use crate::{Error, Result};

const DAG_CBOR_CODEC: u64 = 0x71;
const SHA2_256_CODE: u64 = 0x12;

#[derive(Serialize, Deserialize)]
struct CarHeader {
    roots: Vec<IpldCid>,
    version: u64,
}

pub fn encode(data: &GraphData) -> Result<Vec<u8>> {
    let block =
        serde_ipld_dagcbor::to_vec(data).map_err(|e| Error::Serialization(e.to_string()))?;
    let root = block_cid(&block)?;

    let header = serde_ipld_dagcbor::to_vec(&CarHeader {
        roots: vec![root],
        version: 1,
    })
    .map_err(|e| Error::Serialization(e.to_string()))?;

    let mut out = Vec::with_capacity(header.len() + block.len() + 64);
    write_varint(&mut out, header.len() as u64);
    out.extend_from_slice(&header);

    let cid_bytes = root.to_bytes();
    write_varint(&mut out, (cid_bytes.len() + block.len()) as u64);
    out.extend_from_slice(&cid_bytes);
    out.extend_from_slice(&block);
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<GraphData> {
    let mut cursor = 0usize;

    let header_len = read_varint(bytes, &mut cursor)? as usize;
    let header_end = cursor
        .checked_add(header_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| Error::Deserialization("CAR header is truncated".into()))?;
    let header: CarHeader = serde_ipld_dagcbor::from_slice(&bytes[cursor..header_end])
        .map_err(|e| Error::Deserialization(format!("CAR header: {e}")))?;
    cursor = header_end;

    if header.roots.is_empty() {
        return Err(Error::Deserialization(
            "CAR archive declares no roots".into(),
        ));
    }
    let root = header.roots[0];

    while cursor < bytes.len() {
        let section_len = read_varint(bytes, &mut cursor)? as usize;
        let section_end = cursor
            .checked_add(section_len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| Error::Deserialization("CAR section is truncated".into()))?;

        let mut reader = &bytes[cursor..section_end];
        let cid = IpldCid::read_bytes(&mut reader)
            .map_err(|e| Error::Deserialization(format!("CAR section CID: {e}")))?;
        if cid == root {
            return serde_ipld_dagcbor::from_slice(reader)
                .map_err(|e| Error::Deserialization(format!("CAR root block: {e}")));
        }
        cursor = section_end;
    }

    Err(Error::Deserialization(
        "CAR archive does not contain its root block".into(),
    ))
}

fn block_cid(block: &[u8]) -> Result<IpldCid> {
    let digest = Sha256::digest(block);
    let mh = Multihash::<64>::wrap(SHA2_256_CODE, &digest)
        .map_err(|e| Error::Serialization(format!("multihash: {e}")))?;
    Ok(IpldCid::new_v1(DAG_CBOR_CODEC, mh))
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(bytes: &[u8], cursor: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *bytes
            .get(*cursor)
            .ok_or_else(|| Error::Deserialization("CAR varint is truncated".into()))?;
        *cursor += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::Deserialization("CAR varint overflows u64".into()));
        }
    }
}
