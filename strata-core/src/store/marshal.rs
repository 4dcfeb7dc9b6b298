//! Hand-rolled codec for [`StoreData`](crate::pb::StoreData) blobs.
//!
//! Output is wire-compatible with the prost encoding of `StoreData`: map
//! entries are emitted in sorted key order (so snapshots are deterministic)
//! and default-valued entry fields are omitted, as prost does.

use crate::error::{Result, StrataError};
use std::collections::HashMap;

const TAG_KV: u8 = (1 << 3) | 2;
const TAG_DELETE_PREFIXES: u8 = (2 << 3) | 2;
const TAG_ENTRY_KEY: u8 = (1 << 3) | 2;
const TAG_ENTRY_VALUE: u8 = (2 << 3) | 2;

/// Decoded store blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// Key/value pairs.
    pub kv: HashMap<String, Vec<u8>>,
    /// Prefixes deleted during the segment (partial files only).
    pub delete_prefixes: Vec<String>,
    /// Sum of key and value lengths.
    pub size: u64,
}

/// Encode a snapshot.
pub fn marshal(kv: &HashMap<String, Vec<u8>>, delete_prefixes: &[String]) -> Vec<u8> {
    let mut keys: Vec<&String> = kv.keys().collect();
    keys.sort();

    let mut out = Vec::with_capacity(estimate(kv, delete_prefixes));
    for key in keys {
        let value = &kv[key];
        let entry_len = field_len(key.len()) + field_len(value.len());
        out.push(TAG_KV);
        put_varint(&mut out, entry_len as u64);
        if !key.is_empty() {
            out.push(TAG_ENTRY_KEY);
            put_varint(&mut out, key.len() as u64);
            out.extend_from_slice(key.as_bytes());
        }
        if !value.is_empty() {
            out.push(TAG_ENTRY_VALUE);
            put_varint(&mut out, value.len() as u64);
            out.extend_from_slice(value);
        }
    }
    for prefix in delete_prefixes {
        out.push(TAG_DELETE_PREFIXES);
        put_varint(&mut out, prefix.len() as u64);
        out.extend_from_slice(prefix.as_bytes());
    }
    out
}

/// Decode a snapshot.
pub fn unmarshal(data: &[u8]) -> Result<StoreSnapshot> {
    let mut reader = Reader { data, pos: 0 };
    let mut snapshot = StoreSnapshot::default();

    while !reader.is_done() {
        let (field, wire) = reader.tag()?;
        match (field, wire) {
            (1, 2) => {
                let entry = reader.bytes()?;
                let (key, value) = decode_entry(entry)?;
                snapshot.size += (key.len() + value.len()) as u64;
                if let Some(prev) = snapshot.kv.insert(key, value) {
                    snapshot.size -= prev.len() as u64;
                }
            }
            (2, 2) => {
                let raw = reader.bytes()?;
                snapshot.delete_prefixes.push(utf8(raw)?);
            }
            _ => reader.skip(wire)?,
        }
    }
    Ok(snapshot)
}

fn decode_entry(data: &[u8]) -> Result<(String, Vec<u8>)> {
    let mut reader = Reader { data, pos: 0 };
    let mut key = String::new();
    let mut value = Vec::new();
    while !reader.is_done() {
        let (field, wire) = reader.tag()?;
        match (field, wire) {
            (1, 2) => key = utf8(reader.bytes()?)?,
            (2, 2) => value = reader.bytes()?.to_vec(),
            _ => reader.skip(wire)?,
        }
    }
    Ok((key, value))
}

fn utf8(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|e| StrataError::Serialization(format!("invalid UTF-8 string: {e}")))
}

fn field_len(len: usize) -> usize {
    if len == 0 {
        0
    } else {
        1 + varint_len(len as u64) + len
    }
}

fn estimate(kv: &HashMap<String, Vec<u8>>, delete_prefixes: &[String]) -> usize {
    let kv_bytes: usize = kv.iter().map(|(k, v)| k.len() + v.len() + 12).sum();
    let prefix_bytes: usize = delete_prefixes.iter().map(|p| p.len() + 6).sum();
    kv_bytes + prefix_bytes
}

fn varint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

fn put_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn is_done(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn varint(&mut self) -> Result<u64> {
        let mut result = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| truncated("varint"))?;
            self.pos += 1;
            result |= u64::from(byte & 0x7F) << shift;
            if byte < 0x80 {
                return Ok(result);
            }
        }
        Err(StrataError::Serialization("varint overflow".to_string()))
    }

    fn tag(&mut self) -> Result<(u64, u8)> {
        let key = self.varint()?;
        Ok((key >> 3, (key & 0x7) as u8))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| truncated("length-delimited field"))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.varint()? as usize;
        self.take(len)
    }

    fn skip(&mut self, wire: u8) -> Result<()> {
        match wire {
            0 => self.varint().map(|_| ()),
            1 => self.take(8).map(|_| ()),
            2 => self.bytes().map(|_| ()),
            5 => self.take(4).map(|_| ()),
            other => Err(StrataError::Serialization(format!(
                "unsupported wire type {other}"
            ))),
        }
    }
}

fn truncated(what: &str) -> StrataError {
    StrataError::Serialization(format!("truncated {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pb::StoreData;
    use prost::Message;

    fn sample() -> (HashMap<String, Vec<u8>>, Vec<String>) {
        let mut kv = HashMap::new();
        kv.insert("pool:0xabc".to_string(), b"1000".to_vec());
        kv.insert("a".to_string(), vec![0u8; 300]);
        kv.insert("empty".to_string(), Vec::new());
        (kv, vec!["token:".to_string(), String::new()])
    }

    #[test]
    fn hand_encoding_decodes_with_prost() {
        let (kv, prefixes) = sample();
        let bytes = marshal(&kv, &prefixes);
        let decoded = StoreData::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.kv, kv);
        assert_eq!(decoded.delete_prefixes, prefixes);
    }

    #[test]
    fn prost_encoding_decodes_by_hand() {
        let (kv, prefixes) = sample();
        let data = StoreData {
            kv: kv.clone(),
            delete_prefixes: prefixes.clone(),
        };
        let snapshot = unmarshal(&data.encode_to_vec()).unwrap();
        assert_eq!(snapshot.kv, kv);
        assert_eq!(snapshot.delete_prefixes, prefixes);
        assert_eq!(snapshot.size, (10 + 4) + (1 + 300) + 5);
    }

    #[test]
    fn single_entry_is_byte_identical_to_prost() {
        let mut kv = HashMap::new();
        kv.insert("k1".to_string(), b"v29".to_vec());
        let prefixes = vec!["p".to_string()];
        let data = StoreData {
            kv: kv.clone(),
            delete_prefixes: prefixes.clone(),
        };
        assert_eq!(marshal(&kv, &prefixes), data.encode_to_vec());
    }

    #[test]
    fn encoding_is_deterministic() {
        let (kv, prefixes) = sample();
        let rebuilt: HashMap<_, _> = kv.iter().collect::<Vec<_>>().into_iter().rev().map(|(k, v)| (k.clone(), v.clone())).collect();
        assert_eq!(marshal(&kv, &prefixes), marshal(&rebuilt, &prefixes));
    }

    #[test]
    fn empty_snapshot() {
        let bytes = marshal(&HashMap::new(), &[]);
        assert!(bytes.is_empty());
        assert_eq!(unmarshal(&bytes).unwrap(), StoreSnapshot::default());
    }

    #[test]
    fn truncated_input_is_an_error() {
        let (kv, prefixes) = sample();
        let bytes = marshal(&kv, &prefixes);
        assert!(unmarshal(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut bytes = vec![(7 << 3) as u8, 0x96, 0x01];
        bytes.extend(marshal(&HashMap::from([("k".to_string(), b"v".to_vec())]), &[]));
        let snapshot = unmarshal(&bytes).unwrap();
        assert_eq!(snapshot.kv.get("k").map(Vec::as_slice), Some(&b"v"[..]));
    }
}
