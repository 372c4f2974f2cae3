//! DUMP / RESTORE payloads.
//!
//! Layout: 20-byte SHA-1 of the body, then the body: a one-byte type tag
//! followed by length-prefixed (u32 little endian) byte strings. Not
//! compatible with real RDB payloads.

use std::collections::{HashMap, HashSet, VecDeque};

use sha1::{Digest, Sha1};

use crate::error::{CommandError, RESTORE_INVALID_CHECKSUM};
use crate::hyperloglog::HyperLogLog;
use crate::storage::Value;
use crate::zset::SortedSet;

const TAG_STRING: u8 = 0;
const TAG_LIST: u8 = 1;
const TAG_HASH: u8 = 2;
const TAG_SET: u8 = 3;
const TAG_ZSET: u8 = 4;
const TAG_HLL: u8 = 5;

const CHECKSUM_LEN: usize = 20;

pub fn encode(value: &Value) -> Vec<u8> {
    let mut body = Vec::new();
    match value {
        Value::String(s) => {
            body.push(TAG_STRING);
            write_bytes(&mut body, s);
        }
        Value::List(list) => {
            body.push(TAG_LIST);
            write_len(&mut body, list.len());
            for item in list {
                write_bytes(&mut body, item);
            }
        }
        Value::Hash(hash) => {
            body.push(TAG_HASH);
            write_len(&mut body, hash.len());
            for (field, val) in hash {
                write_bytes(&mut body, field);
                write_bytes(&mut body, val);
            }
        }
        Value::Set(set) => {
            body.push(TAG_SET);
            write_len(&mut body, set.len());
            for member in set {
                write_bytes(&mut body, member);
            }
        }
        Value::ZSet(zset) => {
            body.push(TAG_ZSET);
            write_len(&mut body, zset.len());
            for (member, score) in zset.iter() {
                write_bytes(&mut body, member);
                body.extend_from_slice(&score.to_le_bytes());
            }
        }
        Value::HyperLogLog(hll) => {
            body.push(TAG_HLL);
            write_bytes(&mut body, hll.registers());
        }
    }

    let mut out = Sha1::digest(&body).to_vec();
    out.extend_from_slice(&body);
    out
}

/// Verifies the checksum and rebuilds the value.
pub fn decode(payload: &[u8]) -> Result<Value, CommandError> {
    if payload.len() < CHECKSUM_LEN {
        return Err(CommandError::rejected(RESTORE_INVALID_CHECKSUM));
    }
    let (checksum, body) = payload.split_at(CHECKSUM_LEN);
    if Sha1::digest(body).as_slice() != checksum {
        return Err(CommandError::rejected(RESTORE_INVALID_CHECKSUM));
    }
    let mut reader = Reader { buf: body };
    let value = reader.value().ok_or_else(bad_format)?;
    if !reader.buf.is_empty() {
        return Err(bad_format());
    }
    Ok(value)
}

fn bad_format() -> CommandError {
    CommandError::rejected("ERR Bad data format")
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u32).to_le_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_len(out, bytes.len());
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        if self.buf.len() < n {
            return None;
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Some(head)
    }

    fn len(&mut self) -> Option<usize> {
        let raw: [u8; 4] = self.take(4)?.try_into().ok()?;
        Some(u32::from_le_bytes(raw) as usize)
    }

    fn bytes(&mut self) -> Option<Vec<u8>> {
        let n = self.len()?;
        self.take(n).map(<[u8]>::to_vec)
    }

    fn float(&mut self) -> Option<f64> {
        let raw: [u8; 8] = self.take(8)?.try_into().ok()?;
        Some(f64::from_le_bytes(raw))
    }

    fn value(&mut self) -> Option<Value> {
        let tag = *self.take(1)?.first()?;
        let value = match tag {
            TAG_STRING => Value::String(self.bytes()?),
            TAG_LIST => {
                let n = self.len()?;
                let mut list = VecDeque::new();
                for _ in 0..n {
                    list.push_back(self.bytes()?);
                }
                Value::List(list)
            }
            TAG_HASH => {
                let n = self.len()?;
                let mut hash = HashMap::new();
                for _ in 0..n {
                    let field = self.bytes()?;
                    hash.insert(field, self.bytes()?);
                }
                Value::Hash(hash)
            }
            TAG_SET => {
                let n = self.len()?;
                let mut set = HashSet::new();
                for _ in 0..n {
                    set.insert(self.bytes()?);
                }
                Value::Set(set)
            }
            TAG_ZSET => {
                let n = self.len()?;
                let mut zset = SortedSet::new();
                for _ in 0..n {
                    let member = self.bytes()?;
                    let score = self.float()?;
                    if score.is_nan() {
                        return None;
                    }
                    zset.insert(member, score);
                }
                Value::ZSet(zset)
            }
            TAG_HLL => Value::HyperLogLog(HyperLogLog::from_registers(self.bytes()?)?),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zset_survives_round_trip() {
        let mut zset = SortedSet::new();
        zset.insert(b"a".to_vec(), 1.5);
        zset.insert(b"b".to_vec(), f64::NEG_INFINITY);
        let value = Value::ZSet(zset);
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut payload = encode(&Value::String(b"hello".to_vec()));
        let last = payload.len() - 1;
        payload[last] ^= 0xff;
        assert_eq!(
            decode(&payload).unwrap_err().to_string(),
            RESTORE_INVALID_CHECKSUM
        );
        assert!(decode(b"short").is_err());
    }

    #[test]
    fn truncated_body_is_bad_format() {
        let body = vec![TAG_LIST, 5, 0, 0, 0];
        let mut payload = Sha1::digest(&body).to_vec();
        payload.extend_from_slice(&body);
        assert_eq!(decode(&payload).unwrap_err().to_string(), "ERR Bad data format");
    }
}
