// SPDX-License-Identifier: Apache-2.0

//! On-disk seek journal record.
//!
//! A record is one JSON object per line: `{"seek":<offset>,"last_hash":"<hex>"}`.
//! Encoding and decoding are written out by hand against `serde_json::Value`
//! so the format does not follow the layout of any in-memory struct. An
//! optional `"version"` field is accepted on read.

use serde_json::{Map, Value};
use sha1::{Digest, Sha1};

use crate::logfile::error::{Error, Result};

/// Highest record version this build understands
pub const JOURNAL_FORMAT_VERSION: u64 = 1;

const SEEK_KEY: &str = "seek";
const LAST_HASH_KEY: &str = "last_hash";
const VERSION_KEY: &str = "version";

/// Durable resume point for one tailed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekJournalRecord {
    /// Byte offset of the next unread byte
    pub offset: u64,
    /// Hash of the line that ends at `offset`
    pub last_hash: String,
}

impl SeekJournalRecord {
    pub fn new(offset: u64, last_hash: impl Into<String>) -> Self {
        Self {
            offset,
            last_hash: last_hash.into(),
        }
    }

    /// Build a record for `offset`, hashing the line that ends there
    pub fn for_line(offset: u64, last_line: &[u8]) -> Self {
        Self::new(offset, line_hash(last_line))
    }

    /// Encode as a single newline-terminated JSON line
    pub fn encode(&self) -> String {
        let mut obj = Map::new();
        obj.insert(SEEK_KEY.to_string(), Value::from(self.offset));
        obj.insert(
            LAST_HASH_KEY.to_string(),
            Value::String(self.last_hash.clone()),
        );
        let mut line = Value::Object(obj).to_string();
        line.push('\n');
        line
    }

    /// Decode a single record line
    pub fn decode(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line.trim())?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Journal("record is not a JSON object".to_string()))?;

        if let Some(version) = obj.get(VERSION_KEY) {
            match version.as_u64() {
                Some(v) if v <= JOURNAL_FORMAT_VERSION => {}
                _ => {
                    return Err(Error::Journal(format!(
                        "unsupported record version: {}",
                        version
                    )));
                }
            }
        }

        let offset = obj
            .get(SEEK_KEY)
            .and_then(decode_offset)
            .ok_or_else(|| Error::Journal(format!("missing or invalid `{}`", SEEK_KEY)))?;

        let last_hash = obj
            .get(LAST_HASH_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Journal(format!("missing or invalid `{}`", LAST_HASH_KEY)))?;

        Ok(Self::new(offset, last_hash))
    }

    /// Decode the last valid record in a journal's contents.
    ///
    /// A journal normally holds one record, but a torn or appended write can
    /// leave several lines; the last one that decodes wins. Returns `Ok(None)`
    /// for empty contents.
    pub fn decode_last(contents: &str) -> Result<Option<Self>> {
        let mut last_err = None;

        for line in contents.lines().rev().filter(|l| !l.trim().is_empty()) {
            match Self::decode(line) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

/// Offsets are written as integers; writers that only had doubles are accepted
/// when the value is a non-negative whole number.
fn decode_offset(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
            .map(|f| f as u64)
    })
}

/// Hex SHA-1 of a raw line, terminator included
pub fn line_hash(line: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(line);
    hex::encode(hasher.finalize())
}
