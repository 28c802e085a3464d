// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Record keys and the codec that extracts them from delimited records.
//!
//! A record is a delimiter-separated byte sequence; one attribute of it is
//! the partitioning key. The total order on [Key] defines every partitioning
//! decision in the crate.

use std::fmt::{Display, Formatter};

use crate::error::{RangePartError, Result};

/// An ordered, comparable key value extracted from a record.
///
/// Order is total within a variant. Across variants `Long` sorts before
/// `Str`; mixed-variant comparisons only arise from malformed input since a
/// [KeyCodec] always produces a single variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// 64-bit integer key.
    Long(i64),
    /// UTF-8 string key.
    Str(String),
}

const KEY_TAG_LONG: u8 = 0;
const KEY_TAG_STR: u8 = 1;

impl Key {
    /// Appends the binary encoding of this key to `buf`.
    ///
    /// Format: one tag byte, then for `Long` eight little-endian bytes, for
    /// `Str` a little-endian u32 length followed by the UTF-8 bytes.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            Key::Long(v) => {
                buf.push(KEY_TAG_LONG);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Key::Str(s) => {
                buf.push(KEY_TAG_STR);
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Decodes one key from `bytes` starting at `*pos`, advancing `*pos`.
    pub fn read_from(bytes: &[u8], pos: &mut usize) -> Result<Key> {
        let tag = *bytes
            .get(*pos)
            .ok_or_else(|| RangePartError::General("truncated key encoding".to_string()))?;
        *pos += 1;
        match tag {
            KEY_TAG_LONG => {
                let end = *pos + 8;
                let raw: [u8; 8] = bytes
                    .get(*pos..end)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| {
                        RangePartError::General("truncated long key".to_string())
                    })?;
                *pos = end;
                Ok(Key::Long(i64::from_le_bytes(raw)))
            }
            KEY_TAG_STR => {
                let len_end = *pos + 4;
                let raw: [u8; 4] = bytes
                    .get(*pos..len_end)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| {
                        RangePartError::General("truncated string key length".to_string())
                    })?;
                let len = u32::from_le_bytes(raw) as usize;
                let end = len_end + len;
                let text = bytes.get(len_end..end).ok_or_else(|| {
                    RangePartError::General("truncated string key".to_string())
                })?;
                *pos = end;
                Ok(Key::Str(
                    std::str::from_utf8(text)
                        .map_err(|e| {
                            RangePartError::General(format!("invalid UTF-8 in key: {e}"))
                        })?
                        .to_string(),
                ))
            }
            other => Err(RangePartError::General(format!(
                "unknown key tag: {other}"
            ))),
        }
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Key::Long(v) => write!(f, "{v}"),
            Key::Str(s) => write!(f, "{s}"),
        }
    }
}

/// The type of key a [KeyCodec] extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Parse the key attribute as a 64-bit integer.
    Long,
    /// Take the key attribute as a UTF-8 string.
    Str,
}

/// Parses the partitioning key out of a delimited record.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    delimiter: u8,
    attribute: usize,
    key_type: KeyType,
}

impl KeyCodec {
    /// Creates a codec extracting `attribute` (zero-based) from records split
    /// on `delimiter`.
    pub fn new(delimiter: u8, attribute: usize, key_type: KeyType) -> Self {
        Self {
            delimiter,
            attribute,
            key_type,
        }
    }

    /// Ordinal position of the key attribute within a record.
    pub fn attribute(&self) -> usize {
        self.attribute
    }

    /// The field delimiter records are split on.
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Extracts the key from one record (without a trailing record
    /// terminator).
    pub fn extract(&self, record: &[u8]) -> Result<Key> {
        let field = record
            .split(|b| *b == self.delimiter)
            .nth(self.attribute)
            .ok_or_else(|| {
                RangePartError::General(format!(
                    "record has no attribute {} (delimiter '{}')",
                    self.attribute, self.delimiter as char
                ))
            })?;
        let text = std::str::from_utf8(field).map_err(|e| {
            RangePartError::General(format!("key attribute is not UTF-8: {e}"))
        })?;
        match self.key_type {
            KeyType::Long => text
                .trim()
                .parse::<i64>()
                .map(Key::Long)
                .map_err(|e| {
                    RangePartError::General(format!(
                        "failed to parse key attribute '{text}' as integer: {e}"
                    ))
                }),
            KeyType::Str => Ok(Key::Str(text.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_long() -> Result<()> {
        let codec = KeyCodec::new(b'|', 1, KeyType::Long);
        assert_eq!(Key::Long(42), codec.extract(b"abc|42|xyz")?);
        assert_eq!(Key::Long(-7), codec.extract(b"abc|-7")?);
        Ok(())
    }

    #[test]
    fn test_extract_str() -> Result<()> {
        let codec = KeyCodec::new(b'|', 0, KeyType::Str);
        assert_eq!(Key::Str("abc".to_string()), codec.extract(b"abc|42")?);
        Ok(())
    }

    #[test]
    fn test_extract_missing_attribute() {
        let codec = KeyCodec::new(b'|', 5, KeyType::Long);
        assert!(codec.extract(b"a|b|c").is_err());
    }

    #[test]
    fn test_extract_unparsable() {
        let codec = KeyCodec::new(b'|', 0, KeyType::Long);
        assert!(codec.extract(b"not-a-number|1").is_err());
    }

    #[test]
    fn test_key_order() {
        assert!(Key::Long(1) < Key::Long(2));
        assert!(Key::Str("a".to_string()) < Key::Str("b".to_string()));
        assert!(Key::Long(i64::MAX) < Key::Str("0".to_string()));
    }

    #[test]
    fn test_key_codec_roundtrip() -> Result<()> {
        let keys = vec![
            Key::Long(0),
            Key::Long(i64::MIN),
            Key::Long(i64::MAX),
            Key::Str(String::new()),
            Key::Str("hello".to_string()),
        ];
        let mut buf = Vec::new();
        for k in &keys {
            k.write_to(&mut buf);
        }
        let mut pos = 0;
        for k in &keys {
            assert_eq!(*k, Key::read_from(&buf, &mut pos)?);
        }
        assert_eq!(pos, buf.len());
        Ok(())
    }
}
