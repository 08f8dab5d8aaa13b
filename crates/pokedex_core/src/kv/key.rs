//! Ordered tuple keys and their byte encoding.
//!
//! # Invariants
//! - Byte order of encoded keys equals tuple order of the parts, so a key
//!   prefix maps to one contiguous byte range.
//! - Strings sort before integers; integers sort numerically, negatives first.
//! - No encoded part starts with `PREFIX_END`, which bounds prefix ranges.

use super::{KvError, KvResult};
use std::fmt::{Display, Formatter};

const TAG_STR: u8 = 0x02;
const TAG_INT: u8 = 0x21;
const STR_TERMINATOR: u8 = 0x00;
const STR_ESCAPE: u8 = 0xFF;
const PREFIX_END: u8 = 0xFF;
const INT_SIGN_BIT: u64 = 1 << 63;

/// One component of a [`KvKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Str(String),
    Int(i64),
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl Display for KeyPart {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(value) => write!(f, "{value:?}"),
            Self::Int(value) => write!(f, "{value}"),
        }
    }
}

/// Ordered tuple key, e.g. `("pokemons", 1)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KvKey {
    parts: Vec<KeyPart>,
}

impl KvKey {
    /// Empty key; as a prefix it matches every entry.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns this key extended by one part.
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.parts.push(part.into());
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// Whether `prefix` is a (non-strict) tuple prefix of this key.
    pub fn starts_with(&self, prefix: &KvKey) -> bool {
        self.parts.starts_with(&prefix.parts)
    }

    /// Encodes the key into its order-preserving byte form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for part in &self.parts {
            match part {
                KeyPart::Str(value) => {
                    out.push(TAG_STR);
                    for byte in value.as_bytes() {
                        out.push(*byte);
                        if *byte == STR_TERMINATOR {
                            out.push(STR_ESCAPE);
                        }
                    }
                    out.push(STR_TERMINATOR);
                }
                KeyPart::Int(value) => {
                    out.push(TAG_INT);
                    out.extend_from_slice(&((*value as u64) ^ INT_SIGN_BIT).to_be_bytes());
                }
            }
        }
        out
    }

    /// Decodes bytes produced by [`KvKey::encode`].
    ///
    /// # Errors
    /// - `KvError::InvalidKey` for unknown tags, truncated parts or non-UTF-8
    ///   string parts.
    pub fn decode(bytes: &[u8]) -> KvResult<Self> {
        let mut parts = Vec::new();
        let mut pos = 0;

        while pos < bytes.len() {
            let tag = bytes[pos];
            pos += 1;
            match tag {
                TAG_STR => {
                    let mut raw = Vec::new();
                    loop {
                        let byte = *bytes
                            .get(pos)
                            .ok_or_else(|| KvError::InvalidKey("unterminated string part".into()))?;
                        pos += 1;
                        if byte != STR_TERMINATOR {
                            raw.push(byte);
                        } else if bytes.get(pos) == Some(&STR_ESCAPE) {
                            raw.push(STR_TERMINATOR);
                            pos += 1;
                        } else {
                            break;
                        }
                    }
                    let value = String::from_utf8(raw)
                        .map_err(|_| KvError::InvalidKey("string part is not UTF-8".into()))?;
                    parts.push(KeyPart::Str(value));
                }
                TAG_INT => {
                    let end = pos + 8;
                    let chunk: [u8; 8] = bytes
                        .get(pos..end)
                        .and_then(|slice| slice.try_into().ok())
                        .ok_or_else(|| KvError::InvalidKey("truncated integer part".into()))?;
                    pos = end;
                    parts.push(KeyPart::Int((u64::from_be_bytes(chunk) ^ INT_SIGN_BIT) as i64));
                }
                other => {
                    return Err(KvError::InvalidKey(format!(
                        "unknown key part tag 0x{other:02x}"
                    )));
                }
            }
        }

        Ok(Self { parts })
    }
}

impl Display for KvKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (index, part) in self.parts.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, ")")
    }
}

/// Half-open byte range `[start, end)` covering every key under `prefix`.
pub(crate) fn prefix_range(prefix: &KvKey) -> (Vec<u8>, Vec<u8>) {
    let start = prefix.encode();
    let mut end = start.clone();
    end.push(PREFIX_END);
    (start, end)
}
