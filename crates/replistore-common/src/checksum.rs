//! Content hashing for Replistore
//!
//! Objects are identified on the wire by a 128-bit MD5 digest rendered as
//! 32 lowercase hex characters, the same value S3 clients see as the ETag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a hex-encoded content hash
pub const CONTENT_HASH_HEX_LEN: usize = 32;

/// 128-bit content digest of an object payload
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Compute the digest of `data`
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    /// Wrap raw digest bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Check whether `data` hashes to this digest
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }

    /// Lowercase hex rendering
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Errors that can occur when parsing a content hash
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentHashError {
    #[error("content hash must be {CONTENT_HASH_HEX_LEN} hex characters, got {0}")]
    InvalidLength(usize),
    #[error("content hash contains non-hex characters")]
    InvalidHex,
}

impl FromStr for ContentHash {
    type Err = ContentHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CONTENT_HASH_HEX_LEN {
            return Err(ContentHashError::InvalidLength(s.len()));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| ContentHashError::InvalidHex)?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = ContentHashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}
