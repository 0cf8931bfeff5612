//! SHA-256 hashing implementation
//!
//! Object identifiers are the SHA-256 digest of the canonical JSON encoding,
//! rendered as lowercase hex on the wire.

use serde::de::{self, Deserializer, Visitor};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// 32-byte hash output
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Create a zero hash
    pub const fn zero() -> Self {
        Hash([0u8; 32])
    }

    /// Create hash from bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Create hash from a lowercase hex string of exactly 64 characters
    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        if hex.len() != 64 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        // Uppercase digits would give the same bytes a second spelling
        if let Some((index, c)) = hex.char_indices().find(|(_, c)| c.is_ascii_uppercase()) {
            return Err(hex::FromHexError::InvalidHexCharacter { c, index });
        }
        let mut arr = [0u8; 32];
        hex::decode_to_slice(hex, &mut arr)?;
        Ok(Hash(arr))
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compare as 256-bit big-endian unsigned integers
    pub fn cmp_numeric(&self, other: &Hash) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HashVisitor;

        impl<'de> Visitor<'de> for HashVisitor {
            type Value = Hash;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 64 character lowercase hex digest")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Hash, E> {
                Hash::from_hex(v).map_err(|e| E::custom(format!("invalid digest {v:?}: {e}")))
            }
        }

        deserializer.deserialize_str(HashVisitor)
    }
}

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    Hash(digest.into())
}
