//! Ed25519 signature implementation
//!
//! Transaction inputs are signed over the canonical JSON of the unsigned
//! transaction. Keys and signatures travel as lowercase hex.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signature errors
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid private key")]
    InvalidPrivateKey,
}

/// 32-byte private key
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// 32-byte Ed25519 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "hex_array")] pub [u8; 32]);

/// 64-byte Ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "hex_array")] pub [u8; 64]);

/// Fixed-size byte arrays as lowercase hex strings
mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        if s.len() != N * 2 || s.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(serde::de::Error::custom(format!(
                "expected {} lowercase hex characters",
                N * 2
            )));
        }
        let mut arr = [0u8; N];
        hex::decode_to_slice(&s, &mut arr).map_err(serde::de::Error::custom)?;
        Ok(arr)
    }
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        PrivateKey(SigningKey::generate(&mut OsRng))
    }

    /// Create from 32 bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        PrivateKey(SigningKey::from_bytes(bytes))
    }

    /// Create from a 64 character hex seed
    pub fn from_hex(seed: &str) -> Result<Self, SignatureError> {
        let mut arr = [0u8; 32];
        hex::decode_to_slice(seed, &mut arr).map_err(|_| SignatureError::InvalidPrivateKey)?;
        Ok(Self::from_bytes(&arr))
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message).to_bytes())
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl PublicKey {
    /// Create from 32 bytes, rejecting encodings that are not curve points
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        VerifyingKey::from_bytes(bytes).map_err(|_| SignatureError::InvalidPublicKey)?;
        Ok(PublicKey(*bytes))
    }

    /// Verify a signature
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let verifying_key = match VerifyingKey::from_bytes(&self.0) {
            Ok(vk) => vk,
            Err(_) => return false,
        };
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);

        verifying_key.verify(message, &sig).is_ok()
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Signature {
    /// Create from 64 bytes
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Signature(*bytes)
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}
