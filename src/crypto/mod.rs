//! Cryptography module - SHA-256 object hashing, canonical JSON, Ed25519 signatures

mod canonical;
mod hash;
mod signature;

pub use canonical::*;
pub use hash::*;
pub use signature::*;
