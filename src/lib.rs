//! Tidal Core Library
//!
//! Consensus and state engine of a proof-of-work UTXO full node: object
//! validation, chain selection with reorganization, and a mempool kept
//! consistent with the best chain.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod node;
pub mod p2p;
pub mod storage;
pub mod validation;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    use crate::crypto::Hash;
    use std::time::Duration;

    /// Fixed proof-of-work target: 00000002af0000...
    pub const TARGET: Hash = {
        let mut target = [0u8; 32];
        target[3] = 0x02;
        target[4] = 0xaf;
        Hash(target)
    };

    /// Base units per coin
    pub const COIN: u64 = 1_000_000_000_000;

    /// New coins a coinbase may claim on top of fees (50 coins)
    pub const BLOCK_REWARD: u64 = 50 * COIN;

    /// How long to wait for a peer to deliver a requested object
    pub const RETRIEVAL_TIMEOUT: Duration = Duration::from_millis(5000);

    /// Peers processed from a single `peers` message
    pub const MAX_PEERS_PER_MESSAGE: usize = 30;

    /// Protocol version announced in `hello`
    pub const PROTOCOL_VERSION: &str = "0.8.0";

    /// Accepted `hello` versions share this prefix
    pub const PROTOCOL_VERSION_PREFIX: &str = "0.8.";

    /// Default listening port
    pub const DEFAULT_PORT: u16 = 18018;
}
