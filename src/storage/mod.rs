//! Storage module - UTXO snapshots, persisted records and the object store

mod db;
mod objects;
mod utxo;

pub use db::*;
pub use objects::*;
pub use utxo::*;
