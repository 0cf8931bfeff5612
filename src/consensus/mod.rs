//! Consensus module - Blocks, proof of work, coinbase policy, block validation and forks

mod block;
mod chain;
mod difficulty;
mod rewards;
mod validation;

pub use block::*;
pub use chain::*;
pub use difficulty::*;
pub use rewards::*;
pub use validation::*;
