//! Validation module - transaction structure and stateless/stored-state checks

mod fields;
mod transaction;

pub use transaction::*;
pub(crate) use fields::{nullable, present};
