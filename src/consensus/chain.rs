//! Fork computation between validated chain tips

use thiserror::Error;

use super::{Object, ValidBlock};
use crate::crypto::Hash;
use crate::storage::{ObjectManager, StorageError};
use std::sync::Arc;

/// Chain errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Cannot compute forks of block {0}, which is not known to be valid")]
    CannotForkInvalidBlock(Hash),
    #[error("Blocks {0} and {1} share no common ancestor")]
    NoCommonAncestor(Hash, Hash),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Two branches diverging after their lowest common ancestor
#[derive(Debug, Clone)]
pub struct Forks {
    pub lca: ValidBlock,
    /// Blocks after the ancestor up to the first tip, oldest first
    pub short: Vec<ValidBlock>,
    /// Blocks after the ancestor up to the second tip, oldest first
    pub long: Vec<ValidBlock>,
}

/// Load a block together with its cached validation results
pub fn load_valid_block(objects: &ObjectManager, id: &Hash) -> Result<Option<ValidBlock>, StorageError> {
    let Some(info) = objects.db().get_block_info(id)? else {
        return Ok(None);
    };
    match objects.get(id)? {
        Some(Object::Block(block)) => Ok(Some(ValidBlock {
            block,
            id: *id,
            height: info.height,
            state_after: Arc::new(info.state_after),
        })),
        _ => Err(StorageError::Missing(format!("object:{id}"))),
    }
}

fn parent_of(objects: &ObjectManager, block: &ValidBlock, other: &Hash) -> Result<ValidBlock, ChainError> {
    let previd = block
        .block
        .previd
        .ok_or(ChainError::NoCommonAncestor(block.id, *other))?;
    load_valid_block(objects, &previd)?.ok_or(ChainError::CannotForkInvalidBlock(previd))
}

/// Split the chains ending at `b1` and `b2` at their lowest common ancestor.
///
/// `b2` is expected to be at least as high as `b1`, but either order works.
pub fn get_forks(objects: &ObjectManager, b1: &ValidBlock, b2: &ValidBlock) -> Result<Forks, ChainError> {
    for tip in [b1, b2] {
        if objects.db().get_block_info(&tip.id)?.is_none() {
            return Err(ChainError::CannotForkInvalidBlock(tip.id));
        }
    }

    let mut short_tip = b1.clone();
    let mut long_tip = b2.clone();
    let mut short = Vec::new();
    let mut long = Vec::new();

    while long_tip.height > short_tip.height {
        let parent = parent_of(objects, &long_tip, &b1.id)?;
        long.push(std::mem::replace(&mut long_tip, parent));
    }
    while short_tip.height > long_tip.height {
        let parent = parent_of(objects, &short_tip, &b2.id)?;
        short.push(std::mem::replace(&mut short_tip, parent));
    }
    while short_tip.id != long_tip.id {
        let short_parent = parent_of(objects, &short_tip, &b2.id)?;
        let long_parent = parent_of(objects, &long_tip, &b1.id)?;
        short.push(std::mem::replace(&mut short_tip, short_parent));
        long.push(std::mem::replace(&mut long_tip, long_parent));
    }

    short.reverse();
    long.reverse();
    Ok(Forks {
        lca: short_tip,
        short,
        long,
    })
}
