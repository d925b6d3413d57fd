//! # Chain
//!
//! The ordered, validated block sequence of a single node, plus the
//! fork-choice rule: a strictly longer valid chain replaces the local one,
//! anything else is ignored.
//!
//! A `Chain` is never empty. It starts at the canonical genesis block and
//! only grows through [`Chain::append`] or is swapped wholesale through
//! [`Chain::replace`]. Nothing here does I/O or locking; concurrency is the
//! job of [`Ledger`](super::ledger::Ledger).

use thiserror::Error;

use super::block::{Block, Payload};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a single candidate block was not appended.
///
/// Checks run in declaration order and the first failure wins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockRejection {
    #[error("index mismatch: expected {expected}, got {actual}")]
    IndexMismatch { expected: u64, actual: u64 },

    #[error("previous hash {actual} does not match tip hash {expected}")]
    PreviousHashMismatch { expected: String, actual: String },

    #[error("declared hash {declared} does not match computed hash {computed}")]
    HashMismatch { declared: String, computed: String },
}

impl BlockRejection {
    /// `true` when the block sits at or below the local tip: a re-send of
    /// something this node already has, not a divergence.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::IndexMismatch { expected, actual } if actual < expected)
    }
}

/// Why a whole candidate chain failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainInvalid {
    #[error("chain is empty")]
    Empty,

    #[error("block 0 is not the canonical genesis block")]
    GenesisMismatch,

    #[error("block at position {position} has index {actual}, expected {expected}")]
    IndexMismatch {
        position: usize,
        expected: u64,
        actual: u64,
    },

    #[error("block at position {position} does not link to its predecessor")]
    BrokenLink { position: usize },

    #[error("block at position {position} has a hash that does not match its contents")]
    HashMismatch { position: usize },
}

/// Why a candidate chain did not replace the local one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplaceRejection {
    #[error("candidate chain length {candidate} is not longer than local length {current}")]
    TooShort { candidate: usize, current: usize },

    #[error("candidate chain is invalid: {0}")]
    Invalid(#[from] ChainInvalid),
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    /// A chain holding only the genesis block.
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::genesis()],
        }
    }

    /// Seed a chain from a previously stored sequence. The sequence must
    /// pass full validation.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, ChainInvalid> {
        Self::validate(&blocks)?;
        Ok(Self { blocks })
    }

    /// The last block. Always present.
    pub fn tip(&self) -> &Block {
        // A chain always holds at least the genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always `false`; present so `len` has its usual partner.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index)
            .ok()
            .and_then(|position| self.blocks.get(position))
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    /// Append `candidate` if it extends the current tip.
    ///
    /// On rejection the chain is left untouched.
    pub fn append(&mut self, candidate: Block) -> Result<(), BlockRejection> {
        check_successor(self.tip(), &candidate)?;
        self.blocks.push(candidate);
        Ok(())
    }

    /// Seal a new block on top of the tip and append it.
    pub fn append_new(&mut self, timestamp: impl Into<String>, payload: Payload) -> Block {
        let tip = self.tip();
        let block = Block::seal(tip.index() + 1, timestamp, payload, tip.hash());
        debug_assert!(check_successor(tip, &block).is_ok());
        self.blocks.push(block.clone());
        block
    }

    /// Full structural validation of a candidate sequence.
    ///
    /// Short-circuits on the first problem. Pure: no state is touched, and
    /// calling it twice on the same input gives the same answer.
    pub fn validate(blocks: &[Block]) -> Result<(), ChainInvalid> {
        let first = blocks.first().ok_or(ChainInvalid::Empty)?;
        if !first.is_genesis() {
            return Err(ChainInvalid::GenesisMismatch);
        }

        for (position, pair) in blocks.windows(2).enumerate() {
            let position = position + 1;
            check_successor(&pair[0], &pair[1]).map_err(|rejection| match rejection {
                BlockRejection::IndexMismatch { expected, actual } => ChainInvalid::IndexMismatch {
                    position,
                    expected,
                    actual,
                },
                BlockRejection::PreviousHashMismatch { .. } => {
                    ChainInvalid::BrokenLink { position }
                }
                BlockRejection::HashMismatch { .. } => ChainInvalid::HashMismatch { position },
            })?;
        }

        Ok(())
    }

    /// Adopt `candidate` if it is strictly longer than the local chain and
    /// valid. Length is checked first, so a short chain is never hashed.
    pub fn replace(&mut self, candidate: Vec<Block>) -> Result<(), ReplaceRejection> {
        self.check_longer(candidate.len())?;
        Self::validate(&candidate)?;
        self.install(candidate);
        Ok(())
    }

    /// Fork-choice length test: only a strictly longer chain may win.
    pub(crate) fn check_longer(&self, candidate: usize) -> Result<(), ReplaceRejection> {
        if candidate <= self.blocks.len() {
            return Err(ReplaceRejection::TooShort {
                candidate,
                current: self.blocks.len(),
            });
        }
        Ok(())
    }

    /// Swap in an already validated sequence.
    pub(crate) fn install(&mut self, blocks: Vec<Block>) {
        debug_assert!(Self::validate(&blocks).is_ok());
        self.blocks = blocks;
    }
}

/// Check that `candidate` may directly follow `prev`: index, then link,
/// then hash.
fn check_successor(prev: &Block, candidate: &Block) -> Result<(), BlockRejection> {
    let expected = prev.index() + 1;
    if candidate.index() != expected {
        return Err(BlockRejection::IndexMismatch {
            expected,
            actual: candidate.index(),
        });
    }

    if candidate.previous_hash() != prev.hash() {
        return Err(BlockRejection::PreviousHashMismatch {
            expected: prev.hash().to_string(),
            actual: candidate.previous_hash().to_string(),
        });
    }

    let computed = candidate.compute_hash();
    if candidate.hash() != computed {
        return Err(BlockRejection::HashMismatch {
            declared: candidate.hash().to_string(),
            computed,
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
