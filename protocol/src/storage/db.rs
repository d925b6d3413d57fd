//! # LedgerDb: Persistent Storage
//!
//! The chain survives restarts through sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree       | Key               | Value                      |
//! |------------|-------------------|----------------------------|
//! | `blocks`   | `index` (8B BE)   | JSON record of the block   |
//! | `metadata` | key (UTF-8)       | value (bytes)              |
//! | `balances` | public key (UTF-8)| `u128` base units (16B BE) |
//!
//! Indices are big-endian so sled's lexicographic order is numeric order
//! and a full scan of `blocks` yields the chain in sequence.
//!
//! Block values are JSON rather than a binary codec: the payload is an
//! arbitrary JSON value whose key order feeds the content hash, and the
//! JSON text round-trips it exactly.
//!
//! ## Atomicity
//!
//! [`LedgerDb::put_chain`] always writes the whole chain in one `Batch`,
//! dropping heights past the new tip, so a replacement by a longer fork and
//! a plain append look the same on disk.

use sled::{Batch, Db, Tree};
use std::path::Path;

use super::block::Block;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

/// Number of blocks written by the last `put_chain`.
const META_CHAIN_LENGTH: &[u8] = b"chain_length";

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Handle to the node's on-disk state. Cheap to clone; sled trees are
/// internally synchronized.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    db: Db,
    blocks: Tree,
    metadata: Tree,
}

impl LedgerDb {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A throwaway database removed when the last handle is dropped.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let blocks = db.open_tree("blocks")?;
        let metadata = db.open_tree("metadata")?;
        Ok(Self {
            db,
            blocks,
            metadata,
        })
    }

    /// Open a named tree in the same database. The balance ledger lives in
    /// one of these.
    pub fn open_tree(&self, name: &str) -> DbResult<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    // -- Chain operations ---------------------------------------------------

    /// Overwrite the stored chain with `blocks`.
    ///
    /// Every height is rewritten and any height past the new length is
    /// removed, all in one atomic batch, followed by a flush.
    pub fn put_chain(&self, blocks: &[Block]) -> DbResult<()> {
        let mut batch = Batch::default();

        for block in blocks {
            let value =
                serde_json::to_vec(block).map_err(|e| DbError::Serialization(e.to_string()))?;
            let key = block.index().to_be_bytes();
            batch.insert(&key[..], value);
        }

        let new_len = blocks.len() as u64;
        for stale in self.blocks.range(new_len.to_be_bytes()..) {
            let (key, _) = stale?;
            batch.remove(key);
        }

        self.blocks.apply_batch(batch)?;
        self.metadata
            .insert(META_CHAIN_LENGTH, &new_len.to_be_bytes()[..])?;
        self.db.flush()?;
        Ok(())
    }

    /// Read back the stored chain in index order. `None` when nothing has
    /// been stored yet.
    ///
    /// The blocks are returned exactly as written; no validation happens
    /// here.
    pub fn load_chain(&self) -> DbResult<Option<Vec<Block>>> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for entry in self.blocks.iter() {
            let (_key, value) = entry?;
            let block: Block = serde_json::from_slice(&value)
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            blocks.push(block);
        }

        if blocks.is_empty() {
            return Ok(None);
        }
        Ok(Some(blocks))
    }

    /// Length recorded by the last `put_chain`, if any.
    pub fn stored_length(&self) -> DbResult<Option<u64>> {
        match self.metadata.get(META_CHAIN_LENGTH)? {
            Some(bytes) => {
                let len = u64::from_be_bytes(
                    bytes
                        .as_ref()
                        .try_into()
                        .map_err(|_| DbError::Serialization("invalid length bytes".to_string()))?,
                );
                Ok(Some(len))
            }
            None => Ok(None),
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
