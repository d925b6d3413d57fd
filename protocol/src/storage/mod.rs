//! # Storage Module
//!
//! The ledger itself and its persistence.
//!
//! ## Architecture
//!
//! ```text
//! block.rs   : Block, Payload, content hash, genesis
//! chain.rs   : ordered chain: append, validate, longest-chain replace
//! ledger.rs  : shared lock-guarded Chain plus mutation events
//! db.rs      : sled persistence of the full chain
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! producer / peer ──► Ledger ──► Chain
//!                       │
//!                       └─ LedgerEvent ──► node ──► LedgerDb
//! ```

pub mod block;
pub mod chain;
pub mod db;
pub mod ledger;

pub use block::{Block, Payload};
pub use chain::{BlockRejection, Chain, ChainInvalid, ReplaceRejection};
pub use db::{DbError, LedgerDb};
pub use ledger::{Ledger, LedgerEvent, Origin};
