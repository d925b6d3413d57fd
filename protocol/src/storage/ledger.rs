//! # Ledger
//!
//! The shared, lock-guarded handle every chain mutation goes through: the
//! HTTP producer, peer links, and the gossip loop all hold a clone.
//!
//! ## Locking
//!
//! One `parking_lot::RwLock<Chain>`. Appends and producer submissions run
//! entirely under the write lock. Replacement splits the work:
//!
//! ```text
//! read lock   : candidate longer than local?      (cheap reject of gossip echoes)
//! no lock     : Chain::validate(candidate)        (hashes every block)
//! write lock  : still longer?  -> install
//! ```
//!
//! A guard is never held across an `.await`; every method here is
//! synchronous.
//!
//! ## Events
//!
//! Accepted mutations and real rejections are published on a
//! `tokio::sync::broadcast` channel. The node persists and updates metrics
//! from it; replication does not subscribe. A candidate chain that is merely
//! not longer is routine (every gossip round from an in-sync peer) and is
//! not published.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::block::{Block, Payload};
use super::chain::{BlockRejection, Chain, ChainInvalid, ReplaceRejection};
use crate::config::LEDGER_EVENT_CAPACITY;
use crate::network::PeerId;

/// Where an appended block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Produced on this node.
    Local,
    /// Received as a `NEW_BLOCK` from a peer.
    Peer(PeerId),
}

/// Something that happened to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    BlockAppended { block: Block, origin: Origin },
    ChainReplaced { len: usize },
    BlockRejected { index: u64, reason: BlockRejection },
    ChainRejected { len: usize, reason: ChainInvalid },
}

impl LedgerEvent {
    /// `true` for events after which the stored chain is out of date.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            LedgerEvent::BlockAppended { .. } | LedgerEvent::ChainReplaced { .. }
        )
    }
}

/// Cloneable handle to the node's chain.
#[derive(Debug, Clone)]
pub struct Ledger {
    chain: Arc<RwLock<Chain>>,
    events: broadcast::Sender<LedgerEvent>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// A ledger holding only the genesis block.
    pub fn new() -> Self {
        Self::with_chain(Chain::new())
    }

    pub fn with_chain(chain: Chain) -> Self {
        let (events, _) = broadcast::channel(LEDGER_EVENT_CAPACITY);
        Self {
            chain: Arc::new(RwLock::new(chain)),
            events,
        }
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Link `payload` to the current tip, seal it, and append it.
    ///
    /// Linking and appending happen in one write-lock critical section, so
    /// concurrent submissions always get distinct, consecutive indices.
    pub fn submit(&self, timestamp: impl Into<String>, payload: Payload) -> Block {
        let block = self.chain.write().append_new(timestamp, payload);
        info!(index = block.index(), hash = %block.short_hash(), "block produced");
        self.publish(LedgerEvent::BlockAppended {
            block: block.clone(),
            origin: Origin::Local,
        });
        block
    }

    /// Append a block received from elsewhere. It must extend the tip.
    pub fn append(&self, block: Block, origin: Origin) -> Result<(), BlockRejection> {
        let index = block.index();
        let result = self.chain.write().append(block.clone());

        match result {
            Ok(()) => {
                info!(index, hash = %block.short_hash(), ?origin, "block appended");
                self.publish(LedgerEvent::BlockAppended { block, origin });
                Ok(())
            }
            Err(reason) => {
                if reason.is_stale() {
                    debug!(index, %reason, ?origin, "stale block ignored");
                } else {
                    warn!(index, %reason, ?origin, "block rejected");
                }
                self.publish(LedgerEvent::BlockRejected {
                    index,
                    reason: reason.clone(),
                });
                Err(reason)
            }
        }
    }

    /// Replace the local chain if `candidate` is strictly longer and valid.
    pub fn replace(&self, candidate: Vec<Block>) -> Result<(), ReplaceRejection> {
        let len = candidate.len();

        let pre_check = self.chain.read().check_longer(len);
        if let Err(rejection) = pre_check {
            debug!(len, %rejection, "candidate chain ignored");
            return Err(rejection);
        }

        if let Err(reason) = Chain::validate(&candidate) {
            warn!(len, %reason, "candidate chain rejected");
            self.publish(LedgerEvent::ChainRejected {
                len,
                reason: reason.clone(),
            });
            return Err(ReplaceRejection::Invalid(reason));
        }

        {
            let mut chain = self.chain.write();
            if let Err(rejection) = chain.check_longer(len) {
                debug!(len, %rejection, "local chain grew during validation");
                return Err(rejection);
            }
            chain.install(candidate);
        }

        info!(len, "chain replaced");
        self.publish(LedgerEvent::ChainReplaced { len });
        Ok(())
    }

    /// Copy of the whole chain. Reflects either the state before or the
    /// state after any concurrent mutation, never a mix.
    pub fn snapshot(&self) -> Vec<Block> {
        self.chain.read().blocks().to_vec()
    }

    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    /// Always `false`: the genesis block is never removed.
    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    pub fn tip(&self) -> Block {
        self.chain.read().tip().clone()
    }

    pub fn get(&self, index: u64) -> Option<Block> {
        self.chain.read().get(index).cloned()
    }

    fn publish(&self, event: LedgerEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}
