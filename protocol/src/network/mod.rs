//! # Network Module
//!
//! Peer-to-peer replication over WebSockets.
//!
//! ## Architecture
//!
//! ```text
//! message.rs      : CHAIN / NEW_BLOCK wire frames
//! peer.rs         : one WebSocket link: bounded outbound queue + reader
//! replication.rs  : peer set, inbound handling, broadcast, periodic gossip
//! ```
//!
//! ## Design Decisions
//!
//! - Fork choice is longest valid chain. There is no consensus round, no
//!   finality, and no proof of work; a node trusts length.
//! - The active peer set is a `DashMap` so broadcasts can iterate it while
//!   links come and go.
//! - Each link gets its own writer task fed by a bounded queue. A stalled
//!   peer fills only its own queue, and frames to it are dropped rather
//!   than blocking anyone else. Gossip repairs the gap.

pub mod message;
pub mod peer;
pub mod replication;

pub use message::PeerMessage;
pub use peer::{PeerError, PeerHandle, PeerId, PeerLink, PeerReader};
pub use replication::{ReplicationConfig, ReplicationEngine};
