// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Quill Protocol: Core Library
//!
//! A small replicated ledger. Every node holds a hash-linked chain of
//! blocks carrying opaque JSON payloads, appends blocks it produces, and
//! converges with its peers by adopting any strictly longer valid chain
//! they gossip.
//!
//! ## Architecture
//!
//! - **config**: Protocol constants: genesis, hash encoding version, ports.
//! - **crypto**: SHA-256 helpers and the node's Ed25519 wallet.
//! - **storage**: Blocks, the chain and its validation, the shared ledger,
//!   and sled persistence.
//! - **network**: WebSocket peer links and the replication engine.
//! - **vault**: Token credits for post authors.
//!
//! ## Guarantees
//!
//! 1. Every accepted chain starts at the same genesis block and is fully
//!    hash-linked.
//! 2. A local chain is only ever replaced by a strictly longer valid one.
//! 3. Payloads are never interpreted by chain logic.

pub mod config;
pub mod crypto;
pub mod network;
pub mod storage;
pub mod vault;
