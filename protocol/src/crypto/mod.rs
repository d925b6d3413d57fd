//! # Cryptographic Primitives
//!
//! Two concerns, both thin wrappers over audited crates:
//!
//! - **hash**: SHA-256 (`sha2`) for block content hashes.
//! - **keys**: Ed25519 (`ed25519-dalek`) wallet used to sign posts.

pub mod hash;
pub mod keys;

pub use hash::{sha256, sha256_hex, sha256_hex_multi};
pub use keys::{verify, Wallet, WalletError};
