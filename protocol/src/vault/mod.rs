//! # Vault Module
//!
//! Token bookkeeping for post authors.
//!
//! ```text
//! balance.rs  : TokenAmount and the sled-backed BalanceLedger
//! ```
//!
//! All amounts are `u128` base units. No floating point anywhere; the
//! 18 decimals are for display only.

pub mod balance;

pub use balance::{BalanceError, BalanceLedger, TokenAmount};
