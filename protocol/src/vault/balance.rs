//! # Post Credits
//!
//! Authors earn tokens for posting. Balances are kept per hex public key in
//! a sled tree, in base units: one whole token is
//! `10^`[`TOKEN_DECIMALS`](crate::config::TOKEN_DECIMALS) base units.
//!
//! Balances are node-local bookkeeping. They are not part of the chain and
//! are not replicated; a node credits the author of each post it produces.

use std::fmt;

use serde::{Deserialize, Serialize};
use sled::Tree;
use thiserror::Error;

use crate::config::base_units_per_token;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BalanceError {
    /// Crediting would exceed `u128::MAX` base units.
    #[error("balance overflow for {key}: current {current}, credit {credit} tokens")]
    Overflow {
        key: String,
        current: TokenAmount,
        credit: u128,
    },

    #[error("corrupt balance record for {0}")]
    Corrupt(String),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
}

// ---------------------------------------------------------------------------
// TokenAmount
// ---------------------------------------------------------------------------

/// An amount in base units. Displays as a plain decimal integer, which is
/// also how the HTTP API renders it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenAmount(pub u128);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    /// `whole` tokens in base units, or `None` on overflow.
    pub fn from_whole(whole: u128) -> Option<Self> {
        whole.checked_mul(base_units_per_token()).map(TokenAmount)
    }

    pub fn base_units(self) -> u128 {
        self.0
    }

    /// Whole-token part, rounding down.
    pub fn whole_tokens(self) -> u128 {
        self.0 / base_units_per_token()
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// BalanceLedger
// ---------------------------------------------------------------------------

/// Token balances keyed by public key.
#[derive(Debug, Clone)]
pub struct BalanceLedger {
    tree: Tree,
}

impl BalanceLedger {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Current balance of `key`; zero when the key has never been credited.
    pub fn balance(&self, key: &str) -> Result<TokenAmount, BalanceError> {
        let key = key.trim();
        let raw = self.tree.get(key.as_bytes())?;
        decode(key, raw.as_deref())
    }

    /// Add `whole_tokens` to `key` and return the new balance.
    ///
    /// Concurrent credits to the same key are applied one after another via
    /// compare-and-swap; none is lost.
    pub fn credit(&self, key: &str, whole_tokens: u128) -> Result<TokenAmount, BalanceError> {
        let key = key.trim();

        loop {
            let raw = self.tree.get(key.as_bytes())?;
            let current = decode(key, raw.as_deref())?;
            let updated = TokenAmount::from_whole(whole_tokens)
                .and_then(|credit| current.0.checked_add(credit.0))
                .map(TokenAmount)
                .ok_or_else(|| BalanceError::Overflow {
                    key: key.to_string(),
                    current,
                    credit: whole_tokens,
                })?;

            let swapped = self.tree.compare_and_swap(
                key.as_bytes(),
                raw.as_deref(),
                Some(&updated.0.to_be_bytes()[..]),
            )?;
            if swapped.is_ok() {
                return Ok(updated);
            }
        }
    }

    /// Number of keys with a recorded balance.
    pub fn accounts(&self) -> usize {
        self.tree.len()
    }
}

fn decode(key: &str, raw: Option<&[u8]>) -> Result<TokenAmount, BalanceError> {
    match raw {
        None => Ok(TokenAmount::ZERO),
        Some(bytes) => {
            let bytes: [u8; 16] = bytes
                .try_into()
                .map_err(|_| BalanceError::Corrupt(key.to_string()))?;
            Ok(TokenAmount(u128::from_be_bytes(bytes)))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::POST_REWARD;
    use crate::storage::LedgerDb;
    use std::sync::Arc;

    fn ledger() -> BalanceLedger {
        let db = LedgerDb::open_temporary().expect("temp db");
        BalanceLedger::new(db.open_tree("balances").expect("tree"))
    }

    #[test]
    fn unknown_key_has_zero_balance() {
        let balances = ledger();
        assert_eq!(balances.balance("nobody").unwrap(), TokenAmount::ZERO);
        assert_eq!(balances.accounts(), 0);
    }

    #[test]
    fn credit_scales_to_base_units() {
        let balances = ledger();
        let after = balances.credit("ab12", POST_REWARD).unwrap();

        assert_eq!(after.base_units(), 10_000_000_000_000_000_000);
        assert_eq!(after.whole_tokens(), 10);
        assert_eq!(after.to_string(), "10000000000000000000");
        assert_eq!(balances.balance("ab12").unwrap(), after);
    }

    #[test]
    fn credits_accumulate() {
        let balances = ledger();
        balances.credit("ab12", 10).unwrap();
        balances.credit("ab12", 10).unwrap();
        assert_eq!(balances.balance("ab12").unwrap().whole_tokens(), 20);
    }

    #[test]
    fn keys_are_trimmed() {
        let balances = ledger();
        balances.credit("  ab12\n", 1).unwrap();
        assert_eq!(balances.balance("ab12").unwrap().whole_tokens(), 1);
        assert_eq!(balances.balance(" ab12 ").unwrap().whole_tokens(), 1);
    }

    #[test]
    fn overflow_is_an_error_and_leaves_balance_alone() {
        let balances = ledger();
        balances.credit("ab12", 1).unwrap();

        let err = balances.credit("ab12", u128::MAX).unwrap_err();
        assert!(matches!(err, BalanceError::Overflow { .. }));
        assert_eq!(balances.balance("ab12").unwrap().whole_tokens(), 1);
    }

    #[test]
    fn corrupt_record_is_reported() {
        let db = LedgerDb::open_temporary().unwrap();
        let tree = db.open_tree("balances").unwrap();
        tree.insert(b"ab12", b"short".as_slice()).unwrap();

        let balances = BalanceLedger::new(tree);
        assert!(matches!(
            balances.balance("ab12"),
            Err(BalanceError::Corrupt(_))
        ));
    }

    #[test]
    fn concurrent_credits_are_not_lost() {
        let balances = Arc::new(ledger());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let balances = Arc::clone(&balances);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        balances.credit("shared", 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(balances.balance("shared").unwrap().whole_tokens(), 200);
    }
}
