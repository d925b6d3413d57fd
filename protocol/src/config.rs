//! # Protocol Configuration & Constants
//!
//! Every magic number in Quill lives here. Genesis fields and the hash
//! encoding version are consensus-critical: two nodes that disagree on any
//! of them will reject each other's chains forever, silently.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate-level protocol version string, reported by `/status`.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Version of the content-hash encoding contract.
///
/// Version 1: `SHA-256(decimal(index) || timestamp || compact_json(data) ||
/// previous_hash)`, lowercase hex. Object keys inside `data` keep the order
/// in which they were received or constructed. Any implementation that wants
/// to interoperate must reproduce these bytes exactly.
pub const HASH_ENCODING_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Genesis
// ---------------------------------------------------------------------------

/// Timestamp token of the genesis block (Unix milliseconds, as a string).
pub const GENESIS_TIMESTAMP: &str = "1725000000000";

/// Payload of the genesis block, stored as a JSON string.
pub const GENESIS_DATA: &str = "Genesis Block";

/// Sentinel `previous_hash` carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

/// Interval between unconditional full-chain broadcasts.
pub const GOSSIP_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on dialing a peer, TCP connect and WebSocket handshake
/// together.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames a single peer link may buffer before new frames to that peer are
/// dropped. Gossip re-sends the whole chain, so a dropped frame only delays
/// convergence.
pub const PEER_SEND_QUEUE_CAPACITY: usize = 64;

/// Ledger events buffered per subscriber before the slowest one lags.
pub const LEDGER_EVENT_CAPACITY: usize = 256;

/// Default WebSocket port for peer links.
pub const DEFAULT_P2P_PORT: u16 = 6001;

/// Default HTTP API port.
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9742;

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// Decimal places of the credit token. Balances are stored in base units.
pub const TOKEN_DECIMALS: u32 = 18;

/// Whole tokens in the initial supply. Informational; nothing mints it.
pub const INITIAL_SUPPLY_TOKENS: u128 = 21_000_000;

/// Whole tokens credited to the author of every accepted post.
pub const POST_REWARD: u128 = 10;

/// Number of base units in one whole token (`10^TOKEN_DECIMALS`).
pub const fn base_units_per_token() -> u128 {
    10u128.pow(TOKEN_DECIMALS)
}

/// The initial supply expressed in base units.
pub const fn initial_supply_base_units() -> u128 {
    INITIAL_SUPPLY_TOKENS * base_units_per_token()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_supply_fits_in_base_units() {
        assert_eq!(base_units_per_token(), 1_000_000_000_000_000_000);
        assert_eq!(
            initial_supply_base_units(),
            21_000_000_000_000_000_000_000_000
        );
    }

    #[test]
    fn gossip_interval_is_five_seconds() {
        assert_eq!(GOSSIP_INTERVAL.as_secs(), 5);
    }
}
