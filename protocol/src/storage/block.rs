//! # Block Structure
//!
//! A block is one sealed record of the ledger: a position, a caller-supplied
//! timestamp token, an opaque JSON payload, the hash of its predecessor, and
//! its own content hash.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  index: u64          position in the chain   │
//! │  timestamp: String   opaque, caller supplied │
//! │  data: Payload       opaque JSON value       │
//! │  previousHash: String  "0" for genesis       │
//! │  hash: String        SHA-256 hex of the above│
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! ```text
//! hash = hex(SHA-256( decimal(index) || timestamp || compact_json(data) || previousHash ))
//! ```
//!
//! The four parts are concatenated with no separators. `compact_json` is
//! serde_json's compact writer with object keys in the order they were
//! received or constructed (the `preserve_order` feature). That makes the
//! hash sensitive to key order: two payloads that are equal as JSON values
//! but were built with different key orders hash differently. Validation
//! still works across nodes because a receiver re-serializes exactly the
//! order the sender used. This is encoding version
//! [`HASH_ENCODING_VERSION`](crate::config::HASH_ENCODING_VERSION).
//!
//! ## Mutability
//!
//! Fields are private. A block is either sealed here (hash computed) or
//! reconstructed from a wire/disk record with its declared hash kept
//! verbatim. Nothing ever re-seals a received block; the chain's append and
//! validation checks recompute the hash and compare.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{GENESIS_DATA, GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP};
use crate::crypto::hash::sha256_hex_multi;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Opaque block payload.
///
/// The chain never looks inside. Only the producer (the HTTP layer) and
/// consumers like the `/posts` listing interpret its shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    /// Wrap an arbitrary JSON value.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// A payload consisting of a single JSON string.
    pub fn text(text: impl Into<String>) -> Self {
        Self(Value::String(text.into()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Look up a string field when the payload is a JSON object.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// The exact bytes fed into the content hash.
    pub fn canonical_json(&self) -> String {
        // `Display` for `Value` is the compact writer and cannot fail.
        self.0.to_string()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A sealed ledger record.
///
/// Serializes to the wire shape
/// `{ index, timestamp, data, previousHash, hash }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    index: u64,
    timestamp: String,
    #[serde(rename = "data")]
    payload: Payload,
    previous_hash: String,
    hash: String,
}

impl Block {
    /// Build a block and compute its hash.
    ///
    /// Pure and deterministic: the same four inputs always yield the same
    /// block, on every node.
    pub fn seal(
        index: u64,
        timestamp: impl Into<String>,
        payload: Payload,
        previous_hash: impl Into<String>,
    ) -> Self {
        let timestamp = timestamp.into();
        let previous_hash = previous_hash.into();
        let hash = content_hash(index, &timestamp, &payload, &previous_hash);

        Self {
            index,
            timestamp,
            payload,
            previous_hash,
            hash,
        }
    }

    /// Reassemble a block from its five fields without recomputing the hash.
    ///
    /// This is how a block received from a peer is reconstructed: the
    /// declared `hash` is kept exactly as sent, so a sender that lies about
    /// it is caught by the chain's hash check rather than papered over here.
    pub fn from_parts(
        index: u64,
        timestamp: impl Into<String>,
        payload: Payload,
        previous_hash: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            index,
            timestamp: timestamp.into(),
            payload,
            previous_hash: previous_hash.into(),
            hash: hash.into(),
        }
    }

    /// The canonical genesis block. Identical on every node.
    pub fn genesis() -> Self {
        Self::seal(
            0,
            GENESIS_TIMESTAMP,
            Payload::text(GENESIS_DATA),
            GENESIS_PREVIOUS_HASH,
        )
    }

    /// Recompute the content hash from the other four fields.
    pub fn compute_hash(&self) -> String {
        content_hash(
            self.index,
            &self.timestamp,
            &self.payload,
            &self.previous_hash,
        )
    }

    /// `true` when the stored hash matches the recomputed one.
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// `true` when this block is bit-for-bit the canonical genesis block.
    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// First 12 hex characters of the hash, for log lines.
    pub fn short_hash(&self) -> &str {
        self.hash.get(..12).unwrap_or(&self.hash)
    }
}

// ---------------------------------------------------------------------------
// Hash Computation
// ---------------------------------------------------------------------------

/// Content hash over `(index, timestamp, payload, previous_hash)`.
///
/// See the module docs for the exact byte layout.
pub fn content_hash(index: u64, timestamp: &str, payload: &Payload, previous_hash: &str) -> String {
    let index = index.to_string();
    let data = payload.canonical_json();
    sha256_hex_multi(&[
        index.as_bytes(),
        timestamp.as_bytes(),
        data.as_bytes(),
        previous_hash.as_bytes(),
    ])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Hash of the genesis block under encoding version 1.
    const GENESIS_HASH: &str = "492fbf4ba6a9408cf718aa221994603ee1b1e6cf7aa2e93639a5a2b8af52ffba";

    #[test]
    fn genesis_block_properties() {
        let genesis = Block::genesis();
        assert_eq!(genesis.index(), 0);
        assert_eq!(genesis.timestamp(), "1725000000000");
        assert_eq!(genesis.payload(), &Payload::text("Genesis Block"));
        assert_eq!(genesis.previous_hash(), "0");
        assert!(genesis.is_genesis());
    }

    #[test]
    fn genesis_hash_matches_encoding_v1() {
        assert_eq!(Block::genesis().hash(), GENESIS_HASH);
    }

    #[test]
    fn sealed_block_matches_known_vector() {
        let block = Block::seal(1, "1700000000000", Payload::text("hello"), GENESIS_HASH);
        assert_eq!(
            block.hash(),
            "3ffe69b0cdc1a7bd655b39b9def8e664ed5c54007ed289b7c1f8ba621d4186a4"
        );
    }

    #[test]
    fn object_payload_keeps_insertion_order_in_hash() {
        let payload = Payload::new(json!({ "message": "hi", "from": "ab" }));
        assert_eq!(payload.canonical_json(), r#"{"message":"hi","from":"ab"}"#);

        let block = Block::seal(1, "1700000000000", payload, "0");
        assert_eq!(
            block.hash(),
            "39d8897b2ab5cfe341943b29436903c71a68c2a4406d975f32753a7f407d3fda"
        );
    }

    #[test]
    fn key_order_changes_the_hash() {
        let a = Block::seal(1, "t", Payload::new(json!({ "a": 1, "b": 2 })), "0");
        let b = Block::seal(1, "t", Payload::new(json!({ "b": 2, "a": 1 })), "0");
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn seal_is_deterministic() {
        let a = Block::seal(3, "123", Payload::new(json!([1, 2, 3])), "abc");
        let b = Block::seal(3, "123", Payload::new(json!([1, 2, 3])), "abc");
        assert_eq!(a, b);
        assert!(a.has_valid_hash());
    }

    #[test]
    fn from_parts_preserves_declared_hash() {
        let block = Block::from_parts(1, "t", Payload::text("x"), GENESIS_HASH, "deadbeef");
        assert_eq!(block.hash(), "deadbeef");
        assert!(!block.has_valid_hash());
    }

    #[test]
    fn every_field_feeds_the_hash() {
        let base = Block::seal(1, "t", Payload::text("x"), "p");
        let variants = [
            Block::seal(2, "t", Payload::text("x"), "p"),
            Block::seal(1, "u", Payload::text("x"), "p"),
            Block::seal(1, "t", Payload::text("y"), "p"),
            Block::seal(1, "t", Payload::text("x"), "q"),
        ];
        for variant in variants {
            assert_ne!(base.hash(), variant.hash());
        }
    }

    #[test]
    fn wire_shape_uses_camel_case_and_data() {
        let block = Block::seal(1, "t", Payload::new(json!({ "message": "m" })), "p");
        let value = serde_json::to_value(&block).expect("serialize");

        assert_eq!(value["index"], 1);
        assert_eq!(value["timestamp"], "t");
        assert_eq!(value["data"]["message"], "m");
        assert_eq!(value["previousHash"], "p");
        assert_eq!(value["hash"], block.hash());
    }

    #[test]
    fn deserializing_keeps_the_sender_hash() {
        let raw = json!({
            "index": 1,
            "timestamp": "t",
            "data": "x",
            "previousHash": "p",
            "hash": "not-a-real-hash"
        });
        let block: Block = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(block.hash(), "not-a-real-hash");
        assert!(!block.has_valid_hash());
    }

    #[test]
    fn short_hash_is_prefix() {
        let genesis = Block::genesis();
        assert_eq!(genesis.short_hash(), &GENESIS_HASH[..12]);

        let odd = Block::from_parts(0, "t", Payload::text("x"), "0", "abc");
        assert_eq!(odd.short_hash(), "abc");
    }

    #[test]
    fn str_field_reads_object_payloads_only() {
        let obj = Payload::new(json!({ "message": "hello", "n": 1 }));
        assert_eq!(obj.str_field("message"), Some("hello"));
        assert_eq!(obj.str_field("n"), None);
        assert_eq!(Payload::text("hello").str_field("message"), None);
    }
}
