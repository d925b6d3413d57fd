//! # Peer Messages
//!
//! The two frames nodes exchange, as JSON objects tagged by `type`:
//!
//! ```text
//! { "type": "CHAIN",     "chain": [Block, ...] }
//! { "type": "NEW_BLOCK", "block": Block }
//! ```
//!
//! Blocks inside a frame are decoded field for field; the declared `hash`
//! is kept, never recomputed. Anything that does not parse as one of the
//! two shapes is a [`serde_json::Error`] for the caller to drop.

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

use crate::storage::Block;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    /// A full chain snapshot, offered for replacement.
    #[serde(rename = "CHAIN")]
    Chain { chain: Vec<Block> },

    /// A single block, offered for append.
    #[serde(rename = "NEW_BLOCK")]
    NewBlock { block: Block },
}

impl PeerMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn decode_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encode into a WebSocket text frame. Frames are cheap to clone, so a
    /// broadcast encodes once and clones per peer.
    pub fn to_frame(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::text(self.encode()?))
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Chain { .. } => "CHAIN",
            PeerMessage::NewBlock { .. } => "NEW_BLOCK",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Chain, Payload};
    use serde_json::{json, Value};

    #[test]
    fn new_block_wire_shape() {
        let block = Block::seal(1, "1700000000000", Payload::text("hello"), Block::genesis().hash());
        let encoded = PeerMessage::NewBlock {
            block: block.clone(),
        }
        .encode()
        .unwrap();

        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "NEW_BLOCK");
        assert_eq!(value["block"]["previousHash"], block.previous_hash());
        assert_eq!(value["block"]["data"], "hello");
    }

    #[test]
    fn chain_wire_shape() {
        let mut chain = Chain::new();
        chain.append_new("1", Payload::text("a"));
        let encoded = PeerMessage::Chain {
            chain: chain.blocks().to_vec(),
        }
        .encode()
        .unwrap();

        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "CHAIN");
        assert_eq!(value["chain"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["chain"][0]["index"], 0);
    }

    #[test]
    fn decodes_frames_from_other_implementations() {
        let text = json!({
            "type": "NEW_BLOCK",
            "block": {
                "index": 1,
                "timestamp": "1700000000000",
                "data": { "message": "hi", "from": "ab" },
                "previousHash": "0",
                "hash": "39d8897b2ab5cfe341943b29436903c71a68c2a4406d975f32753a7f407d3fda"
            }
        })
        .to_string();

        match PeerMessage::decode(&text).unwrap() {
            PeerMessage::NewBlock { block } => {
                assert_eq!(
                    block.payload().canonical_json(),
                    r#"{"message":"hi","from":"ab"}"#
                );
                assert!(block.has_valid_hash());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn payload_key_order_survives_decode() {
        let text = r#"{"type":"NEW_BLOCK","block":{"index":1,"timestamp":"t","data":{"z":1,"a":2,"m":[{"y":0,"b":1}]},"previousHash":"0","hash":"h"}}"#;
        let PeerMessage::NewBlock { block } = PeerMessage::decode(text).unwrap() else {
            panic!("expected NEW_BLOCK");
        };
        assert_eq!(
            block.payload().canonical_json(),
            r#"{"z":1,"a":2,"m":[{"y":0,"b":1}]}"#
        );
    }

    #[test]
    fn declared_hash_is_not_recomputed() {
        let text = r#"{"type":"NEW_BLOCK","block":{"index":1,"timestamp":"t","data":"x","previousHash":"0","hash":"bogus"}}"#;
        let PeerMessage::NewBlock { block } = PeerMessage::decode(text).unwrap() else {
            panic!("expected NEW_BLOCK");
        };
        assert_eq!(block.hash(), "bogus");
    }

    #[test]
    fn malformed_and_unknown_frames_fail_to_decode() {
        for text in [
            "not json",
            "{}",
            r#"{"type":"PING"}"#,
            r#"{"type":"CHAIN"}"#,
            r#"{"type":"NEW_BLOCK","block":{"index":"one"}}"#,
        ] {
            assert!(PeerMessage::decode(text).is_err(), "{text} decoded");
        }
    }

    #[test]
    fn binary_frames_decode_like_text() {
        let msg = PeerMessage::Chain {
            chain: vec![Block::genesis()],
        };
        let bytes = msg.encode().unwrap().into_bytes();
        assert_eq!(PeerMessage::decode_slice(&bytes).unwrap(), msg);
    }

    #[test]
    fn frame_is_text() {
        let frame = PeerMessage::Chain {
            chain: vec![Block::genesis()],
        }
        .to_frame()
        .unwrap();
        assert!(frame.is_text());
        assert_eq!(
            PeerMessage::Chain {
                chain: Vec::new()
            }
            .kind(),
            "CHAIN"
        );
    }
}
