//! Wire envelope. Five kinds, matching §6: a bare handshake line followed
//! by a stream of tagged envelopes, one per newline-terminated JSON line.

use serde::{Deserialize, Serialize};

use crate::blockchain::block::Block;
use crate::tx::Transaction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(rename = "type")]
    pub kind: HandshakeKind,
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HandshakeKind {
    #[serde(rename = "HANDSHAKE")]
    Handshake,
}

impl Handshake {
    pub fn new(node_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self { kind: HandshakeKind::Handshake, node_id: node_id.into(), host: host.into(), port }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "NEW_TX")]
    NewTx { data: NewTxData, msg_id: String, sender_id: String },
    #[serde(rename = "NEW_BLOCK")]
    NewBlock { data: NewBlockData, msg_id: String, sender_id: String },
    #[serde(rename = "GET_CHAIN")]
    GetChain { data: EmptyData, msg_id: String, sender_id: String },
    #[serde(rename = "CHAIN_RESPONSE")]
    ChainResponse { data: ChainResponseData, msg_id: String, sender_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTxData {
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlockData {
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmptyData {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainResponseData {
    pub difficulty: u64,
    pub chain: Vec<Block>,
}

impl Envelope {
    pub fn msg_id(&self) -> &str {
        match self {
            Envelope::NewTx { msg_id, .. }
            | Envelope::NewBlock { msg_id, .. }
            | Envelope::GetChain { msg_id, .. }
            | Envelope::ChainResponse { msg_id, .. } => msg_id,
        }
    }

    pub fn sender_id(&self) -> &str {
        match self {
            Envelope::NewTx { sender_id, .. }
            | Envelope::NewBlock { sender_id, .. }
            | Envelope::GetChain { sender_id, .. }
            | Envelope::ChainResponse { sender_id, .. } => sender_id,
        }
    }

    pub fn new_tx(tx: Transaction, sender_id: impl Into<String>) -> Self {
        Envelope::NewTx { data: NewTxData { transaction: tx }, msg_id: new_msg_id(), sender_id: sender_id.into() }
    }

    pub fn new_block(block: Block, sender_id: impl Into<String>) -> Self {
        Envelope::NewBlock { data: NewBlockData { block }, msg_id: new_msg_id(), sender_id: sender_id.into() }
    }

    pub fn get_chain(sender_id: impl Into<String>) -> Self {
        Envelope::GetChain { data: EmptyData::default(), msg_id: new_msg_id(), sender_id: sender_id.into() }
    }

    pub fn chain_response(difficulty: u64, chain: Vec<Block>, sender_id: impl Into<String>) -> Self {
        Envelope::ChainResponse {
            data: ChainResponseData { difficulty, chain },
            msg_id: new_msg_id(),
            sender_id: sender_id.into(),
        }
    }
}

pub fn new_msg_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips_through_json() {
        let h = Handshake::new("node-a", "127.0.0.1", 9001);
        let json = serde_json::to_string(&h).unwrap();
        let back: Handshake = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node_id, "node-a");
        assert_eq!(back.port, 9001);
    }

    #[test]
    fn envelope_tag_selects_the_right_variant() {
        let env = Envelope::get_chain("node-a");
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"type\":\"GET_CHAIN\""));
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Envelope::GetChain { .. }));
    }

    #[test]
    fn msg_ids_are_unique_per_envelope() {
        let a = Envelope::get_chain("node-a");
        let b = Envelope::get_chain("node-a");
        assert_ne!(a.msg_id(), b.msg_id());
    }
}
