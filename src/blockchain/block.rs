use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::merkle;
use crate::tx::Transaction;

pub const GENESIS_PREV_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";
pub const GENESIS_SENDER: &str = "GENESIS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    #[serde(rename = "previous_hash")]
    pub prev_hash: String,
    pub timestamp: u64,
    pub nonce: u64,
    pub difficulty: u64,
    pub merkle_root: String,
    pub transactions: Vec<Transaction>,
}

/// Fields hashed for a block's identity — the header fields only, in
/// canonical (sorted-key, whitespace-free) encoding. Transactions are
/// represented exclusively through `merkle_root`.
#[derive(Serialize)]
struct HashableHeader<'a> {
    index: u64,
    merkle_root: &'a str,
    prev_hash: &'a str,
    timestamp: u64,
    nonce: u64,
    difficulty: u64,
}

impl Block {
    pub fn new(
        index: u64,
        prev_hash: String,
        timestamp: u64,
        difficulty: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        let merkle_root = Self::compute_merkle_root(&transactions);
        Self {
            index,
            prev_hash,
            timestamp,
            nonce: 0,
            difficulty,
            merkle_root,
            transactions,
        }
    }

    pub fn compute_merkle_root(transactions: &[Transaction]) -> String {
        let leaves: Vec<String> = transactions.iter().map(Transaction::hash).collect();
        merkle::compute_root(&leaves)
    }

    pub fn hash(&self) -> String {
        crypto::sha256_hex_of_canonical(&HashableHeader {
            index: self.index,
            merkle_root: &self.merkle_root,
            prev_hash: &self.prev_hash,
            timestamp: self.timestamp,
            nonce: self.nonce,
            difficulty: self.difficulty,
        })
    }

    /// Whether `hash` begins with `difficulty` hex zero characters.
    pub fn meets_difficulty(hash: &str, difficulty: u64) -> bool {
        let zeros = difficulty as usize;
        hash.len() >= zeros && hash.as_bytes()[..zeros].iter().all(|&b| b == b'0')
    }

    pub fn is_valid_pow(&self) -> bool {
        Self::meets_difficulty(&self.hash(), self.difficulty)
    }

    pub fn merkle_root_matches(&self) -> bool {
        self.merkle_root == Self::compute_merkle_root(&self.transactions)
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    pub fn has_valid_coinbase(&self) -> bool {
        matches!(self.coinbase(), Some(tx) if tx.is_coinbase())
    }

    pub fn total_fees(&self) -> u64 {
        self.transactions.iter().skip(1).map(|tx| tx.fee).sum()
    }

    pub fn genesis(timestamp: u64, difficulty: u64) -> Self {
        let coinbase = Transaction::coinbase(GENESIS_SENDER, 0);
        Self::new(0, GENESIS_PREV_HASH.to_string(), timestamp, difficulty, vec![coinbase])
    }
}
