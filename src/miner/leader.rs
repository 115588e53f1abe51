//! Round-robin leader selection: a drop-in alternative to proof-of-work
//! consensus. Nodes agree on a sorted id set; the node whose id occupies
//! `round % n` is the sole proposer for that round and "solves" blocks at
//! difficulty 1. Not to be mixed with PoW mining within a single chain.

use crate::blockchain::block::Block;
use crate::mempool::Mempool;
use crate::tx::Transaction;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct LeaderSchedule {
    node_ids: Vec<String>,
}

impl LeaderSchedule {
    pub fn new(mut node_ids: Vec<String>) -> Self {
        node_ids.sort();
        Self { node_ids }
    }

    pub fn leader_for_round(&self, round: u64) -> Option<&str> {
        if self.node_ids.is_empty() {
            return None;
        }
        let idx = (round % self.node_ids.len() as u64) as usize;
        Some(&self.node_ids[idx])
    }

    pub fn is_leader(&self, node_id: &str, round: u64) -> bool {
        self.leader_for_round(round) == Some(node_id)
    }

    /// Propose the next block at difficulty 1. Returns `None` if `node_id`
    /// is not the leader for `round`.
    pub fn propose(
        &self,
        node_id: &str,
        round: u64,
        parent: &Block,
        mempool: &Mempool,
        block_reward: u64,
        max_candidate_txs: usize,
    ) -> Option<Block> {
        if !self.is_leader(node_id, round) {
            return None;
        }
        let candidates = mempool.top(max_candidate_txs);
        let total_fees: u64 = candidates.iter().map(|tx| tx.fee).sum();
        let coinbase = Transaction::coinbase(node_id, block_reward + total_fees);

        let mut transactions = Vec::with_capacity(candidates.len() + 1);
        transactions.push(coinbase);
        transactions.extend(candidates);

        let mut block = Block::new(parent.index + 1, parent.hash(), now(), 1, transactions);
        while !block.is_valid_pow() {
            block.nonce += 1;
        }
        Some(block)
    }
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_rotates_through_sorted_ids() {
        let schedule = LeaderSchedule::new(vec!["c".into(), "a".into(), "b".into()]);
        assert_eq!(schedule.leader_for_round(0), Some("a"));
        assert_eq!(schedule.leader_for_round(1), Some("b"));
        assert_eq!(schedule.leader_for_round(2), Some("c"));
        assert_eq!(schedule.leader_for_round(3), Some("a"));
    }

    #[test]
    fn non_leader_propose_returns_none() {
        let schedule = LeaderSchedule::new(vec!["a".into(), "b".into()]);
        let mempool = Mempool::new(10, 3600);
        let genesis = Block::genesis(0, 1);
        assert!(schedule.propose("b", 0, &genesis, &mempool, 10, 10).is_none());
    }

    #[test]
    fn leader_propose_produces_valid_pow_at_difficulty_one() {
        let schedule = LeaderSchedule::new(vec!["a".into(), "b".into()]);
        let mempool = Mempool::new(10, 3600);
        let genesis = Block::genesis(0, 1);
        let block = schedule.propose("a", 0, &genesis, &mempool, 10, 10).unwrap();
        assert!(block.is_valid_pow());
        assert_eq!(block.difficulty, 1);
    }
}
