//! Candidate-block assembly and proof-of-work search. The search loop is
//! cooperatively cancellable: it checks a shared cancel flag and yields to
//! the runtime every [`YIELD_INTERVAL`] hashes so a concurrently delivered
//! block can interrupt it promptly.

pub mod leader;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::blockchain::block::Block;
use crate::blockchain::ledger::Ledger;
use crate::error::MinerError;
use crate::mempool::Mempool;
use crate::tx::Transaction;

/// How often the search loop checks for cancellation and yields to the
/// runtime, in hash attempts.
const YIELD_INTERVAL: u64 = 1000;

/// Shared, cloneable flag used to interrupt an in-progress mining search.
/// A fresh signal is created per attempt; `NodeController` holds the
/// producing half and raises it when a competing block arrives.
#[derive(Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Miner {
    miner_address: String,
    block_reward: u64,
    max_candidate_txs: usize,
    mining: AtomicBool,
}

impl Miner {
    pub fn new(miner_address: impl Into<String>, block_reward: u64, max_candidate_txs: usize) -> Self {
        Self {
            miner_address: miner_address.into(),
            block_reward,
            max_candidate_txs,
            mining: AtomicBool::new(false),
        }
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }

    /// Assemble a candidate from the current tip/mempool and search for a
    /// valid nonce. Returns `Ok(None)` on cancellation or exhausted
    /// `max_iters`; returns `MinerError::AlreadyMining` if another search
    /// is already in flight on this miner.
    pub async fn mine_next(
        &self,
        ledger: &Ledger,
        mempool: &Mempool,
        max_iters: u64,
        cancel: &CancelSignal,
    ) -> Result<Option<Block>, MinerError> {
        if self.mining.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(MinerError::AlreadyMining);
        }
        let result = self.search(ledger, mempool, max_iters, cancel).await;
        self.mining.store(false, Ordering::SeqCst);
        result
    }

    async fn search(
        &self,
        ledger: &Ledger,
        mempool: &Mempool,
        max_iters: u64,
        cancel: &CancelSignal,
    ) -> Result<Option<Block>, MinerError> {
        let parent = ledger.tip();
        let parent_index = parent.index;

        let candidates = mempool.top(self.max_candidate_txs);
        let total_fees: u64 = candidates.iter().map(|tx| tx.fee).sum();
        let coinbase = Transaction::coinbase(&self.miner_address, self.block_reward + total_fees);

        let mut transactions = Vec::with_capacity(candidates.len() + 1);
        transactions.push(coinbase);
        transactions.extend(candidates);

        let mut block = Block::new(parent_index + 1, parent.hash(), now(), parent.difficulty, transactions);

        let mut iterations: u64 = 0;
        loop {
            if block.is_valid_pow() {
                if ledger.tip().index != parent_index {
                    debug!("mining attempt discarded: tip advanced past parent during search");
                    return Err(MinerError::StaleTip);
                }
                info!("mined block {} after {} iteration(s)", block.index, iterations);
                return Ok(Some(block));
            }

            if iterations >= max_iters {
                return Ok(None);
            }

            block.nonce += 1;
            iterations += 1;

            if iterations % YIELD_INTERVAL == 0 {
                if cancel.is_cancelled() {
                    info!("mining cancelled after {} iteration(s)", iterations);
                    return Ok(None);
                }
                tokio::task::yield_now().await;
            }
        }
    }
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// Rolling difficulty adjuster per §4.3: compares the average of the last
/// `adjustment_interval` solve times against `target_block_time`, nudging
/// difficulty by one step, bounded by [min_difficulty, max_difficulty].
pub struct DifficultyRetarget {
    target_block_time: u64,
    adjustment_interval: usize,
    min_difficulty: u64,
    max_difficulty: u64,
    samples: Vec<u64>,
    last_mined_at: AtomicU64,
}

impl DifficultyRetarget {
    pub fn new(target_block_time: u64, adjustment_interval: usize, min_difficulty: u64, max_difficulty: u64) -> Self {
        Self {
            target_block_time,
            adjustment_interval,
            min_difficulty,
            max_difficulty,
            samples: Vec::new(),
            last_mined_at: AtomicU64::new(now()),
        }
    }

    /// Record a solve and return the adjusted difficulty, if a retarget
    /// was due this sample; `current` is returned unchanged otherwise.
    pub fn record_solve(&mut self, current: u64) -> u64 {
        let at = now();
        let prev = self.last_mined_at.swap(at, Ordering::SeqCst);
        let solve_time = at.saturating_sub(prev).max(1);
        self.samples.push(solve_time);

        if self.samples.len() < self.adjustment_interval {
            return current;
        }

        let average: f64 = self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64;
        self.samples.clear();

        let target = self.target_block_time as f64;
        if average < target * 0.5 {
            (current + 1).min(self.max_difficulty)
        } else if average > target * 2.0 {
            current.saturating_sub(1).max(self.min_difficulty)
        } else {
            current
        }
    }
}
