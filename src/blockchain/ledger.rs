//! Authoritative chain plus the account state derived from it. State is a
//! cache: it is always rebuildable by replaying the chain from genesis, and
//! is never trusted when it arrives over the wire.

use std::collections::HashMap;
use std::sync::RwLock;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::blockchain::block::Block;
use crate::blockchain::validation;
use crate::error::LedgerError;
use crate::tx::Transaction;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountState {
    pub balance: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone)]
pub struct ReplaceOutcome {
    pub new_length: u64,
    pub orphans: Vec<Block>,
}

pub struct Ledger {
    chain: RwLock<Vec<Block>>,
    state: RwLock<HashMap<String, AccountState>>,
}

impl Ledger {
    pub fn new(genesis: Block) -> Self {
        let mut state = HashMap::new();
        apply_block_to_state(&mut state, &genesis).expect("genesis must apply cleanly");
        Self {
            chain: RwLock::new(vec![genesis]),
            state: RwLock::new(state),
        }
    }

    pub fn length(&self) -> u64 {
        self.chain.read().unwrap().len() as u64
    }

    pub fn tip(&self) -> Block {
        self.chain.read().unwrap().last().expect("chain always has genesis").clone()
    }

    pub fn genesis(&self) -> Block {
        self.chain.read().unwrap().first().expect("chain always has genesis").clone()
    }

    pub fn block_at(&self, index: u64) -> Option<Block> {
        self.chain.read().unwrap().get(index as usize).cloned()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.chain.read().unwrap().clone()
    }

    pub fn balance(&self, addr: &str) -> u64 {
        self.state.read().unwrap().get(addr).map(|s| s.balance).unwrap_or(0)
    }

    pub fn nonce(&self, addr: &str) -> u64 {
        self.state.read().unwrap().get(addr).map(|s| s.nonce).unwrap_or(0)
    }

    /// Whether `tx` may be applied against the *current live* state.
    pub fn can_apply(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let state = self.state.read().unwrap();
        can_apply_against(&state, tx)
    }

    /// Append `block` to the tip. Preconditions in §4.1: index/prev_hash
    /// link correctly, PoW and merkle checks pass, and every non-coinbase
    /// transaction applies against the state snapshot advanced by earlier
    /// transactions in the same block.
    pub fn append(&self, block: Block) -> Result<(), LedgerError> {
        let (expected_index, prev) = {
            let chain = self.chain.read().unwrap();
            (chain.len() as u64, chain.last().unwrap().clone())
        };

        if block.index != expected_index {
            return Err(LedgerError::StructuralInvalid(format!(
                "expected index {} but got {}",
                expected_index, block.index
            )));
        }
        validation::validate_structure(&block, Some(&prev))?;

        {
            let state = self.state.read().unwrap();
            check_block_against_state(&state, &block)?;
        }

        {
            let mut state = self.state.write().unwrap();
            apply_block_to_state(&mut state, &block)?;
        }
        self.chain.write().unwrap().push(block.clone());
        info!("appended block {} ({})", block.index, &block.hash()[..8]);
        Ok(())
    }

    /// Replace the chain with `candidate` iff it is strictly longer and
    /// fully valid end to end. State is rebuilt from scratch by replay;
    /// blocks present in the old chain but absent (by hash) from the new
    /// one are reported as orphans.
    pub fn replace_chain(&self, candidate: Vec<Block>) -> Result<ReplaceOutcome, LedgerError> {
        let current_len = self.length();
        if candidate.len() as u64 <= current_len {
            return Err(LedgerError::ChainTooShort);
        }

        let genesis = self.genesis();
        if candidate.first().map(|b| b.hash()) != Some(genesis.hash()) {
            return Err(LedgerError::StructuralInvalid(
                "candidate chain does not share our genesis".to_string(),
            ));
        }

        let mut rebuilt_state: HashMap<String, AccountState> = HashMap::new();
        let mut prev: Option<&Block> = None;
        for block in &candidate {
            validation::validate_structure(block, prev)?;
            check_block_against_state(&rebuilt_state, block)?;
            apply_block_to_state(&mut rebuilt_state, block)?;
            prev = Some(block);
        }

        let new_hashes: std::collections::HashSet<String> =
            candidate.iter().map(Block::hash).collect();
        let orphans: Vec<Block> = self
            .chain
            .read()
            .unwrap()
            .iter()
            .filter(|b| !new_hashes.contains(&b.hash()))
            .cloned()
            .collect();

        let new_length = candidate.len() as u64;
        *self.chain.write().unwrap() = candidate;
        *self.state.write().unwrap() = rebuilt_state;

        info!(
            "replaced chain: {} -> {} blocks, {} orphan(s)",
            current_len,
            new_length,
            orphans.len()
        );
        Ok(ReplaceOutcome { new_length, orphans })
    }
}

fn can_apply_against(state: &HashMap<String, AccountState>, tx: &Transaction) -> Result<(), LedgerError> {
    if tx.is_coinbase() {
        if !tx.is_structurally_valid() {
            return Err(LedgerError::StructuralInvalid("malformed coinbase".to_string()));
        }
        return Ok(());
    }

    if !tx.is_structurally_valid() {
        return Err(LedgerError::StateInvalid("signature or amount invalid".to_string()));
    }

    let account = state.get(&tx.sender).cloned().unwrap_or_default();
    let required = tx.amount.checked_add(tx.fee).ok_or_else(|| {
        LedgerError::StateInvalid("amount + fee overflows".to_string())
    })?;
    if account.balance < required {
        return Err(LedgerError::StateInvalid(format!(
            "insufficient balance: have {}, need {}",
            account.balance, required
        )));
    }
    if tx.nonce != account.nonce {
        return Err(LedgerError::StateInvalid(format!(
            "nonce mismatch: tx has {}, expected {}",
            tx.nonce, account.nonce
        )));
    }
    Ok(())
}

/// Validate every non-coinbase transaction in `block` against a state
/// snapshot advanced in-order by the earlier transactions in the same
/// block, without mutating `state` itself.
fn check_block_against_state(state: &HashMap<String, AccountState>, block: &Block) -> Result<(), LedgerError> {
    let mut scratch = state.clone();
    for (i, tx) in block.transactions.iter().enumerate() {
        if i == 0 {
            continue; // coinbase validated structurally elsewhere
        }
        can_apply_against(&scratch, tx)?;
        apply_tx_to_state(&mut scratch, tx);
    }
    Ok(())
}

fn apply_tx_to_state(state: &mut HashMap<String, AccountState>, tx: &Transaction) {
    if tx.is_coinbase() {
        let receiver = state.entry(tx.receiver.clone()).or_default();
        receiver.balance += tx.amount;
        return;
    }
    {
        let sender = state.entry(tx.sender.clone()).or_default();
        sender.balance -= tx.amount + tx.fee;
        sender.nonce += 1;
    }
    let receiver = state.entry(tx.receiver.clone()).or_default();
    receiver.balance += tx.amount;
}

fn apply_block_to_state(state: &mut HashMap<String, AccountState>, block: &Block) -> Result<(), LedgerError> {
    for tx in &block.transactions {
        apply_tx_to_state(state, tx);
    }
    debug!("applied block {} to state ({} txs)", block.index, block.transactions.len());
    Ok(())
}
