//! Structural block validation: the checks that depend only on the block
//! itself and its declared predecessor, not on ledger state. State-dependent
//! transaction admission (`can_apply`) lives in `blockchain::ledger`.

use crate::blockchain::block::{Block, GENESIS_PREV_HASH};
use crate::error::LedgerError;

pub fn validate_structure(block: &Block, prev: Option<&Block>) -> Result<(), LedgerError> {
    match prev {
        Some(prev) => {
            if block.index != prev.index + 1 {
                return Err(LedgerError::StructuralInvalid(format!(
                    "index {} does not follow previous index {}",
                    block.index, prev.index
                )));
            }
            if block.prev_hash != prev.hash() {
                return Err(LedgerError::StructuralInvalid(
                    "prev_hash does not match previous block's hash".to_string(),
                ));
            }
        }
        None => {
            if block.index != 0 {
                return Err(LedgerError::StructuralInvalid(
                    "non-genesis block submitted without a predecessor".to_string(),
                ));
            }
            if block.prev_hash != GENESIS_PREV_HASH {
                return Err(LedgerError::StructuralInvalid(
                    "genesis prev_hash must be the all-zero sentinel".to_string(),
                ));
            }
        }
    }

    if !block.is_valid_pow() {
        return Err(LedgerError::StructuralInvalid(format!(
            "hash does not meet difficulty {}",
            block.difficulty
        )));
    }

    if !block.merkle_root_matches() {
        return Err(LedgerError::StructuralInvalid(
            "merkle_root does not match transactions".to_string(),
        ));
    }

    if !block.has_valid_coinbase() {
        return Err(LedgerError::StructuralInvalid(
            "first transaction must be a coinbase".to_string(),
        ));
    }

    for tx in block.transactions.iter().skip(1) {
        if tx.is_coinbase() {
            return Err(LedgerError::StructuralInvalid(
                "only the first transaction may be a coinbase".to_string(),
            ));
        }
        if !tx.is_structurally_valid() {
            return Err(LedgerError::StateInvalid(format!(
                "transaction {} is not structurally valid",
                tx.hash()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::Transaction;

    fn mine(mut block: Block) -> Block {
        while !block.is_valid_pow() {
            block.nonce += 1;
        }
        block
    }

    #[test]
    fn genesis_validates_with_no_predecessor() {
        let genesis = mine(Block::genesis(0, 1));
        assert!(validate_structure(&genesis, None).is_ok());
    }

    #[test]
    fn wrong_index_is_rejected() {
        let genesis = mine(Block::genesis(0, 1));
        let next = mine(Block::new(2, genesis.hash(), 1, 1, vec![Transaction::coinbase("m", 1)]));
        assert!(matches!(
            validate_structure(&next, Some(&genesis)),
            Err(LedgerError::StructuralInvalid(_))
        ));
    }

    #[test]
    fn wrong_prev_hash_is_rejected() {
        let genesis = mine(Block::genesis(0, 1));
        let next = mine(Block::new(1, "deadbeef".into(), 1, 1, vec![Transaction::coinbase("m", 1)]));
        assert!(matches!(
            validate_structure(&next, Some(&genesis)),
            Err(LedgerError::StructuralInvalid(_))
        ));
    }

    #[test]
    fn unmet_pow_is_rejected() {
        let genesis = Block::genesis(0, 10); // difficulty 10, not mined
        assert!(matches!(
            validate_structure(&genesis, None),
            Err(LedgerError::StructuralInvalid(_))
        ));
    }

    #[test]
    fn tampered_merkle_root_is_rejected() {
        let mut genesis = mine(Block::genesis(0, 1));
        genesis.merkle_root = "0".repeat(64);
        assert!(matches!(
            validate_structure(&genesis, None),
            Err(LedgerError::StructuralInvalid(_))
        ));
    }

    #[test]
    fn second_coinbase_in_block_is_rejected() {
        let extra_coinbase = Transaction::coinbase("attacker", 500);
        let block = mine(Block::new(0, GENESIS_PREV_HASH.to_string(), 0, 1, vec![
            Transaction::coinbase(crate::blockchain::block::GENESIS_SENDER, 0),
            extra_coinbase,
        ]));
        assert!(matches!(
            validate_structure(&block, None),
            Err(LedgerError::StructuralInvalid(_))
        ));
    }
}
