//! Domain error types. Boundary code (network I/O, config loading, `main`)
//! uses `anyhow`; the Ledger and Mempool return these typed errors so callers
//! can match on cause instead of parsing a string.

use thiserror::Error;

/// Mirrors the error kinds named in the node's error-handling design:
/// structural defects reject a block outright, state defects reject a
/// transaction or block without partial application, and `ChainTooShort`
/// is the specific reason `replace_chain` refuses a non-longer candidate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("structurally invalid block: {0}")]
    StructuralInvalid(String),

    #[error("state-invalid transaction: {0}")]
    StateInvalid(String),

    #[error("candidate chain is not longer than the current chain")]
    ChainTooShort,

    #[error("block or transaction already applied")]
    Duplicate,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already present in mempool")]
    Duplicate,

    #[error("fee too low to displace the current minimum-fee entry")]
    FeeTooLow,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MinerError {
    #[error("mining was cancelled before a solution was found")]
    Cancelled,

    #[error("a mining attempt is already in progress")]
    AlreadyMining,

    #[error("tip advanced past the candidate's parent while mining; result discarded")]
    StaleTip,
}
