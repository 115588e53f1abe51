//! Process configuration: CLI flags with environment-variable overrides,
//! mirroring the grounding binary's `Args` + manual env-override pattern
//! but expressed declaratively via `clap`'s `env` feature.

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ConsensusMode {
    Pow,
    RoundRobin,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "A peer-to-peer distributed ledger simulator node", long_about = None)]
pub struct Config {
    /// TCP port this node listens for peer connections on.
    #[arg(long, env = "NODE_LISTEN_PORT", default_value_t = 7700)]
    pub listen_port: u16,

    /// Permanent identifier advertised in this node's handshake.
    #[arg(long, env = "NODE_ID")]
    pub node_id: String,

    /// Initial peers to connect to at startup, as `host:port,host:port`.
    #[arg(long, env = "NODE_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Proof-of-work difficulty: required leading hex-zero count.
    #[arg(long, env = "NODE_DIFFICULTY", default_value_t = 4)]
    pub difficulty: u64,

    /// Flat coinbase reward minted per mined block, before fees.
    #[arg(long, env = "NODE_BLOCK_REWARD", default_value_t = 50)]
    pub block_reward: u64,

    /// Target seconds between blocks, used by the optional retarget.
    #[arg(long, env = "NODE_TARGET_BLOCK_TIME", default_value_t = 10)]
    pub target_block_time: u64,

    /// Number of solve-time samples collected before a retarget decision.
    #[arg(long, env = "NODE_ADJUSTMENT_INTERVAL", default_value_t = 10)]
    pub adjustment_interval: usize,

    /// Enable the rolling difficulty adjuster described in §4.3.
    #[arg(long, env = "NODE_ENABLE_ADJUSTMENT", default_value_t = false)]
    pub enable_adjustment: bool,

    #[arg(long, env = "NODE_MIN_DIFFICULTY", default_value_t = 1)]
    pub min_difficulty: u64,

    #[arg(long, env = "NODE_MAX_DIFFICULTY", default_value_t = 64)]
    pub max_difficulty: u64,

    /// Maximum number of pending transactions retained in the mempool.
    #[arg(long, env = "NODE_MEMPOOL_MAX_SIZE", default_value_t = 1000)]
    pub mempool_max_size: usize,

    /// Seconds after which an un-included mempool entry becomes reclaimable.
    #[arg(long, env = "NODE_MEMPOOL_EXPIRY_SECS", default_value_t = 3600)]
    pub mempool_expiry_secs: u64,

    /// Address credited with mined coinbase rewards.
    #[arg(long, env = "NODE_MINER_ADDRESS")]
    pub miner_address: String,

    /// Automatically begin mining once the mempool reaches the threshold.
    #[arg(long, env = "NODE_AUTO_MINE", default_value_t = false)]
    pub auto_mine: bool,

    #[arg(long, env = "NODE_AUTO_MINE_THRESHOLD", default_value_t = 1)]
    pub auto_mine_threshold: usize,

    /// Consensus mode: proof-of-work, or the round-robin leader alternative.
    #[arg(long, env = "NODE_CONSENSUS", value_enum, default_value_t = ConsensusMode::Pow)]
    pub consensus: ConsensusMode,

    /// Maximum number of mempool transactions a miner bundles per block.
    #[arg(long, env = "NODE_MAX_CANDIDATE_TXS", default_value_t = 100)]
    pub max_candidate_txs: usize,
}
