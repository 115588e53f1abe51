use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use ledgersim_core::blockchain::block::Block;
use ledgersim_core::blockchain::ledger::Ledger;
use ledgersim_core::config::{Config, ConsensusMode};
use ledgersim_core::mempool::Mempool;
use ledgersim_core::node::NodeController;
use ledgersim_core::p2p::GossipLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::parse();

    if config.consensus == ConsensusMode::RoundRobin {
        anyhow::bail!(
            "--consensus round-robin is not wired into the dispatch loop yet (miner::leader is \
             available but unused by NodeController); run with --consensus pow"
        );
    }

    info!("starting node {} on port {}", config.node_id, config.listen_port);

    let genesis = mined_genesis(config.difficulty);
    let ledger = Arc::new(Ledger::new(genesis));
    let mempool = Arc::new(Mempool::new(config.mempool_max_size, config.mempool_expiry_secs));

    let (gossip, inbound_rx) = GossipLayer::new(&config.node_id, "0.0.0.0", config.listen_port);
    let controller = NodeController::new(&config, ledger, mempool, gossip.clone());

    let listen_gossip = gossip.clone();
    tokio::spawn(async move {
        if let Err(e) = listen_gossip.listen().await {
            error!("gossip listener exited: {}", e);
        }
    });

    for peer_addr in &config.peers {
        if let Err(e) = gossip.connect(peer_addr).await {
            error!("failed to connect to seed peer {}: {}", peer_addr, e);
        }
    }

    controller.run(inbound_rx).await;
    Ok(())
}

/// Mines the locally configured genesis block synchronously at startup;
/// every node in a cluster must agree on this block byte-for-byte.
fn mined_genesis(difficulty: u64) -> Block {
    let mut block = Block::genesis(0, difficulty);
    while !block.is_valid_pow() {
        block.nonce += 1;
    }
    block
}
