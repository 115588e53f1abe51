//! Wires Ledger, Mempool, Miner and GossipLayer into one running node.
//! Owns the subsystems one-way: they expose pure contracts and are never
//! reached back into by name (§9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::blockchain::ledger::Ledger;
use crate::config::Config;
use crate::mempool::Mempool;
use crate::miner::{CancelSignal, Miner};
use crate::p2p::messages::Envelope;
use crate::p2p::{GossipLayer, Inbound};
use crate::tx::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Started,
    Stopped,
    Crashed,
}

#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node_id: String,
    pub chain_length: u64,
    pub chain_tip: String,
    pub mempool_size: usize,
    pub balance: u64,
    pub is_mining: bool,
    pub peers: Vec<String>,
    pub peer_count: usize,
}

pub struct NodeController {
    node_id: String,
    miner_address: String,
    auto_mine: bool,
    auto_mine_threshold: usize,
    max_candidate_txs: usize,
    ledger: Arc<Ledger>,
    mempool: Arc<Mempool>,
    miner: Arc<Miner>,
    gossip: Arc<GossipLayer>,
    lifecycle: Mutex<Lifecycle>,
    mining_cancel: Mutex<Option<CancelSignal>>,
    mining_lock: tokio::sync::Mutex<()>,
    orphans_seen: AtomicBool,
}

impl NodeController {
    pub fn new(
        config: &Config,
        ledger: Arc<Ledger>,
        mempool: Arc<Mempool>,
        gossip: Arc<GossipLayer>,
    ) -> Arc<Self> {
        let miner = Arc::new(Miner::new(
            config.miner_address.clone(),
            config.block_reward,
            config.max_candidate_txs,
        ));
        Arc::new(Self {
            node_id: config.node_id.clone(),
            miner_address: config.miner_address.clone(),
            auto_mine: config.auto_mine,
            auto_mine_threshold: config.auto_mine_threshold,
            max_candidate_txs: config.max_candidate_txs,
            ledger,
            mempool,
            miner,
            gossip,
            lifecycle: Mutex::new(Lifecycle::Created),
            mining_cancel: Mutex::new(None),
            mining_lock: tokio::sync::Mutex::new(()),
            orphans_seen: AtomicBool::new(false),
        })
    }

    /// Dial a peer's gossip listener; the node's own listener must already
    /// be running for the handshake exchange to complete.
    pub async fn connect(self: &Arc<Self>, addr: &str) -> anyhow::Result<()> {
        self.gossip.connect(addr).await
    }

    /// §4.4 partitioning: drop a peer entry, simulating a network split.
    pub fn disconnect(&self, peer_id: &str) {
        self.gossip.remove_peer(peer_id);
    }

    /// Redial a previously disconnected peer at its last-known address,
    /// healing a simulated partition.
    pub async fn restore_peer(self: &Arc<Self>, peer_id: &str) -> anyhow::Result<()> {
        self.gossip.restore_peer(peer_id).await
    }

    pub fn has_tx(&self, hash: &str) -> bool {
        self.mempool.has(hash)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.node_id.clone(),
            chain_length: self.ledger.length(),
            chain_tip: self.ledger.tip().hash(),
            mempool_size: self.mempool.size(),
            balance: self.ledger.balance(&self.miner_address),
            is_mining: self.miner.is_mining(),
            peers: self.gossip.peer_ids(),
            peer_count: self.gossip.peer_count(),
        }
    }

    /// Start the inbound dispatch loop. Consumes the receiver handed back
    /// by `GossipLayer::new`; the caller is expected to have already
    /// started (or be about to start) `gossip.listen()` separately.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<Inbound>) {
        *self.lifecycle.lock().unwrap() = Lifecycle::Started;
        info!("node {} started", self.node_id);

        while let Some(Inbound { envelope, from }) = inbound.recv().await {
            self.dispatch(envelope, &from).await;
        }

        *self.lifecycle.lock().unwrap() = Lifecycle::Stopped;
        info!("node {} stopped", self.node_id);
    }

    async fn dispatch(self: &Arc<Self>, envelope: Envelope, from: &str) {
        match envelope {
            Envelope::NewTx { data, .. } => self.on_new_tx(data.transaction).await,
            Envelope::NewBlock { data, .. } => self.on_new_block(data.block, from).await,
            Envelope::GetChain { .. } => self.on_get_chain(from).await,
            Envelope::ChainResponse { data, .. } => self.on_chain_response(data.chain).await,
        }
    }

    async fn on_new_tx(self: &Arc<Self>, tx: Transaction) {
        if self.mempool.has(&tx.hash()) {
            return;
        }
        if let Err(e) = self.ledger.can_apply(&tx) {
            debug!("rejected gossiped tx {}: {}", tx.hash(), e);
            return;
        }
        if let Err(e) = self.mempool.add(tx.clone()) {
            debug!("mempool rejected gossiped tx {}: {}", tx.hash(), e);
            return;
        }
        if self.auto_mine && self.mempool.size() >= self.auto_mine_threshold {
            self.spawn_mining_attempt();
        }
    }

    async fn on_new_block(self: &Arc<Self>, block: crate::blockchain::block::Block, from: &str) {
        let block_index = block.index;
        let tx_hashes: Vec<String> = block.transactions.iter().map(Transaction::hash).collect();

        match self.ledger.append(block) {
            Ok(()) => {
                self.mempool.remove_many(&tx_hashes);
                self.cancel_mining();
            }
            Err(e) => {
                let length = self.ledger.length();
                if block_index >= length {
                    // Either the peer is strictly ahead, or it's proposing a
                    // competing block at our own frontier (a fork). Either
                    // way we can't tell which chain is longer without
                    // fetching it, so ask and let `replace_chain` decide.
                    debug!("peer {} at/ahead of us ({} >= {}); requesting chain", from, block_index, length);
                    let request = Envelope::get_chain(&self.node_id);
                    if !self.gossip.send_to(from, request).await {
                        warn!("could not request chain from {}: peer gone", from);
                    }
                } else {
                    debug!("rejected block {} from {}: {}", block_index, from, e);
                }
            }
        }
    }

    async fn on_get_chain(self: &Arc<Self>, from: &str) {
        let chain = self.ledger.blocks();
        let difficulty = self.ledger.tip().difficulty;
        let reply = Envelope::chain_response(difficulty, chain, &self.node_id);
        if !self.gossip.send_to(from, reply).await {
            warn!("could not reply to GET_CHAIN from {}: peer gone", from);
        }
    }

    async fn on_chain_response(self: &Arc<Self>, chain: Vec<crate::blockchain::block::Block>) {
        match self.ledger.replace_chain(chain) {
            Ok(outcome) => {
                let new_chain_tx_hashes: std::collections::HashSet<String> = self
                    .ledger
                    .blocks()
                    .iter()
                    .flat_map(|b| b.transactions.iter().map(Transaction::hash))
                    .collect();
                self.mempool.remove_many(
                    &new_chain_tx_hashes.iter().cloned().collect::<Vec<_>>(),
                );

                let orphaned_txs: Vec<Transaction> = outcome
                    .orphans
                    .iter()
                    .flat_map(|b| b.transactions.iter().skip(1).cloned())
                    .filter(|tx| !new_chain_tx_hashes.contains(&tx.hash()))
                    .collect();
                self.mempool.restore(&orphaned_txs);

                if !outcome.orphans.is_empty() {
                    self.orphans_seen.store(true, Ordering::SeqCst);
                    info!("chain replaced: {} orphan(s)", outcome.orphans.len());
                }
                self.cancel_mining();
            }
            Err(e) => debug!("chain replacement rejected: {}", e),
        }
    }

    /// Re-announce the current chain tip, e.g. after a partition heals and
    /// a peer needs to be told about work it missed while disconnected.
    pub async fn announce_tip(self: &Arc<Self>) {
        let tip = self.ledger.tip();
        self.gossip.broadcast(Envelope::new_block(tip, &self.node_id)).await;
    }

    /// Outbound: validate and admit a locally submitted transaction, then
    /// broadcast it once.
    pub async fn submit(self: &Arc<Self>, tx: Transaction) -> bool {
        if self.ledger.can_apply(&tx).is_err() {
            return false;
        }
        if self.mempool.add(tx.clone()).is_err() {
            return false;
        }
        self.gossip.broadcast(Envelope::new_tx(tx, &self.node_id)).await;
        true
    }

    /// Outbound: a single-shot mining attempt. Concurrent invocations are
    /// rejected by `mining_lock`, matching "only one active mining at a
    /// time per node."
    pub async fn mine_next(self: &Arc<Self>, max_iters: u64) -> Option<crate::blockchain::block::Block> {
        let _guard = match self.mining_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => return None,
        };

        let cancel = CancelSignal::new();
        *self.mining_cancel.lock().unwrap() = Some(cancel.clone());

        let result = self.miner.mine_next(&self.ledger, &self.mempool, max_iters, &cancel).await;
        *self.mining_cancel.lock().unwrap() = None;

        let block = match result {
            Ok(Some(block)) => block,
            Ok(None) => return None,
            Err(e) => {
                debug!("mining attempt did not complete: {}", e);
                return None;
            }
        };

        let tx_hashes: Vec<String> = block.transactions.iter().map(Transaction::hash).collect();
        if let Err(e) = self.ledger.append(block.clone()) {
            warn!("mined block failed to append: {}", e);
            return None;
        }
        self.mempool.remove_many(&tx_hashes);
        self.gossip.broadcast(Envelope::new_block(block.clone(), &self.node_id)).await;
        Some(block)
    }

    /// Spawn a background mining attempt without blocking the dispatch
    /// loop that triggered it (auto-mine on mempool threshold).
    fn spawn_mining_attempt(self: &Arc<Self>) {
        let controller = self.clone();
        tokio::spawn(async move {
            controller.mine_next(u64::MAX).await;
        });
    }

    fn cancel_mining(&self) {
        if let Some(cancel) = self.mining_cancel.lock().unwrap().as_ref() {
            cancel.cancel();
        }
    }

    pub fn stop(&self) {
        *self.lifecycle.lock().unwrap() = Lifecycle::Stopped;
        self.cancel_mining();
        self.gossip.crash();
        info!("node {} stopping", self.node_id);
    }

    pub fn crash(&self) {
        *self.lifecycle.lock().unwrap() = Lifecycle::Crashed;
        self.cancel_mining();
        self.gossip.crash();
        warn!("node {} crashed", self.node_id);
    }

    pub fn restart(&self) {
        *self.lifecycle.lock().unwrap() = Lifecycle::Started;
        self.gossip.restart();
        info!("node {} restarted", self.node_id);
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }
}
