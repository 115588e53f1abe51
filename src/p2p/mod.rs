//! Transport: listener, per-peer reader/writer tasks, loop-suppressed
//! broadcast, and the fault-injection knobs used to study propagation
//! under packet loss, latency, and partition. One `GossipLayer` per node.

pub mod messages;
pub mod peers;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use messages::{Envelope, Handshake, HandshakeKind};
use peers::PeerManager;

/// Bound on the per-peer outbound queue; a peer that can't keep up gets its
/// oldest-undelivered message dropped rather than stalling the broadcaster.
const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Bound on the seen-message set per §9: the source leaves this unbounded,
/// which a production-worthy rewrite must not.
const SEEN_SET_CAPACITY: usize = 10_000;

/// An inbound envelope handed to the node controller's dispatch loop,
/// tagged with the peer id it arrived from.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub envelope: Envelope,
    pub from: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FaultConfig {
    pub drop_prob: f64,
    pub delay_ms: u64,
}

/// FIFO-evicted set bounding how many message ids are remembered for
/// dedupe, so a long-running node doesn't leak memory.
struct SeenSet {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self { order: VecDeque::new(), ids: HashSet::new(), capacity }
    }

    /// Returns true if `id` was newly inserted (i.e. not seen before).
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }
}

pub struct GossipLayer {
    node_id: String,
    host: String,
    port: u16,
    peers: PeerManager,
    seen: Mutex<SeenSet>,
    fault: Mutex<FaultConfig>,
    crashed: AtomicBool,
    inbound_tx: mpsc::Sender<Inbound>,
}

impl GossipLayer {
    pub fn new(node_id: impl Into<String>, host: impl Into<String>, port: u16) -> (Arc<Self>, mpsc::Receiver<Inbound>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        let layer = Arc::new(Self {
            node_id: node_id.into(),
            host: host.into(),
            port,
            peers: PeerManager::new(),
            seen: Mutex::new(SeenSet::new(SEEN_SET_CAPACITY)),
            fault: Mutex::new(FaultConfig::default()),
            crashed: AtomicBool::new(false),
            inbound_tx,
        });
        (layer, inbound_rx)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn peer_count(&self) -> usize {
        self.peers.count()
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.peer_ids()
    }

    pub fn set_fault_injection(&self, drop_prob: f64, delay_ms: u64) {
        *self.fault.lock().unwrap() = FaultConfig { drop_prob, delay_ms };
    }

    pub fn crash(&self) {
        self.crashed.store(true, Ordering::SeqCst);
        info!("node {} crashed (gossip layer going silent)", self.node_id);
    }

    /// Resets the seen-set per §9 ("restart resets the seen-set"); the
    /// caller is responsible for re-establishing the listener and any
    /// outbound connections, since those are owned by separate tasks.
    pub fn restart(&self) {
        self.crashed.store(false, Ordering::SeqCst);
        self.seen.lock().unwrap().clear();
        info!("node {} restarted (gossip layer live again)", self.node_id);
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    pub fn remove_peer(&self, peer_id: &str) {
        self.peers.remove_peer(peer_id);
    }

    /// §10.5 partition helper: redial a peer at its last-known `(host, port)`
    /// — the counterpart to `remove_peer`, so a healed partition can be
    /// re-established without the caller having to remember addresses.
    pub async fn restore_peer(self: &Arc<Self>, peer_id: &str) -> Result<()> {
        let (host, port) = self
            .peers
            .addr_of(peer_id)
            .with_context(|| format!("no known address for peer {peer_id}"))?;
        self.connect(&format!("{host}:{port}")).await
    }

    /// Send directly to one peer, bypassing broadcast — used for the
    /// directed `GET_CHAIN`/`CHAIN_RESPONSE` request/reply pair.
    pub async fn send_to(&self, peer_id: &str, envelope: Envelope) -> bool {
        match self.peers.sender(peer_id) {
            Some(sender) => sender.send(envelope).await.is_ok(),
            None => false,
        }
    }

    pub async fn listen(self: &Arc<Self>) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await.context("binding p2p listener")?;
        info!("node {} listening on {}", self.node_id, addr);

        loop {
            let (socket, remote) = listener.accept().await?;
            if self.crashed.load(Ordering::SeqCst) {
                drop(socket);
                continue;
            }
            debug!("accepted connection from {}", remote);
            let layer = self.clone();
            tokio::spawn(async move {
                if let Err(e) = layer.handle_connection(socket, false).await {
                    warn!("connection from {} closed: {}", remote, e);
                }
            });
        }
    }

    /// Dial `addr`; the initiator writes its handshake first per §4.4.
    pub async fn connect(self: &Arc<Self>, addr: &str) -> Result<()> {
        let stream = TcpStream::connect(addr).await.context("connecting to peer")?;
        let layer = self.clone();
        let addr = addr.to_string();
        tokio::spawn(async move {
            if let Err(e) = layer.handle_connection(stream, true).await {
                warn!("connection to {} closed: {}", addr, e);
            }
        });
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream, initiator: bool) -> Result<()> {
        let (reader, mut writer) = socket.into_split();
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(OUTBOUND_QUEUE_SIZE);
        let mut buf_reader = BufReader::new(reader);

        let my_handshake = Handshake::new(&self.node_id, &self.host, self.port);

        let theirs = if initiator {
            write_line(&mut writer, &my_handshake).await?;
            read_handshake(&mut buf_reader).await?
        } else {
            let theirs = read_handshake(&mut buf_reader).await?;
            write_line(&mut writer, &my_handshake).await?;
            theirs
        };
        let peer_id = theirs.node_id.clone();

        self.peers.register(peer_id.clone(), theirs.host, theirs.port, out_tx);
        info!("handshake complete with {}", peer_id);

        let writer_task = tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        if writer.write_all(format!("{json}\n").as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("failed to encode outbound envelope: {e}"),
                }
            }
        });

        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = buf_reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                break;
            }
            if self.crashed.load(Ordering::SeqCst) {
                continue;
            }

            let envelope: Envelope = match serde_json::from_str(line.trim_end()) {
                Ok(e) => e,
                Err(e) => {
                    debug!("malformed envelope from {}: {}", peer_id, e);
                    continue;
                }
            };

            self.on_envelope(envelope, &peer_id).await;
        }

        self.peers.remove_peer(&peer_id);
        writer_task.abort();
        info!("peer {} disconnected", peer_id);
        Ok(())
    }

    async fn on_envelope(self: &Arc<Self>, envelope: Envelope, from: &str) {
        if self.crashed.load(Ordering::SeqCst) {
            return;
        }
        let (drop_prob, delay_ms) = {
            let fault = self.fault.lock().unwrap();
            (fault.drop_prob, fault.delay_ms)
        };

        if drop_prob > 0.0 && rand::thread_rng().gen_bool(drop_prob) {
            debug!("fault injection: dropped {} from {}", envelope.msg_id(), from);
            return;
        }
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let is_new = self.seen.lock().unwrap().insert(envelope.msg_id());
        if !is_new {
            debug!("duplicate envelope {} from {}, dropping", envelope.msg_id(), from);
            return;
        }

        // Only gossip-propagated kinds are rebroadcast; GET_CHAIN/CHAIN_RESPONSE
        // are directed request/reply traffic and would otherwise flood the mesh.
        if matches!(envelope, Envelope::NewTx { .. } | Envelope::NewBlock { .. }) {
            self.peers.broadcast(&envelope, Some(from)).await;
        }

        if self.inbound_tx.send(Inbound { envelope, from: from.to_string() }).await.is_err() {
            warn!("inbound dispatch channel closed; dropping message from {}", from);
        }
    }

    /// Broadcast an envelope this node originated (not a rebroadcast of an
    /// inbound one): it must be marked seen first so a reflected copy
    /// doesn't loop back through us.
    pub async fn broadcast(&self, envelope: Envelope) {
        if self.crashed.load(Ordering::SeqCst) {
            return;
        }
        self.seen.lock().unwrap().insert(envelope.msg_id());
        self.peers.broadcast(&envelope, None).await;
    }
}

async fn write_line<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, handshake: &Handshake) -> Result<()> {
    let json = serde_json::to_string(handshake)?;
    writer.write_all(format!("{json}\n").as_bytes()).await?;
    Ok(())
}

async fn read_handshake<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Result<Handshake> {
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        anyhow::bail!("connection closed before handshake");
    }
    let handshake: Handshake = serde_json::from_str(line.trim_end()).context("decoding handshake")?;
    if handshake.kind != HandshakeKind::Handshake {
        anyhow::bail!("expected handshake as first line");
    }
    Ok(handshake)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::Transaction;
    use std::net::TcpListener as StdListener;

    fn free_port() -> u16 {
        StdListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn handshake_connects_two_nodes_by_id() {
        let port_a = free_port();
        let (a, _rx_a) = GossipLayer::new("a", "127.0.0.1", port_a);
        let a_listen = a.clone();
        tokio::spawn(async move { a_listen.listen().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (b, _rx_b) = GossipLayer::new("b", "127.0.0.1", free_port());
        b.connect(&format!("127.0.0.1:{port_a}")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(b.peer_ids().contains(&"a".to_string()));
        assert!(a.peer_ids().contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn duplicate_msg_id_is_delivered_at_most_once() {
        let (layer, mut rx) = GossipLayer::new("a", "127.0.0.1", free_port());
        let envelope = Envelope::new_tx(Transaction::coinbase("m", 1), "other");
        layer.on_envelope(envelope.clone(), "other").await;
        layer.on_envelope(envelope, "other").await;

        let first = rx.try_recv();
        assert!(first.is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn crashed_node_drops_inbound_envelopes() {
        let (layer, mut rx) = GossipLayer::new("a", "127.0.0.1", free_port());
        layer.crash();
        let envelope = Envelope::new_tx(Transaction::coinbase("m", 1), "other");
        layer.on_envelope(envelope, "other").await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn seen_set_evicts_oldest_beyond_capacity() {
        let mut seen = SeenSet::new(2);
        assert!(seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(seen.insert("c")); // evicts "a"
        assert!(seen.insert("a")); // "a" was evicted, so this is "new" again
    }
}
