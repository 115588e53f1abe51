//! Peer table: id → outbound queue, plus the `(host, port)` each peer
//! handshook with, so a removed peer can be redialed later. Broadcasting
//! clones the sender half of each peer's channel and sends independently,
//! so one slow or dead peer never blocks delivery to the rest.

use std::collections::HashMap;
use std::sync::Mutex;

use log::warn;
use tokio::sync::mpsc;

use crate::p2p::messages::Envelope;

pub struct PeerManager {
    senders: Mutex<HashMap<String, mpsc::Sender<Envelope>>>,
    addrs: Mutex<HashMap<String, (String, u16)>>,
}

impl Default for PeerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerManager {
    pub fn new() -> Self {
        Self { senders: Mutex::new(HashMap::new()), addrs: Mutex::new(HashMap::new()) }
    }

    /// Records the live outbound channel and the `(host, port)` the peer
    /// handshook with, so the address survives a later `remove_peer`.
    pub fn register(&self, peer_id: impl Into<String>, host: impl Into<String>, port: u16, sender: mpsc::Sender<Envelope>) {
        let peer_id = peer_id.into();
        self.addrs.lock().unwrap().insert(peer_id.clone(), (host.into(), port));
        self.senders.lock().unwrap().insert(peer_id, sender);
    }

    /// §4.4 partitioning: drop the live connection. The peer's last-known
    /// address is kept so it can be redialed once the partition heals.
    pub fn remove_peer(&self, peer_id: &str) {
        self.senders.lock().unwrap().remove(peer_id);
    }

    /// The `(host, port)` a peer last handshook with, if we've ever seen it —
    /// present even after `remove_peer`, absent only for an unknown id.
    pub fn addr_of(&self, peer_id: &str) -> Option<(String, u16)> {
        self.addrs.lock().unwrap().get(peer_id).cloned()
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.senders.lock().unwrap().contains_key(peer_id)
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.senders.lock().unwrap().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    /// Send to every peer except `exclude`, dropping any whose queue is
    /// closed or full rather than letting one bad peer stall the rest.
    pub async fn broadcast(&self, envelope: &Envelope, exclude: Option<&str>) {
        let senders: Vec<(String, mpsc::Sender<Envelope>)> = {
            let senders = self.senders.lock().unwrap();
            senders
                .iter()
                .filter(|(id, _)| Some(id.as_str()) != exclude)
                .map(|(id, tx)| (id.clone(), tx.clone()))
                .collect()
        };
        for (id, sender) in senders {
            if sender.try_send(envelope.clone()).is_err() {
                warn!("dropping broadcast to unresponsive peer {id}");
            }
        }
    }

    pub fn sender(&self, peer_id: &str) -> Option<mpsc::Sender<Envelope>> {
        self.senders.lock().unwrap().get(peer_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::Transaction;

    #[tokio::test]
    async fn broadcast_excludes_the_sender() {
        let manager = PeerManager::new();
        let (tx_a, mut rx_a) = mpsc::channel(10);
        let (tx_b, mut rx_b) = mpsc::channel(10);
        manager.register("a", "127.0.0.1", 1, tx_a);
        manager.register("b", "127.0.0.1", 2, tx_b);

        let envelope = Envelope::new_tx(Transaction::coinbase("miner", 1), "b");
        manager.broadcast(&envelope, Some("b")).await;

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn remove_peer_drops_it_from_the_table_but_keeps_its_address() {
        let manager = PeerManager::new();
        let (tx, _rx) = mpsc::channel(10);
        manager.register("a", "127.0.0.1", 7700, tx);
        assert!(manager.is_connected("a"));
        manager.remove_peer("a");
        assert!(!manager.is_connected("a"));
        assert_eq!(manager.addr_of("a"), Some(("127.0.0.1".to_string(), 7700)));
    }
}
