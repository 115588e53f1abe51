//! Bounded, fee-priority pool of pending transactions. No signature or
//! balance checks happen here — those are the Ledger's concern; the
//! NodeController calls `Ledger::can_apply` before admitting anything.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::error::MempoolError;
use crate::tx::Transaction;

#[derive(Debug, Clone)]
struct Entry {
    tx: Transaction,
    admitted_at: u64,
}

pub struct Mempool {
    max_size: usize,
    expiry_secs: u64,
    entries: RwLock<HashMap<String, Entry>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MempoolStats {
    pub size: usize,
    pub max_size: usize,
    pub total_fees: u64,
    pub average_fee: f64,
    pub oldest_age_secs: u64,
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

impl Mempool {
    pub fn new(max_size: usize, expiry_secs: u64) -> Self {
        Self {
            max_size,
            expiry_secs,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn has(&self, hash: &str) -> bool {
        self.entries.read().unwrap().contains_key(hash)
    }

    pub fn size(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Admission policy: reject duplicates; insert directly under capacity;
    /// otherwise reclaim expired entries, and if still full, evict the
    /// lowest-fee entry only if the incoming fee strictly exceeds it.
    pub fn add(&self, tx: Transaction) -> Result<(), MempoolError> {
        let hash = tx.hash();
        let mut entries = self.entries.write().unwrap();

        if entries.contains_key(&hash) {
            return Err(MempoolError::Duplicate);
        }

        if entries.len() < self.max_size {
            entries.insert(hash, Entry { tx, admitted_at: now() });
            return Ok(());
        }

        let cutoff = now().saturating_sub(self.expiry_secs);
        entries.retain(|_, e| e.admitted_at >= cutoff);

        if entries.len() < self.max_size {
            entries.insert(hash, Entry { tx, admitted_at: now() });
            return Ok(());
        }

        let min_entry = entries
            .iter()
            .min_by_key(|(_, e)| e.tx.fee)
            .map(|(h, e)| (h.clone(), e.tx.fee));

        match min_entry {
            Some((min_hash, min_fee)) if tx.fee > min_fee => {
                entries.remove(&min_hash);
                debug!("evicted {min_hash} (fee {min_fee}) to admit {hash} (fee {})", tx.fee);
                entries.insert(hash, Entry { tx, admitted_at: now() });
                Ok(())
            }
            _ => Err(MempoolError::FeeTooLow),
        }
    }

    pub fn remove(&self, hash: &str) -> Option<Transaction> {
        self.entries.write().unwrap().remove(hash).map(|e| e.tx)
    }

    pub fn remove_many(&self, hashes: &[String]) {
        let mut entries = self.entries.write().unwrap();
        for h in hashes {
            entries.remove(h);
        }
    }

    pub fn get(&self, hash: &str) -> Option<Transaction> {
        self.entries.read().unwrap().get(hash).map(|e| e.tx.clone())
    }

    /// Descending by fee; ties broken arbitrarily (no stable secondary key
    /// is mandated).
    pub fn top(&self, n: usize) -> Vec<Transaction> {
        let entries = self.entries.read().unwrap();
        let mut all: Vec<&Entry> = entries.values().collect();
        all.sort_by(|a, b| b.tx.fee.cmp(&a.tx.fee));
        all.into_iter().take(n).map(|e| e.tx.clone()).collect()
    }

    pub fn cleanup_expired(&self) -> usize {
        let cutoff = now().saturating_sub(self.expiry_secs);
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, e| e.admitted_at >= cutoff);
        before - entries.len()
    }

    /// Re-admit transactions displaced by a chain replacement. Already
    /// present entries and duplicates are skipped silently; no validation
    /// is attempted here (the NodeController revalidates against the
    /// post-reorg ledger before broadcasting anything new).
    pub fn restore(&self, txs: &[Transaction]) {
        for tx in txs {
            if tx.is_coinbase() {
                continue;
            }
            let _ = self.add(tx.clone());
        }
    }

    pub fn stats(&self) -> MempoolStats {
        let entries = self.entries.read().unwrap();
        let size = entries.len();
        let total_fees: u64 = entries.values().map(|e| e.tx.fee).sum();
        let average_fee = if size > 0 { total_fees as f64 / size as f64 } else { 0.0 };
        let oldest_age_secs = entries
            .values()
            .map(|e| now().saturating_sub(e.admitted_at))
            .max()
            .unwrap_or(0);
        MempoolStats { size, max_size: self.max_size, total_fees, average_fee, oldest_age_secs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(sender: &str, fee: u64, nonce: u64) -> Transaction {
        let mut t = Transaction::new(sender, "receiver", 1, fee, nonce);
        t.sign();
        t
    }

    #[test]
    fn rejects_duplicate_hash() {
        let pool = Mempool::new(10, 3600);
        let t = tx("a", 5, 0);
        pool.add(t.clone()).unwrap();
        assert!(matches!(pool.add(t), Err(MempoolError::Duplicate)));
    }

    #[test]
    fn fee_tie_at_minimum_is_rejected() {
        let pool = Mempool::new(3, 3600);
        pool.add(tx("a", 10, 0)).unwrap();
        pool.add(tx("b", 10, 0)).unwrap();
        pool.add(tx("c", 10, 0)).unwrap();
        let result = pool.add(tx("d", 10, 0));
        assert!(matches!(result, Err(MempoolError::FeeTooLow)));
        assert_eq!(pool.size(), 3);
    }

    #[test]
    fn strictly_higher_fee_evicts_minimum() {
        let pool = Mempool::new(3, 3600);
        pool.add(tx("a", 10, 0)).unwrap();
        pool.add(tx("b", 10, 0)).unwrap();
        pool.add(tx("c", 20, 0)).unwrap();
        pool.add(tx("d", 30, 0)).unwrap();
        assert_eq!(pool.size(), 3);
        assert!(pool.top(3).iter().all(|t| t.fee >= 10));
    }

    #[test]
    fn top_sorts_descending_by_fee() {
        let pool = Mempool::new(10, 3600);
        pool.add(tx("a", 1, 0)).unwrap();
        pool.add(tx("b", 5, 0)).unwrap();
        pool.add(tx("c", 3, 0)).unwrap();
        let fees: Vec<u64> = pool.top(10).iter().map(|t| t.fee).collect();
        assert_eq!(fees, vec![5, 3, 1]);
    }

    #[test]
    fn remove_many_clears_included_transactions() {
        let pool = Mempool::new(10, 3600);
        let t1 = tx("a", 1, 0);
        let t2 = tx("b", 1, 0);
        pool.add(t1.clone()).unwrap();
        pool.add(t2.clone()).unwrap();
        pool.remove_many(&[t1.hash()]);
        assert!(!pool.has(&t1.hash()));
        assert!(pool.has(&t2.hash()));
    }

    #[test]
    fn stats_report_size_and_fee_totals() {
        let pool = Mempool::new(10, 3600);
        pool.add(tx("a", 2, 0)).unwrap();
        pool.add(tx("b", 4, 0)).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.total_fees, 6);
        assert_eq!(stats.average_fee, 3.0);
    }
}
