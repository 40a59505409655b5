use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{GENESIS_PREVIOUS_HASH, unix_now};
use crate::codec::{canonical_value_bytes, sha256_hex};
use crate::transaction::Transaction;

/// A single block in the ledger holding a slice of transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: u64,
    pub transactions: Vec<Transaction>,
    pub timestamp: f64, // Unix time, fractional seconds
    pub previous_hash: String,
    pub nonce: u64,   // Proof-of-Work nonce
    pub hash: String, // Cached hash of the block
}

impl Block {
    /// Create the genesis block (first block in the chain).
    pub fn genesis() -> Self {
        Self::genesis_at(unix_now())
    }

    /// Genesis with a fixed timestamp; two nodes given the same timestamp
    /// produce the same genesis hash.
    pub fn genesis_at(timestamp: f64) -> Self {
        Self::with_timestamp(0, Vec::new(), timestamp, GENESIS_PREVIOUS_HASH.to_string())
    }

    /// Create a new block (not mined yet). Run proof-of-work on it before
    /// offering it to a chain.
    pub fn new(id: u64, transactions: Vec<Transaction>, previous_hash: String) -> Self {
        Self::with_timestamp(id, transactions, unix_now(), previous_hash)
    }

    pub fn with_timestamp(
        id: u64,
        transactions: Vec<Transaction>,
        timestamp: f64,
        previous_hash: String,
    ) -> Self {
        let mut block = Self {
            id,
            transactions,
            timestamp,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Canonical form of every field except `hash`.
    pub fn header_value(&self) -> Value {
        json!({
            "id": self.id,
            "nonce": self.nonce,
            "previous_hash": self.previous_hash,
            "timestamp": self.timestamp,
            "transactions": self.transactions.iter().map(Transaction::to_value).collect::<Vec<_>>(),
        })
    }

    /// SHA-256 of the canonical JSON of all fields except `hash`.
    pub fn compute_hash(&self) -> String {
        sha256_hex(&canonical_value_bytes(&self.header_value()))
    }

    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        hash_meets_difficulty(&self.hash, difficulty)
    }

    /// Cached hash matches the content and satisfies the difficulty.
    /// Linkage is checked by the chain, not here.
    pub fn has_valid_proof(&self, difficulty: u32) -> bool {
        self.meets_difficulty(difficulty) && self.hash == self.compute_hash()
    }

    /// Search nonces from zero until the hash has `difficulty` leading zero
    /// hex digits. Returns the winning hash, or `None` once `cancel` is
    /// raised.
    pub fn proof_of_work(&mut self, difficulty: u32, cancel: &AtomicBool) -> Option<String> {
        self.nonce = 0;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            self.hash = self.compute_hash();
            if self.meets_difficulty(difficulty) {
                return Some(self.hash.clone());
            }
            self.nonce = self.nonce.wrapping_add(1);
        }
    }
}

pub fn hash_meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|c| c == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(content: &str) -> Transaction {
        Transaction::with_time("alice", content, 1_700_000_000.25)
    }

    #[test]
    fn genesis_has_valid_hash() {
        let b = Block::genesis();
        assert_eq!(b.hash, b.compute_hash());
        assert_eq!(b.previous_hash, "0");
        assert!(b.transactions.is_empty());
    }

    #[test]
    fn genesis_is_reproducible_with_fixed_timestamp() {
        let a = Block::genesis_at(1_600_000_000.0);
        let b = Block::genesis_at(1_600_000_000.0);
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, Block::genesis_at(1_600_000_000.5).hash);
    }

    #[test]
    fn genesis_hash_matches_python_nodes() {
        // sha256(json.dumps(block.__dict__ minus hash, sort_keys=True))
        let genesis = Block::genesis_at(1_600_000_000.0);
        assert_eq!(
            genesis.hash,
            "8ef83b3018764b6d38b348d4b11f2b2f74bbd3f34e7e44a5e4bf35a6db01625c"
        );
    }

    #[test]
    fn mining_produces_leading_zeros() {
        let mut b = Block::new(1, vec![tx("hi")], "prev".into());
        let hash = b.proof_of_work(2, &AtomicBool::new(false)).unwrap();
        assert!(hash.starts_with("00"));
        assert_eq!(hash, b.hash);
        assert!(b.has_valid_proof(2));
    }

    #[test]
    fn cancelled_search_stops() {
        let mut b = Block::new(1, vec![tx("hi")], "prev".into());
        // difficulty 64 is unreachable; only the flag can end the loop
        assert!(b.proof_of_work(64, &AtomicBool::new(true)).is_none());
    }

    #[test]
    fn invalid_when_mutated() {
        let mut b = Block::new(2, vec![tx("one")], "prev".into());
        b.proof_of_work(2, &AtomicBool::new(false));
        let old_hash = b.hash.clone();

        b.transactions.push(tx("two"));

        assert_ne!(old_hash, b.compute_hash());
        assert!(!b.has_valid_proof(2));
    }

    #[test]
    fn hash_survives_wire_round_trip() {
        let mut b = Block::new(3, vec![tx("a"), tx("b")], "prev".into());
        b.proof_of_work(1, &AtomicBool::new(false));
        let wire = serde_json::to_string(&b).unwrap();
        let back: Block = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.compute_hash(), b.hash);
        assert!(back.has_valid_proof(1));
    }

    #[test]
    fn difficulty_prefix_check() {
        assert!(hash_meets_difficulty("00ab", 2));
        assert!(!hash_meets_difficulty("0ab0", 2));
        assert!(hash_meets_difficulty("abc", 0));
        assert!(!hash_meets_difficulty("0", 2));
    }
}
