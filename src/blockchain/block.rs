use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use super::canonical::{sha256_hex, sort_keys};
use super::transaction::Transaction;

/// Fixed creation time shared by every node's genesis block
pub const GENESIS_TIMESTAMP: f64 = 1_751_094_000.0;

/// Represents a block in the blockchain
///
/// Fields are only readable: a block is sealed once its hash is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    index: u64,

    /// Seconds since the Unix epoch when the block was created
    timestamp: f64,

    /// List of transactions included in this block
    transactions: Vec<Transaction>,

    /// Hash of the previous block ("0" for genesis)
    previous_hash: String,

    /// Proof of work
    nonce: u64,

    /// Hash of all the fields above
    hash: String,
}

impl Block {
    /// Creates a new block and seals it with its hash
    pub fn new(
        index: u64,
        timestamp: f64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        nonce: u64,
    ) -> Self {
        let hash = sha256_hex(
            Self::header_value(index, timestamp, &transactions, &previous_hash, nonce)
                .to_string()
                .as_bytes(),
        );

        Block {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce,
            hash,
        }
    }

    /// The fixed first block every honest node starts from
    pub fn genesis() -> Self {
        Block::new(0, GENESIS_TIMESTAMP, Vec::new(), "0".to_string(), 0)
    }

    /// Canonical (key-sorted) header object that is hashed for a block
    pub fn header_value(
        index: u64,
        timestamp: f64,
        transactions: &[Transaction],
        previous_hash: &str,
        nonce: u64,
    ) -> Value {
        sort_keys(json!({
            "index": index,
            "timestamp": timestamp,
            "transactions": transactions,
            "previous_hash": previous_hash,
            "nonce": nonce,
        }))
    }

    /// Recomputes the hash from the block's fields, ignoring the stored hash
    pub fn calculate_hash(&self) -> String {
        let header = Self::header_value(
            self.index,
            self.timestamp,
            &self.transactions,
            &self.previous_hash,
            self.nonce,
        );
        sha256_hex(header.to_string().as_bytes())
    }

    /// Whether the stored hash still matches the block's contents
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Current wall-clock time in fractional seconds since the Unix epoch
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Whether `hash` starts with at least `difficulty` zero hex digits
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::canonical::canonical_hash;
    use crate::blockchain::Address;

    fn sample_block() -> Block {
        let transactions = vec![
            Transaction::new_reward(Address::from("recipient1"), 10),
            Transaction::new_transfer(Address::from("a"), Address::from("b"), 20),
        ];
        Block::new(1, 1_700_000_000.25, transactions, "previous_hash".to_string(), 100)
    }

    #[test]
    fn test_new_block() {
        let block = sample_block();

        assert_eq!(block.index(), 1);
        assert_eq!(block.nonce(), 100);
        assert_eq!(block.previous_hash(), "previous_hash");
        assert_eq!(block.transactions().len(), 2);
        assert_eq!(block.hash().len(), 64);
    }

    #[test]
    fn test_hash_covers_exactly_the_header_fields() {
        let block = sample_block();
        let expected = canonical_hash(&json!({
            "nonce": block.nonce(),
            "previous_hash": block.previous_hash(),
            "transactions": block.transactions(),
            "timestamp": block.timestamp(),
            "index": block.index(),
        }))
        .unwrap();

        assert_eq!(block.hash(), expected);
        assert!(block.has_valid_hash());
    }

    #[test]
    fn test_transaction_order_changes_hash() {
        let first = Transaction::new_reward(Address::from("x"), 1);
        let second = Transaction::new_reward(Address::from("y"), 1);

        let a = Block::new(1, 1.0, vec![first.clone(), second.clone()], "p".to_string(), 0);
        let b = Block::new(1, 1.0, vec![second, first], "p".to_string(), 0);

        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let genesis = Block::genesis();

        assert_eq!(genesis, Block::genesis());
        assert_eq!(genesis.index(), 0);
        assert_eq!(genesis.previous_hash(), "0");
        assert_eq!(genesis.nonce(), 0);
        assert!(genesis.transactions().is_empty());
    }

    #[test]
    fn test_wire_round_trip_keeps_hash_valid() {
        let block = sample_block();
        let wire = serde_json::to_value(&block).unwrap();

        for field in ["index", "timestamp", "transactions", "previous_hash", "nonce", "hash"] {
            assert!(wire.get(field).is_some(), "missing {}", field);
        }

        let decoded: Block = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded, block);
        assert!(decoded.has_valid_hash());
    }

    #[test]
    fn test_tampered_block_fails_hash_check() {
        let mut wire = serde_json::to_value(sample_block()).unwrap();
        wire["nonce"] = json!(101);

        let tampered: Block = serde_json::from_value(wire).unwrap();
        assert!(!tampered.has_valid_hash());
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("0000abc", 4));
        assert!(meets_difficulty("00000bc", 4));
        assert!(!meets_difficulty("000abcd", 4));
        assert!(meets_difficulty("abc", 0));
        assert!(!meets_difficulty("00", 3));
    }
}
