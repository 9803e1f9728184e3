// Blockchain module
//
// This module contains the ledger engine:
// - Canonical hashing
// - Block structure
// - Transaction structure (transfers, rewards, DIDs, credentials)
// - Cryptography utilities
// - Blockchain structure (admission, mining, validation, conflict resolution)
// - Peer chain fetching

pub mod block;
pub mod canonical;
pub mod chain;
pub mod crypto;
pub mod peers;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError};
pub use crypto::{Address, DigitalSignature, Wallet};
pub use peers::{ChainResponse, HttpPeerClient, PeerClient};
pub use transaction::{Transaction, TransactionError};
