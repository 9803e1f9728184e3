use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

use super::block::{meets_difficulty, now_timestamp, Block};
use super::canonical::sha256_hex;
use super::crypto::{verify_signature, Address, DigitalSignature};
use super::peers::{normalize_peer_address, PeerClient};
use super::transaction::{Transaction, TransactionError};
use crate::config::NodeConfig;

/// Default number of leading zero hex digits a block hash needs
pub const DEFAULT_DIFFICULTY: usize = 4;

/// Default amount credited to a miner per block
pub const DEFAULT_MINING_REWARD: u64 = 25;

// How many nonces are tried between checks of the cancel flag and chain tip.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction rejected: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Mining was cancelled")]
    MiningCancelled,
}

/// Work package captured at the start of a mining attempt
struct MiningSnapshot {
    index: u64,
    previous_hash: String,
    transactions: Vec<Transaction>,
    pending_count: usize,
    generation: u64,
}

enum SearchOutcome {
    Found(u64),
    Stale,
    Cancelled,
}

/// Represents the blockchain
///
/// All mutation goes through `&self`. Locks are always taken in the order
/// chain, then pending transactions; peers are locked on their own.
#[derive(Debug)]
pub struct Blockchain {
    /// The chain of blocks, never empty
    chain: Mutex<Vec<Block>>,

    /// Transactions admitted but not yet mined
    pending_transactions: Mutex<Vec<Transaction>>,

    /// Known peer addresses (`host:port`)
    peers: Mutex<BTreeSet<String>>,

    /// Bumped on every append or replacement of the chain
    generation: AtomicU64,

    /// Hash of the fixed genesis block
    genesis_hash: String,

    /// Mining difficulty (number of leading zeros required in hash)
    difficulty: usize,

    /// Mining reward
    mining_reward: u64,
}

impl Blockchain {
    /// Creates a new blockchain with the default difficulty and reward
    pub fn new() -> Self {
        Self::with_params(DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD)
    }

    /// Creates a new blockchain with a genesis block
    pub fn with_params(difficulty: usize, mining_reward: u64) -> Self {
        let genesis = Block::genesis();

        Blockchain {
            genesis_hash: genesis.hash().to_string(),
            chain: Mutex::new(vec![genesis]),
            pending_transactions: Mutex::new(Vec::new()),
            peers: Mutex::new(BTreeSet::new()),
            generation: AtomicU64::new(0),
            difficulty,
            mining_reward,
        }
    }

    /// Creates a blockchain from node configuration, registering its peers
    pub fn from_config(config: &NodeConfig) -> Self {
        let blockchain = Self::with_params(config.difficulty, config.mining_reward);
        for peer in &config.peers {
            blockchain.register_peer(peer);
        }
        blockchain
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn mining_reward(&self) -> u64 {
        self.mining_reward
    }

    pub fn genesis_hash(&self) -> &str {
        &self.genesis_hash
    }

    /// Gets the last block in the chain
    pub fn get_last_block(&self) -> Block {
        let chain = self.chain.lock();
        chain[chain.len() - 1].clone()
    }

    /// Gets the entire blockchain
    pub fn get_chain(&self) -> Vec<Block> {
        self.chain.lock().clone()
    }

    /// Gets all pending transactions
    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.pending_transactions.lock().clone()
    }

    /// Validates and enqueues a signed transaction from an untrusted source
    ///
    /// Returns the index of the block the transaction is expected to land in.
    /// Nothing is enqueued unless every check passes.
    pub fn add_transaction(
        &self,
        transaction: Transaction,
        signature: &DigitalSignature,
        public_key: &str,
    ) -> Result<u64, TransactionError> {
        let kind = transaction.kind();

        match self.admit(transaction, signature, public_key) {
            Ok(index) => {
                info!("Accepted {} transaction for block {}", kind, index);
                Ok(index)
            }
            Err(err) => {
                warn!("Rejected {} transaction: {}", kind, err);
                Err(err)
            }
        }
    }

    fn admit(
        &self,
        transaction: Transaction,
        signature: &DigitalSignature,
        public_key: &str,
    ) -> Result<u64, TransactionError> {
        if transaction.is_reward() {
            return Err(TransactionError::RewardNotAccepted);
        }

        let sender_address = Address::from_public_key_hex(public_key)?;
        let origin = transaction.origin().ok_or(TransactionError::MissingOrigin)?;
        if origin != &sender_address {
            return Err(TransactionError::OriginMismatch {
                declared: origin.0.clone(),
                derived: sender_address.0,
            });
        }

        if !verify_signature(public_key, signature, &transaction) {
            return Err(TransactionError::InvalidSignature);
        }

        if let Transaction::IssueVc {
            issuer_public_key,
            credential_data,
            issuer_signature,
            ..
        } = &transaction
        {
            check_credential(issuer_public_key, credential_data, issuer_signature)?;
        }

        let chain = self.chain.lock();
        let mut pending = self.pending_transactions.lock();

        if let Transaction::RegisterDid { did_string, .. } = &transaction {
            let in_chain = find_did_owner(&chain, did_string).is_some();
            let in_pending = pending.iter().any(|tx| registers_did(tx, did_string));
            if in_chain || in_pending {
                return Err(TransactionError::DuplicateDid(did_string.clone()));
            }
        }

        pending.push(transaction);
        Ok(chain[chain.len() - 1].index() + 1)
    }

    /// Mines a new block with the pending transactions
    ///
    /// The search restarts from a fresh snapshot whenever the chain tip moves
    /// underneath it.
    pub fn mine_block(&self, miner_address: &Address) -> Result<Block, BlockchainError> {
        let never = AtomicBool::new(false);
        self.mine_block_cancellable(miner_address, &never)
    }

    /// Mines a new block, giving up once `cancel` is raised
    pub fn mine_block_cancellable(
        &self,
        miner_address: &Address,
        cancel: &AtomicBool,
    ) -> Result<Block, BlockchainError> {
        loop {
            let snapshot = self.snapshot_for_mining(miner_address);
            let timestamp = now_timestamp();

            let nonce = match self.proof_of_work(&snapshot, timestamp, cancel) {
                SearchOutcome::Found(nonce) => nonce,
                SearchOutcome::Stale => {
                    debug!("Chain tip moved while mining block {}, restarting", snapshot.index);
                    continue;
                }
                SearchOutcome::Cancelled => {
                    info!("Mining of block {} cancelled", snapshot.index);
                    return Err(BlockchainError::MiningCancelled);
                }
            };

            if let Some(block) = self.append_mined(snapshot, timestamp, nonce) {
                return Ok(block);
            }
        }
    }

    /// Appends a solved block unless the tip moved since the snapshot was taken
    ///
    /// Only the pending transactions captured in the snapshot are drained,
    /// anything admitted during the search stays queued.
    fn append_mined(&self, snapshot: MiningSnapshot, timestamp: f64, nonce: u64) -> Option<Block> {
        let block = Block::new(
            snapshot.index,
            timestamp,
            snapshot.transactions,
            snapshot.previous_hash,
            nonce,
        );

        let mut chain = self.chain.lock();
        if chain[chain.len() - 1].hash() != block.previous_hash() {
            debug!("Chain tip moved before block {} was appended, restarting", block.index());
            return None;
        }

        let mut pending = self.pending_transactions.lock();
        let mined = snapshot.pending_count.min(pending.len());
        pending.drain(..mined);

        chain.push(block.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);

        info!(
            "Mined block {} with {} transaction(s), nonce {}, hash {}",
            block.index(),
            block.transactions().len(),
            block.nonce(),
            block.hash()
        );
        Some(block)
    }

    fn snapshot_for_mining(&self, miner_address: &Address) -> MiningSnapshot {
        let chain = self.chain.lock();
        let pending = self.pending_transactions.lock();
        let last = &chain[chain.len() - 1];

        let mut transactions = Vec::with_capacity(pending.len() + 1);
        transactions.push(Transaction::new_reward(miner_address.clone(), self.mining_reward));
        transactions.extend(pending.iter().cloned());

        MiningSnapshot {
            index: last.index() + 1,
            previous_hash: last.hash().to_string(),
            transactions,
            pending_count: pending.len(),
            generation: self.generation.load(Ordering::SeqCst),
        }
    }

    /// Searches nonces from zero until the header hash meets the difficulty
    fn proof_of_work(
        &self,
        snapshot: &MiningSnapshot,
        timestamp: f64,
        cancel: &AtomicBool,
    ) -> SearchOutcome {
        let mut header = Block::header_value(
            snapshot.index,
            timestamp,
            &snapshot.transactions,
            &snapshot.previous_hash,
            0,
        );
        let mut nonce: u64 = 0;

        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0 {
                if cancel.load(Ordering::Relaxed) {
                    return SearchOutcome::Cancelled;
                }
                if self.generation.load(Ordering::SeqCst) != snapshot.generation {
                    return SearchOutcome::Stale;
                }
            }

            header["nonce"] = Value::from(nonce);
            let hash = sha256_hex(header.to_string().as_bytes());
            if meets_difficulty(&hash, self.difficulty) {
                return SearchOutcome::Found(nonce);
            }

            nonce += 1;
        }
    }

    /// Replays the whole chain to compute an address's balance
    ///
    /// Accumulates in `i128` so that any sequence of `u64` amounts is exact.
    pub fn get_balance(&self, address: &Address) -> i128 {
        let chain = self.chain.lock();
        let mut balance: i128 = 0;

        for transaction in chain.iter().flat_map(|block| block.transactions()) {
            let amount = i128::from(transaction.amount());
            if transaction.recipient() == Some(address) {
                balance += amount;
            }
            if transaction.sender() == Some(address) {
                balance -= amount;
            }
        }

        balance
    }

    /// Finds the owner of a DID; the first registration in chain order wins
    pub fn resolve_did(&self, did_string: &str) -> Option<Address> {
        find_did_owner(&self.chain.lock(), did_string)
    }

    /// Collects every credential issued to `subject_did`, in chain order
    pub fn get_credentials(&self, subject_did: &str) -> Vec<Transaction> {
        self.chain
            .lock()
            .iter()
            .flat_map(|block| block.transactions())
            .filter(|tx| {
                matches!(tx, Transaction::IssueVc { subject_did: subject, .. } if subject == subject_did)
            })
            .cloned()
            .collect()
    }

    /// Validates the local chain
    pub fn is_valid(&self) -> bool {
        let chain = self.get_chain();
        self.is_valid_chain(&chain)
    }

    /// Checks a candidate chain against genesis, linkage and proof of work
    pub fn is_valid_chain(&self, candidate: &[Block]) -> bool {
        match self.validate_chain(candidate) {
            Ok(()) => true,
            Err(err) => {
                debug!("{}", err);
                false
            }
        }
    }

    /// Like [`Blockchain::is_valid_chain`] but says why a chain was rejected
    pub fn validate_chain(&self, candidate: &[Block]) -> Result<(), BlockchainError> {
        let genesis = candidate
            .first()
            .ok_or_else(|| BlockchainError::InvalidChain("chain is empty".to_string()))?;

        if genesis.hash() != self.genesis_hash {
            return Err(BlockchainError::InvalidChain(format!(
                "genesis hash {} does not match {}",
                genesis.hash(),
                self.genesis_hash
            )));
        }

        // The stored hash proves nothing about the contents, compare the whole block
        if *genesis != Block::genesis() {
            return Err(BlockchainError::InvalidChain(
                "genesis block contents differ from the fixed genesis".to_string(),
            ));
        }

        for pair in candidate.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);

            if current.previous_hash() != previous.hash() {
                return Err(BlockchainError::InvalidChain(format!(
                    "block {} does not link to its parent",
                    current.index()
                )));
            }

            if current.index() != previous.index() + 1 {
                return Err(BlockchainError::InvalidChain(format!(
                    "block index {} follows {}",
                    current.index(),
                    previous.index()
                )));
            }

            let recomputed = current.calculate_hash();
            if recomputed != current.hash() {
                return Err(BlockchainError::InvalidChain(format!(
                    "block {} hash does not match its contents",
                    current.index()
                )));
            }

            if !meets_difficulty(&recomputed, self.difficulty) {
                return Err(BlockchainError::InvalidChain(format!(
                    "block {} hash does not meet difficulty {}",
                    current.index(),
                    self.difficulty
                )));
            }
        }

        Ok(())
    }

    /// Adds a peer address; returns false if it was blank or already known
    pub fn register_peer(&self, address: &str) -> bool {
        let Some(peer) = normalize_peer_address(address) else {
            return false;
        };

        let added = self.peers.lock().insert(peer.clone());
        if added {
            info!("Registered peer {}", peer);
        }
        added
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.lock().iter().cloned().collect()
    }

    /// Adopts the first peer chain that is strictly longer and valid
    ///
    /// Unreachable peers are skipped. Returns whether the local chain was
    /// replaced.
    pub async fn resolve_conflicts(&self, client: &dyn PeerClient) -> bool {
        let local_length = self.chain.lock().len();

        for peer in self.peers() {
            let response = match client.fetch_chain(&peer).await {
                Ok(response) => response,
                Err(err) => {
                    warn!("Could not fetch chain from {}: {}. Skipping.", peer, err);
                    continue;
                }
            };

            if response.length <= local_length {
                debug!("Peer {} has chain of length {}, not longer", peer, response.length);
                continue;
            }

            if response.length != response.chain.len() {
                warn!(
                    "Peer {} reported length {} but sent {} blocks",
                    peer,
                    response.length,
                    response.chain.len()
                );
                continue;
            }

            if let Err(err) = self.validate_chain(&response.chain) {
                warn!("Peer {} sent an invalid chain: {}", peer, err);
                continue;
            }

            if self.replace_chain(response.chain) {
                info!("Local chain replaced by chain of length {} from {}", response.length, peer);
                return true;
            }
        }

        false
    }

    /// Swaps in a validated chain if it is still longer than the local one
    ///
    /// Pending DID registrations that the adopted chain already settles are
    /// dropped.
    fn replace_chain(&self, candidate: Vec<Block>) -> bool {
        let mut chain = self.chain.lock();
        if candidate.len() <= chain.len() {
            return false;
        }

        let mut pending = self.pending_transactions.lock();
        let before = pending.len();
        pending.retain(|tx| match tx {
            Transaction::RegisterDid { did_string, .. } => find_did_owner(&candidate, did_string).is_none(),
            _ => true,
        });
        if pending.len() < before {
            info!(
                "Dropped {} pending DID registration(s) already on the adopted chain",
                before - pending.len()
            );
        }

        *chain = candidate;
        self.generation.fetch_add(1, Ordering::SeqCst);
        true
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

fn registers_did(transaction: &Transaction, did: &str) -> bool {
    matches!(transaction, Transaction::RegisterDid { did_string, .. } if did_string == did)
}

fn find_did_owner(chain: &[Block], did: &str) -> Option<Address> {
    chain
        .iter()
        .flat_map(|block| block.transactions())
        .find_map(|tx| match tx {
            Transaction::RegisterDid {
                owner_address,
                did_string,
            } if did_string == did => Some(owner_address.clone()),
            _ => None,
        })
}

/// Verifies the issuer's signature over the credential payload itself
fn check_credential(
    issuer_public_key: &str,
    credential_data: &Value,
    issuer_signature: &DigitalSignature,
) -> Result<(), TransactionError> {
    if issuer_public_key.trim().is_empty() {
        return Err(TransactionError::MissingCredentialField("issuer_public_key"));
    }
    if credential_data.is_null() {
        return Err(TransactionError::MissingCredentialField("credential_data"));
    }
    if issuer_signature.is_empty() {
        return Err(TransactionError::MissingCredentialField("issuer_signature"));
    }

    if !verify_signature(issuer_public_key, issuer_signature, credential_data) {
        return Err(TransactionError::InvalidCredentialSignature);
    }

    Ok(())
}
