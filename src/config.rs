use std::time::Duration;

use clap::Parser;
use uuid::Uuid;

use crate::blockchain::chain::{DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD};

/// Runtime settings of a ledger node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub difficulty: usize,
    pub mining_reward: u64,
    /// Upper bound for a single peer chain fetch
    pub peer_timeout: Duration,
    /// Background conflict resolution period, disabled when `None`
    pub sync_interval: Option<Duration>,
    pub peers: Vec<String>,
    /// Miner address used when a mine request names none
    pub node_id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host: "0.0.0.0".to_string(),
            port: 5000,
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: DEFAULT_MINING_REWARD,
            peer_timeout: Duration::from_secs(5),
            sync_interval: None,
            peers: Vec::new(),
            node_id: new_node_id(),
        }
    }
}

/// LockCore ledger node
#[derive(Parser, Debug)]
#[command(name = "lockcore-node")]
#[command(about = "Proof-of-work ledger node with DID and verifiable credential support")]
pub struct Args {
    /// Address to bind the HTTP API to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 5000)]
    pub port: u16,

    /// Leading zero hex digits required in a block hash
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: usize,

    /// Amount credited to the miner of each block
    #[arg(long, default_value_t = DEFAULT_MINING_REWARD)]
    pub mining_reward: u64,

    /// Timeout in seconds for fetching a peer's chain
    #[arg(long, default_value_t = 5)]
    pub peer_timeout_secs: u64,

    /// Resolve conflicts with peers every N seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    pub sync_interval_secs: u64,

    /// Peer node address, may be repeated
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Identifier used as the default miner address
    #[arg(long)]
    pub node_id: Option<String>,
}

impl From<Args> for NodeConfig {
    fn from(args: Args) -> Self {
        NodeConfig {
            host: args.host,
            port: args.port,
            difficulty: args.difficulty,
            mining_reward: args.mining_reward,
            peer_timeout: Duration::from_secs(args.peer_timeout_secs.max(1)),
            sync_interval: (args.sync_interval_secs > 0)
                .then(|| Duration::from_secs(args.sync_interval_secs)),
            peers: args.peers,
            node_id: args.node_id.unwrap_or_else(new_node_id),
        }
    }
}

fn new_node_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from(Args::try_parse_from(["lockcore-node"]).unwrap());

        assert_eq!(config.port, 5000);
        assert_eq!(config.difficulty, DEFAULT_DIFFICULTY);
        assert_eq!(config.mining_reward, DEFAULT_MINING_REWARD);
        assert_eq!(config.peer_timeout, Duration::from_secs(5));
        assert!(config.sync_interval.is_none());
        assert!(config.peers.is_empty());
        assert_eq!(config.node_id.len(), 32);
    }

    #[test]
    fn test_parse_arguments() {
        let args = Args::try_parse_from([
            "lockcore-node",
            "-p",
            "5001",
            "--difficulty",
            "3",
            "--sync-interval-secs",
            "30",
            "--peer",
            "127.0.0.1:5000",
            "--peer",
            "http://127.0.0.1:5002",
            "--node-id",
            "miner-1",
        ])
        .unwrap();
        let config = NodeConfig::from(args);

        assert_eq!(config.port, 5001);
        assert_eq!(config.difficulty, 3);
        assert_eq!(config.sync_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.peers, vec!["127.0.0.1:5000", "http://127.0.0.1:5002"]);
        assert_eq!(config.node_id, "miner-1");
    }

    #[test]
    fn test_default_node_ids_are_unique() {
        assert_ne!(NodeConfig::default().node_id, NodeConfig::default().node_id);
    }
}
