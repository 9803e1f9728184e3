use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::block::Block;

/// Errors that can occur while talking to a peer node
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Cannot connect to peer {0}")]
    Unreachable(String),

    #[error("Peer {peer} answered with status {status}")]
    BadStatus { peer: String, status: u16 },

    #[error("Failed to decode chain from peer {peer}: {reason}")]
    Decode { peer: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A full chain as exchanged between nodes
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// The length of the chain
    pub length: usize,
}

/// Source of candidate chains during conflict resolution
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn fetch_chain(&self, peer: &str) -> Result<ChainResponse, PeerError>;
}

/// Fetches `GET http://{peer}/chain` with a bounded timeout
pub struct HttpPeerClient {
    client: Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_chain(&self, peer: &str) -> Result<ChainResponse, PeerError> {
        let url = format!("http://{}/chain", peer);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                PeerError::Unreachable(peer.to_string())
            } else {
                PeerError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::BadStatus {
                peer: peer.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<ChainResponse>().await.map_err(|e| PeerError::Decode {
            peer: peer.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Reduces a peer address to `host[:port]`
///
/// Full URLs keep only their authority; anything else is kept as given.
/// Returns `None` for blank input.
pub fn normalize_peer_address(address: &str) -> Option<String> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(address) {
        if let Some(host) = url.host_str() {
            return Some(match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            });
        }
    }

    Some(address.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_full_url() {
        assert_eq!(
            normalize_peer_address("http://192.168.0.5:5000/"),
            Some("192.168.0.5:5000".to_string())
        );
        assert_eq!(
            normalize_peer_address("https://node.example.org/chain"),
            Some("node.example.org".to_string())
        );
    }

    #[test]
    fn test_normalize_bare_address() {
        assert_eq!(
            normalize_peer_address("127.0.0.1:5001"),
            Some("127.0.0.1:5001".to_string())
        );
        assert_eq!(
            normalize_peer_address(" localhost:5002 "),
            Some("localhost:5002".to_string())
        );
    }

    #[test]
    fn test_normalize_blank() {
        assert_eq!(normalize_peer_address("   "), None);
    }

    #[test]
    fn test_chain_response_wire_shape() {
        let response = ChainResponse {
            chain: vec![Block::genesis()],
            length: 1,
        };
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["length"], 1);
        assert_eq!(value["chain"][0]["previous_hash"], "0");
    }
}
