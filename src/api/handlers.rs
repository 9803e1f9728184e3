use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::blockchain::{
    Address, Block, Blockchain, ChainResponse, DigitalSignature, PeerClient, Transaction,
};

/// Data structure for the blockchain state
pub type BlockchainData = web::Data<Blockchain>;

/// Node-level collaborators shared by the handlers
pub struct NodeContext {
    /// Miner address used when a mine request names none
    pub node_id: String,

    /// Transport used to fetch peer chains
    pub peer_client: Arc<dyn PeerClient>,
}

pub type NodeData = web::Data<NodeContext>;

/// Error body returned by every failing endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_body(message: impl Into<String>) -> ErrorResponse {
    ErrorResponse {
        error: message.into(),
    }
}

/// Query for the mine endpoint
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MineQuery {
    /// The miner's address, defaults to the node identifier
    pub miner_address: Option<String>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The transaction, tagged by its `type` field
    #[schema(value_type = Object)]
    pub transaction: Value,

    /// Signature over the canonical form of the transaction
    pub signature: DigitalSignature,

    /// The signer's public key (hex)
    pub public_key: String,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: i128,
}

/// Response for the DID resolution endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DidResponse {
    pub did: String,
    pub owner_address: Address,
}

/// Response for the credentials endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CredentialsResponse {
    pub subject_did: String,
    pub credentials: Vec<Transaction>,
}

/// Request for the node registration endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterNodesRequest {
    /// Peer addresses, either `host:port` or full URLs
    pub nodes: Option<Vec<String>>,
}

/// Response for the node registration endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterNodesResponse {
    pub message: String,
    pub total_nodes: Vec<String>,
}

/// Response for the conflict resolution endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ResolveResponse {
    pub message: String,
    pub replaced: bool,
    pub chain: Vec<Block>,
}

/// Mine a new block
///
/// Packages a reward plus all pending transactions into a new block
#[utoipa::path(
    get,
    path = "/mine",
    params(MineQuery),
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 500, description = "Mining failed", body = ErrorResponse)
    )
)]
pub async fn mine_block(
    blockchain: BlockchainData,
    node: NodeData,
    query: web::Query<MineQuery>,
) -> impl Responder {
    let miner_address = Address(
        query
            .into_inner()
            .miner_address
            .filter(|address| !address.trim().is_empty())
            .unwrap_or_else(|| node.node_id.clone()),
    );

    // Proof of work is CPU bound, keep it off the async workers
    let result = web::block(move || blockchain.mine_block(&miner_address)).await;

    match result {
        Ok(Ok(block)) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Forged".to_string(),
            block,
        }),
        Ok(Err(err)) => {
            error!("Failed to mine block: {}", err);
            HttpResponse::InternalServerError().json(error_body(format!("Failed to mine block: {}", err)))
        }
        Err(err) => {
            error!("Mining worker failed: {}", err);
            HttpResponse::InternalServerError().json(error_body("Mining worker failed"))
        }
    }
}

/// Submit a new transaction
///
/// Validates a signed transaction and adds it to the pending transactions
#[utoipa::path(
    post,
    path = "/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction accepted", body = TransactionResponse),
        (status = 400, description = "Invalid transaction", body = ErrorResponse)
    )
)]
pub async fn new_transaction(
    blockchain: BlockchainData,
    request: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = request.into_inner();

    let transaction = match Transaction::from_value(request.transaction) {
        Ok(transaction) => transaction,
        Err(err) => {
            return HttpResponse::BadRequest().json(error_body(format!("Invalid transaction: {}", err)));
        }
    };

    match blockchain.add_transaction(transaction, &request.signature, &request.public_key) {
        Ok(block_index) => HttpResponse::Created().json(TransactionResponse {
            message: format!("Transaction will be added to Block {}", block_index),
            block_index,
        }),
        Err(err) => HttpResponse::BadRequest().json(error_body(format!("Invalid transaction: {}", err))),
    }
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.get_pending_transactions())
}

/// Get the full blockchain
///
/// This is also the document peers fetch during conflict resolution
#[utoipa::path(
    get,
    path = "/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    let chain = blockchain.get_chain();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
    })
}

/// Check if the local blockchain is valid
#[utoipa::path(
    get,
    path = "/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.is_valid())
}

/// Get the balance of an address
#[utoipa::path(
    get,
    path = "/balance/{address}",
    params(("address" = String, Path, description = "Ledger address")),
    responses(
        (status = 200, description = "Balance computed from chain history", body = BalanceResponse)
    )
)]
pub async fn get_balance(blockchain: BlockchainData, address: web::Path<String>) -> impl Responder {
    let address = Address(address.into_inner());
    let balance = blockchain.get_balance(&address);

    HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
    })
}

/// Resolve a DID to its owner address
#[utoipa::path(
    get,
    path = "/identity/resolve/{did}",
    params(("did" = String, Path, description = "DID string")),
    responses(
        (status = 200, description = "DID resolved", body = DidResponse),
        (status = 404, description = "DID not found", body = ErrorResponse)
    )
)]
pub async fn resolve_did(blockchain: BlockchainData, did: web::Path<String>) -> impl Responder {
    let did = did.into_inner();

    match blockchain.resolve_did(&did) {
        Some(owner_address) => HttpResponse::Ok().json(DidResponse { did, owner_address }),
        None => HttpResponse::NotFound().json(error_body("DID not found.")),
    }
}

/// Get all credentials issued to a DID
#[utoipa::path(
    get,
    path = "/identity/credentials/get/{did}",
    params(("did" = String, Path, description = "Subject DID")),
    responses(
        (status = 200, description = "Credentials found", body = CredentialsResponse),
        (status = 404, description = "No credentials found", body = ErrorResponse)
    )
)]
pub async fn get_credentials(blockchain: BlockchainData, did: web::Path<String>) -> impl Responder {
    let subject_did = did.into_inner();
    let credentials = blockchain.get_credentials(&subject_did);

    if credentials.is_empty() {
        return HttpResponse::NotFound().json(error_body("No credentials found."));
    }

    HttpResponse::Ok().json(CredentialsResponse {
        subject_did,
        credentials,
    })
}

/// Register peer nodes
#[utoipa::path(
    post,
    path = "/nodes/register",
    request_body = RegisterNodesRequest,
    responses(
        (status = 201, description = "Nodes registered", body = RegisterNodesResponse),
        (status = 400, description = "No node list supplied", body = ErrorResponse)
    )
)]
pub async fn register_nodes(
    blockchain: BlockchainData,
    request: web::Json<RegisterNodesRequest>,
) -> impl Responder {
    let Some(nodes) = request.into_inner().nodes else {
        return HttpResponse::BadRequest().json(error_body("Please supply a valid list of nodes"));
    };

    for node in &nodes {
        blockchain.register_peer(node);
    }

    HttpResponse::Created().json(RegisterNodesResponse {
        message: "New nodes have been added".to_string(),
        total_nodes: blockchain.peers(),
    })
}

/// Resolve conflicts with registered peers
///
/// Adopts the first strictly longer valid chain found among the peers
#[utoipa::path(
    get,
    path = "/nodes/resolve",
    responses(
        (status = 200, description = "Conflict resolution finished", body = ResolveResponse)
    )
)]
pub async fn resolve_conflicts(blockchain: BlockchainData, node: NodeData) -> impl Responder {
    let replaced = blockchain.resolve_conflicts(node.peer_client.as_ref()).await;

    let message = if replaced {
        "Our chain was replaced"
    } else {
        "Our chain is authoritative"
    };

    HttpResponse::Ok().json(ResolveResponse {
        message: message.to_string(),
        replaced,
        chain: blockchain.get_chain(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::peers::PeerError;
    use crate::blockchain::Wallet;
    use actix_web::{http::StatusCode, test, App};
    use async_trait::async_trait;
    use serde_json::json;

    struct NoPeers;

    #[async_trait]
    impl PeerClient for NoPeers {
        async fn fetch_chain(&self, peer: &str) -> Result<ChainResponse, PeerError> {
            Err(PeerError::Unreachable(peer.to_string()))
        }
    }

    fn state() -> (BlockchainData, NodeData) {
        let blockchain = web::Data::new(Blockchain::with_params(1, 25));
        let node = web::Data::new(NodeContext {
            node_id: "node-1".to_string(),
            peer_client: Arc::new(NoPeers),
        });
        (blockchain, node)
    }

    #[actix_web::test]
    async fn test_submit_mine_and_query() {
        let (blockchain, node) = state();
        let app = test::init_service(
            App::new()
                .app_data(blockchain.clone())
                .app_data(node.clone())
                .configure(configure_routes),
        )
        .await;

        let sender = Wallet::new();
        let recipient = Wallet::new();
        let transaction = Transaction::new_transfer(sender.address().clone(), recipient.address().clone(), 10);
        let body = json!({
            "transaction": transaction,
            "signature": sender.sign(&transaction).unwrap(),
            "public_key": sender.public_key_hex(),
        });

        let request = test::TestRequest::post().uri("/transactions/new").set_json(&body).to_request();
        let response: TransactionResponse = test::call_and_read_body_json(&app, request).await;
        assert_eq!(response.block_index, 1);

        let request = test::TestRequest::get().uri("/mine").to_request();
        let mined: MineResponse = test::call_and_read_body_json(&app, request).await;
        assert_eq!(mined.block.index(), 1);
        assert_eq!(blockchain.get_balance(&Address::from("node-1")), 25);

        let uri = format!("/balance/{}", recipient.address());
        let request = test::TestRequest::get().uri(&uri).to_request();
        let balance: BalanceResponse = test::call_and_read_body_json(&app, request).await;
        assert_eq!(balance.balance, 10);

        let request = test::TestRequest::get().uri("/chain").to_request();
        let chain: ChainResponse = test::call_and_read_body_json(&app, request).await;
        assert_eq!(chain.length, 2);
        assert_eq!(chain.chain.len(), 2);
    }

    #[actix_web::test]
    async fn test_rejected_transaction_is_bad_request() {
        let (blockchain, node) = state();
        let app = test::init_service(
            App::new()
                .app_data(blockchain.clone())
                .app_data(node)
                .configure(configure_routes),
        )
        .await;

        let wallet = Wallet::new();
        let body = json!({
            "transaction": {"type": "reward", "sender": "0", "recipient": wallet.address(), "amount": 1000},
            "signature": wallet.sign(&json!({})).unwrap(),
            "public_key": wallet.public_key_hex(),
        });

        let request = test::TestRequest::post().uri("/transactions/new").set_json(&body).to_request();
        let response = test::call_service(&app, request).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(blockchain.get_pending_transactions().is_empty());
    }

    #[actix_web::test]
    async fn test_identity_misses_are_not_found() {
        let (blockchain, node) = state();
        let app = test::init_service(
            App::new()
                .app_data(blockchain)
                .app_data(node)
                .configure(configure_routes),
        )
        .await;

        for uri in ["/identity/resolve/did:test:nobody", "/identity/credentials/get/did:test:nobody"] {
            let request = test::TestRequest::get().uri(uri).to_request();
            let response = test::call_service(&app, request).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[actix_web::test]
    async fn test_identity_round_trip() {
        let (blockchain, node) = state();
        let app = test::init_service(
            App::new()
                .app_data(blockchain.clone())
                .app_data(node)
                .configure(configure_routes),
        )
        .await;

        let holder = Wallet::new();
        let university = Wallet::new();
        let registration = Transaction::new_register_did(holder.address().clone(), "did:test:alice");
        let credential =
            Transaction::new_issue_vc(&university, "did:test:alice", json!({"degree": "BSc"})).unwrap();

        for (wallet, transaction) in [(&holder, &registration), (&university, &credential)] {
            let body = json!({
                "transaction": transaction,
                "signature": wallet.sign(transaction).unwrap(),
                "public_key": wallet.public_key_hex(),
            });
            let request = test::TestRequest::post().uri("/transactions/new").set_json(&body).to_request();
            let response = test::call_service(&app, request).await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let request = test::TestRequest::get().uri("/mine").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let request = test::TestRequest::get().uri("/identity/resolve/did:test:alice").to_request();
        let resolved: DidResponse = test::call_and_read_body_json(&app, request).await;
        assert_eq!(resolved.did, "did:test:alice");
        assert_eq!(&resolved.owner_address, holder.address());

        let request = test::TestRequest::get()
            .uri("/identity/credentials/get/did:test:alice")
            .to_request();
        let found: CredentialsResponse = test::call_and_read_body_json(&app, request).await;
        assert_eq!(found.subject_did, "did:test:alice");
        assert_eq!(found.credentials, vec![credential]);
    }

    #[actix_web::test]
    async fn test_register_nodes_and_resolve() {
        let (blockchain, node) = state();
        let app = test::init_service(
            App::new()
                .app_data(blockchain.clone())
                .app_data(node)
                .configure(configure_routes),
        )
        .await;

        let request = test::TestRequest::post()
            .uri("/nodes/register")
            .set_json(json!({"nodes": ["http://127.0.0.1:5001", "127.0.0.1:5002"]}))
            .to_request();
        let registered: RegisterNodesResponse = test::call_and_read_body_json(&app, request).await;
        assert_eq!(registered.total_nodes, vec!["127.0.0.1:5001", "127.0.0.1:5002"]);

        let request = test::TestRequest::post()
            .uri("/nodes/register")
            .set_json(json!({}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = test::TestRequest::get().uri("/nodes/resolve").to_request();
        let resolved: ResolveResponse = test::call_and_read_body_json(&app, request).await;
        assert!(!resolved.replaced);
        assert_eq!(resolved.chain, blockchain.get_chain());
    }
}
