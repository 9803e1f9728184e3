use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;

use blockchain::{Blockchain, HttpPeerClient, PeerClient};
use config::{Args, NodeConfig};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::mine_block,
        api::handlers::new_transaction,
        api::handlers::get_pending_transactions,
        api::handlers::get_chain,
        api::handlers::validate_chain,
        api::handlers::get_balance,
        api::handlers::resolve_did,
        api::handlers::get_credentials,
        api::handlers::register_nodes,
        api::handlers::resolve_conflicts
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::ChainResponse,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            api::handlers::ErrorResponse,
            api::handlers::MineResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::BalanceResponse,
            api::handlers::DidResponse,
            api::handlers::CredentialsResponse,
            api::handlers::RegisterNodesRequest,
            api::handlers::RegisterNodesResponse,
            api::handlers::ResolveResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger, identity and peer endpoints")
    ),
    info(
        title = "LockCore Node API",
        version = "0.1.0",
        description = "Proof-of-work ledger with DID registration and verifiable credentials",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

/// Periodically adopts longer valid chains from registered peers
fn spawn_peer_sync(
    blockchain: web::Data<Blockchain>,
    peer_client: Arc<dyn PeerClient>,
    period: std::time::Duration,
) {
    actix_web::rt::spawn(async move {
        let mut interval = actix_web::rt::time::interval(period);
        loop {
            interval.tick().await;
            if blockchain.resolve_conflicts(peer_client.as_ref()).await {
                info!("Background sync replaced the local chain");
            }
        }
    });
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::from(Args::parse());

    let blockchain = web::Data::new(Blockchain::from_config(&config));
    let peer_client: Arc<dyn PeerClient> = Arc::new(
        HttpPeerClient::new(config.peer_timeout).context("failed to build peer HTTP client")?,
    );
    let node = web::Data::new(api::NodeContext {
        node_id: config.node_id.clone(),
        peer_client: peer_client.clone(),
    });

    info!(
        "Node {} starting with difficulty {} and reward {}",
        config.node_id, config.difficulty, config.mining_reward
    );

    if let Some(period) = config.sync_interval {
        info!("Syncing with peers every {}s", period.as_secs());
        spawn_peer_sync(blockchain.clone(), peer_client, period);
    }

    info!("Starting HTTP server at http://{}:{}", config.host, config.port);

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain.clone())
            .app_data(node.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?
    .run()
    .await
    .context("HTTP server terminated with an error")
}
