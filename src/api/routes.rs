use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// Paths are unprefixed so that `GET /chain` is what peers fetch.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/mine", web::get().to(handlers::mine_block))
        .route("/transactions/new", web::post().to(handlers::new_transaction))
        .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
        .route("/chain", web::get().to(handlers::get_chain))
        .route("/validate", web::get().to(handlers::validate_chain))
        .route("/balance/{address}", web::get().to(handlers::get_balance))
        .route("/identity/resolve/{did}", web::get().to(handlers::resolve_did))
        .route("/identity/credentials/get/{did}", web::get().to(handlers::get_credentials))
        .route("/nodes/register", web::post().to(handlers::register_nodes))
        .route("/nodes/resolve", web::get().to(handlers::resolve_conflicts));
}
