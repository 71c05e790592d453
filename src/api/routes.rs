//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use crate::api::websocket::ws_handler;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    // Configure CORS for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // WebSocket event stream
        .route("/ws", get(ws_handler))
        // Wallets and enrollment
        .route("/api/wallets", post(handlers::create_wallet))
        .route("/api/wallets/{id}", get(handlers::get_wallet))
        .route("/api/wallets/{id}/copayers", post(handlers::join_wallet))
        // Addresses
        .route(
            "/api/wallets/{id}/addresses",
            post(handlers::derive_address).get(handlers::list_addresses),
        )
        // Proposals
        .route(
            "/api/wallets/{id}/proposals",
            post(handlers::create_proposal).get(handlers::list_pending_proposals),
        )
        .route("/api/proposals/{id}", get(handlers::get_proposal))
        .route(
            "/api/proposals/{id}/actions",
            post(handlers::act_on_proposal),
        )
        // Confirmation subscriptions and the ledger feed
        .route(
            "/api/subscriptions",
            post(handlers::subscribe_confirmation),
        )
        .route("/api/ledger/facts", post(handlers::ingest_ledger_fact))
        // Per-copayer records
        .route(
            "/api/wallets/{id}/copayers/{copayer_id}/preferences",
            put(handlers::put_preferences).get(handlers::get_preferences),
        )
        .route(
            "/api/wallets/{id}/txnotes/{txid}",
            put(handlers::put_tx_note).get(handlers::get_tx_note),
        )
        // Sessions
        .route("/api/sessions", post(handlers::create_session))
        .route("/api/sessions/{token}", get(handlers::get_session))
        // Add state and middleware
        .with_state(state)
        .layer(cors)
}
