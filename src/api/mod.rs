//! REST API module
//!
//! The thin gateway over the coordination core. Every operation returns a
//! structured success payload or a structured error; nothing raw reaches
//! the wire.
//!
//! # Endpoints
//!
//! ## Wallets
//! - `POST /api/wallets` - Create a wallet shell
//! - `GET /api/wallets/{id}` - Wallet with copayers
//! - `POST /api/wallets/{id}/copayers` - Join a wallet
//!
//! ## Addresses
//! - `POST /api/wallets/{id}/addresses` - Derive the next address
//! - `GET /api/wallets/{id}/addresses` - List derived addresses
//!
//! ## Proposals
//! - `POST /api/wallets/{id}/proposals` - Open a proposal
//! - `GET /api/wallets/{id}/proposals` - Pending proposals
//! - `GET /api/proposals/{id}` - One proposal
//! - `POST /api/proposals/{id}/actions` - Accept or reject
//!
//! ## Confirmations
//! - `POST /api/subscriptions` - Register a confirmation watch
//! - `POST /api/ledger/facts` - Ingest a ledger confirmation fact
//!
//! ## Records
//! - `PUT|GET /api/wallets/{id}/copayers/{copayer_id}/preferences`
//! - `PUT|GET /api/wallets/{id}/txnotes/{txid}`
//! - `POST /api/sessions`, `GET /api/sessions/{token}`
//!
//! ## WebSocket
//! - `GET /ws` - Event stream (proposal lifecycle, confirmations)

pub mod handlers;
pub mod routes;
pub mod websocket;

pub use handlers::ApiState;
pub use routes::create_router;
