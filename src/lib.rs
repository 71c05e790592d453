//! Quorum-Wallet: a multi-signature wallet coordination service in Rust
//!
//! This crate provides the coordination core for shared wallets:
//! - M-of-N wallets jointly owned by independent copayers
//! - copayer enrollment with atomic completeness tracking
//! - transaction proposals driven through a signing quorum, with
//!   fail-fast rejection once quorum is mathematically unreachable
//! - deterministic shared-address derivation with gapless, conflict-free
//!   index allocation
//! - confirmation subscriptions with at-most-once notification delivery
//! - an abstract store with optimistic versioning, an in-memory
//!   implementation, and JSON snapshot persistence
//! - a REST + WebSocket gateway over the core
//!
//! # Example
//!
//! ```rust
//! use quorum_wallet::model::Network;
//! use quorum_wallet::registry::CopayerRegistry;
//! use quorum_wallet::store::MemoryStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let registry = CopayerRegistry::new(store);
//!
//! // A 2-of-3 wallet awaiting its copayers
//! let wallet = registry
//!     .create_wallet("team savings", 2, 3, Network::Testnet)
//!     .unwrap();
//! assert!(!wallet.is_complete());
//! ```

pub mod api;
pub mod crypto;
pub mod derivation;
pub mod dispatch;
pub mod ledger;
pub mod model;
pub mod quorum;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use crypto::KeyPair;
pub use derivation::AddressDeriver;
pub use dispatch::{EventBus, SubscriptionDispatcher, WalletEvent};
pub use ledger::{LedgerFact, LedgerGateway, LoopbackLedger};
pub use model::{
    Action, ActionKind, Address, Chain, ConfirmationSubscription, Copayer, Network, Output,
    ProposalStatus, SubscriptionVariant, TxProposal, Wallet,
};
pub use quorum::{CoordinatorConfig, QuorumCoordinator};
pub use registry::CopayerRegistry;
pub use store::{MemoryStore, Snapshotter, Store};
