//! Abstract persistence for the coordination core
//!
//! The core is written against the [`Store`] trait rather than a concrete
//! database. Any backend works as long as it provides atomic per-entity
//! updates (optimistic versioning via the compare-and-swap methods) and
//! unique-constraint enforcement on (wallet, chain, index) address slots.
//!
//! Components receive the store as `Arc<dyn Store>`; there is no global
//! registry of entities.

pub mod memory;
pub mod snapshot;

pub use memory::MemoryStore;
pub use snapshot::{SnapshotConfig, Snapshotter};

use crate::model::{
    Address, Chain, ConfirmationSubscription, Preferences, Session, TxNote, TxProposal, Wallet,
};
use thiserror::Error;

/// Store-layer errors
///
/// `VersionConflict` is the optimistic-concurrency signal; callers retry
/// their read-modify-write. Everything else is fatal for the current
/// request and must be logged, never swallowed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("Version conflict on {entity} {id}")]
    VersionConflict { entity: &'static str, id: String },
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, id: &str) -> Self {
        StoreError::VersionConflict {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether this is the transient optimistic-concurrency signal
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

/// Entity repository contract for the coordination core.
///
/// The `compare_and_swap_*` methods expect the caller to pass back an
/// entity whose `version` still matches the stored one; on success the
/// store bumps the version and returns the stored copy. A mismatch yields
/// `VersionConflict` and the caller retries.
pub trait Store: Send + Sync {
    // Wallets
    fn insert_wallet(&self, wallet: Wallet) -> Result<(), StoreError>;
    fn wallet(&self, id: &str) -> Result<Wallet, StoreError>;
    fn compare_and_swap_wallet(&self, wallet: Wallet) -> Result<Wallet, StoreError>;

    // Addresses. Index allocation is an atomic counter per (wallet, chain);
    // the slot uniqueness constraint backs it up.
    fn allocate_index(&self, wallet_id: &str, chain: Chain) -> Result<u32, StoreError>;
    fn insert_address(&self, address: Address) -> Result<(), StoreError>;
    fn addresses(&self, wallet_id: &str) -> Result<Vec<Address>, StoreError>;

    // Proposals
    fn insert_proposal(&self, proposal: TxProposal) -> Result<(), StoreError>;
    fn proposal(&self, id: &str) -> Result<TxProposal, StoreError>;
    fn compare_and_swap_proposal(&self, proposal: TxProposal) -> Result<TxProposal, StoreError>;
    fn proposals_for_wallet(&self, wallet_id: &str) -> Result<Vec<TxProposal>, StoreError>;
    /// Proposals in a non-terminal state, for the expiry sweep
    fn open_proposals(&self) -> Result<Vec<TxProposal>, StoreError>;

    // Subscriptions
    fn insert_subscription(&self, sub: ConfirmationSubscription) -> Result<(), StoreError>;
    fn subscriptions_for_target(
        &self,
        target: &str,
    ) -> Result<Vec<ConfirmationSubscription>, StoreError>;
    /// Atomically flip `triggered` false->true. Returns false if it was
    /// already set, so a subscription can never fire twice.
    fn mark_triggered(&self, id: &str) -> Result<bool, StoreError>;

    // Per-copayer records
    fn put_preferences(&self, prefs: Preferences) -> Result<(), StoreError>;
    fn preferences(
        &self,
        wallet_id: &str,
        copayer_id: &str,
    ) -> Result<Option<Preferences>, StoreError>;
    fn put_tx_note(&self, note: TxNote) -> Result<(), StoreError>;
    fn tx_note(&self, wallet_id: &str, txid: &str) -> Result<Option<TxNote>, StoreError>;
    fn put_session(&self, session: Session) -> Result<(), StoreError>;
    fn session(&self, token: &str) -> Result<Option<Session>, StoreError>;
}
