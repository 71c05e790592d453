//! Typed records for the wallet coordination core
//!
//! All invariants are enforced at construction time:
//! - M-of-N thresholds are validated before a wallet exists
//! - proposals validate their output list up front
//! - subscriptions require a positive confirmation depth
//!
//! Records carry a version counter used by the store for optimistic
//! concurrency (see the `store` module).

pub mod address;
pub mod proposal;
pub mod records;
pub mod subscription;
pub mod wallet;

pub use address::{Address, Chain};
pub use proposal::{Action, ActionKind, Output, ProposalStatus, TxProposal};
pub use records::{Preferences, Session, TxNote};
pub use subscription::{ConfirmationSubscription, SubscriptionVariant};
pub use wallet::{Copayer, Network, Wallet};

use rand::RngCore;
use thiserror::Error;

/// Validation errors raised while constructing records
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),
    #[error("Invalid public key: {0}")]
    BadPublicKey(String),
    #[error("Name must not be empty")]
    EmptyName,
    #[error("Proposal has no outputs")]
    EmptyOutputs,
    #[error("Output amount must be positive")]
    ZeroAmount,
    #[error("Output destination must not be empty")]
    EmptyDestination,
    #[error("Subscription target must not be empty")]
    EmptyTarget,
    #[error("Confirmation depth must be positive")]
    ZeroDepth,
}

/// Generate a random 128-bit identifier as a hex string
pub fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_id_shape() {
        let id = random_id();
        assert_eq!(id.len(), 32);
        assert_ne!(id, random_id());
    }
}
