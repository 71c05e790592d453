//! External ledger boundary
//!
//! The coordination core consumes two things from the blockchain side:
//! broadcast results and confirmation facts. Both arrive through this
//! boundary as opaque inputs; node integration lives behind the
//! [`LedgerGateway`] trait.

use crate::crypto::double_sha256_hex;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the external ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Fee below relay minimum")]
    InsufficientFee,
    #[error("Transaction double-spends a confirmed input")]
    DoubleSpend,
}

impl LedgerError {
    /// Whether a retry can possibly succeed. Fee and double-spend failures
    /// are permanent for a given signed transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Network(_))
    }
}

/// A confirmation fact from the ledger feed: a watched target has reached
/// some confirmation depth. Facts may arrive duplicated or out of order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerFact {
    /// Transaction id or address being confirmed
    pub target: String,
    /// Current confirmation depth
    pub depth: u32,
}

/// Broadcast access to the external ledger
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Submit a signed transaction; returns the ledger transaction id
    async fn broadcast(&self, signed_tx: &str) -> Result<String, LedgerError>;
}

/// Gateway that accepts every transaction and derives the txid from the
/// payload. Stands in for a node connection in development mode.
#[derive(Debug, Default)]
pub struct LoopbackLedger;

#[async_trait]
impl LedgerGateway for LoopbackLedger {
    async fn broadcast(&self, signed_tx: &str) -> Result<String, LedgerError> {
        let txid = double_sha256_hex(signed_tx.as_bytes());
        log::info!("loopback ledger accepted transaction {}", txid);
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_txid_is_deterministic() {
        let ledger = LoopbackLedger;
        let a = ledger.broadcast("raw|sigs:x").await.unwrap();
        let b = ledger.broadcast("raw|sigs:x").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LedgerError::Network("timeout".to_string()).is_retryable());
        assert!(!LedgerError::InsufficientFee.is_retryable());
        assert!(!LedgerError::DoubleSpend.is_retryable());
    }
}
