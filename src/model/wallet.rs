//! Shared wallet and copayer records
//!
//! A wallet is jointly owned by `n` copayers and requires `m` of them
//! to authorize spending. The wallet owns its copayer set; completeness
//! flips exactly once, when the n-th copayer joins.

use crate::crypto::sha256;
use crate::model::{random_id, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Network a wallet lives on
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Default for Network {
    fn default() -> Self {
        Network::Testnet
    }
}

/// One participant holding a key share in a shared wallet
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Copayer {
    /// Identifier derived from the copayer's key material
    pub id: String,
    /// Owning wallet
    pub wallet_id: String,
    /// Display name
    pub name: String,
    /// Extended public key contributing to shared address material
    pub xpub: String,
    /// Public key authenticating this copayer's requests (hex, compressed)
    pub request_pub_key: String,
    /// When the copayer joined
    pub joined_at: DateTime<Utc>,
}

impl Copayer {
    /// Create a copayer record; the id is a stable digest of the key material
    pub fn new(wallet_id: &str, name: &str, xpub: &str, request_pub_key: &str) -> Self {
        let digest = sha256(format!("{}{}", xpub, request_pub_key).as_bytes());
        Self {
            id: hex::encode(&digest[..16]),
            wallet_id: wallet_id.to_string(),
            name: name.to_string(),
            xpub: xpub.to_string(),
            request_pub_key: request_pub_key.to_string(),
            joined_at: Utc::now(),
        }
    }
}

/// A shared wallet requiring M-of-N authorization
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique wallet identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Required signatures (M in M-of-N); immutable after creation
    pub m: u8,
    /// Total copayers (N in M-of-N); immutable after creation
    pub n: u8,
    /// Network tag
    pub network: Network,
    /// Enrolled copayers, in join order
    pub copayers: Vec<Copayer>,
    /// True once exactly `n` copayers have joined; flips once
    pub complete: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency version, managed by the store
    pub version: u64,
}

impl Wallet {
    /// Create a new wallet, validating the M-of-N parameters
    pub fn new(name: &str, m: u8, n: u8, network: Network) -> Result<Self, ValidationError> {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if m == 0 {
            return Err(ValidationError::InvalidThreshold(
                "required signatures must be at least 1".to_string(),
            ));
        }
        if n == 0 {
            return Err(ValidationError::InvalidThreshold(
                "copayer count must be at least 1".to_string(),
            ));
        }
        if m > n {
            return Err(ValidationError::InvalidThreshold(format!(
                "required signatures {} exceed copayer count {}",
                m, n
            )));
        }

        Ok(Self {
            id: random_id(),
            name: name.to_string(),
            m,
            n,
            network,
            copayers: Vec::new(),
            complete: false,
            created_at: Utc::now(),
            version: 0,
        })
    }

    /// Whether all `n` copayers have joined
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Look up a copayer by id
    pub fn copayer(&self, copayer_id: &str) -> Option<&Copayer> {
        self.copayers.iter().find(|c| c.id == copayer_id)
    }

    /// Whether a request public key is already registered on this wallet
    pub fn has_request_key(&self, request_pub_key: &str) -> bool {
        self.copayers
            .iter()
            .any(|c| c.request_pub_key == request_pub_key)
    }

    /// The wallet's combined public-key material, sorted for determinism
    pub fn combined_key_material(&self) -> Vec<String> {
        let mut xpubs: Vec<String> = self.copayers.iter().map(|c| c.xpub.clone()).collect();
        xpubs.sort();
        xpubs
    }

    /// Get description like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.m, self.n)
    }
}
