//! Copayer enrollment and wallet completeness
//!
//! The registry is the single gate other components consult before
//! allowing proposal creation or address derivation: a wallet is usable
//! only once all `n` copayers have joined. The join that brings the count
//! to `n` flips the completeness flag in the same atomic update that
//! stores the copayer.

use crate::crypto::public_key_from_hex;
use crate::model::{Copayer, Network, ValidationError, Wallet};
use crate::store::{Store, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// How many times a read-modify-write is retried on a version conflict
/// before giving up
const CAS_RETRY_LIMIT: u32 = 16;

/// Enrollment errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Wallet not found: {0}")]
    UnknownWallet(String),
    #[error("Wallet already has all {0} copayers")]
    WalletFull(u8),
    #[error("Request public key already registered on this wallet")]
    DuplicateKey,
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// What a joining copayer supplies
#[derive(Clone, Debug)]
pub struct CopayerDescriptor {
    pub name: String,
    /// Extended public key contributing to shared address material
    pub xpub: String,
    /// Compressed secp256k1 public key (hex) authenticating requests
    pub request_pub_key: String,
}

/// Copayer enrollment and completeness tracking
#[derive(Clone)]
pub struct CopayerRegistry {
    store: Arc<dyn Store>,
}

impl CopayerRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a new wallet shell awaiting its copayers
    pub fn create_wallet(
        &self,
        name: &str,
        m: u8,
        n: u8,
        network: Network,
    ) -> Result<Wallet, RegistryError> {
        let wallet = Wallet::new(name, m, n, network)?;
        self.store.insert_wallet(wallet.clone())?;
        log::info!(
            "created wallet {} ({}) on {:?}",
            wallet.id,
            wallet.description(),
            wallet.network
        );
        Ok(wallet)
    }

    /// Enroll a copayer into a wallet.
    ///
    /// Fails with `WalletFull` once `n` copayers exist and `DuplicateKey`
    /// if the request public key is already registered. The join that
    /// completes the wallet flips the completeness flag atomically with
    /// the copayer insert.
    pub fn join(
        &self,
        wallet_id: &str,
        descriptor: &CopayerDescriptor,
    ) -> Result<Copayer, RegistryError> {
        if descriptor.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        // The request key must be a parseable compressed public key;
        // it authenticates every future action from this copayer.
        public_key_from_hex(&descriptor.request_pub_key)
            .map_err(|_| ValidationError::BadPublicKey(descriptor.request_pub_key.clone()))?;

        let mut attempts = 0;
        loop {
            let mut wallet = match self.store.wallet(wallet_id) {
                Ok(w) => w,
                Err(StoreError::NotFound { .. }) => {
                    return Err(RegistryError::UnknownWallet(wallet_id.to_string()))
                }
                Err(e) => return Err(e.into()),
            };

            if wallet.complete || wallet.copayers.len() >= wallet.n as usize {
                return Err(RegistryError::WalletFull(wallet.n));
            }
            if wallet.has_request_key(&descriptor.request_pub_key) {
                return Err(RegistryError::DuplicateKey);
            }

            let copayer = Copayer::new(
                wallet_id,
                &descriptor.name,
                &descriptor.xpub,
                &descriptor.request_pub_key,
            );
            wallet.copayers.push(copayer.clone());
            if wallet.copayers.len() == wallet.n as usize {
                wallet.complete = true;
            }

            match self.store.compare_and_swap_wallet(wallet) {
                Ok(saved) => {
                    if saved.complete {
                        log::info!("wallet {} is complete ({})", saved.id, saved.description());
                    }
                    return Ok(copayer);
                }
                Err(e) if e.is_conflict() && attempts < CAS_RETRY_LIMIT => {
                    attempts += 1;
                    log::debug!("join conflict on wallet {}, retrying", wallet_id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Whether all `n` copayers have joined
    pub fn is_complete(&self, wallet_id: &str) -> Result<bool, RegistryError> {
        match self.store.wallet(wallet_id) {
            Ok(w) => Ok(w.is_complete()),
            Err(StoreError::NotFound { .. }) => {
                Err(RegistryError::UnknownWallet(wallet_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a wallet with its copayers
    pub fn wallet(&self, wallet_id: &str) -> Result<Wallet, RegistryError> {
        match self.store.wallet(wallet_id) {
            Ok(w) => Ok(w),
            Err(StoreError::NotFound { .. }) => {
                Err(RegistryError::UnknownWallet(wallet_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
