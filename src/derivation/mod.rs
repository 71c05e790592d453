//! Deterministic shared-address derivation
//!
//! Addresses are derived from the wallet's combined public-key material
//! plus the (chain, index) slot, so every copayer can reproduce them
//! independently. Index allocation goes through the store's atomic
//! counter; two concurrent calls can never observe the same index, and
//! the sequence per (wallet, chain) is contiguous from zero.

use crate::crypto::script_address;
use crate::model::{Address, Chain, Wallet};
use crate::store::{Store, StoreError};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

/// Address derivation errors
#[derive(Error, Debug)]
pub enum DeriveError {
    #[error("Wallet not found: {0}")]
    UnknownWallet(String),
    #[error("Wallet is not complete yet")]
    WalletIncomplete,
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Derives the next unused shared address for a wallet chain
#[derive(Clone)]
pub struct AddressDeriver {
    store: Arc<dyn Store>,
}

impl AddressDeriver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Derive the next address on a chain.
    ///
    /// The address material is only final once all `n` copayers have
    /// contributed their keys, so incomplete wallets are refused.
    pub fn next_address(&self, wallet_id: &str, chain: Chain) -> Result<Address, DeriveError> {
        let wallet = match self.store.wallet(wallet_id) {
            Ok(w) => w,
            Err(StoreError::NotFound { .. }) => {
                return Err(DeriveError::UnknownWallet(wallet_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !wallet.is_complete() {
            return Err(DeriveError::WalletIncomplete);
        }

        let index = self.store.allocate_index(wallet_id, chain)?;
        let address = derive_address(&wallet, chain, index);

        // The unique constraint on (wallet, chain, index) backs up the
        // counter; a violation here means the store broke its contract.
        self.store.insert_address(address.clone())?;

        log::debug!(
            "derived {} address {} for wallet {} at index {}",
            chain,
            address.address,
            wallet_id,
            index
        );
        Ok(address)
    }

    /// All addresses derived so far for a wallet
    pub fn addresses(&self, wallet_id: &str) -> Result<Vec<Address>, DeriveError> {
        Ok(self.store.addresses(wallet_id)?)
    }
}

/// Derive the address string at a (chain, index) slot.
///
/// Script data = threshold || sorted xpubs || chain tag || index, hashed
/// into a P2SH-style Base58Check address. Sorting makes the result
/// independent of join order.
fn derive_address(wallet: &Wallet, chain: Chain, index: u32) -> Address {
    let mut script_data = vec![wallet.m];
    for xpub in wallet.combined_key_material() {
        script_data.extend_from_slice(xpub.as_bytes());
    }
    script_data.extend_from_slice(chain.tag().as_bytes());
    script_data.extend_from_slice(&index.to_le_bytes());

    Address {
        wallet_id: wallet.id.clone(),
        chain,
        index,
        address: script_address(&script_data),
        created_at: Utc::now(),
    }
}
