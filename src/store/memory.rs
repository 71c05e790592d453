//! In-memory store implementation
//!
//! All entity maps live behind one mutex, which makes every trait method
//! a single atomic step: index allocation is increment-under-lock, the
//! compare-and-swap methods check the version and bump it in one critical
//! section, and `mark_triggered` is a test-and-set.
//!
//! The whole dataset serializes as one [`StoreData`] document, which is
//! what the snapshot layer persists.

use crate::model::{
    Address, Chain, ConfirmationSubscription, Preferences, ProposalStatus, Session, TxNote,
    TxProposal, Wallet,
};
use crate::store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Serializable contents of the in-memory store
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreData {
    /// Wallets by id (each owning its copayer list)
    wallets: HashMap<String, Wallet>,
    /// Proposals by id
    proposals: HashMap<String, TxProposal>,
    /// Derived addresses grouped by wallet
    addresses: HashMap<String, Vec<Address>>,
    /// Next free derivation index per "wallet/chain" key
    counters: HashMap<String, u32>,
    /// Confirmation subscriptions by id
    subscriptions: HashMap<String, ConfirmationSubscription>,
    /// Preferences per "wallet/copayer" key
    preferences: HashMap<String, Preferences>,
    /// Notes per "wallet/txid" key
    notes: HashMap<String, TxNote>,
    /// Sessions by token
    sessions: HashMap<String, Session>,
}

fn counter_key(wallet_id: &str, chain: Chain) -> String {
    format!("{}/{}", wallet_id, chain.tag())
}

fn scoped_key(left: &str, right: &str) -> String {
    format!("{}/{}", left, right)
}

/// Mutex-backed [`Store`] implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot document
    pub fn from_data(data: StoreData) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    /// Clone the current contents for snapshotting
    pub fn export(&self) -> StoreData {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, StoreData> {
        self.data.lock().expect("store mutex poisoned")
    }
}

impl Store for MemoryStore {
    fn insert_wallet(&self, wallet: Wallet) -> Result<(), StoreError> {
        let mut data = self.lock();
        if data.wallets.contains_key(&wallet.id) {
            return Err(StoreError::UniqueViolation(format!(
                "wallet {} already exists",
                wallet.id
            )));
        }
        data.wallets.insert(wallet.id.clone(), wallet);
        Ok(())
    }

    fn wallet(&self, id: &str) -> Result<Wallet, StoreError> {
        self.lock()
            .wallets
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("wallet", id))
    }

    fn compare_and_swap_wallet(&self, mut wallet: Wallet) -> Result<Wallet, StoreError> {
        let mut data = self.lock();
        let stored = data
            .wallets
            .get(&wallet.id)
            .ok_or_else(|| StoreError::not_found("wallet", &wallet.id))?;
        if stored.version != wallet.version {
            return Err(StoreError::conflict("wallet", &wallet.id));
        }
        wallet.version += 1;
        data.wallets.insert(wallet.id.clone(), wallet.clone());
        Ok(wallet)
    }

    fn allocate_index(&self, wallet_id: &str, chain: Chain) -> Result<u32, StoreError> {
        let mut data = self.lock();
        let counter = data.counters.entry(counter_key(wallet_id, chain)).or_insert(0);
        let index = *counter;
        *counter += 1;
        Ok(index)
    }

    fn insert_address(&self, address: Address) -> Result<(), StoreError> {
        let mut data = self.lock();
        let slots = data
            .addresses
            .entry(address.wallet_id.clone())
            .or_default();
        if slots
            .iter()
            .any(|a| a.chain == address.chain && a.index == address.index)
        {
            return Err(StoreError::UniqueViolation(format!(
                "address slot {}/{}/{} already taken",
                address.wallet_id, address.chain, address.index
            )));
        }
        slots.push(address);
        Ok(())
    }

    fn addresses(&self, wallet_id: &str) -> Result<Vec<Address>, StoreError> {
        Ok(self
            .lock()
            .addresses
            .get(wallet_id)
            .cloned()
            .unwrap_or_default())
    }

    fn insert_proposal(&self, proposal: TxProposal) -> Result<(), StoreError> {
        let mut data = self.lock();
        if data.proposals.contains_key(&proposal.id) {
            return Err(StoreError::UniqueViolation(format!(
                "proposal {} already exists",
                proposal.id
            )));
        }
        data.proposals.insert(proposal.id.clone(), proposal);
        Ok(())
    }

    fn proposal(&self, id: &str) -> Result<TxProposal, StoreError> {
        self.lock()
            .proposals
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("proposal", id))
    }

    fn compare_and_swap_proposal(
        &self,
        mut proposal: TxProposal,
    ) -> Result<TxProposal, StoreError> {
        let mut data = self.lock();
        let stored = data
            .proposals
            .get(&proposal.id)
            .ok_or_else(|| StoreError::not_found("proposal", &proposal.id))?;
        if stored.version != proposal.version {
            return Err(StoreError::conflict("proposal", &proposal.id));
        }
        proposal.version += 1;
        data.proposals.insert(proposal.id.clone(), proposal.clone());
        Ok(proposal)
    }

    fn proposals_for_wallet(&self, wallet_id: &str) -> Result<Vec<TxProposal>, StoreError> {
        let mut found: Vec<TxProposal> = self
            .lock()
            .proposals
            .values()
            .filter(|p| p.wallet_id == wallet_id)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }

    fn open_proposals(&self) -> Result<Vec<TxProposal>, StoreError> {
        Ok(self
            .lock()
            .proposals
            .values()
            .filter(|p| {
                matches!(
                    p.status,
                    ProposalStatus::Pending | ProposalStatus::Accepted
                )
            })
            .cloned()
            .collect())
    }

    fn insert_subscription(&self, sub: ConfirmationSubscription) -> Result<(), StoreError> {
        let mut data = self.lock();
        if data.subscriptions.contains_key(&sub.id) {
            return Err(StoreError::UniqueViolation(format!(
                "subscription {} already exists",
                sub.id
            )));
        }
        data.subscriptions.insert(sub.id.clone(), sub);
        Ok(())
    }

    fn subscriptions_for_target(
        &self,
        target: &str,
    ) -> Result<Vec<ConfirmationSubscription>, StoreError> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.target == target)
            .cloned()
            .collect())
    }

    fn mark_triggered(&self, id: &str) -> Result<bool, StoreError> {
        let mut data = self.lock();
        let sub = data
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("subscription", id))?;
        if sub.triggered {
            return Ok(false);
        }
        sub.triggered = true;
        Ok(true)
    }

    fn put_preferences(&self, prefs: Preferences) -> Result<(), StoreError> {
        let key = scoped_key(&prefs.wallet_id, &prefs.copayer_id);
        self.lock().preferences.insert(key, prefs);
        Ok(())
    }

    fn preferences(
        &self,
        wallet_id: &str,
        copayer_id: &str,
    ) -> Result<Option<Preferences>, StoreError> {
        Ok(self
            .lock()
            .preferences
            .get(&scoped_key(wallet_id, copayer_id))
            .cloned())
    }

    fn put_tx_note(&self, note: TxNote) -> Result<(), StoreError> {
        let key = scoped_key(&note.wallet_id, &note.txid);
        self.lock().notes.insert(key, note);
        Ok(())
    }

    fn tx_note(&self, wallet_id: &str, txid: &str) -> Result<Option<TxNote>, StoreError> {
        Ok(self.lock().notes.get(&scoped_key(wallet_id, txid)).cloned())
    }

    fn put_session(&self, session: Session) -> Result<(), StoreError> {
        self.lock()
            .sessions
            .insert(session.token.clone(), session);
        Ok(())
    }

    fn session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.lock().sessions.get(token).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Network, Output};
    use chrono::Duration;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn wallet() -> Wallet {
        Wallet::new("w", 2, 3, Network::Testnet).unwrap()
    }

    fn proposal(w: &Wallet) -> TxProposal {
        let mut p = TxProposal::new(
            w,
            "creator",
            vec![Output {
                to: "dest".to_string(),
                amount: 10,
            }],
            1,
            Duration::hours(1),
        )
        .unwrap();
        p.submit();
        p
    }

    #[test]
    fn test_wallet_cas_detects_stale_writer() {
        let store = MemoryStore::new();
        let w = wallet();
        store.insert_wallet(w.clone()).unwrap();

        // First writer wins
        let updated = store.compare_and_swap_wallet(w.clone()).unwrap();
        assert_eq!(updated.version, 1);

        // Second writer still holds version 0
        let err = store.compare_and_swap_wallet(w).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_proposal_cas_bumps_version() {
        let store = MemoryStore::new();
        let w = wallet();
        let p = proposal(&w);
        store.insert_proposal(p.clone()).unwrap();

        let saved = store.compare_and_swap_proposal(p).unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(store.proposal(&saved.id).unwrap().version, 1);
    }

    #[test]
    fn test_concurrent_index_allocation_has_no_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let mut taken = Vec::new();
                for _ in 0..50 {
                    taken.push(store.allocate_index("w1", Chain::External).unwrap());
                }
                taken
            }));
        }

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();

        let distinct: HashSet<u32> = all.iter().copied().collect();
        assert_eq!(distinct.len(), 400);
        // Contiguous from zero, no gaps
        assert_eq!(all.first(), Some(&0));
        assert_eq!(all.last(), Some(&399));
    }

    #[test]
    fn test_address_slot_uniqueness() {
        let store = MemoryStore::new();
        let addr = Address {
            wallet_id: "w1".to_string(),
            chain: Chain::External,
            index: 0,
            address: "3abc".to_string(),
            created_at: chrono::Utc::now(),
        };
        store.insert_address(addr.clone()).unwrap();
        assert!(matches!(
            store.insert_address(addr),
            Err(StoreError::UniqueViolation(_))
        ));
    }

    #[test]
    fn test_mark_triggered_is_test_and_set() {
        let store = MemoryStore::new();
        let sub = crate::model::ConfirmationSubscription::new(
            "alice",
            "txid-1",
            crate::model::SubscriptionVariant::Plain,
            6,
        )
        .unwrap();
        store.insert_subscription(sub.clone()).unwrap();

        assert!(store.mark_triggered(&sub.id).unwrap());
        assert!(!store.mark_triggered(&sub.id).unwrap());
    }

    #[test]
    fn test_missing_wallet_is_explicit_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.wallet("nope"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_open_proposals_excludes_terminal() {
        let store = MemoryStore::new();
        let w = wallet();
        let mut p1 = proposal(&w);
        let p2 = proposal(&w);
        p1.mark_expired();
        store.insert_proposal(p1).unwrap();
        store.insert_proposal(p2.clone()).unwrap();

        let open = store.open_proposals().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, p2.id);
    }

    #[test]
    fn test_export_roundtrip() {
        let store = MemoryStore::new();
        let w = wallet();
        store.insert_wallet(w.clone()).unwrap();

        let data = store.export();
        let restored = MemoryStore::from_data(data);
        assert_eq!(restored.wallet(&w.id).unwrap().id, w.id);
    }
}
