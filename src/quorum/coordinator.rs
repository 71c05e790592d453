//! The proposal state machine
//!
//! Every state transition is a compare-and-swap against the store, so a
//! read-modify-write of the status and action list is one atomic unit:
//! two simultaneous accepts cannot both observe a sub-quorum count, and
//! an accept racing a reject cannot produce inconsistent terminal states.
//!
//! Broadcast is deliberately split from the quorum commit: `ACCEPTED` is
//! written first, then the external call runs without any store lock
//! held, then `BROADCAST` is recorded by a second atomic update. A slow
//! or failing ledger never blocks other proposals or other copayers.

use crate::crypto::{public_key_from_hex, verify_signature};
use crate::dispatch::{NotificationSink, WalletEvent};
use crate::ledger::{LedgerError, LedgerGateway};
use crate::model::{
    Action, ActionKind, Copayer, Output, ProposalStatus, TxProposal, ValidationError, Wallet,
};
use crate::store::{Store, StoreError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use thiserror::Error;

/// How many times a read-modify-write is retried on a version conflict
const CAS_RETRY_LIMIT: u32 = 16;

/// Coordinator tuning knobs
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a proposal stays open before the sweep expires it
    pub proposal_ttl: chrono::Duration,
    /// Total broadcast attempts (the synchronous first try included)
    pub max_broadcast_attempts: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: StdDuration,
    /// Upper bound for the retry delay
    pub backoff_cap: StdDuration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            proposal_ttl: chrono::Duration::hours(24),
            max_broadcast_attempts: 5,
            backoff_base: StdDuration::from_millis(500),
            backoff_cap: StdDuration::from_secs(60),
        }
    }
}

/// Proposal-protocol errors
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Wallet not found: {0}")]
    UnknownWallet(String),
    #[error("Proposal not found: {0}")]
    UnknownProposal(String),
    #[error("Copayer {0} is not a member of this wallet")]
    UnknownCopayer(String),
    #[error("Wallet is not complete yet")]
    WalletIncomplete,
    #[error("Copayer already acted on this proposal")]
    DuplicateAction,
    #[error("Proposal no longer accepts actions")]
    ProposalFinalized,
    #[error("Signature does not bind the copayer to this proposal")]
    InvalidSignature,
    #[error("Broadcast failed after {attempts} attempt(s): {source}")]
    BroadcastFailure {
        attempts: u32,
        #[source]
        source: LedgerError,
    },
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Evaluates copayer actions against the M-of-N threshold and drives
/// accepted proposals through broadcast
#[derive(Clone)]
pub struct QuorumCoordinator {
    store: Arc<dyn Store>,
    ledger: Arc<dyn LedgerGateway>,
    sink: Arc<dyn NotificationSink>,
    config: CoordinatorConfig,
}

impl QuorumCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<dyn LedgerGateway>,
        sink: Arc<dyn NotificationSink>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            sink,
            config,
        }
    }

    /// Open a proposal on a complete wallet.
    ///
    /// The proposal is assembled as `TEMPORARY` and promoted to `PENDING`
    /// in the same call; other copayers only ever observe it `PENDING`.
    pub fn create(
        &self,
        wallet_id: &str,
        creator_id: &str,
        outputs: Vec<Output>,
        fee_rate: u64,
    ) -> Result<TxProposal, CoordinatorError> {
        let wallet = self.fetch_wallet(wallet_id)?;
        if !wallet.is_complete() {
            return Err(CoordinatorError::WalletIncomplete);
        }
        if wallet.copayer(creator_id).is_none() {
            return Err(CoordinatorError::UnknownCopayer(creator_id.to_string()));
        }

        let mut proposal = TxProposal::new(
            &wallet,
            creator_id,
            outputs,
            fee_rate,
            self.config.proposal_ttl,
        )?;
        proposal.submit();
        self.store.insert_proposal(proposal.clone())?;

        log::info!(
            "proposal {} opened on wallet {} by {}",
            proposal.id,
            wallet_id,
            creator_id
        );
        self.emit(WalletEvent::ProposalCreated {
            proposal_id: proposal.id.clone(),
            wallet_id: wallet_id.to_string(),
        });
        Ok(proposal)
    }

    /// Record a copayer's accept or reject.
    ///
    /// Accepts must carry a signature over the proposal's raw template,
    /// verifiable against the copayer's request public key. When the
    /// distinct-accept count reaches the threshold the proposal commits
    /// to `ACCEPTED` and the broadcast runs; when rejects make quorum
    /// unreachable it terminates `REJECTED` immediately.
    pub async fn act(
        &self,
        proposal_id: &str,
        copayer_id: &str,
        kind: ActionKind,
        signature: Option<String>,
        comment: Option<String>,
    ) -> Result<TxProposal, CoordinatorError> {
        let mut attempts = 0;
        let saved = loop {
            let mut proposal = self.fetch_proposal(proposal_id)?;
            if proposal.status != ProposalStatus::Pending {
                return Err(CoordinatorError::ProposalFinalized);
            }
            if proposal.has_action(copayer_id) {
                return Err(CoordinatorError::DuplicateAction);
            }

            let wallet = self.fetch_wallet(&proposal.wallet_id)?;
            let copayer = wallet
                .copayer(copayer_id)
                .ok_or_else(|| CoordinatorError::UnknownCopayer(copayer_id.to_string()))?;

            let action = match kind {
                ActionKind::Accept => {
                    let signature = signature
                        .clone()
                        .ok_or(CoordinatorError::InvalidSignature)?;
                    verify_action_signature(&proposal, copayer, &signature)?;
                    Action::accept(copayer_id, signature, comment.clone())
                }
                ActionKind::Reject => Action::reject(copayer_id, comment.clone()),
            };
            proposal.record_action(action);

            match self.store.compare_and_swap_proposal(proposal) {
                Ok(saved) => break saved,
                Err(e) if e.is_conflict() && attempts < CAS_RETRY_LIMIT => {
                    attempts += 1;
                    log::debug!("action conflict on proposal {}, retrying", proposal_id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.emit(WalletEvent::ActionRecorded {
            proposal_id: saved.id.clone(),
            copayer_id: copayer_id.to_string(),
            kind,
        });

        match saved.status {
            ProposalStatus::Accepted => {
                log::info!(
                    "proposal {} reached quorum ({} accepts)",
                    saved.id,
                    saved.accept_count()
                );
                self.emit(WalletEvent::ProposalAccepted {
                    proposal_id: saved.id.clone(),
                });
                self.finish_accepted(saved).await
            }
            ProposalStatus::Rejected => {
                log::info!(
                    "proposal {} rejected fail-fast ({} rejects of {} copayers, {} required)",
                    saved.id,
                    saved.reject_count(),
                    saved.total_copayers,
                    saved.required_signatures
                );
                self.emit(WalletEvent::ProposalRejected {
                    proposal_id: saved.id.clone(),
                });
                Ok(saved)
            }
            _ => Ok(saved),
        }
    }

    /// First broadcast attempt runs with the accepting call; retryable
    /// failures hand over to a bounded background backoff loop without
    /// reverting the collected accepts.
    async fn finish_accepted(
        &self,
        proposal: TxProposal,
    ) -> Result<TxProposal, CoordinatorError> {
        match self.try_broadcast(&proposal.id).await {
            Ok(broadcast) => Ok(broadcast),
            Err(CoordinatorError::BroadcastFailure { source, .. }) if source.is_retryable() => {
                log::warn!(
                    "broadcast of proposal {} failed ({}), scheduling retries",
                    proposal.id,
                    source
                );
                let coordinator = self.clone();
                let proposal_id = proposal.id.clone();
                tokio::spawn(async move { coordinator.retry_broadcast(proposal_id).await });
                Ok(self.fetch_proposal(&proposal.id)?)
            }
            Err(CoordinatorError::BroadcastFailure { attempts, source }) => {
                // Permanent ledger refusal: the proposal stays ACCEPTED
                // and is reported for manual intervention
                self.report_broadcast_failure(&proposal.id, attempts, &source);
                Err(CoordinatorError::BroadcastFailure { attempts, source })
            }
            Err(e) => Err(e),
        }
    }

    /// Assemble the signed transaction and submit it to the ledger.
    ///
    /// Idempotent: an already-broadcast proposal returns as-is, and the
    /// `BROADCAST` record tolerates a concurrent writer.
    pub async fn try_broadcast(&self, proposal_id: &str) -> Result<TxProposal, CoordinatorError> {
        let proposal = self.fetch_proposal(proposal_id)?;
        match proposal.status {
            ProposalStatus::Accepted => {}
            ProposalStatus::Broadcast => return Ok(proposal),
            _ => return Err(CoordinatorError::ProposalFinalized),
        }

        let signed_tx = proposal.assemble_signed_tx();
        let txid = self
            .ledger
            .broadcast(&signed_tx)
            .await
            .map_err(|source| CoordinatorError::BroadcastFailure {
                attempts: 1,
                source,
            })?;

        let saved = self.record_broadcast(proposal_id, &txid)?;
        self.emit(WalletEvent::ProposalBroadcast {
            proposal_id: proposal_id.to_string(),
            txid,
        });
        Ok(saved)
    }

    fn record_broadcast(
        &self,
        proposal_id: &str,
        txid: &str,
    ) -> Result<TxProposal, CoordinatorError> {
        let mut attempts = 0;
        loop {
            let mut proposal = self.fetch_proposal(proposal_id)?;
            match proposal.status {
                ProposalStatus::Broadcast => return Ok(proposal),
                ProposalStatus::Accepted => {}
                ProposalStatus::Expired => {
                    // The ledger already took the transaction; the record
                    // follows the chain
                    log::warn!(
                        "proposal {} expired while its broadcast was in flight",
                        proposal_id
                    );
                }
                _ => return Err(CoordinatorError::ProposalFinalized),
            }
            proposal.mark_broadcast(txid);
            match self.store.compare_and_swap_proposal(proposal) {
                Ok(saved) => {
                    log::info!("proposal {} broadcast as {}", proposal_id, txid);
                    return Ok(saved);
                }
                Err(e) if e.is_conflict() && attempts < CAS_RETRY_LIMIT => {
                    attempts += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Bounded exponential-backoff retry loop, run in the background
    /// after a retryable first failure
    async fn retry_broadcast(&self, proposal_id: String) {
        let mut delay = self.config.backoff_base;
        let mut last_error = None;

        for attempt in 2..=self.config.max_broadcast_attempts {
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, self.config.backoff_cap);

            match self.try_broadcast(&proposal_id).await {
                Ok(_) => return,
                Err(CoordinatorError::BroadcastFailure { source, .. })
                    if source.is_retryable() =>
                {
                    log::warn!(
                        "broadcast attempt {} for proposal {} failed: {}",
                        attempt,
                        proposal_id,
                        source
                    );
                    last_error = Some(source);
                }
                Err(CoordinatorError::BroadcastFailure { source, .. }) => {
                    self.report_broadcast_failure(&proposal_id, attempt, &source);
                    return;
                }
                Err(CoordinatorError::ProposalFinalized) => {
                    // Swept to EXPIRED meanwhile; nothing left to do
                    return;
                }
                Err(e) => {
                    log::error!(
                        "broadcast retry for proposal {} aborted: {}",
                        proposal_id,
                        e
                    );
                    return;
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        self.report_broadcast_failure(
            &proposal_id,
            self.config.max_broadcast_attempts,
            &LedgerError::Network(reason),
        );
    }

    fn report_broadcast_failure(&self, proposal_id: &str, attempts: u32, error: &LedgerError) {
        log::error!(
            "proposal {} remains accepted after {} broadcast attempt(s), needs manual intervention: {}",
            proposal_id,
            attempts,
            error
        );
        self.emit(WalletEvent::BroadcastFailed {
            proposal_id: proposal_id.to_string(),
            attempts,
            reason: error.to_string(),
        });
    }

    /// Expire open proposals past their TTL. Idempotent; uses the same
    /// compare-and-swap as `act`, so a last-moment accept and the sweep
    /// cannot race past each other.
    pub fn sweep_expired(&self) -> Result<usize, CoordinatorError> {
        let now = Utc::now();
        let mut swept = 0;

        for candidate in self.store.open_proposals()? {
            if !candidate.is_expired_at(now) {
                continue;
            }

            let mut attempts = 0;
            loop {
                let mut proposal = match self.fetch_proposal(&candidate.id) {
                    Ok(p) => p,
                    Err(e) => {
                        log::error!("expiry sweep lost proposal {}: {}", candidate.id, e);
                        break;
                    }
                };
                if proposal.status.is_terminal() || !proposal.is_expired_at(now) {
                    break;
                }
                proposal.mark_expired();
                match self.store.compare_and_swap_proposal(proposal) {
                    Ok(_) => {
                        swept += 1;
                        log::info!("proposal {} expired", candidate.id);
                        self.emit(WalletEvent::ProposalExpired {
                            proposal_id: candidate.id.clone(),
                        });
                        break;
                    }
                    Err(e) if e.is_conflict() && attempts < CAS_RETRY_LIMIT => {
                        attempts += 1;
                        continue;
                    }
                    Err(e) => {
                        log::error!("expiry sweep failed on proposal {}: {}", candidate.id, e);
                        break;
                    }
                }
            }
        }

        Ok(swept)
    }

    /// Fetch one proposal
    pub fn proposal(&self, proposal_id: &str) -> Result<TxProposal, CoordinatorError> {
        self.fetch_proposal(proposal_id)
    }

    /// Proposals still open for actions on a wallet
    pub fn pending_proposals(&self, wallet_id: &str) -> Result<Vec<TxProposal>, CoordinatorError> {
        Ok(self
            .store
            .proposals_for_wallet(wallet_id)?
            .into_iter()
            .filter(|p| p.status == ProposalStatus::Pending)
            .collect())
    }

    fn fetch_proposal(&self, id: &str) -> Result<TxProposal, CoordinatorError> {
        match self.store.proposal(id) {
            Ok(p) => Ok(p),
            Err(StoreError::NotFound { .. }) => {
                Err(CoordinatorError::UnknownProposal(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn fetch_wallet(&self, id: &str) -> Result<Wallet, CoordinatorError> {
        match self.store.wallet(id) {
            Ok(w) => Ok(w),
            Err(StoreError::NotFound { .. }) => {
                Err(CoordinatorError::UnknownWallet(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn emit(&self, event: WalletEvent) {
        if let Err(e) = self.sink.deliver(&event) {
            log::warn!("event delivery failed: {}", e);
        }
    }
}

fn verify_action_signature(
    proposal: &TxProposal,
    copayer: &Copayer,
    signature_hex: &str,
) -> Result<(), CoordinatorError> {
    let pubkey = public_key_from_hex(&copayer.request_pub_key)
        .map_err(|_| CoordinatorError::InvalidSignature)?;
    let signature =
        hex::decode(signature_hex).map_err(|_| CoordinatorError::InvalidSignature)?;

    match verify_signature(&pubkey, &proposal.signing_hash(), &signature) {
        Ok(true) => Ok(()),
        _ => Err(CoordinatorError::InvalidSignature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{double_sha256_hex, KeyPair};
    use crate::dispatch::EventBus;
    use crate::ledger::LedgerFact;
    use crate::model::Network;
    use crate::registry::{CopayerDescriptor, CopayerRegistry};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Ledger that fails a scripted number of times before accepting
    struct ScriptedLedger {
        failures_left: Mutex<u32>,
        error: LedgerError,
        broadcasts: Mutex<Vec<String>>,
    }

    impl ScriptedLedger {
        fn accepting() -> Self {
            Self::failing(0, LedgerError::Network("unused".to_string()))
        }

        fn failing(times: u32, error: LedgerError) -> Self {
            Self {
                failures_left: Mutex::new(times),
                error,
                broadcasts: Mutex::new(Vec::new()),
            }
        }

        fn broadcast_count(&self) -> usize {
            self.broadcasts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LedgerGateway for ScriptedLedger {
        async fn broadcast(&self, signed_tx: &str) -> Result<String, LedgerError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(self.error.clone());
            }
            drop(left);
            self.broadcasts.lock().unwrap().push(signed_tx.to_string());
            Ok(double_sha256_hex(signed_tx.as_bytes()))
        }
    }

    struct Harness {
        coordinator: QuorumCoordinator,
        ledger: Arc<ScriptedLedger>,
        wallet_id: String,
        copayers: Vec<(String, KeyPair)>,
    }

    fn harness(m: u8, n: u8, joined: u8, ledger: ScriptedLedger) -> Harness {
        harness_with_config(m, n, joined, ledger, CoordinatorConfig::default())
    }

    fn harness_with_config(
        m: u8,
        n: u8,
        joined: u8,
        ledger: ScriptedLedger,
        config: CoordinatorConfig,
    ) -> Harness {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let registry = CopayerRegistry::new(Arc::clone(&store));
        let wallet = registry
            .create_wallet("quorum-test", m, n, Network::Testnet)
            .unwrap();

        let mut copayers = Vec::new();
        for i in 0..joined {
            let key = KeyPair::generate();
            let copayer = registry
                .join(
                    &wallet.id,
                    &CopayerDescriptor {
                        name: format!("copayer-{}", i + 1),
                        xpub: format!("xpub-{}", i + 1),
                        request_pub_key: key.public_key_hex(),
                    },
                )
                .unwrap();
            copayers.push((copayer.id, key));
        }

        let ledger = Arc::new(ledger);
        let coordinator = QuorumCoordinator::new(
            store,
            Arc::clone(&ledger) as Arc<dyn LedgerGateway>,
            Arc::new(EventBus::new()),
            config,
        );

        Harness {
            coordinator,
            ledger,
            wallet_id: wallet.id,
            copayers,
        }
    }

    fn outputs() -> Vec<Output> {
        vec![Output {
            to: "3Recipient".to_string(),
            amount: 1_000,
        }]
    }

    fn sign(proposal: &TxProposal, key: &KeyPair) -> String {
        hex::encode(key.sign(&proposal.signing_hash()).unwrap())
    }

    #[tokio::test]
    async fn test_two_accepts_reach_broadcast() {
        // m=2 n=3: copayer 1 creates, copayers 2 and 3 accept
        let h = harness(2, 3, 3, ScriptedLedger::accepting());
        let proposal = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[0].0, outputs(), 10)
            .unwrap();

        let after_first = h
            .coordinator
            .act(
                &proposal.id,
                &h.copayers[1].0,
                ActionKind::Accept,
                Some(sign(&proposal, &h.copayers[1].1)),
                None,
            )
            .await
            .unwrap();
        assert_eq!(after_first.status, ProposalStatus::Pending);

        let after_second = h
            .coordinator
            .act(
                &proposal.id,
                &h.copayers[2].0,
                ActionKind::Accept,
                Some(sign(&proposal, &h.copayers[2].1)),
                None,
            )
            .await
            .unwrap();

        assert_eq!(after_second.status, ProposalStatus::Broadcast);
        assert_eq!(after_second.accept_count(), 2);
        assert!(after_second.txid.is_some());
        assert_eq!(h.ledger.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_rejection_without_third_vote() {
        // m=2 n=3: two rejects leave one copayer, 1 < 2
        let h = harness(2, 3, 3, ScriptedLedger::accepting());
        let proposal = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[0].0, outputs(), 10)
            .unwrap();

        h.coordinator
            .act(&proposal.id, &h.copayers[0].0, ActionKind::Reject, None, None)
            .await
            .unwrap();
        let rejected = h
            .coordinator
            .act(&proposal.id, &h.copayers[1].0, ActionKind::Reject, None, None)
            .await
            .unwrap();

        assert_eq!(rejected.status, ProposalStatus::Rejected);
        assert_eq!(h.ledger.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_create_on_incomplete_wallet_fails() {
        // Only 2 of 3 copayers joined
        let h = harness(2, 3, 2, ScriptedLedger::accepting());
        let result = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[0].0, outputs(), 10);
        assert!(matches!(result, Err(CoordinatorError::WalletIncomplete)));
    }

    #[tokio::test]
    async fn test_duplicate_action_rejected() {
        let h = harness(2, 3, 3, ScriptedLedger::accepting());
        let proposal = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[0].0, outputs(), 10)
            .unwrap();

        h.coordinator
            .act(
                &proposal.id,
                &h.copayers[1].0,
                ActionKind::Accept,
                Some(sign(&proposal, &h.copayers[1].1)),
                None,
            )
            .await
            .unwrap();

        let again = h
            .coordinator
            .act(&proposal.id, &h.copayers[1].0, ActionKind::Reject, None, None)
            .await;
        assert!(matches!(again, Err(CoordinatorError::DuplicateAction)));

        let stored = h.coordinator.proposal(&proposal.id).unwrap();
        assert_eq!(stored.actions.len(), 1);
    }

    #[tokio::test]
    async fn test_action_on_finalized_proposal_fails() {
        let h = harness(2, 2, 2, ScriptedLedger::accepting());
        let proposal = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[0].0, outputs(), 10)
            .unwrap();

        // 2-of-2: a single reject terminates
        h.coordinator
            .act(&proposal.id, &h.copayers[0].0, ActionKind::Reject, None, None)
            .await
            .unwrap();

        let late = h
            .coordinator
            .act(
                &proposal.id,
                &h.copayers[1].0,
                ActionKind::Accept,
                Some(sign(&proposal, &h.copayers[1].1)),
                None,
            )
            .await;
        assert!(matches!(late, Err(CoordinatorError::ProposalFinalized)));
    }

    #[tokio::test]
    async fn test_invalid_signature_records_nothing() {
        let h = harness(2, 3, 3, ScriptedLedger::accepting());
        let proposal = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[0].0, outputs(), 10)
            .unwrap();

        // Signed with the wrong key
        let intruder = KeyPair::generate();
        let result = h
            .coordinator
            .act(
                &proposal.id,
                &h.copayers[1].0,
                ActionKind::Accept,
                Some(sign(&proposal, &intruder)),
                None,
            )
            .await;
        assert!(matches!(result, Err(CoordinatorError::InvalidSignature)));

        // Missing signature on an accept is equally invalid
        let result = h
            .coordinator
            .act(&proposal.id, &h.copayers[1].0, ActionKind::Accept, None, None)
            .await;
        assert!(matches!(result, Err(CoordinatorError::InvalidSignature)));

        let stored = h.coordinator.proposal(&proposal.id).unwrap();
        assert!(stored.actions.is_empty());
    }

    #[tokio::test]
    async fn test_retryable_broadcast_failure_keeps_accepts() {
        // Every broadcast attempt fails with a network error; the
        // proposal commits to ACCEPTED and keeps its signatures
        let config = CoordinatorConfig {
            max_broadcast_attempts: 1,
            ..Default::default()
        };
        let h = harness_with_config(
            1,
            2,
            2,
            ScriptedLedger::failing(10, LedgerError::Network("node down".to_string())),
            config,
        );
        let proposal = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[0].0, outputs(), 10)
            .unwrap();

        let after = h
            .coordinator
            .act(
                &proposal.id,
                &h.copayers[1].0,
                ActionKind::Accept,
                Some(sign(&proposal, &h.copayers[1].1)),
                None,
            )
            .await
            .unwrap();

        assert_eq!(after.status, ProposalStatus::Accepted);
        assert_eq!(after.accept_count(), 1);
        assert!(after.txid.is_none());
        assert_eq!(h.ledger.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_retry_succeeds_later() {
        // First attempt fails, an explicit retry lands it
        let config = CoordinatorConfig {
            max_broadcast_attempts: 1,
            ..Default::default()
        };
        let h = harness_with_config(
            1,
            2,
            2,
            ScriptedLedger::failing(1, LedgerError::Network("flaky".to_string())),
            config,
        );
        let proposal = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[0].0, outputs(), 10)
            .unwrap();

        let accepted = h
            .coordinator
            .act(
                &proposal.id,
                &h.copayers[1].0,
                ActionKind::Accept,
                Some(sign(&proposal, &h.copayers[1].1)),
                None,
            )
            .await
            .unwrap();
        assert_eq!(accepted.status, ProposalStatus::Accepted);

        let broadcast = h.coordinator.try_broadcast(&proposal.id).await.unwrap();
        assert_eq!(broadcast.status, ProposalStatus::Broadcast);
        assert!(broadcast.txid.is_some());

        // Idempotent: a second call does not rebroadcast
        h.coordinator.try_broadcast(&proposal.id).await.unwrap();
        assert_eq!(h.ledger.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_permanent_ledger_refusal_surfaces() {
        let h = harness(1, 2, 2, ScriptedLedger::failing(10, LedgerError::DoubleSpend));
        let proposal = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[0].0, outputs(), 10)
            .unwrap();

        let result = h
            .coordinator
            .act(
                &proposal.id,
                &h.copayers[1].0,
                ActionKind::Accept,
                Some(sign(&proposal, &h.copayers[1].1)),
                None,
            )
            .await;
        assert!(matches!(
            result,
            Err(CoordinatorError::BroadcastFailure {
                source: LedgerError::DoubleSpend,
                ..
            })
        ));

        // Accepts are never reverted
        let stored = h.coordinator.proposal(&proposal.id).unwrap();
        assert_eq!(stored.status, ProposalStatus::Accepted);
        assert_eq!(stored.accept_count(), 1);
    }

    #[tokio::test]
    async fn test_expiry_sweep_and_late_action() {
        let config = CoordinatorConfig {
            proposal_ttl: chrono::Duration::milliseconds(-1),
            ..Default::default()
        };
        let h = harness_with_config(2, 3, 3, ScriptedLedger::accepting(), config);
        let proposal = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[0].0, outputs(), 10)
            .unwrap();

        assert_eq!(h.coordinator.sweep_expired().unwrap(), 1);
        // Idempotent
        assert_eq!(h.coordinator.sweep_expired().unwrap(), 0);

        let stored = h.coordinator.proposal(&proposal.id).unwrap();
        assert_eq!(stored.status, ProposalStatus::Expired);

        let late = h
            .coordinator
            .act(
                &proposal.id,
                &h.copayers[1].0,
                ActionKind::Accept,
                Some(sign(&proposal, &h.copayers[1].1)),
                None,
            )
            .await;
        assert!(matches!(late, Err(CoordinatorError::ProposalFinalized)));
    }

    #[tokio::test]
    async fn test_pending_proposals_listing() {
        let h = harness(2, 3, 3, ScriptedLedger::accepting());
        let p1 = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[0].0, outputs(), 10)
            .unwrap();
        let p2 = h
            .coordinator
            .create(&h.wallet_id, &h.copayers[1].0, outputs(), 10)
            .unwrap();

        // Reject p1 out of the pending set (2-of-3 dies after 2 rejects)
        h.coordinator
            .act(&p1.id, &h.copayers[0].0, ActionKind::Reject, None, None)
            .await
            .unwrap();
        h.coordinator
            .act(&p1.id, &h.copayers[1].0, ActionKind::Reject, None, None)
            .await
            .unwrap();

        let pending = h.coordinator.pending_proposals(&h.wallet_id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, p2.id);
    }

    /// End-to-end: quorum broadcast feeds the dispatcher via ledger facts
    #[tokio::test]
    async fn test_broadcast_then_confirmation_flow() {
        use crate::dispatch::SubscriptionDispatcher;
        use crate::model::SubscriptionVariant;

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let registry = CopayerRegistry::new(Arc::clone(&store));
        let wallet = registry
            .create_wallet("flow", 1, 1, Network::Testnet)
            .unwrap();
        let key = KeyPair::generate();
        let copayer = registry
            .join(
                &wallet.id,
                &CopayerDescriptor {
                    name: "solo".to_string(),
                    xpub: "xpub-solo".to_string(),
                    request_pub_key: key.public_key_hex(),
                },
            )
            .unwrap();

        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let coordinator = QuorumCoordinator::new(
            Arc::clone(&store),
            Arc::new(ScriptedLedger::accepting()) as Arc<dyn LedgerGateway>,
            Arc::clone(&bus) as Arc<dyn NotificationSink>,
            CoordinatorConfig::default(),
        );
        let dispatcher = SubscriptionDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&bus) as Arc<dyn NotificationSink>,
        );

        let proposal = coordinator
            .create(&wallet.id, &copayer.id, outputs(), 10)
            .unwrap();
        let broadcast = coordinator
            .act(
                &proposal.id,
                &copayer.id,
                ActionKind::Accept,
                Some(sign(&proposal, &key)),
                None,
            )
            .await
            .unwrap();
        let txid = broadcast.txid.unwrap();

        dispatcher
            .subscribe("watcher", &txid, SubscriptionVariant::Plain, 2)
            .unwrap();
        dispatcher
            .on_ledger_fact(&LedgerFact {
                target: txid.clone(),
                depth: 2,
            })
            .unwrap();

        let mut saw_confirmation = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, WalletEvent::ConfirmationReached { .. }) {
                saw_confirmation = true;
            }
        }
        assert!(saw_confirmation);
    }
}
