//! Transaction proposals and copayer actions
//!
//! A proposal walks a one-way state machine:
//! `TEMPORARY -> PENDING -> ACCEPTED -> BROADCAST`, with the alternate
//! terminals `REJECTED` (quorum mathematically unreachable) and `EXPIRED`
//! (TTL passed before resolution). Once terminal, no further actions are
//! recorded.

use crate::crypto::sha256;
use crate::model::wallet::Wallet;
use crate::model::ValidationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a transaction proposal
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Being assembled, not yet visible to other copayers
    Temporary,
    /// Submitted, open for copayer actions
    Pending,
    /// Quorum of accepts reached, awaiting broadcast
    Accepted,
    /// Broadcast to the ledger (terminal)
    Broadcast,
    /// Quorum became unreachable (terminal)
    Rejected,
    /// TTL passed before resolution (terminal)
    Expired,
}

impl ProposalStatus {
    /// Terminal states accept no further transitions or actions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Broadcast | ProposalStatus::Rejected | ProposalStatus::Expired
        )
    }
}

/// A single payment output of a proposal
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Output {
    /// Destination address
    pub to: String,
    /// Amount in base units
    pub amount: u64,
}

/// What a copayer did with a proposal
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Accept,
    Reject,
}

/// One copayer's recorded decision on a proposal
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    /// Acting copayer
    pub copayer_id: String,
    /// Accept or reject
    pub kind: ActionKind,
    /// Signature over the raw template (hex); present iff accept
    pub signature: Option<String>,
    /// Optional free-text comment
    pub comment: Option<String>,
    /// When the action was recorded
    pub created_at: DateTime<Utc>,
}

impl Action {
    pub fn accept(copayer_id: &str, signature: String, comment: Option<String>) -> Self {
        Self {
            copayer_id: copayer_id.to_string(),
            kind: ActionKind::Accept,
            signature: Some(signature),
            comment,
            created_at: Utc::now(),
        }
    }

    pub fn reject(copayer_id: &str, comment: Option<String>) -> Self {
        Self {
            copayer_id: copayer_id.to_string(),
            kind: ActionKind::Reject,
            signature: None,
            comment,
            created_at: Utc::now(),
        }
    }
}

/// A candidate transaction awaiting a signing quorum
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxProposal {
    /// Unique proposal identifier
    pub id: String,
    /// Owning wallet
    pub wallet_id: String,
    /// Copayer that created the proposal
    pub creator_id: String,
    /// Target outputs
    pub outputs: Vec<Output>,
    /// Fee rate in base units per byte
    pub fee_rate: u64,
    /// Required accepts, copied from the wallet at creation
    pub required_signatures: u8,
    /// Total copayers, copied from the wallet at creation
    pub total_copayers: u8,
    /// Recorded actions, in arrival order
    pub actions: Vec<Action>,
    /// Lifecycle status
    pub status: ProposalStatus,
    /// Raw unsigned transaction template signatures commit to
    pub raw_tx: String,
    /// Ledger transaction id, set once broadcast
    pub txid: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// When the proposal expires if unresolved
    pub expires_at: DateTime<Utc>,
    /// When the proposal was broadcast
    pub broadcast_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency version, managed by the store
    pub version: u64,
}

impl TxProposal {
    /// Create a `TEMPORARY` proposal for a wallet, validating the outputs
    pub fn new(
        wallet: &Wallet,
        creator_id: &str,
        outputs: Vec<Output>,
        fee_rate: u64,
        ttl: Duration,
    ) -> Result<Self, ValidationError> {
        if outputs.is_empty() {
            return Err(ValidationError::EmptyOutputs);
        }
        for output in &outputs {
            if output.to.trim().is_empty() {
                return Err(ValidationError::EmptyDestination);
            }
            if output.amount == 0 {
                return Err(ValidationError::ZeroAmount);
            }
        }

        let now = Utc::now();
        let raw_tx = Self::build_raw_template(&wallet.id, creator_id, &outputs, fee_rate, now);

        // Proposal id is a digest of the template plus creation time
        let id_digest = sha256(
            format!("{}{}", raw_tx, now.timestamp_nanos_opt().unwrap_or(0)).as_bytes(),
        );

        Ok(Self {
            id: hex::encode(&id_digest[..16]),
            wallet_id: wallet.id.clone(),
            creator_id: creator_id.to_string(),
            outputs,
            fee_rate,
            required_signatures: wallet.m,
            total_copayers: wallet.n,
            actions: Vec::new(),
            status: ProposalStatus::Temporary,
            raw_tx,
            txid: None,
            created_at: now,
            expires_at: now + ttl,
            broadcast_at: None,
            version: 0,
        })
    }

    /// Deterministic raw template all accept signatures commit to
    fn build_raw_template(
        wallet_id: &str,
        creator_id: &str,
        outputs: &[Output],
        fee_rate: u64,
        created_at: DateTime<Utc>,
    ) -> String {
        let outs: Vec<String> = outputs
            .iter()
            .map(|o| format!("{}:{}", o.to, o.amount))
            .collect();
        format!(
            "{}|{}|{}|{}|{}",
            wallet_id,
            creator_id,
            outs.join(","),
            fee_rate,
            created_at.timestamp_millis()
        )
    }

    /// Promote a `TEMPORARY` proposal to `PENDING`, opening it for actions
    pub fn submit(&mut self) {
        if self.status == ProposalStatus::Temporary {
            self.status = ProposalStatus::Pending;
        }
    }

    /// The digest accept signatures must be made over
    pub fn signing_hash(&self) -> Vec<u8> {
        sha256(self.raw_tx.as_bytes())
    }

    /// Whether a copayer has already acted on this proposal
    pub fn has_action(&self, copayer_id: &str) -> bool {
        self.actions.iter().any(|a| a.copayer_id == copayer_id)
    }

    /// Number of distinct accepts (one action per copayer is enforced upstream)
    pub fn accept_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.kind == ActionKind::Accept)
            .count()
    }

    /// Number of distinct rejects
    pub fn reject_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.kind == ActionKind::Reject)
            .count()
    }

    /// Record an action and evaluate the quorum policy.
    ///
    /// Transitions to `ACCEPTED` when distinct accepts reach the threshold,
    /// or to `REJECTED` as soon as `n - rejects < m` (quorum mathematically
    /// unreachable). Only the final counts matter; arrival order never
    /// changes the outcome. Returns the status after the action.
    pub fn record_action(&mut self, action: Action) -> ProposalStatus {
        self.actions.push(action);

        let accepts = self.accept_count();
        let rejects = self.reject_count();
        let m = self.required_signatures as usize;
        let n = self.total_copayers as usize;

        if accepts >= m {
            self.status = ProposalStatus::Accepted;
        } else if n - rejects < m {
            self.status = ProposalStatus::Rejected;
        }

        self.status
    }

    /// Assemble the combined signed transaction from the collected accepts.
    ///
    /// Format: raw template plus comma-separated "copayer:signature" pairs.
    pub fn assemble_signed_tx(&self) -> String {
        let sigs: Vec<String> = self
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::Accept)
            .filter_map(|a| {
                a.signature
                    .as_ref()
                    .map(|s| format!("{}:{}", a.copayer_id, s))
            })
            .collect();
        format!("{}|sigs:{}", self.raw_tx, sigs.join(","))
    }

    /// Record a successful broadcast
    pub fn mark_broadcast(&mut self, txid: &str) {
        self.status = ProposalStatus::Broadcast;
        self.txid = Some(txid.to_string());
        self.broadcast_at = Some(Utc::now());
    }

    /// Record expiry
    pub fn mark_expired(&mut self) {
        self.status = ProposalStatus::Expired;
    }

    /// Whether the TTL has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::wallet::Network;

    fn test_wallet(m: u8, n: u8) -> Wallet {
        Wallet::new("test", m, n, Network::Testnet).unwrap()
    }

    fn test_outputs() -> Vec<Output> {
        vec![Output {
            to: "3Destination".to_string(),
            amount: 5_000,
        }]
    }

    fn proposal(m: u8, n: u8) -> TxProposal {
        let mut p = TxProposal::new(
            &test_wallet(m, n),
            "copayer-1",
            test_outputs(),
            10,
            Duration::hours(24),
        )
        .unwrap();
        p.submit();
        p
    }

    #[test]
    fn test_creation_and_submit() {
        let wallet = test_wallet(2, 3);
        let mut p =
            TxProposal::new(&wallet, "copayer-1", test_outputs(), 10, Duration::hours(24))
                .unwrap();
        assert_eq!(p.status, ProposalStatus::Temporary);
        assert_eq!(p.required_signatures, 2);
        assert_eq!(p.total_copayers, 3);

        p.submit();
        assert_eq!(p.status, ProposalStatus::Pending);
    }

    #[test]
    fn test_output_validation() {
        let wallet = test_wallet(2, 3);
        // No outputs
        assert!(TxProposal::new(&wallet, "c", vec![], 10, Duration::hours(1)).is_err());
        // Zero amount
        let outs = vec![Output {
            to: "addr".to_string(),
            amount: 0,
        }];
        assert!(TxProposal::new(&wallet, "c", outs, 10, Duration::hours(1)).is_err());
        // Empty destination
        let outs = vec![Output {
            to: "  ".to_string(),
            amount: 1,
        }];
        assert!(TxProposal::new(&wallet, "c", outs, 10, Duration::hours(1)).is_err());
    }

    #[test]
    fn test_quorum_reached_on_mth_accept() {
        let mut p = proposal(2, 3);

        let status = p.record_action(Action::accept("copayer-2", "sig2".to_string(), None));
        assert_eq!(status, ProposalStatus::Pending);

        let status = p.record_action(Action::accept("copayer-3", "sig3".to_string(), None));
        assert_eq!(status, ProposalStatus::Accepted);
        assert_eq!(p.accept_count(), 2);
    }

    #[test]
    fn test_fail_fast_reject() {
        // 2-of-3: after two rejects only one copayer remains, 1 < 2
        let mut p = proposal(2, 3);

        let status = p.record_action(Action::reject("copayer-1", None));
        assert_eq!(status, ProposalStatus::Pending);

        let status = p.record_action(Action::reject("copayer-2", None));
        assert_eq!(status, ProposalStatus::Rejected);
    }

    #[test]
    fn test_single_reject_terminates_n_of_n() {
        // 3-of-3: any reject makes quorum unreachable
        let mut p = proposal(3, 3);
        let status = p.record_action(Action::reject("copayer-1", None));
        assert_eq!(status, ProposalStatus::Rejected);
    }

    #[test]
    fn test_mixed_actions_order_independent() {
        // 2-of-3: one reject leaves two possible accepts, still reachable
        let mut p = proposal(2, 3);
        p.record_action(Action::reject("copayer-1", None));
        assert_eq!(p.status, ProposalStatus::Pending);

        p.record_action(Action::accept("copayer-2", "sig2".to_string(), None));
        assert_eq!(p.status, ProposalStatus::Pending);

        let status = p.record_action(Action::accept("copayer-3", "sig3".to_string(), None));
        assert_eq!(status, ProposalStatus::Accepted);
    }

    #[test]
    fn test_signing_hash_stable_across_actions() {
        let mut p = proposal(2, 3);
        let before = p.signing_hash();
        p.record_action(Action::accept("copayer-2", "sig".to_string(), None));
        assert_eq!(before, p.signing_hash());
    }

    #[test]
    fn test_assemble_signed_tx_includes_accepts_only() {
        let mut p = proposal(2, 3);
        p.record_action(Action::reject("copayer-1", None));
        p.record_action(Action::accept("copayer-2", "aa".to_string(), None));
        p.record_action(Action::accept("copayer-3", "bb".to_string(), None));

        let signed = p.assemble_signed_tx();
        assert!(signed.contains("copayer-2:aa"));
        assert!(signed.contains("copayer-3:bb"));
        assert!(!signed.contains("copayer-1:"));
    }

    #[test]
    fn test_expiry_check() {
        let p = proposal(2, 3);
        assert!(!p.is_expired_at(Utc::now()));
        assert!(p.is_expired_at(Utc::now() + Duration::hours(25)));
    }
}
