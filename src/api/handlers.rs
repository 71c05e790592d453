//! REST API handlers for the wallet coordination service
//!
//! Error mapping follows one convention everywhere: a coded domain error
//! maps to a 400-class response with the code embedded in the message,
//! a missing entity is an explicit 404, and an uncoded failure (store or
//! otherwise) maps to 503 with the full context logged server-side.

use crate::derivation::{AddressDeriver, DeriveError};
use crate::dispatch::{DispatchError, EventBus, SubscriptionDispatcher};
use crate::ledger::LedgerFact;
use crate::model::{
    ActionKind, Address, Chain, Copayer, Network, Output, Preferences, ProposalStatus, Session,
    SubscriptionVariant, TxNote, TxProposal, Wallet,
};
use crate::quorum::{CoordinatorError, QuorumCoordinator};
use crate::registry::{CopayerDescriptor, CopayerRegistry, RegistryError};
use crate::store::Store;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How long an issued session stays valid
const SESSION_TTL_MINUTES: i64 = 60;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<CopayerRegistry>,
    pub coordinator: Arc<QuorumCoordinator>,
    pub deriver: Arc<AddressDeriver>,
    pub dispatcher: Arc<SubscriptionDispatcher>,
    pub store: Arc<dyn Store>,
    pub bus: Arc<EventBus>,
}

// ============================================================================
// Error Mapping
// ============================================================================

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn coded(
    status: StatusCode,
    code: &str,
    message: impl std::fmt::Display,
) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: format!("{}: {}", code, message),
        }),
    )
}

fn unavailable(context: &str, e: impl std::fmt::Display) -> (StatusCode, Json<ApiError>) {
    log::error!("{}: {}", context, e);
    coded(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", e)
}

fn registry_error(e: RegistryError) -> (StatusCode, Json<ApiError>) {
    match &e {
        RegistryError::UnknownWallet(_) => coded(StatusCode::NOT_FOUND, "WALLET_NOT_FOUND", &e),
        RegistryError::WalletFull(_) => coded(StatusCode::BAD_REQUEST, "WALLET_FULL", &e),
        RegistryError::DuplicateKey => coded(StatusCode::BAD_REQUEST, "DUPLICATE_KEY", &e),
        RegistryError::Validation(_) => coded(StatusCode::BAD_REQUEST, "INVALID_REQUEST", &e),
        RegistryError::Store(_) => unavailable("registry store failure", &e),
    }
}

fn coordinator_error(e: CoordinatorError) -> (StatusCode, Json<ApiError>) {
    match &e {
        CoordinatorError::UnknownWallet(_) => {
            coded(StatusCode::NOT_FOUND, "WALLET_NOT_FOUND", &e)
        }
        CoordinatorError::UnknownProposal(_) => {
            coded(StatusCode::NOT_FOUND, "PROPOSAL_NOT_FOUND", &e)
        }
        CoordinatorError::UnknownCopayer(_) => {
            coded(StatusCode::NOT_FOUND, "COPAYER_NOT_FOUND", &e)
        }
        CoordinatorError::WalletIncomplete => {
            coded(StatusCode::BAD_REQUEST, "WALLET_INCOMPLETE", &e)
        }
        CoordinatorError::DuplicateAction => {
            coded(StatusCode::BAD_REQUEST, "DUPLICATE_ACTION", &e)
        }
        CoordinatorError::ProposalFinalized => {
            coded(StatusCode::BAD_REQUEST, "PROPOSAL_FINALIZED", &e)
        }
        CoordinatorError::InvalidSignature => {
            coded(StatusCode::BAD_REQUEST, "INVALID_SIGNATURE", &e)
        }
        CoordinatorError::BroadcastFailure { .. } => {
            coded(StatusCode::BAD_REQUEST, "BROADCAST_FAILURE", &e)
        }
        CoordinatorError::Validation(_) => coded(StatusCode::BAD_REQUEST, "INVALID_REQUEST", &e),
        CoordinatorError::Store(_) => unavailable("coordinator store failure", &e),
    }
}

fn derive_error(e: DeriveError) -> (StatusCode, Json<ApiError>) {
    match &e {
        DeriveError::UnknownWallet(_) => coded(StatusCode::NOT_FOUND, "WALLET_NOT_FOUND", &e),
        DeriveError::WalletIncomplete => {
            coded(StatusCode::BAD_REQUEST, "WALLET_INCOMPLETE", &e)
        }
        DeriveError::Store(_) => unavailable("derivation store failure", &e),
    }
}

fn dispatch_error(e: DispatchError) -> (StatusCode, Json<ApiError>) {
    match &e {
        DispatchError::Validation(_) => coded(StatusCode::BAD_REQUEST, "INVALID_REQUEST", &e),
        DispatchError::Store(_) => unavailable("dispatch store failure", &e),
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct CopayerInfo {
    pub id: String,
    pub wallet_id: String,
    pub name: String,
    pub joined_at: String,
}

impl From<&Copayer> for CopayerInfo {
    fn from(c: &Copayer) -> Self {
        Self {
            id: c.id.clone(),
            wallet_id: c.wallet_id.clone(),
            name: c.name.clone(),
            joined_at: c.joined_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct WalletInfo {
    pub id: String,
    pub name: String,
    pub m: u8,
    pub n: u8,
    pub network: Network,
    pub complete: bool,
    pub copayers: Vec<CopayerInfo>,
    pub created_at: String,
}

impl From<&Wallet> for WalletInfo {
    fn from(w: &Wallet) -> Self {
        Self {
            id: w.id.clone(),
            name: w.name.clone(),
            m: w.m,
            n: w.n,
            network: w.network,
            complete: w.complete,
            copayers: w.copayers.iter().map(CopayerInfo::from).collect(),
            created_at: w.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct AddressInfo {
    pub wallet_id: String,
    pub chain: Chain,
    pub index: u32,
    pub address: String,
}

impl From<&Address> for AddressInfo {
    fn from(a: &Address) -> Self {
        Self {
            wallet_id: a.wallet_id.clone(),
            chain: a.chain,
            index: a.index,
            address: a.address.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct ActionInfo {
    pub copayer_id: String,
    pub kind: ActionKind,
    pub comment: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ProposalInfo {
    pub id: String,
    pub wallet_id: String,
    pub creator_id: String,
    pub status: ProposalStatus,
    pub outputs: Vec<Output>,
    pub fee_rate: u64,
    pub required_signatures: u8,
    pub accept_count: usize,
    pub reject_count: usize,
    pub actions: Vec<ActionInfo>,
    pub txid: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

impl From<&TxProposal> for ProposalInfo {
    fn from(p: &TxProposal) -> Self {
        Self {
            id: p.id.clone(),
            wallet_id: p.wallet_id.clone(),
            creator_id: p.creator_id.clone(),
            status: p.status,
            outputs: p.outputs.clone(),
            fee_rate: p.fee_rate,
            required_signatures: p.required_signatures,
            accept_count: p.accept_count(),
            reject_count: p.reject_count(),
            actions: p
                .actions
                .iter()
                .map(|a| ActionInfo {
                    copayer_id: a.copayer_id.clone(),
                    kind: a.kind,
                    comment: a.comment.clone(),
                    created_at: a.created_at.to_rfc3339(),
                })
                .collect(),
            txid: p.txid.clone(),
            created_at: p.created_at.to_rfc3339(),
            expires_at: p.expires_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub subscriber_id: String,
    pub target: String,
    pub variant: SubscriptionVariant,
    pub required_depth: u32,
    pub triggered: bool,
}

#[derive(Serialize)]
pub struct FactResponse {
    pub fired: usize,
}

#[derive(Serialize)]
pub struct SessionInfo {
    pub token: String,
    pub copayer_id: String,
    pub expires_at: String,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
pub struct CreateWalletRequest {
    pub name: String,
    pub m: u8,
    pub n: u8,
    #[serde(default)]
    pub network: Network,
}

#[derive(Deserialize)]
pub struct JoinWalletRequest {
    pub name: String,
    pub xpub: String,
    pub request_pub_key: String,
}

#[derive(Deserialize)]
pub struct DeriveAddressRequest {
    pub chain: Chain,
}

#[derive(Deserialize)]
pub struct CreateProposalRequest {
    pub creator_id: String,
    pub outputs: Vec<Output>,
    pub fee_rate: u64,
}

#[derive(Deserialize)]
pub struct ActRequest {
    pub copayer_id: String,
    pub kind: ActionKind,
    pub signature: Option<String>,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct SubscribeRequest {
    pub subscriber_id: String,
    pub target: String,
    pub variant: SubscriptionVariant,
    pub required_depth: u32,
}

#[derive(Deserialize)]
pub struct PutPreferencesRequest {
    pub email: Option<String>,
    pub language: Option<String>,
    pub unit: Option<String>,
}

#[derive(Deserialize)]
pub struct PutNoteRequest {
    pub body: String,
    pub edited_by: String,
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub copayer_id: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// POST /api/wallets - Create a wallet shell awaiting copayers
pub async fn create_wallet(
    State(state): State<ApiState>,
    Json(req): Json<CreateWalletRequest>,
) -> ApiResult<WalletInfo> {
    let wallet = state
        .registry
        .create_wallet(&req.name, req.m, req.n, req.network)
        .map_err(registry_error)?;
    Ok(Json(WalletInfo::from(&wallet)))
}

/// GET /api/wallets/{id} - Fetch a wallet with its copayers
pub async fn get_wallet(
    State(state): State<ApiState>,
    Path(wallet_id): Path<String>,
) -> ApiResult<WalletInfo> {
    let wallet = state.registry.wallet(&wallet_id).map_err(registry_error)?;
    Ok(Json(WalletInfo::from(&wallet)))
}

/// POST /api/wallets/{id}/copayers - Join a wallet
pub async fn join_wallet(
    State(state): State<ApiState>,
    Path(wallet_id): Path<String>,
    Json(req): Json<JoinWalletRequest>,
) -> ApiResult<CopayerInfo> {
    let copayer = state
        .registry
        .join(
            &wallet_id,
            &CopayerDescriptor {
                name: req.name,
                xpub: req.xpub,
                request_pub_key: req.request_pub_key,
            },
        )
        .map_err(registry_error)?;
    Ok(Json(CopayerInfo::from(&copayer)))
}

/// POST /api/wallets/{id}/addresses - Derive the next address
pub async fn derive_address(
    State(state): State<ApiState>,
    Path(wallet_id): Path<String>,
    Json(req): Json<DeriveAddressRequest>,
) -> ApiResult<AddressInfo> {
    let address = state
        .deriver
        .next_address(&wallet_id, req.chain)
        .map_err(derive_error)?;
    Ok(Json(AddressInfo::from(&address)))
}

/// GET /api/wallets/{id}/addresses - List derived addresses
pub async fn list_addresses(
    State(state): State<ApiState>,
    Path(wallet_id): Path<String>,
) -> ApiResult<Vec<AddressInfo>> {
    // Unknown wallets map to an explicit 404, not an empty list
    state.registry.wallet(&wallet_id).map_err(registry_error)?;
    let addresses = state
        .deriver
        .addresses(&wallet_id)
        .map_err(derive_error)?;
    Ok(Json(addresses.iter().map(AddressInfo::from).collect()))
}

/// POST /api/wallets/{id}/proposals - Open a proposal
pub async fn create_proposal(
    State(state): State<ApiState>,
    Path(wallet_id): Path<String>,
    Json(req): Json<CreateProposalRequest>,
) -> ApiResult<ProposalInfo> {
    let proposal = state
        .coordinator
        .create(&wallet_id, &req.creator_id, req.outputs, req.fee_rate)
        .map_err(coordinator_error)?;
    Ok(Json(ProposalInfo::from(&proposal)))
}

/// GET /api/wallets/{id}/proposals - List proposals open for actions
pub async fn list_pending_proposals(
    State(state): State<ApiState>,
    Path(wallet_id): Path<String>,
) -> ApiResult<Vec<ProposalInfo>> {
    state.registry.wallet(&wallet_id).map_err(registry_error)?;
    let pending = state
        .coordinator
        .pending_proposals(&wallet_id)
        .map_err(coordinator_error)?;
    Ok(Json(pending.iter().map(ProposalInfo::from).collect()))
}

/// GET /api/proposals/{id} - Fetch one proposal
pub async fn get_proposal(
    State(state): State<ApiState>,
    Path(proposal_id): Path<String>,
) -> ApiResult<ProposalInfo> {
    let proposal = state
        .coordinator
        .proposal(&proposal_id)
        .map_err(coordinator_error)?;
    Ok(Json(ProposalInfo::from(&proposal)))
}

/// POST /api/proposals/{id}/actions - Accept or reject a proposal
pub async fn act_on_proposal(
    State(state): State<ApiState>,
    Path(proposal_id): Path<String>,
    Json(req): Json<ActRequest>,
) -> ApiResult<ProposalInfo> {
    let proposal = state
        .coordinator
        .act(
            &proposal_id,
            &req.copayer_id,
            req.kind,
            req.signature,
            req.comment,
        )
        .await
        .map_err(coordinator_error)?;
    Ok(Json(ProposalInfo::from(&proposal)))
}

/// POST /api/subscriptions - Register a confirmation watch
pub async fn subscribe_confirmation(
    State(state): State<ApiState>,
    Json(req): Json<SubscribeRequest>,
) -> ApiResult<SubscriptionInfo> {
    let sub = state
        .dispatcher
        .subscribe(
            &req.subscriber_id,
            &req.target,
            req.variant,
            req.required_depth,
        )
        .map_err(dispatch_error)?;
    Ok(Json(SubscriptionInfo {
        id: sub.id,
        subscriber_id: sub.subscriber_id,
        target: sub.target,
        variant: sub.variant,
        required_depth: sub.required_depth,
        triggered: sub.triggered,
    }))
}

/// POST /api/ledger/facts - Ingest a confirmation fact from the ledger feed
pub async fn ingest_ledger_fact(
    State(state): State<ApiState>,
    Json(fact): Json<LedgerFact>,
) -> ApiResult<FactResponse> {
    let fired = state
        .dispatcher
        .on_ledger_fact(&fact)
        .map_err(dispatch_error)?;
    Ok(Json(FactResponse { fired }))
}

/// PUT /api/wallets/{id}/copayers/{copayer_id}/preferences
pub async fn put_preferences(
    State(state): State<ApiState>,
    Path((wallet_id, copayer_id)): Path<(String, String)>,
    Json(req): Json<PutPreferencesRequest>,
) -> ApiResult<Preferences> {
    let prefs = Preferences {
        wallet_id,
        copayer_id,
        email: req.email,
        language: req.language,
        unit: req.unit,
    };
    state
        .store
        .put_preferences(prefs.clone())
        .map_err(|e| unavailable("preferences write failed", e))?;
    Ok(Json(prefs))
}

/// GET /api/wallets/{id}/copayers/{copayer_id}/preferences
pub async fn get_preferences(
    State(state): State<ApiState>,
    Path((wallet_id, copayer_id)): Path<(String, String)>,
) -> ApiResult<Preferences> {
    match state.store.preferences(&wallet_id, &copayer_id) {
        Ok(Some(prefs)) => Ok(Json(prefs)),
        Ok(None) => Err(coded(
            StatusCode::NOT_FOUND,
            "PREFERENCES_NOT_FOUND",
            format!("no preferences for copayer {}", copayer_id),
        )),
        Err(e) => Err(unavailable("preferences read failed", e)),
    }
}

/// PUT /api/wallets/{id}/txnotes/{txid}
pub async fn put_tx_note(
    State(state): State<ApiState>,
    Path((wallet_id, txid)): Path<(String, String)>,
    Json(req): Json<PutNoteRequest>,
) -> ApiResult<TxNote> {
    let note = TxNote::new(&wallet_id, &txid, &req.body, &req.edited_by);
    state
        .store
        .put_tx_note(note.clone())
        .map_err(|e| unavailable("note write failed", e))?;
    Ok(Json(note))
}

/// GET /api/wallets/{id}/txnotes/{txid}
pub async fn get_tx_note(
    State(state): State<ApiState>,
    Path((wallet_id, txid)): Path<(String, String)>,
) -> ApiResult<TxNote> {
    match state.store.tx_note(&wallet_id, &txid) {
        Ok(Some(note)) => Ok(Json(note)),
        Ok(None) => Err(coded(
            StatusCode::NOT_FOUND,
            "NOTE_NOT_FOUND",
            format!("no note for transaction {}", txid),
        )),
        Err(e) => Err(unavailable("note read failed", e)),
    }
}

/// POST /api/sessions - Issue a session token for a copayer
pub async fn create_session(
    State(state): State<ApiState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<SessionInfo> {
    let session = Session::new(&req.copayer_id, chrono::Duration::minutes(SESSION_TTL_MINUTES));
    state
        .store
        .put_session(session.clone())
        .map_err(|e| unavailable("session write failed", e))?;
    Ok(Json(SessionInfo {
        token: session.token,
        copayer_id: session.copayer_id,
        expires_at: session.expires_at.to_rfc3339(),
    }))
}

/// GET /api/sessions/{token} - Check a session token
pub async fn get_session(
    State(state): State<ApiState>,
    Path(token): Path<String>,
) -> ApiResult<SessionInfo> {
    match state.store.session(&token) {
        Ok(Some(session)) if !session.is_expired_at(chrono::Utc::now()) => Ok(Json(SessionInfo {
            token: session.token,
            copayer_id: session.copayer_id,
            expires_at: session.expires_at.to_rfc3339(),
        })),
        Ok(Some(_)) => Err(coded(
            StatusCode::BAD_REQUEST,
            "SESSION_EXPIRED",
            "session token has expired",
        )),
        Ok(None) => Err(coded(
            StatusCode::NOT_FOUND,
            "SESSION_NOT_FOUND",
            "unknown session token",
        )),
        Err(e) => Err(unavailable("session read failed", e)),
    }
}
