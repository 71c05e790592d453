//! M-of-N quorum coordination
//!
//! The proposal state machine: proposals open on complete wallets,
//! collect copayer accepts and rejects, commit to `ACCEPTED` the moment
//! the threshold is met, and hand the assembled transaction to the
//! external ledger. Rejection is fail-fast: the proposal terminates as
//! soon as quorum becomes mathematically unreachable.

pub mod coordinator;

pub use coordinator::{CoordinatorConfig, CoordinatorError, QuorumCoordinator};
