//! Confirmation-watch subscriptions
//!
//! A subscription registers interest in a transaction or address reaching
//! a confirmation depth. The `triggered` flag flips false->true exactly
//! once; a fired subscription never fires again, whatever facts arrive
//! later.

use crate::model::{random_id, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription flavor; changes the notification payload shape only,
/// never the triggering logic
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionVariant {
    Plain,
    Referral,
    Vault,
}

/// A registered confirmation watch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfirmationSubscription {
    /// Unique subscription identifier
    pub id: String,
    /// Who asked to be notified
    pub subscriber_id: String,
    /// Watched transaction id or address
    pub target: String,
    /// Payload flavor
    pub variant: SubscriptionVariant,
    /// Confirmation depth that triggers the notification
    pub required_depth: u32,
    /// Set exactly once, on successful delivery
    pub triggered: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ConfirmationSubscription {
    /// Register a new watch; depth must be positive and the target non-empty
    pub fn new(
        subscriber_id: &str,
        target: &str,
        variant: SubscriptionVariant,
        required_depth: u32,
    ) -> Result<Self, ValidationError> {
        if target.trim().is_empty() {
            return Err(ValidationError::EmptyTarget);
        }
        if required_depth == 0 {
            return Err(ValidationError::ZeroDepth);
        }

        Ok(Self {
            id: random_id(),
            subscriber_id: subscriber_id.to_string(),
            target: target.to_string(),
            variant,
            required_depth,
            triggered: false,
            created_at: Utc::now(),
        })
    }
}
