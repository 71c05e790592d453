//! Confirmation subscription dispatcher
//!
//! Consumes confirmation facts from the ledger feed and fires matching
//! subscriptions exactly once. Fact processing is serialized so that a
//! duplicated or re-ordered feed can never double-fire a subscription;
//! the `triggered` flag is recorded only after the notification has been
//! handed off successfully, so a failed delivery is retried when the
//! next fact for the target arrives.

use crate::dispatch::events::{Notification, NotificationSink, WalletEvent};
use crate::ledger::LedgerFact;
use crate::model::{ConfirmationSubscription, SubscriptionVariant, ValidationError};
use crate::store::{Store, StoreError};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Attempts per notification before deferring to the next fact
const DELIVERY_ATTEMPTS: u32 = 3;

/// Dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Tracks confirmation watches and delivers at-most-once notifications
pub struct SubscriptionDispatcher {
    store: Arc<dyn Store>,
    sink: Arc<dyn NotificationSink>,
    /// Serializes fact ingestion; see module docs
    ingest: Mutex<()>,
}

impl SubscriptionDispatcher {
    pub fn new(store: Arc<dyn Store>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            sink,
            ingest: Mutex::new(()),
        }
    }

    /// Register a confirmation watch
    pub fn subscribe(
        &self,
        subscriber_id: &str,
        target: &str,
        variant: SubscriptionVariant,
        required_depth: u32,
    ) -> Result<ConfirmationSubscription, DispatchError> {
        let sub = ConfirmationSubscription::new(subscriber_id, target, variant, required_depth)?;
        self.store.insert_subscription(sub.clone())?;
        log::debug!(
            "subscriber {} watching {} at depth {}",
            subscriber_id,
            target,
            required_depth
        );
        Ok(sub)
    }

    /// Ingest one confirmation fact; returns how many subscriptions fired.
    ///
    /// Facts may arrive duplicated or out of order; every untriggered
    /// subscription matching the target whose depth requirement is met
    /// fires exactly once across the whole fact sequence.
    pub fn on_ledger_fact(&self, fact: &LedgerFact) -> Result<usize, DispatchError> {
        let _guard = self.ingest.lock().expect("ingest mutex poisoned");

        let mut fired = 0;
        for sub in self.store.subscriptions_for_target(&fact.target)? {
            if sub.triggered || fact.depth < sub.required_depth {
                continue;
            }

            let event = WalletEvent::ConfirmationReached {
                notification: Notification::for_subscription(&sub, fact.depth),
            };

            if !self.deliver_with_retry(&sub.id, &event) {
                // triggered stays false; the next fact for this target
                // will retry the delivery
                continue;
            }

            if self.store.mark_triggered(&sub.id)? {
                fired += 1;
            }
        }

        Ok(fired)
    }

    fn deliver_with_retry(&self, subscription_id: &str, event: &WalletEvent) -> bool {
        for attempt in 1..=DELIVERY_ATTEMPTS {
            match self.sink.deliver(event) {
                Ok(()) => return true,
                Err(e) => log::warn!(
                    "delivery attempt {} for subscription {} failed: {}",
                    attempt,
                    subscription_id,
                    e
                ),
            }
        }
        false
    }
}
