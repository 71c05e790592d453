//! Service events and the broadcast bus
//!
//! Every interesting state change is published as a [`WalletEvent`].
//! The bus fans events out to websocket clients and any other in-process
//! listener; delivery is decoupled from the components that emit.

use crate::model::{ActionKind, ConfirmationSubscription, SubscriptionVariant};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

/// Maximum number of events buffered per subscriber
const BUS_CAPACITY: usize = 256;

/// Errors handing an event to a sink
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Notification channel closed")]
    ChannelClosed,
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// A confirmation notification for one subscription
#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    pub subscription_id: String,
    pub subscriber_id: String,
    pub target: String,
    pub payload: NotificationPayload,
}

/// Payload shape per subscription variant. The variant changes the shape
/// only; triggering logic is identical for all three.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum NotificationPayload {
    Plain {
        confirmations: u32,
    },
    Referral {
        confirmations: u32,
        referred_target: String,
    },
    Vault {
        confirmations: u32,
        vault_target: String,
        unlocked: bool,
    },
}

impl Notification {
    /// Build the notification for a subscription at a confirmation depth
    pub fn for_subscription(sub: &ConfirmationSubscription, depth: u32) -> Self {
        let payload = match sub.variant {
            SubscriptionVariant::Plain => NotificationPayload::Plain {
                confirmations: depth,
            },
            SubscriptionVariant::Referral => NotificationPayload::Referral {
                confirmations: depth,
                referred_target: sub.target.clone(),
            },
            SubscriptionVariant::Vault => NotificationPayload::Vault {
                confirmations: depth,
                vault_target: sub.target.clone(),
                unlocked: true,
            },
        };
        Self {
            subscription_id: sub.id.clone(),
            subscriber_id: sub.subscriber_id.clone(),
            target: sub.target.clone(),
            payload,
        }
    }
}

/// Events published on the service bus
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WalletEvent {
    /// A proposal was submitted and is open for actions
    ProposalCreated {
        proposal_id: String,
        wallet_id: String,
    },
    /// A copayer's action was recorded
    ActionRecorded {
        proposal_id: String,
        copayer_id: String,
        kind: ActionKind,
    },
    /// Quorum of accepts reached
    ProposalAccepted { proposal_id: String },
    /// The transaction hit the ledger
    ProposalBroadcast { proposal_id: String, txid: String },
    /// Quorum became mathematically unreachable
    ProposalRejected { proposal_id: String },
    /// TTL passed before resolution
    ProposalExpired { proposal_id: String },
    /// Broadcast retries exhausted; proposal needs manual intervention
    BroadcastFailed {
        proposal_id: String,
        attempts: u32,
        reason: String,
    },
    /// A confirmation subscription fired
    ConfirmationReached { notification: Notification },
}

/// Where components hand events off to
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, event: &WalletEvent) -> Result<(), DeliveryError>;
}

/// Broadcast-channel bus fanning events out to all listeners
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<WalletEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.sender.subscribe()
    }

    /// Number of active listeners
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for EventBus {
    fn deliver(&self, event: &WalletEvent) -> Result<(), DeliveryError> {
        // A bus with no listeners still counts as a successful hand-off
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_delivers_to_listener() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.deliver(&WalletEvent::ProposalAccepted {
            proposal_id: "p1".to_string(),
        })
        .unwrap();

        let event = rx.try_recv().unwrap();
        assert!(matches!(event, WalletEvent::ProposalAccepted { .. }));
    }

    #[test]
    fn test_bus_without_listeners_succeeds() {
        let bus = EventBus::new();
        assert_eq!(bus.listener_count(), 0);
        assert!(bus
            .deliver(&WalletEvent::ProposalRejected {
                proposal_id: "p1".to_string(),
            })
            .is_ok());
    }

    #[test]
    fn test_payload_shapes_follow_variant() {
        let sub = ConfirmationSubscription::new(
            "alice",
            "txid-1",
            SubscriptionVariant::Vault,
            6,
        )
        .unwrap();
        let n = Notification::for_subscription(&sub, 7);
        assert!(matches!(
            n.payload,
            NotificationPayload::Vault {
                confirmations: 7,
                ..
            }
        ));

        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"variant\":\"vault\""));
    }
}
