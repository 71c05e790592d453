//! Notification dispatch
//!
//! Carries two things:
//! - the service event bus every component publishes lifecycle events to
//!   (proposal created/accepted/broadcast/..., confirmation reached)
//! - the subscription dispatcher that turns ledger confirmation facts
//!   into at-most-once notifications

pub mod dispatcher;
pub mod events;

pub use dispatcher::{DispatchError, SubscriptionDispatcher};
pub use events::{
    DeliveryError, EventBus, Notification, NotificationPayload, NotificationSink, WalletEvent,
};
