//! Per-copayer bookkeeping records
//!
//! Preferences, transaction notes, and authentication sessions. Plain
//! data shapes with store-backed CRUD; nothing here participates in the
//! quorum logic.

use crate::model::random_id;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A copayer's notification and display settings for one wallet
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Preferences {
    pub wallet_id: String,
    pub copayer_id: String,
    /// Notification email, if any
    pub email: Option<String>,
    /// Preferred language code
    pub language: Option<String>,
    /// Preferred display unit
    pub unit: Option<String>,
}

/// Free-text annotation a copayer attaches to a transaction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxNote {
    pub wallet_id: String,
    pub txid: String,
    pub body: String,
    /// Copayer that last edited the note
    pub edited_by: String,
    pub edited_at: DateTime<Utc>,
}

impl TxNote {
    pub fn new(wallet_id: &str, txid: &str, body: &str, edited_by: &str) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            txid: txid.to_string(),
            body: body.to_string(),
            edited_by: edited_by.to_string(),
            edited_at: Utc::now(),
        }
    }
}

/// An authentication session for a copayer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Opaque bearer token
    pub token: String,
    pub copayer_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(copayer_id: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            token: random_id(),
            copayer_id: copayer_id.to_string(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expiry() {
        let session = Session::new("copayer-1", Duration::minutes(10));
        assert!(!session.is_expired_at(Utc::now()));
        assert!(session.is_expired_at(Utc::now() + Duration::minutes(11)));
    }

    #[test]
    fn test_note_records_editor() {
        let note = TxNote::new("w1", "tx1", "rent payment", "copayer-2");
        assert_eq!(note.edited_by, "copayer-2");
        assert_eq!(note.body, "rent payment");
    }
}
