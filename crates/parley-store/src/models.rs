//! Domain model structs persisted in the message store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use parley_shared::{CallMediaKind, MessageKind, UserId};

/// A single chat message record.
///
/// Created once on a send request (or on end-of-call bookkeeping) and never
/// mutated afterwards; the relay only reads it back for history fetches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    /// Unique message identifier.
    pub id: Uuid,
    /// Sender identity.
    pub sender: UserId,
    /// Receiver identity.
    pub receiver: UserId,
    /// Message body.  For call records this is a short human-readable
    /// summary ("Video call ended").
    pub body: String,
    /// Message kind: text, media, or call-record.
    pub kind: MessageKind,
    /// Location of an uploaded media blob, for `kind = media`.
    pub media_url: Option<String>,
    /// Call duration in seconds, for `kind = call-record`.
    pub call_duration: Option<i64>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Build a text/media message from a send request.
    pub fn chat(
        sender: UserId,
        receiver: UserId,
        body: impl Into<String>,
        kind: MessageKind,
        media_url: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            receiver,
            body: body.into(),
            kind,
            media_url,
            call_duration: None,
            created_at: Utc::now(),
        }
    }

    /// Build the bookkeeping record written when a call ends.
    pub fn call_record(
        sender: UserId,
        receiver: UserId,
        media_kind: CallMediaKind,
        duration: i64,
    ) -> Self {
        let body = match media_kind {
            CallMediaKind::Audio => "Audio call ended",
            CallMediaKind::Video => "Video call ended",
        };
        Self {
            id: Uuid::new_v4(),
            sender,
            receiver,
            body: body.to_string(),
            kind: MessageKind::CallRecord,
            media_url: None,
            call_duration: Some(duration),
            created_at: Utc::now(),
        }
    }
}
