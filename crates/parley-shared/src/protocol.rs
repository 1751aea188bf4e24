//! The JSON wire protocol spoken over a live connection.
//!
//! Events are internally tagged (`"type": "send-message"`) and kebab-cased
//! so the names on the wire match the event vocabulary the web client
//! already speaks.  SDP blobs and network-path candidates are carried as
//! opaque JSON values -- the relay forwards them verbatim and never looks
//! inside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{CallMediaKind, MessageKind, UserId};

/// Events a client may send on its connection.
///
/// Recipient ids (`to`) are raw strings: structural validation is an
/// application-level concern (a malformed recipient fails the single
/// operation, it must not kill the whole connection at the parse layer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    SendMessage {
        to: String,
        body: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        media_url: Option<String>,
    },
    Typing {
        to: String,
    },
    StopTyping {
        to: String,
    },
    CallUser {
        to: String,
        offer: Value,
        media_kind: CallMediaKind,
        caller_name: String,
    },
    WebrtcAnswer {
        to: String,
        answer: Value,
    },
    IceCandidate {
        to: String,
        candidate: Value,
    },
    CallRejected {
        to: String,
    },
    EndCall {
        to: String,
        media_kind: CallMediaKind,
        duration: i64,
    },
}

/// Delivery status carried on a `message-ack`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Sent,
    Error,
}

/// Events the relay pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Handshake reply carrying the verified identity.
    UserId { user_id: UserId },
    /// Full online roster, broadcast to every connection on any presence
    /// change.  Fire-and-forget: a missed broadcast is corrected by the
    /// next one.
    UsersOnline { users: Vec<UserId> },
    ReceiveMessage {
        from: UserId,
        body: String,
        timestamp: DateTime<Utc>,
    },
    MessageAck {
        status: AckStatus,
        #[serde(default)]
        message_id: Option<Uuid>,
        #[serde(default)]
        error: Option<String>,
    },
    Typing { from: UserId },
    StopTyping { from: UserId },
    CallUser {
        from: UserId,
        offer: Value,
        media_kind: CallMediaKind,
        caller_name: String,
    },
    WebrtcAnswer { from: UserId, answer: Value },
    IceCandidate { from: UserId, candidate: Value },
    CallRejected { from: UserId },
    EndCall { from: UserId },
    /// The identity opened a newer connection elsewhere; this one is about
    /// to be dropped.
    SessionReplaced,
}

/// The unit placed on the durable relay queue.
///
/// Lives from publish until consumer ack; redelivered whole if the
/// consumer dies before acking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayEnvelope {
    pub sender: UserId,
    pub receiver: UserId,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_names() {
        let event = ClientEvent::SendMessage {
            to: "abc".into(),
            body: "hi".into(),
            kind: MessageKind::Text,
            media_url: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "send-message");

        let event = ClientEvent::IceCandidate {
            to: "abc".into(),
            candidate: serde_json::json!({"sdpMid": "0"}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ice-candidate");
    }

    #[test]
    fn test_send_message_defaults() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"send-message","to":"x","body":"hello"}"#,
        )
        .unwrap();

        match event {
            ClientEvent::SendMessage { kind, media_url, .. } => {
                assert_eq!(kind, MessageKind::Text);
                assert!(media_url.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_roundtrip() {
        let event = ServerEvent::ReceiveMessage {
            from: UserId::new(),
            body: "hi".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"receive-message""#));

        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_call_event_payload_is_opaque() {
        let offer = serde_json::json!({"sdp": "v=0\r\n...", "type": "offer"});
        let event: ClientEvent = serde_json::from_value(serde_json::json!({
            "type": "call-user",
            "to": UserId::new().to_string(),
            "offer": offer,
            "media_kind": "video",
            "caller_name": "alice",
        }))
        .unwrap();

        match event {
            ClientEvent::CallUser { offer, media_kind, .. } => {
                assert_eq!(media_kind, CallMediaKind::Video);
                assert_eq!(offer["type"], "offer");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
