use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = opaque UUID issued by the auth service.
// Stable for the lifetime of the account, never re-used across users.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Structural-validity check for identities arriving in event payloads.
    ///
    /// This is the only validation the relay performs on a recipient: a
    /// well-formed id that belongs to no account simply routes nowhere.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a persisted chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    #[default]
    Text,
    Media,
    CallRecord,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Media => "media",
            MessageKind::CallRecord => "call-record",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "media" => Some(MessageKind::Media),
            "call-record" => Some(MessageKind::CallRecord),
            _ => None,
        }
    }
}

/// Media flavour of a call attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallMediaKind {
    Audio,
    Video,
}

impl CallMediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallMediaKind::Audio => "audio",
            CallMediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for CallMediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_parse_roundtrip() {
        let id = UserId::new();
        let parsed = UserId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_user_id_parse_rejects_garbage() {
        assert!(UserId::parse("not-a-uuid").is_err());
        assert!(UserId::parse("").is_err());
    }

    #[test]
    fn test_message_kind_str_roundtrip() {
        for kind in [MessageKind::Text, MessageKind::Media, MessageKind::CallRecord] {
            assert_eq!(MessageKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::from_str("bogus"), None);
    }
}
