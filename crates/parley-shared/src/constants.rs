/// Application name
pub const APP_NAME: &str = "Parley";

/// Maximum chat message body size in bytes (256 KiB)
pub const MAX_BODY_SIZE: usize = 262_144;

/// Capacity of a connection's outbound event channel.  Pushes to a full
/// channel are dropped (presence and forwards are fire-and-forget).
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Name of the durable queue carrying chat-message envelopes.
pub const CHAT_QUEUE: &str = "chat-messages";

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Default HTTP/WebSocket listen port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
