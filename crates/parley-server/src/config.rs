//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the message store.
    /// Env: `DB_PATH`
    /// Default: `./data/parley.db`
    pub db_path: PathBuf,

    /// Filesystem path of the durable relay queue.
    /// Env: `QUEUE_PATH`
    /// Default: `./data/relay-queue.db`
    pub queue_path: PathBuf,

    /// Ed25519 public key of the auth service (hex-encoded, 64 chars).
    /// Env: `AUTH_SERVICE_PUBKEY`
    /// Default: all-zeros (development only; rejects every token).
    pub auth_service_pubkey: [u8; 32],

    /// Human-readable name for this relay instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parley Relay"`
    pub instance_name: String,

    /// Age in seconds after which an unacked queue claim is considered
    /// abandoned and returned to the queue.
    /// Env: `QUEUE_RECLAIM_SECS`
    /// Default: `300`
    pub queue_reclaim_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: PathBuf::from("./data/parley.db"),
            queue_path: PathBuf::from("./data/relay-queue.db"),
            auth_service_pubkey: [0u8; 32],
            instance_name: "Parley Relay".to_string(),
            queue_reclaim_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("QUEUE_PATH") {
            config.queue_path = PathBuf::from(path);
        }

        if let Ok(hex_key) = std::env::var("AUTH_SERVICE_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.auth_service_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid AUTH_SERVICE_PUBKEY, using default (dev-only, rejects all tokens)"
                    );
                }
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(val) = std::env::var("QUEUE_RECLAIM_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.queue_reclaim_secs = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(hex_str: &str) -> Result<[u8; 32], String> {
    let hex_str = hex_str.trim();
    if hex_str.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex_str.len()));
    }

    let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.auth_service_pubkey, [0u8; 32]);
        assert_eq!(config.queue_reclaim_secs, 300);
    }

    #[test]
    fn test_parse_hex_pubkey() {
        let hex_str = "ab".repeat(32);
        let key = parse_hex_pubkey(&hex_str).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_pubkey_wrong_length() {
        assert!(parse_hex_pubkey("abcd").is_err());
    }

    #[test]
    fn test_parse_hex_pubkey_bad_digit() {
        assert!(parse_hex_pubkey(&"zz".repeat(32)).is_err());
    }
}
