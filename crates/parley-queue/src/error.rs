use thiserror::Error;

/// Errors produced by the durable queue.
#[derive(Error, Debug)]
pub enum QueueError {
    /// SQLite error.
    #[error("Queue storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the queue directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload (de)serialization failure.
    #[error("Envelope serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Acknowledged a delivery the queue no longer knows about.
    #[error("Unknown delivery tag: {0}")]
    UnknownDelivery(i64),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QueueError>;
