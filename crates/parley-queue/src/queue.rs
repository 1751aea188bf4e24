//! SQLite-backed at-least-once queue.
//!
//! Envelope lifecycle: `ready` on publish, `in-flight` once a consumer
//! claims it, gone once the consumer acks.  `recover` and
//! `reclaim_expired` move in-flight envelopes back to ready, which is what
//! makes delivery at-least-once across consumer crashes.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::error::{QueueError, Result};

/// How long a waiting consumer sleeps between queue polls when no publish
/// notification arrives (covers publishes from other processes sharing the
/// same queue file).
const POLL_INTERVAL: Duration = Duration::from_millis(250);

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS envelopes (
    tag          INTEGER PRIMARY KEY AUTOINCREMENT,
    queue        TEXT NOT NULL,
    payload      TEXT NOT NULL,               -- serde_json
    in_flight    INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    published_at TEXT NOT NULL,               -- ISO-8601 / RFC-3339
    claimed_at   TEXT
);

CREATE INDEX IF NOT EXISTS idx_envelopes_ready
    ON envelopes(queue, in_flight, tag);
"#;

/// One claimed envelope.  Hold it only as long as processing takes, then
/// [`DurableQueue::ack`] it.
#[derive(Debug)]
pub struct Delivery<T> {
    /// Opaque acknowledgment tag.
    pub tag: i64,
    pub payload: T,
}

/// A named-queue store with explicit-ack consumption.
///
/// Cheap to share behind an `Arc`; all operations take `&self`.
pub struct DurableQueue {
    conn: Mutex<Connection>,
    notify: Notify,
}

impl DurableQueue {
    /// Open (or create) the queue file at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!(path = %path.display(), "opening durable queue");

        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory queue.  Used by tests; offers the same
    /// at-least-once semantics minus restart durability.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
            notify: Notify::new(),
        })
    }

    /// Serialize a payload onto the named queue.  The envelope is durable
    /// once this returns.
    pub async fn publish<T: Serialize>(&self, queue: &str, payload: &T) -> Result<i64> {
        let json = serde_json::to_string(payload)?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO envelopes (queue, payload, in_flight, published_at)
             VALUES (?1, ?2, 0, ?3)",
            params![queue, json, Utc::now().to_rfc3339()],
        )?;
        let tag = conn.last_insert_rowid();
        drop(conn);

        debug!(queue, tag, "envelope published");
        self.notify.notify_one();
        Ok(tag)
    }

    /// Claim the oldest ready envelope, if any.  The envelope turns
    /// in-flight; it comes back only through [`Self::ack`]-less recovery.
    pub async fn try_claim<T: DeserializeOwned>(&self, queue: &str) -> Result<Option<Delivery<T>>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let row: Option<(i64, String)> = tx
            .query_row(
                "SELECT tag, payload FROM envelopes
                 WHERE queue = ?1 AND in_flight = 0
                 ORDER BY tag LIMIT 1",
                params![queue],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((tag, json)) = row else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE envelopes SET in_flight = 1, claimed_at = ?2 WHERE tag = ?1",
            params![tag, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        drop(conn);

        let payload = serde_json::from_str(&json)?;
        Ok(Some(Delivery { tag, payload }))
    }

    /// Wait for the next envelope on the named queue.
    ///
    /// Competing consumers each claim distinct envelopes; for a single
    /// consumer, envelopes come out in publish order.
    pub async fn next<T: DeserializeOwned>(&self, queue: &str) -> Result<Delivery<T>> {
        loop {
            if let Some(delivery) = self.try_claim(queue).await? {
                return Ok(delivery);
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// Acknowledge a processed delivery, removing it permanently.
    pub async fn ack<T>(&self, delivery: &Delivery<T>) -> Result<()> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            "DELETE FROM envelopes WHERE tag = ?1",
            params![delivery.tag],
        )?;
        if affected == 0 {
            return Err(QueueError::UnknownDelivery(delivery.tag));
        }
        debug!(tag = delivery.tag, "envelope acked");
        Ok(())
    }

    /// Return every in-flight envelope to ready.
    ///
    /// Run once at startup: anything still claimed belonged to a consumer
    /// that died before acking, and must be delivered again.
    pub async fn recover(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let restored = conn.execute(
            "UPDATE envelopes SET in_flight = 0, claimed_at = NULL WHERE in_flight = 1",
            [],
        )?;
        drop(conn);

        if restored > 0 {
            info!(restored, "requeued unacknowledged envelopes");
            self.notify.notify_one();
        }
        Ok(restored)
    }

    /// Return in-flight envelopes claimed longer than `max_age` ago.
    ///
    /// Covers a consumer that hangs without dying; run periodically.
    pub async fn reclaim_expired(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());

        let conn = self.conn.lock().await;
        let restored = conn.execute(
            "UPDATE envelopes SET in_flight = 0, claimed_at = NULL
             WHERE in_flight = 1 AND claimed_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        drop(conn);

        if restored > 0 {
            debug!(restored, "reclaimed expired claims");
            self.notify.notify_one();
        }
        Ok(restored)
    }

    /// Number of ready (unclaimed) envelopes on the named queue.
    pub async fn depth(&self, queue: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM envelopes WHERE queue = ?1 AND in_flight = 0",
            params![queue],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
