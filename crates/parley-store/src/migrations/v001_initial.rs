//! v001 -- Initial schema creation.
//!
//! Creates the `messages` table: the minimal durable record the relay
//! needs, plus the pair/timestamp index the history fetch walks.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    sender        TEXT NOT NULL,              -- UUID of the sender
    receiver      TEXT NOT NULL,              -- UUID of the receiver
    body          TEXT NOT NULL,
    kind          TEXT NOT NULL,              -- text | media | call-record
    media_url     TEXT,
    call_duration INTEGER,                    -- seconds, call records only
    created_at    TEXT NOT NULL               -- ISO-8601 / RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender, receiver, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_messages_receiver_ts
    ON messages(receiver, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
