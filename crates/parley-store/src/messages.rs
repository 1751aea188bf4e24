use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use parley_shared::{MessageKind, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::StoredMessage;

impl Database {
    pub fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, sender, receiver, body, kind, media_url, call_duration, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id.to_string(),
                message.sender.to_string(),
                message.receiver.to_string(),
                message.body,
                message.kind.as_str(),
                message.media_url,
                message.call_duration,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch the conversation between two identities, newest first.
    ///
    /// This doubles as the fallback delivery path: a recipient that was
    /// offline when a message was relayed finds it here.
    pub fn conversation(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender, receiver, body, kind, media_url, call_duration, created_at
             FROM messages
             WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
             ORDER BY created_at DESC
             LIMIT ?3 OFFSET ?4",
        )?;

        let rows = stmt.query_map(
            params![a.to_string(), b.to_string(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: Uuid) -> Result<StoredMessage> {
        self.conn()
            .query_row(
                "SELECT id, sender, receiver, body, kind, media_url, call_duration, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Number of messages between a pair, in either direction.
    pub fn count_between(&self, a: UserId, b: UserId) -> Result<u64> {
        let count: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)",
            params![a.to_string(), b.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let body: String = row.get(3)?;
    let kind_str: String = row.get(4)?;
    let media_url: Option<String> = row.get(5)?;
    let call_duration: Option<i64> = row.get(6)?;
    let ts_str: String = row.get(7)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver = UserId::parse(&receiver_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let kind = MessageKind::from_str(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown message kind: {kind_str}").into(),
        )
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(StoredMessage {
        id,
        sender,
        receiver,
        body,
        kind,
        media_url,
        call_duration,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::CallMediaKind;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_fetch() {
        let db = db();
        let (a, b) = (UserId::new(), UserId::new());

        let msg = StoredMessage::chat(a, b, "hi", MessageKind::Text, None);
        db.insert_message(&msg).unwrap();

        let fetched = db.get_message_by_id(msg.id).unwrap();
        assert_eq!(fetched, msg);
    }

    #[test]
    fn test_conversation_covers_both_directions() {
        let db = db();
        let (a, b) = (UserId::new(), UserId::new());
        let c = UserId::new();

        db.insert_message(&StoredMessage::chat(a, b, "one", MessageKind::Text, None))
            .unwrap();
        db.insert_message(&StoredMessage::chat(b, a, "two", MessageKind::Text, None))
            .unwrap();
        db.insert_message(&StoredMessage::chat(a, c, "other pair", MessageKind::Text, None))
            .unwrap();

        let convo = db.conversation(a, b, 50, 0).unwrap();
        assert_eq!(convo.len(), 2);
        assert!(convo.iter().all(|m| m.body != "other pair"));

        assert_eq!(db.count_between(a, b).unwrap(), 2);
    }

    #[test]
    fn test_conversation_limit_offset() {
        let db = db();
        let (a, b) = (UserId::new(), UserId::new());

        for i in 0..5 {
            let mut msg = StoredMessage::chat(a, b, format!("m{i}"), MessageKind::Text, None);
            // Deterministic ordering for the assertion below.
            msg.created_at = Utc::now() + chrono::Duration::seconds(i);
            db.insert_message(&msg).unwrap();
        }

        let page = db.conversation(a, b, 2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].body, "m4"); // newest first

        let page = db.conversation(a, b, 2, 4).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].body, "m0");
    }

    #[test]
    fn test_call_record_roundtrip() {
        let db = db();
        let (a, b) = (UserId::new(), UserId::new());

        let record = StoredMessage::call_record(a, b, CallMediaKind::Video, 42);
        db.insert_message(&record).unwrap();

        let fetched = db.get_message_by_id(record.id).unwrap();
        assert_eq!(fetched.kind, MessageKind::CallRecord);
        assert_eq!(fetched.call_duration, Some(42));
        assert_eq!(fetched.body, "Video call ended");
    }

    #[test]
    fn test_missing_message_is_not_found() {
        let db = db();
        assert!(matches!(
            db.get_message_by_id(Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
    }
}
