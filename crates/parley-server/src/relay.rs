//! Message relay pipeline.
//!
//! A send request is persisted first, enqueued second, delivered third.
//! The order is load-bearing: a message that was never persisted must
//! never be delivered (unrecoverable on crash), and a message that was
//! persisted but not delivered is still reachable through the history
//! fetch.  The durable queue between submission and delivery means a
//! consumer restart redelivers instead of losing the push; duplicate
//! *pushes* are tolerated by clients, duplicate *rows* cannot happen
//! because persistence precedes enqueue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use parley_queue::DurableQueue;
use parley_shared::constants::{CHAT_QUEUE, MAX_BODY_SIZE};
use parley_shared::protocol::{RelayEnvelope, ServerEvent};
use parley_shared::{MessageKind, UserId};
use parley_store::{Database, StoredMessage};

use crate::error::ServerError;
use crate::presence::PresenceRegistry;

/// Accepts send requests: validate, persist, enqueue.
#[derive(Clone)]
pub struct RelayPipeline {
    store: Arc<Mutex<Database>>,
    queue: Arc<DurableQueue>,
}

impl RelayPipeline {
    pub fn new(store: Arc<Mutex<Database>>, queue: Arc<DurableQueue>) -> Self {
        Self { store, queue }
    }

    /// Relay one chat message.
    ///
    /// On success the message is durably persisted and enqueued for
    /// delivery; the caller acks the sender.  On failure nothing was
    /// delivered: an invalid recipient or failed persist leaves no trace,
    /// a failed enqueue leaves the persisted row (history remains the
    /// fallback path).
    pub async fn send(
        &self,
        sender: UserId,
        to: &str,
        body: String,
        kind: MessageKind,
        media_url: Option<String>,
    ) -> Result<StoredMessage, ServerError> {
        let receiver =
            UserId::parse(to).map_err(|_| ServerError::InvalidRecipient(to.to_string()))?;

        if body.len() > MAX_BODY_SIZE {
            return Err(ServerError::BadRequest(format!(
                "message body too large: {} bytes (max {})",
                body.len(),
                MAX_BODY_SIZE
            )));
        }

        let message = StoredMessage::chat(sender, receiver, body, kind, media_url);

        // 1. Persist before any delivery attempt.
        self.store.lock().await.insert_message(&message)?;

        // 2. Hand off to the durable queue for delivery.
        let envelope = RelayEnvelope {
            sender,
            receiver,
            body: message.body.clone(),
            timestamp: message.created_at,
        };
        self.queue.publish(CHAT_QUEUE, &envelope).await?;

        debug!(
            from = %sender.short(),
            to = %receiver.short(),
            kind = ?message.kind,
            "message persisted and enqueued"
        );
        Ok(message)
    }
}

/// Push one envelope to its recipient's live connection, if any.
///
/// Returns whether a push was delivered.  An offline recipient is not an
/// error: the message is already persisted and the next history fetch
/// delivers it.
async fn deliver(envelope: &RelayEnvelope, presence: &PresenceRegistry) -> bool {
    let delivered = presence
        .push(
            envelope.receiver,
            ServerEvent::ReceiveMessage {
                from: envelope.sender,
                body: envelope.body.clone(),
                timestamp: envelope.timestamp,
            },
        )
        .await;

    if delivered {
        debug!(to = %envelope.receiver.short(), "message pushed to live connection");
    } else {
        debug!(
            to = %envelope.receiver.short(),
            "recipient offline, message awaits history fetch"
        );
    }
    delivered
}

/// The queue consumer loop: one logical loop per relay instance.
///
/// Competing instances consuming the same queue each receive distinct
/// envelopes.  The envelope is acked only after the delivery attempt
/// completed, so a crash mid-processing redelivers it -- at worst the
/// recipient sees the same live push twice.
pub async fn run_consumer(queue: Arc<DurableQueue>, presence: PresenceRegistry) {
    info!(queue = CHAT_QUEUE, "relay consumer started");

    loop {
        let delivery = match queue.next::<RelayEnvelope>(CHAT_QUEUE).await {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(error = %e, "queue consume failed, backing off");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        deliver(&delivery.payload, &presence).await;

        if let Err(e) = queue.ack(&delivery).await {
            warn!(tag = delivery.tag, error = %e, "failed to ack envelope");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ConnectionHandle;
    use parley_shared::constants::OUTBOUND_CHANNEL_CAPACITY;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn pipeline() -> (RelayPipeline, Arc<Mutex<Database>>, Arc<DurableQueue>) {
        let store = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let queue = Arc::new(DurableQueue::open_in_memory().unwrap());
        (RelayPipeline::new(store.clone(), queue.clone()), store, queue)
    }

    async fn recv_message(rx: &mut mpsc::Receiver<ServerEvent>) -> Option<(UserId, String)> {
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::ReceiveMessage { from, body, .. } = event {
                return Some((from, body));
            }
        }
        None
    }

    #[tokio::test]
    async fn test_send_to_online_recipient() {
        let (pipeline, store, queue) = pipeline();
        let presence = PresenceRegistry::new();
        let (u1, u2) = (UserId::new(), UserId::new());

        let (tx, mut rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        presence
            .register(u2, ConnectionHandle::new(Uuid::new_v4(), tx))
            .await;

        let message = pipeline
            .send(u1, &u2.to_string(), "hi".into(), MessageKind::Text, None)
            .await
            .unwrap();

        // Exactly one persisted row.
        assert_eq!(store.lock().await.count_between(u1, u2).unwrap(), 1);

        // Drain the queue once: exactly one push.
        let delivery = queue.next::<RelayEnvelope>(CHAT_QUEUE).await.unwrap();
        assert!(deliver(&delivery.payload, &presence).await);
        queue.ack(&delivery).await.unwrap();

        let (from, body) = recv_message(&mut rx).await.expect("u2 should receive");
        assert_eq!(from, u1);
        assert_eq!(body, "hi");
        assert_eq!(message.body, "hi");

        assert_eq!(queue.depth(CHAT_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_send_to_offline_recipient_persists_without_push() {
        let (pipeline, store, queue) = pipeline();
        let presence = PresenceRegistry::new();
        let (u1, u2) = (UserId::new(), UserId::new());

        pipeline
            .send(u1, &u2.to_string(), "hi".into(), MessageKind::Text, None)
            .await
            .unwrap();

        assert_eq!(store.lock().await.count_between(u1, u2).unwrap(), 1);

        let delivery = queue.next::<RelayEnvelope>(CHAT_QUEUE).await.unwrap();
        assert!(!deliver(&delivery.payload, &presence).await);
        queue.ack(&delivery).await.unwrap();

        // Still exactly one row: the fallback path is the history fetch.
        assert_eq!(store.lock().await.count_between(u1, u2).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_recipient_leaves_no_trace() {
        let (pipeline, store, queue) = pipeline();
        let u1 = UserId::new();

        let result = pipeline
            .send(u1, "not-an-identity", "hi".into(), MessageKind::Text, None)
            .await;
        assert!(matches!(result, Err(ServerError::InvalidRecipient(_))));

        assert_eq!(queue.depth(CHAT_QUEUE).await.unwrap(), 0);
        let db = store.lock().await;
        assert_eq!(db.conversation(u1, u1, 10, 0).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_before_persist() {
        let (pipeline, store, _queue) = pipeline();
        let (u1, u2) = (UserId::new(), UserId::new());

        let body = "x".repeat(MAX_BODY_SIZE + 1);
        let result = pipeline
            .send(u1, &u2.to_string(), body, MessageKind::Text, None)
            .await;
        assert!(matches!(result, Err(ServerError::BadRequest(_))));
        assert_eq!(store.lock().await.count_between(u1, u2).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_redelivery_duplicates_push_not_row() {
        let (pipeline, store, queue) = pipeline();
        let presence = PresenceRegistry::new();
        let (u1, u2) = (UserId::new(), UserId::new());

        let (tx, mut rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        presence
            .register(u2, ConnectionHandle::new(Uuid::new_v4(), tx))
            .await;

        pipeline
            .send(u1, &u2.to_string(), "hi".into(), MessageKind::Text, None)
            .await
            .unwrap();

        // Consumer crashes after the push but before the ack.
        let delivery = queue.next::<RelayEnvelope>(CHAT_QUEUE).await.unwrap();
        deliver(&delivery.payload, &presence).await;
        drop(delivery);
        queue.recover().await.unwrap();

        // Redelivery: processed again in full.
        let delivery = queue.next::<RelayEnvelope>(CHAT_QUEUE).await.unwrap();
        deliver(&delivery.payload, &presence).await;
        queue.ack(&delivery).await.unwrap();

        // Two pushes, one row.
        let mut pushes = 0;
        while recv_message(&mut rx).await.is_some() {
            pushes += 1;
        }
        assert_eq!(pushes, 2);
        assert_eq!(store.lock().await.count_between(u1, u2).unwrap(), 1);
    }
}
