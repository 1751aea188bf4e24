//! Call signaling forwarder.
//!
//! The relay holds no call state: it forwards offer, answer, candidate,
//! reject and hang-up events between the two identities and nothing else.
//! Candidates are forwarded unconditionally and never reordered or
//! buffered here -- buffering until the remote description is applied is
//! each endpoint's job (see the `parley-signal` crate).
//!
//! An offer to an absent callee is silently dropped; the caller times out
//! locally.  There is no server-side ring timeout.  Two offers racing to
//! the same callee are both forwarded and the clients arbitrate.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use parley_shared::protocol::ServerEvent;
use parley_shared::{CallMediaKind, UserId};
use parley_store::{Database, StoredMessage};

use crate::presence::PresenceRegistry;

#[derive(Clone)]
pub struct SignalForwarder {
    presence: PresenceRegistry,
    store: Arc<Mutex<Database>>,
}

impl SignalForwarder {
    pub fn new(presence: PresenceRegistry, store: Arc<Mutex<Database>>) -> Self {
        Self { presence, store }
    }

    /// Forward an event to a raw recipient id.  Fire-and-forget: a
    /// malformed id or an offline recipient drops the event.
    async fn forward(&self, from: UserId, to: &str, event: ServerEvent, what: &'static str) {
        let Ok(receiver) = UserId::parse(to) else {
            debug!(from = %from.short(), to, what, "dropping signal for malformed recipient");
            return;
        };

        if self.presence.push(receiver, event).await {
            debug!(from = %from.short(), to = %receiver.short(), what, "signal forwarded");
        } else {
            debug!(from = %from.short(), to = %receiver.short(), what, "signal dropped, recipient offline");
        }
    }

    pub async fn call_user(
        &self,
        from: UserId,
        to: &str,
        offer: Value,
        media_kind: CallMediaKind,
        caller_name: String,
    ) {
        self.forward(
            from,
            to,
            ServerEvent::CallUser {
                from,
                offer,
                media_kind,
                caller_name,
            },
            "call-user",
        )
        .await;
    }

    pub async fn webrtc_answer(&self, from: UserId, to: &str, answer: Value) {
        self.forward(from, to, ServerEvent::WebrtcAnswer { from, answer }, "webrtc-answer")
            .await;
    }

    pub async fn ice_candidate(&self, from: UserId, to: &str, candidate: Value) {
        self.forward(from, to, ServerEvent::IceCandidate { from, candidate }, "ice-candidate")
            .await;
    }

    pub async fn call_rejected(&self, from: UserId, to: &str) {
        self.forward(from, to, ServerEvent::CallRejected { from }, "call-rejected")
            .await;
    }

    /// Forward the hang-up, then write the call-record bookkeeping row.
    ///
    /// The forward happens first and unconditionally: signaling continuity
    /// takes priority over bookkeeping, so an unresolvable participant or
    /// a failed write skips the record but never the forward.
    pub async fn end_call(
        &self,
        from: UserId,
        to: &str,
        media_kind: CallMediaKind,
        duration: i64,
    ) {
        self.forward(from, to, ServerEvent::EndCall { from }, "end-call")
            .await;

        let Some(receiver) = self.resolve_participant(to).await else {
            warn!(from = %from.short(), to, "cannot resolve call peer, skipping call record");
            return;
        };

        let record = StoredMessage::call_record(from, receiver, media_kind, duration);
        if let Err(e) = self.store.lock().await.insert_message(&record) {
            warn!(error = %e, "failed to write call record");
        } else {
            debug!(
                from = %from.short(),
                to = %receiver.short(),
                kind = %media_kind,
                duration,
                "call record written"
            );
        }
    }

    /// Resolve a raw event field naming the other call participant.
    ///
    /// Prefers the value as an identity; falls back to treating it as a
    /// transport handle and reverse-mapping it through the registry.
    async fn resolve_participant(&self, raw: &str) -> Option<UserId> {
        let id = UserId::parse(raw).ok()?;
        if let Some(owner) = self.presence.resolve(id.0).await {
            return Some(owner);
        }
        Some(id)
    }
}
