//! Connection session supervisor.
//!
//! Owns the lifecycle of one live WebSocket: verify the identity claim,
//! register presence (which broadcasts the new roster to everyone),
//! dispatch inbound events, and tear down exactly once on disconnect.
//!
//! The claim is checked before the upgrade completes -- an unauthenticated
//! peer never reaches the registry or any handler.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_shared::auth::Identity;
use parley_shared::constants::OUTBOUND_CHANNEL_CAPACITY;
use parley_shared::protocol::{AckStatus, ClientEvent, ServerEvent};

use crate::api::AppState;
use crate::error::ServerError;
use crate::presence::ConnectionHandle;

#[derive(Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// `GET /ws?token=...` -- authenticate, then upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let Some(token) = params.token else {
        return ServerError::Authentication.into_response();
    };

    match state.verifier.verify(&token) {
        Ok(identity) => ws.on_upgrade(move |socket| handle_socket(socket, state, identity)),
        Err(_) => ServerError::Authentication.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: Identity) {
    let user = identity.user_id;
    let conn_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();

    // Writer task: everything pushed at this connection funnels through
    // one channel so per-sender order is preserved end to end.
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_CHANNEL_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            // An evicted session gets this as its final event; close the
            // transport after delivering it.
            let is_final = matches!(event, ServerEvent::SessionReplaced);
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound event");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
            if is_final {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let handle = ConnectionHandle::new(conn_id, tx.clone());

    // Hello first, then join: the client learns its id before the first
    // roster broadcast arrives.
    handle.push(ServerEvent::UserId { user_id: user });
    state.presence.register(user, handle.clone()).await;

    info!(user = %user.short(), conn = %conn_id, name = %identity.display_name, "connected");

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if !state.rate_limiter.check(user).await {
                    debug!(user = %user.short(), "event dropped by rate limiter");
                    continue;
                }
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => dispatch(&state, &identity, &handle, event).await,
                    Err(e) => {
                        debug!(user = %user.short(), error = %e, "unparseable client event")
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            // Ping/pong are answered by axum; binary frames are not part
            // of the protocol.
            Ok(_) => {}
            Err(e) => {
                debug!(user = %user.short(), error = %e, "websocket error");
                break;
            }
        }
    }

    // Idempotent: if this session was evicted by a newer one, the guard
    // inside unregister leaves the newer entry alone.
    state.presence.unregister(user, conn_id).await;
    drop(tx);
    let _ = writer.await;

    info!(user = %user.short(), conn = %conn_id, "disconnected");
}

/// Route one client event to the pipeline or forwarder it belongs to.
async fn dispatch(
    state: &AppState,
    identity: &Identity,
    handle: &ConnectionHandle,
    event: ClientEvent,
) {
    let user = identity.user_id;

    match event {
        ClientEvent::SendMessage {
            to,
            body,
            kind,
            media_url,
        } => {
            let ack = match state.relay.send(user, &to, body, kind, media_url).await {
                Ok(message) => ServerEvent::MessageAck {
                    status: AckStatus::Sent,
                    message_id: Some(message.id),
                    error: None,
                },
                Err(e) => {
                    warn!(user = %user.short(), error = %e, "send-message failed");
                    ServerEvent::MessageAck {
                        status: AckStatus::Error,
                        message_id: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            // Ack straight down this connection, not via registry lookup:
            // the ack belongs to this session even mid-eviction.
            handle.push(ack);
        }

        // Typing indicators bypass persistence and the queue: best-effort,
        // at-most-once, gone if the recipient is offline.
        ClientEvent::Typing { to } => {
            if let Ok(receiver) = parley_shared::UserId::parse(&to) {
                state
                    .presence
                    .push(receiver, ServerEvent::Typing { from: user })
                    .await;
            }
        }
        ClientEvent::StopTyping { to } => {
            if let Ok(receiver) = parley_shared::UserId::parse(&to) {
                state
                    .presence
                    .push(receiver, ServerEvent::StopTyping { from: user })
                    .await;
            }
        }

        ClientEvent::CallUser {
            to,
            offer,
            media_kind,
            caller_name,
        } => {
            state
                .signals
                .call_user(user, &to, offer, media_kind, caller_name)
                .await;
        }
        ClientEvent::WebrtcAnswer { to, answer } => {
            state.signals.webrtc_answer(user, &to, answer).await;
        }
        ClientEvent::IceCandidate { to, candidate } => {
            state.signals.ice_candidate(user, &to, candidate).await;
        }
        ClientEvent::CallRejected { to } => {
            state.signals.call_rejected(user, &to).await;
        }
        ClientEvent::EndCall {
            to,
            media_kind,
            duration,
        } => {
            state
                .signals
                .end_call(user, &to, media_kind, duration)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::app_state;
    use parley_shared::{MessageKind, UserId};
    use serde_json::json;

    async fn connect(
        state: &AppState,
        user: UserId,
    ) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let handle = ConnectionHandle::new(Uuid::new_v4(), tx);
        state.presence.register(user, handle.clone()).await;
        (handle, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn identity(user: UserId) -> Identity {
        Identity {
            user_id: user,
            display_name: "tester".into(),
        }
    }

    #[tokio::test]
    async fn test_send_message_acked_to_sender() {
        let state = app_state();
        let (u1, u2) = (UserId::new(), UserId::new());
        let (handle, mut rx) = connect(&state, u1).await;
        drain(&mut rx);

        dispatch(
            &state,
            &identity(u1),
            &handle,
            ClientEvent::SendMessage {
                to: u2.to_string(),
                body: "hi".into(),
                kind: MessageKind::Text,
                media_url: None,
            },
        )
        .await;

        let events = drain(&mut rx);
        match events.as_slice() {
            [ServerEvent::MessageAck {
                status: AckStatus::Sent,
                message_id: Some(_),
                error: None,
            }] => {}
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_recipient_acked_as_error() {
        let state = app_state();
        let u1 = UserId::new();
        let (handle, mut rx) = connect(&state, u1).await;
        drain(&mut rx);

        dispatch(
            &state,
            &identity(u1),
            &handle,
            ClientEvent::SendMessage {
                to: "bogus".into(),
                body: "hi".into(),
                kind: MessageKind::Text,
                media_url: None,
            },
        )
        .await;

        let events = drain(&mut rx);
        match events.as_slice() {
            [ServerEvent::MessageAck {
                status: AckStatus::Error,
                error: Some(message),
                ..
            }] => assert!(message.contains("Invalid recipient")),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_typing_forwarded_without_persistence() {
        let state = app_state();
        let (u1, u2) = (UserId::new(), UserId::new());
        let (sender_handle, _sender_rx) = connect(&state, u1).await;
        let (_handle, mut rx) = connect(&state, u2).await;
        drain(&mut rx);

        dispatch(
            &state,
            &identity(u1),
            &sender_handle,
            ClientEvent::Typing { to: u2.to_string() },
        )
        .await;
        dispatch(
            &state,
            &identity(u1),
            &sender_handle,
            ClientEvent::StopTyping { to: u2.to_string() },
        )
        .await;

        let events = drain(&mut rx);
        assert!(matches!(events[0], ServerEvent::Typing { from } if from == u1));
        assert!(matches!(events[1], ServerEvent::StopTyping { from } if from == u1));

        // Nothing persisted, nothing queued.
        assert_eq!(state.store.lock().await.count_between(u1, u2).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_typing_to_offline_or_bogus_recipient_is_dropped() {
        let state = app_state();
        let u1 = UserId::new();
        let (handle, _rx) = connect(&state, u1).await;

        dispatch(
            &state,
            &identity(u1),
            &handle,
            ClientEvent::Typing {
                to: UserId::new().to_string(),
            },
        )
        .await;
        dispatch(
            &state,
            &identity(u1),
            &handle,
            ClientEvent::Typing { to: "junk".into() },
        )
        .await;
    }

    #[tokio::test]
    async fn test_call_events_routed_to_forwarder() {
        let state = app_state();
        let (caller, callee) = (UserId::new(), UserId::new());
        let (caller_handle, _caller_rx) = connect(&state, caller).await;
        let (_handle, mut rx) = connect(&state, callee).await;
        drain(&mut rx);

        dispatch(
            &state,
            &identity(caller),
            &caller_handle,
            ClientEvent::CallUser {
                to: callee.to_string(),
                offer: json!({"type": "offer"}),
                media_kind: parley_shared::CallMediaKind::Video,
                caller_name: "alice".into(),
            },
        )
        .await;

        let events = drain(&mut rx);
        assert!(matches!(events.as_slice(), [ServerEvent::CallUser { .. }]));
    }
}
