//! Presence registry.
//!
//! In-memory mapping of identity -> live connection handle; the source of
//! truth for "who is reachable now".  An injected instance is passed to
//! every handler; there is no global.
//!
//! Registry mutation is the *only* origin of `users-online` broadcasts.
//! Broadcasts and pushes are fire-and-forget `try_send`s: an event to a
//! slow or full connection is dropped, never retried -- presence is
//! eventually consistent, and a missed roster is corrected by the next
//! change.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use parley_shared::protocol::ServerEvent;
use parley_shared::UserId;

/// One live connection's push side.
#[derive(Clone)]
pub struct ConnectionHandle {
    /// Transport-level handle, unique per connection (not per identity).
    pub conn_id: Uuid,
    outbound: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(conn_id: Uuid, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self { conn_id, outbound }
    }

    /// Fire-and-forget push.  Returns whether the event was accepted.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.outbound.try_send(event).is_ok()
    }
}

#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a connection for an identity and broadcast the updated
    /// roster to every registered connection.
    ///
    /// A second connection for the same identity evicts the first: the old
    /// handle is told `session-replaced` and dropped from the registry.
    pub async fn register(&self, user: UserId, handle: ConnectionHandle) {
        let (evicted, roster, targets) = {
            let mut map = self.inner.write().await;
            let evicted = map.insert(user, handle);
            (evicted, Self::roster(&map), Self::handles(&map))
        };

        if let Some(old) = evicted {
            info!(user = %user.short(), "existing session superseded");
            old.push(ServerEvent::SessionReplaced);
        }

        info!(user = %user.short(), online = roster.len(), "user joined");
        Self::fan_out(&targets, ServerEvent::UsersOnline { users: roster });
    }

    /// Remove a connection and broadcast the updated roster.
    ///
    /// Idempotent, and guarded by `conn_id`: a stale disconnect from an
    /// evicted session never removes the identity's newer connection.
    pub async fn unregister(&self, user: UserId, conn_id: Uuid) -> bool {
        let removed = {
            let mut map = self.inner.write().await;
            match map.get(&user) {
                Some(handle) if handle.conn_id == conn_id => {
                    map.remove(&user);
                    Some((Self::roster(&map), Self::handles(&map)))
                }
                _ => None,
            }
        };

        match removed {
            Some((roster, targets)) => {
                info!(user = %user.short(), online = roster.len(), "user left");
                Self::fan_out(&targets, ServerEvent::UsersOnline { users: roster });
                true
            }
            None => false,
        }
    }

    /// Pure read; never blocks on I/O or a disconnect broadcast.
    pub async fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        self.inner.read().await.get(&user).cloned()
    }

    /// Reverse lookup: transport handle -> identity.
    ///
    /// Defensive fallback for events that carry a transport-level handle
    /// instead of an identity; the verified identity on the connection's
    /// own session is always preferred over this.
    pub async fn resolve(&self, conn_id: Uuid) -> Option<UserId> {
        self.inner
            .read()
            .await
            .iter()
            .find(|(_, handle)| handle.conn_id == conn_id)
            .map(|(user, _)| *user)
    }

    /// The currently online identities, in no particular order.
    pub async fn online(&self) -> Vec<UserId> {
        self.inner.read().await.keys().copied().collect()
    }

    /// Push an event to one identity's connection, if present.
    /// Returns whether the push was accepted.
    pub async fn push(&self, to: UserId, event: ServerEvent) -> bool {
        match self.lookup(to).await {
            Some(handle) => {
                let accepted = handle.push(event);
                if !accepted {
                    debug!(to = %to.short(), "dropping event for slow connection");
                }
                accepted
            }
            None => false,
        }
    }

    fn roster(map: &HashMap<UserId, ConnectionHandle>) -> Vec<UserId> {
        map.keys().copied().collect()
    }

    fn handles(map: &HashMap<UserId, ConnectionHandle>) -> Vec<ConnectionHandle> {
        map.values().cloned().collect()
    }

    fn fan_out(targets: &[ConnectionHandle], event: ServerEvent) {
        for handle in targets {
            if !handle.push(event.clone()) {
                debug!(conn = %handle.conn_id, "dropping broadcast for slow connection");
            }
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
