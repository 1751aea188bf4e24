use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_shared::UserId;
use parley_store::{Database, StoredMessage};

use crate::auth::IdentityVerifier;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::rate_limit::EventRateLimiter;
use crate::relay::RelayPipeline;
use crate::session;
use crate::signaling::SignalForwarder;

#[derive(Clone)]
pub struct AppState {
    pub presence: PresenceRegistry,
    pub relay: RelayPipeline,
    pub signals: SignalForwarder,
    pub verifier: Arc<IdentityVerifier>,
    pub rate_limiter: EventRateLimiter,
    pub store: Arc<Mutex<Database>>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(session::ws_handler))
        .route("/messages/:peer", get(message_history))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    instance: String,
    version: &'static str,
    online: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        instance: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online: state.presence.online().await.len(),
    })
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<u32>,
    offset: Option<u32>,
}

/// History fetch for the conversation with one peer.
///
/// This is the fallback delivery path: messages relayed while this user
/// was offline surface here on the next fetch.
async fn message_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(peer): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<StoredMessage>>, ServerError> {
    let identity = authorize(&headers, &state.verifier)?;

    let peer =
        UserId::parse(&peer).map_err(|_| ServerError::InvalidRecipient(peer.clone()))?;

    let limit = params.limit.unwrap_or(50).min(500);
    let offset = params.offset.unwrap_or(0);

    let messages = state
        .store
        .lock()
        .await
        .conversation(identity.user_id, peer, limit, offset)?;

    Ok(Json(messages))
}

/// Verify the Bearer token on an HTTP request.
fn authorize(
    headers: &HeaderMap,
    verifier: &IdentityVerifier,
) -> Result<parley_shared::auth::Identity, ServerError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);
    if token.is_empty() {
        return Err(ServerError::Authentication);
    }

    verifier.verify(token).map_err(|_| ServerError::Authentication)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP/WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parley_queue::DurableQueue;

    /// A fully wired in-memory state for handler and dispatch tests.
    pub(crate) fn app_state() -> AppState {
        let presence = PresenceRegistry::new();
        let store = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let queue = Arc::new(DurableQueue::open_in_memory().unwrap());

        AppState {
            presence: presence.clone(),
            relay: RelayPipeline::new(store.clone(), queue),
            signals: SignalForwarder::new(presence, store.clone()),
            verifier: Arc::new(IdentityVerifier::new([0u8; 32])),
            rate_limiter: EventRateLimiter::default(),
            store,
            config: Arc::new(ServerConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use ed25519_dalek::SigningKey;
    use parley_shared::auth::AuthToken;
    use rand::rngs::OsRng;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[test]
    fn test_authorize_accepts_valid_bearer() {
        let key = SigningKey::generate(&mut OsRng);
        let verifier = IdentityVerifier::new(key.verifying_key().to_bytes());
        let user = UserId::new();
        let token = AuthToken::issue(user, "alice", Utc::now() + Duration::hours(1), &key);

        let identity = authorize(&bearer(&token.encode()), &verifier).unwrap();
        assert_eq!(identity.user_id, user);
    }

    #[test]
    fn test_authorize_rejects_missing_and_bad_tokens() {
        let verifier = IdentityVerifier::new([0u8; 32]);

        assert!(matches!(
            authorize(&HeaderMap::new(), &verifier),
            Err(ServerError::Authentication)
        ));
        assert!(matches!(
            authorize(&bearer("junk"), &verifier),
            Err(ServerError::Authentication)
        ));
    }
}
