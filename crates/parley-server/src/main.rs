//! # parley-server
//!
//! Relay server for the Parley chat/call product.
//!
//! This binary provides:
//! - **Presence registry** mapping verified identities to live WebSocket
//!   connections, with roster broadcasts on every change
//! - **Message relay pipeline** that persists, enqueues, and pushes chat
//!   messages, with a durable at-least-once queue between submission and
//!   delivery
//! - **Call signaling forwarding** (offer/answer/candidates/hang-up) for
//!   peer-to-peer audio/video setup -- the media itself never touches
//!   this server
//! - **HTTP API** (axum) for health checks and message-history fetches

mod api;
mod auth;
mod config;
mod error;
mod presence;
mod rate_limit;
mod relay;
mod session;
mod signaling;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_queue::DurableQueue;
use parley_store::Database;

use crate::api::AppState;
use crate::auth::IdentityVerifier;
use crate::config::ServerConfig;
use crate::presence::PresenceRegistry;
use crate::rate_limit::EventRateLimiter;
use crate::relay::RelayPipeline;
use crate::signaling::SignalForwarder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley relay server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Message store (creates the file and parent directory if missing).
    let store = Arc::new(Mutex::new(Database::open_at(&config.db_path)?));

    // Durable relay queue.  Recover first: envelopes claimed by a consumer
    // that died before acking go back on the queue.
    let queue = Arc::new(DurableQueue::open_at(&config.queue_path)?);
    let requeued = queue.recover().await?;
    if requeued > 0 {
        info!(requeued, "recovered undelivered envelopes from previous run");
    }

    // Identity verification against the auth service's public key.
    let verifier = Arc::new(IdentityVerifier::new(config.auth_service_pubkey));

    // Presence registry, injected into every handler.
    let presence = PresenceRegistry::new();

    let rate_limiter = EventRateLimiter::default();

    let app_state = AppState {
        presence: presence.clone(),
        relay: RelayPipeline::new(store.clone(), queue.clone()),
        signals: SignalForwarder::new(presence.clone(), store.clone()),
        verifier,
        rate_limiter: rate_limiter.clone(),
        store,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // The relay consumer: dequeue, push to the recipient's live
    // connection, ack.
    tokio::spawn(relay::run_consumer(queue.clone(), presence));

    // Periodically return queue claims abandoned by a hung consumer.
    let reclaim_after = Duration::from_secs(config.queue_reclaim_secs);
    let reclaim_queue = queue.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(reclaim_after);
        loop {
            interval.tick().await;
            if let Err(e) = reclaim_queue.reclaim_expired(reclaim_after).await {
                tracing::warn!(error = %e, "queue reclaim failed");
            }
        }
    });

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min).
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the server or a shutdown
    // signal arrives, we exit cleanly.
    let http_addr = config.http_addr;
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
