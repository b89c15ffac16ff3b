//! HTTP front of the relay
//!
//! `GET /ws` upgrades to the relay protocol, `GET /health` answers `ok`, and
//! an optional static directory serves the web client.

use super::handler::{RelayState, handle_socket};
use super::liveness::LivenessMonitor;
use super::registry::{Registry, run_room_janitor};
use crate::config::RelayConfig;
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{ConnectInfo, State, ws::WebSocketUpgrade},
    response::Response,
    routing::get,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// How long shutdown waits for connections to flush their queues
const SHUTDOWN_GRACE_SECS: u64 = 5;

async fn health_handler() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let limit = state.max_envelope_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| {
            let tracker = state.connections.clone();
            tracker.track_future(handle_socket(socket, state, addr.to_string()))
        })
}

/// Build the axum router
pub fn create_router(state: Arc<RelayState>, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured address and run until `shutdown` is cancelled
pub async fn run_relay(config: RelayConfig, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    serve(listener, config, shutdown).await
}

/// Serve the relay on an already bound listener
///
/// Spawns the liveness monitor and the room janitor, serves until
/// `shutdown` is cancelled, then gives open connections a short grace
/// period to flush queued frames.
pub async fn serve(
    listener: TcpListener,
    config: RelayConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let registry = Arc::new(Registry::new());
    let state = Arc::new(RelayState::new(
        registry.clone(),
        shutdown.clone(),
        config.max_envelope_size,
    ));

    let monitor = LivenessMonitor::new(registry.clone(), config.ping_interval);
    tokio::spawn(monitor.run(shutdown.clone()));
    tokio::spawn(run_room_janitor(
        registry.clone(),
        config.room_max_age,
        config.room_sweep_interval,
        shutdown.clone(),
    ));

    let router = create_router(state.clone(), config.static_dir.as_deref());
    let addr = listener.local_addr()?;
    tracing::info!("Dela relay listening on ws://{}/ws", addr);

    let token = shutdown.clone();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        token.cancelled().await;
        tracing::info!("Relay shutting down gracefully");
    })
    .await?;

    state.connections.close();
    if tokio::time::timeout(
        Duration::from_secs(SHUTDOWN_GRACE_SECS),
        state.connections.wait(),
    )
    .await
    .is_err()
    {
        tracing::warn!("Some connections did not close in time");
    }

    tracing::info!("Relay closed");
    Ok(())
}
