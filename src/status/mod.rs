use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::gateway::BroadcastHub;
use crate::listener::ListenerState;
use crate::policy::SyncReport;

/// Shared handles the status surface reads from. Each field is a live
/// view owned by the component that produces it.
#[derive(Clone)]
pub struct StatusState {
    pub cluster_name: String,
    pub leadership: Arc<RwLock<HashMap<String, bool>>>,
    pub listener_state: watch::Receiver<ListenerState>,
    pub policy_report: watch::Receiver<Option<SyncReport>>,
    pub hub: Arc<BroadcastHub>,
}

#[derive(Serialize)]
struct StatusResponse {
    cluster_name: String,
    leadership: HashMap<String, bool>,
    listener_state: String,
    last_policy_sync: Option<SyncReport>,
}

/// Serve the status endpoint and the room event WebSocket until shutdown.
pub async fn run_status_server(addr: SocketAddr, state: StatusState, shutdown: CancellationToken) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/status", get(status_handler))
        .route("/rooms/:room/events", get(room_events_handler))
        .layer(cors)
        .with_state(state);

    tracing::info!(addr = %addr, "Starting status server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind status server");
            return;
        }
    };

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    if let Err(e) = serve.await {
        tracing::error!(error = %e, "Status server failed");
    }
}

async fn status_handler(State(state): State<StatusState>) -> impl IntoResponse {
    let leadership = state.leadership.read().await.clone();
    Json(StatusResponse {
        cluster_name: state.cluster_name.clone(),
        leadership,
        listener_state: state.listener_state.borrow().to_string(),
        last_policy_sync: state.policy_report.borrow().clone(),
    })
}

/// Upgrade to a WebSocket subscribed to one room. The connection counts as
/// a live subscriber for the listener's short-circuit check the moment the
/// upgrade completes.
async fn room_events_handler(
    Path(room): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<StatusState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| forward_room(socket, room, state.hub))
}

async fn forward_room(mut socket: WebSocket, room: String, hub: Arc<BroadcastHub>) {
    let mut events = hub.subscribe(&room);
    tracing::debug!(room, "Room subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(room, error = %e, "Dropping unserializable event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Deliveries are full snapshots; a lagged client just
                    // waits for the next one.
                    tracing::debug!(room, skipped, "Room subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    drop(events);
    hub.prune();
    tracing::debug!(room, "Room subscriber disconnected");
}
