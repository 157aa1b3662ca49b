//! WebSocket server: upgrade handling, per-client pump, and the idle
//! session reaper.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use curvelab_protocol::WireMessage;

use crate::session::{SessionRegistry, SessionRoom};
use crate::{HubConfig, HubError};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub config: HubConfig,
}

/// Build the hub router; split out so tests can serve it on an ephemeral
/// port.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{session_id}", any(ws_handler))
        .with_state(state)
}

/// Run the hub until the process is stopped.
pub async fn run(config: HubConfig) -> Result<(), HubError> {
    let state = AppState {
        registry: Arc::new(SessionRegistry::new()),
        config: config.clone(),
    };
    tokio::spawn(reaper(Arc::clone(&state.registry), config.clone()));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("session hub listening on {}", config.listen_addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn ws_handler(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_task(state, session_id, socket))
}

/// Scan for long-idle sessions on a slow cadence.
async fn reaper(registry: Arc<SessionRegistry>, config: HubConfig) {
    let scan = Duration::from_secs(config.reap_scan_interval_secs.max(1));
    let idle = Duration::from_secs(config.reap_idle_secs);
    loop {
        tokio::time::sleep(scan).await;
        registry.remove_expired(idle).await;
    }
}

async fn client_task(state: AppState, session_id: String, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut client_id: Option<String> = None;
    let mut room: Option<Arc<SessionRoom>> = None;

    loop {
        tokio::select! {
            queued = rx.recv() => match queued {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match WireMessage::from_json(&text) {
                        Ok(message) => {
                            let keep_open = handle_message(
                                &state,
                                &session_id,
                                &tx,
                                &mut client_id,
                                &mut room,
                                message,
                                &text,
                            )
                            .await;
                            if !keep_open {
                                break;
                            }
                        }
                        // One bad frame costs only itself.
                        Err(e) => warn!("session {session_id}: discarding unparseable frame: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("session {session_id}: socket error: {e}");
                    break;
                }
            },
        }
    }

    if let (Some(room), Some(id)) = (room, client_id) {
        let remaining = room.remove_client(&id).await;
        if remaining == 0 {
            schedule_grace_removal(&state, &session_id);
        }
    }
}

/// Returns false when the connection should be closed.
async fn handle_message(
    state: &AppState,
    session_id: &str,
    tx: &mpsc::UnboundedSender<String>,
    client_id: &mut Option<String>,
    room: &mut Option<Arc<SessionRoom>>,
    message: WireMessage,
    raw: &str,
) -> bool {
    match message {
        WireMessage::SyncRequest { sender_id } => {
            let (joined, created) = state.registry.get_or_create(session_id);
            joined.add_client(&sender_id, tx.clone()).await;
            let document_state = match joined.save_document().await {
                Ok(blob) => blob,
                Err(e) => {
                    // Session setup failed; close and let the client's
                    // backoff retry.
                    warn!("session {session_id}: failed to snapshot document: {e}");
                    joined.remove_client(&sender_id).await;
                    return false;
                }
            };
            let response = WireMessage::SyncResponse {
                session_id: session_id.to_string(),
                document_state,
                is_first_user: created,
            };
            match response.to_json() {
                Ok(json) => {
                    let _ = tx.send(json);
                }
                Err(e) => warn!("session {session_id}: failed to encode sync response: {e}"),
            }
            *client_id = Some(sender_id);
            *room = Some(joined);
        }
        WireMessage::Change { sender_id, changes } => {
            let Some(room) = room else {
                debug!("session {session_id}: change before sync from {sender_id}");
                return true;
            };
            // Keep the authoritative replica current for future joiners; a
            // blob that fails to merge is dropped, not fatal.
            if let Err(e) = room.apply_change(&changes).await {
                warn!("session {session_id}: dropping bad change from {sender_id}: {e}");
                return true;
            }
            room.broadcast(&sender_id, raw).await;
        }
        WireMessage::Presence { sender_id, .. } => {
            let Some(room) = room else {
                return true;
            };
            // Presence is relayed without interpretation.
            room.broadcast(&sender_id, raw).await;
        }
        WireMessage::SyncResponse { .. } => {
            debug!("session {session_id}: ignoring client-sent sync response");
        }
    }
    true
}

/// The fast path: once a session sits empty for the grace period, remove
/// it without waiting for the reaper.
fn schedule_grace_removal(state: &AppState, session_id: &str) {
    let registry = Arc::clone(&state.registry);
    let grace = Duration::from_secs(state.config.idle_grace_secs);
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        registry.remove_if_empty(&session_id).await;
    });
}
