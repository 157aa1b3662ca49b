//! # Curvelab Session Crate
//!
//! The client side of the session protocol. A [`SessionHandle`] owns a
//! background task that keeps a WebSocket connection to the hub alive:
//! on every (re)connect it issues a `sync-request`, then pumps incoming
//! messages into an event queue and drains an outgoing queue into the
//! socket. Connection loss triggers exponential backoff starting at one
//! second and capped at thirty; changes produced while disconnected stay in
//! the local replica and flow out after the next successful sync.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use curvelab_protocol::{PresencePayload, WireMessage, DEFAULT_SESSION_ID};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connection parameters for a session client.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hub base URL.
    pub hub_url: String,
    pub session_id: String,
    /// This client's opaque id; doubles as its replica and user id.
    pub client_id: String,
}

impl SessionConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            hub_url: "ws://localhost:8080".to_string(),
            session_id: DEFAULT_SESSION_ID.to_string(),
            client_id: client_id.into(),
        }
    }

    /// The full WebSocket URL for this session.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/ws/{}",
            self.hub_url.trim_end_matches('/'),
            self.session_id
        )
    }
}

/// Events surfaced to the engine coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The sync handshake completed; the carried document state must be
    /// loaded before anything else happens.
    Connected {
        session_id: String,
        document_state: Vec<u8>,
        is_first_user: bool,
    },
    /// A peer's change blob.
    Change { sender_id: String, changes: Vec<u8> },
    /// A peer's presence notification.
    Presence {
        sender_id: String,
        presence: PresencePayload,
    },
    /// The connection dropped; reconnection is already scheduled.
    Disconnected,
}

/// Handle to a running session connection.
pub struct SessionHandle {
    client_id: String,
    outgoing: mpsc::UnboundedSender<WireMessage>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionHandle {
    /// Spawn the connection task and return the handle. Must be called
    /// from within a tokio runtime.
    pub fn connect(config: SessionConfig) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client_id = config.client_id.clone();
        tokio::spawn(run_connection(config, outgoing_rx, events_tx));
        Self {
            client_id,
            outgoing: outgoing_tx,
            events: events_rx,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Queue a change blob for broadcast.
    pub fn send_change(&self, changes: Vec<u8>) {
        let _ = self.outgoing.send(WireMessage::Change {
            sender_id: self.client_id.clone(),
            changes,
        });
    }

    /// Queue a presence notification for broadcast.
    pub fn send_presence(&self, presence: PresencePayload) {
        let _ = self.outgoing.send(WireMessage::Presence {
            sender_id: self.client_id.clone(),
            presence,
        });
    }

    /// Non-blocking poll for the next session event.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Await the next session event. `None` means the connection task has
    /// shut down for good.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }
}

/// Translate an incoming message into a session event. Messages echoing
/// our own sender id are dropped.
fn classify(message: WireMessage, own_id: &str) -> Option<SessionEvent> {
    match message {
        WireMessage::SyncResponse {
            session_id,
            document_state,
            is_first_user,
        } => Some(SessionEvent::Connected {
            session_id,
            document_state,
            is_first_user,
        }),
        WireMessage::Change { sender_id, changes } => {
            if sender_id == own_id {
                None
            } else {
                Some(SessionEvent::Change { sender_id, changes })
            }
        }
        WireMessage::Presence {
            sender_id,
            presence,
        } => {
            if sender_id == own_id {
                None
            } else {
                Some(SessionEvent::Presence {
                    sender_id,
                    presence,
                })
            }
        }
        // Clients never receive sync requests.
        WireMessage::SyncRequest { .. } => None,
    }
}

async fn run_connection(
    config: SessionConfig,
    mut outgoing: mpsc::UnboundedReceiver<WireMessage>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let endpoint = config.endpoint();
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match connect_async(endpoint.as_str()).await {
            Ok((stream, _)) => {
                info!("connected to session hub at {endpoint}");
                backoff = INITIAL_BACKOFF;
                let (mut sink, mut source) = stream.split();

                let sync = WireMessage::SyncRequest {
                    sender_id: config.client_id.clone(),
                };
                let handshake = match sync.to_json() {
                    Ok(json) => sink.send(Message::Text(json)).await,
                    Err(e) => {
                        warn!("failed to encode sync request: {e}");
                        return;
                    }
                };
                if let Err(e) = handshake {
                    warn!("failed to send sync request: {e}");
                } else {
                    loop {
                        tokio::select! {
                            incoming = source.next() => match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    match WireMessage::from_json(&text) {
                                        Ok(message) => {
                                            if let Some(event) = classify(message, &config.client_id) {
                                                if events.send(event).is_err() {
                                                    return;
                                                }
                                            }
                                        }
                                        // A bad frame is dropped; the
                                        // connection stays open.
                                        Err(e) => warn!("discarding unparseable message: {e}"),
                                    }
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = sink.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!("session socket error: {e}");
                                    break;
                                }
                            },
                            queued = outgoing.recv() => match queued {
                                Some(message) => {
                                    let json = match message.to_json() {
                                        Ok(json) => json,
                                        Err(e) => {
                                            warn!("failed to encode outgoing message: {e}");
                                            continue;
                                        }
                                    };
                                    if let Err(e) = sink.send(Message::Text(json)).await {
                                        warn!("failed to send message: {e}");
                                        break;
                                    }
                                }
                                // The handle is gone; shut down quietly.
                                None => return,
                            },
                        }
                    }
                }
                if events.send(SessionEvent::Disconnected).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("failed to connect to {endpoint}: {e}");
            }
        }

        debug!("reconnecting in {backoff:?}");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new("client-1");
        assert_eq!(config.hub_url, "ws://localhost:8080");
        assert_eq!(config.session_id, "default");
        assert_eq!(config.endpoint(), "ws://localhost:8080/ws/default");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let mut config = SessionConfig::new("client-1");
        config.hub_url = "ws://hub.example:9000/".to_string();
        config.session_id = "room-7".to_string();
        assert_eq!(config.endpoint(), "ws://hub.example:9000/ws/room-7");
    }

    #[test]
    fn test_classify_drops_own_echo() {
        let change = WireMessage::Change {
            sender_id: "me".to_string(),
            changes: vec![1],
        };
        assert_eq!(classify(change, "me"), None);

        let change = WireMessage::Change {
            sender_id: "peer".to_string(),
            changes: vec![1],
        };
        assert!(matches!(
            classify(change, "me"),
            Some(SessionEvent::Change { .. })
        ));
    }

    #[test]
    fn test_classify_sync_response_connects() {
        let response = WireMessage::SyncResponse {
            session_id: "default".to_string(),
            document_state: vec![9],
            is_first_user: true,
        };
        assert_eq!(
            classify(response, "me"),
            Some(SessionEvent::Connected {
                session_id: "default".to_string(),
                document_state: vec![9],
                is_first_user: true,
            })
        );
    }

    #[test]
    fn test_classify_ignores_sync_requests() {
        let request = WireMessage::SyncRequest {
            sender_id: "peer".to_string(),
        };
        assert_eq!(classify(request, "me"), None);
    }
}
