//! Per-session rooms and the session registry.
//!
//! A room holds the session's authoritative replicated document and the
//! set of connected clients. The registry creates rooms on first contact
//! and removes them once they have sat empty past the configured grace.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};

use curvelab_common::{SystemTimeProvider, TimeProvider};
use curvelab_crdt::{CrdtResult, ReplicatedDocument};
use curvelab_protocol::{PresenceKind, PresencePayload, WireMessage};

/// One session: authoritative document plus connected clients.
pub struct SessionRoom {
    id: String,
    document: Mutex<ReplicatedDocument>,
    clients: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
    /// When the room last became empty; `None` while clients are present.
    empty_since: Mutex<Option<Instant>>,
}

impl SessionRoom {
    pub fn new(id: &str, time: Arc<dyn TimeProvider>) -> Self {
        let mut document = ReplicatedDocument::new(&format!("hub-{id}"), "hub", time);
        // Seed the shared history root so every client joins the same
        // lineage.
        if let Err(e) = document.ensure_history_root() {
            warn!("failed to seed history root for session {id}: {e}");
        }
        Self {
            id: id.to_string(),
            document: Mutex::new(document),
            clients: Mutex::new(HashMap::new()),
            empty_since: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a client's outbound queue.
    pub async fn add_client(&self, client_id: &str, tx: mpsc::UnboundedSender<String>) {
        self.clients.lock().await.insert(client_id.to_string(), tx);
        *self.empty_since.lock().await = None;
        info!("session {}: client {client_id} joined", self.id);
    }

    /// Drop a client and notify the remaining peers. Returns how many
    /// clients are left.
    pub async fn remove_client(&self, client_id: &str) -> usize {
        let remaining = {
            let mut clients = self.clients.lock().await;
            clients.remove(client_id);
            clients.len()
        };
        if remaining == 0 {
            *self.empty_since.lock().await = Some(Instant::now());
        }
        info!(
            "session {}: client {client_id} left ({remaining} remaining)",
            self.id
        );
        let leave = WireMessage::Presence {
            sender_id: client_id.to_string(),
            presence: PresencePayload {
                kind: PresenceKind::Leave,
                user_id: client_id.to_string(),
                cursor: None,
                active_curve_id: None,
                user: None,
            },
        };
        if let Ok(text) = leave.to_json() {
            self.broadcast(client_id, &text).await;
        }
        remaining
    }

    /// Serialize the authoritative document for a sync response.
    pub async fn save_document(&self) -> CrdtResult<Vec<u8>> {
        self.document.lock().await.save()
    }

    /// Fold a client's change blob into the authoritative document so
    /// future joiners see it.
    pub async fn apply_change(&self, blob: &[u8]) -> CrdtResult<()> {
        self.document.lock().await.apply_remote_changes(blob)
    }

    /// Relay a raw message to every client except the sender.
    pub async fn broadcast(&self, from: &str, text: &str) {
        let clients = self.clients.lock().await;
        for (client_id, tx) in clients.iter() {
            if client_id == from {
                continue;
            }
            if tx.send(text.to_string()).is_err() {
                debug!(
                    "session {}: client {client_id} queue closed mid-broadcast",
                    self.id
                );
            }
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Whether the room has been empty for longer than `idle`.
    pub async fn expired(&self, idle: Duration) -> bool {
        if !self.clients.lock().await.is_empty() {
            return false;
        }
        self.empty_since
            .lock()
            .await
            .map(|since| since.elapsed() >= idle)
            .unwrap_or(false)
    }
}

/// All live sessions, keyed by session id.
pub struct SessionRegistry {
    rooms: DashMap<String, Arc<SessionRoom>>,
    time: Arc<dyn TimeProvider>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_time(Arc::new(SystemTimeProvider))
    }

    pub fn with_time(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            rooms: DashMap::new(),
            time,
        }
    }

    /// Fetch a session, creating it on first contact. The boolean is true
    /// when this call created the session, which makes the requesting
    /// client the first user.
    pub fn get_or_create(&self, session_id: &str) -> (Arc<SessionRoom>, bool) {
        let mut created = false;
        let room = self
            .rooms
            .entry(session_id.to_string())
            .or_insert_with(|| {
                created = true;
                info!("creating session {session_id}");
                Arc::new(SessionRoom::new(session_id, Arc::clone(&self.time)))
            })
            .clone();
        (room, created)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionRoom>> {
        self.rooms.get(session_id).map(|room| Arc::clone(room.value()))
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Remove the session if it is still empty. Used for the fast-path
    /// delete after the last client leaves.
    pub async fn remove_if_empty(&self, session_id: &str) {
        let Some(room) = self.get(session_id) else {
            return;
        };
        if room.client_count().await == 0 {
            self.rooms.remove(session_id);
            info!("removed empty session {session_id}");
        }
    }

    /// Reaper pass: drop sessions that have been empty past `idle`.
    pub async fn remove_expired(&self, idle: Duration) {
        let ids: Vec<String> = self.rooms.iter().map(|r| r.key().clone()).collect();
        for id in ids {
            let Some(room) = self.get(&id) else { continue };
            if room.expired(idle).await {
                self.rooms.remove(&id);
                info!("reaped idle session {id}");
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
