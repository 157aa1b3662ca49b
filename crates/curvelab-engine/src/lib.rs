//! # Curvelab Engine Crate
//!
//! The state coordinator: the single owner of the curve store, the local
//! history tree, and the replicated document. It ingests abstract point
//! actions from an input source, decides per operation whether the local or
//! the shared history path applies, keeps the active selection in sync,
//! pushes presence, and triggers re-renders.
//!
//! The coordinator is single-threaded and cooperative; transport callbacks
//! and timers feed it through [`EngineCoordinator::poll_session`] and the
//! event handlers, never concurrently.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use curvelab_common::{CommonResult, Curve, Point, PresenceRecord, TimeProvider};
use curvelab_crdt::{ReplicatedDocument, SharedHistoryTree};
use curvelab_history::{BranchInfo, HistoryTree, IntersectionInfo};
use curvelab_protocol::{PresenceKind, PresencePayload, DEFAULT_SESSION_ID};
use curvelab_session::{SessionConfig, SessionEvent, SessionHandle};
use curvelab_store::{CurveCommand, CurveStore};

/// Presence records older than this are omitted from render frames.
const PRESENCE_TTL_MILLIS: u64 = 30_000;

/// An abstract pointer event from the input source.
#[derive(Debug, Clone, PartialEq)]
pub struct PointAction {
    pub kind: PointActionKind,
    pub point: Point,
    /// Required for `Remove` and `Move`.
    pub index: Option<usize>,
    /// Required for `Move`.
    pub old_point: Option<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointActionKind {
    Add,
    Remove,
    Move,
}

/// Receives the active curve's points whenever history changes them out
/// from under the input device.
pub trait InputSource: Send {
    fn set_points(&mut self, points: Vec<Point>);
}

/// Consumes immutable snapshots; no mutation path back into the engine.
pub trait Renderer: Send {
    fn render(&mut self, frame: &RenderFrame);
}

/// Snapshot handed to the renderer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderFrame {
    pub curves: Vec<Curve>,
    pub active_curve_id: Option<String>,
    pub users: Vec<PresenceRecord>,
    pub animated_points: Vec<Point>,
    pub visualization_mode: String,
    pub animation_progress: f64,
    pub connected: bool,
}

/// Engine configuration: hub endpoint plus the collaboration toggle.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub hub_url: String,
    pub session_id: String,
    pub user_name: String,
    pub collaboration_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://localhost:8080".to_string(),
            session_id: DEFAULT_SESSION_ID.to_string(),
            user_name: "anonymous".to_string(),
            collaboration_enabled: false,
        }
    }
}

/// Notifications queued by the replicated document's diff callbacks,
/// drained by the coordinator on its own schedule.
enum DocumentNotice {
    Curves(Vec<Curve>),
    Users(Vec<PresenceRecord>),
    History(SharedHistoryTree),
}

/// The glue between input, histories, replication, and rendering.
pub struct EngineCoordinator {
    config: EngineConfig,
    client_id: String,
    store: CurveStore,
    history: HistoryTree,
    document: ReplicatedDocument,
    session: Option<SessionHandle>,
    connected: bool,
    is_applying_remote_change: bool,
    /// Commands captured by the history tree's collaboration hook.
    recorded: Arc<Mutex<VecDeque<(CurveCommand, String)>>>,
    notices: Arc<Mutex<VecDeque<DocumentNotice>>>,
    /// Change blobs awaiting a live connection.
    outbox: VecDeque<Vec<u8>>,
    peers: BTreeMap<String, PresenceRecord>,
    last_cursor: Option<Point>,
    visualization_mode: String,
    input: Option<Box<dyn InputSource>>,
    renderer: Option<Box<dyn Renderer>>,
    time: Arc<dyn TimeProvider>,
}

impl EngineCoordinator {
    pub fn new(config: EngineConfig, time: Arc<dyn TimeProvider>) -> Self {
        let client_id = format!("user-{}", hex::encode(fastrand::u64(..).to_be_bytes()));
        let mut history = HistoryTree::new(Arc::clone(&time));
        let recorded: Arc<Mutex<VecDeque<(CurveCommand, String)>>> =
            Arc::new(Mutex::new(VecDeque::new()));
        let hook_sink = Arc::clone(&recorded);
        history.set_collaboration_hook(Box::new(move |command, description| {
            if let Ok(mut queue) = hook_sink.lock() {
                queue.push_back((command.clone(), description.to_string()));
            }
        }));

        let mut document = ReplicatedDocument::new(&client_id, &config.user_name, Arc::clone(&time));
        let notices: Arc<Mutex<VecDeque<DocumentNotice>>> = Arc::new(Mutex::new(VecDeque::new()));
        let curves_sink = Arc::clone(&notices);
        document.set_on_remote_change(Box::new(move |curves| {
            if let Ok(mut queue) = curves_sink.lock() {
                queue.push_back(DocumentNotice::Curves(curves));
            }
        }));
        let users_sink = Arc::clone(&notices);
        document.set_on_presence_update(Box::new(move |users| {
            if let Ok(mut queue) = users_sink.lock() {
                queue.push_back(DocumentNotice::Users(users));
            }
        }));
        let history_sink = Arc::clone(&notices);
        document.set_on_history_change(Box::new(move |tree| {
            if let Ok(mut queue) = history_sink.lock() {
                queue.push_back(DocumentNotice::History(tree));
            }
        }));

        Self {
            config,
            client_id,
            store: CurveStore::new(),
            history,
            document,
            session: None,
            connected: false,
            is_applying_remote_change: false,
            recorded,
            notices,
            outbox: VecDeque::new(),
            peers: BTreeMap::new(),
            last_cursor: None,
            visualization_mode: "bezier".to_string(),
            input: None,
            renderer: None,
            time,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn attach_input(&mut self, input: Box<dyn InputSource>) {
        self.input = Some(input);
    }

    pub fn attach_renderer(&mut self, renderer: Box<dyn Renderer>) {
        self.renderer = Some(renderer);
    }

    pub fn store(&self) -> &CurveStore {
        &self.store
    }

    pub fn document(&self) -> &ReplicatedDocument {
        &self.document
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn collaboration_enabled(&self) -> bool {
        self.config.collaboration_enabled
    }

    pub fn set_collaboration_enabled(&mut self, enabled: bool) {
        self.config.collaboration_enabled = enabled;
    }

    fn collaboration_active(&self) -> bool {
        self.config.collaboration_enabled && self.connected
    }

    /// Open the session connection. Requires a running tokio runtime; the
    /// handshake completes asynchronously through [`Self::poll_session`].
    pub fn connect(&mut self) {
        if !self.config.collaboration_enabled {
            return;
        }
        let mut session_config = SessionConfig::new(self.client_id.clone());
        session_config.hub_url = self.config.hub_url.clone();
        session_config.session_id = self.config.session_id.clone();
        info!("connecting to {}", session_config.endpoint());
        self.session = Some(SessionHandle::connect(session_config));
    }

    /// Drain any queued session events.
    pub fn poll_session(&mut self) {
        loop {
            let event = match &mut self.session {
                Some(session) => session.try_recv(),
                None => return,
            };
            match event {
                Some(event) => self.handle_session_event(event),
                None => return,
            }
        }
    }

    /// Ingest one pointer action: build the matching command, run it
    /// through the local tree, then propagate.
    pub fn handle_point_action(&mut self, action: PointAction) {
        let Some(active_id) = self.store.active_curve_id().map(String::from) else {
            return;
        };
        self.last_cursor = Some(action.point);
        let command = match action.kind {
            PointActionKind::Add => CurveCommand::AddPoint {
                curve_id: active_id,
                point: action.point,
            },
            PointActionKind::Remove => {
                let Some(index) = action.index else {
                    warn!("remove action without an index");
                    return;
                };
                CurveCommand::RemovePoint {
                    curve_id: active_id,
                    index,
                    point: action.point,
                }
            }
            PointActionKind::Move => {
                let (Some(index), Some(old_point)) = (action.index, action.old_point) else {
                    warn!("move action without index or previous point");
                    return;
                };
                CurveCommand::MovePoint {
                    curve_id: active_id,
                    index,
                    old_point,
                    new_point: action.point,
                }
            }
        };

        let affected = self.history.execute_command(command, &mut self.store);
        self.store.reconcile_active(affected.as_deref());
        self.push_active_points();
        self.pump_collaboration();
        self.render();
    }

    /// Undo one step, through the shared history when a session is live.
    pub fn undo(&mut self) -> bool {
        if self.collaboration_active() {
            match self.document.shared_undo() {
                Ok(Some(blob)) => {
                    self.send_or_queue(blob);
                    self.adopt_document_curves();
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    warn!("shared undo failed: {e}");
                    false
                }
            }
        } else {
            if !self.history.can_undo() {
                return false;
            }
            let affected = self.history.undo(&mut self.store);
            self.after_local_history_move(affected, "Undo");
            true
        }
    }

    /// Redo one step, through the shared history when a session is live.
    pub fn redo(&mut self) -> bool {
        if self.collaboration_active() {
            match self.document.shared_redo() {
                Ok(Some(blob)) => {
                    self.send_or_queue(blob);
                    self.adopt_document_curves();
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    warn!("shared redo failed: {e}");
                    false
                }
            }
        } else {
            if !self.history.can_redo() {
                return false;
            }
            let affected = self.history.redo(&mut self.store);
            self.after_local_history_move(affected, "Redo");
            true
        }
    }

    pub fn can_undo(&self) -> bool {
        if self.collaboration_active() {
            self.document.can_shared_undo()
        } else {
            self.history.can_undo()
        }
    }

    pub fn can_redo(&self) -> bool {
        if self.collaboration_active() {
            self.document.can_shared_redo()
        } else {
            self.history.can_redo()
        }
    }

    // --- Curve-level operations ---

    /// Add a fresh empty curve as an undoable step. Returns its id.
    pub fn add_curve(&mut self) -> String {
        let curve = self.store.allocate_curve();
        let id = curve.id.clone();
        let affected = self
            .history
            .execute_command(CurveCommand::AddCurve { curve }, &mut self.store);
        self.store.reconcile_active(affected.as_deref());
        self.push_active_points();
        self.pump_collaboration();
        self.render();
        id
    }

    /// Remove a curve as an undoable step. Removing the last curve is
    /// followed by a fresh empty one so the canvas never goes blank.
    pub fn remove_curve(&mut self, id: &str) {
        let Some(index) = self.store.curves().iter().position(|c| c.id == id) else {
            return;
        };
        let curve = self.store.curves()[index].clone();
        let affected = self
            .history
            .execute_command(CurveCommand::RemoveCurve { curve, index }, &mut self.store);
        if self.store.curves().is_empty() {
            let replacement = self.store.allocate_curve();
            self.history
                .execute_command(CurveCommand::AddCurve { curve: replacement }, &mut self.store);
        }
        self.store.reconcile_active(affected.as_deref());
        self.push_active_points();
        self.pump_collaboration();
        self.render();
    }

    /// Change the active selection. Unknown ids are ignored.
    pub fn set_active_curve(&mut self, id: &str) {
        self.store.set_active(id);
        self.push_active_points();
        if self.config.collaboration_enabled {
            self.announce_presence();
        }
        self.render();
    }

    /// Hit-test all curves around `position`.
    pub fn find_curve_at(&self, position: Point, threshold: f64) -> Option<&str> {
        self.store.find_curve_at_position(position, threshold)
    }

    // --- Branch navigation (local history only) ---

    pub fn branches(&self) -> Vec<BranchInfo> {
        self.history.get_branches()
    }

    pub fn switch_to_branch(&mut self, node: usize) {
        let affected = self.history.switch_to_branch(node, &mut self.store);
        self.after_local_history_move(affected, "Switch branch");
    }

    pub fn is_at_intersection(&self) -> bool {
        self.history.is_at_intersection()
    }

    pub fn intersection_info(&self) -> Option<IntersectionInfo> {
        self.history.get_intersection_info()
    }

    pub fn switch_to_next_branch(&mut self) {
        self.history.switch_to_next_branch();
    }

    pub fn switch_to_previous_branch(&mut self) {
        self.history.switch_to_previous_branch();
    }

    pub fn jump_to_next_intersection_or_end(&mut self) {
        let affected = self.history.jump_to_next_intersection_or_end(&mut self.store);
        self.after_local_history_move(affected, "Jump forward");
    }

    pub fn jump_to_previous_intersection_or_start(&mut self) {
        let affected = self
            .history
            .jump_to_previous_intersection_or_start(&mut self.store);
        self.after_local_history_move(affected, "Jump backward");
    }

    pub fn clear_history(&mut self) {
        self.history.clear(&mut self.store);
        self.after_local_history_move(None, "Clear history");
    }

    // --- Persistence ---

    pub fn save_document_json(&self) -> CommonResult<String> {
        self.store.to_json()
    }

    /// Load a persisted document as an undoable `LoadCurves` step.
    pub fn load_document_json(&mut self, json: &str) -> CommonResult<()> {
        let document = curvelab_common::parse_document(json, self.time.as_ref())?;
        let command = CurveCommand::LoadCurves {
            new_curves: document.curves,
            old_curves: self.store.snapshot(),
            old_active_curve_id: self.store.active_curve_id().map(String::from),
        };
        let affected = self.history.execute_command(command, &mut self.store);
        self.store.reconcile_active(affected.as_deref());
        self.push_active_points();
        self.pump_collaboration();
        self.render();
        Ok(())
    }

    // --- Session events ---

    /// Handle one transport event. Exposed for tests and embedders that
    /// drive the transport themselves.
    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected {
                session_id,
                document_state,
                is_first_user,
            } => {
                info!("synced into session {session_id} (first user: {is_first_user})");
                self.is_applying_remote_change = true;
                if let Err(e) = self.document.load(&document_state, false) {
                    warn!("failed to load session document: {e}");
                    self.is_applying_remote_change = false;
                    return;
                }
                self.drain_notices();
                self.is_applying_remote_change = false;
                self.connected = true;

                if is_first_user {
                    self.seed_session();
                }
                self.flush_outbox();
                self.announce_presence();
                self.render();
            }
            SessionEvent::Change { sender_id, changes } => {
                self.is_applying_remote_change = true;
                match self.document.apply_remote_changes(&changes) {
                    Ok(()) => self.drain_notices(),
                    // A malformed blob is dropped; the connection stays up.
                    Err(e) => warn!("discarding bad change from {sender_id}: {e}"),
                }
                self.is_applying_remote_change = false;
                self.render();
            }
            SessionEvent::Presence {
                sender_id,
                presence,
            } => {
                self.apply_presence(sender_id, presence);
                self.render();
            }
            SessionEvent::Disconnected => {
                info!("session disconnected; reconnect pending");
                self.connected = false;
                self.render();
            }
        }
    }

    /// Everything the renderer needs right now.
    pub fn frame(&self) -> RenderFrame {
        RenderFrame {
            curves: self.store.snapshot(),
            active_curve_id: self.store.active_curve_id().map(String::from),
            users: self.presence_snapshot(),
            animated_points: Vec::new(),
            visualization_mode: self.visualization_mode.clone(),
            animation_progress: 0.0,
            connected: self.connected,
        }
    }

    /// Change blobs waiting for a transport; drained by tests and by
    /// embedders shuttling blobs themselves.
    pub fn drain_outgoing(&mut self) -> Vec<Vec<u8>> {
        self.outbox.drain(..).collect()
    }

    // --- Internals ---

    fn seed_session(&mut self) {
        let command = CurveCommand::LoadCurves {
            new_curves: self.store.snapshot(),
            old_curves: Vec::new(),
            old_active_curve_id: None,
        };
        let description = format!("Load {} curves", self.store.curves().len());
        match self.document.record_local_command(&command, &description) {
            Ok(Some(blob)) => self.send_or_queue(blob),
            Ok(None) => {}
            Err(e) => warn!("failed to seed session: {e}"),
        }
    }

    /// Move commands captured by the history hook into the replicated
    /// document and broadcast the resulting blobs. Hook firings observed
    /// while a remote change is being applied are echoes and are dropped.
    fn pump_collaboration(&mut self) {
        let drained: Vec<(CurveCommand, String)> = match self.recorded.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => return,
        };
        if !self.config.collaboration_enabled || self.is_applying_remote_change {
            return;
        }
        for (command, description) in drained {
            match self.document.record_local_command(&command, &description) {
                Ok(Some(blob)) => self.send_or_queue(blob),
                Ok(None) => debug!("command {description:?} had no replicated effect"),
                Err(e) => warn!("failed to replicate {description:?}: {e}"),
            }
        }
        self.announce_presence();
    }

    fn announce_presence(&mut self) {
        if !self.config.collaboration_enabled {
            return;
        }
        let active = self.store.active_curve_id().map(String::from);
        match self
            .document
            .update_presence(self.last_cursor, active.clone(), None)
        {
            Ok(Some(blob)) => self.send_or_queue(blob),
            Ok(None) => {}
            Err(e) => warn!("failed to update presence: {e}"),
        }
        if let Some(session) = &self.session {
            session.send_presence(PresencePayload {
                kind: PresenceKind::Update,
                user_id: self.client_id.clone(),
                cursor: self.last_cursor,
                active_curve_id: active,
                user: Some(self.document.local_user().clone()),
            });
        }
    }

    fn after_local_history_move(&mut self, affected: Option<String>, description: &str) {
        self.store.reconcile_active(affected.as_deref());
        self.push_active_points();
        // Local history motion never appends shared nodes, but the
        // replicated curves must still follow so peers converge.
        if self.config.collaboration_enabled {
            let snapshot = self.store.snapshot();
            match self.document.sync_curves(&snapshot, description) {
                Ok(Some(blob)) => self.send_or_queue(blob),
                Ok(None) => {}
                Err(e) => warn!("failed to sync curves after {description:?}: {e}"),
            }
        }
        // Drop any hook echoes from replayed commands.
        if let Ok(mut queue) = self.recorded.lock() {
            queue.clear();
        }
        self.render();
    }

    /// Pull the document's merged curve state into the local store as a
    /// remote overwrite (no local history node).
    fn adopt_document_curves(&mut self) {
        let curves = self.document.curves();
        self.ingest_remote_curves(curves);
    }

    fn ingest_remote_curves(&mut self, curves: Vec<Curve>) {
        self.is_applying_remote_change = true;
        let previous_active = self.store.active_curve_id().map(String::from);
        let command = CurveCommand::RemoteOverwrite { new_curves: curves };
        self.history.execute_remote_command(&command, &mut self.store);
        self.store.reconcile_active(previous_active.as_deref());
        self.push_active_points();
        self.is_applying_remote_change = false;
        self.render();
    }

    fn drain_notices(&mut self) {
        let drained: Vec<DocumentNotice> = match self.notices.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => return,
        };
        for notice in drained {
            match notice {
                DocumentNotice::Curves(curves) => self.ingest_remote_curves(curves),
                DocumentNotice::Users(users) => {
                    for user in users {
                        if user.id != self.client_id {
                            self.peers.insert(user.id.clone(), user);
                        }
                    }
                }
                DocumentNotice::History(tree) => {
                    debug!(
                        "shared history now has {} node(s)",
                        tree.nodes.len()
                    );
                }
            }
        }
    }

    fn apply_presence(&mut self, sender_id: String, presence: PresencePayload) {
        match presence.kind {
            PresenceKind::Update => {
                if let Some(user) = presence.user {
                    self.peers.insert(user.id.clone(), user);
                } else if let Some(existing) = self.peers.get_mut(&presence.user_id) {
                    existing.cursor = presence.cursor;
                    existing.active_curve_id = presence.active_curve_id;
                    existing.last_seen = self.time.unix_millis();
                }
            }
            PresenceKind::Leave => {
                self.peers.remove(&presence.user_id);
                debug!("peer {sender_id} left");
            }
        }
    }

    fn presence_snapshot(&self) -> Vec<PresenceRecord> {
        let now = self.time.unix_millis();
        let mut users: BTreeMap<String, PresenceRecord> = self
            .document
            .users()
            .into_iter()
            .filter(|user| user.id != self.client_id)
            .map(|user| (user.id.clone(), user))
            .collect();
        for (id, peer) in &self.peers {
            users.insert(id.clone(), peer.clone());
        }
        users
            .into_values()
            .filter(|user| now.saturating_sub(user.last_seen) <= PRESENCE_TTL_MILLIS)
            .collect()
    }

    fn send_or_queue(&mut self, blob: Vec<u8>) {
        match (&self.session, self.connected) {
            (Some(session), true) => session.send_change(blob),
            _ => self.outbox.push_back(blob),
        }
    }

    fn flush_outbox(&mut self) {
        if let (Some(session), true) = (&self.session, self.connected) {
            while let Some(blob) = self.outbox.pop_front() {
                session.send_change(blob);
            }
        }
    }

    fn push_active_points(&mut self) {
        if let Some(input) = &mut self.input {
            input.set_points(self.store.active_points());
        }
    }

    fn render(&mut self) {
        let frame = self.frame();
        if let Some(renderer) = &mut self.renderer {
            renderer.render(&frame);
        }
    }
}
