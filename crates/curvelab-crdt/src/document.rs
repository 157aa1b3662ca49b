//! The replicated document wrapper.
//!
//! All mutation happens inside named local transactions: the mutator works
//! through a [`DocumentTxn`], which applies each operation to the local
//! state immediately (local visibility precedes broadcast) and records it
//! in the transaction's change set. The encoded change set is the opaque
//! blob shipped to peers; applying blobs commutes, so replicas converge
//! regardless of delivery order.
//!
//! Wholesale replacement of the curve sequence is impossible through the
//! transaction surface: [`DocumentTxn::splice_curves`] reconciles in place
//! so surviving curves keep their replicated identity.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};
use uuid::Uuid;

use curvelab_common::{
    random_presence_color, Curve, Point, PresenceRecord, TimeProvider,
};
use curvelab_store::CurveCommand;

use crate::clock::{ElementTag, LwwCell};
use crate::history::{reconstruct_curves, SharedHistoryNode, SharedHistoryTree};
use crate::ops::{apply_change_set, ChangeSet, DocOp};
use crate::state::{CurveSlot, DocumentState, HistoryNodeCell, PointSlot};
use crate::{CrdtError, CrdtResult, ReplicaId};

type RemoteChangeCallback = Box<dyn FnMut(Vec<Curve>) + Send>;
type PresenceCallback = Box<dyn FnMut(Vec<PresenceRecord>) + Send>;
type HistoryCallback = Box<dyn FnMut(SharedHistoryTree) + Send>;

/// A replica of the shared document: curves, presence, and the shared
/// history tree.
pub struct ReplicatedDocument {
    replica: ReplicaId,
    state: DocumentState,
    /// Per-replica operation counter feeding element tags.
    sequence: u64,
    /// Remote operations waiting for an element we have not seen yet.
    parked: Vec<DocOp>,
    local_user: PresenceRecord,
    time: Arc<dyn TimeProvider>,
    on_remote_change: Option<RemoteChangeCallback>,
    on_presence_update: Option<PresenceCallback>,
    on_history_change: Option<HistoryCallback>,
}

impl ReplicatedDocument {
    /// Create an empty replica. The user's presence color is drawn
    /// uniformly at random from the presence palette.
    pub fn new(replica_id: &str, user_name: &str, time: Arc<dyn TimeProvider>) -> Self {
        let local_user = PresenceRecord {
            id: replica_id.to_string(),
            name: user_name.to_string(),
            color: random_presence_color(),
            cursor: None,
            active_curve_id: None,
            last_seen: time.unix_millis(),
        };
        Self {
            replica: ReplicaId::new(replica_id),
            state: DocumentState::new(),
            sequence: 0,
            parked: Vec::new(),
            local_user,
            time,
            on_remote_change: None,
            on_presence_update: None,
            on_history_change: None,
        }
    }

    pub fn replica_id(&self) -> &str {
        self.replica.as_str()
    }

    pub fn local_user(&self) -> &PresenceRecord {
        &self.local_user
    }

    /// Invoked with a deep copy of the curves whenever a remote change
    /// altered them.
    pub fn set_on_remote_change(&mut self, callback: RemoteChangeCallback) {
        self.on_remote_change = Some(callback);
    }

    /// Invoked with the full presence list whenever a remote change
    /// altered it.
    pub fn set_on_presence_update(&mut self, callback: PresenceCallback) {
        self.on_presence_update = Some(callback);
    }

    /// Invoked with the shared history tree whenever a remote change
    /// altered it.
    pub fn set_on_history_change(&mut self, callback: HistoryCallback) {
        self.on_history_change = Some(callback);
    }

    /// Run a named transaction. Returns the encoded delta, or `None` when
    /// the mutator produced no effective change.
    pub fn execute_local_command(
        &mut self,
        description: &str,
        mutate: impl FnOnce(&mut DocumentTxn),
    ) -> CrdtResult<Option<Vec<u8>>> {
        let mut txn = DocumentTxn {
            state: &mut self.state,
            replica: self.replica.clone(),
            sequence: &mut self.sequence,
            ops: Vec::new(),
        };
        mutate(&mut txn);
        let ops = txn.ops;
        if ops.is_empty() {
            debug!("transaction {description:?} produced no effective change");
            return Ok(None);
        }
        self.state.clock.increment(&self.replica);
        let changes = ChangeSet {
            sender: self.replica.clone(),
            clock: self.state.clock.clone(),
            lamport: self.state.lamport,
            ops,
        };
        debug!(
            "transaction {description:?} produced {} operation(s)",
            changes.ops.len()
        );
        changes.encode().map(Some)
    }

    /// Apply a peer's change blob and fire the diff-driven callbacks.
    pub fn apply_remote_changes(&mut self, blob: &[u8]) -> CrdtResult<()> {
        let changes = ChangeSet::decode(blob)?;
        let snapshot = self.diff_snapshot();
        let parked = std::mem::take(&mut self.parked);
        self.parked = apply_change_set(&mut self.state, parked, &changes);
        if !self.parked.is_empty() {
            debug!(
                "{} operation(s) from {} parked awaiting earlier changes",
                self.parked.len(),
                changes.sender
            );
        }
        self.fire_changed_callbacks(snapshot);
        Ok(())
    }

    /// Upsert the local user's presence record. Returns the delta blob.
    pub fn update_presence(
        &mut self,
        cursor: Option<Point>,
        active_curve_id: Option<String>,
        name: Option<&str>,
    ) -> CrdtResult<Option<Vec<u8>>> {
        self.local_user.cursor = cursor;
        self.local_user.active_curve_id = active_curve_id;
        if let Some(name) = name {
            self.local_user.name = name.to_string();
        }
        self.local_user.last_seen = self.time.unix_millis();
        let record = self.local_user.clone();
        self.execute_local_command("Update presence", |txn| {
            txn.upsert_user(record);
        })
    }

    /// Serialize the full replica state.
    pub fn save(&self) -> CrdtResult<Vec<u8>> {
        bincode::serialize(&self.state).map_err(|e| CrdtError::Encode(e.to_string()))
    }

    /// Merge a saved state into this replica. With `skip_rebroadcast` the
    /// diff callbacks stay silent.
    pub fn load(&mut self, blob: &[u8], skip_rebroadcast: bool) -> CrdtResult<()> {
        let incoming: DocumentState =
            bincode::deserialize(blob).map_err(|e| CrdtError::Decode(e.to_string()))?;
        let snapshot = self.diff_snapshot();
        self.state.merge(&incoming);
        self.retry_parked();
        if !skip_rebroadcast {
            self.fire_changed_callbacks(snapshot);
        }
        Ok(())
    }

    /// Plain-value snapshot of the live curves, via a full serialization
    /// round trip so no internal references escape.
    pub fn curves(&self) -> Vec<Curve> {
        let visible = self.state.visible_curves();
        serde_json::to_string(&visible)
            .ok()
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or(visible)
    }

    /// Plain-value snapshot of the presence records.
    pub fn users(&self) -> Vec<PresenceRecord> {
        self.state.visible_users()
    }

    /// Plain-value snapshot of the shared history tree.
    pub fn shared_history(&self) -> SharedHistoryTree {
        let nodes = self
            .state
            .history_nodes
            .iter()
            .map(|(id, cell)| {
                (
                    id.clone(),
                    SharedHistoryNode {
                        id: cell.id.clone(),
                        parent_id: cell.parent_id.clone(),
                        child_ids: cell.children.iter().map(|(_, id)| id.clone()).collect(),
                        command: cell
                            .command_json
                            .as_deref()
                            .and_then(|json| serde_json::from_str(json).ok()),
                        user_id: cell.user_id.clone(),
                        timestamp: cell.timestamp,
                        description: cell.description.clone(),
                    },
                )
            })
            .collect();
        SharedHistoryTree {
            nodes,
            root_id: self.state.root_node_id().map(String::from),
            current_node_id: self.state.current_node_id().map(String::from),
        }
    }

    /// Record a locally executed command: mirror its effect onto the
    /// replicated curves and append the matching shared history node, all
    /// in one transaction.
    pub fn record_local_command(
        &mut self,
        command: &CurveCommand,
        description: &str,
    ) -> CrdtResult<Option<Vec<u8>>> {
        let user_id = self.local_user.id.clone();
        let timestamp = self.time.unix_millis();
        let command_json = serde_json::to_string(&command.serialize())
            .map_err(|e| CrdtError::Encode(e.to_string()))?;
        let label = description.to_string();
        self.execute_local_command(description, move |txn| {
            txn.ensure_history_root(&user_id, timestamp);
            apply_command(txn, command);
            txn.append_history_node(Some(command_json), &user_id, timestamp, &label);
        })
    }

    /// Reconcile the replicated curves with a locally computed state, in
    /// place, without touching the shared history.
    pub fn sync_curves(&mut self, curves: &[Curve], description: &str) -> CrdtResult<Option<Vec<u8>>> {
        self.execute_local_command(description, |txn| {
            txn.splice_curves(curves);
        })
    }

    /// Seed the shared history root if this replica has never seen one.
    pub fn ensure_history_root(&mut self) -> CrdtResult<Option<Vec<u8>>> {
        let user_id = self.local_user.id.clone();
        let timestamp = self.time.unix_millis();
        self.execute_local_command("Seed history root", move |txn| {
            txn.ensure_history_root(&user_id, timestamp);
        })
    }

    pub fn can_shared_undo(&self) -> bool {
        self.shared_history()
            .current_node()
            .map(|node| node.parent_id.is_some())
            .unwrap_or(false)
    }

    pub fn can_shared_redo(&self) -> bool {
        self.shared_history()
            .current_node()
            .map(|node| !node.child_ids.is_empty())
            .unwrap_or(false)
    }

    /// Collaborative undo: move the shared current pointer to its parent
    /// and splice the reconstructed curve state into the document. Returns
    /// the delta blob, or `None` when there is nothing to undo.
    pub fn shared_undo(&mut self) -> CrdtResult<Option<Vec<u8>>> {
        let tree = self.shared_history();
        let Some(parent_id) = tree.current_node().and_then(|n| n.parent_id.clone()) else {
            return Ok(None);
        };
        let reconstructed = reconstruct_curves(&tree, &parent_id);
        self.execute_local_command("Shared undo", |txn| {
            txn.set_current_node(&parent_id);
            txn.splice_curves(&reconstructed);
        })
    }

    /// Collaborative redo: follow the first child of the shared current
    /// node. Branch choice is deliberately not exposed in shared mode.
    pub fn shared_redo(&mut self) -> CrdtResult<Option<Vec<u8>>> {
        let tree = self.shared_history();
        let Some(child_id) = tree
            .current_node()
            .and_then(|n| n.child_ids.first().cloned())
        else {
            return Ok(None);
        };
        let reconstructed = reconstruct_curves(&tree, &child_id);
        self.execute_local_command("Shared redo", |txn| {
            txn.set_current_node(&child_id);
            txn.splice_curves(&reconstructed);
        })
    }

    fn retry_parked(&mut self) {
        if self.parked.is_empty() {
            return;
        }
        let parked = std::mem::take(&mut self.parked);
        let noop = ChangeSet {
            sender: self.replica.clone(),
            clock: self.state.clock.clone(),
            lamport: self.state.lamport,
            ops: Vec::new(),
        };
        self.parked = apply_change_set(&mut self.state, parked, &noop);
    }

    fn diff_snapshot(&self) -> DiffSnapshot {
        DiffSnapshot {
            curves: serde_json::to_string(&self.state.visible_curves()).unwrap_or_default(),
            users: serde_json::to_string(&self.state.visible_users()).unwrap_or_default(),
            history: serde_json::to_string(&self.shared_history()).unwrap_or_default(),
        }
    }

    fn fire_changed_callbacks(&mut self, before: DiffSnapshot) {
        let after = self.diff_snapshot();
        if before.curves != after.curves {
            let curves = self.curves();
            if let Some(callback) = &mut self.on_remote_change {
                callback(curves);
            }
        }
        if before.users != after.users {
            let users = self.users();
            if let Some(callback) = &mut self.on_presence_update {
                callback(users);
            }
        }
        if before.history != after.history {
            let history = self.shared_history();
            if let Some(callback) = &mut self.on_history_change {
                callback(history);
            }
        }
    }
}

struct DiffSnapshot {
    curves: String,
    users: String,
    history: String,
}

/// Mutation surface handed to local transactions. Every method validates
/// its target, applies the change to the live state, and records the
/// replicated operation; ineffective calls record nothing.
pub struct DocumentTxn<'a> {
    state: &'a mut DocumentState,
    replica: ReplicaId,
    sequence: &'a mut u64,
    ops: Vec<DocOp>,
}

impl DocumentTxn<'_> {
    fn next_tag(&mut self) -> ElementTag {
        self.state.lamport += 1;
        *self.sequence += 1;
        ElementTag::new(self.state.lamport, self.replica.clone(), *self.sequence)
    }

    fn record(&mut self, op: DocOp) {
        crate::ops::apply_op(self.state, &op);
        self.ops.push(op);
    }

    /// Insert a new empty curve.
    pub fn add_curve(&mut self, curve_id: &str, color: &str) {
        if self.state.visible_curve(curve_id).is_some() {
            warn!("add curve: {curve_id} already present");
            return;
        }
        let tag = self.next_tag();
        self.record(DocOp::InsertCurve {
            curve_id: curve_id.to_string(),
            color: LwwCell::new(color.to_string(), &tag),
            tag,
        });
    }

    /// Tombstone a curve. Returns whether anything was removed.
    pub fn remove_curve(&mut self, curve_id: &str) -> bool {
        let Some(curve_tag) = self.state.visible_curve(curve_id).map(|c| c.tag.clone()) else {
            return false;
        };
        let remove_tag = self.next_tag();
        self.record(DocOp::RemoveCurve {
            curve_tag,
            remove_tag,
        });
        true
    }

    /// Append a point to a curve. Returns whether the curve was found.
    pub fn add_point(&mut self, curve_id: &str, point: Point) -> bool {
        let Some(curve_tag) = self.state.visible_curve(curve_id).map(|c| c.tag.clone()) else {
            return false;
        };
        let tag = self.next_tag();
        self.record(DocOp::InsertPoint {
            curve_tag,
            slot: PointSlot {
                removed: None,
                value: LwwCell::new(point, &tag),
                tag,
            },
        });
        true
    }

    /// Tombstone the point at a visible index.
    pub fn remove_point(&mut self, curve_id: &str, index: usize) -> bool {
        let Some(point_ref) = self.visible_point(curve_id, index) else {
            return false;
        };
        let remove_tag = self.next_tag();
        self.record(DocOp::RemovePoint {
            curve_tag: point_ref.0,
            point_tag: point_ref.1,
            remove_tag,
        });
        true
    }

    /// Overwrite the point at a visible index.
    pub fn move_point(&mut self, curve_id: &str, index: usize, point: Point) -> bool {
        let Some(point_ref) = self.visible_point(curve_id, index) else {
            return false;
        };
        let tag = self.next_tag();
        self.record(DocOp::WritePoint {
            curve_tag: point_ref.0,
            point_tag: point_ref.1,
            value: LwwCell::new(point, &tag),
        });
        true
    }

    /// Reconcile the replicated curves with the given target state,
    /// splicing in place: curves that survive keep their identity, missing
    /// ones are inserted, leftovers are tombstoned.
    pub fn splice_curves(&mut self, target: &[Curve]) {
        let keep: HashSet<&str> = target.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = self
            .state
            .curves
            .iter()
            .filter(|slot| slot.removed.is_none() && !keep.contains(slot.curve_id.as_str()))
            .map(|slot| slot.curve_id.clone())
            .collect();
        for curve_id in stale {
            self.remove_curve(&curve_id);
        }

        for curve in target {
            let existing = self.state.visible_curve(&curve.id).map(|slot| {
                (
                    slot.tag.clone(),
                    slot.color.value.clone(),
                    slot.points
                        .iter()
                        .filter(|p| p.removed.is_none())
                        .map(|p| (p.tag.clone(), p.value.value))
                        .collect::<Vec<_>>(),
                )
            });
            match existing {
                Some((curve_tag, current_color, live_points)) => {
                    if current_color != curve.color {
                        let tag = self.next_tag();
                        self.record(DocOp::WriteCurveColor {
                            curve_tag: curve_tag.clone(),
                            color: LwwCell::new(curve.color.clone(), &tag),
                        });
                    }
                    let current_points: Vec<Point> =
                        live_points.iter().map(|(_, p)| *p).collect();
                    if current_points != curve.points {
                        for (point_tag, _) in live_points {
                            let remove_tag = self.next_tag();
                            self.record(DocOp::RemovePoint {
                                curve_tag: curve_tag.clone(),
                                point_tag,
                                remove_tag,
                            });
                        }
                        for point in &curve.points {
                            let tag = self.next_tag();
                            self.record(DocOp::InsertPoint {
                                curve_tag: curve_tag.clone(),
                                slot: PointSlot {
                                    removed: None,
                                    value: LwwCell::new(*point, &tag),
                                    tag,
                                },
                            });
                        }
                    }
                }
                None => {
                    self.add_curve(&curve.id, &curve.color);
                    for point in &curve.points {
                        self.add_point(&curve.id, *point);
                    }
                }
            }
        }
    }

    /// Upsert a presence record.
    pub fn upsert_user(&mut self, record: PresenceRecord) {
        let tag = self.next_tag();
        self.record(DocOp::UpsertUser {
            user_id: record.id.clone(),
            record: LwwCell::new(record, &tag),
        });
    }

    /// Create the shared history root if none exists yet.
    pub fn ensure_history_root(&mut self, user_id: &str, timestamp: u64) -> Option<String> {
        if self.state.history_root.is_some() {
            return None;
        }
        let id = Uuid::new_v4().to_string();
        let link_tag = self.next_tag();
        self.record(DocOp::InsertHistoryNode {
            node: HistoryNodeCell {
                id: id.clone(),
                parent_id: None,
                link_tag,
                command_json: None,
                user_id: user_id.to_string(),
                timestamp,
                description: "Start".to_string(),
                children: Vec::new(),
            },
        });
        let root_tag = self.next_tag();
        self.record(DocOp::WriteHistoryRoot {
            cell: LwwCell::new(id.clone(), &root_tag),
        });
        let current_tag = self.next_tag();
        self.record(DocOp::WriteHistoryCurrent {
            cell: LwwCell::new(id.clone(), &current_tag),
        });
        Some(id)
    }

    /// Append a node under the shared current pointer and move the pointer
    /// onto it. Returns the new node's id.
    pub fn append_history_node(
        &mut self,
        command_json: Option<String>,
        user_id: &str,
        timestamp: u64,
        description: &str,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let parent_id = self.state.current_node_id().map(String::from);
        let link_tag = self.next_tag();
        self.record(DocOp::InsertHistoryNode {
            node: HistoryNodeCell {
                id: id.clone(),
                parent_id: parent_id.clone(),
                link_tag,
                command_json,
                user_id: user_id.to_string(),
                timestamp,
                description: description.to_string(),
                children: Vec::new(),
            },
        });
        if parent_id.is_none() {
            let root_tag = self.next_tag();
            self.record(DocOp::WriteHistoryRoot {
                cell: LwwCell::new(id.clone(), &root_tag),
            });
        }
        self.set_current_node(&id);
        id
    }

    /// Move the shared current pointer.
    pub fn set_current_node(&mut self, node_id: &str) {
        let tag = self.next_tag();
        self.record(DocOp::WriteHistoryCurrent {
            cell: LwwCell::new(node_id.to_string(), &tag),
        });
    }

    fn visible_point(&self, curve_id: &str, index: usize) -> Option<(ElementTag, ElementTag)> {
        let slot = self.state.visible_curve(curve_id)?;
        let point = slot.points.iter().filter(|p| p.removed.is_none()).nth(index)?;
        Some((slot.tag.clone(), point.tag.clone()))
    }
}

fn apply_command(txn: &mut DocumentTxn, command: &CurveCommand) {
    match command {
        CurveCommand::AddPoint { curve_id, point } => {
            txn.add_point(curve_id, *point);
        }
        CurveCommand::RemovePoint { curve_id, index, .. } => {
            txn.remove_point(curve_id, *index);
        }
        CurveCommand::MovePoint {
            curve_id,
            index,
            new_point,
            ..
        } => {
            txn.move_point(curve_id, *index, *new_point);
        }
        CurveCommand::AddCurve { curve } => {
            txn.add_curve(&curve.id, &curve.color);
        }
        CurveCommand::RemoveCurve { curve, .. } => {
            txn.remove_curve(&curve.id);
        }
        CurveCommand::LoadCurves { new_curves, .. }
        | CurveCommand::RemoteOverwrite { new_curves } => {
            txn.splice_curves(new_curves);
        }
    }
}
