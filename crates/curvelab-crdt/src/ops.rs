//! Replicated operations and change sets.
//!
//! A change blob is a bincode-encoded [`ChangeSet`]: the sender, its vector
//! clock after the transaction, and the operations the transaction emitted.
//! Every operation carries the tag or LWW metadata it was created with, so
//! applying a set twice, or applying two sets in either order, produces the
//! same state. Operations that reference an element the local replica has
//! not seen yet are parked and retried after later applications.

use curvelab_common::{Point, PresenceRecord};
use serde::{Deserialize, Serialize};

use crate::clock::{ElementTag, LwwCell, VectorClock};
use crate::state::{merge_optional_cell, merge_removal, DocumentState, HistoryNodeCell, PointSlot};
use crate::{CrdtError, CrdtResult, ReplicaId};

/// One replicated operation with its merge metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum DocOp {
    InsertCurve {
        tag: ElementTag,
        curve_id: String,
        color: LwwCell<String>,
    },
    RemoveCurve {
        curve_tag: ElementTag,
        remove_tag: ElementTag,
    },
    WriteCurveColor {
        curve_tag: ElementTag,
        color: LwwCell<String>,
    },
    InsertPoint {
        curve_tag: ElementTag,
        slot: PointSlot,
    },
    RemovePoint {
        curve_tag: ElementTag,
        point_tag: ElementTag,
        remove_tag: ElementTag,
    },
    WritePoint {
        curve_tag: ElementTag,
        point_tag: ElementTag,
        value: LwwCell<Point>,
    },
    UpsertUser {
        user_id: String,
        record: LwwCell<PresenceRecord>,
    },
    InsertHistoryNode {
        node: HistoryNodeCell,
    },
    WriteHistoryRoot {
        cell: LwwCell<String>,
    },
    WriteHistoryCurrent {
        cell: LwwCell<String>,
    },
}

/// The serialized delta produced by one local transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChangeSet {
    pub sender: ReplicaId,
    pub clock: VectorClock,
    pub lamport: u64,
    pub ops: Vec<DocOp>,
}

impl ChangeSet {
    pub fn encode(&self) -> CrdtResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CrdtError::Encode(e.to_string()))
    }

    pub fn decode(blob: &[u8]) -> CrdtResult<Self> {
        bincode::deserialize(blob).map_err(|e| CrdtError::Decode(e.to_string()))
    }
}

/// Outcome of applying one operation.
pub(crate) enum ApplyOutcome {
    Applied,
    /// The referenced curve, point, or parent node is not present yet.
    Missing,
}

/// Apply a change set plus any previously parked operations, returning the
/// operations that still cannot be resolved.
pub(crate) fn apply_change_set(
    state: &mut DocumentState,
    parked: Vec<DocOp>,
    changes: &ChangeSet,
) -> Vec<DocOp> {
    let mut pending: Vec<DocOp> = Vec::new();
    for op in parked.into_iter().chain(changes.ops.iter().cloned()) {
        match apply_op(state, &op) {
            ApplyOutcome::Applied => {}
            ApplyOutcome::Missing => pending.push(op),
        }
    }
    // Later operations may have supplied what an earlier one was waiting
    // for; retry until a full pass makes no progress.
    loop {
        let before = pending.len();
        let mut still_pending = Vec::new();
        for op in pending {
            match apply_op(state, &op) {
                ApplyOutcome::Applied => {}
                ApplyOutcome::Missing => still_pending.push(op),
            }
        }
        pending = still_pending;
        if pending.len() == before {
            break;
        }
    }
    state.clock.merge(&changes.clock);
    state.lamport = state.lamport.max(changes.lamport);
    pending
}

pub(crate) fn apply_op(state: &mut DocumentState, op: &DocOp) -> ApplyOutcome {
    match op {
        DocOp::InsertCurve {
            tag,
            curve_id,
            color,
        } => {
            state.insert_curve_slot(crate::state::CurveSlot {
                tag: tag.clone(),
                removed: None,
                curve_id: curve_id.clone(),
                color: color.clone(),
                points: Vec::new(),
            });
            ApplyOutcome::Applied
        }
        DocOp::RemoveCurve {
            curve_tag,
            remove_tag,
        } => match state.curve_by_tag_mut(curve_tag) {
            Some(slot) => {
                merge_removal(&mut slot.removed, Some(remove_tag));
                ApplyOutcome::Applied
            }
            None => ApplyOutcome::Missing,
        },
        DocOp::WriteCurveColor { curve_tag, color } => match state.curve_by_tag_mut(curve_tag) {
            Some(slot) => {
                slot.color.merge(color);
                ApplyOutcome::Applied
            }
            None => ApplyOutcome::Missing,
        },
        DocOp::InsertPoint { curve_tag, slot } => match state.curve_by_tag_mut(curve_tag) {
            Some(curve) => {
                if !curve.points.iter().any(|p| p.tag == slot.tag) {
                    let at = curve.points.partition_point(|p| p.tag < slot.tag);
                    curve.points.insert(at, slot.clone());
                }
                ApplyOutcome::Applied
            }
            None => ApplyOutcome::Missing,
        },
        DocOp::RemovePoint {
            curve_tag,
            point_tag,
            remove_tag,
        } => match state
            .curve_by_tag_mut(curve_tag)
            .and_then(|c| c.points.iter_mut().find(|p| &p.tag == point_tag))
        {
            Some(point) => {
                merge_removal(&mut point.removed, Some(remove_tag));
                ApplyOutcome::Applied
            }
            None => ApplyOutcome::Missing,
        },
        DocOp::WritePoint {
            curve_tag,
            point_tag,
            value,
        } => match state
            .curve_by_tag_mut(curve_tag)
            .and_then(|c| c.points.iter_mut().find(|p| &p.tag == point_tag))
        {
            Some(point) => {
                point.value.merge(value);
                ApplyOutcome::Applied
            }
            None => ApplyOutcome::Missing,
        },
        DocOp::UpsertUser { user_id, record } => {
            match state.users.get_mut(user_id) {
                Some(existing) => existing.merge(record),
                None => {
                    state.users.insert(user_id.clone(), record.clone());
                }
            }
            ApplyOutcome::Applied
        }
        DocOp::InsertHistoryNode { node } => {
            if let Some(parent_id) = &node.parent_id {
                if !state.history_nodes.contains_key(parent_id) {
                    return ApplyOutcome::Missing;
                }
            }
            if !state.history_nodes.contains_key(&node.id) {
                state.history_nodes.insert(node.id.clone(), node.clone());
            }
            if let Some(parent_id) = node.parent_id.clone() {
                if let Some(parent) = state.history_nodes.get_mut(&parent_id) {
                    parent.link_child(node.link_tag.clone(), &node.id);
                }
            }
            ApplyOutcome::Applied
        }
        DocOp::WriteHistoryRoot { cell } => {
            merge_optional_cell(&mut state.history_root, Some(cell));
            ApplyOutcome::Applied
        }
        DocOp::WriteHistoryCurrent { cell } => {
            merge_optional_cell(&mut state.history_current, Some(cell));
            ApplyOutcome::Applied
        }
    }
}
