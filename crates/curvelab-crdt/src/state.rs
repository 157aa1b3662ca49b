//! Internal replicated state: tag-ordered curve slots, LWW presence
//! records, and the shared history cells. Everything here is a join
//! semilattice: `merge` is commutative, associative, and idempotent, and
//! all containers are ordered so serialization is byte-stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use curvelab_common::{Curve, Point, PresenceRecord};

use crate::clock::{ElementTag, LwwCell, VectorClock};

/// One element of the replicated curve sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CurveSlot {
    pub tag: ElementTag,
    /// Set once the curve has been removed; removal is final and the
    /// earliest remove tag is kept on merge.
    pub removed: Option<ElementTag>,
    pub curve_id: String,
    pub color: LwwCell<String>,
    pub points: Vec<PointSlot>,
}

/// One element of a curve's replicated point sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PointSlot {
    pub tag: ElementTag,
    pub removed: Option<ElementTag>,
    pub value: LwwCell<Point>,
}

/// One node of the shared history tree. Immutable after insertion except
/// for `children`, which is an add-only tag-ordered list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct HistoryNodeCell {
    pub id: String,
    pub parent_id: Option<String>,
    /// Tag ordering this node among its siblings.
    pub link_tag: ElementTag,
    /// JSON-encoded `{kind, payload}` command, absent on the root.
    pub command_json: Option<String>,
    pub user_id: String,
    pub timestamp: u64,
    pub description: String,
    pub children: Vec<(ElementTag, String)>,
}

impl HistoryNodeCell {
    /// Record a child link, keeping the list sorted and free of
    /// duplicates.
    pub fn link_child(&mut self, tag: ElementTag, child_id: &str) {
        if self.children.iter().any(|(_, id)| id == child_id) {
            return;
        }
        let entry = (tag, child_id.to_string());
        let at = self.children.partition_point(|e| *e < entry);
        self.children.insert(at, entry);
    }
}

/// The whole replicated document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct DocumentState {
    pub curves: Vec<CurveSlot>,
    pub users: BTreeMap<String, LwwCell<PresenceRecord>>,
    pub history_nodes: BTreeMap<String, HistoryNodeCell>,
    pub history_root: Option<LwwCell<String>>,
    pub history_current: Option<LwwCell<String>>,
    pub clock: VectorClock,
    /// Document-level Lamport time; the source of fresh tag timestamps.
    pub lamport: u64,
}

impl DocumentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a curve slot at its tag-ordered position. Existing tags are
    /// left untouched (idempotence).
    pub fn insert_curve_slot(&mut self, slot: CurveSlot) {
        if self.curves.iter().any(|c| c.tag == slot.tag) {
            return;
        }
        let at = self.curves.partition_point(|c| c.tag < slot.tag);
        self.curves.insert(at, slot);
    }

    pub fn curve_by_tag_mut(&mut self, tag: &ElementTag) -> Option<&mut CurveSlot> {
        self.curves.iter_mut().find(|c| &c.tag == tag)
    }

    /// The live (non-removed) slot for a curve id, if any.
    pub fn visible_curve_mut(&mut self, curve_id: &str) -> Option<&mut CurveSlot> {
        self.curves
            .iter_mut()
            .find(|c| c.removed.is_none() && c.curve_id == curve_id)
    }

    pub fn visible_curve(&self, curve_id: &str) -> Option<&CurveSlot> {
        self.curves
            .iter()
            .find(|c| c.removed.is_none() && c.curve_id == curve_id)
    }

    /// Plain-value projection of the live curves, in convergent order.
    pub fn visible_curves(&self) -> Vec<Curve> {
        self.curves
            .iter()
            .filter(|slot| slot.removed.is_none())
            .map(|slot| Curve {
                id: slot.curve_id.clone(),
                color: slot.color.value.clone(),
                points: slot
                    .points
                    .iter()
                    .filter(|p| p.removed.is_none())
                    .map(|p| p.value.value)
                    .collect(),
            })
            .collect()
    }

    /// Plain-value projection of the presence records, ordered by user id.
    pub fn visible_users(&self) -> Vec<PresenceRecord> {
        self.users.values().map(|cell| cell.value.clone()).collect()
    }

    pub fn current_node_id(&self) -> Option<&str> {
        self.history_current.as_ref().map(|c| c.value.as_str())
    }

    pub fn root_node_id(&self) -> Option<&str> {
        self.history_root.as_ref().map(|c| c.value.as_str())
    }

    /// Join-semilattice merge with another full document state.
    pub fn merge(&mut self, other: &DocumentState) {
        for slot in &other.curves {
            match self.curves.iter_mut().find(|c| c.tag == slot.tag) {
                Some(existing) => merge_curve_slot(existing, slot),
                None => self.insert_curve_slot(slot.clone()),
            }
        }
        for (user_id, cell) in &other.users {
            match self.users.get_mut(user_id) {
                Some(existing) => existing.merge(cell),
                None => {
                    self.users.insert(user_id.clone(), cell.clone());
                }
            }
        }
        for (node_id, node) in &other.history_nodes {
            match self.history_nodes.get_mut(node_id) {
                Some(existing) => {
                    for (tag, child) in &node.children {
                        existing.link_child(tag.clone(), child);
                    }
                }
                None => {
                    self.history_nodes.insert(node_id.clone(), node.clone());
                }
            }
        }
        merge_optional_cell(&mut self.history_root, other.history_root.as_ref());
        merge_optional_cell(&mut self.history_current, other.history_current.as_ref());
        self.clock.merge(&other.clock);
        self.lamport = self.lamport.max(other.lamport);
    }
}

pub(crate) fn merge_curve_slot(existing: &mut CurveSlot, other: &CurveSlot) {
    merge_removal(&mut existing.removed, other.removed.as_ref());
    existing.color.merge(&other.color);
    for point in &other.points {
        match existing.points.iter_mut().find(|p| p.tag == point.tag) {
            Some(current) => {
                merge_removal(&mut current.removed, point.removed.as_ref());
                current.value.merge(&point.value);
            }
            None => {
                let at = existing.points.partition_point(|p| p.tag < point.tag);
                existing.points.insert(at, point.clone());
            }
        }
    }
}

/// Removal is monotone: once removed, always removed. The smaller remove
/// tag is kept so both replicas store identical bytes.
pub(crate) fn merge_removal(existing: &mut Option<ElementTag>, other: Option<&ElementTag>) {
    if let Some(other) = other {
        match existing {
            Some(current) => {
                if other < current {
                    *current = other.clone();
                }
            }
            None => *existing = Some(other.clone()),
        }
    }
}

pub(crate) fn merge_optional_cell(
    existing: &mut Option<LwwCell<String>>,
    other: Option<&LwwCell<String>>,
) {
    if let Some(other) = other {
        match existing {
            Some(current) => current.merge(other),
            None => *existing = Some(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReplicaId;

    fn tag(ts: u64, replica: &str, seq: u64) -> ElementTag {
        ElementTag::new(ts, ReplicaId::new(replica), seq)
    }

    fn slot(ts: u64, replica: &str, seq: u64, curve_id: &str) -> CurveSlot {
        let t = tag(ts, replica, seq);
        CurveSlot {
            removed: None,
            curve_id: curve_id.to_string(),
            color: LwwCell::new("#4a9eff".to_string(), &t),
            points: Vec::new(),
            tag: t,
        }
    }

    #[test]
    fn test_insert_curve_slot_keeps_tag_order() {
        let mut state = DocumentState::new();
        state.insert_curve_slot(slot(2, "b", 1, "curve-2"));
        state.insert_curve_slot(slot(1, "a", 1, "curve-1"));
        state.insert_curve_slot(slot(2, "a", 1, "curve-3"));
        let ids: Vec<_> = state.curves.iter().map(|c| c.curve_id.as_str()).collect();
        assert_eq!(ids, vec!["curve-1", "curve-3", "curve-2"]);
    }

    #[test]
    fn test_insert_curve_slot_is_idempotent() {
        let mut state = DocumentState::new();
        state.insert_curve_slot(slot(1, "a", 1, "curve-1"));
        state.insert_curve_slot(slot(1, "a", 1, "curve-1"));
        assert_eq!(state.curves.len(), 1);
    }

    #[test]
    fn test_merge_is_commutative() {
        let mut left = DocumentState::new();
        left.insert_curve_slot(slot(1, "a", 1, "curve-a"));
        left.lamport = 1;
        let mut right = DocumentState::new();
        right.insert_curve_slot(slot(1, "b", 1, "curve-b"));
        right.lamport = 1;

        let mut ab = left.clone();
        ab.merge(&right);
        let mut ba = right.clone();
        ba.merge(&left);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_merge_removal_is_monotone() {
        let mut state = DocumentState::new();
        state.insert_curve_slot(slot(1, "a", 1, "curve-a"));

        let mut removed = state.clone();
        removed.curves[0].removed = Some(tag(2, "b", 1));

        state.merge(&removed);
        assert!(state.curves[0].removed.is_some());
        assert!(state.visible_curves().is_empty());

        // Re-merging the pre-removal state does not resurrect the curve.
        let mut fresh = DocumentState::new();
        fresh.insert_curve_slot(slot(1, "a", 1, "curve-a"));
        state.merge(&fresh);
        assert!(state.visible_curves().is_empty());
    }

    #[test]
    fn test_link_child_sorted_dedup() {
        let mut node = HistoryNodeCell {
            id: "n".to_string(),
            parent_id: None,
            link_tag: tag(1, "a", 1),
            command_json: None,
            user_id: "a".to_string(),
            timestamp: 0,
            description: "Start".to_string(),
            children: Vec::new(),
        };
        node.link_child(tag(3, "a", 3), "late");
        node.link_child(tag(2, "a", 2), "early");
        node.link_child(tag(3, "a", 3), "late");
        let ids: Vec<_> = node.children.iter().map(|(_, id)| id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }
}
