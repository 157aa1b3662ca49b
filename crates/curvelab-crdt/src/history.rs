//! Plain-value view of the shared history tree, and state reconstruction
//! by replay.
//!
//! The shared tree mirrors each client's local history inside the CRDT so
//! undo/redo can be collaborative: moving `currentNodeId` is just another
//! replicated write, and any replica can rebuild the curve state for a
//! node by replaying the command path from the root.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use curvelab_common::Curve;
use curvelab_store::{CurveStore, SerializedCommand};

/// One node of the shared history tree, as plain values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedHistoryNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
    pub command: Option<SerializedCommand>,
    pub user_id: String,
    pub timestamp: u64,
    pub description: String,
}

/// The whole shared tree plus its root and current pointers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedHistoryTree {
    pub nodes: BTreeMap<String, SharedHistoryNode>,
    pub root_id: Option<String>,
    pub current_node_id: Option<String>,
}

impl SharedHistoryTree {
    pub fn node(&self, id: &str) -> Option<&SharedHistoryNode> {
        self.nodes.get(id)
    }

    pub fn current_node(&self) -> Option<&SharedHistoryNode> {
        self.nodes.get(self.current_node_id.as_deref()?)
    }

    /// Node ids from the root down to `node_id`, inclusive.
    pub fn path_from_root(&self, node_id: &str) -> Vec<String> {
        let mut path = Vec::new();
        let mut walk = Some(node_id.to_string());
        while let Some(id) = walk {
            walk = self.nodes.get(&id).and_then(|n| n.parent_id.clone());
            path.push(id);
        }
        path.reverse();
        path
    }
}

/// Rebuild the curve state for a history node by replaying the command
/// path from the root against an initially empty store. Nodes whose
/// command cannot be deserialized (including the reserved
/// `ChangeCurveColor` kind) are skipped.
pub fn reconstruct_curves(tree: &SharedHistoryTree, node_id: &str) -> Vec<Curve> {
    let mut store = CurveStore::empty();
    for id in tree.path_from_root(node_id) {
        let Some(node) = tree.nodes.get(&id) else {
            continue;
        };
        if let Some(command) = node.command.as_ref().and_then(SerializedCommand::deserialize) {
            command.execute(&mut store);
        }
    }
    store.snapshot()
}
