//! # Curvelab History Crate
//!
//! A branching undo/redo tree over curve commands. Executing a new command
//! never truncates existing redo futures: when the current node already has
//! children, the new command becomes an additional sibling and the history
//! forks. Nodes live in an arena and are addressed by index; nodes are never
//! evicted, so indices stay valid for the tree's lifetime.

use std::sync::Arc;

use curvelab_common::TimeProvider;
use curvelab_store::{CurveCommand, CurveStore};

/// Callback invoked for every newly executed command, used to mirror local
/// edits into the replicated document.
pub type CollaborationHook = Box<dyn FnMut(&CurveCommand, &str) + Send>;

/// A single node in the history tree. The root node carries no command.
#[derive(Debug)]
pub struct HistoryNode {
    pub command: Option<CurveCommand>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Which child `redo` follows from this node.
    pub selected_child: usize,
    pub timestamp: u64,
    pub description: String,
}

/// One entry of the branch listing shown by the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchInfo {
    pub node: usize,
    pub description: String,
    pub is_current: bool,
}

/// Position within an intersection (a node with more than one child).
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionInfo {
    /// 1-based index of the selected branch.
    pub current_branch: usize,
    pub total_branches: usize,
    pub description: String,
}

/// The branching history tree with a single live `current` pointer.
pub struct HistoryTree {
    nodes: Vec<HistoryNode>,
    current: usize,
    time: Arc<dyn TimeProvider>,
    hook: Option<CollaborationHook>,
}

impl HistoryTree {
    /// Create a tree holding only the empty root.
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        let root = HistoryNode {
            command: None,
            parent: None,
            children: Vec::new(),
            selected_child: 0,
            timestamp: time.unix_millis(),
            description: "Start".to_string(),
        };
        Self {
            nodes: vec![root],
            current: 0,
            time,
            hook: None,
        }
    }

    /// Register the collaboration hook fired on every executed command.
    pub fn set_collaboration_hook(&mut self, hook: CollaborationHook) {
        self.hook = Some(hook);
    }

    /// Execute a command against the store and append it as a child of the
    /// current node. If the current node already has children the new node
    /// becomes a sibling, forking the history. Returns the command's
    /// affected curve id.
    pub fn execute_command(
        &mut self,
        command: CurveCommand,
        store: &mut CurveStore,
    ) -> Option<String> {
        let description = command.description(store);
        command.execute(store);
        let affected = command.affected_curve_id().map(String::from);

        if let Some(hook) = &mut self.hook {
            hook(&command, &description);
        }

        let index = self.nodes.len();
        self.nodes.push(HistoryNode {
            command: Some(command),
            parent: Some(self.current),
            children: Vec::new(),
            selected_child: 0,
            timestamp: self.time.unix_millis(),
            description,
        });
        self.nodes[self.current].children.push(index);
        self.current = index;
        affected
    }

    /// Apply a command to the store without touching the tree. Used for
    /// remote overwrites, which must not enter local history.
    pub fn execute_remote_command(&self, command: &CurveCommand, store: &mut CurveStore) {
        command.execute(store);
    }

    /// Undo the current node's command and step to its parent. Returns the
    /// new current node's affected curve id (`None` at the root).
    pub fn undo(&mut self, store: &mut CurveStore) -> Option<String> {
        let parent = self.nodes[self.current].parent?;
        if let Some(command) = &self.nodes[self.current].command {
            command.undo(store);
        }
        self.current = parent;
        self.affected_of(self.current)
    }

    /// Re-execute the selected child's command and step into it.
    pub fn redo(&mut self, store: &mut CurveStore) -> Option<String> {
        let child = self.selected_child_of(self.current)?;
        if let Some(command) = &self.nodes[child].command {
            command.execute(store);
        }
        self.current = child;
        self.affected_of(self.current)
    }

    pub fn can_undo(&self) -> bool {
        self.nodes[self.current].parent.is_some()
    }

    pub fn can_redo(&self) -> bool {
        !self.nodes[self.current].children.is_empty()
    }

    /// Whether the current node is a fork in the history.
    pub fn is_at_intersection(&self) -> bool {
        self.nodes[self.current].children.len() > 1
    }

    /// Cycle the selected branch forward without executing anything. The
    /// choice takes effect on the next redo or jump.
    pub fn switch_to_next_branch(&mut self) {
        let node = &mut self.nodes[self.current];
        if node.children.len() > 1 {
            node.selected_child = (node.selected_child + 1) % node.children.len();
        }
    }

    /// Cycle the selected branch backward without executing anything.
    pub fn switch_to_previous_branch(&mut self) {
        let node = &mut self.nodes[self.current];
        if node.children.len() > 1 {
            node.selected_child =
                (node.selected_child + node.children.len() - 1) % node.children.len();
        }
    }

    /// Report the branch position at the current intersection, if any.
    pub fn get_intersection_info(&self) -> Option<IntersectionInfo> {
        let node = &self.nodes[self.current];
        if node.children.len() <= 1 {
            return None;
        }
        let selected = node.children[node.selected_child.min(node.children.len() - 1)];
        Some(IntersectionInfo {
            current_branch: node.selected_child + 1,
            total_branches: node.children.len(),
            description: self.nodes[selected].description.clone(),
        })
    }

    /// Every branch choice along the path from root to current, in order:
    /// at each junction, all children are listed and the one on the current
    /// path is tagged.
    pub fn get_branches(&self) -> Vec<BranchInfo> {
        let path = self.path_to(self.current);
        let on_path: std::collections::HashSet<usize> = path.iter().copied().collect();
        let mut branches = Vec::new();
        for &node in &path {
            if node == self.current {
                break;
            }
            if self.nodes[node].children.len() > 1 {
                for &child in &self.nodes[node].children {
                    branches.push(BranchInfo {
                        node: child,
                        description: self.nodes[child].description.clone(),
                        is_current: on_path.contains(&child),
                    });
                }
            }
        }
        branches
    }

    /// Move the live state to `target`: undo up to the common ancestor,
    /// then execute back down. Unknown ancestry falls back to the root.
    pub fn switch_to_branch(&mut self, target: usize, store: &mut CurveStore) -> Option<String> {
        if target >= self.nodes.len() {
            log::debug!("switch to branch: node {target} does not exist");
            return None;
        }
        let ancestor = self.common_ancestor(self.current, target);

        while self.current != ancestor {
            match self.nodes[self.current].parent {
                Some(parent) => {
                    if let Some(command) = &self.nodes[self.current].command {
                        command.undo(store);
                    }
                    self.current = parent;
                }
                None => break,
            }
        }

        let mut descent = Vec::new();
        let mut walk = target;
        while walk != ancestor {
            descent.push(walk);
            match self.nodes[walk].parent {
                Some(parent) => walk = parent,
                None => break,
            }
        }
        for &node in descent.iter().rev() {
            if let Some(command) = &self.nodes[node].command {
                command.execute(store);
            }
            if let Some(parent) = self.nodes[node].parent {
                if let Some(slot) = self.nodes[parent].children.iter().position(|&c| c == node) {
                    self.nodes[parent].selected_child = slot;
                }
            }
            self.current = node;
        }
        self.affected_of(self.current)
    }

    /// Redo along the selected branch until reaching a leaf or the next
    /// fork. The first step honors the current selection; later steps take
    /// the first child.
    pub fn jump_to_next_intersection_or_end(&mut self, store: &mut CurveStore) -> Option<String> {
        let mut moved = false;
        loop {
            let next = if moved {
                self.nodes[self.current].children.first().copied()
            } else {
                self.selected_child_of(self.current)
            };
            let Some(next) = next else { break };
            if let Some(command) = &self.nodes[next].command {
                command.execute(store);
            }
            self.current = next;
            moved = true;
            if self.nodes[self.current].children.len() != 1 {
                break;
            }
        }
        if moved {
            self.affected_of(self.current)
        } else {
            None
        }
    }

    /// Undo until just after crossing a fork (the current node ends up
    /// being the intersection), or until the root.
    pub fn jump_to_previous_intersection_or_start(
        &mut self,
        store: &mut CurveStore,
    ) -> Option<String> {
        let mut moved = false;
        while let Some(parent) = self.nodes[self.current].parent {
            if let Some(command) = &self.nodes[self.current].command {
                command.undo(store);
            }
            self.current = parent;
            moved = true;
            if self.nodes[self.current].children.len() > 1 {
                break;
            }
        }
        if moved {
            self.affected_of(self.current)
        } else {
            None
        }
    }

    /// Rewind to the root and drop every recorded command. The root stays.
    pub fn clear(&mut self, store: &mut CurveStore) {
        while self.nodes[self.current].parent.is_some() {
            if let Some(command) = &self.nodes[self.current].command {
                command.undo(store);
            }
            self.current = self.nodes[self.current].parent.unwrap_or(0);
        }
        self.nodes.truncate(1);
        self.nodes[0].children.clear();
        self.nodes[0].selected_child = 0;
        self.current = 0;
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn node(&self, index: usize) -> Option<&HistoryNode> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    fn selected_child_of(&self, index: usize) -> Option<usize> {
        let node = &self.nodes[index];
        if node.children.is_empty() {
            return None;
        }
        Some(node.children[node.selected_child.min(node.children.len() - 1)])
    }

    fn affected_of(&self, index: usize) -> Option<String> {
        self.nodes[index]
            .command
            .as_ref()
            .and_then(|c| c.affected_curve_id())
            .map(String::from)
    }

    fn path_to(&self, index: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut walk = Some(index);
        while let Some(node) = walk {
            path.push(node);
            walk = self.nodes[node].parent;
        }
        path.reverse();
        path
    }

    fn common_ancestor(&self, a: usize, b: usize) -> usize {
        let ancestors: std::collections::HashSet<usize> = self.path_to(a).into_iter().collect();
        let mut walk = b;
        loop {
            if ancestors.contains(&walk) {
                return walk;
            }
            match self.nodes[walk].parent {
                Some(parent) => walk = parent,
                None => return 0,
            }
        }
    }
}

impl std::fmt::Debug for HistoryTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryTree")
            .field("nodes", &self.nodes.len())
            .field("current", &self.current)
            .finish()
    }
}
