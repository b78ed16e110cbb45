// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ordered per-kind node collections.

use crate::node::NodeId;
use avfx_format::NodeKind;
use serde::{Deserialize, Serialize};

/// Nodes of one kind in index order. A node's index is its position here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGroup {
    kind: NodeKind,
    nodes: Vec<NodeId>,
    import_base: usize,
}

impl NodeGroup {
    /// Create an empty group
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
            import_base: 0,
        }
    }

    /// Kind of the nodes held
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Append a node, returning its index
    pub fn add(&mut self, id: NodeId) -> usize {
        self.nodes.push(id);
        self.nodes.len() - 1
    }

    /// Insert a node at `position` (clamped to the end), returning the
    /// index it landed at
    pub fn insert(&mut self, position: usize, id: NodeId) -> usize {
        let position = position.min(self.nodes.len());
        self.nodes.insert(position, id);
        position
    }

    /// Remove a node, returning the index it had. Every node after it moves
    /// down by one; see [`NodeGroup::from_index`].
    pub fn remove(&mut self, id: NodeId) -> Option<usize> {
        let position = self.index_of(id)?;
        self.nodes.remove(position);
        Some(position)
    }

    /// Index of a node
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| *n == id)
    }

    /// Node at `index`
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.nodes.get(index).copied()
    }

    /// Nodes from `index` to the end, i.e. those renumbered by an insert or
    /// remove at `index`
    pub fn from_index(&self, index: usize) -> &[NodeId] {
        self.nodes.get(index..).unwrap_or_default()
    }

    /// Nodes in index order
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the group is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Prepare for merging a file whose indices are local to that file:
    /// they will be offset by the current length
    pub fn pre_import(&mut self) {
        self.import_base = self.nodes.len();
    }

    /// Make imported indices refer to the live group again
    pub fn clear_import_base(&mut self) {
        self.import_base = 0;
    }

    /// Offset applied to indices read from an imported file
    pub fn import_base(&self) -> usize {
        self.import_base
    }
}
