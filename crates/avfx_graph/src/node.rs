// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for effect documents.

use avfx_format::chunk::{write_chunk, ChunkWriter, Result as FormatResult};
use avfx_format::{Block, FieldPath, NodeKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A reference from a field of one node to another node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    /// Field holding the index
    pub path: FieldPath,
    /// Group the index points into
    pub kind: NodeKind,
    /// Resolved target, `None` while unlinked or unresolved
    pub target: Option<NodeId>,
}

/// A node instance in a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    kind: NodeKind,
    pub(crate) index: usize,
    pub(crate) name: Option<String>,
    pub(crate) assigned: bool,
    pub(crate) body: Block,
    pub(crate) selectors: Vec<Selector>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) backrefs: Vec<NodeId>,
    pub(crate) attached: bool,
}

impl Node {
    /// Create a node around an existing body. Selectors are taken from the
    /// body's select fields and start unresolved.
    pub fn new(kind: NodeKind, body: Block) -> Self {
        let selectors = body
            .selects()
            .into_iter()
            .map(|site| Selector {
                path: site.path,
                kind: site.kind,
                target: None,
            })
            .collect();
        Self {
            id: NodeId::new(),
            kind,
            index: 0,
            name: None,
            assigned: true,
            body,
            selectors,
            children: Vec::new(),
            backrefs: Vec::new(),
            attached: false,
        }
    }

    /// Decode a node from its chunk payload
    pub fn decode(kind: NodeKind, payload: &[u8]) -> FormatResult<Self> {
        Ok(Self::new(kind, Block::decode(payload, kind.layout())?))
    }

    /// Node kind
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Position in its group (transiently renumbered during export)
    pub fn index(&self) -> usize {
        self.index
    }

    /// Rename override, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name shown to users: the override or `<kind> <index>`
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{} {}", self.kind, self.index),
        }
    }

    /// Whether the body is written; an unassigned node is an empty chunk
    pub fn is_assigned(&self) -> bool {
        self.assigned
    }

    /// Field tree
    pub fn body(&self) -> &Block {
        &self.body
    }

    /// Outgoing references
    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    /// Distinct referenced nodes, in selector order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Nodes whose selectors point here
    pub fn backrefs(&self) -> &[NodeId] {
        &self.backrefs
    }

    /// Whether the node currently belongs to its group
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub(crate) fn selector_mut(&mut self, path: &FieldPath) -> Option<&mut Selector> {
        self.selectors.iter_mut().find(|s| &s.path == path)
    }

    pub(crate) fn rebuild_children(&mut self) {
        self.children.clear();
        for target in self.selectors.iter().filter_map(|s| s.target) {
            if !self.children.contains(&target) {
                self.children.push(target);
            }
        }
    }

    /// Encode the body payload
    pub fn write_body(&self, writer: &mut ChunkWriter) -> FormatResult<()> {
        if self.assigned {
            self.body.write(writer)
        } else {
            Ok(())
        }
    }

    /// Encode the whole node chunk
    pub fn write(&self, writer: &mut ChunkWriter) -> FormatResult<()> {
        write_chunk(writer, self.kind.tag(), |w| self.write_body(w))
    }

    /// The node chunk as a standalone buffer
    pub fn to_bytes(&self) -> FormatResult<Vec<u8>> {
        let mut writer = ChunkWriter::new();
        self.write(&mut writer)?;
        Ok(writer.into_inner())
    }
}
