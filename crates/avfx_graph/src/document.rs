// SPDX-License-Identifier: MIT OR Apache-2.0
//! Effect documents: the root parameters plus one group per node kind.
//!
//! Nodes live in an arena keyed by [`NodeId`]. Removing a node only detaches
//! it from its group so it can be put back later. Selectors are kept in sync
//! in both directions: a node knows its `children` (what its selectors point
//! at) and its `backrefs` (whose selectors point at it), and whenever its
//! index changes every backref gets the new index written into its body.

use crate::group::NodeGroup;
use crate::node::{Node, NodeId, Selector};
use avfx_format::chunk::{
    expect_chunk, padding_for, read_nested, write_chunk, write_nested, ChunkReader, ChunkWriter, FormatError,
};
use avfx_format::schema::{Layout, ROOT};
use avfx_format::{AssignState, Block, Entry, Field, FieldPath, NodeKind, NO_TARGET, ROOT_TAG};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Document errors
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// No node with this id
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Operation needs an attached node
    #[error("node is not attached: {0:?}")]
    NodeDetached(NodeId),

    /// Operation needs a detached node
    #[error("node is already attached: {0:?}")]
    NodeAttached(NodeId),

    /// Selector target of the wrong kind
    #[error("expected a {expected} node, found {found}")]
    KindMismatch {
        /// Kind the selector points into
        expected: NodeKind,
        /// Kind of the node given
        found: NodeKind,
    },

    /// Path does not address a field
    #[error("no field at `{0}`")]
    InvalidPath(FieldPath),

    /// Path addresses something other than a selector
    #[error("`{0}` is not a selector")]
    NotASelector(FieldPath),

    /// Selectors can only be changed through `select`
    #[error("`{0}` holds a selector")]
    SelectorField(FieldPath),

    /// Codec error
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Result type for document operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Who owns a field: the root parameters or a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Owner {
    /// Top-level parameters of the document
    Root,
    /// Body of a node
    Node(NodeId),
}

/// Result of comparing a re-encoded document against its source bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerifyStatus {
    /// Not checked
    #[default]
    Unchecked,
    /// Re-encoding reproduced the input exactly
    Verified,
    /// First differing byte
    Mismatch {
        /// Offset of the first difference
        offset: usize,
    },
}

/// A selector that pointed at a detached node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Node holding the selector
    pub owner: NodeId,
    /// Selector field
    pub path: FieldPath,
}

/// What is needed to put a detached node back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detached {
    /// Index the node had
    pub position: usize,
    /// Selectors that were unlinked from it
    pub links: Vec<Link>,
}

/// An entry taken out of a block, with the selector targets it carried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedEntry {
    /// Block the entry belonged to
    pub parent: FieldPath,
    /// Position among all siblings
    pub position: usize,
    /// The entry
    pub entry: Entry,
    /// Resolved selectors inside the entry, by absolute path
    pub targets: Vec<(FieldPath, NodeId)>,
}

impl RemovedEntry {
    /// A new entry to be inserted at `position` of `parent`
    pub fn new(parent: FieldPath, position: usize, entry: Entry) -> Self {
        Self {
            parent,
            position,
            entry,
            targets: Vec::new(),
        }
    }
}

/// What the root payload holds at each position. A group is written where
/// the first node of its kind was read, so a root that interleaves kinds
/// (`Tex, Modl, Tex`) is rewritten grouped and does not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootSlot {
    Param,
    Group(NodeKind),
}

/// An effect document
#[derive(Debug, Clone)]
pub struct Document {
    nodes: IndexMap<NodeId, Node>,
    groups: [NodeGroup; 8],
    params: Block,
    slots: Vec<RootSlot>,
    pad_root: bool,
    trailing: Vec<u8>,
    changed: Vec<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            groups: NodeKind::ALL.map(NodeGroup::new),
            params: Block::new(),
            slots: Vec::new(),
            pad_root: true,
            trailing: Vec::new(),
            changed: Vec::new(),
        }
    }

    /// Decode a document from the bytes of an effect file
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ChunkReader::new(bytes);
        let size = expect_chunk(&mut reader, ROOT_TAG)?;
        let mut doc = Self::new();

        read_nested(&mut reader, size, |r, tag, size| {
            let payload = r.read_bytes(size)?;
            match NodeKind::from_tag(tag) {
                Some(kind) => {
                    let node = Node::decode(kind, payload)?;
                    if !doc.slots.contains(&RootSlot::Group(kind)) {
                        doc.slots.push(RootSlot::Group(kind));
                    }
                    doc.push_node(node);
                }
                None => {
                    doc.params.push(tag, Field::decode(payload, ROOT.spec(tag))?);
                    doc.slots.push(RootSlot::Param);
                }
            }
            Ok(())
        })?;

        let rest = &bytes[reader.position()..];
        let pad = padding_for(size);
        doc.pad_root = rest.len() >= pad && rest[..pad].iter().all(|b| *b == 0);
        doc.trailing = if doc.pad_root { rest[pad..].to_vec() } else { rest.to_vec() };

        let ids: Vec<_> = doc.nodes.keys().copied().collect();
        for id in ids {
            doc.resolve_selectors(id, |_| 0)?;
        }
        doc.changed.clear();

        tracing::info!(nodes = doc.nodes.len(), params = doc.params.len(), "loaded document");
        Ok(doc)
    }

    /// Decode and optionally check that re-encoding reproduces `bytes`
    pub fn load(bytes: &[u8], verify: bool) -> Result<(Self, VerifyStatus)> {
        let doc = Self::from_bytes(bytes)?;
        let status = if verify {
            doc.verify(bytes)
        } else {
            VerifyStatus::Unchecked
        };
        Ok((doc, status))
    }

    /// Compare the current encoding against `original`
    pub fn verify(&self, original: &[u8]) -> VerifyStatus {
        let bytes = match self.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(error = %err, "document could not be re-encoded");
                return VerifyStatus::Mismatch { offset: 0 };
            }
        };
        match first_mismatch(&bytes, original) {
            None => VerifyStatus::Verified,
            Some(offset) => {
                tracing::warn!(
                    offset,
                    expected = original.len(),
                    written = bytes.len(),
                    "re-encoded document differs from source"
                );
                VerifyStatus::Mismatch { offset }
            }
        }
    }

    /// Encode the whole document
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut payload = ChunkWriter::new();
        self.write_root_payload(&mut payload)?;
        let payload = payload.into_inner();
        let size = i32::try_from(payload.len()).map_err(|_| FormatError::ChunkOutOfBounds {
            tag: ROOT_TAG,
            offset: 0,
            size: payload.len() as i64,
            bound: i32::MAX as usize,
        })?;

        let mut writer = ChunkWriter::new();
        writer.write_tag(ROOT_TAG)?;
        writer.write_i32(size)?;
        writer.write_bytes(&payload)?;
        if self.pad_root {
            writer.write_zeros(padding_for(payload.len()))?;
        }
        writer.write_bytes(&self.trailing)?;
        Ok(writer.into_inner())
    }

    fn write_root_payload(&self, writer: &mut ChunkWriter) -> Result<()> {
        let mut params = self.params.entries().iter();
        let mut written = [false; 8];
        for slot in &self.slots {
            match slot {
                RootSlot::Param => {
                    if let Some(entry) = params.next().filter(|e| e.assigned) {
                        write_chunk(writer, entry.tag, |w| entry.field.write(w))?;
                    }
                }
                RootSlot::Group(kind) => {
                    self.write_group(writer, *kind)?;
                    written[kind.slot()] = true;
                }
            }
        }
        write_nested(writer, params.as_slice())?;
        for kind in NodeKind::ALL {
            if !written[kind.slot()] {
                self.write_group(writer, kind)?;
            }
        }
        Ok(())
    }

    fn write_group(&self, writer: &mut ChunkWriter, kind: NodeKind) -> Result<()> {
        for id in self.group(kind).iter() {
            self.node(id).ok_or(GraphError::NodeNotFound(id))?.write(writer)?;
        }
        Ok(())
    }

    /// Encoded chunk of a single node
    pub fn node_bytes(&self, id: NodeId) -> Result<Vec<u8>> {
        Ok(self.node(id).ok_or(GraphError::NodeNotFound(id))?.to_bytes()?)
    }

    // ---- nodes and groups ----

    /// Get a node by ID, attached or not
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))
    }

    /// Group of `kind`
    pub fn group(&self, kind: NodeKind) -> &NodeGroup {
        &self.groups[kind.slot()]
    }

    /// Attached nodes of `kind` in index order
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &Node> + '_ {
        self.group(kind).iter().filter_map(move |id| self.nodes.get(&id))
    }

    /// Number of attached nodes
    pub fn node_count(&self) -> usize {
        self.groups.iter().map(NodeGroup::len).sum()
    }

    /// Top-level parameters
    pub fn params(&self) -> &Block {
        &self.params
    }

    /// Prepare every group for a merge import
    pub fn pre_import(&mut self) {
        for group in &mut self.groups {
            group.pre_import();
        }
    }

    /// Make imported indices refer to the live groups
    pub fn clear_import_bases(&mut self) {
        for group in &mut self.groups {
            group.clear_import_base();
        }
    }

    fn push_node(&mut self, mut node: Node) -> NodeId {
        let id = node.id;
        node.index = self.groups[node.kind().slot()].add(id);
        node.attached = true;
        self.nodes.insert(id, node);
        id
    }

    /// Append a new node to its group
    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        let id = node.id;
        let position = self.group(node.kind()).len();
        self.nodes.insert(id, node);
        self.attach_node(id, position, &[])?;
        Ok(id)
    }

    /// Take a node out of its group. Selectors pointing at it are unlinked
    /// and listed in the result; nodes after it are renumbered.
    pub fn detach_node(&mut self, id: NodeId) -> Result<Detached> {
        let node = self.node(id).ok_or(GraphError::NodeNotFound(id))?;
        if !node.attached {
            return Err(GraphError::NodeDetached(id));
        }
        let kind = node.kind();
        let children = node.children.clone();
        let backrefs = node.backrefs.clone();

        let position = self.groups[kind.slot()]
            .remove(id)
            .ok_or(GraphError::NodeDetached(id))?;

        let mut links = Vec::new();
        for owner in backrefs {
            let paths: Vec<_> = self
                .node(owner)
                .into_iter()
                .flat_map(|n| n.selectors.iter())
                .filter(|s| s.target == Some(id))
                .map(|s| s.path.clone())
                .collect();
            for path in paths {
                self.select(owner, &path, None)?;
                links.push(Link { owner, path });
            }
        }

        self.node_mut(id)?.attached = false;
        for target in children {
            if let Some(t) = self.nodes.get_mut(&target) {
                t.backrefs.retain(|b| *b != id);
            }
        }
        self.reindex(kind, position);
        self.mark_changed(id);

        tracing::debug!(?id, %kind, position, links = links.len(), "detached node");
        Ok(Detached { position, links })
    }

    /// Put a detached node at `position` of its group and relink `links`
    pub fn attach_node(&mut self, id: NodeId, position: usize, links: &[Link]) -> Result<()> {
        let node = self.node(id).ok_or(GraphError::NodeNotFound(id))?;
        if node.attached {
            return Err(GraphError::NodeAttached(id));
        }
        let kind = node.kind();
        let live: Vec<_> = node
            .selectors
            .iter()
            .map(|s| s.target.filter(|t| self.nodes.get(t).is_some_and(|n| n.attached)))
            .collect();

        let index = self.groups[kind.slot()].insert(position, id);
        let node = self.node_mut(id)?;
        node.attached = true;
        for (selector, target) in node.selectors.iter_mut().zip(live) {
            selector.target = target;
        }
        node.rebuild_children();
        for target in node.children.clone() {
            self.sync_backref(id, target);
        }

        self.reindex(kind, index);
        for link in links {
            self.select(link.owner, &link.path, Some(id))?;
        }
        self.write_selector_indices(id);
        self.mark_changed(id);
        Ok(())
    }

    /// Set a node's rename override, returning the previous one
    pub fn rename(&mut self, id: NodeId, name: Option<String>) -> Result<Option<String>> {
        let previous = std::mem::replace(&mut self.node_mut(id)?.name, name);
        self.mark_changed(id);
        Ok(previous)
    }

    fn reindex(&mut self, kind: NodeKind, from: usize) {
        let moved: Vec<_> = self.group(kind).from_index(from).to_vec();
        for (offset, id) in moved.into_iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.index = from + offset;
            }
            self.refresh(id);
            self.mark_changed(id);
        }
    }

    // ---- selectors ----

    /// Point the selector at `path` of `owner` to `target` (or unlink it),
    /// returning the previous target. Linking also assigns the field.
    pub fn select(&mut self, owner: NodeId, path: &FieldPath, target: Option<NodeId>) -> Result<Option<NodeId>> {
        let target_info = match target {
            Some(t) => {
                let node = self.node(t).ok_or(GraphError::NodeNotFound(t))?;
                if !node.attached {
                    return Err(GraphError::NodeDetached(t));
                }
                Some((node.kind(), node.index))
            }
            None => None,
        };

        let node = self.node_mut(owner)?;
        let layout = node.kind().layout();
        let entry = node
            .body
            .ensure(path, layout)
            .ok_or_else(|| GraphError::InvalidPath(path.clone()))?;
        let Field::Select(select) = &mut entry.field else {
            return Err(GraphError::NotASelector(path.clone()));
        };
        let kind = select.kind;
        if let Some((found, _)) = target_info {
            if found != kind {
                return Err(GraphError::KindMismatch { expected: kind, found });
            }
        }
        select.index = target_info.map_or(NO_TARGET, |(_, index)| index as i32);
        if target.is_some() {
            node.body.set_assigned(path, true);
        }

        let previous = match node.selector_mut(path) {
            Some(selector) => std::mem::replace(&mut selector.target, target),
            None => {
                node.selectors.push(Selector {
                    path: path.clone(),
                    kind,
                    target,
                });
                None
            }
        };
        node.rebuild_children();

        if let Some(p) = previous {
            self.sync_backref(owner, p);
        }
        if let Some(t) = target {
            self.sync_backref(owner, t);
        }
        self.mark_changed(owner);
        Ok(previous)
    }

    /// Target of the selector at `path`
    pub fn selected(&self, owner: NodeId, path: &FieldPath) -> Result<Option<NodeId>> {
        let node = self.node(owner).ok_or(GraphError::NodeNotFound(owner))?;
        node.selectors
            .iter()
            .find(|s| &s.path == path)
            .map(|s| s.target)
            .ok_or_else(|| GraphError::NotASelector(path.clone()))
    }

    /// Resolve every unlinked selector of `id` whose stored index is valid.
    /// Indices are offset by `base(kind)` of the group pointed into. Returns
    /// the number of selectors left unresolved.
    pub fn resolve_selectors(&mut self, id: NodeId, base: impl Fn(NodeKind) -> usize) -> Result<usize> {
        self.resolve_selectors_with(id, |doc, kind, index| doc.group(kind).get(base(kind) + index))
    }

    /// Resolve every unlinked selector of `id` through `lookup`, which maps
    /// a stored index to its target. Selectors `lookup` cannot place stay
    /// unlinked and are counted in the result.
    pub fn resolve_selectors_with(
        &mut self,
        id: NodeId,
        lookup: impl Fn(&Document, NodeKind, usize) -> Option<NodeId>,
    ) -> Result<usize> {
        let node = self.node(id).ok_or(GraphError::NodeNotFound(id))?;
        let mut resolved = Vec::new();
        let mut unresolved = 0;
        for selector in node.selectors.iter().filter(|s| s.target.is_none()) {
            let index = node
                .body
                .get(&selector.path)
                .and_then(|e| e.field.as_select())
                .map_or(NO_TARGET, |s| s.index);
            if index < 0 {
                continue;
            }
            match lookup(self, selector.kind, index as usize) {
                Some(target) => resolved.push((selector.path.clone(), target)),
                None => unresolved += 1,
            }
        }
        for (path, target) in resolved {
            self.select(id, &path, Some(target))?;
        }
        Ok(unresolved)
    }

    fn sync_backref(&mut self, owner: NodeId, target: NodeId) {
        let linked = self
            .nodes
            .get(&owner)
            .is_some_and(|n| n.attached && n.children.contains(&target));
        if let Some(node) = self.nodes.get_mut(&target) {
            if linked {
                if !node.backrefs.contains(&owner) {
                    node.backrefs.push(owner);
                }
            } else {
                node.backrefs.retain(|b| *b != owner);
            }
        }
    }

    /// Tell everything pointing at `id` that its index may have changed
    pub fn refresh(&mut self, id: NodeId) {
        let backrefs = self.nodes.get(&id).map(|n| n.backrefs.clone()).unwrap_or_default();
        for owner in backrefs {
            self.write_selector_indices(owner);
            self.mark_changed(owner);
        }
    }

    /// Rewrite every resolved selector of every node with its target's
    /// current index, without raising change notifications
    pub(crate) fn sync_all_selectors(&mut self) {
        let ids: Vec<_> = self.nodes.keys().copied().collect();
        for id in ids {
            self.write_selector_indices(id);
        }
    }

    fn write_selector_indices(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let updates: Vec<_> = node
            .selectors
            .iter()
            .filter_map(|s| {
                let target = self.nodes.get(&s.target?)?;
                Some((s.path.clone(), target.index as i32))
            })
            .collect();
        if let Some(node) = self.nodes.get_mut(&id) {
            for (path, index) in updates {
                if let Some(Field::Select(select)) = node.body.get_mut(&path).map(|e| &mut e.field) {
                    select.index = index;
                }
            }
        }
    }

    pub(crate) fn set_transient_index(&mut self, id: NodeId, index: usize) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.index = index;
        }
    }

    // ---- fields ----

    fn layout_of(&self, owner: Owner) -> Result<&'static Layout> {
        match owner {
            Owner::Root => Ok(&ROOT),
            Owner::Node(id) => Ok(self.node(id).ok_or(GraphError::NodeNotFound(id))?.kind().layout()),
        }
    }

    fn block(&self, owner: Owner) -> Result<&Block> {
        match owner {
            Owner::Root => Ok(&self.params),
            Owner::Node(id) => Ok(&self.node(id).ok_or(GraphError::NodeNotFound(id))?.body),
        }
    }

    fn block_mut(&mut self, owner: Owner) -> Result<&mut Block> {
        match owner {
            Owner::Root => Ok(&mut self.params),
            Owner::Node(id) => Ok(&mut self.node_mut(id)?.body),
        }
    }

    /// Entry at `path`
    pub fn entry(&self, owner: Owner, path: &FieldPath) -> Result<&Entry> {
        self.block(owner)?
            .get(path)
            .ok_or_else(|| GraphError::InvalidPath(path.clone()))
    }

    /// Field at `path`
    pub fn field(&self, owner: Owner, path: &FieldPath) -> Result<&Field> {
        Ok(&self.entry(owner, path)?.field)
    }

    /// Whether the field at `path` exists and is assigned
    pub fn is_assigned(&self, owner: Owner, path: &FieldPath) -> Result<bool> {
        Ok(self.block(owner)?.get(path).is_some_and(|e| e.assigned))
    }

    /// Assign or unassign a whole node, returning the previous state
    pub fn set_node_assigned(&mut self, id: NodeId, assigned: bool) -> Result<bool> {
        let node = self.node_mut(id)?;
        let previous = std::mem::replace(&mut node.assigned, assigned);
        self.mark_changed(id);
        Ok(previous)
    }

    /// Assignment flags along `path`, parents included
    pub fn assign_state(&self, owner: Owner, path: &FieldPath) -> Result<AssignState> {
        Ok(self.block(owner)?.assign_state(path))
    }

    /// Assign or unassign the field at `path`, creating it from the layout
    /// if needed. Assigning also assigns every parent. Returns the flags
    /// along the path from before the change.
    pub fn set_assigned(&mut self, owner: Owner, path: &FieldPath, assigned: bool) -> Result<AssignState> {
        let layout = self.layout_of(owner)?;
        let previous = self.assign_state(owner, path)?;
        let block = self.block_mut(owner)?;
        if block.ensure(path, layout).is_none() || !block.set_assigned(path, assigned) {
            return Err(GraphError::InvalidPath(path.clone()));
        }
        self.adopt_selectors(owner);
        self.mark_owner_changed(owner);
        Ok(previous)
    }

    /// Put back flags returned by [`Document::set_assigned`] or
    /// [`Document::assign_state`]
    pub fn restore_assigned(&mut self, owner: Owner, path: &FieldPath, state: &AssignState) -> Result<()> {
        if !self.block_mut(owner)?.restore_assign_state(path, state) {
            return Err(GraphError::InvalidPath(path.clone()));
        }
        self.mark_owner_changed(owner);
        Ok(())
    }

    /// Replace the value at `path`, creating the entry from the layout if
    /// needed. Returns the previous value. Selector fields are rejected.
    pub fn set_field(&mut self, owner: Owner, path: &FieldPath, field: Field) -> Result<Field> {
        if field.contains_select() {
            return Err(GraphError::SelectorField(path.clone()));
        }
        let layout = self.layout_of(owner)?;
        let entry = self
            .block_mut(owner)?
            .ensure(path, layout)
            .ok_or_else(|| GraphError::InvalidPath(path.clone()))?;
        if entry.field.contains_select() {
            return Err(GraphError::SelectorField(path.clone()));
        }
        let previous = std::mem::replace(&mut entry.field, field);
        self.mark_owner_changed(owner);
        Ok(previous)
    }

    /// Take the entry at `path` out of its block (e.g. a timeline item).
    /// Selectors inside it are dropped and their targets returned; paths of
    /// later siblings are shifted.
    pub fn remove_entry(&mut self, owner: Owner, path: &FieldPath) -> Result<RemovedEntry> {
        let (parent, _) = path
            .split_last()
            .ok_or_else(|| GraphError::InvalidPath(path.clone()))?;
        let (position, entry) = self
            .block_mut(owner)?
            .remove(path)
            .ok_or_else(|| GraphError::InvalidPath(path.clone()))?;

        let mut targets = Vec::new();
        if let Owner::Node(id) = owner {
            let node = self.node_mut(id)?;
            let mut kept = Vec::with_capacity(node.selectors.len());
            let mut dropped = Vec::new();
            for selector in node.selectors.drain(..) {
                match selector.path.after_removal(path) {
                    Some(moved) => kept.push(Selector { path: moved, ..selector }),
                    None => {
                        if let Some(target) = selector.target {
                            targets.push((selector.path.clone(), target));
                            dropped.push(target);
                        }
                    }
                }
            }
            node.selectors = kept;
            node.rebuild_children();
            for target in dropped {
                self.sync_backref(id, target);
            }
        }
        self.mark_owner_changed(owner);

        Ok(RemovedEntry {
            parent,
            position,
            entry,
            targets,
        })
    }

    /// Insert an entry, relinking the selector targets it carries.
    /// Returns the path it was inserted at.
    pub fn insert_entry(&mut self, owner: Owner, removed: RemovedEntry) -> Result<FieldPath> {
        let RemovedEntry {
            parent,
            position,
            entry,
            targets,
        } = removed;

        let sites = entry_select_sites(&entry);
        let block = self.block_mut(owner)?;
        if !block.insert(&parent, position, entry) {
            return Err(GraphError::InvalidPath(parent));
        }
        let inserted = block
            .path_at(&parent, position)
            .ok_or_else(|| GraphError::InvalidPath(parent.clone()))?;

        if let Owner::Node(id) = owner {
            let node = self.node_mut(id)?;
            for selector in &mut node.selectors {
                selector.path = selector.path.after_insertion(&inserted);
            }
            for (relative, kind) in sites {
                node.selectors.push(Selector {
                    path: inserted.join(&relative),
                    kind,
                    target: None,
                });
            }
            for (path, target) in targets {
                if self.nodes.get(&target).is_some_and(|n| n.attached) {
                    self.select(id, &path, Some(target))?;
                }
            }
            self.write_selector_indices(id);
        }
        self.mark_owner_changed(owner);
        Ok(inserted)
    }

    /// Register selectors for select fields that were created after the
    /// node was built
    fn adopt_selectors(&mut self, owner: Owner) {
        let Owner::Node(id) = owner else {
            return;
        };
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        for site in node.body.selects() {
            if !node.selectors.iter().any(|s| s.path == site.path) {
                node.selectors.push(Selector {
                    path: site.path,
                    kind: site.kind,
                    target: None,
                });
            }
        }
    }

    // ---- notifications ----

    fn mark_changed(&mut self, id: NodeId) {
        if !self.changed.contains(&id) {
            self.changed.push(id);
        }
    }

    fn mark_owner_changed(&mut self, owner: Owner) {
        if let Owner::Node(id) = owner {
            self.mark_changed(id);
        }
    }

    /// Nodes changed since the last call
    pub fn take_changed(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.changed)
    }
}

fn entry_select_sites(entry: &Entry) -> Vec<(FieldPath, NodeKind)> {
    match &entry.field {
        Field::Select(select) => vec![(FieldPath::root(), select.kind)],
        other => other
            .as_block()
            .map(|b| b.selects().into_iter().map(|s| (s.path, s.kind)).collect())
            .unwrap_or_default(),
    }
}

fn first_mismatch(written: &[u8], original: &[u8]) -> Option<usize> {
    written
        .iter()
        .zip(original)
        .position(|(a, b)| a != b)
        .or_else(|| (written.len() != original.len()).then(|| written.len().min(original.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use avfx_format::{IntField, SelectField, Tag, TextField};

    fn path(text: &str) -> FieldPath {
        FieldPath::parse(text).unwrap()
    }

    fn texture(name: &str) -> Node {
        let mut body = Block::new();
        body.push(Tag::new("Path"), Field::Text(TextField::new(name)));
        Node::new(NodeKind::Texture, body)
    }

    fn particle(texture: i32) -> Node {
        let mut slot = Block::new();
        slot.push(
            Tag::new("TxNo"),
            Field::Select(SelectField {
                kind: NodeKind::Texture,
                index: texture,
            }),
        );
        let mut body = Block::new();
        body.push(Tag::new("PrVT"), Field::Int(IntField::new(1)));
        body.push(Tag::new("TC1"), Field::Block(slot));
        Node::new(NodeKind::Particle, body)
    }

    fn seed_bytes() -> Vec<u8> {
        let mut root = ChunkWriter::new();
        write_chunk(&mut root, Tag::new("Ver"), |w| w.write_i32(0x2011_0300)).unwrap();
        write_chunk(&mut root, Tag::new("Tex"), |w| {
            write_chunk(w, Tag::new("Path"), |w| w.write_bytes(b"vfx/fire.atex\0"))
        })
        .unwrap();
        write_chunk(&mut root, Tag::new("Modl"), |w| {
            write_chunk(w, Tag::new("VDrw"), |w| w.write_bytes(&[1, 2, 3, 4, 5, 6]))
        })
        .unwrap();
        let payload = root.into_inner();

        let mut writer = ChunkWriter::new();
        write_chunk(&mut writer, ROOT_TAG, |w| w.write_bytes(&payload)).unwrap();
        writer.into_inner()
    }

    #[test]
    fn test_round_trip_model_and_texture() {
        let bytes = seed_bytes();
        let (doc, status) = Document::load(&bytes, true).unwrap();
        assert_eq!(status, VerifyStatus::Verified);
        assert_eq!(doc.group(NodeKind::Texture).len(), 1);
        assert_eq!(doc.group(NodeKind::Model).len(), 1);
        assert_eq!(doc.to_bytes().unwrap(), bytes);

        let tex = doc.nodes_of(NodeKind::Texture).next().unwrap();
        assert_eq!(
            doc.field(Owner::Node(tex.id), &path("Path")).unwrap().as_text(),
            Some("vfx/fire.atex")
        );
    }

    #[test]
    fn test_round_trip_keeps_unknown_root_chunk() {
        let bytes = seed_bytes();
        let mut payload = bytes[8..].to_vec();
        let mut extra = ChunkWriter::new();
        write_chunk(&mut extra, Tag::new("ZZZZ"), |w| w.write_bytes(&[9; 12])).unwrap();
        payload.splice(0..0, extra.into_inner());

        let mut writer = ChunkWriter::new();
        write_chunk(&mut writer, ROOT_TAG, |w| w.write_bytes(&payload)).unwrap();
        let bytes = writer.into_inner();
        let (_, status) = Document::load(&bytes, true).unwrap();
        assert_eq!(status, VerifyStatus::Verified);
    }

    #[test]
    fn test_interleaved_kinds_are_regrouped() {
        let mut root = ChunkWriter::new();
        for (tag, payload) in [("Tex", b"vfx/a.atex\0"), ("Modl", b"0123456789\0"), ("Tex", b"vfx/b.atex\0")] {
            let inner = if tag == "Tex" { "Path" } else { "VDrw" };
            write_chunk(&mut root, Tag::new(tag), |w| {
                write_chunk(w, Tag::new(inner), |w| w.write_bytes(payload))
            })
            .unwrap();
        }
        let payload = root.into_inner();
        let mut writer = ChunkWriter::new();
        write_chunk(&mut writer, ROOT_TAG, |w| w.write_bytes(&payload)).unwrap();
        let bytes = writer.into_inner();

        let (doc, status) = Document::load(&bytes, true).unwrap();
        assert!(matches!(status, VerifyStatus::Mismatch { .. }));
        assert_eq!(doc.group(NodeKind::Texture).len(), 2);
        let written = doc.to_bytes().unwrap();
        assert_eq!(written.len(), bytes.len());
        let (again, status) = Document::load(&written, true).unwrap();
        assert_eq!(status, VerifyStatus::Verified);
        assert_eq!(again.group(NodeKind::Model).len(), 1);
    }

    #[test]
    fn test_verify_reports_offset() {
        let bytes = seed_bytes();
        let mut doc = Document::from_bytes(&bytes).unwrap();
        doc.set_field(Owner::Root, &path("Ver"), Field::Int(IntField::new(1)))
            .unwrap();
        assert_eq!(doc.verify(&bytes), VerifyStatus::Mismatch { offset: 16 });
    }

    #[test]
    fn test_selectors_resolve_on_load() {
        let mut doc = Document::new();
        let a = doc.add_node(texture("a")).unwrap();
        let b = doc.add_node(texture("b")).unwrap();
        doc.add_node(particle(1)).unwrap();
        let bytes = doc.to_bytes().unwrap();

        let doc = Document::from_bytes(&bytes).unwrap();
        let ptcl = doc.nodes_of(NodeKind::Particle).next().unwrap();
        let target = doc.selected(ptcl.id, &path("TC1/TxNo")).unwrap().unwrap();
        assert_eq!(doc.node(target).unwrap().index(), 1);
        assert_eq!(doc.node(target).unwrap().backrefs(), &[ptcl.id]);
        assert_ne!(target, a);
        assert_ne!(target, b);
    }

    #[test]
    fn test_select_updates_links() {
        let mut doc = Document::new();
        let a = doc.add_node(texture("a")).unwrap();
        let b = doc.add_node(texture("b")).unwrap();
        let p = doc.add_node(particle(-1)).unwrap();
        doc.take_changed();

        assert_eq!(doc.select(p, &path("TC1/TxNo"), Some(b)).unwrap(), None);
        assert_eq!(doc.node(p).unwrap().children(), &[b]);
        assert_eq!(doc.node(b).unwrap().backrefs(), &[p]);
        assert_eq!(
            doc.field(Owner::Node(p), &path("TC1/TxNo")).unwrap().as_select().unwrap().index,
            1
        );

        assert_eq!(doc.select(p, &path("TC1/TxNo"), Some(a)).unwrap(), Some(b));
        assert!(doc.node(b).unwrap().backrefs().is_empty());
        assert_eq!(doc.take_changed(), vec![p]);
    }

    #[test]
    fn test_select_rejects_wrong_kind() {
        let mut doc = Document::new();
        let p = doc.add_node(particle(-1)).unwrap();
        let other = doc.add_node(particle(-1)).unwrap();
        assert!(matches!(
            doc.select(p, &path("TC1/TxNo"), Some(other)),
            Err(GraphError::KindMismatch { .. })
        ));
        assert!(matches!(
            doc.select(p, &path("PrVT"), None),
            Err(GraphError::NotASelector(_))
        ));
    }

    #[test]
    fn test_detach_renumbers_and_attach_restores() {
        let mut doc = Document::new();
        let a = doc.add_node(texture("a")).unwrap();
        let b = doc.add_node(texture("b")).unwrap();
        let p = doc.add_node(particle(-1)).unwrap();
        doc.select(p, &path("TC1/TxNo"), Some(b)).unwrap();

        let detached = doc.detach_node(a).unwrap();
        assert_eq!(detached.position, 0);
        assert!(detached.links.is_empty());
        assert_eq!(doc.node(b).unwrap().index(), 0);
        assert_eq!(
            doc.field(Owner::Node(p), &path("TC1/TxNo")).unwrap().as_select().unwrap().index,
            0
        );

        doc.attach_node(a, detached.position, &detached.links).unwrap();
        assert_eq!(doc.node(b).unwrap().index(), 1);
        assert_eq!(
            doc.field(Owner::Node(p), &path("TC1/TxNo")).unwrap().as_select().unwrap().index,
            1
        );
    }

    #[test]
    fn test_detach_unlinks_incoming() {
        let mut doc = Document::new();
        let a = doc.add_node(texture("a")).unwrap();
        let p = doc.add_node(particle(-1)).unwrap();
        doc.select(p, &path("TC1/TxNo"), Some(a)).unwrap();

        let detached = doc.detach_node(a).unwrap();
        assert_eq!(detached.links.len(), 1);
        assert_eq!(doc.selected(p, &path("TC1/TxNo")).unwrap(), None);
        assert!(doc.group(NodeKind::Texture).is_empty());
        assert!(matches!(doc.detach_node(a), Err(GraphError::NodeDetached(_))));

        doc.attach_node(a, detached.position, &detached.links).unwrap();
        assert_eq!(doc.selected(p, &path("TC1/TxNo")).unwrap(), Some(a));
        assert_eq!(doc.node(a).unwrap().backrefs(), &[p]);
    }

    #[test]
    fn test_set_field_rejects_selectors() {
        let mut doc = Document::new();
        let p = doc.add_node(particle(-1)).unwrap();
        assert!(matches!(
            doc.set_field(Owner::Node(p), &path("TC1/TxNo"), Field::Int(IntField::new(3))),
            Err(GraphError::SelectorField(_))
        ));
    }

    #[test]
    fn test_set_assigned_creates_field() {
        let mut doc = Document::new();
        let p = doc.add_node(particle(-1)).unwrap();
        let life = path("Life/Val");
        assert!(!doc.is_assigned(Owner::Node(p), &life).unwrap());
        let before = doc.set_assigned(Owner::Node(p), &life, true).unwrap();
        assert!(!before.is_assigned());
        assert!(doc.is_assigned(Owner::Node(p), &life).unwrap());
        assert!(doc.is_assigned(Owner::Node(p), &path("Life")).unwrap());

        doc.restore_assigned(Owner::Node(p), &life, &before).unwrap();
        assert!(!doc.is_assigned(Owner::Node(p), &path("Life")).unwrap());
    }

    #[test]
    fn test_set_node_assigned() {
        let mut doc = Document::new();
        let t = doc.add_node(texture("a")).unwrap();
        assert!(doc.set_node_assigned(t, false).unwrap());
        assert!(!doc.node(t).unwrap().is_assigned());
        let mut empty = Tag::new("Tex").wire().to_vec();
        empty.extend_from_slice(&0i32.to_le_bytes());
        assert_eq!(doc.node_bytes(t).unwrap(), empty);
        assert_eq!(doc.take_changed(), vec![t]);
    }

    #[test]
    fn test_remove_and_insert_entry() {
        let mut doc = Document::new();
        let a = doc.add_node(texture("a")).unwrap();
        let p = doc.add_node(particle(-1)).unwrap();
        doc.select(p, &path("TC1/TxNo"), Some(a)).unwrap();

        let removed = doc.remove_entry(Owner::Node(p), &path("TC1")).unwrap();
        assert_eq!(removed.targets, vec![(path("TC1/TxNo"), a)]);
        assert!(doc.node(a).unwrap().backrefs().is_empty());
        assert!(doc.node(p).unwrap().selectors().is_empty());

        let at = doc.insert_entry(Owner::Node(p), removed).unwrap();
        assert_eq!(at, path("TC1"));
        assert_eq!(doc.selected(p, &path("TC1/TxNo")).unwrap(), Some(a));
        assert_eq!(doc.node(a).unwrap().backrefs(), &[p]);
    }

    #[test]
    fn test_rename() {
        let mut doc = Document::new();
        let a = doc.add_node(texture("a")).unwrap();
        assert_eq!(doc.rename(a, Some("Fire".into())).unwrap(), None);
        assert_eq!(doc.node(a).unwrap().name(), Some("Fire"));
        assert_eq!(doc.rename(a, None).unwrap(), Some("Fire".into()));
    }

    #[test]
    fn test_truncated_root_is_error() {
        let bytes = seed_bytes();
        assert!(Document::from_bytes(&bytes[..bytes.len() - 6]).is_err());
    }
}
