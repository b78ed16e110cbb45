// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editor commands for undo/redo support.
//!
//! Commands hold node handles and field paths, never the nodes themselves.
//! Each captures what it replaced on execute so undo can put it back.

use crate::history::{HistoryError, StateSnapshot};
use avfx_format::{AssignState, Entry, Field, FieldPath};
use avfx_graph::{Detached, Document, GraphError, Node, NodeId, Owner, RemovedEntry};
use std::fmt;

/// Trait for editor commands that can be undone/redone
pub trait Command: fmt::Debug {
    /// Get a description of this command
    fn description(&self) -> &str;

    /// Apply the command
    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError>;

    /// Revert the command
    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError>;

    /// Apply the command again after an undo
    fn redo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.execute(doc)
    }

    /// Bytes held for undo, for history statistics
    fn memory_size(&self) -> usize {
        0
    }
}

/// Error type for command execution
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// History error
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// Document error
    #[error("Document error: {0}")]
    Graph(#[from] GraphError),

    /// Undo called before execute
    #[error("Command was never executed: {0}")]
    NotExecuted(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

fn not_executed(command: &dyn Command) -> CommandError {
    CommandError::NotExecuted(command.description().to_string())
}

/// Toggle whether a field is written
#[derive(Debug, Clone)]
pub struct AssignCommand {
    owner: Owner,
    path: FieldPath,
    assigned: bool,
    previous: Option<AssignState>,
}

impl AssignCommand {
    /// Create a new assign command
    pub fn new(owner: Owner, path: FieldPath, assigned: bool) -> Self {
        Self {
            owner,
            path,
            assigned,
            previous: None,
        }
    }
}

impl Command for AssignCommand {
    fn description(&self) -> &str {
        if self.assigned {
            "Assign"
        } else {
            "Unassign"
        }
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.previous = Some(doc.set_assigned(self.owner, &self.path, self.assigned)?);
        Ok(())
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        let previous = self.previous.as_ref().ok_or_else(|| not_executed(self))?;
        doc.restore_assigned(self.owner, &self.path, previous)?;
        Ok(())
    }
}

/// Toggle whether a whole node body is written
#[derive(Debug, Clone)]
pub struct AssignNodeCommand {
    node: NodeId,
    assigned: bool,
    previous: Option<bool>,
}

impl AssignNodeCommand {
    /// Create a new node assign command
    pub fn new(node: NodeId, assigned: bool) -> Self {
        Self {
            node,
            assigned,
            previous: None,
        }
    }
}

impl Command for AssignNodeCommand {
    fn description(&self) -> &str {
        if self.assigned {
            "Assign Node"
        } else {
            "Unassign Node"
        }
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.previous = Some(doc.set_node_assigned(self.node, self.assigned)?);
        Ok(())
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        let previous = self.previous.ok_or_else(|| not_executed(self))?;
        doc.set_node_assigned(self.node, previous)?;
        Ok(())
    }
}

/// Replace the value of one field
#[derive(Debug, Clone)]
pub struct SetFieldCommand {
    owner: Owner,
    path: FieldPath,
    value: Field,
    previous: Option<Field>,
}

impl SetFieldCommand {
    /// Create a new set-field command
    pub fn new(owner: Owner, path: FieldPath, value: Field) -> Self {
        Self {
            owner,
            path,
            value,
            previous: None,
        }
    }
}

impl Command for SetFieldCommand {
    fn description(&self) -> &str {
        "Edit Field"
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.previous = Some(doc.set_field(self.owner, &self.path, self.value.clone())?);
        Ok(())
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        let previous = self.previous.clone().ok_or_else(|| not_executed(self))?;
        doc.set_field(self.owner, &self.path, previous)?;
        Ok(())
    }
}

/// Point a selector at another node, or unlink it
#[derive(Debug, Clone)]
pub struct SelectCommand {
    owner: NodeId,
    path: FieldPath,
    target: Option<NodeId>,
    previous: Option<(Option<NodeId>, AssignState)>,
}

impl SelectCommand {
    /// Create a new select command
    pub fn new(owner: NodeId, path: FieldPath, target: Option<NodeId>) -> Self {
        Self {
            owner,
            path,
            target,
            previous: None,
        }
    }
}

impl Command for SelectCommand {
    fn description(&self) -> &str {
        "Select"
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        let state = doc.assign_state(Owner::Node(self.owner), &self.path)?;
        let target = doc.select(self.owner, &self.path, self.target)?;
        self.previous = Some((target, state));
        Ok(())
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        let (target, state) = self.previous.clone().ok_or_else(|| not_executed(self))?;
        doc.select(self.owner, &self.path, target)?;
        doc.restore_assigned(Owner::Node(self.owner), &self.path, &state)?;
        Ok(())
    }
}

/// Set or clear a node's rename override
#[derive(Debug, Clone)]
pub struct RenameCommand {
    node: NodeId,
    name: Option<String>,
    previous: Option<Option<String>>,
}

impl RenameCommand {
    /// Create a new rename command; `None` or an empty name clears the override
    pub fn new(node: NodeId, name: Option<String>) -> Self {
        Self {
            node,
            name: name.filter(|n| !n.is_empty()),
            previous: None,
        }
    }
}

impl Command for RenameCommand {
    fn description(&self) -> &str {
        "Rename"
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.previous = Some(doc.rename(self.node, self.name.clone())?);
        Ok(())
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        let previous = self.previous.clone().ok_or_else(|| not_executed(self))?;
        doc.rename(self.node, previous)?;
        Ok(())
    }
}

/// Add a new node at the end of its group
#[derive(Debug)]
pub struct AddNodeCommand {
    id: NodeId,
    pending: Option<Node>,
    position: usize,
}

impl AddNodeCommand {
    /// Create a new add command
    pub fn new(node: Node) -> Self {
        Self {
            id: node.id,
            pending: Some(node),
            position: 0,
        }
    }

    /// Handle of the node being added
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl Command for AddNodeCommand {
    fn description(&self) -> &str {
        "Add Node"
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        match self.pending.take() {
            Some(node) => {
                doc.add_node(node)?;
            }
            None => doc.attach_node(self.id, self.position, &[])?,
        }
        Ok(())
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        if self.pending.is_some() {
            return Err(not_executed(self));
        }
        self.position = doc.detach_node(self.id)?.position;
        Ok(())
    }
}

/// Remove a node; undo restores it and every selector that pointed at it
#[derive(Debug, Clone)]
pub struct RemoveNodeCommand {
    node: NodeId,
    detached: Option<Detached>,
}

impl RemoveNodeCommand {
    /// Create a new remove command
    pub fn new(node: NodeId) -> Self {
        Self { node, detached: None }
    }
}

impl Command for RemoveNodeCommand {
    fn description(&self) -> &str {
        "Remove Node"
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.detached = Some(doc.detach_node(self.node)?);
        Ok(())
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        let detached = self.detached.take().ok_or_else(|| not_executed(self))?;
        doc.attach_node(self.node, detached.position, &detached.links)?;
        Ok(())
    }
}

/// Restore nodes that were imported outside of a command
#[derive(Debug, Clone)]
pub struct ImportNodesCommand {
    nodes: Vec<NodeId>,
    detached: Vec<Detached>,
}

impl ImportNodesCommand {
    /// Wrap nodes that are already attached
    pub fn new(nodes: Vec<NodeId>) -> Self {
        Self {
            nodes,
            detached: Vec::new(),
        }
    }
}

impl Command for ImportNodesCommand {
    fn description(&self) -> &str {
        "Import"
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        let detached = std::mem::take(&mut self.detached);
        for (id, detached) in self.nodes.iter().zip(detached.into_iter().rev()) {
            doc.attach_node(*id, detached.position, &detached.links)?;
        }
        Ok(())
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.detached.clear();
        for id in self.nodes.iter().rev() {
            self.detached.push(doc.detach_node(*id)?);
        }
        Ok(())
    }
}

/// Remove an entry from a list (e.g. a timeline item)
#[derive(Debug, Clone)]
pub struct RemoveEntryCommand {
    owner: Owner,
    path: FieldPath,
    removed: Option<RemovedEntry>,
}

impl RemoveEntryCommand {
    /// Create a new remove-entry command
    pub fn new(owner: Owner, path: FieldPath) -> Self {
        Self {
            owner,
            path,
            removed: None,
        }
    }
}

impl Command for RemoveEntryCommand {
    fn description(&self) -> &str {
        "Remove Item"
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.removed = Some(doc.remove_entry(self.owner, &self.path)?);
        Ok(())
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        let removed = self.removed.take().ok_or_else(|| not_executed(self))?;
        doc.insert_entry(self.owner, removed)?;
        Ok(())
    }
}

/// Insert an entry into a list (e.g. a new timeline item)
#[derive(Debug, Clone)]
pub struct InsertEntryCommand {
    owner: Owner,
    pending: Option<RemovedEntry>,
    inserted: Option<FieldPath>,
}

impl InsertEntryCommand {
    /// Insert `entry` at sibling `position` of the block at `parent`
    pub fn new(owner: Owner, parent: FieldPath, position: usize, entry: Entry) -> Self {
        Self {
            owner,
            pending: Some(RemovedEntry::new(parent, position, entry)),
            inserted: None,
        }
    }
}

impl Command for InsertEntryCommand {
    fn description(&self) -> &str {
        "Add Item"
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| CommandError::InvalidOperation("entry already inserted".to_string()))?;
        self.inserted = Some(doc.insert_entry(self.owner, pending)?);
        Ok(())
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        let inserted = self.inserted.take().ok_or_else(|| not_executed(self))?;
        self.pending = Some(doc.remove_entry(self.owner, &inserted)?);
        Ok(())
    }
}

/// Bulk edit of one field subtree, stored as before/after snapshots
#[derive(Debug, Clone)]
pub struct StateCommand {
    owner: Owner,
    path: FieldPath,
    description: String,
    before: StateSnapshot,
    after: StateSnapshot,
}

impl StateCommand {
    /// Create from the state before and after the edit
    pub fn new(
        owner: Owner,
        path: FieldPath,
        before: &Field,
        after: &Field,
        description: impl Into<String>,
    ) -> Result<Self, CommandError> {
        Ok(Self {
            owner,
            path,
            description: description.into(),
            before: StateSnapshot::from_value(before)?,
            after: StateSnapshot::from_value(after)?,
        })
    }

    /// Capture the current value at `path`, apply `edit` to a copy and
    /// build a command that switches between the two
    pub fn edit(
        doc: &Document,
        owner: Owner,
        path: FieldPath,
        description: impl Into<String>,
        edit: impl FnOnce(&mut Field),
    ) -> Result<Self, CommandError> {
        let before = doc.field(owner, &path)?.clone();
        let mut after = before.clone();
        edit(&mut after);
        Self::new(owner, path, &before, &after, description)
    }

    fn apply(&self, doc: &mut Document, snapshot: &StateSnapshot) -> Result<(), CommandError> {
        let field: Field = snapshot.to_value()?;
        doc.set_field(self.owner, &self.path, field)?;
        Ok(())
    }
}

impl Command for StateCommand {
    fn description(&self) -> &str {
        &self.description
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.apply(doc, &self.after)
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.apply(doc, &self.before)
    }

    fn memory_size(&self) -> usize {
        self.before.size + self.after.size
    }
}

/// Several commands undone and redone as one step
#[derive(Debug)]
pub struct CompositeCommand {
    description: String,
    commands: Vec<Box<dyn Command>>,
}

impl CompositeCommand {
    /// Create an empty composite
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            commands: Vec::new(),
        }
    }

    /// Add a command
    pub fn with(mut self, command: impl Command + 'static) -> Self {
        self.commands.push(Box::new(command));
        self
    }

    /// Add a boxed command
    pub fn push(&mut self, command: Box<dyn Command>) {
        self.commands.push(command);
    }

    /// Whether the composite holds no commands
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn run_forward(&mut self, doc: &mut Document, redo: bool) -> Result<(), CommandError> {
        for i in 0..self.commands.len() {
            let result = if redo {
                self.commands[i].redo(doc)
            } else {
                self.commands[i].execute(doc)
            };
            if let Err(err) = result {
                for done in self.commands[..i].iter_mut().rev() {
                    if let Err(rollback) = done.undo(doc) {
                        tracing::error!("Rollback of {} failed: {rollback}", done.description());
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Command for CompositeCommand {
    fn description(&self) -> &str {
        &self.description
    }

    fn execute(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.run_forward(doc, false)
    }

    fn undo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        for command in self.commands.iter_mut().rev() {
            command.undo(doc)?;
        }
        Ok(())
    }

    fn redo(&mut self, doc: &mut Document) -> Result<(), CommandError> {
        self.run_forward(doc, true)
    }

    fn memory_size(&self) -> usize {
        self.commands.iter().map(|c| c.memory_size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avfx_format::{Block, CurveKey, IntField, KeyType, NodeKind, SelectField, Tag};

    fn path(text: &str) -> FieldPath {
        FieldPath::parse(text).unwrap()
    }

    fn timeline_item(emitter: i32) -> Field {
        let mut item = Block::new();
        item.push(
            Tag::new("EmNo"),
            Field::Select(SelectField {
                kind: NodeKind::Emitter,
                index: emitter,
            }),
        );
        Field::Block(item)
    }

    fn setup() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let e0 = doc.add_node(Node::new(NodeKind::Emitter, Block::new())).unwrap();
        let e1 = doc.add_node(Node::new(NodeKind::Emitter, Block::new())).unwrap();
        let mut body = Block::new();
        body.push(Tag::new("Item"), timeline_item(-1));
        body.push(Tag::new("Item"), timeline_item(-1));
        let tl = doc.add_node(Node::new(NodeKind::Timeline, body)).unwrap();
        doc.select(tl, &path("Item/EmNo"), Some(e0)).unwrap();
        doc.select(tl, &path("Item#1/EmNo"), Some(e1)).unwrap();
        (doc, tl, e0, e1)
    }

    #[test]
    fn test_assign_command() {
        let (mut doc, tl, _, _) = setup();
        let owner = Owner::Node(tl);
        let mut command = AssignCommand::new(owner, path("bLp"), true);
        command.execute(&mut doc).unwrap();
        assert!(doc.is_assigned(owner, &path("bLp")).unwrap());
        command.undo(&mut doc).unwrap();
        assert!(!doc.is_assigned(owner, &path("bLp")).unwrap());
    }

    #[test]
    fn test_assign_node_command() {
        let (mut doc, _, e0, _) = setup();
        let before = doc.node_bytes(e0).unwrap();
        let mut command = AssignNodeCommand::new(e0, false);
        command.execute(&mut doc).unwrap();
        assert_eq!(command.description(), "Unassign Node");
        assert!(!doc.node(e0).unwrap().is_assigned());
        assert_eq!(doc.node_bytes(e0).unwrap().len(), 8);

        command.undo(&mut doc).unwrap();
        assert_eq!(doc.node_bytes(e0).unwrap(), before);
    }

    #[test]
    fn test_undo_before_execute_fails() {
        let (mut doc, tl, _, _) = setup();
        let mut command = RenameCommand::new(tl, Some("Main".into()));
        assert!(matches!(command.undo(&mut doc), Err(CommandError::NotExecuted(_))));
    }

    #[test]
    fn test_select_command_restores_previous() {
        let (mut doc, tl, e0, e1) = setup();
        let mut command = SelectCommand::new(tl, path("Item/EmNo"), Some(e1));
        command.execute(&mut doc).unwrap();
        assert!(doc.node(e0).unwrap().backrefs().is_empty());
        assert_eq!(doc.node(tl).unwrap().children(), &[e1]);

        command.undo(&mut doc).unwrap();
        assert_eq!(doc.selected(tl, &path("Item/EmNo")).unwrap(), Some(e0));
        assert_eq!(doc.node(tl).unwrap().children(), &[e0, e1]);
    }

    #[test]
    fn test_remove_node_restores_selectors() {
        let (mut doc, tl, e0, e1) = setup();
        let mut command = RemoveNodeCommand::new(e0);
        command.execute(&mut doc).unwrap();
        assert_eq!(doc.selected(tl, &path("Item/EmNo")).unwrap(), None);
        assert_eq!(doc.node(e1).unwrap().index(), 0);
        assert_eq!(
            doc.field(Owner::Node(tl), &path("Item#1/EmNo")).unwrap().as_select().unwrap().index,
            0
        );

        command.undo(&mut doc).unwrap();
        assert_eq!(doc.selected(tl, &path("Item/EmNo")).unwrap(), Some(e0));
        assert_eq!(doc.node(e1).unwrap().index(), 1);
        assert_eq!(
            doc.field(Owner::Node(tl), &path("Item#1/EmNo")).unwrap().as_select().unwrap().index,
            1
        );

        command.redo(&mut doc).unwrap();
        assert!(!doc.node(e0).unwrap().is_attached());
    }

    #[test]
    fn test_add_node_undo_redo() {
        let (mut doc, _, _, _) = setup();
        let mut command = AddNodeCommand::new(Node::new(NodeKind::Texture, Block::new()));
        let id = command.id();
        command.execute(&mut doc).unwrap();
        assert_eq!(doc.group(NodeKind::Texture).index_of(id), Some(0));
        command.undo(&mut doc).unwrap();
        assert!(doc.group(NodeKind::Texture).is_empty());
        command.redo(&mut doc).unwrap();
        assert_eq!(doc.group(NodeKind::Texture).index_of(id), Some(0));
    }

    #[test]
    fn test_remove_entry_shifts_and_restores() {
        let (mut doc, tl, e0, e1) = setup();
        let mut command = RemoveEntryCommand::new(Owner::Node(tl), path("Item"));
        command.execute(&mut doc).unwrap();
        assert_eq!(doc.selected(tl, &path("Item/EmNo")).unwrap(), Some(e1));
        assert!(doc.node(e0).unwrap().backrefs().is_empty());

        command.undo(&mut doc).unwrap();
        assert_eq!(doc.selected(tl, &path("Item/EmNo")).unwrap(), Some(e0));
        assert_eq!(doc.selected(tl, &path("Item#1/EmNo")).unwrap(), Some(e1));
    }

    #[test]
    fn test_insert_entry_command() {
        let (mut doc, tl, _, e1) = setup();
        let entry = Entry::new(Tag::new("Item"), timeline_item(-1));
        let mut command = InsertEntryCommand::new(Owner::Node(tl), FieldPath::root(), 2, entry);
        command.execute(&mut doc).unwrap();
        assert_eq!(doc.selected(tl, &path("Item#2/EmNo")).unwrap(), None);

        SelectCommand::new(tl, path("Item#2/EmNo"), Some(e1))
            .execute(&mut doc)
            .unwrap();
        command.undo(&mut doc).unwrap();
        assert!(doc.entry(Owner::Node(tl), &path("Item#2")).is_err());
        command.redo(&mut doc).unwrap();
        assert_eq!(doc.selected(tl, &path("Item#2/EmNo")).unwrap(), Some(e1));
    }

    #[test]
    fn test_state_command_curve_edit() {
        let (mut doc, _, emitter, _) = setup();
        let owner = Owner::Node(emitter);
        doc.set_field(owner, &path("Col/Keys"), Field::Curve(Vec::new())).unwrap();

        let mut command = StateCommand::edit(&doc, owner, path("Col/Keys"), "Edit Curve", |field| {
            if let Field::Curve(keys) = field {
                keys.push(CurveKey::new(0, KeyType::Linear, [1.0, 1.0, 1.0]));
                keys.push(CurveKey::new(30, KeyType::Spline, [0.0, 0.0, 0.0]));
            }
        })
        .unwrap();
        command.execute(&mut doc).unwrap();
        assert!(matches!(doc.field(owner, &path("Col/Keys")).unwrap(), Field::Curve(k) if k.len() == 2));
        assert!(command.memory_size() > 0);

        command.undo(&mut doc).unwrap();
        assert!(matches!(doc.field(owner, &path("Col/Keys")).unwrap(), Field::Curve(k) if k.is_empty()));
    }

    #[test]
    fn test_composite_rolls_back_on_failure() {
        let (mut doc, tl, _, _) = setup();
        let owner = Owner::Node(tl);
        let mut composite = CompositeCommand::new("Batch")
            .with(SetFieldCommand::new(owner, path("LpSt"), Field::Int(IntField::new(5))))
            .with(SetFieldCommand::new(owner, path("Item/EmNo"), Field::Int(IntField::new(1))));

        assert!(composite.execute(&mut doc).is_err());
        assert_eq!(doc.field(owner, &path("LpSt")).unwrap().as_int(), Some(0));
    }

    #[test]
    fn test_composite_undo_in_reverse() {
        let (mut doc, tl, _, _) = setup();
        let owner = Owner::Node(tl);
        let mut composite = CompositeCommand::new("Batch")
            .with(SetFieldCommand::new(owner, path("LpSt"), Field::Int(IntField::new(5))))
            .with(SetFieldCommand::new(owner, path("LpSt"), Field::Int(IntField::new(9))));
        composite.execute(&mut doc).unwrap();
        assert_eq!(doc.field(owner, &path("LpSt")).unwrap().as_int(), Some(9));
        composite.undo(&mut doc).unwrap();
        assert_eq!(doc.field(owner, &path("LpSt")).unwrap().as_int(), Some(0));
    }
}
