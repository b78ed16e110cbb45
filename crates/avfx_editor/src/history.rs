// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undo/redo history of executed commands.
//!
//! One undo stack and one redo stack per document. Executing a command
//! clears the redo stack; the undo stack is bounded and drops its oldest
//! entries first.

use crate::commands::{Command, CommandError};
use avfx_graph::Document;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Default maximum undo history depth
pub const MAX_HISTORY: usize = 100;

/// History errors
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Nothing to undo
    #[error("Nothing to undo")]
    NothingToUndo,

    /// Nothing to redo
    #[error("Nothing to redo")]
    NothingToRedo,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, HistoryError>;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Opaque serialized state, used by commands that restore a whole subtree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Serialized state
    pub data: Vec<u8>,
    /// Timestamp when snapshot was taken
    pub timestamp: u64,
    /// Size in bytes
    pub size: usize,
}

impl StateSnapshot {
    /// Create a new state snapshot
    pub fn new(data: Vec<u8>) -> Self {
        let size = data.len();
        Self {
            data,
            timestamp: now_secs(),
            size,
        }
    }

    /// Create from serializable value
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self> {
        let data = bincode::serialize(value)?;
        Ok(Self::new(data))
    }

    /// Deserialize to value
    pub fn to_value<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.data)?)
    }
}

/// History statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Commands in undo stack
    pub undo_count: usize,
    /// Commands in redo stack
    pub redo_count: usize,
    /// Bytes held by command snapshots
    pub memory_used: usize,
    /// Maximum history depth
    pub max_depth: usize,
}

#[derive(Debug)]
struct Record {
    command: Box<dyn Command>,
    timestamp: u64,
}

/// Undo/redo history manager
#[derive(Debug)]
pub struct History {
    undo_stack: VecDeque<Record>,
    redo_stack: VecDeque<Record>,
    max_depth: usize,
}

impl History {
    /// Create a new history manager
    pub fn new() -> Self {
        Self::with_max_depth(MAX_HISTORY)
    }

    /// Create with custom maximum depth
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Execute a command and record it
    pub fn execute(&mut self, doc: &mut Document, mut command: Box<dyn Command>) -> std::result::Result<(), CommandError> {
        command.execute(doc)?;
        tracing::debug!(command = command.description(), "executed");
        self.push_executed(command);
        Ok(())
    }

    /// Record a command whose effect has already been applied
    pub fn push_executed(&mut self, command: Box<dyn Command>) {
        self.redo_stack.clear();
        self.undo_stack.push_back(Record {
            command,
            timestamp: now_secs(),
        });

        while self.undo_stack.len() > self.max_depth {
            if let Some(old) = self.undo_stack.pop_front() {
                tracing::trace!(command = old.command.description(), "dropped from history");
            }
        }
    }

    /// Undo the last command
    pub fn undo(&mut self, doc: &mut Document) -> std::result::Result<(), CommandError> {
        let mut record = self.undo_stack.pop_back().ok_or(HistoryError::NothingToUndo)?;
        if let Err(err) = record.command.undo(doc) {
            self.undo_stack.push_back(record);
            return Err(err);
        }
        tracing::debug!(command = record.command.description(), "undone");
        self.redo_stack.push_back(record);
        Ok(())
    }

    /// Redo the last undone command
    pub fn redo(&mut self, doc: &mut Document) -> std::result::Result<(), CommandError> {
        let mut record = self.redo_stack.pop_back().ok_or(HistoryError::NothingToRedo)?;
        if let Err(err) = record.command.redo(doc) {
            self.redo_stack.push_back(record);
            return Err(err);
        }
        tracing::debug!(command = record.command.description(), "redone");
        self.undo_stack.push_back(record);
        Ok(())
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Get undo stack depth
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Get redo stack depth
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Maximum number of undo steps kept
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Get history statistics
    pub fn stats(&self) -> HistoryStats {
        let memory_used = self
            .undo_stack
            .iter()
            .chain(&self.redo_stack)
            .map(|r| r.command.memory_size())
            .sum();
        HistoryStats {
            undo_count: self.undo_stack.len(),
            redo_count: self.redo_stack.len(),
            memory_used,
            max_depth: self.max_depth,
        }
    }

    /// Time the next undo step was recorded
    pub fn undo_timestamp(&self) -> Option<u64> {
        self.undo_stack.back().map(|r| r.timestamp)
    }

    /// Get description of next undo operation
    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.back().map(|r| r.command.description())
    }

    /// Get description of next redo operation
    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.back().map(|r| r.command.description())
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{RenameCommand, SetFieldCommand};
    use avfx_format::{Block, Field, FieldPath, IntField, NodeKind};
    use avfx_graph::{Node, Owner};

    fn doc_with_particle() -> (Document, avfx_graph::NodeId) {
        let mut doc = Document::new();
        let id = doc.add_node(Node::new(NodeKind::Particle, Block::new())).unwrap();
        (doc, id)
    }

    fn set_type(id: avfx_graph::NodeId, value: i32) -> Box<dyn Command> {
        Box::new(SetFieldCommand::new(
            Owner::Node(id),
            FieldPath::parse("PrVT").unwrap(),
            Field::Int(IntField::new(value)),
        ))
    }

    fn read_type(doc: &Document, id: avfx_graph::NodeId) -> Option<i32> {
        doc.field(Owner::Node(id), &FieldPath::parse("PrVT").unwrap())
            .ok()
            .and_then(Field::as_int)
    }

    #[test]
    fn test_undo_redo_symmetry() {
        let (mut doc, id) = doc_with_particle();
        let mut history = History::new();
        for value in 1..=5 {
            history.execute(&mut doc, set_type(id, value)).unwrap();
        }
        assert_eq!(read_type(&doc, id), Some(5));

        for _ in 0..5 {
            history.undo(&mut doc).unwrap();
        }
        assert_eq!(read_type(&doc, id), Some(0));
        assert!(!history.can_undo());

        for _ in 0..5 {
            history.redo(&mut doc).unwrap();
        }
        assert_eq!(read_type(&doc, id), Some(5));
        assert!(!history.can_redo());
    }

    #[test]
    fn test_execute_clears_redo() {
        let (mut doc, id) = doc_with_particle();
        let mut history = History::new();
        history.execute(&mut doc, set_type(id, 1)).unwrap();
        history.undo(&mut doc).unwrap();
        assert!(history.can_redo());

        history.execute(&mut doc, set_type(id, 2)).unwrap();
        assert!(!history.can_redo());
        assert!(matches!(
            history.redo(&mut doc),
            Err(CommandError::History(HistoryError::NothingToRedo))
        ));
    }

    #[test]
    fn test_depth_is_bounded() {
        let (mut doc, id) = doc_with_particle();
        let mut history = History::with_max_depth(3);
        for value in 1..=10 {
            history.execute(&mut doc, set_type(id, value)).unwrap();
        }
        assert_eq!(history.undo_depth(), 3);
        for _ in 0..3 {
            history.undo(&mut doc).unwrap();
        }
        assert_eq!(read_type(&doc, id), Some(7));
        assert!(matches!(
            history.undo(&mut doc),
            Err(CommandError::History(HistoryError::NothingToUndo))
        ));
    }

    #[test]
    fn test_descriptions() {
        let (mut doc, id) = doc_with_particle();
        let mut history = History::new();
        assert_eq!(history.undo_description(), None);
        history
            .execute(&mut doc, Box::new(RenameCommand::new(id, Some("Sparks".into()))))
            .unwrap();
        assert_eq!(history.undo_description(), Some("Rename"));
        history.undo(&mut doc).unwrap();
        assert_eq!(history.redo_description(), Some("Rename"));
        assert_eq!(history.stats().redo_count, 1);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let field = Field::Int(IntField::new(42));
        let snapshot = StateSnapshot::from_value(&field).unwrap();
        assert_eq!(snapshot.size, snapshot.data.len());
        assert_eq!(snapshot.to_value::<Field>().unwrap(), field);
    }
}
