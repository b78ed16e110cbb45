// SPDX-License-Identifier: MIT OR Apache-2.0
//! Notifications sent to whatever presents the document.

use avfx_graph::NodeId;
use parking_lot::Mutex;
use std::sync::Arc;

/// Receiver of editor notifications. Both hooks default to doing nothing.
pub trait EditorEvents {
    /// A node's fields, name, index or selectors changed
    fn node_changed(&mut self, _id: NodeId) {}

    /// The undo/redo stacks changed
    fn command_stack_changed(&mut self, _can_undo: bool, _can_redo: bool) {}
}

/// Ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl EditorEvents for NoopEvents {}

/// What a [`RecordingEvents`] has seen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLog {
    /// Changed nodes, in notification order
    pub changed: Vec<NodeId>,
    /// `(can_undo, can_redo)` after each stack change
    pub stack: Vec<(bool, bool)>,
}

impl EventLog {
    /// Forget everything recorded so far
    pub fn clear(&mut self) {
        self.changed.clear();
        self.stack.clear();
    }
}

/// Records notifications into a log that stays readable after the
/// recorder is handed to a session
#[derive(Debug, Clone, Default)]
pub struct RecordingEvents {
    log: Arc<Mutex<EventLog>>,
}

impl RecordingEvents {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the log
    pub fn snapshot(&self) -> EventLog {
        self.log.lock().clone()
    }

    /// Clear the log
    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl EditorEvents for RecordingEvents {
    fn node_changed(&mut self, id: NodeId) {
        self.log.lock().changed.push(id);
    }

    fn command_stack_changed(&mut self, can_undo: bool, can_redo: bool) {
        self.log.lock().stack.push((can_undo, can_redo));
    }
}
