// SPDX-License-Identifier: MIT OR Apache-2.0
//! One open effect document with its undo history.
//!
//! Every mutation that should be undoable goes through [`EditorSession::execute`].
//! After each execute, undo, redo and import the session flushes the
//! document's change list to its [`EditorEvents`] and reports the new state
//! of the command stacks.

use crate::commands::{Command, CommandError, ImportNodesCommand};
use crate::config::EditorConfig;
use crate::events::{EditorEvents, NoopEvents};
use crate::exchange::{self, ExchangeError, ExchangeFormat, ImportReport};
use crate::history::History;
use crate::io::{ByteSink, ByteSource};
use avfx_format::NodeKind;
use avfx_graph::{Document, GraphError, NodeId, VerifyStatus};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// File could not be read or written
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Document error
    #[error("Document error: {0}")]
    Graph(#[from] GraphError),

    /// Command error
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Export or import error
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SessionError + '_ {
    move |source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// An open document
pub struct EditorSession {
    document: Document,
    history: History,
    verify: VerifyStatus,
    events: Box<dyn EditorEvents>,
    path: Option<PathBuf>,
    dirty: bool,
}

impl fmt::Debug for EditorSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorSession")
            .field("path", &self.path)
            .field("nodes", &self.document.node_count())
            .field("verify", &self.verify)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl Default for EditorSession {
    fn default() -> Self {
        Self::new(Document::new())
    }
}

impl EditorSession {
    /// Wrap a document
    pub fn new(document: Document) -> Self {
        Self {
            document,
            history: History::new(),
            verify: VerifyStatus::Unchecked,
            events: Box::new(NoopEvents),
            path: None,
            dirty: false,
        }
    }

    /// Decode a document, optionally verifying that it re-encodes exactly
    pub fn from_bytes(bytes: &[u8], verify: bool) -> Result<Self> {
        let (document, status) = Document::load(bytes, verify)?;
        let mut session = Self::new(document);
        session.verify = status;
        Ok(session)
    }

    /// Open an effect file using the settings in `config`
    pub fn open(source: &dyn ByteSource, path: &Path, config: &EditorConfig) -> Result<Self> {
        let bytes = source.read_bytes(path).map_err(io_error(path))?;
        let mut session = Self::from_bytes(&bytes, config.verify_on_load)?;
        session.history = History::with_max_depth(config.history_depth);
        session.path = Some(path.to_path_buf());
        tracing::info!(path = %path.display(), verify = ?session.verify, "opened effect");
        Ok(session)
    }

    /// Replace the notification receiver
    pub fn set_events(&mut self, events: Box<dyn EditorEvents>) {
        self.events = events;
    }

    /// Builder form of [`Self::set_events`]
    pub fn with_events(mut self, events: impl EditorEvents + 'static) -> Self {
        self.events = Box::new(events);
        self
    }

    /// The document
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The undo history
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Outcome of the load-time verification
    pub fn verify_status(&self) -> VerifyStatus {
        self.verify
    }

    /// File the session was opened from or last saved to
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether there are changes since the last save
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Execute a command and record it for undo
    pub fn execute(&mut self, command: impl Command + 'static) -> Result<()> {
        self.execute_boxed(Box::new(command))
    }

    /// Execute a boxed command and record it for undo
    pub fn execute_boxed(&mut self, command: Box<dyn Command>) -> Result<()> {
        let result = self.history.execute(&mut self.document, command);
        self.notify();
        result?;
        self.dirty = true;
        Ok(())
    }

    /// Undo the last command
    pub fn undo(&mut self) -> Result<()> {
        let result = self.history.undo(&mut self.document);
        self.notify();
        result?;
        self.dirty = true;
        Ok(())
    }

    /// Redo the last undone command
    pub fn redo(&mut self) -> Result<()> {
        let result = self.history.redo(&mut self.document);
        self.notify();
        result?;
        self.dirty = true;
        Ok(())
    }

    fn notify(&mut self) {
        for id in self.document.take_changed() {
            self.events.node_changed(id);
        }
        self.events
            .command_stack_changed(self.history.can_undo(), self.history.can_redo());
    }

    /// Encode the document
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.document.to_bytes()?)
    }

    /// Write the document to `path`
    pub fn save(&mut self, sink: &dyn ByteSink, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        sink.write_bytes(path, &bytes).map_err(io_error(path))?;
        self.path = Some(path.to_path_buf());
        self.dirty = false;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "saved effect");
        Ok(())
    }

    /// Export `roots` in the current exchange format
    pub fn export(&mut self, roots: &[NodeId], with_dependencies: bool) -> Result<Vec<u8>> {
        Ok(exchange::export_nodes(&mut self.document, roots, with_dependencies)?)
    }

    /// Export `roots` to a file
    pub fn export_to(
        &mut self,
        sink: &dyn ByteSink,
        path: &Path,
        roots: &[NodeId],
        with_dependencies: bool,
    ) -> Result<()> {
        let bytes = self.export(roots, with_dependencies)?;
        sink.write_bytes(path, &bytes).map_err(io_error(path))
    }

    /// Import exchange data. The imported nodes form one undo step.
    pub fn import(&mut self, bytes: &[u8], format: ExchangeFormat) -> Result<ImportReport> {
        let report = exchange::import_bytes(&mut self.document, bytes, format)?;
        if !report.imported.is_empty() {
            self.history
                .push_executed(Box::new(ImportNodesCommand::new(report.imported.clone())));
            self.dirty = true;
        }
        self.notify();
        Ok(report)
    }

    /// Import an exchange file, picking the format from its extension
    pub fn import_from(&mut self, source: &dyn ByteSource, path: &Path) -> Result<ImportReport> {
        let bytes = source.read_bytes(path).map_err(io_error(path))?;
        let format = ExchangeFormat::from_path(path);
        tracing::info!(path = %path.display(), ?format, "importing");
        self.import(&bytes, format)
    }

    /// Rename overrides keyed by a stable `<prefix><index>` identifier,
    /// e.g. `Tex3` or `Emit0`
    pub fn renaming_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for kind in NodeKind::ALL {
            for node in self.document.nodes_of(kind) {
                if let Some(name) = node.name() {
                    map.insert(format!("{}{}", kind.workspace_prefix(), node.index()), name.to_string());
                }
            }
        }
        map
    }

    /// Apply rename overrides produced by [`Self::renaming_map`]. Keys that
    /// match no node are ignored. Not recorded in the history.
    pub fn apply_renaming_map(&mut self, map: &BTreeMap<String, String>) -> Result<usize> {
        let mut renames = Vec::new();
        for kind in NodeKind::ALL {
            for node in self.document.nodes_of(kind) {
                let key = format!("{}{}", kind.workspace_prefix(), node.index());
                if let Some(name) = map.get(&key) {
                    renames.push((node.id, name.clone()));
                }
            }
        }
        for (id, name) in &renames {
            self.document.rename(*id, Some(name.clone()))?;
        }
        self.notify();
        Ok(renames.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{RemoveNodeCommand, RenameCommand};
    use crate::events::RecordingEvents;
    use crate::io::MemoryBytes;
    use avfx_format::{Block, Field, Tag, TextField};
    use avfx_graph::Node;

    fn texture(path: &str) -> Node {
        let mut body = Block::new();
        body.push(Tag::new("Path"), Field::Text(TextField::new(path)));
        Node::new(NodeKind::Texture, body)
    }

    fn session_with_textures(count: usize) -> (EditorSession, Vec<NodeId>) {
        let mut document = Document::new();
        let ids = (0..count)
            .map(|i| document.add_node(texture(&format!("vfx/{i}.atex"))).unwrap())
            .collect();
        document.take_changed();
        (EditorSession::new(document), ids)
    }

    #[test]
    fn test_open_verifies_and_saves() {
        let (session, _) = session_with_textures(2);
        let bytes = session.to_bytes().unwrap();
        let store = MemoryBytes::new();
        store.insert("in.avfx", bytes.clone());

        let mut opened = EditorSession::open(&store, Path::new("in.avfx"), &EditorConfig::default()).unwrap();
        assert_eq!(opened.verify_status(), VerifyStatus::Verified);
        assert_eq!(opened.document().group(NodeKind::Texture).len(), 2);
        assert!(!opened.is_dirty());

        opened.save(&store, Path::new("out.avfx")).unwrap();
        assert_eq!(store.get(Path::new("out.avfx")), Some(bytes));
        assert_eq!(opened.path(), Some(Path::new("out.avfx")));
    }

    #[test]
    fn test_open_missing_file() {
        let store = MemoryBytes::new();
        let err = EditorSession::open(&store, Path::new("nope.avfx"), &EditorConfig::default()).unwrap_err();
        assert!(matches!(err, SessionError::Io { .. }));
    }

    #[test]
    fn test_notifications_after_execute_and_undo() {
        let (session, ids) = session_with_textures(1);
        let events = RecordingEvents::new();
        let mut session = session.with_events(events.clone());

        session.execute(RenameCommand::new(ids[0], Some("Smoke".into()))).unwrap();
        let log = events.snapshot();
        assert_eq!(log.changed, vec![ids[0]]);
        assert_eq!(log.stack, vec![(true, false)]);
        assert!(session.is_dirty());

        events.clear();
        session.undo().unwrap();
        let log = events.snapshot();
        assert_eq!(log.changed, vec![ids[0]]);
        assert_eq!(log.stack, vec![(false, true)]);
    }

    #[test]
    fn test_remove_notifies_renumbered_nodes() {
        let (session, ids) = session_with_textures(3);
        let events = RecordingEvents::new();
        let mut session = session.with_events(events.clone());

        session.execute(RemoveNodeCommand::new(ids[0])).unwrap();
        let changed = events.snapshot().changed;
        assert!(changed.contains(&ids[0]));
        assert!(changed.contains(&ids[1]));
        assert!(changed.contains(&ids[2]));
        assert_eq!(session.document().node(ids[2]).unwrap().index(), 1);
    }

    #[test]
    fn test_import_is_one_undo_step() {
        let (mut source, ids) = session_with_textures(2);
        let bytes = source.export(&ids, false).unwrap();

        let mut target = EditorSession::default();
        let report = target.import(&bytes, ExchangeFormat::Current).unwrap();
        assert_eq!(report.imported.len(), 2);
        assert_eq!(target.history().undo_description(), Some("Import"));

        target.undo().unwrap();
        assert_eq!(target.document().node_count(), 0);
        target.redo().unwrap();
        assert_eq!(target.document().node_count(), 2);
        assert_eq!(target.document().node(report.imported[1]).unwrap().index(), 1);
    }

    #[test]
    fn test_renaming_map_round_trip() {
        let (mut session, ids) = session_with_textures(3);
        session.execute(RenameCommand::new(ids[2], Some("Sparkle".into()))).unwrap();
        let map = session.renaming_map();
        assert_eq!(map.get("Tex2").map(String::as_str), Some("Sparkle"));
        assert_eq!(map.len(), 1);

        let mut other = EditorSession::from_bytes(&session.to_bytes().unwrap(), false).unwrap();
        assert_eq!(other.apply_renaming_map(&map).unwrap(), 1);
        let renamed = other.document().nodes_of(NodeKind::Texture).nth(2).unwrap();
        assert_eq!(renamed.name(), Some("Sparkle"));
    }
}
