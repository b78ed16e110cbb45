// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node library for reusable effect parts.
//!
//! A library is a directory holding one export file per item plus a RON
//! index with the display labels. Items are exported with their
//! dependencies so they can be dropped into any document.

use crate::exchange::{ExchangeFormat, ImportReport, EXTENSION};
use crate::session::{EditorSession, SessionError};
use avfx_format::NodeKind;
use avfx_graph::NodeId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for library items
pub type LibraryId = Uuid;

/// Index file name inside the library directory
pub const INDEX_FILE_NAME: &str = "library.ron";

/// Current index format version
pub const LIBRARY_FORMAT_VERSION: u32 = 1;

/// Library errors
#[derive(Debug, Error)]
pub enum LibraryError {
    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Index is not valid RON
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Index could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] ron::Error),

    /// Export or import failed
    #[error(transparent)]
    Session(#[from] SessionError),

    /// No item with this id
    #[error("Library item not found: {0}")]
    NotFound(LibraryId),

    /// Node is not in the session's document
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),
}

/// Result type for library operations
pub type Result<T> = std::result::Result<T, LibraryError>;

/// One stored export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItem {
    /// Unique identifier
    pub id: LibraryId,
    /// Display label
    pub label: String,
    /// Kind of the exported root node
    pub kind: NodeKind,
    /// Export file, relative to the library directory
    pub file: PathBuf,
    /// Seconds since the Unix epoch when the item was added
    pub created: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LibraryIndex {
    version: u32,
    items: Vec<LibraryItem>,
}

/// Library stored in a directory
#[derive(Debug, Clone)]
pub struct NodeLibrary {
    dir: PathBuf,
    items: Vec<LibraryItem>,
}

impl NodeLibrary {
    /// Open the library in `dir`; a missing index is an empty library
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let index_path = dir.join(INDEX_FILE_NAME);
        let items = match std::fs::read_to_string(&index_path) {
            Ok(content) => ron::from_str::<LibraryIndex>(&content)?.items,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(dir = %dir.display(), items = items.len(), "opened node library");
        Ok(Self { dir, items })
    }

    /// Library directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Items in the order they were added
    pub fn items(&self) -> &[LibraryItem] {
        &self.items
    }

    /// Get an item by id
    pub fn get(&self, id: LibraryId) -> Option<&LibraryItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Export `node` with its dependencies and store it under `label`
    pub fn add(
        &mut self,
        session: &mut EditorSession,
        node: NodeId,
        label: impl Into<String>,
    ) -> Result<LibraryId> {
        let kind = session
            .document()
            .node(node)
            .ok_or(LibraryError::NodeNotFound(node))?
            .kind();
        let id = Uuid::new_v4();
        let file = PathBuf::from(format!("{id}.{EXTENSION}"));
        let bytes = session.export(&[node], true)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(&file), bytes)?;

        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.items.push(LibraryItem {
            id,
            label: label.into(),
            kind,
            file,
            created,
        });
        self.save()?;
        tracing::info!(%id, %kind, "added node to library");
        Ok(id)
    }

    /// Import an item into `session`
    pub fn import_into(&self, session: &mut EditorSession, id: LibraryId) -> Result<ImportReport> {
        let item = self.get(id).ok_or(LibraryError::NotFound(id))?;
        let bytes = std::fs::read(self.dir.join(&item.file))?;
        Ok(session.import(&bytes, ExchangeFormat::Current)?)
    }

    /// Change an item's label
    pub fn relabel(&mut self, id: LibraryId, label: impl Into<String>) -> Result<()> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(LibraryError::NotFound(id))?;
        item.label = label.into();
        self.save()
    }

    /// Remove an item and its export file
    pub fn remove(&mut self, id: LibraryId) -> Result<LibraryItem> {
        let position = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or(LibraryError::NotFound(id))?;
        let item = self.items.remove(position);
        match std::fs::remove_file(self.dir.join(&item.file)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(file = %item.file.display(), "library file already gone");
            }
            Err(err) => return Err(err.into()),
        }
        self.save()?;
        Ok(item)
    }

    /// Write the index
    pub fn save(&self) -> Result<()> {
        let index = LibraryIndex {
            version: LIBRARY_FORMAT_VERSION,
            items: self.items.clone(),
        };
        let content = ron::ser::to_string_pretty(&index, ron::ser::PrettyConfig::default())?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(INDEX_FILE_NAME), content)?;
        Ok(())
    }
}
