// SPDX-License-Identifier: MIT OR Apache-2.0
//! Where effect bytes come from and go to.
//!
//! The host decides what a path means (a local file, a game archive path,
//! a temporary write location); the editor only moves bytes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reads whole files
pub trait ByteSource {
    /// Read every byte at `path`
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Writes whole files
pub trait ByteSink {
    /// Replace the contents at `path`
    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// Local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsBytes;

impl ByteSource for FsBytes {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

impl ByteSink for FsBytes {
    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
        Ok(())
    }
}

/// In-memory files, shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemoryBytes {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

impl MemoryBytes {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` at `path`
    pub fn insert(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.files.lock().insert(path.into(), bytes);
    }

    /// Copy of the bytes at `path`
    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }
}

impl ByteSource for MemoryBytes {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

impl ByteSink for MemoryBytes {
    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.insert(path, bytes.to_vec());
        Ok(())
    }
}
