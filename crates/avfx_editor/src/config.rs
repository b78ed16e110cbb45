// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editor settings.
//!
//! Settings are stored as RON next to the host's other configuration:
//! - where replaced effect files are written
//! - where the node library lives
//! - whether loaded files are checked for byte-exact re-encoding
//! - undo depth and log filter
//! - recently opened files

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current settings format version
pub const CONFIG_FORMAT_VERSION: u32 = 1;

/// Settings file name
pub const CONFIG_FILE_NAME: &str = "avfx_editor.ron";

/// Default log filter directive
pub const DEFAULT_LOG_FILTER: &str = "avfx_editor=info,avfx_graph=info,avfx_format=warn";

/// Settings errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid RON for these settings
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Settings could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] ron::Error),

    /// File was written by a newer editor
    #[error("Settings version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the file
        found: u32,
        /// Newest version this build reads
        supported: u32,
    },
}

/// Editor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Settings format version
    pub version: u32,
    /// Directory modified effect files are written to
    pub write_location: PathBuf,
    /// Directory of the node library
    pub library_dir: PathBuf,
    /// Re-encode loaded files and compare against the source
    pub verify_on_load: bool,
    /// Maximum undo steps per document
    pub history_depth: usize,
    /// `tracing` filter directive
    pub log_filter: String,
    /// Recently opened files, newest first
    pub recent_files: Vec<PathBuf>,
    /// Maximum recent files kept
    pub max_recent_files: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("avfx_editor");
        Self {
            version: CONFIG_FORMAT_VERSION,
            write_location: base.join("write"),
            library_dir: base.join("library"),
            verify_on_load: true,
            history_depth: crate::history::MAX_HISTORY,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            recent_files: Vec::new(),
            max_recent_files: 10,
        }
    }
}

impl EditorConfig {
    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: EditorConfig = ron::from_str(&content)?;

        if config.version > CONFIG_FORMAT_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
                supported: CONFIG_FORMAT_VERSION,
            });
        }

        tracing::debug!(path = %path.display(), "loaded editor config");
        Ok(config)
    }

    /// Load settings, falling back to defaults when the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let pretty = ron::ser::PrettyConfig::default().struct_names(true);
        let content = ron::ser::to_string_pretty(self, pretty)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Settings file path inside a configuration directory
    pub fn config_file_path(config_dir: &Path) -> PathBuf {
        config_dir.join(CONFIG_FILE_NAME)
    }

    /// Move `path` to the front of the recent files
    pub fn add_recent_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.recent_files.retain(|p| *p != path);
        self.recent_files.insert(0, path);
        self.recent_files.truncate(self.max_recent_files);
    }

    /// Forget a recent file
    pub fn remove_recent_file(&mut self, path: &Path) {
        self.recent_files.retain(|p| p != path);
    }

    /// Where a replaced copy of `game_path` is written
    pub fn write_path(&self, game_path: &str) -> PathBuf {
        let file_name = Path::new(game_path)
            .file_name()
            .map_or_else(|| PathBuf::from("effect.avfx"), PathBuf::from);
        self.write_location.join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EditorConfig::default();
        assert_eq!(config.version, CONFIG_FORMAT_VERSION);
        assert!(config.verify_on_load);
        assert_eq!(config.history_depth, crate::history::MAX_HISTORY);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = EditorConfig::config_file_path(dir.path());
        let mut config = EditorConfig {
            history_depth: 25,
            ..EditorConfig::default()
        };
        config.add_recent_file("a.avfx");
        config.save(&path).unwrap();

        let loaded = EditorConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EditorConfig::load_or_default(&dir.path().join("missing.ron")).unwrap();
        assert_eq!(config, EditorConfig::default());
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        let config = EditorConfig {
            version: CONFIG_FORMAT_VERSION + 1,
            ..EditorConfig::default()
        };
        config.save(&path).unwrap();
        assert!(matches!(
            EditorConfig::load(&path),
            Err(ConfigError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_recent_files() {
        let mut config = EditorConfig {
            max_recent_files: 2,
            ..EditorConfig::default()
        };
        config.add_recent_file("a.avfx");
        config.add_recent_file("b.avfx");
        config.add_recent_file("a.avfx");
        assert_eq!(config.recent_files, vec![PathBuf::from("a.avfx"), PathBuf::from("b.avfx")]);

        config.add_recent_file("c.avfx");
        assert_eq!(config.recent_files, vec![PathBuf::from("c.avfx"), PathBuf::from("a.avfx")]);

        config.remove_recent_file(Path::new("a.avfx"));
        assert_eq!(config.recent_files.len(), 1);
    }

    #[test]
    fn test_write_path_uses_file_name() {
        let config = EditorConfig::default();
        assert_eq!(
            config.write_path("vfx/common/eff/fire.avfx"),
            config.write_location.join("fire.avfx")
        );
    }
}
