// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editing core for AVFX effect files.
//!
//! Provides undoable editing of a [`Document`](avfx_graph::Document), partial
//! export/import of node sub-graphs, and a node library.
//!
//! ## Features
//!
//! - Bounded undo/redo history of reversible commands
//! - Dependency-aware export with transient renumbering
//! - Import in dependency order with per-node failure reporting
//! - Legacy headerless export files
//! - RON settings and node library index

pub mod commands;
pub mod config;
pub mod events;
pub mod exchange;
pub mod history;
pub mod io;
pub mod library;
pub mod session;
pub mod telemetry;

pub use commands::{Command, CommandError, CompositeCommand};
pub use config::{ConfigError, EditorConfig};
pub use events::{EditorEvents, NoopEvents, RecordingEvents};
pub use exchange::{export_nodes, import_bytes, ExchangeError, ExchangeFormat, ImportFailure, ImportReport};
pub use history::{History, HistoryError, HistoryStats, StateSnapshot};
pub use io::{ByteSink, ByteSource, FsBytes, MemoryBytes};
pub use library::{LibraryError, LibraryItem, NodeLibrary};
pub use session::{EditorSession, SessionError};
pub use telemetry::init_tracing;
