// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node graph model for AVFX documents.
//!
//! A document holds one ordered group per node kind. Nodes reference each
//! other through selector fields that store an index into the target group.
//! This crate keeps those references resolved to stable handles so that
//! groups can be reordered, nodes removed and restored, and sub-graphs
//! renumbered for export without losing track of what points where.
//!
//! ## Architecture
//!
//! - Arena of nodes keyed by [`NodeId`]
//! - Per-kind [`NodeGroup`]s owning index assignment
//! - Children and backrefs maintained on every selector change
//! - Dependency collection tolerant of reference cycles

pub mod node;
pub mod group;
pub mod document;
pub mod resolver;

pub use document::{Detached, Document, GraphError, Link, Owner, RemovedEntry, VerifyStatus};
pub use group::NodeGroup;
pub use node::{Node, NodeId, Selector};
pub use resolver::{collect_with_dependencies, with_export_indices, ExportIndices, EXPORT_INDEX_ORDER};
