// SPDX-License-Identifier: MIT OR Apache-2.0
//! Binary codec for AVFX effect files.
//!
//! An effect file is a tree of chunks. Each chunk is a four byte tag, a
//! little-endian `i32` payload size and the payload, zero padded to a four
//! byte boundary. This crate provides:
//! - Bounds-checked chunk reading and size-exact chunk writing
//! - Per-kind layouts that give each known tag a type
//! - Typed fields that re-encode to the exact bytes they were read from

pub mod chunk;
pub mod curve;
pub mod schema;
pub mod field;
pub mod block;

pub use block::{AssignState, Block, Entry, FieldPath, PathSegment, SelectSite};
pub use chunk::{
    read_nested, write_chunk, write_nested, ChunkItem, ChunkReader, ChunkWriter, FormatError, RawChunk, Tag,
};
pub use curve::{CurveKey, KeyType};
pub use field::{BoolField, Field, IntField, LifeField, SelectField, TextField, NO_TARGET};
pub use schema::{Layout, NodeKind, Spec, ROOT_TAG};
