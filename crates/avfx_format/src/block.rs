// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ordered chunk bodies and paths into them.

use crate::chunk::{read_nested, write_nested, ChunkItem, ChunkReader, ChunkWriter, Result, Tag};
use crate::field::Field;
use crate::schema::{Layout, NodeKind, Spec, LIFE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One chunk of a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Chunk tag
    pub tag: Tag,
    /// Unassigned entries are kept in memory but not written
    pub assigned: bool,
    /// Typed payload
    pub field: Field,
}

impl Entry {
    /// An assigned entry
    pub fn new(tag: Tag, field: Field) -> Self {
        Self {
            tag,
            assigned: true,
            field,
        }
    }
}

impl ChunkItem for Entry {
    fn tag(&self) -> Tag {
        self.tag
    }

    fn is_present(&self) -> bool {
        self.assigned
    }

    fn write_payload(&self, writer: &mut ChunkWriter) -> Result<()> {
        self.field.write(writer)
    }
}

/// Chunks in file order. Repeated tags are addressed by occurrence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    entries: Vec<Entry>,
}

/// Assignment flags along a path, outermost segment first
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssignState(Vec<SegmentState>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum SegmentState {
    Missing,
    Present { assigned: bool, enabled: Option<bool> },
}

impl AssignState {
    /// Whether the addressed entry itself was assigned
    pub fn is_assigned(&self) -> bool {
        matches!(self.0.last(), Some(SegmentState::Present { assigned: true, .. }))
    }
}

/// A selector field found while walking a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectSite {
    /// Where the field lives
    pub path: FieldPath,
    /// Kind it points into
    pub kind: NodeKind,
    /// Index currently stored
    pub index: i32,
}

impl Block {
    /// Empty block
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a whole payload as a block
    pub fn decode(payload: &[u8], layout: &'static Layout) -> Result<Self> {
        let mut reader = ChunkReader::new(payload);
        Self::read(&mut reader, payload.len(), layout)
    }

    /// Decode the next `size` bytes of `reader` as a block
    pub fn read(reader: &mut ChunkReader<'_>, size: usize, layout: &'static Layout) -> Result<Self> {
        let mut entries = Vec::new();
        read_nested(reader, size, |r, tag, size| {
            let payload = r.read_bytes(size)?;
            entries.push(Entry::new(tag, Field::decode(payload, layout.spec(tag))?));
            Ok(())
        })?;
        Ok(Self { entries })
    }

    /// Encode every assigned entry
    pub fn write(&self, writer: &mut ChunkWriter) -> Result<()> {
        write_nested(writer, &self.entries)
    }

    /// Entries in order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Number of entries, assigned or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the block has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an assigned entry
    pub fn push(&mut self, tag: Tag, field: Field) {
        self.entries.push(Entry::new(tag, field));
    }

    fn position_of(&self, segment: PathSegment) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.tag == segment.tag)
            .nth(segment.nth)
            .map(|(i, _)| i)
    }

    fn count_of(&self, tag: Tag) -> usize {
        self.entries.iter().filter(|e| e.tag == tag).count()
    }

    /// Entry at `path`
    pub fn get(&self, path: &FieldPath) -> Option<&Entry> {
        let (last, parents) = path.0.split_last()?;
        let mut block = self;
        for segment in parents {
            block = block.entries[block.position_of(*segment)?].field.as_block()?;
        }
        block.position_of(*last).map(|i| &block.entries[i])
    }

    /// Mutable entry at `path`
    pub fn get_mut(&mut self, path: &FieldPath) -> Option<&mut Entry> {
        let (last, parents) = path.0.split_last()?;
        let block = self.parent_block_mut(parents)?;
        let position = block.position_of(*last)?;
        Some(&mut block.entries[position])
    }

    fn parent_block_mut(&mut self, parents: &[PathSegment]) -> Option<&mut Block> {
        let mut block = self;
        for segment in parents {
            let position = block.position_of(*segment)?;
            block = block.entries[position].field.as_block_mut()?;
        }
        Some(block)
    }

    /// Entry at `path`, creating it (and any missing parents) unassigned
    /// from `layout`. A segment may only create the next occurrence of its
    /// tag, never leave a gap.
    pub fn ensure(&mut self, path: &FieldPath, layout: &'static Layout) -> Option<&mut Entry> {
        ensure_in(self, &path.0, layout)
    }

    /// Mark the entry at `path` assigned or not. Assigning also assigns
    /// every parent so that the entry is actually written.
    pub fn set_assigned(&mut self, path: &FieldPath, assigned: bool) -> bool {
        if self.get(path).is_none() {
            return false;
        }
        if assigned {
            let mut block = self;
            for (i, segment) in path.0.iter().enumerate() {
                let Some(position) = block.position_of(*segment) else {
                    return false;
                };
                let entry = &mut block.entries[position];
                entry.assigned = true;
                if i + 1 == path.0.len() {
                    return true;
                }
                if let Field::Life(life) = &mut entry.field {
                    life.enabled = true;
                }
                let Some(next) = entry.field.as_block_mut() else {
                    return false;
                };
                block = next;
            }
            true
        } else {
            self.get_mut(path).map(|e| e.assigned = false).is_some()
        }
    }

    /// Assignment flags of every segment of `path`, including segments
    /// that do not exist yet
    pub fn assign_state(&self, path: &FieldPath) -> AssignState {
        let mut steps = Vec::with_capacity(path.0.len());
        let mut block = Some(self);
        for segment in &path.0 {
            let entry = block.and_then(|b| b.position_of(*segment).map(|i| &b.entries[i]));
            steps.push(match entry {
                Some(entry) => SegmentState::Present {
                    assigned: entry.assigned,
                    enabled: match &entry.field {
                        Field::Life(life) => Some(life.enabled),
                        _ => None,
                    },
                },
                None => SegmentState::Missing,
            });
            block = entry.and_then(|e| e.field.as_block());
        }
        AssignState(steps)
    }

    /// Put back flags captured by [`Block::assign_state`]. Segments that
    /// were missing end up unassigned, as [`Block::ensure`] creates them.
    pub fn restore_assign_state(&mut self, path: &FieldPath, state: &AssignState) -> bool {
        if state.0.len() != path.0.len() {
            return false;
        }
        let mut block = self;
        for (segment, step) in path.0.iter().zip(&state.0) {
            let Some(position) = block.position_of(*segment) else {
                return true;
            };
            let entry = &mut block.entries[position];
            let (assigned, enabled) = match *step {
                SegmentState::Missing => (false, Some(false)),
                SegmentState::Present { assigned, enabled } => (assigned, enabled),
            };
            entry.assigned = assigned;
            if let (Field::Life(life), Some(enabled)) = (&mut entry.field, enabled) {
                life.enabled = enabled;
            }
            let Some(next) = entry.field.as_block_mut() else {
                return true;
            };
            block = next;
        }
        true
    }

    /// Remove the entry at `path`, returning its position among all
    /// siblings and the entry itself
    pub fn remove(&mut self, path: &FieldPath) -> Option<(usize, Entry)> {
        let (last, parents) = path.0.split_last()?;
        let block = self.parent_block_mut(parents)?;
        let position = block.position_of(*last)?;
        Some((position, block.entries.remove(position)))
    }

    /// Insert `entry` at sibling `position` inside the block addressed by
    /// `parent` (the root block when `parent` is empty)
    pub fn insert(&mut self, parent: &FieldPath, position: usize, entry: Entry) -> bool {
        let Some(block) = self.parent_block_mut(&parent.0) else {
            return false;
        };
        if position > block.entries.len() {
            return false;
        }
        block.entries.insert(position, entry);
        true
    }

    /// Path of the entry at sibling `position` of `parent`
    pub fn path_at(&self, parent: &FieldPath, position: usize) -> Option<FieldPath> {
        let block = if parent.is_root() {
            self
        } else {
            self.get(parent)?.field.as_block()?
        };
        let tag = block.entries.get(position)?.tag;
        let nth = block.entries[..position].iter().filter(|e| e.tag == tag).count();
        Some(parent.child(tag, nth))
    }

    /// Every selector field, depth first in file order
    pub fn selects(&self) -> Vec<SelectSite> {
        let mut sites = Vec::new();
        collect_selects(self, &FieldPath::root(), &mut sites);
        sites
    }
}

fn ensure_in<'b>(block: &'b mut Block, segments: &[PathSegment], layout: &'static Layout) -> Option<&'b mut Entry> {
    let (segment, rest) = segments.split_first()?;
    let spec = layout.spec(segment.tag);
    let count = block.count_of(segment.tag);
    if segment.nth > count {
        return None;
    }
    if segment.nth == count {
        block.entries.push(Entry {
            tag: segment.tag,
            assigned: false,
            field: Field::empty(spec),
        });
    }
    let position = block.position_of(*segment)?;
    let entry = &mut block.entries[position];
    if rest.is_empty() {
        return Some(entry);
    }
    let child_layout = match spec {
        Spec::Block(child) => child,
        Spec::Life => &LIFE,
        _ => return None,
    };
    ensure_in(entry.field.as_block_mut()?, rest, child_layout)
}

fn collect_selects(block: &Block, prefix: &FieldPath, sites: &mut Vec<SelectSite>) {
    for (i, entry) in block.entries.iter().enumerate() {
        let nth = block.entries[..i].iter().filter(|e| e.tag == entry.tag).count();
        let path = prefix.child(entry.tag, nth);
        match &entry.field {
            Field::Select(select) => sites.push(SelectSite {
                path,
                kind: select.kind,
                index: select.index,
            }),
            other => {
                if let Some(child) = other.as_block() {
                    collect_selects(child, &path, sites);
                }
            }
        }
    }
}

/// One step of a [`FieldPath`]: the `nth` occurrence of `tag`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSegment {
    /// Tag to match
    pub tag: Tag,
    /// Zero-based occurrence among siblings with the same tag
    pub nth: usize,
}

/// Address of an entry inside a node body, written `Item#1/EmNo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// The empty path, addressing the body itself
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse `Tag`, `Tag#n` segments separated by `/`
    pub fn parse(text: &str) -> Option<Self> {
        let mut segments = Vec::new();
        for part in text.split('/').filter(|p| !p.is_empty()) {
            let (name, nth) = match part.split_once('#') {
                Some((name, nth)) => (name, nth.parse().ok()?),
                None => (part, 0),
            };
            if name.is_empty() || name.len() > 4 || !name.is_ascii() {
                return None;
            }
            segments.push(PathSegment {
                tag: Tag::new(name),
                nth,
            });
        }
        Some(Self(segments))
    }

    /// Path of a single top-level entry
    pub fn of(tag: Tag) -> Self {
        Self(vec![PathSegment { tag, nth: 0 }])
    }

    /// This path extended by one segment
    pub fn child(&self, tag: Tag, nth: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment { tag, nth });
        Self(segments)
    }

    /// This path followed by `relative`
    pub fn join(&self, relative: &FieldPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend_from_slice(&relative.0);
        Self(segments)
    }

    /// Segments from the outermost in
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Whether this is the empty path
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Parent path and last segment
    pub fn split_last(&self) -> Option<(FieldPath, PathSegment)> {
        let (last, parents) = self.0.split_last()?;
        Some((Self(parents.to_vec()), *last))
    }

    /// Whether `prefix` addresses this entry or one of its parents
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Adjust for an entry of `removed`'s tag being taken out of its block:
    /// later siblings with the same tag move down by one. Returns `None` if
    /// this path lies inside the removed entry.
    pub fn after_removal(&self, removed: &FieldPath) -> Option<FieldPath> {
        if self.starts_with(removed) {
            return None;
        }
        Some(self.shifted(removed, |nth| nth - 1))
    }

    /// Adjust for `inserted` being put back: siblings with the same tag at or
    /// after its occurrence move up by one
    pub fn after_insertion(&self, inserted: &FieldPath) -> FieldPath {
        let mut moved = self.clone();
        if let Some((parent, last)) = inserted.split_last() {
            let depth = parent.0.len();
            if self.0.len() > depth && self.0.starts_with(&parent.0) {
                let segment = &mut moved.0[depth];
                if segment.tag == last.tag && segment.nth >= last.nth {
                    segment.nth += 1;
                }
            }
        }
        moved
    }

    fn shifted(&self, removed: &FieldPath, adjust: impl Fn(usize) -> usize) -> FieldPath {
        let mut moved = self.clone();
        if let Some((parent, last)) = removed.split_last() {
            let depth = parent.0.len();
            if self.0.len() > depth && self.0.starts_with(&parent.0) {
                let segment = &mut moved.0[depth];
                if segment.tag == last.tag && segment.nth > last.nth {
                    segment.nth = adjust(segment.nth);
                }
            }
        }
        moved
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", segment.tag)?;
            if segment.nth > 0 {
                write!(f, "#{}", segment.nth)?;
            }
        }
        Ok(())
    }
}
