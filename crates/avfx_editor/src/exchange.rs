// SPDX-License-Identifier: MIT OR Apache-2.0
//! Partial export and import of node sub-graphs.
//!
//! The current format starts with a small header:
//!
//! ```text
//! i32  magic (2)
//! u8   has dependencies
//! i32  item count
//! i32  data size
//! i32  rename table offset (absolute)
//! ...  node chunks
//! ...  one length-prefixed name per item, empty when not renamed
//! ```
//!
//! The legacy format is the node chunks alone.

use avfx_format::chunk::read_nested;
use avfx_format::{ChunkReader, ChunkWriter, FormatError, NodeKind};
use avfx_graph::{collect_with_dependencies, with_export_indices, Document, GraphError, Node, NodeId};
use std::path::Path;
use thiserror::Error;

/// Header magic of the current export format
pub const EXPORT_MAGIC: i32 = 2;

/// Size of the current format header
pub const HEADER_SIZE: usize = 17;

/// Imports smaller than this carry no node
pub const MIN_DATA_SIZE: usize = 8;

/// Order in which imported nodes are constructed so that selector targets
/// exist before the nodes pointing at them
pub const IMPORT_ORDER: [NodeKind; 7] = [
    NodeKind::Model,
    NodeKind::Texture,
    NodeKind::Binder,
    NodeKind::Effector,
    NodeKind::Particle,
    NodeKind::Emitter,
    NodeKind::Timeline,
];

/// Extension of legacy export files
pub const LEGACY_EXTENSION: &str = "vfxedit";

/// Extension of current export files
pub const EXTENSION: &str = "vfxedit2";

/// Exchange errors
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Codec error
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Document error
    #[error("Document error: {0}")]
    Graph(#[from] GraphError),

    /// Header magic is not one this editor writes
    #[error("Unsupported export version {0}")]
    UnsupportedVersion(i32),

    /// Header fields are inconsistent
    #[error("Malformed header: {0}")]
    MalformedHeader(String),
}

/// Result type for exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Export file layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeFormat {
    /// Header, node chunks and rename table
    #[default]
    Current,
    /// Headerless node chunks
    Legacy,
}

impl ExchangeFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(LEGACY_EXTENSION) => Self::Legacy,
            _ => Self::Current,
        }
    }
}

/// A node that could not be imported
#[derive(Debug)]
pub struct ImportFailure {
    /// Kind of the chunk
    pub kind: NodeKind,
    /// Offset of the payload in the import data
    pub offset: usize,
    /// What went wrong
    pub error: GraphError,
}

/// Outcome of an import
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Imported nodes in construction order
    pub imported: Vec<NodeId>,
    /// Nodes that failed to decode or attach
    pub failures: Vec<ImportFailure>,
    /// Whether the file was exported with its dependencies
    pub has_dependencies: bool,
    /// Selectors whose index matched no node
    pub unresolved: usize,
}

impl ImportReport {
    /// Report of an import that did nothing
    pub fn noop() -> Self {
        Self::default()
    }

    /// True if nothing was imported and nothing failed
    pub fn is_noop(&self) -> bool {
        self.imported.is_empty() && self.failures.is_empty()
    }
}

#[derive(Debug)]
struct Pending<'a> {
    kind: NodeKind,
    offset: usize,
    payload: &'a [u8],
    rename: Option<String>,
}

/// Export `roots` in the current format. With `with_dependencies` every
/// node they reach is included and renumbered for the file; the document's
/// own indices are restored before returning.
pub fn export_nodes(doc: &mut Document, roots: &[NodeId], with_dependencies: bool) -> Result<Vec<u8>> {
    for id in roots {
        doc.node(*id).ok_or(GraphError::NodeNotFound(*id))?;
    }

    let bytes = if with_dependencies {
        let order = collect_with_dependencies(doc, roots);
        with_export_indices(doc, &order, |doc| write_export(doc, &order, true))?
    } else {
        write_export(doc, roots, false)?
    };

    tracing::info!(
        roots = roots.len(),
        with_dependencies,
        bytes = bytes.len(),
        "exported nodes"
    );
    Ok(bytes)
}

fn write_export(doc: &Document, nodes: &[NodeId], with_dependencies: bool) -> Result<Vec<u8>> {
    let mut writer = ChunkWriter::new();
    writer.write_i32(EXPORT_MAGIC)?;
    writer.write_bool(with_dependencies)?;

    let placeholders = writer.position();
    writer.write_i32(0)?;
    writer.write_i32(0)?;
    writer.write_i32(0)?;

    let data_start = writer.position();
    let mut written = Vec::with_capacity(nodes.len());
    for id in nodes {
        let node = doc.node(*id).ok_or(GraphError::NodeNotFound(*id))?;
        node.write(&mut writer)?;
        written.push(node);
    }
    let data_size = writer.position() - data_start;

    let rename_offset = writer.position();
    for node in &written {
        writer.write_string(node.name().unwrap_or(""))?;
    }

    writer.patch_i32(placeholders, header_i32(written.len(), "item count")?)?;
    writer.patch_i32(placeholders + 4, header_i32(data_size, "data size")?)?;
    writer.patch_i32(placeholders + 8, header_i32(rename_offset, "rename offset")?)?;
    Ok(writer.into_inner())
}

fn header_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| ExchangeError::MalformedHeader(format!("{what} {value} does not fit")))
}

/// Import nodes from export data into `doc`
pub fn import_bytes(doc: &mut Document, bytes: &[u8], format: ExchangeFormat) -> Result<ImportReport> {
    match format {
        ExchangeFormat::Current => import_current(doc, bytes),
        ExchangeFormat::Legacy => import_legacy(doc, bytes),
    }
}

fn import_current(doc: &mut Document, bytes: &[u8]) -> Result<ImportReport> {
    let mut reader = ChunkReader::new(bytes);
    let magic = reader.read_i32()?;
    if magic != EXPORT_MAGIC {
        return Err(ExchangeError::UnsupportedVersion(magic));
    }
    let has_dependencies = reader.read_bool()?;
    let item_count = reader.read_i32()?;
    let data_size = reader.read_i32()?;
    let rename_offset = reader.read_i32()?;

    let Ok(data_size) = usize::try_from(data_size) else {
        return Err(ExchangeError::MalformedHeader(format!("data size {data_size}")));
    };
    if data_size < MIN_DATA_SIZE {
        tracing::info!(data_size, "nothing to import");
        return Ok(ImportReport::noop());
    }
    let item_count = usize::try_from(item_count)
        .map_err(|_| ExchangeError::MalformedHeader(format!("item count {item_count}")))?;
    let rename_offset = usize::try_from(rename_offset)
        .map_err(|_| ExchangeError::MalformedHeader(format!("rename offset {rename_offset}")))?;

    let data_start = reader.position();
    reader.seek(rename_offset)?;
    let mut renames = Vec::with_capacity(item_count);
    for _ in 0..item_count {
        renames.push(reader.read_string()?);
    }
    reader.seek(data_start)?;

    let pending = scan(&mut reader, data_size, &renames)?;
    Ok(construct(doc, pending, has_dependencies))
}

fn import_legacy(doc: &mut Document, bytes: &[u8]) -> Result<ImportReport> {
    if bytes.len() < MIN_DATA_SIZE {
        tracing::info!(len = bytes.len(), "nothing to import");
        return Ok(ImportReport::noop());
    }
    let mut reader = ChunkReader::new(bytes);
    reader.read_tag()?;
    let first_size = i64::from(reader.read_i32()?);
    let has_dependencies = bytes.len() as i64 > first_size + 12;
    reader.seek(0)?;

    let pending = scan(&mut reader, bytes.len(), &[])?;
    Ok(construct(doc, pending, has_dependencies))
}

/// Bucket the node chunks of the data area by kind without decoding them.
/// The rename table is indexed by chunk position, unknown chunks included.
fn scan<'a>(reader: &mut ChunkReader<'a>, size: usize, renames: &[String]) -> Result<Vec<Pending<'a>>> {
    let mut pending = Vec::new();
    let mut item = 0;
    read_nested(reader, size, |r, tag, size| {
        let rename = renames.get(item).filter(|n| !n.is_empty()).cloned();
        item += 1;
        if let Some(kind) = NodeKind::from_tag(tag).filter(|k| IMPORT_ORDER.contains(k)) {
            let offset = r.position();
            pending.push(Pending {
                kind,
                offset,
                payload: r.read_bytes(size)?,
                rename,
            });
        } else {
            tracing::debug!(%tag, "skipping chunk on import");
        }
        Ok(())
    })?;
    Ok(pending)
}

/// Maps the selector indices stored in export data to nodes
#[derive(Debug, Default)]
struct Targets {
    has_dependencies: bool,
    // file index -> constructed node, per kind; a failed node leaves a hole
    slots: [Vec<Option<NodeId>>; 8],
}

impl Targets {
    fn new(has_dependencies: bool) -> Self {
        Self {
            has_dependencies,
            ..Self::default()
        }
    }

    fn push(&mut self, kind: NodeKind, id: Option<NodeId>) {
        self.slots[kind.slot()].push(id);
    }

    /// Dependency data indexes its own nodes; otherwise indices address the
    /// live document
    fn resolve(&self, doc: &Document, kind: NodeKind, index: usize) -> Option<NodeId> {
        if self.has_dependencies {
            self.slots[kind.slot()].get(index).copied().flatten()
        } else {
            let group = doc.group(kind);
            group.get(group.import_base() + index)
        }
    }
}

fn construct(doc: &mut Document, pending: Vec<Pending<'_>>, has_dependencies: bool) -> ImportReport {
    if has_dependencies {
        doc.pre_import();
    } else {
        doc.clear_import_bases();
    }
    let mut targets = Targets::new(has_dependencies);

    let mut report = ImportReport {
        has_dependencies,
        ..ImportReport::default()
    };

    for kind in IMPORT_ORDER {
        for item in pending.iter().filter(|p| p.kind == kind) {
            let result = import_node(doc, item, |doc, kind, index| targets.resolve(doc, kind, index));
            match result {
                Ok(id) => {
                    targets.push(kind, Some(id));
                    report.imported.push(id);
                }
                Err(error) => {
                    targets.push(kind, None);
                    tracing::warn!(%kind, offset = item.offset, %error, "failed to import node");
                    report.failures.push(ImportFailure {
                        kind,
                        offset: item.offset,
                        error,
                    });
                }
            }
        }
    }

    // Selectors pointing forward into their own kind only resolve once the
    // whole batch is in.
    for id in &report.imported {
        match doc.resolve_selectors_with(*id, |doc, kind, index| targets.resolve(doc, kind, index)) {
            Ok(unresolved) => report.unresolved += unresolved,
            Err(error) => tracing::warn!(?id, %error, "failed to resolve selectors"),
        }
    }

    tracing::info!(
        imported = report.imported.len(),
        failed = report.failures.len(),
        unresolved = report.unresolved,
        has_dependencies,
        "imported nodes"
    );
    report
}

fn import_node(
    doc: &mut Document,
    item: &Pending<'_>,
    lookup: impl Fn(&Document, NodeKind, usize) -> Option<NodeId>,
) -> std::result::Result<NodeId, GraphError> {
    let node = Node::decode(item.kind, item.payload)?;
    let id = doc.add_node(node)?;
    if let Some(name) = &item.rename {
        doc.rename(id, Some(name.clone()))?;
    }
    doc.resolve_selectors_with(id, lookup)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use avfx_format::{Block, Field, FieldPath, SelectField, Tag, TextField, NO_TARGET};
    use avfx_graph::Owner;

    fn path(text: &str) -> FieldPath {
        FieldPath::parse(text).unwrap()
    }

    fn texture(doc: &mut Document, name: &str) -> NodeId {
        let mut body = Block::new();
        body.push(Tag::new("Path"), Field::Text(TextField::new(name)));
        doc.add_node(Node::new(NodeKind::Texture, body)).unwrap()
    }

    fn particle(doc: &mut Document, texture: Option<NodeId>) -> NodeId {
        let mut slot = Block::new();
        slot.push(
            Tag::new("TxNo"),
            Field::Select(SelectField {
                kind: NodeKind::Texture,
                index: NO_TARGET,
            }),
        );
        let mut body = Block::new();
        body.push(Tag::new("TC1"), Field::Block(slot));
        let id = doc.add_node(Node::new(NodeKind::Particle, body)).unwrap();
        if texture.is_some() {
            doc.select(id, &path("TC1/TxNo"), texture).unwrap();
        }
        id
    }

    fn texture_path(doc: &Document, id: NodeId) -> Option<String> {
        doc.field(Owner::Node(id), &path("Path"))
            .ok()
            .and_then(|f| f.as_text().map(str::to_string))
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExchangeFormat::from_path(Path::new("a/b.vfxedit")), ExchangeFormat::Legacy);
        assert_eq!(ExchangeFormat::from_path(Path::new("a/b.vfxedit2")), ExchangeFormat::Current);
        assert_eq!(ExchangeFormat::from_path(Path::new("noext")), ExchangeFormat::Current);
    }

    #[test]
    fn test_header_fields() {
        let mut doc = Document::new();
        let t = texture(&mut doc, "vfx/a.atex");
        doc.rename(t, Some("Glow".into())).unwrap();
        let bytes = export_nodes(&mut doc, &[t], false).unwrap();

        let mut reader = ChunkReader::new(&bytes);
        assert_eq!(reader.read_i32().unwrap(), EXPORT_MAGIC);
        assert!(!reader.read_bool().unwrap());
        assert_eq!(reader.read_i32().unwrap(), 1);
        let data_size = reader.read_i32().unwrap() as usize;
        let rename_offset = reader.read_i32().unwrap() as usize;
        assert_eq!(rename_offset, HEADER_SIZE + data_size);
        assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + 4], &Tag::new("Tex").wire());

        reader.seek(rename_offset).unwrap();
        assert_eq!(reader.read_string().unwrap(), "Glow");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_export_with_dependencies_merges_into_document() {
        let mut source = Document::new();
        let _t0 = texture(&mut source, "vfx/a.atex");
        let t1 = texture(&mut source, "vfx/b.atex");
        let p = particle(&mut source, Some(t1));
        let before = source.to_bytes().unwrap();

        let bytes = export_nodes(&mut source, &[p], true).unwrap();
        assert_eq!(source.to_bytes().unwrap(), before);

        let mut target = Document::new();
        let existing = texture(&mut target, "vfx/existing.atex");
        let report = import_bytes(&mut target, &bytes, ExchangeFormat::Current).unwrap();
        assert!(report.has_dependencies);
        assert_eq!(report.imported.len(), 2);
        assert!(report.failures.is_empty());

        let imported_texture = report.imported[0];
        let imported_particle = report.imported[1];
        assert_eq!(texture_path(&target, imported_texture).as_deref(), Some("vfx/b.atex"));
        assert_eq!(target.node(imported_texture).unwrap().index(), 1);
        assert_eq!(
            target.selected(imported_particle, &path("TC1/TxNo")).unwrap(),
            Some(imported_texture)
        );
        assert!(target.node(existing).unwrap().backrefs().is_empty());
    }

    #[test]
    fn test_import_without_dependencies_targets_live_nodes() {
        let mut source = Document::new();
        let t = texture(&mut source, "vfx/a.atex");
        let p = particle(&mut source, Some(t));
        let bytes = export_nodes(&mut source, &[p], false).unwrap();

        let mut target = Document::new();
        let live = texture(&mut target, "vfx/live.atex");
        let report = import_bytes(&mut target, &bytes, ExchangeFormat::Current).unwrap();
        assert!(!report.has_dependencies);
        assert_eq!(report.imported.len(), 1);
        assert_eq!(target.selected(report.imported[0], &path("TC1/TxNo")).unwrap(), Some(live));
    }

    #[test]
    fn test_unresolved_selector_keeps_index() {
        let mut source = Document::new();
        let _t0 = texture(&mut source, "vfx/a.atex");
        let t1 = texture(&mut source, "vfx/b.atex");
        let p = particle(&mut source, Some(t1));
        let bytes = export_nodes(&mut source, &[p], false).unwrap();

        let mut target = Document::new();
        let report = import_bytes(&mut target, &bytes, ExchangeFormat::Current).unwrap();
        assert_eq!(report.unresolved, 1);
        let id = report.imported[0];
        assert_eq!(target.selected(id, &path("TC1/TxNo")).unwrap(), None);
        assert_eq!(
            target.field(Owner::Node(id), &path("TC1/TxNo")).unwrap().as_select().unwrap().index,
            1
        );
    }

    #[test]
    fn test_small_data_is_noop() {
        let mut writer = ChunkWriter::new();
        writer.write_i32(EXPORT_MAGIC).unwrap();
        writer.write_bool(true).unwrap();
        writer.write_i32(0).unwrap();
        writer.write_i32(4).unwrap();
        writer.write_i32(HEADER_SIZE as i32).unwrap();

        let mut doc = Document::new();
        let report = import_bytes(&mut doc, &writer.into_inner(), ExchangeFormat::Current).unwrap();
        assert!(report.is_noop());
        assert_eq!(doc.node_count(), 0);

        let report = import_bytes(&mut doc, &[0, 0, 0, 0], ExchangeFormat::Legacy).unwrap();
        assert!(report.is_noop());
    }

    #[test]
    fn test_wrong_magic_is_rejected() {
        let mut doc = Document::new();
        let bytes = [7, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            import_bytes(&mut doc, &bytes, ExchangeFormat::Current),
            Err(ExchangeError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_legacy_import() {
        let mut source = Document::new();
        let t = texture(&mut source, "vfx/a.atex");
        let p = particle(&mut source, Some(t));
        let mut data = source.node_bytes(t).unwrap();
        data.extend(source.node_bytes(p).unwrap());

        let mut target = Document::new();
        let report = import_bytes(&mut target, &data, ExchangeFormat::Legacy).unwrap();
        assert!(report.has_dependencies);
        assert_eq!(report.imported.len(), 2);
        assert_eq!(
            target.selected(report.imported[1], &path("TC1/TxNo")).unwrap(),
            Some(report.imported[0])
        );

        let single = source.node_bytes(t).unwrap();
        let report = import_bytes(&mut target, &single, ExchangeFormat::Legacy).unwrap();
        assert!(!report.has_dependencies);
    }

    #[test]
    fn test_renames_follow_chunk_positions() {
        let mut source = Document::new();
        let a = texture(&mut source, "vfx/a.atex");
        let b = texture(&mut source, "vfx/b.atex");
        source.rename(b, Some("Second".into())).unwrap();
        let bytes = export_nodes(&mut source, &[a, b], false).unwrap();

        let mut target = Document::new();
        let report = import_bytes(&mut target, &bytes, ExchangeFormat::Current).unwrap();
        assert_eq!(target.node(report.imported[0]).unwrap().name(), None);
        assert_eq!(target.node(report.imported[1]).unwrap().name(), Some("Second"));
    }
}
