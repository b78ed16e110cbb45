// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dependency collection and transient renumbering for partial export.

use crate::document::Document;
use crate::node::NodeId;
use avfx_format::NodeKind;
use std::collections::HashSet;

/// Kinds renumbered for export, in precedence order
pub const EXPORT_INDEX_ORDER: [NodeKind; 7] = [
    NodeKind::Timeline,
    NodeKind::Emitter,
    NodeKind::Effector,
    NodeKind::Binder,
    NodeKind::Particle,
    NodeKind::Texture,
    NodeKind::Model,
];

/// Every node reachable from `roots` through selectors, each after its
/// own children. Cycles are cut by the visited set; unknown ids are skipped.
pub fn collect_with_dependencies(doc: &Document, roots: &[NodeId]) -> Vec<NodeId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    for root in roots {
        visit(doc, *root, &mut visited, &mut order);
    }
    order
}

fn visit(doc: &Document, id: NodeId, visited: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
    if !visited.insert(id) {
        return;
    }
    let Some(node) = doc.node(id) else {
        return;
    };
    for child in node.children() {
        visit(doc, *child, visited, order);
    }
    if !order.contains(&id) {
        order.push(id);
    }
}

/// File-local index of every node in `order`: per kind, contiguous from 0 in
/// list order, assigned kind by kind following [`EXPORT_INDEX_ORDER`]
pub fn export_indices(doc: &Document, order: &[NodeId]) -> Vec<(NodeId, usize)> {
    let mut assigned = Vec::with_capacity(order.len());
    for kind in EXPORT_INDEX_ORDER {
        let mut next = 0;
        for id in order {
            if doc.node(*id).is_some_and(|n| n.kind() == kind) {
                assigned.push((*id, next));
                next += 1;
            }
        }
    }
    assigned
}

/// Renumbers the nodes of an export list for as long as it lives.
///
/// Dropping the guard restores every saved index and rewrites all selectors,
/// so the live document is unchanged whether serialization succeeded,
/// failed or panicked.
pub struct ExportIndices<'d> {
    doc: &'d mut Document,
    saved: Vec<(NodeId, usize)>,
}

impl<'d> ExportIndices<'d> {
    /// Apply export indices for `order`
    pub fn apply(doc: &'d mut Document, order: &[NodeId]) -> Self {
        let assigned = export_indices(doc, order);
        let mut saved = Vec::with_capacity(assigned.len());
        for (id, index) in assigned {
            if let Some(node) = doc.node(id) {
                saved.push((id, node.index()));
            }
            doc.set_transient_index(id, index);
        }
        doc.sync_all_selectors();
        tracing::debug!(nodes = saved.len(), "applied export indices");
        Self { doc, saved }
    }

    /// The renumbered document
    pub fn document(&self) -> &Document {
        self.doc
    }
}

impl Drop for ExportIndices<'_> {
    fn drop(&mut self) {
        for (id, index) in self.saved.drain(..) {
            self.doc.set_transient_index(id, index);
        }
        self.doc.sync_all_selectors();
    }
}

/// Run `f` with export indices applied to `order`
pub fn with_export_indices<T>(doc: &mut Document, order: &[NodeId], f: impl FnOnce(&Document) -> T) -> T {
    let guard = ExportIndices::apply(doc, order);
    f(guard.document())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Owner;
    use crate::node::Node;
    use avfx_format::{Block, Field, FieldPath, SelectField, Tag, NO_TARGET};

    fn path(text: &str) -> FieldPath {
        FieldPath::parse(text).unwrap()
    }

    fn select(tag: &str, kind: NodeKind) -> (Tag, Field) {
        (
            Tag::new(tag),
            Field::Select(SelectField {
                kind,
                index: NO_TARGET,
            }),
        )
    }

    fn node(kind: NodeKind, fields: Vec<(Tag, Field)>) -> Node {
        let mut body = Block::new();
        for (tag, field) in fields {
            body.push(tag, field);
        }
        Node::new(kind, body)
    }

    fn emitter_item(kind: NodeKind) -> (Tag, Field) {
        let mut item = Block::new();
        let (tag, field) = select("EmNo", kind);
        item.push(tag, field);
        (Tag::new("ItEm"), Field::Block(item))
    }

    #[test]
    fn test_cycle_is_visited_once() {
        let mut doc = Document::new();
        let a = doc
            .add_node(node(NodeKind::Emitter, vec![emitter_item(NodeKind::Emitter)]))
            .unwrap();
        let b = doc
            .add_node(node(NodeKind::Emitter, vec![emitter_item(NodeKind::Emitter)]))
            .unwrap();
        doc.select(a, &path("ItEm/EmNo"), Some(b)).unwrap();
        doc.select(b, &path("ItEm/EmNo"), Some(a)).unwrap();

        assert_eq!(collect_with_dependencies(&doc, &[a]), vec![b, a]);
    }

    #[test]
    fn test_dependencies_come_first() {
        let mut doc = Document::new();
        let particle = doc.add_node(node(NodeKind::Particle, vec![])).unwrap();
        let emitter = doc
            .add_node(node(
                NodeKind::Emitter,
                vec![{
                    let mut item = Block::new();
                    let (tag, field) = select("PrNo", NodeKind::Particle);
                    item.push(tag, field);
                    (Tag::new("ItPr"), Field::Block(item))
                }],
            ))
            .unwrap();
        let mut timeline_item = Block::new();
        let (tag, field) = select("EmNo", NodeKind::Emitter);
        timeline_item.push(tag, field);
        let timeline = doc
            .add_node(node(NodeKind::Timeline, vec![(Tag::new("Item"), Field::Block(timeline_item))]))
            .unwrap();

        doc.select(emitter, &path("ItPr/PrNo"), Some(particle)).unwrap();
        doc.select(timeline, &path("Item/EmNo"), Some(emitter)).unwrap();

        assert_eq!(
            collect_with_dependencies(&doc, &[timeline]),
            vec![particle, emitter, timeline]
        );
        assert_eq!(
            collect_with_dependencies(&doc, &[particle, timeline]),
            vec![particle, emitter, timeline]
        );
    }

    #[test]
    fn test_export_indices_are_per_kind() {
        let mut doc = Document::new();
        let t0 = doc.add_node(node(NodeKind::Texture, vec![])).unwrap();
        let t1 = doc.add_node(node(NodeKind::Texture, vec![])).unwrap();
        let t2 = doc.add_node(node(NodeKind::Texture, vec![])).unwrap();
        let m0 = doc.add_node(node(NodeKind::Model, vec![])).unwrap();

        let indices = export_indices(&doc, &[t2, m0, t0]);
        assert_eq!(indices, vec![(t2, 0), (t0, 1), (m0, 0)]);
        assert!(!indices.iter().any(|(id, _)| *id == t1));
    }

    #[test]
    fn test_indices_restored_after_export() {
        let mut doc = Document::new();
        let _t0 = doc.add_node(node(NodeKind::Texture, vec![])).unwrap();
        let t1 = doc.add_node(node(NodeKind::Texture, vec![])).unwrap();
        let mut slot = Block::new();
        let (tag, field) = select("TxNo", NodeKind::Texture);
        slot.push(tag, field);
        let p = doc
            .add_node(node(NodeKind::Particle, vec![(Tag::new("TC1"), Field::Block(slot))]))
            .unwrap();
        doc.select(p, &path("TC1/TxNo"), Some(t1)).unwrap();
        let before = doc.to_bytes().unwrap();

        let order = collect_with_dependencies(&doc, &[p]);
        let during = with_export_indices(&mut doc, &order, |doc| {
            let index = doc
                .field(Owner::Node(p), &path("TC1/TxNo"))
                .unwrap()
                .as_select()
                .unwrap()
                .index;
            (doc.node(t1).unwrap().index(), index)
        });
        assert_eq!(during, (0, 0));

        assert_eq!(doc.node(t1).unwrap().index(), 1);
        assert_eq!(doc.selected(p, &path("TC1/TxNo")).unwrap(), Some(t1));
        assert_eq!(doc.to_bytes().unwrap(), before);
    }

    #[test]
    fn test_indices_restored_when_export_fails() {
        let mut doc = Document::new();
        let _t0 = doc.add_node(node(NodeKind::Texture, vec![])).unwrap();
        let t1 = doc.add_node(node(NodeKind::Texture, vec![])).unwrap();

        let result: Result<(), &str> = with_export_indices(&mut doc, &[t1], |_| Err("write failed"));
        assert!(result.is_err());
        assert_eq!(doc.node(t1).unwrap().index(), 1);
    }
}
