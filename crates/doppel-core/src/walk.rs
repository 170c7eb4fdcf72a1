//! Depth-first traversal over assemblies.

use crate::assembly::Assembly;
use crate::element::Element;
use crate::hash::NodeHash;

/// A visitor receives `Some(payload)` for each node encountered by [`walk`].
/// If `visit` returns `true`, each child of the node is visited, followed by
/// a call of `visit(None)` closing the subtree.
pub trait Visitor {
    fn visit(&mut self, node: Option<&dyn Element>) -> bool;
}

/// Traverses an assembly in depth-first order, calling [`walk_subtree`] for
/// each of its root nodes.
pub fn walk(v: &mut dyn Visitor, tree: &Assembly) {
    for root in tree.roots() {
        walk_subtree(v, tree, *root);
    }
}

/// Traverses a subtree within an assembly in depth-first order.
///
/// Starts by calling `v.visit(node)`. If that returns `true`, recurses into
/// each child of the node and finally calls `v.visit(None)`.
pub fn walk_subtree(v: &mut dyn Visitor, tree: &Assembly, node: NodeHash) {
    if !v.visit(tree.value(node)) {
        return;
    }
    for child in tree.edges_of(node) {
        walk_subtree(v, tree, *child);
    }
    v.visit(None);
}

struct Inspector<F>(F);

impl<F: FnMut(Option<&dyn Element>) -> bool> Visitor for Inspector<F> {
    fn visit(&mut self, node: Option<&dyn Element>) -> bool {
        (self.0)(node)
    }
}

/// The predicate-based convenience wrapper around [`walk`]: calls `f` for
/// every visited node, descending into children while `f` returns `true`,
/// with `f(None)` closing each subtree.
pub fn inspect(tree: &Assembly, f: impl FnMut(Option<&dyn Element>) -> bool) {
    let mut inspector = Inspector(f);
    walk(&mut inspector, tree);
}
