//! Incremental construction of assemblies.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;

use crate::assembly::Assembly;
use crate::element::{must_content_address, Element};
use crate::hash::NodeHash;

/// Accumulates nodes, edges, and roots to build an [`Assembly`] with fluent
/// calls. The default value is ready to use.
///
/// Node identities are computed with the "must" content-address variant:
/// payload types fed to a builder are developer-controlled, so an
/// un-hashable payload is a bug and panics.
#[derive(Default)]
pub struct AssemblyBuilder {
    roots: Vec<NodeHash>,
    nodes: BTreeMap<NodeHash, Arc<dyn Element>>,
    neighbours: BTreeMap<NodeHash, BTreeSet<NodeHash>>,
}

impl AssemblyBuilder {
    /// Appends the given node to the builder's node list and returns its
    /// hash. Pushing the same payload twice keeps a single node.
    pub fn push(&mut self, node: Arc<dyn Element>) -> NodeHash {
        let id = must_content_address(node.as_ref());
        self.nodes.insert(id, node);
        id
    }

    /// Appends the given nodes and a directed edge between them. Both
    /// endpoints are added implicitly.
    pub fn connect(&mut self, source: Arc<dyn Element>, target: Arc<dyn Element>) {
        let from = self.push(source);
        let to = self.push(target);
        self.neighbours.entry(from).or_default().insert(to);
    }

    /// Replaces the existing root list with the given roots, appending them
    /// to the node list. Duplicate roots collapse into one.
    pub fn roots(&mut self, roots: impl IntoIterator<Item = Arc<dyn Element>>) {
        self.roots.clear();
        for node in roots {
            let id = self.push(node);
            if !self.roots.contains(&id) {
                self.roots.push(id);
            }
        }
    }

    /// Resets the builder to be empty.
    pub fn reset(&mut self) {
        self.roots.clear();
        self.nodes.clear();
        self.neighbours.clear();
    }

    /// Returns the accumulated [`Assembly`], copying the internal state so
    /// the builder remains usable for further modifications.
    ///
    /// # Panics
    ///
    /// Panics when the accumulated edges contain a cycle: assemblies are
    /// acyclic by contract, so cyclic input is a developer error.
    pub fn build(&self) -> Assembly {
        let mut check = DiGraphMap::<NodeHash, ()>::new();
        for id in self.nodes.keys() {
            check.add_node(*id);
        }
        for (from, tos) in &self.neighbours {
            for to in tos {
                check.add_edge(*from, *to, ());
            }
        }
        if is_cyclic_directed(&check) {
            panic!("assembly builder: accumulated edges contain a cycle");
        }

        let edges: BTreeMap<NodeHash, Vec<NodeHash>> = self
            .neighbours
            .iter()
            .map(|(from, tos)| (*from, tos.iter().copied().collect()))
            .collect();

        Assembly::from_parts(self.roots.clone(), self.nodes.clone(), edges)
    }
}
