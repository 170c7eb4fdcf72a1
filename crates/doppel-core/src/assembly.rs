//! The in-memory assembly value.
//!
//! An [`Assembly`] is a self-sufficient snapshot of one disjoint graph
//! component: its root hashes, its nodes with their payloads, and its
//! out-edge adjacency. Assemblies are immutable once built (see
//! [`AssemblyBuilder`](crate::builder::AssemblyBuilder)); their identity and
//! content hashes are computed lazily and cached for the object's lifetime,
//! so traversals may rely on repeated cheap calls.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::element::Element;
use crate::hash::{hash_components, ComponentHash, ComponentId, Digest, ForestHash, NodeHash};
use crate::registry::{format_node, parse_node, RawNode};

/// Exposes the consistent reference of a component graph: a computed
/// identifier over its roots and a content hash over its entirety.
///
/// Both methods must return a consistent value for the lifetime of the
/// object; [`Assembly`] caches them internally.
pub trait AssemblyRef {
    /// Computes an identifying hash over the root nodes of the component.
    /// The roots of a directed graph are the subset of its nodes without
    /// any ingress (i.e. with only egress) edges.
    fn assembly_id(&self) -> ComponentId;

    /// Computes a content hash over the entire graph (edges and nodes with
    /// their attached payloads).
    fn assembly_hash(&self) -> ComponentHash;
}

/// One disjoint connected component of a digital-twin graph.
///
/// Invariants: the graph is a DAG; edges carry no weights or attributes;
/// every referenced [`NodeHash`] appears in the node mapping; the roots are
/// exactly the ingress-less nodes.
///
/// Do not rely on mutating the values returned from its accessors.
#[derive(Debug)]
pub struct Assembly {
    roots: Vec<NodeHash>,
    nodes: BTreeMap<NodeHash, Arc<dyn Element>>,
    edges: BTreeMap<NodeHash, Vec<NodeHash>>,
    id: OnceLock<ComponentId>,
    hash: OnceLock<ComponentHash>,
}

impl Assembly {
    pub(crate) fn from_parts(
        roots: Vec<NodeHash>,
        nodes: BTreeMap<NodeHash, Arc<dyn Element>>,
        edges: BTreeMap<NodeHash, Vec<NodeHash>>,
    ) -> Self {
        Assembly {
            roots,
            nodes,
            edges,
            id: OnceLock::new(),
            hash: OnceLock::new(),
        }
    }

    /// The root hashes of the assembly, in lexicographic order.
    pub fn roots(&self) -> &[NodeHash] {
        &self.roots
    }

    /// The node mapping. Lookup only.
    pub fn nodes(&self) -> &BTreeMap<NodeHash, Arc<dyn Element>> {
        &self.nodes
    }

    /// Looks up the payload of a node; `None` when the hash is not part of
    /// this assembly.
    pub fn value(&self, n: NodeHash) -> Option<&dyn Element> {
        self.nodes.get(&n).map(|v| v.as_ref())
    }

    /// The out-edges of a node. Order is stable within one assembly
    /// instance.
    pub fn edges_of(&self, n: NodeHash) -> &[NodeHash] {
        self.edges.get(&n).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Visits every edge as a `(from, to)` payload pair, short-circuiting
    /// when `f` returns `false`. Iteration order is unspecified.
    pub fn visit_edges(&self, mut f: impl FnMut(&dyn Element, &dyn Element) -> bool) {
        for (from, neighbours) in &self.edges {
            let Some(from_value) = self.nodes.get(from) else {
                continue;
            };
            for to in neighbours {
                let Some(to_value) = self.nodes.get(to) else {
                    continue;
                };
                if !f(from_value.as_ref(), to_value.as_ref()) {
                    return;
                }
            }
        }
    }

    fn compute_id(&self) -> ComponentId {
        ComponentId::of_roots(&self.roots)
    }

    fn compute_hash(&self) -> ComponentHash {
        let mut d = Digest::new();
        // The roots participate through the component id.
        d.update(self.assembly_id().as_bytes());

        // Nodes in lexicographic order, each followed by its out-edges in
        // lexicographic order.
        for from in self.nodes.keys() {
            d.update(from.as_bytes());
            let mut neighbours: Vec<NodeHash> = self.edges_of(*from).to_vec();
            neighbours.sort();
            for to in &neighbours {
                d.update(to.as_bytes());
            }
        }
        ComponentHash::from(d.finalize())
    }
}

impl AssemblyRef for Assembly {
    fn assembly_id(&self) -> ComponentId {
        *self.id.get_or_init(|| self.compute_id())
    }

    fn assembly_hash(&self) -> ComponentHash {
        *self.hash.get_or_init(|| self.compute_hash())
    }
}

impl Clone for Assembly {
    fn clone(&self) -> Self {
        let clone = Assembly {
            roots: self.roots.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            id: OnceLock::new(),
            hash: OnceLock::new(),
        };
        // Carry over already-computed references; they are pure functions
        // of the copied state.
        if let Some(id) = self.id.get() {
            let _ = clone.id.set(*id);
        }
        if let Some(hash) = self.hash.get() {
            let _ = clone.hash.set(*hash);
        }
        clone
    }
}

/// Digests the given components into a [`ForestHash`].
///
/// Equivalent to [`hash_components`] with the ids and hashes taken from the
/// given references.
pub fn compute_forest_hash(components: &[&dyn AssemblyRef]) -> ForestHash {
    let precomputed: BTreeMap<ComponentId, ComponentHash> = components
        .iter()
        .map(|c| (c.assembly_id(), c.assembly_hash()))
        .collect();
    hash_components(&precomputed)
}

// The wire form of an assembly: payloads travel as raw nodes and are decoded
// through the registry on arrival, so payload types must be registered in
// the receiving process.
#[derive(Serialize, Deserialize)]
struct AssemblyWire {
    roots: Vec<NodeHash>,
    nodes: Vec<RawNode>,
    edges: Vec<(NodeHash, Vec<NodeHash>)>,
}

impl Serialize for Assembly {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for value in self.nodes.values() {
            nodes.push(format_node(value.as_ref()).map_err(S::Error::custom)?);
        }
        let wire = AssemblyWire {
            roots: self.roots.clone(),
            nodes,
            edges: self
                .edges
                .iter()
                .map(|(from, tos)| (*from, tos.clone()))
                .collect(),
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Assembly {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = AssemblyWire::deserialize(deserializer)?;
        let mut nodes: BTreeMap<NodeHash, Arc<dyn Element>> = BTreeMap::new();
        for raw in &wire.nodes {
            let value = parse_node(raw).map_err(D::Error::custom)?;
            nodes.insert(raw.content_address, Arc::from(value));
        }
        Ok(Assembly::from_parts(
            wire.roots,
            nodes,
            wire.edges.into_iter().collect(),
        ))
    }
}
