//! The storage contract for digital-twin graphs.
//!
//! Two-layer API design:
//!
//! - **Primitive mutations** ([`WriteTransaction`]) each affect a bounded
//!   number of rows and report how many they touched; the change engine's
//!   writer enforces the integrity expectations on those counts.
//! - **The sweep** ([`ReadTransaction::fetch_assemblies`]) enumerates
//!   disjoint graph components as `(root, edge tuples)` records, either for
//!   the whole graph or for the component enclosing a seed node.
//!
//! All backends implement this trait with identical semantics, so they are
//! fully swappable without changing engine logic.
//!
//! # Stored shape
//!
//! - Every node carries exactly one label and a property map including the
//!   reserved metadata properties: the bare-hex content address under
//!   `_contentAddress`, plus `_created_at` and `_last_modified` RFC 3339
//!   timestamps maintained by the mutations.
//! - Edges are directed, unweighted, and all share the single `CONNECTS`
//!   kind; they carry only their own timestamp metadata.

use doppel_core::{NodeHash, RawNode};

use crate::error::BackendError;

/// Identifies a stored node by its label and content address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSelector {
    pub label: String,
    pub content_address: NodeHash,
}

impl NodeSelector {
    /// The selector for the node described by the given raw node.
    pub fn of(node: &RawNode) -> Self {
        NodeSelector {
            label: node.label.clone(),
            content_address: node.content_address,
        }
    }
}

/// One `(from, to)` edge of a swept assembly.
///
/// An isolated root-only assembly is reported as a single `(None, None)`
/// sentinel tuple, which parsers skip.
#[derive(Clone, Debug)]
pub struct EdgeTuple {
    pub from: Option<RawNode>,
    pub to: Option<RawNode>,
}

impl EdgeTuple {
    /// The sentinel marking an isolated root.
    pub fn sentinel() -> Self {
        EdgeTuple {
            from: None,
            to: None,
        }
    }
}

/// One disjoint graph component as returned by the sweep: the root node and
/// the edge tuples reachable from it.
#[derive(Clone, Debug)]
pub struct AssemblyRecord {
    pub root: RawNode,
    pub tuples: Vec<EdgeTuple>,
}

/// The result of a retraction: how many rows it affected and which nodes
/// were adjacent to the operand beforehand.
///
/// Adjacent nodes matter because a retraction changes their neighbourhood:
/// the change engine taints them alongside the operand.
#[derive(Clone, Debug, Default)]
pub struct RetractOutcome {
    pub affected: u64,
    pub adjacent: Vec<RawNode>,
}

/// A pluggable graph backend.
///
/// Implementations must be safe for concurrent use: the change engine
/// issues write transactions from many threads at once. How much actual
/// write concurrency the backend sustains is its own concern; both
/// reference backends serialise writers internally.
pub trait GraphBackend: Send + Sync + 'static {
    /// Opens a write transaction. Mutations become visible to readers only
    /// after [`WriteTransaction::commit`].
    fn write(&self) -> Result<Box<dyn WriteTransaction + '_>, BackendError>;

    /// Opens a read transaction with a quiescent view of the graph.
    fn read(&self) -> Result<Box<dyn ReadTransaction + '_>, BackendError>;

    /// Declares a per-label uniqueness constraint on the content address
    /// for every given label, preventing duplicate nodes under concurrent
    /// merges. Idempotent.
    fn bootstrap(&self, labels: &[String]) -> Result<(), BackendError>;

    /// Rewrites historical content addresses stored in the wrapped
    /// `node(<hex>)` format to bare hex, returning how many values were
    /// rewritten. Idempotent; retained for data written by old releases.
    fn rewrite_wrapped_content_addresses(&self) -> Result<u64, BackendError>;
}

/// The primitive mutations of one write transaction.
///
/// Dropping an uncommitted transaction rolls it back.
pub trait WriteTransaction {
    /// Ensures a node with the given label and content address exists,
    /// creating it if absent, refreshing its properties and
    /// `_last_modified` otherwise. Returns the number of nodes the
    /// statement affected (1 when the graph is intact).
    fn assert_node(&mut self, node: &RawNode) -> Result<u64, BackendError>;

    /// Deletes the node plus all incident edges. Returns the affected node
    /// count (0 or 1 when the graph is intact) and the nodes previously
    /// adjacent to it.
    fn retract_node(&mut self, node: &RawNode) -> Result<RetractOutcome, BackendError>;

    /// Ensures both endpoints exist (creating them if needed) and exactly
    /// one directed `CONNECTS` edge from `from` to `to` exists. Returns the
    /// number of edges the statement affected (1 when the graph is
    /// intact).
    fn assert_edge(&mut self, from: &RawNode, to: &RawNode) -> Result<u64, BackendError>;

    /// Removes all edges, regardless of direction, between the node and
    /// any node carrying the target label. Returns the removed count and
    /// the nodes at the other end of each removed edge.
    fn retract_edges(
        &mut self,
        node: &RawNode,
        target_label: &str,
    ) -> Result<RetractOutcome, BackendError>;

    /// Commits the transaction.
    fn commit(self: Box<Self>) -> Result<(), BackendError>;

    /// Rolls the transaction back explicitly.
    fn rollback(self: Box<Self>) -> Result<(), BackendError>;
}

/// The sweep of one read transaction.
pub trait ReadTransaction {
    /// Enumerates disjoint graph components as `(root, tuples)` records.
    ///
    /// Roots are the ingress-less nodes. With a seed, only roots from
    /// which the seed node is reachable over zero or more edges (a root
    /// finds itself) are returned; a seed absent from the graph yields no
    /// records. Edge tuples are enumerated outward from each root up to
    /// the backend's depth bound; assemblies deeper than the bound fail
    /// with [`BackendError::DepthExceeded`] rather than appear truncated.
    fn fetch_assemblies(
        &mut self,
        seed: Option<&NodeSelector>,
    ) -> Result<Vec<AssemblyRecord>, BackendError>;
}
