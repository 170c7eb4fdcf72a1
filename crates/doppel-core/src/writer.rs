//! The graph-writer protocol.
//!
//! [`GraphWriter`] defines the primitive mutations digital twins may use to
//! modify their graphs; specific graph engines implement these operations
//! within a transaction. [`Applier`] applies a [`Compilation`] (a caller
//! supplied sequence of primitive mutations) atomically, and a
//! [`ChangeObserver`] summarises committed mutations into
//! [`GraphChanged`](crate::changes::GraphChanged) notifications.

use crate::cancel::Cancellation;
use crate::changes::GraphChanged;
use crate::element::{Element, ElementType};
use crate::error::{CodecError, WriteError};
use crate::registry;
use crate::relate::RelationshipAsserter;

/// The operations digital twins may use to modify their graphs, each scoped
/// to the enclosing transaction.
pub trait GraphWriter {
    /// Guarantees that, on a successful return, the given payload is present
    /// as a node in the graph.
    ///
    /// If the payload is already present the call has no meaningful effect
    /// (implementations may refresh node metadata). Otherwise a new node
    /// with the payload's properties is inserted.
    fn assert_node(&mut self, node: &dyn Element) -> Result<(), WriteError>;

    /// Guarantees that, on a successful return, the given payload is no
    /// longer represented as a node in the graph. Incident edges are
    /// removed along with the node.
    ///
    /// If the payload is not present the call has no meaningful effect.
    fn retract_node(&mut self, node: &dyn Element) -> Result<(), WriteError>;

    /// Guarantees that, on a successful return, a directed edge from the
    /// source payload to the target payload is present in the graph,
    /// creating either endpoint if it does not exist.
    fn assert_edge(&mut self, from: &dyn Element, to: &dyn Element) -> Result<(), WriteError>;

    /// Guarantees that, on a successful return, no edges remain between the
    /// given node and any node carrying the given label, regardless of edge
    /// direction. Returns the number of removed edges.
    ///
    /// The node at the other end of each removed edge is identified by its
    /// registered label; see [`GraphWriterExt::retract_edges_to`] for the
    /// typed form.
    fn retract_edges(&mut self, node: &dyn Element, target_label: &str)
        -> Result<usize, WriteError>;

    /// Lets an implementation advertise native support for relationship
    /// assertions; the generic algorithms in [`relate`](crate::relate) are
    /// used when this returns `None`.
    fn as_relationship_asserter(&mut self) -> Option<&mut dyn RelationshipAsserter> {
        None
    }
}

/// Typed conveniences over [`GraphWriter`].
pub trait GraphWriterExt: GraphWriter {
    /// [`GraphWriter::retract_edges`] with the target type's registered
    /// label resolved through the registry.
    fn retract_edges_to<T: ElementType>(&mut self, node: &dyn Element) -> Result<usize, WriteError> {
        let label = registry::label_of::<T>()
            .ok_or_else(|| CodecError::UnregisteredType(T::NAME.to_string()))?;
        self.retract_edges(node, &label)
    }
}

impl<W: GraphWriter + ?Sized> GraphWriterExt for W {}

/// A caller-supplied sequence of primitive graph mutations executed
/// atomically within one transaction.
///
/// A compilation is called with a [`GraphWriter`] scoped to its
/// transaction; returning an error rolls the transaction back.
pub type Compilation<'a> = &'a mut dyn FnMut(&mut dyn GraphWriter) -> Result<(), WriteError>;

/// Applies a [`Compilation`] to a graph atomically and concurrently.
///
/// It is up to the applier to maintain the graph's data integrity: failed
/// compilations must not commit changes. `apply` may be called concurrently
/// from many threads.
pub trait Applier {
    fn apply(&self, ctx: &Cancellation, compilation: Compilation<'_>) -> Result<(), WriteError>;
}

/// Observes changes within a graph since the last observation,
/// differentiating between created, updated, and removed components.
///
/// Implementations summarise the graph's evolution without requiring
/// callers to understand the underlying graph database mechanics.
pub trait ChangeObserver {
    type Error: std::error::Error + Send + Sync + 'static;

    fn what_changed(&self, ctx: &Cancellation) -> Result<GraphChanged, Self::Error>;
}
