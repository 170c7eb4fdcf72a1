//! Relationship assertions over the graph-writer protocol.
//!
//! These helpers modify the relationships between nodes according to the
//! common cardinality patterns: one-to-one, one-to-many, many-to-one, and
//! many-to-many.
//!
//! When asserting a relationship between two payloads, the relation must
//! hold for all values of the same type pair: every source of type A and
//! target of type B must always be asserted with the same cardinality. The
//! assertion functions panic when they detect that the graph violated that
//! constraint before they were called. The graph is not observed directly,
//! but the number of retracted edges hints at its prior state, and more
//! edges than the cardinality allows means two call sites asserted
//! incompatible cardinalities for the same type pair.
//!
//! A [`GraphWriter`] may specialise these patterns into native constraints
//! by returning a [`RelationshipAsserter`] from
//! [`as_relationship_asserter`](GraphWriter::as_relationship_asserter);
//! for example, a one-to-one assertion involves two wildcard retractions
//! which a backend can skip when the two nodes are already connected
//! according to the association's constraints.

use crate::element::Element;
use crate::error::{CodecError, WriteError};
use crate::registry::label_of_element;
use crate::writer::GraphWriter;

/// Implemented by writers that natively assert relationship cardinalities.
///
/// Implementations may leave the graph partially modified on error;
/// transaction management (or an equivalent rollback mechanism) is up to
/// the applier.
pub trait RelationshipAsserter {
    /// Asserts that a single edge connects the source and target, that no
    /// other edge leaves the source towards a node of the target's type,
    /// and that no other edge reaches the target from a node of the
    /// source's type.
    fn assert_one_to_one(
        &mut self,
        source: &dyn Element,
        target: &dyn Element,
    ) -> Result<(), WriteError>;

    /// Asserts that a single edge reaches the target from a node of the
    /// source's type, and that it connects the given source and target.
    fn assert_one_to_many(
        &mut self,
        source: &dyn Element,
        target: &dyn Element,
    ) -> Result<(), WriteError>;

    /// Asserts that a single edge leaves the source towards a node of the
    /// target's type, and that it connects the given source and target.
    fn assert_many_to_one(
        &mut self,
        source: &dyn Element,
        target: &dyn Element,
    ) -> Result<(), WriteError>;

    /// Asserts that an edge connects the given source and target.
    fn assert_many_to_many(
        &mut self,
        source: &dyn Element,
        target: &dyn Element,
    ) -> Result<(), WriteError>;
}

fn label_for(node: &dyn Element) -> Result<String, WriteError> {
    label_of_element(node)
        .ok_or_else(|| CodecError::UnregisteredType(node.type_name().to_string()).into())
}

/// Asserts a strict one-to-one relationship between the source and target.
///
/// Prior connections are adjusted to maintain the cardinality:
///
/// - edges from the source to any node of the target's type are retracted;
/// - edges to the target from any node of the source's type are retracted.
///
/// # Panics
///
/// Panics when more than one edge was retracted in either direction: the
/// graph already violated the one-to-one constraint before this call.
pub fn one_to_one(
    w: &mut (impl GraphWriter + ?Sized),
    source: &dyn Element,
    target: &dyn Element,
) -> Result<(), WriteError> {
    if let Some(asserter) = w.as_relationship_asserter() {
        return asserter.assert_one_to_one(source, target);
    }

    let target_label = label_for(target)?;
    let source_label = label_for(source)?;

    let edges_from = w.retract_edges(source, &target_label)?;
    if edges_from > 1 {
        // One-to-one maintains at most a single edge originating from the
        // source to any value of the target's type.
        panic_inconsistent_graph("one-to-one", "from source", edges_from);
    }

    let edges_to = w.retract_edges(target, &source_label)?;
    if edges_to > 1 {
        // One-to-one maintains at most a single edge to the target
        // originating from any value of the source's type.
        panic_inconsistent_graph("one-to-one", "to target", edges_to);
    }

    w.assert_edge(source, target)
}

/// Asserts a strict one-to-many relationship from the source to the target.
///
/// Edges from the source to other nodes of the target's type are retained;
/// edges to the target from any node of the source's type are retracted.
///
/// # Panics
///
/// Panics when more than one edge to the target was retracted.
pub fn one_to_many(
    w: &mut (impl GraphWriter + ?Sized),
    source: &dyn Element,
    target: &dyn Element,
) -> Result<(), WriteError> {
    if let Some(asserter) = w.as_relationship_asserter() {
        return asserter.assert_one_to_many(source, target);
    }

    let source_label = label_for(source)?;

    let edges_to = w.retract_edges(target, &source_label)?;
    if edges_to > 1 {
        panic_inconsistent_graph("one-to-many", "to target", edges_to);
    }

    w.assert_edge(source, target)
}

/// Asserts a strict many-to-one relationship from the source to the target.
///
/// Edges to the target from other nodes of the source's type are retained;
/// edges from the source to any node of the target's type are retracted.
///
/// # Panics
///
/// Panics when more than one edge from the source was retracted.
pub fn many_to_one(
    w: &mut (impl GraphWriter + ?Sized),
    source: &dyn Element,
    target: &dyn Element,
) -> Result<(), WriteError> {
    if let Some(asserter) = w.as_relationship_asserter() {
        return asserter.assert_many_to_one(source, target);
    }

    let target_label = label_for(target)?;

    let edges_from = w.retract_edges(source, &target_label)?;
    if edges_from > 1 {
        panic_inconsistent_graph("many-to-one", "from source", edges_from);
    }

    w.assert_edge(source, target)
}

/// Asserts a many-to-many relationship between the source and target. No
/// prior connections are adjusted, so this never panics.
pub fn many_to_many(
    w: &mut (impl GraphWriter + ?Sized),
    source: &dyn Element,
    target: &dyn Element,
) -> Result<(), WriteError> {
    if let Some(asserter) = w.as_relationship_asserter() {
        return asserter.assert_many_to_many(source, target);
    }

    w.assert_edge(source, target)
}

fn panic_inconsistent_graph(relationship: &str, direction: &str, affected: usize) -> ! {
    tracing::error!(
        relationship,
        direction,
        affected,
        "relationship assertion found a graph that violates its cardinality"
    );
    panic!(
        "inconsistent graph detected: relationship {relationship} was violated with {affected} affected edges {direction}"
    );
}
