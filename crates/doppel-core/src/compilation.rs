//! Recording and replay of graph mutations.
//!
//! Distributed compilations let callers create reproducible graph mutations
//! that can be stored, transmitted, and applied consistently across
//! processes. A [`Recorder`] collects mutation [`Step`]s in order;
//! [`encode`]/[`decode`] move them across process boundaries; [`replay`]
//! turns them back into a compilation executable against any
//! [`GraphWriter`]. This decouples domain-specific operations from applying
//! graph mutations.
//!
//! Steps carry their payloads as [`NodeRef`]s, so the payload types must be
//! registered in the decoding process.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::element::must_content_address;
use crate::error::{CodecError, WriteError};
use crate::hash::NodeHash;
use crate::registry::{label_of, NodeRef};
use crate::relate;
use crate::writer::GraphWriter;
use crate::element::ElementType;

/// A single atomic mutation on a digital twin's graph.
///
/// In distributed compilation scenarios, steps are the fundamental units of
/// work that can be serialized and transmitted across process boundaries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    AssertNode { node: NodeRef },
    RetractNode { node: NodeRef },
    AssertEdge { from: NodeRef, to: NodeRef },
    /// Retracts all edges between the node and any node carrying the given
    /// label. The retraction count is discarded on replay.
    RetractEdges { node: NodeRef, kind: String },
    OneToOne { source: NodeRef, target: NodeRef },
    OneToMany { source: NodeRef, target: NodeRef },
    ManyToOne { source: NodeRef, target: NodeRef },
    ManyToMany { source: NodeRef, target: NodeRef },
}

impl Step {
    /// Applies the mutation to the graph using the provided writer.
    pub fn apply(&self, w: &mut dyn GraphWriter) -> Result<(), WriteError> {
        match self {
            Step::AssertNode { node } => w.assert_node(node.element()),
            Step::RetractNode { node } => w.retract_node(node.element()),
            Step::AssertEdge { from, to } => w.assert_edge(from.element(), to.element()),
            Step::RetractEdges { node, kind } => {
                w.retract_edges(node.element(), kind).map(|_| ())
            }
            Step::OneToOne { source, target } => {
                relate::one_to_one(w, source.element(), target.element())
            }
            Step::OneToMany { source, target } => {
                relate::one_to_many(w, source.element(), target.element())
            }
            Step::ManyToOne { source, target } => {
                relate::many_to_one(w, source.element(), target.element())
            }
            Step::ManyToMany { source, target } => {
                relate::many_to_many(w, source.element(), target.element())
            }
        }
    }

    /// The nodes this step affects, used to track dependencies between
    /// steps and to pre-validate execution.
    pub fn targets(&self) -> Vec<&NodeRef> {
        match self {
            Step::AssertNode { node } | Step::RetractNode { node } => vec![node],
            Step::RetractEdges { node, .. } => vec![node],
            Step::AssertEdge { from, to } => vec![from, to],
            Step::OneToOne { source, target }
            | Step::OneToMany { source, target }
            | Step::ManyToOne { source, target }
            | Step::ManyToMany { source, target } => vec![source, target],
        }
    }
}

/// Serializes steps for storage or transmission.
pub fn encode(steps: &[Step]) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(steps)?)
}

/// Reconstructs steps from a previously encoded byte array, restoring them
/// into executable graph mutations that can be replayed in any compatible
/// process.
pub fn decode(data: &[u8]) -> Result<Vec<Step>, CodecError> {
    Ok(serde_json::from_slice(data)?)
}

/// Creates a compilation that sequentially applies the given steps.
///
/// If any step fails, execution stops immediately and the error is
/// returned, leaving the graph partially mutated; atomicity is the
/// applier's concern.
pub fn replay(steps: &[Step]) -> impl FnMut(&mut dyn GraphWriter) -> Result<(), WriteError> + '_ {
    move |w| {
        for step in steps {
            step.apply(w)?;
        }
        Ok(())
    }
}

/// Iterates over all nodes affected by the given steps, yielding each
/// target once. Nodes are deduplicated by their content address, which maps
/// one-to-one to payload values.
pub fn targets(steps: &[Step]) -> Vec<NodeRef> {
    let mut seen: HashSet<NodeHash> = HashSet::new();
    let mut out = Vec::new();
    for step in steps {
        for target in step.targets() {
            let ca = must_content_address(target.element());
            if seen.insert(ca) {
                out.push(target.clone());
            }
        }
    }
    out
}

/// Collects a sequence of graph mutations that can later be applied through
/// a [`GraphWriter`]. Each mutation is stored as a separate [`Step`] in the
/// order it was added.
///
/// The default value is ready to use.
#[derive(Default)]
pub struct Recorder {
    steps: Vec<Step>,
}

impl Recorder {
    /// Clears all accumulated steps.
    pub fn reset(&mut self) {
        self.steps.clear();
    }

    /// Returns a copy of the recorded steps. Modifying the returned vector
    /// does not affect the recorder.
    pub fn steps(&self) -> Vec<Step> {
        self.steps.clone()
    }

    /// Records a step asserting that the node exists in the graph.
    pub fn assert_node(&mut self, node: impl ElementType) {
        self.steps.push(Step::AssertNode {
            node: NodeRef::new(node),
        });
    }

    /// Records a step retracting the node and all its edges from the graph.
    pub fn retract_node(&mut self, node: impl ElementType) {
        self.steps.push(Step::RetractNode {
            node: NodeRef::new(node),
        });
    }

    /// Records a step asserting a directed edge between two nodes, creating
    /// either endpoint if absent.
    pub fn assert_edge(&mut self, from: impl ElementType, to: impl ElementType) {
        self.steps.push(Step::AssertEdge {
            from: NodeRef::new(from),
            to: NodeRef::new(to),
        });
    }

    /// Records a step retracting all edges between the node and any node of
    /// type `T`.
    ///
    /// The step captures `T`'s registered label; register `T` before
    /// recording.
    pub fn retract_edges<T: ElementType>(&mut self, node: impl ElementType) {
        let kind = label_of::<T>().unwrap_or_else(|| T::NAME.to_string());
        self.steps.push(Step::RetractEdges {
            node: NodeRef::new(node),
            kind,
        });
    }

    /// Records a one-to-one relationship assertion.
    pub fn assert_one_to_one(&mut self, source: impl ElementType, target: impl ElementType) {
        self.steps.push(Step::OneToOne {
            source: NodeRef::new(source),
            target: NodeRef::new(target),
        });
    }

    /// Records a one-to-many relationship assertion.
    pub fn assert_one_to_many(&mut self, source: impl ElementType, target: impl ElementType) {
        self.steps.push(Step::OneToMany {
            source: NodeRef::new(source),
            target: NodeRef::new(target),
        });
    }

    /// Records a many-to-one relationship assertion.
    pub fn assert_many_to_one(&mut self, source: impl ElementType, target: impl ElementType) {
        self.steps.push(Step::ManyToOne {
            source: NodeRef::new(source),
            target: NodeRef::new(target),
        });
    }

    /// Records a many-to-many relationship assertion.
    pub fn assert_many_to_many(&mut self, source: impl ElementType, target: impl ElementType) {
        self.steps.push(Step::ManyToMany {
            source: NodeRef::new(source),
            target: NodeRef::new(target),
        });
    }
}
