//! The [`GraphWriter`] implementation over a backend write transaction.
//!
//! Translates payloads to raw nodes, executes the backend's primitive
//! mutations, enforces the affected-row expectations, and taints every
//! touched node for the next observation.

use doppel_core::{format_node, Cancellation, Element, GraphWriter, WriteError};
use doppel_storage::{BackendError, WriteTransaction};

use crate::taint::TaintSet;

pub(crate) struct TwinWriter<'a> {
    pub(crate) tx: &'a mut dyn WriteTransaction,
    pub(crate) taints: &'a TaintSet,
    pub(crate) ctx: &'a Cancellation,
}

impl TwinWriter<'_> {
    fn check_cancelled(&self) -> Result<(), WriteError> {
        if self.ctx.is_cancelled() {
            return Err(WriteError::Cancelled);
        }
        Ok(())
    }
}

fn backend_err(err: BackendError) -> WriteError {
    WriteError::backend(err)
}

/// We modify the underlying graph in a way that prompts us when it
/// violates our basic constraints. When we suspect the graph has lost its
/// integrity we may no longer operate on it, so all operations stop
/// immediately: a panic preceded by a trace event to bring the situation
/// to immediate attention.
fn panic_corrupted_graph(reason: &str) -> ! {
    tracing::error!(reason, "encountered a graph that violates digital-twin axioms");
    panic!("graph violates digital-twin axioms: {reason}");
}

impl GraphWriter for TwinWriter<'_> {
    fn assert_node(&mut self, node: &dyn Element) -> Result<(), WriteError> {
        self.check_cancelled()?;
        let raw = format_node(node)?;

        let affected = self.tx.assert_node(&raw).map_err(backend_err)?;
        // A single payload is represented by a single node: asserting it
        // either creates that node or refreshes it. Any other affected
        // count means the graph lost its integrity.
        if affected != 1 {
            panic_corrupted_graph(&format!(
                "assert-node modified {affected} nodes instead of 1"
            ));
        }

        // Only the asserted node is touched; no other node is affected by
        // this operation.
        self.taints.taint([raw]);
        Ok(())
    }

    fn retract_node(&mut self, node: &dyn Element) -> Result<(), WriteError> {
        self.check_cancelled()?;
        let raw = format_node(node)?;

        let outcome = self.tx.retract_node(&raw).map_err(backend_err)?;
        // Retracting a payload deletes at most the single node representing
        // it (present or not).
        if outcome.affected > 1 {
            panic_corrupted_graph(&format!(
                "retract-node modified {} nodes instead of 0/1",
                outcome.affected
            ));
        }

        // The retracted node is directly changed; nodes previously
        // connected to it lose a relationship, which alters their
        // adjacency, so they are tainted as well.
        self.taints.taint([raw]);
        self.taints.taint(outcome.adjacent);
        Ok(())
    }

    fn assert_edge(&mut self, from: &dyn Element, to: &dyn Element) -> Result<(), WriteError> {
        self.check_cancelled()?;
        let src = format_node(from)?;
        let dst = format_node(to)?;

        let affected = self.tx.assert_edge(&src, &dst).map_err(backend_err)?;
        // Asserting an edge ensures the existence of exactly one edge
        // between the two nodes.
        if affected != 1 {
            panic_corrupted_graph(&format!(
                "assert-edge modified {affected} edges instead of 1"
            ));
        }

        // Both endpoints are directly involved; no other node is affected.
        self.taints.taint([src, dst]);
        Ok(())
    }

    fn retract_edges(
        &mut self,
        node: &dyn Element,
        target_label: &str,
    ) -> Result<usize, WriteError> {
        self.check_cancelled()?;
        let raw = format_node(node)?;

        let outcome = self
            .tx
            .retract_edges(&raw, target_label)
            .map_err(backend_err)?;

        // The originating node loses connections; the nodes at the other
        // end of each removed edge have their adjacency altered.
        self.taints.taint([raw]);
        self.taints.taint(outcome.adjacent);

        Ok(outcome.affected as usize)
    }
}
