//! The assembly-sweep algorithm shared by the reference backends.
//!
//! Works over an adjacency view of the stored graph:
//!
//! 1. Roots are the nodes without incoming edges. With a seed, only roots
//!    that reach the seed over zero or more edges qualify (a root reaches
//!    itself, so a tainted root finds its own assembly).
//! 2. Edge tuples are collected outward from each root: every out-edge of
//!    every node within the depth bound contributes one `(from, to)`
//!    tuple.
//! 3. Isolated roots (no edges at all) yield one `(None, None)` sentinel
//!    tuple so they still produce a record.
//!
//! The depth bound is a deliberate finite cap. A node sitting beyond the
//! bound with further out-edges means the assembly would be truncated; the
//! sweep fails loudly with [`BackendError::DepthExceeded`] instead of
//! returning a partial assembly.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use doppel_core::RawNode;

use crate::error::BackendError;
use crate::traits::{AssemblyRecord, EdgeTuple};

/// Identifies a stored node within a backend: label plus bare-hex content
/// address.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct NodeKey {
    pub label: String,
    pub address: String,
}

pub(crate) fn collect_assemblies(
    nodes: &BTreeSet<NodeKey>,
    out_edges: &BTreeMap<NodeKey, BTreeSet<NodeKey>>,
    seed: Option<&NodeKey>,
    depth_bound: usize,
    load: &mut dyn FnMut(&NodeKey) -> Result<RawNode, BackendError>,
) -> Result<Vec<AssemblyRecord>, BackendError> {
    // A seed that is not stored cannot belong to any assembly.
    if let Some(seed) = seed {
        if !nodes.contains(seed) {
            return Ok(Vec::new());
        }
    }

    let incoming: BTreeSet<&NodeKey> = out_edges.values().flatten().collect();

    let mut records = Vec::new();
    for root in nodes {
        if incoming.contains(root) {
            continue;
        }
        if let Some(seed) = seed {
            if !reaches(out_edges, root, seed) {
                continue;
            }
        }

        let has_edges = out_edges.get(root).is_some_and(|tos| !tos.is_empty());
        if !has_edges {
            records.push(AssemblyRecord {
                root: load(root)?,
                tuples: vec![EdgeTuple::sentinel()],
            });
            continue;
        }

        records.push(AssemblyRecord {
            root: load(root)?,
            tuples: tuples_within_bound(out_edges, root, depth_bound, load)?,
        });
    }

    Ok(records)
}

/// Breadth-first reachability over zero or more edges.
fn reaches(
    out_edges: &BTreeMap<NodeKey, BTreeSet<NodeKey>>,
    from: &NodeKey,
    to: &NodeKey,
) -> bool {
    if from == to {
        return true;
    }
    let mut visited: BTreeSet<&NodeKey> = BTreeSet::new();
    let mut queue: VecDeque<&NodeKey> = VecDeque::new();
    visited.insert(from);
    queue.push_back(from);
    while let Some(current) = queue.pop_front() {
        for next in out_edges.get(current).into_iter().flatten() {
            if next == to {
                return true;
            }
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }
    false
}

/// Collects `(from, to)` tuples for every out-edge of every node within
/// `depth_bound` hops of the root, failing when the assembly continues past
/// the bound.
fn tuples_within_bound(
    out_edges: &BTreeMap<NodeKey, BTreeSet<NodeKey>>,
    root: &NodeKey,
    depth_bound: usize,
    load: &mut dyn FnMut(&NodeKey) -> Result<RawNode, BackendError>,
) -> Result<Vec<EdgeTuple>, BackendError> {
    let mut depth: BTreeMap<&NodeKey, usize> = BTreeMap::new();
    let mut queue: VecDeque<&NodeKey> = VecDeque::new();
    depth.insert(root, 0);
    queue.push_back(root);

    let mut tuples = Vec::new();
    while let Some(current) = queue.pop_front() {
        let d = depth[current];
        for next in out_edges.get(current).into_iter().flatten() {
            if d <= depth_bound {
                tuples.push(EdgeTuple {
                    from: Some(load(current)?),
                    to: Some(load(next)?),
                });
            } else {
                // Every edge of a node at the bound or beyond would be
                // silently dropped; refuse instead.
                return Err(BackendError::DepthExceeded {
                    root: root.address.clone(),
                    bound: depth_bound,
                });
            }
            if !depth.contains_key(next) {
                depth.insert(next, d + 1);
                queue.push_back(next);
            }
        }
    }

    Ok(tuples)
}
