//! In-memory implementation of [`GraphBackend`].
//!
//! [`InMemoryBackend`] is a first-class backend for tests, ephemeral twins,
//! and anywhere persistence isn't needed. Write transactions mutate a
//! shadow copy of the state and swap it in on commit, so rollback is a
//! plain discard and readers always observe a quiescent view.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use doppel_core::registry::CONTENT_ADDRESS_KEY;
use doppel_core::{NodeHash, PropertyMap, RawNode};

use crate::error::BackendError;
use crate::sweep::{collect_assemblies, NodeKey};
use crate::traits::{
    AssemblyRecord, GraphBackend, NodeSelector, ReadTransaction, RetractOutcome, WriteTransaction,
};

/// The default sweep depth bound, matching the expected maximum assembly
/// depth of typical twins.
pub const DEFAULT_DEPTH_BOUND: usize = 5;

#[derive(Clone, Default)]
struct StoredNode {
    props: PropertyMap,
    metadata: PropertyMap,
}

#[derive(Clone, Default)]
struct State {
    nodes: BTreeMap<NodeKey, StoredNode>,
    /// Directed `CONNECTS` edges with their metadata.
    edges: BTreeMap<(NodeKey, NodeKey), PropertyMap>,
}

impl State {
    fn raw_node(&self, key: &NodeKey) -> Result<RawNode, BackendError> {
        let stored = self
            .nodes
            .get(key)
            .ok_or_else(|| BackendError::Integrity(format!("dangling node key {key:?}")))?;
        Ok(RawNode {
            label: key.label.clone(),
            content_address: NodeHash::from_hex(&key.address)
                .map_err(doppel_core::CodecError::from)?,
            props: stored.props.clone(),
            metadata: stored.metadata.clone(),
        })
    }

    fn upsert_node(&mut self, node: &RawNode) {
        let key = node_key(node);
        let now = Utc::now().to_rfc3339();
        match self.nodes.get_mut(&key) {
            Some(stored) => {
                stored.props = node.props.clone();
                stored.metadata.insert("_last_modified", now);
            }
            None => {
                let mut metadata = PropertyMap::new();
                metadata.insert(CONTENT_ADDRESS_KEY, node.content_address.to_hex());
                metadata.insert("_created_at", now.clone());
                metadata.insert("_last_modified", now);
                self.nodes.insert(
                    key,
                    StoredNode {
                        props: node.props.clone(),
                        metadata,
                    },
                );
            }
        }
    }

    fn adjacency(&self) -> (BTreeSet<NodeKey>, BTreeMap<NodeKey, BTreeSet<NodeKey>>) {
        let nodes: BTreeSet<NodeKey> = self.nodes.keys().cloned().collect();
        let mut out: BTreeMap<NodeKey, BTreeSet<NodeKey>> = BTreeMap::new();
        for (from, to) in self.edges.keys() {
            out.entry(from.clone()).or_default().insert(to.clone());
        }
        (nodes, out)
    }
}

fn node_key(node: &RawNode) -> NodeKey {
    NodeKey {
        label: node.label.clone(),
        address: node.content_address.to_hex(),
    }
}

fn selector_key(selector: &NodeSelector) -> NodeKey {
    NodeKey {
        label: selector.label.clone(),
        address: selector.content_address.to_hex(),
    }
}

/// An ephemeral graph backend holding everything in process memory.
pub struct InMemoryBackend {
    state: Mutex<State>,
    depth_bound: usize,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        InMemoryBackend::new()
    }
}

impl InMemoryBackend {
    /// Returns an empty backend with the default sweep depth bound.
    pub fn new() -> Self {
        InMemoryBackend::with_depth_bound(DEFAULT_DEPTH_BOUND)
    }

    /// Returns an empty backend whose sweep refuses assemblies deeper than
    /// the given bound.
    pub fn with_depth_bound(depth_bound: usize) -> Self {
        InMemoryBackend {
            state: Mutex::new(State::default()),
            depth_bound,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("in-memory backend state poisoned")
    }
}

impl GraphBackend for InMemoryBackend {
    fn write(&self) -> Result<Box<dyn WriteTransaction + '_>, BackendError> {
        let guard = self.lock();
        let shadow = guard.clone();
        Ok(Box::new(MemoryWriteTx { guard, shadow }))
    }

    fn read(&self) -> Result<Box<dyn ReadTransaction + '_>, BackendError> {
        Ok(Box::new(MemoryReadTx {
            guard: self.lock(),
            depth_bound: self.depth_bound,
        }))
    }

    fn bootstrap(&self, labels: &[String]) -> Result<(), BackendError> {
        // Node keys are (label, address) pairs, so per-label address
        // uniqueness holds structurally; nothing to declare.
        tracing::debug!(labels = labels.len(), "in-memory backend bootstrapped");
        Ok(())
    }

    fn rewrite_wrapped_content_addresses(&self) -> Result<u64, BackendError> {
        let mut state = self.lock();
        let mut rewritten = 0;

        let wrapped: Vec<NodeKey> = state
            .nodes
            .keys()
            .filter(|k| k.address.starts_with("node(") && k.address.ends_with(')'))
            .cloned()
            .collect();

        for old_key in wrapped {
            let bare = old_key.address["node(".len()..old_key.address.len() - 1].to_string();
            let new_key = NodeKey {
                label: old_key.label.clone(),
                address: bare.clone(),
            };

            if let Some(mut stored) = state.nodes.remove(&old_key) {
                stored.metadata.insert(CONTENT_ADDRESS_KEY, bare);
                state.nodes.insert(new_key.clone(), stored);
                rewritten += 1;
            }

            let edges: Vec<(NodeKey, NodeKey)> = state
                .edges
                .keys()
                .filter(|(f, t)| *f == old_key || *t == old_key)
                .cloned()
                .collect();
            for (from, to) in edges {
                let meta = state.edges.remove(&(from.clone(), to.clone()));
                let from = if from == old_key { new_key.clone() } else { from };
                let to = if to == old_key { new_key.clone() } else { to };
                if let Some(meta) = meta {
                    state.edges.insert((from, to), meta);
                }
            }
        }

        Ok(rewritten)
    }
}

struct MemoryWriteTx<'a> {
    guard: MutexGuard<'a, State>,
    shadow: State,
}

impl WriteTransaction for MemoryWriteTx<'_> {
    fn assert_node(&mut self, node: &RawNode) -> Result<u64, BackendError> {
        self.shadow.upsert_node(node);
        Ok(1)
    }

    fn retract_node(&mut self, node: &RawNode) -> Result<RetractOutcome, BackendError> {
        let key = node_key(node);
        if !self.shadow.nodes.contains_key(&key) {
            return Ok(RetractOutcome::default());
        }

        let mut adjacent_keys: BTreeSet<NodeKey> = BTreeSet::new();
        let incident: Vec<(NodeKey, NodeKey)> = self
            .shadow
            .edges
            .keys()
            .filter(|(f, t)| *f == key || *t == key)
            .cloned()
            .collect();
        for (from, to) in &incident {
            let other = if *from == key { to } else { from };
            adjacent_keys.insert(other.clone());
        }

        let adjacent = adjacent_keys
            .iter()
            .map(|k| self.shadow.raw_node(k))
            .collect::<Result<Vec<_>, _>>()?;

        for edge in incident {
            self.shadow.edges.remove(&edge);
        }
        self.shadow.nodes.remove(&key);

        Ok(RetractOutcome {
            affected: 1,
            adjacent,
        })
    }

    fn assert_edge(&mut self, from: &RawNode, to: &RawNode) -> Result<u64, BackendError> {
        self.shadow.upsert_node(from);
        self.shadow.upsert_node(to);

        let edge = (node_key(from), node_key(to));
        let now = Utc::now().to_rfc3339();
        match self.shadow.edges.get_mut(&edge) {
            Some(meta) => {
                meta.insert("_last_modified", now);
            }
            None => {
                let mut meta = PropertyMap::new();
                meta.insert("_created_at", now.clone());
                meta.insert("_last_modified", now);
                self.shadow.edges.insert(edge, meta);
            }
        }
        Ok(1)
    }

    fn retract_edges(
        &mut self,
        node: &RawNode,
        target_label: &str,
    ) -> Result<RetractOutcome, BackendError> {
        let key = node_key(node);
        let matching: Vec<(NodeKey, NodeKey)> = self
            .shadow
            .edges
            .keys()
            .filter(|(f, t)| {
                (*f == key && t.label == target_label) || (*t == key && f.label == target_label)
            })
            .cloned()
            .collect();

        let mut adjacent_keys: BTreeSet<NodeKey> = BTreeSet::new();
        for (from, to) in &matching {
            let other = if *from == key { to } else { from };
            adjacent_keys.insert(other.clone());
        }
        let adjacent = adjacent_keys
            .iter()
            .map(|k| self.shadow.raw_node(k))
            .collect::<Result<Vec<_>, _>>()?;

        let affected = matching.len() as u64;
        for edge in matching {
            self.shadow.edges.remove(&edge);
        }

        Ok(RetractOutcome { affected, adjacent })
    }

    fn commit(mut self: Box<Self>) -> Result<(), BackendError> {
        *self.guard = std::mem::take(&mut self.shadow);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        // The shadow copy is simply discarded.
        Ok(())
    }
}

struct MemoryReadTx<'a> {
    guard: MutexGuard<'a, State>,
    depth_bound: usize,
}

impl ReadTransaction for MemoryReadTx<'_> {
    fn fetch_assemblies(
        &mut self,
        seed: Option<&NodeSelector>,
    ) -> Result<Vec<AssemblyRecord>, BackendError> {
        let (nodes, out) = self.guard.adjacency();
        let seed_key = seed.map(selector_key);
        let state = &*self.guard;
        collect_assemblies(
            &nodes,
            &out,
            seed_key.as_ref(),
            self.depth_bound,
            &mut |k| state.raw_node(k),
        )
    }
}
