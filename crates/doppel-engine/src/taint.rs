//! The taint set of nodes touched since the last observation.

use std::collections::HashMap;
use std::sync::Mutex;

use doppel_core::{NodeHash, RawNode};

/// Stores the tainted nodes of graph components that were modified during
/// compilations.
///
/// Writers append under the internal mutex while the engine's exclusion
/// primitive admits them concurrently; the observer drains (reads and
/// clears) atomically, so taints recorded after a drain surface on the
/// next observation.
///
/// The default value is ready for use.
#[derive(Default)]
pub(crate) struct TaintSet {
    m: Mutex<HashMap<NodeHash, RawNode>>,
}

impl TaintSet {
    /// Marks the given nodes as dirty. A node already marked has its value
    /// updated; nodes are identified by their content address.
    pub(crate) fn taint(&self, nodes: impl IntoIterator<Item = RawNode>) {
        let mut m = self.m.lock().expect("taint set lock poisoned");
        for node in nodes {
            m.insert(node.content_address, node);
        }
    }

    /// Returns the dirty nodes and clears the set, so a subsequent drain
    /// without new taints returns nothing.
    pub(crate) fn drain(&self) -> Vec<RawNode> {
        let mut m = self.m.lock().expect("taint set lock poisoned");
        m.drain().map(|(_, node)| node).collect()
    }
}
