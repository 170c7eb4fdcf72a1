//! The engine's snapshot of the forest and its diff algorithms.

use std::collections::HashMap;

use doppel_core::{
    hash_components, AssemblyRef, ComponentHash, ComponentId, ForestHash, GraphChanged,
};

/// The engine's last observed mapping of component ids to component
/// hashes, covering the whole forest.
///
/// The snapshot is process-memory state: it is captured by a full sweep at
/// engine construction, mutated only by a successful observation, and
/// never shared across engines.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    components: HashMap<ComponentId, ComponentHash>,
}

/// The categorised outcome of comparing two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Components present now but absent before.
    pub created: Vec<ComponentId>,
    /// Components whose content hash changed.
    pub updated: Vec<ComponentId>,
    /// Components no longer present.
    pub removed: Vec<ComponentId>,
}

impl SnapshotDiff {
    /// Reports whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Total count of changed components.
    pub fn total(&self) -> usize {
        self.created.len() + self.updated.len() + self.removed.len()
    }
}

impl Snapshot {
    pub fn insert(&mut self, id: ComponentId, hash: ComponentHash) {
        self.components.insert(id, hash);
    }

    pub fn get(&self, id: &ComponentId) -> Option<ComponentHash> {
        self.components.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// A consolidated hash of the snapshot's entire state. Two snapshots
    /// with equal graph hashes describe identical forests.
    pub fn graph_hash(&self) -> ForestHash {
        hash_components(&self.components)
    }

    /// Reports whether the snapshot contains the given assembly with an
    /// unchanged hash, indicating it has not been altered since the
    /// snapshot was taken.
    pub fn contains_assembly(&self, assembly: &dyn AssemblyRef) -> bool {
        self.get(&assembly.assembly_id()) == Some(assembly.assembly_hash())
    }

    /// Compares this snapshot against a complete newer snapshot of the
    /// same graph, categorising every component as created, updated, or
    /// removed; unchanged components are not returned.
    pub fn diff(&self, newer: &Snapshot) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();

        for (id, new_hash) in &newer.components {
            match self.components.get(id) {
                None => diff.created.push(*id),
                Some(old_hash) if old_hash != new_hash => diff.updated.push(*id),
                Some(_) => {}
            }
        }

        for id in self.components.keys() {
            if !newer.components.contains_key(id) {
                diff.removed.push(*id);
            }
        }

        diff
    }

    /// Compares this full snapshot against a partial snapshot containing
    /// only the swept components.
    ///
    /// Because the partial snapshot's knowledge of the graph is limited,
    /// absence from it proves nothing by itself: removal can only be
    /// concluded for `dirty_roots`: the singleton component ids of every
    /// node touched by the writes leading to the partial snapshot. A dirty
    /// root that was a component in this snapshot but is absent from the
    /// partial one has either merged into a larger assembly (reported as
    /// that assembly's change) or disappeared; in both cases its prior
    /// component is removed.
    pub fn partial_diff(
        &self,
        partial: &HashMap<ComponentId, ComponentHash>,
        dirty_roots: &[ComponentId],
    ) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();

        for (id, new_hash) in partial {
            match self.components.get(id) {
                None => diff.created.push(*id),
                Some(old_hash) if old_hash != new_hash => diff.updated.push(*id),
                Some(_) => {}
            }
        }

        for id in dirty_roots {
            let was_component = self.components.contains_key(id);
            let still_component = partial.contains_key(id);
            if was_component && !still_component {
                diff.removed.push(*id);
            }
        }

        diff
    }

    /// Merges an observed changeset into the snapshot: created components
    /// are added, updated ones replaced, removed ones deleted. Designed to
    /// work hand in hand with [`partial_diff`](Self::partial_diff).
    pub fn update(&mut self, changes: &GraphChanged) {
        for created in &changes.created {
            self.components
                .insert(created.assembly_id(), created.assembly_hash());
        }
        for updated in &changes.updated {
            self.components
                .insert(updated.assembly_id(), updated.assembly_hash());
        }
        for removed in &changes.removed {
            self.components.remove(&removed.id);
        }
    }
}

impl FromIterator<(ComponentId, ComponentHash)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (ComponentId, ComponentHash)>>(iter: T) -> Self {
        Snapshot {
            components: iter.into_iter().collect(),
        }
    }
}
