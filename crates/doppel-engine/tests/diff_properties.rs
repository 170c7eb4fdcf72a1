//! Property-based tests for the snapshot diff algorithms.

use std::collections::{HashMap, HashSet};

use proptest::collection::vec;
use proptest::prelude::*;

use doppel_core::{hash_components, ComponentHash, ComponentId};
use doppel_engine::Snapshot;

fn id(b: [u8; 20]) -> ComponentId {
    ComponentId::from(b)
}

fn hash(b: [u8; 20]) -> ComponentHash {
    ComponentHash::from(b)
}

prop_compose! {
    /// A forest: distinct component ids with arbitrary hashes.
    fn forest(max: usize)(
        entries in vec((any::<[u8; 20]>(), any::<[u8; 20]>()), 0..max)
    ) -> Vec<(ComponentId, ComponentHash)> {
        let mut seen = HashSet::new();
        entries
            .into_iter()
            .filter(|(i, _)| seen.insert(*i))
            .map(|(i, h)| (id(i), hash(h)))
            .collect()
    }
}

proptest! {
    /// A full diff applied to the old snapshot reconstructs the new one:
    /// inserting created and updated components and deleting removed ones
    /// yields the newer forest hash.
    #[test]
    fn diff_linearity(
        old_entries in forest(16),
        new_entries in forest(16),
    ) {
        let old: Snapshot = old_entries.iter().cloned().collect();
        let new: Snapshot = new_entries.iter().cloned().collect();
        let new_map: HashMap<ComponentId, ComponentHash> =
            new_entries.iter().cloned().collect();

        let diff = old.diff(&new);

        let mut applied: HashMap<ComponentId, ComponentHash> =
            old_entries.iter().cloned().collect();
        for created in &diff.created {
            applied.insert(*created, new_map[created]);
        }
        for updated in &diff.updated {
            applied.insert(*updated, new_map[updated]);
        }
        for removed in &diff.removed {
            applied.remove(removed);
        }

        prop_assert_eq!(hash_components(&applied), new.graph_hash());
    }

    /// When every changed component's root is dirty, the partial diff
    /// detects every creation, update, and removal exactly.
    #[test]
    fn partial_diff_completeness(
        base in forest(16),
        fresh in forest(8),
        selector in vec(any::<u8>(), 0..16),
        new_hashes in vec(any::<[u8; 20]>(), 16),
    ) {
        // Partition the base forest into untouched / updated / removed
        // components, driven by the selector bytes.
        let mut untouched = Vec::new();
        let mut updated = Vec::new();
        let mut removed = Vec::new();
        for (i, entry) in base.iter().enumerate() {
            match selector.get(i).copied().unwrap_or(0) % 3 {
                0 => untouched.push(*entry),
                1 => updated.push((entry.0, hash(new_hashes[i % new_hashes.len()]))),
                _ => removed.push(*entry),
            }
        }
        // Created components are the fresh ids not colliding with base.
        let base_ids: HashSet<ComponentId> = base.iter().map(|(i, _)| *i).collect();
        let created: Vec<(ComponentId, ComponentHash)> = fresh
            .into_iter()
            .filter(|(i, _)| !base_ids.contains(i))
            .collect();

        // Guard against an "update" that drew the same hash again.
        let old_hashes: HashMap<ComponentId, ComponentHash> = base.iter().cloned().collect();
        updated.retain(|(i, h)| old_hashes[i] != *h);

        let old: Snapshot = base.iter().cloned().collect();

        // The sweep sees every touched component plus whatever untouched
        // components happened to be re-read.
        let mut partial: HashMap<ComponentId, ComponentHash> = HashMap::new();
        partial.extend(untouched.iter().cloned());
        partial.extend(updated.iter().cloned());
        partial.extend(created.iter().cloned());

        // Every changed component's root is dirty; removals are only
        // discoverable through dirty roots.
        let mut dirty: Vec<ComponentId> = Vec::new();
        dirty.extend(updated.iter().map(|(i, _)| *i));
        dirty.extend(removed.iter().map(|(i, _)| *i));
        dirty.extend(created.iter().map(|(i, _)| *i));

        let diff = old.partial_diff(&partial, &dirty);

        let got_created: HashSet<ComponentId> = diff.created.iter().copied().collect();
        let want_created: HashSet<ComponentId> = created.iter().map(|(i, _)| *i).collect();
        prop_assert_eq!(got_created, want_created);

        let got_updated: HashSet<ComponentId> = diff.updated.iter().copied().collect();
        let want_updated: HashSet<ComponentId> = updated.iter().map(|(i, _)| *i).collect();
        prop_assert_eq!(got_updated, want_updated);

        let got_removed: HashSet<ComponentId> = diff.removed.iter().copied().collect();
        let want_removed: HashSet<ComponentId> = removed.iter().map(|(i, _)| *i).collect();
        prop_assert_eq!(got_removed, want_removed);
    }
}
