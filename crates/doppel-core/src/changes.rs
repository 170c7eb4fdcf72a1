//! Change notifications and their disassembly.
//!
//! A [`GraphChanged`] message notifies about the evolution of a digital
//! twin's entire graph between two observations: which assemblies were
//! created, updated, or removed, chained by the forest hash before and
//! after. [`disassemble`] splits one `GraphChanged` into per-component
//! [`ComponentChanged`] messages keyed by [`ComponentId`], enabling
//! partitioned downstream consumption while preserving per-component
//! ordering.
//!
//! Consecutive messages are linearly chained: `graph_before` of message
//! *k+1* equals `graph_after` of message *k*. Consumers that depend on
//! that chain validate it with a [`ContinuityCheck`] and must treat a
//! detected discontinuity as fatal.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assembly::{Assembly, AssemblyRef};
use crate::hash::{ComponentHash, ComponentId, ForestHash, NodeHash};

/// A new assembly appeared in the graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssemblyCreated {
    pub assembly: Assembly,
}

impl AssemblyRef for AssemblyCreated {
    fn assembly_id(&self) -> ComponentId {
        self.assembly.assembly_id()
    }

    fn assembly_hash(&self) -> ComponentHash {
        self.assembly.assembly_hash()
    }
}

/// An existing assembly changed content while keeping its identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssemblyUpdated {
    /// The assembly's hash as previously observed.
    pub baseline: ComponentHash,
    /// The assembly's current state.
    pub assembly: Assembly,
}

impl AssemblyRef for AssemblyUpdated {
    fn assembly_id(&self) -> ComponentId {
        self.assembly.assembly_id()
    }

    fn assembly_hash(&self) -> ComponentHash {
        self.assembly.assembly_hash()
    }
}

/// An assembly disappeared from the graph.
///
/// Carries only the last-known identity and content hash; the accessors
/// shared with live assemblies return empty views, so downstream code need
/// not special-case removals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyRemoved {
    pub id: ComponentId,
    pub hash: ComponentHash,
}

impl AssemblyRemoved {
    pub fn roots(&self) -> &[NodeHash] {
        &[]
    }

    pub fn value(&self, _n: NodeHash) -> Option<&dyn crate::element::Element> {
        None
    }

    pub fn edges_of(&self, _n: NodeHash) -> &[NodeHash] {
        &[]
    }
}

impl AssemblyRef for AssemblyRemoved {
    fn assembly_id(&self) -> ComponentId {
        self.id
    }

    fn assembly_hash(&self) -> ComponentHash {
        self.hash
    }
}

/// Notifies about changes to the internal graph-based world-view maintained
/// by a digital twin.
///
/// The payload types of the carried assemblies must be registered (see
/// [`register`](crate::registry::register)) in the receiving process before
/// decoding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphChanged {
    /// Forest hash of the graph before these changes.
    pub graph_before: ForestHash,
    pub created: Vec<AssemblyCreated>,
    pub updated: Vec<AssemblyUpdated>,
    pub removed: Vec<AssemblyRemoved>,
    /// Forest hash of the graph after these changes.
    pub graph_after: ForestHash,
    /// The time, in UTC, the change was computed. The information in this
    /// message is accurate up to this timestamp, not a moment afterward.
    pub timestamp: DateTime<Utc>,
}

impl GraphChanged {
    /// Reports whether the message carries no changes, indicated by equal
    /// forest hashes before and after.
    pub fn is_empty(&self) -> bool {
        self.graph_before == self.graph_after
    }
}

/// Renders a changeset for humans, one line per changed component, each
/// line prefixed by `indent`.
pub fn format_changes(changes: &GraphChanged, indent: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{indent}graph {} -> {}", changes.graph_before, changes.graph_after);
    for c in &changes.created {
        let _ = writeln!(out, "{indent}created {} {}", c.assembly_id(), c.assembly_hash());
    }
    for u in &changes.updated {
        let _ = writeln!(
            out,
            "{indent}updated {} {} (was {})",
            u.assembly_id(),
            u.assembly_hash(),
            u.baseline
        );
    }
    for r in &changes.removed {
        let _ = writeln!(out, "{indent}removed {} {}", r.id, r.hash);
    }
    out
}

/// One change of a [`ComponentChanged`] message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AssemblyChange {
    Created(AssemblyCreated),
    Updated(AssemblyUpdated),
    Removed(AssemblyRemoved),
}

impl AssemblyRef for AssemblyChange {
    fn assembly_id(&self) -> ComponentId {
        match self {
            AssemblyChange::Created(c) => c.assembly_id(),
            AssemblyChange::Updated(u) => u.assembly_id(),
            AssemblyChange::Removed(r) => r.assembly_id(),
        }
    }

    fn assembly_hash(&self) -> ComponentHash {
        match self {
            AssemblyChange::Created(c) => c.assembly_hash(),
            AssemblyChange::Updated(u) => u.assembly_hash(),
            AssemblyChange::Removed(r) => r.assembly_hash(),
        }
    }
}

/// Notifies about a change to a specific component of a digital twin's
/// graph: a new assembly was created, an existing one updated, or an
/// existing one removed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentChanged {
    pub change: AssemblyChange,
    /// The hash of the entire graph at the time this component changed;
    /// corresponds to the `graph_after` of the [`GraphChanged`] message
    /// this change was part of.
    pub graph_hash: ForestHash,
    /// The time, in UTC, the entire graph change was computed.
    pub timestamp: DateTime<Utc>,
}

impl ComponentChanged {
    pub fn is_created(&self) -> bool {
        matches!(self.change, AssemblyChange::Created(_))
    }

    pub fn is_updated(&self) -> bool {
        matches!(self.change, AssemblyChange::Updated(_))
    }

    pub fn is_removed(&self) -> bool {
        matches!(self.change, AssemblyChange::Removed(_))
    }

    /// The full assembly for created and updated changes; `None` for
    /// removals.
    pub fn assembly(&self) -> Option<&Assembly> {
        match &self.change {
            AssemblyChange::Created(c) => Some(&c.assembly),
            AssemblyChange::Updated(u) => Some(&u.assembly),
            AssemblyChange::Removed(_) => None,
        }
    }
}

impl AssemblyRef for ComponentChanged {
    fn assembly_id(&self) -> ComponentId {
        self.change.assembly_id()
    }

    fn assembly_hash(&self) -> ComponentHash {
        self.change.assembly_hash()
    }
}

/// Disassembles the given [`GraphChanged`] message into individual
/// [`ComponentChanged`] messages, one per changed component. Each carries
/// the shared graph-after hash and timestamp; use the component id as the
/// partition key to preserve per-component ordering downstream.
pub fn disassemble(graph: &GraphChanged) -> Vec<ComponentChanged> {
    let mut changes = Vec::with_capacity(
        graph.created.len() + graph.updated.len() + graph.removed.len(),
    );

    for c in &graph.created {
        changes.push(ComponentChanged {
            change: AssemblyChange::Created(c.clone()),
            graph_hash: graph.graph_after,
            timestamp: graph.timestamp,
        });
    }
    for u in &graph.updated {
        changes.push(ComponentChanged {
            change: AssemblyChange::Updated(u.clone()),
            graph_hash: graph.graph_after,
            timestamp: graph.timestamp,
        });
    }
    for r in &graph.removed {
        changes.push(ComponentChanged {
            change: AssemblyChange::Removed(r.clone()),
            graph_hash: graph.graph_after,
            timestamp: graph.timestamp,
        });
    }

    changes
}

/// A break in the linear chain of [`GraphChanged`] messages.
///
/// Consumers that maintain state derived from the change stream must treat
/// this as fatal: their view of the graph has diverged.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("graph change discontinuity: last handled graph {last}, received previous graph {received}")]
pub struct DiscontinuityError {
    pub last: ForestHash,
    pub received: ForestHash,
}

/// Validates that consecutive [`GraphChanged`] messages chain linearly.
#[derive(Debug, Default)]
pub struct ContinuityCheck {
    last: Option<ForestHash>,
}

impl ContinuityCheck {
    pub fn new() -> Self {
        ContinuityCheck::default()
    }

    /// Records the given message, failing when its `graph_before` does not
    /// equal the previously observed `graph_after`.
    pub fn observe(&mut self, changes: &GraphChanged) -> Result<(), DiscontinuityError> {
        if let Some(last) = self.last {
            if last != changes.graph_before {
                return Err(DiscontinuityError {
                    last,
                    received: changes.graph_before,
                });
            }
        }
        self.last = Some(changes.graph_after);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::builder::AssemblyBuilder;
    use crate::element::{Element, ElementType, NodeHasher};
    use crate::error::{CodecError, HashError};
    use crate::hash::ADDRESS_LEN;
    use crate::property::PropertyMap;
    use crate::registry::register;

    #[derive(Debug, Clone)]
    struct Marker {
        id: String,
    }

    impl ElementType for Marker {
        const PATH: &'static str = module_path!();
        const NAME: &'static str = "ChangesTestMarker";

        fn hash_fields(&self, h: &mut NodeHasher) -> Result<(), HashError> {
            h.str_field("Id", &self.id);
            Ok(())
        }

        fn to_properties(&self) -> Result<PropertyMap, CodecError> {
            let mut m = PropertyMap::new();
            m.insert("Id", self.id.clone());
            Ok(m)
        }

        fn from_properties(props: &PropertyMap) -> Result<Self, CodecError> {
            Ok(Marker {
                id: props.text("Id")?.to_string(),
            })
        }
    }

    fn new_assembly(id: &str) -> Assembly {
        register::<Marker>();
        let mut b = AssemblyBuilder::default();
        let node: Arc<dyn Element> = Arc::new(Marker { id: id.into() });
        b.roots([node]);
        b.build()
    }

    fn forest(b: u8) -> ForestHash {
        ForestHash::from([b; ADDRESS_LEN])
    }

    fn sample_changes() -> GraphChanged {
        GraphChanged {
            graph_before: forest(1),
            created: vec![
                AssemblyCreated { assembly: new_assembly("1") },
                AssemblyCreated { assembly: new_assembly("2") },
            ],
            updated: vec![AssemblyUpdated {
                baseline: ComponentHash::from([0xaa; ADDRESS_LEN]),
                assembly: new_assembly("3"),
            }],
            removed: vec![AssemblyRemoved {
                id: ComponentId::from([0x0f; ADDRESS_LEN]),
                hash: ComponentHash::from([0xbb; ADDRESS_LEN]),
            }],
            graph_after: forest(2),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn serde_roundtrip_everything() {
        let value = sample_changes();
        let json = serde_json::to_string(&value).unwrap();
        let back: GraphChanged = serde_json::from_str(&json).unwrap();

        assert_eq!(back.graph_before, value.graph_before);
        assert_eq!(back.graph_after, value.graph_after);
        assert_eq!(back.timestamp, value.timestamp);
        assert_eq!(back.created.len(), 2);
        assert_eq!(back.updated.len(), 1);
        assert_eq!(back.removed, value.removed);
        assert_eq!(
            back.created[0].assembly_hash(),
            value.created[0].assembly_hash()
        );
        assert_eq!(back.updated[0].baseline, value.updated[0].baseline);
    }

    #[test]
    fn serde_roundtrip_empty() {
        let value = GraphChanged {
            graph_before: forest(3),
            created: vec![],
            updated: vec![],
            removed: vec![],
            graph_after: forest(3),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&value).unwrap();
        let back: GraphChanged = serde_json::from_str(&json).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn is_empty_compares_hashes() {
        let mut value = sample_changes();
        assert!(!value.is_empty());
        value.graph_after = value.graph_before;
        assert!(value.is_empty());
    }

    #[test]
    fn disassemble_fans_out_every_change() {
        let value = sample_changes();
        let parts = disassemble(&value);
        assert_eq!(parts.len(), 4);

        assert_eq!(parts.iter().filter(|p| p.is_created()).count(), 2);
        assert_eq!(parts.iter().filter(|p| p.is_updated()).count(), 1);
        assert_eq!(parts.iter().filter(|p| p.is_removed()).count(), 1);

        for part in &parts {
            assert_eq!(part.graph_hash, value.graph_after);
            assert_eq!(part.timestamp, value.timestamp);
        }

        let removed = parts.iter().find(|p| p.is_removed()).unwrap();
        assert!(removed.assembly().is_none());
        assert_eq!(removed.assembly_id(), value.removed[0].id);
    }

    #[test]
    fn removed_assembly_exposes_empty_views() {
        let removed = AssemblyRemoved {
            id: ComponentId::from([1; ADDRESS_LEN]),
            hash: ComponentHash::from([2; ADDRESS_LEN]),
        };
        assert!(removed.roots().is_empty());
        assert!(removed.edges_of(NodeHash::default()).is_empty());
        assert_eq!(removed.assembly_id(), ComponentId::from([1; ADDRESS_LEN]));
    }

    #[test]
    fn continuity_check_accepts_a_linear_chain() {
        let mut check = ContinuityCheck::new();
        let first = GraphChanged {
            graph_before: forest(0),
            created: vec![],
            updated: vec![],
            removed: vec![],
            graph_after: forest(1),
            timestamp: Utc::now(),
        };
        let second = GraphChanged {
            graph_before: forest(1),
            created: vec![],
            updated: vec![],
            removed: vec![],
            graph_after: forest(2),
            timestamp: Utc::now(),
        };
        check.observe(&first).unwrap();
        check.observe(&second).unwrap();
    }

    #[test]
    fn continuity_check_detects_a_gap() {
        let mut check = ContinuityCheck::new();
        let first = GraphChanged {
            graph_before: forest(0),
            created: vec![],
            updated: vec![],
            removed: vec![],
            graph_after: forest(1),
            timestamp: Utc::now(),
        };
        let skipped = GraphChanged {
            graph_before: forest(9),
            created: vec![],
            updated: vec![],
            removed: vec![],
            graph_after: forest(10),
            timestamp: Utc::now(),
        };
        check.observe(&first).unwrap();
        let err = check.observe(&skipped).unwrap_err();
        assert_eq!(err.last, forest(1));
        assert_eq!(err.received, forest(9));
    }

    #[test]
    fn format_changes_mentions_every_component() {
        let value = sample_changes();
        let text = format_changes(&value, "  ");
        assert!(text.contains("created"));
        assert!(text.contains("updated"));
        assert!(text.contains("removed"));
        assert_eq!(text.lines().count(), 5);
    }
}
