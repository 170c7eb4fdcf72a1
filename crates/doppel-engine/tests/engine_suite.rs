//! End-to-end suite exercising the change engine against both reference
//! backends.
//!
//! The scenario cases run in strict sequence on one engine: the graph at
//! the end of one case is the starting point of the next, which is what
//! lets the suite check the continuity of the emitted changesets over time
//! (every `graph_before` must equal the previous `graph_after`).

use std::collections::HashMap;
use std::sync::{Arc, Once};

use doppel_core::relate;
use doppel_core::{
    compute_forest_hash, Assembly, AssemblyBuilder, AssemblyRef, Cancellation, CodecError,
    ComponentHash, ComponentId, Element, ElementType, GraphChanged, GraphWriter, GraphWriterExt,
    HashError, NodeHasher, PropertyMap, WriteError,
};
use doppel_engine::Engine;
use doppel_storage::{GraphBackend, InMemoryBackend, SqliteBackend};

#[derive(Debug, Clone)]
struct NodeA;
#[derive(Debug, Clone)]
struct NodeB;
#[derive(Debug, Clone)]
struct NodeC;
#[derive(Debug, Clone)]
struct NodeD;

macro_rules! unit_element {
    ($ty:ident) => {
        impl ElementType for $ty {
            const PATH: &'static str = module_path!();
            const NAME: &'static str = stringify!($ty);

            fn hash_fields(&self, _h: &mut NodeHasher) -> Result<(), HashError> {
                Ok(())
            }

            fn to_properties(&self) -> Result<PropertyMap, CodecError> {
                Ok(PropertyMap::new())
            }

            fn from_properties(_props: &PropertyMap) -> Result<Self, CodecError> {
                Ok($ty)
            }
        }
    };
}

unit_element!(NodeA);
unit_element!(NodeB);
unit_element!(NodeC);
unit_element!(NodeD);

fn setup() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        doppel_core::register::<NodeA>();
        doppel_core::register::<NodeB>();
        doppel_core::register::<NodeC>();
        doppel_core::register::<NodeD>();
    });
}

/// A narrow tree: a chain from the first payload (the root) through each
/// following payload. Narrow trees keep the scenarios focused on depth
/// progression, the common shape of chained twin properties.
fn tree(chain: &[Arc<dyn Element>]) -> Assembly {
    let mut b = AssemblyBuilder::default();
    b.roots([chain[0].clone()]);
    for pair in chain.windows(2) {
        b.connect(pair[0].clone(), pair[1].clone());
    }
    b.build()
}

fn a() -> Arc<dyn Element> {
    Arc::new(NodeA)
}
fn b() -> Arc<dyn Element> {
    Arc::new(NodeB)
}
fn c() -> Arc<dyn Element> {
    Arc::new(NodeC)
}
fn d() -> Arc<dyn Element> {
    Arc::new(NodeD)
}

struct Case {
    name: &'static str,
    compile: Box<dyn Fn(&mut dyn GraphWriter) -> Result<(), WriteError>>,
    created: Vec<Assembly>,
    updated: Vec<Assembly>,
    removed: Vec<Assembly>,
    /// The expected state of the entire graph after this case, taking the
    /// previous cases into account.
    graph: Vec<Assembly>,
}

fn cases() -> Vec<Case> {
    vec![
        Case {
            name: "retract-nonexistent-node",
            compile: Box::new(|w| w.retract_node(&NodeA)),
            created: vec![],
            updated: vec![],
            removed: vec![],
            graph: vec![],
        },
        Case {
            name: "retract-nonexistent-edges",
            compile: Box::new(|w| {
                let n = w.retract_edges_to::<NodeB>(&NodeA)?;
                assert_eq!(n, 0, "expected zero edges");
                Ok(())
            }),
            created: vec![],
            updated: vec![],
            removed: vec![],
            graph: vec![],
        },
        Case {
            name: "new-node",
            compile: Box::new(|w| w.assert_node(&NodeA)),
            created: vec![tree(&[a()])],
            updated: vec![],
            removed: vec![],
            graph: vec![tree(&[a()])],
        },
        Case {
            name: "delete-node",
            compile: Box::new(|w| w.retract_node(&NodeA)),
            created: vec![],
            updated: vec![],
            removed: vec![tree(&[a()])],
            graph: vec![],
        },
        Case {
            name: "connect-tree",
            compile: Box::new(|w| relate::one_to_one(w, &NodeA, &NodeB)),
            created: vec![tree(&[a(), b()])],
            updated: vec![],
            removed: vec![],
            graph: vec![tree(&[a(), b()])],
        },
        Case {
            name: "extend-tree",
            compile: Box::new(|w| relate::one_to_one(w, &NodeB, &NodeC)),
            created: vec![],
            updated: vec![tree(&[a(), b(), c()])],
            removed: vec![],
            graph: vec![tree(&[a(), b(), c()])],
        },
        Case {
            name: "split-tree",
            compile: Box::new(|w| w.retract_node(&NodeB)),
            created: vec![tree(&[c()])],
            updated: vec![tree(&[a()])],
            removed: vec![],
            graph: vec![tree(&[a()]), tree(&[c()])],
        },
        Case {
            name: "change-root",
            compile: Box::new(|w| relate::one_to_one(w, &NodeB, &NodeC)),
            created: vec![tree(&[b(), c()])],
            updated: vec![],
            removed: vec![tree(&[c()])],
            graph: vec![tree(&[a()]), tree(&[b(), c()])],
        },
        Case {
            name: "merge-trees",
            compile: Box::new(|w| relate::one_to_one(w, &NodeA, &NodeB)),
            created: vec![],
            updated: vec![tree(&[a(), b(), c()])],
            removed: vec![tree(&[b(), c()])],
            graph: vec![tree(&[a(), b(), c()])],
        },
        Case {
            name: "assert-edge",
            compile: Box::new(|w| w.assert_edge(&NodeC, &NodeD)),
            created: vec![],
            updated: vec![tree(&[a(), b(), c(), d()])],
            removed: vec![],
            graph: vec![tree(&[a(), b(), c(), d()])],
        },
        Case {
            name: "retract-edges",
            compile: Box::new(|w| {
                let n = w.retract_edges_to::<NodeD>(&NodeC)?;
                assert_eq!(n, 1, "expected one edge");
                Ok(())
            }),
            created: vec![tree(&[d()])],
            updated: vec![tree(&[a(), b(), c()])],
            removed: vec![],
            graph: vec![tree(&[a(), b(), c()]), tree(&[d()])],
        },
    ]
}

type RefMap = HashMap<ComponentId, ComponentHash>;

fn ref_map<'a>(refs: impl IntoIterator<Item = &'a dyn AssemblyRef>) -> RefMap {
    refs.into_iter()
        .map(|r| (r.assembly_id(), r.assembly_hash()))
        .collect()
}

fn forest(assemblies: &[Assembly]) -> doppel_core::ForestHash {
    let refs: Vec<&dyn AssemblyRef> = assemblies.iter().map(|a| a as &dyn AssemblyRef).collect();
    compute_forest_hash(&refs)
}

fn check_changes(name: &str, case: &Case, changes: &GraphChanged, last_graph: &[Assembly]) {
    let want_created = ref_map(case.created.iter().map(|a| a as &dyn AssemblyRef));
    let got_created = ref_map(changes.created.iter().map(|c| c as &dyn AssemblyRef));
    assert_eq!(got_created, want_created, "{name}: created mismatch");

    let want_updated = ref_map(case.updated.iter().map(|a| a as &dyn AssemblyRef));
    let got_updated = ref_map(changes.updated.iter().map(|u| u as &dyn AssemblyRef));
    assert_eq!(got_updated, want_updated, "{name}: updated mismatch");

    let want_removed = ref_map(case.removed.iter().map(|a| a as &dyn AssemblyRef));
    let got_removed = ref_map(changes.removed.iter().map(|r| r as &dyn AssemblyRef));
    assert_eq!(got_removed, want_removed, "{name}: removed mismatch");

    // Every updated entry carries the hash the component had before.
    let before = ref_map(last_graph.iter().map(|a| a as &dyn AssemblyRef));
    for updated in &changes.updated {
        assert_eq!(
            before.get(&updated.assembly_id()),
            Some(&updated.baseline),
            "{name}: baseline of {} should be its prior hash",
            updated.assembly_id()
        );
    }

    // Continuity: this changeset directly follows the previous graph.
    assert_eq!(
        changes.graph_before,
        forest(last_graph),
        "{name}: graph_before discontinuity"
    );
    // The graph identified by the expected snapshot is the one on which
    // the changes were computed.
    assert_eq!(
        changes.graph_after,
        forest(&case.graph),
        "{name}: unexpected graph_after"
    );
    // The observer must stamp the changes.
    assert!(changes.timestamp.timestamp() > 0, "{name}: zero timestamp");
}

fn run_suite<B: GraphBackend>(engine: &Engine<B>) {
    let ctx = Cancellation::new();
    let mut last_graph: Vec<Assembly> = Vec::new();

    for case in cases() {
        engine
            .apply(&ctx, |w| (case.compile)(w))
            .unwrap_or_else(|e| panic!("{}: apply failed: {e}", case.name));

        let changes = engine
            .what_changed(&ctx)
            .unwrap_or_else(|e| panic!("{}: what_changed failed: {e}", case.name));

        check_changes(case.name, &case, &changes, &last_graph);
        last_graph = case.graph;
    }
}

#[test]
fn scenario_suite_in_memory() {
    setup();
    let engine = Engine::new(InMemoryBackend::new(), "suite-memory").unwrap();
    engine.bootstrap().unwrap();
    run_suite(&engine);
}

#[test]
fn scenario_suite_sqlite() {
    setup();
    let engine = Engine::new(SqliteBackend::in_memory().unwrap(), "suite-sqlite").unwrap();
    engine.bootstrap().unwrap();
    run_suite(&engine);
}

// The backend moves into its engine; sharing one across two engines (as a
// restart does) goes through a delegating Arc wrapper.
struct Shared(Arc<InMemoryBackend>);

impl GraphBackend for Shared {
    fn write(&self) -> Result<Box<dyn doppel_storage::WriteTransaction + '_>, doppel_storage::BackendError> {
        self.0.write()
    }

    fn read(&self) -> Result<Box<dyn doppel_storage::ReadTransaction + '_>, doppel_storage::BackendError> {
        self.0.read()
    }

    fn bootstrap(&self, labels: &[String]) -> Result<(), doppel_storage::BackendError> {
        self.0.bootstrap(labels)
    }

    fn rewrite_wrapped_content_addresses(&self) -> Result<u64, doppel_storage::BackendError> {
        self.0.rewrite_wrapped_content_addresses()
    }
}

#[test]
fn restart_resumes_from_a_full_sweep() {
    setup();
    let backend = Arc::new(InMemoryBackend::new());
    let ctx = Cancellation::new();

    {
        let engine = Engine::new(Shared(backend.clone()), "restart-writer").unwrap();
        engine.apply(&ctx, |w| w.assert_edge(&NodeA, &NodeB)).unwrap();
        engine.what_changed(&ctx).unwrap();
    }

    // The restarted engine captured tree(A, B) at startup, so an untouched
    // graph produces an empty changeset whose hashes both equal the
    // captured forest.
    let engine = Engine::new(Shared(backend), "restart-observer").unwrap();
    let changes = engine.what_changed(&ctx).unwrap();
    assert!(changes.is_empty());
    assert_eq!(changes.graph_before, forest(&[tree(&[a(), b()])]));
}

#[test]
fn concurrent_appliers_are_all_observed() {
    setup();

    #[derive(Debug, Clone)]
    struct Device {
        serial: i64,
    }

    impl ElementType for Device {
        const PATH: &'static str = module_path!();
        const NAME: &'static str = "SuiteDevice";

        fn hash_fields(&self, h: &mut NodeHasher) -> Result<(), HashError> {
            h.int_field("Serial", self.serial);
            Ok(())
        }

        fn to_properties(&self) -> Result<PropertyMap, CodecError> {
            let mut m = PropertyMap::new();
            m.insert("Serial", self.serial);
            Ok(m)
        }

        fn from_properties(props: &PropertyMap) -> Result<Self, CodecError> {
            Ok(Device {
                serial: props.int("Serial")?,
            })
        }
    }

    doppel_core::register::<Device>();

    let engine = Engine::new(InMemoryBackend::new(), "suite-concurrent").unwrap();
    let ctx = Cancellation::new();

    std::thread::scope(|scope| {
        for serial in 0..8 {
            let engine = &engine;
            let ctx = ctx.clone();
            scope.spawn(move || {
                engine
                    .apply(&ctx, |w| w.assert_node(&Device { serial }))
                    .unwrap();
            });
        }
    });

    let changes = engine.what_changed(&ctx).unwrap();
    assert_eq!(changes.created.len(), 8);
    assert!(changes.updated.is_empty());
    assert!(changes.removed.is_empty());
}

#[test]
fn cancelled_apply_rolls_back_and_propagates() {
    setup();
    let engine = Engine::new(InMemoryBackend::new(), "suite-cancel").unwrap();

    let cancelled = Cancellation::new();
    cancelled.cancel();
    let err = engine
        .apply(&cancelled, |w| w.assert_node(&NodeA))
        .unwrap_err();
    assert!(matches!(err, WriteError::Cancelled));

    // Nothing committed, nothing tainted: the next observation is empty.
    let ctx = Cancellation::new();
    let changes = engine.what_changed(&ctx).unwrap();
    assert!(changes.is_empty());
}

#[test]
fn cancelled_observation_preserves_pending_taints() {
    setup();
    let engine = Engine::new(InMemoryBackend::new(), "suite-cancel-observe").unwrap();
    let ctx = Cancellation::new();

    engine.apply(&ctx, |w| w.assert_node(&NodeA)).unwrap();

    let cancelled = Cancellation::new();
    cancelled.cancel();
    assert!(matches!(
        engine.what_changed(&cancelled),
        Err(doppel_engine::EngineError::Cancelled)
    ));

    // The cancelled observation consumed nothing: the change is still
    // pending.
    let changes = engine.what_changed(&ctx).unwrap();
    assert_eq!(changes.created.len(), 1);
}

#[test]
fn failed_compilations_do_not_leak_changes() {
    setup();
    let engine = Engine::new(InMemoryBackend::new(), "suite-rollback").unwrap();
    let ctx = Cancellation::new();

    let err = engine.apply(&ctx, |w| {
        w.assert_node(&NodeA)?;
        Err(WriteError::backend(std::io::Error::other("domain failure")))
    });
    assert!(err.is_err());

    // The transaction rolled back; the asserted node never became visible.
    // The node was tainted before the failure, but sweeping it finds no
    // assembly, so the changeset stays empty.
    let changes = engine.what_changed(&ctx).unwrap();
    assert!(changes.is_empty());
    assert!(changes.created.is_empty());
}
