//! The change engine over a pluggable backend.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use doppel_core::{
    known_labels, Applier, Assembly, AssemblyCreated, AssemblyRef, AssemblyRemoved,
    AssemblyUpdated, Cancellation, ChangeObserver, CodecError, Compilation, ComponentHash,
    ComponentId, GraphChanged, GraphWriter, RawNode, WriteError,
};
use doppel_storage::{BackendError, GraphBackend, NodeSelector};

use crate::assemble::safely_parse_assembly;
use crate::error::EngineError;
use crate::snapshot::Snapshot;
use crate::taint::TaintSet;
use crate::writer::TwinWriter;

/// Maintains a digital-twin graph on a [`GraphBackend`].
///
/// The engine applies compilations to the underlying graph, each in its
/// own transaction that is rolled back should the compilation fail, so
/// every compilation applies atomically. It returns changesets containing
/// the amalgamation of the applied modifications between calls to
/// [`what_changed`](Engine::what_changed); to facilitate that, the engine
/// keeps a snapshot (component id to component hash) of all disjoint graph
/// components it had observed up to the last observation.
///
/// # Exclusion
///
/// Apply and observation are serialised by an inverted reader-writer lock:
/// many `apply` calls may hold the shared mode concurrently, while
/// `what_changed` takes the exclusive mode, blocking all writers and any
/// other observer until it releases. The naming is deliberately flipped
/// because the backend-level isolation the engine needs is "many
/// concurrent database writers are fine, but a read that sweeps the whole
/// graph must see a quiescent view". The snapshot lives inside that lock,
/// so it can only ever be touched with the exclusive mode held.
pub struct Engine<B> {
    backend: B,
    /// Identifies the underlying graph in logs when one process maintains
    /// several twins.
    database: String,
    gate: RwLock<Snapshot>,
    taints: TaintSet,
}

impl<B: GraphBackend> Engine<B> {
    /// Returns a ready-to-use engine over the given backend.
    ///
    /// Initialises the internal snapshot with a full sweep of the current
    /// disjoint graph components; a failing sweep fails construction.
    pub fn new(backend: B, database: impl Into<String>) -> Result<Self, EngineError> {
        let database = database.into();
        let snapshot = capture_snapshot(&backend)?;
        tracing::debug!(
            database = %database,
            components = snapshot.len(),
            "captured initial snapshot"
        );
        Ok(Engine {
            backend,
            database,
            gate: RwLock::new(snapshot),
            taints: TaintSet::default(),
        })
    }

    /// Declares the backend constraints for every label registered so far.
    /// Call after all payload types have been registered. Idempotent.
    pub fn bootstrap(&self) -> Result<(), EngineError> {
        Ok(self.backend.bootstrap(&known_labels())?)
    }

    /// Rewrites historical wrapped content addresses to bare hex,
    /// returning how many values were rewritten. Idempotent.
    pub fn rewrite_wrapped_content_addresses(&self) -> Result<u64, EngineError> {
        Ok(self.backend.rewrite_wrapped_content_addresses()?)
    }

    /// Applies a compilation within a new write transaction.
    ///
    /// The compilation receives a [`GraphWriter`] scoped to that
    /// transaction. A non-`Ok` return rolls the transaction back and
    /// propagates the error, leaving the graph unmodified as if the
    /// compilation never executed. Cancellation propagates verbatim.
    ///
    /// # Panics
    ///
    /// - when the underlying graph is corrupted, detected by the writer's
    ///   affected-count checks;
    /// - when the backend reports a missing or mistyped reserved property,
    ///   which means a storage query drifted from the code reading its
    ///   results.
    pub fn apply<F>(&self, ctx: &Cancellation, mut compilation: F) -> Result<(), WriteError>
    where
        F: FnMut(&mut dyn GraphWriter) -> Result<(), WriteError>,
    {
        self.apply_dyn(ctx, &mut compilation)
    }

    fn apply_dyn(&self, ctx: &Cancellation, compilation: Compilation<'_>) -> Result<(), WriteError> {
        // Shared mode: concurrent appliers are welcome, observers are not.
        let _mode = self.gate.read().expect("engine gate poisoned");

        if ctx.is_cancelled() {
            return Err(WriteError::Cancelled);
        }

        let mut tx = self.backend.write().map_err(WriteError::backend)?;

        let result = {
            let mut writer = TwinWriter {
                tx: tx.as_mut(),
                taints: &self.taints,
                ctx,
            };
            compilation(&mut writer)
        };

        match result {
            Ok(()) => {
                if ctx.is_cancelled() {
                    tx.rollback().map_err(WriteError::backend)?;
                    return Err(WriteError::Cancelled);
                }
                tx.commit().map_err(WriteError::backend)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(
                        database = %self.database,
                        error = %rollback_err,
                        "failed to roll back a write transaction"
                    );
                }
                if let WriteError::Cancelled = err {
                    return Err(WriteError::Cancelled);
                }
                if let Some(reason) = query_skew(&err) {
                    tracing::error!(
                        database = %self.database,
                        error = %err,
                        "a storage query was modified without care"
                    );
                    panic!("seek developer attention: backend query: {reason}");
                }
                Err(err)
            }
        }
    }

    /// Reviews the assemblies touched since the last observation and
    /// reports which disjoint graph components were created, updated, or
    /// removed, with a full copy of every changed assembly.
    ///
    /// On success the internal snapshot is brought up to date with this
    /// review. On failure the snapshot is untouched and the drained taints
    /// are restored, so the next call runs as if the failed one had never
    /// happened.
    ///
    /// # Panics
    ///
    /// Panics when the same component is observed with two different
    /// hashes within the single read transaction: the backend's isolation
    /// was violated and diffing has no sound basis.
    pub fn what_changed(&self, ctx: &Cancellation) -> Result<GraphChanged, EngineError> {
        // Exclusive mode: the sweep must not interleave with any writer.
        let mut snapshot = self.gate.write().expect("engine gate poisoned");

        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // The drain happens before the read queries run, so taints recorded
        // by writers blocked on the gate surface on the next call.
        let taints = self.taints.drain();

        let (assemblies, dirty_roots) = match self.fetch_tainted_assemblies(ctx, &taints) {
            Ok(fetched) => fetched,
            Err(err) => {
                // Restore the drained taints: the failed call must leave
                // state as if it never ran, so a retry observes the same
                // pending changes.
                self.taints.taint(taints);
                return Err(err);
            }
        };

        let mut rootless = 0;
        // The assemblies that differ from the stored snapshot, by id, for
        // random access while populating the changeset.
        let mut changed: HashMap<ComponentId, Assembly> = HashMap::new();
        // The partial snapshot this sweep produced.
        let mut partial: HashMap<ComponentId, ComponentHash> = HashMap::new();

        for assembly in assemblies {
            if assembly.roots().is_empty() {
                rootless += 1;
            }
            partial.insert(assembly.assembly_id(), assembly.assembly_hash());
            if !snapshot.contains_assembly(&assembly) {
                changed.insert(assembly.assembly_id(), assembly);
            }
        }

        let diff = snapshot.partial_diff(&partial, &dirty_roots);

        let mut changes = GraphChanged {
            graph_before: snapshot.graph_hash(),
            created: Vec::with_capacity(diff.created.len()),
            updated: Vec::with_capacity(diff.updated.len()),
            removed: Vec::with_capacity(diff.removed.len()),
            graph_after: Default::default(),
            timestamp: Utc::now(),
        };

        for id in &diff.created {
            // Created components were absent from the snapshot, so the
            // sweep loop above necessarily stored them.
            let assembly = changed
                .remove(id)
                .unwrap_or_else(|| panic!("created component {id} missing from sweep results"));
            changes.created.push(AssemblyCreated { assembly });
        }
        for id in &diff.updated {
            let assembly = changed
                .remove(id)
                .unwrap_or_else(|| panic!("updated component {id} missing from sweep results"));
            let baseline = snapshot
                .get(id)
                .unwrap_or_else(|| panic!("updated component {id} missing from the snapshot"));
            changes.updated.push(AssemblyUpdated { baseline, assembly });
        }
        for id in &diff.removed {
            let hash = snapshot
                .get(id)
                .unwrap_or_else(|| panic!("removed component {id} missing from the snapshot"));
            changes.removed.push(AssemblyRemoved { id: *id, hash });
        }

        // A rootless assembly invalidates this changeset. The snapshot is
        // not updated and the taints are restored, so calling again may
        // recover; we do not know of a confirmed cause for rootless sweeps
        // and assume they are transient.
        if rootless > 0 {
            tracing::warn!(
                database = %self.database,
                count = rootless,
                changeset = %doppel_core::format_changes(&changes, ""),
                "found rootless assemblies while sweeping the graph"
            );
            self.taints.taint(taints);
            return Err(EngineError::RootlessAssemblies { count: rootless });
        }

        // As we handle partial snapshots, the after-hash must derive from
        // the complete updated snapshot, so the update comes first.
        snapshot.update(&changes);
        changes.graph_after = snapshot.graph_hash();

        Ok(changes)
    }

    /// Sweeps, within a single read transaction, the enclosing assembly of
    /// every tainted node, deduplicated by component id. Also derives the
    /// dirty roots: the singleton component id of each taint.
    ///
    /// # Panics
    ///
    /// Panics when a component is observed twice with different hashes: as
    /// the graph is read within one transaction, repeated reads of the
    /// same component must agree, or comparing graph states has no sound
    /// basis.
    fn fetch_tainted_assemblies(
        &self,
        ctx: &Cancellation,
        taints: &[RawNode],
    ) -> Result<(Vec<Assembly>, Vec<ComponentId>), EngineError> {
        let mut read = self.backend.read()?;

        let mut seen: HashMap<ComponentId, ComponentHash> = HashMap::new();
        let mut assemblies = Vec::new();
        let mut dirty_roots = Vec::with_capacity(taints.len());

        for taint in taints {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            // A tainted node treated as a single-node root: its singleton
            // component id equals the id its component would have if the
            // node stood alone. Used by the diff to conclude removals.
            dirty_roots.push(ComponentId::of_roots(&[taint.content_address]));

            let records = read.fetch_assemblies(Some(&NodeSelector::of(taint)))?;
            for record in records {
                let assembly = safely_parse_assembly(&record)?;
                let id = assembly.assembly_id();
                match seen.get(&id) {
                    None => {
                        seen.insert(id, assembly.assembly_hash());
                        assemblies.push(assembly);
                    }
                    Some(hash) if *hash != assembly.assembly_hash() => {
                        tracing::error!(
                            database = %self.database,
                            component = %id,
                            seen = %hash,
                            observed = %assembly.assembly_hash(),
                            "an assembly changed within a read transaction"
                        );
                        panic!(
                            "seek developer attention: the backend transaction isolation was violated"
                        );
                    }
                    Some(_) => {} // already collected
                }
            }
        }

        Ok((assemblies, dirty_roots))
    }
}

impl<B: GraphBackend> Applier for Engine<B> {
    fn apply(&self, ctx: &Cancellation, compilation: Compilation<'_>) -> Result<(), WriteError> {
        self.apply_dyn(ctx, compilation)
    }
}

impl<B: GraphBackend> ChangeObserver for Engine<B> {
    type Error = EngineError;

    fn what_changed(&self, ctx: &Cancellation) -> Result<GraphChanged, EngineError> {
        Engine::what_changed(self, ctx)
    }
}

/// Builds the initial snapshot from a full sweep of the backend.
fn capture_snapshot<B: GraphBackend>(backend: &B) -> Result<Snapshot, EngineError> {
    let mut read = backend.read()?;
    let records = read.fetch_assemblies(None)?;

    let mut snapshot = Snapshot::default();
    for record in &records {
        let assembly = safely_parse_assembly(record)?;
        snapshot.insert(assembly.assembly_id(), assembly.assembly_hash());
    }
    Ok(snapshot)
}

/// Recognises backend failures that indicate a query/code skew rather than
/// a runtime condition; those are escalated to panics by the applier.
fn query_skew(err: &WriteError) -> Option<String> {
    let codec = match err {
        WriteError::Codec(codec) => codec,
        WriteError::Backend(backend) => match backend.downcast_ref::<BackendError>() {
            Some(BackendError::Codec(codec)) => codec,
            _ => return None,
        },
        _ => return None,
    };
    match codec {
        CodecError::PropertyMissing(_) | CodecError::UnexpectedPropertyType { .. } => {
            Some(codec.to_string())
        }
        _ => None,
    }
}
