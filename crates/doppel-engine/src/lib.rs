//! The digital-twin change engine.
//!
//! An [`Engine`] maintains a twin's graph on any
//! [`GraphBackend`](doppel_storage::GraphBackend). It applies compilations
//! atomically, each in its own backend transaction that is rolled back
//! should the compilation fail, while tracking a taint set of touched nodes. On
//! demand, [`Engine::what_changed`] materialises a partial snapshot of only
//! the potentially-changed assemblies, diffs it against the engine's full
//! snapshot, and emits a linearly chained
//! [`GraphChanged`](doppel_core::GraphChanged) notification.
//!
//! Concurrency model: many `apply` calls may run at once, but
//! `what_changed` excludes all of them (and any other observer) for its
//! duration; the backend-level isolation the engine needs is "many
//! concurrent writers are fine, but a read that sweeps the whole graph
//! must see a quiescent view".

mod assemble;
pub mod engine;
pub mod error;
pub mod snapshot;
mod taint;
mod writer;

pub use engine::Engine;
pub use error::EngineError;
pub use snapshot::{Snapshot, SnapshotDiff};
