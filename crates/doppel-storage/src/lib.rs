//! Pluggable graph backends for digital twins.
//!
//! The [`GraphBackend`] trait defines the storage contract the change
//! engine operates on: labelled nodes with property maps and a mandatory
//! content-address property, unweighted directed `CONNECTS` edges,
//! transactions with commit and rollback, and the assembly-sweep query that
//! enumerates disjoint graph components.
//!
//! Two reference backends implement the contract with identical semantics:
//! [`InMemoryBackend`] for tests and ephemeral twins, and [`SqliteBackend`]
//! for embedded persistence.

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
mod sweep;
pub mod traits;

pub use error::BackendError;
pub use memory::InMemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{
    AssemblyRecord, EdgeTuple, GraphBackend, NodeSelector, ReadTransaction, RetractOutcome,
    WriteTransaction,
};
