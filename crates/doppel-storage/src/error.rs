//! Storage error types.
//!
//! [`BackendError`] covers all anticipated failure modes of a graph
//! backend: serialization, database failures, schema migration, codec
//! translation of stored rows, and structural violations of the sweep
//! contract.

use thiserror::Error;

use doppel_core::CodecError;

/// Errors produced by backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// JSON serialization or deserialization of stored properties failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SQLite driver failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// A stored row could not be translated into a raw node.
    ///
    /// When the inner error is a missing or mistyped reserved property, a
    /// storage query was most likely changed without updating the code that
    /// reads its results; expect the change engine to panic.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An assembly reaches deeper than the configured traversal bound.
    ///
    /// The sweep refuses to return a truncated assembly: raise the bound to
    /// match the domain's maximum assembly depth.
    #[error("assembly rooted at {root} exceeds the traversal depth bound {bound}")]
    DepthExceeded { root: String, bound: usize },

    /// A structural constraint of the storage contract was violated.
    #[error("integrity error: {0}")]
    Integrity(String),
}
