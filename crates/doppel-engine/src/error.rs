//! Engine error types.

use thiserror::Error;

use doppel_core::{CodecError, WriteError};
use doppel_storage::BackendError;

/// Errors produced by engine operations.
///
/// The engine distinguishes recoverable conditions (returned; the snapshot
/// is unchanged and the caller may retry) from unrecoverable ones, which
/// panic after a trace event: a corrupted graph, a violated backend
/// isolation guarantee, or a query/code skew.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The storage backend failed.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// A swept node could not be decoded into its payload type.
    #[error("parse assembly: {0}")]
    Codec(#[from] CodecError),

    /// A write-side failure surfaced during an engine operation.
    #[error("write: {0}")]
    Write(#[from] WriteError),

    /// The sweep observed assemblies without roots.
    ///
    /// The snapshot was left untouched and the drained taints were
    /// restored, so calling
    /// [`what_changed`](crate::Engine::what_changed) again may recover.
    #[error("found {count} rootless assemblies while sweeping the graph")]
    RootlessAssemblies { count: usize },

    /// The operation was cancelled. Propagated verbatim, never wrapped.
    #[error("operation cancelled")]
    Cancelled,
}
