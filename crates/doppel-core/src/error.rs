//! Error types for the core model.
//!
//! [`HashError`] covers content-addressing failures, [`CodecError`] covers
//! registry and property-map translation failures, and [`WriteError`] is the
//! error surface of the graph-writer protocol. The change engine adds its own
//! error type on top in `doppel-engine`.

use thiserror::Error;

use crate::hash::AddressParseError;

/// Errors produced while computing a content address.
#[derive(Debug, Error)]
pub enum HashError {
    /// A field's value cannot be encoded into the hash.
    ///
    /// Payload types raise this from their `hash_fields` implementation for
    /// field shapes the hasher does not support (e.g. sequences of complex
    /// values).
    #[error("field {field}: unsupported {kind}")]
    UnhashableField { field: String, kind: String },
}

impl HashError {
    /// Convenience constructor for the unsupported-field case.
    pub fn unhashable(field: impl Into<String>, kind: impl Into<String>) -> Self {
        HashError::UnhashableField {
            field: field.into(),
            kind: kind.into(),
        }
    }
}

/// Errors translating between payload values and their stored representation.
#[derive(Debug, Error)]
pub enum CodecError {
    /// No type was registered for the label found in storage.
    #[error("unregistered label {0:?}")]
    UnregisteredLabel(String),

    /// The payload's type was never registered, so it has no label.
    #[error("unregistered type {0:?}")]
    UnregisteredType(String),

    /// A property required by the parser is absent.
    ///
    /// When a backend reports this for one of its own reserved properties it
    /// almost always means a storage query was changed without updating the
    /// code that reads its results; the change engine escalates it to a
    /// panic.
    #[error("property not found: {0}")]
    PropertyMissing(String),

    /// A property has a runtime type different from the expected one.
    ///
    /// Same escalation policy as [`CodecError::PropertyMissing`].
    #[error("unexpected property type: key {key:?} is {found}")]
    UnexpectedPropertyType { key: String, found: &'static str },

    /// The content address recomputed after parsing differs from the stored
    /// one.
    ///
    /// This is a defensive check. It is reported rather than panicked: the
    /// mismatch may stem from a hand-modified storage row rather than a code
    /// bug, so the caller decides how to react.
    #[error("defensive: content address mismatch: {computed} != {stored}")]
    AddressMismatch { stored: String, computed: String },

    /// A stored content address failed to decode.
    #[error("content address: {0}")]
    Address(#[from] AddressParseError),

    /// Computing a payload's content address failed.
    #[error("content address: {0}")]
    Hash(#[from] HashError),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by [`GraphWriter`](crate::writer::GraphWriter) operations
/// and by compilations built on top of them.
#[derive(Debug, Error)]
pub enum WriteError {
    /// A payload could not be content-addressed.
    #[error("content address: {0}")]
    Hash(#[from] HashError),

    /// A payload could not be translated to or from its stored form.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// The storage backend failed. The inner error is the backend's own
    /// error type; transient failures are expected to have been retried by
    /// the backend driver before surfacing here.
    #[error("backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The operation was cancelled. Propagated verbatim, never wrapped.
    #[error("operation cancelled")]
    Cancelled,
}

impl WriteError {
    /// Wraps a backend error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        WriteError::Backend(Box::new(err))
    }
}
