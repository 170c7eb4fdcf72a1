//! Core model for digital-twin graphs.
//!
//! A digital twin maintains a virtual representation of a real-world system
//! as a trivial graph (directed, acyclic, without edge weights or attributes)
//! in which disjoint sub-graphs ("assemblies") represent entities of the
//! system-of-interest and nodes within them represent those entities'
//! properties.
//!
//! Every assembly is identified by a [`ComponentId`] computed over its root
//! nodes, and versioned by a [`ComponentHash`] computed over its entire
//! content. The whole forest of assemblies digests into a single
//! [`ForestHash`]. All four addresses are deterministic 20-byte content
//! hashes, so two processes observing the same graph agree on its identity
//! without coordination.
//!
//! This crate holds the engine-independent pieces: content addressing, the
//! in-memory assembly value and its builder, the node registry and codec,
//! the graph-writer protocol, relationship assertions, compilation
//! recording, and the `GraphChanged` wire messages. Persistence backends
//! live in `doppel-storage`; the change engine lives in `doppel-engine`.

pub mod assembly;
pub mod attribute;
pub mod builder;
pub mod cancel;
pub mod changes;
pub mod compilation;
pub mod element;
pub mod error;
pub mod hash;
pub mod property;
pub mod registry;
pub mod relate;
pub mod walk;
pub mod writer;

// Re-export commonly used types
pub use assembly::{compute_forest_hash, Assembly, AssemblyRef};
pub use builder::AssemblyBuilder;
pub use cancel::Cancellation;
pub use changes::{
    disassemble, format_changes, AssemblyChange, AssemblyCreated, AssemblyRemoved,
    AssemblyUpdated, ComponentChanged, ContinuityCheck, DiscontinuityError, GraphChanged,
};
pub use element::{content_address, must_content_address, Element, ElementType, NodeHasher};
pub use error::{CodecError, HashError, WriteError};
pub use hash::{hash_components, ComponentHash, ComponentId, ForestHash, NodeHash};
pub use property::{PropertyMap, PropertyValue};
pub use registry::{
    format_node, known_labels, label_of, label_of_element, parse_node, register, register_label,
    NodeRef, RawNode,
};
pub use walk::{inspect, walk, walk_subtree, Visitor};
pub use writer::{Applier, ChangeObserver, Compilation, GraphWriter, GraphWriterExt};
