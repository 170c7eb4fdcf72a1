//! The four strongly typed 20-byte content addresses.
//!
//! [`NodeHash`] identifies a single node, [`ComponentId`] identifies an
//! assembly by its roots, [`ComponentHash`] versions an assembly's full
//! content, and [`ForestHash`] digests a whole forest of assemblies. Each is
//! its own newtype to provide a compile-time guarantee against mixing them
//! up.
//!
//! # Determinism
//!
//! All digests are BLAKE3 extendable output truncated to 20 bytes. Hashing
//! over sets always sorts the inputs by raw byte comparison first, so no
//! hash ever depends on map iteration order or input order.
//!
//! # Encoding
//!
//! Every address serializes as a lowercase 40-character hex string; that is
//! also the form backends persist. `Display` wraps the hex in a type prefix
//! (`node(..)`, `component(..)`, `assembly(..)`, `graph(..)`) for logs.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Width of every content address, in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Errors decoding a content address from its textual form.
#[derive(Debug, Error)]
pub enum AddressParseError {
    /// The input was not valid hex.
    #[error("decode hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// The decoded input was not exactly [`ADDRESS_LEN`] bytes.
    #[error("not enough bytes: expected {expected}, got {found}")]
    WrongLength { expected: usize, found: usize },
}

/// The shared digest primitive underlying all address computations.
///
/// Finalizes into exactly [`ADDRESS_LEN`] bytes via BLAKE3's extendable
/// output.
pub(crate) struct Digest(blake3::Hasher);

impl Digest {
    pub(crate) fn new() -> Self {
        Digest(blake3::Hasher::new())
    }

    pub(crate) fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub(crate) fn finalize(self) -> [u8; ADDRESS_LEN] {
        let mut out = [0u8; ADDRESS_LEN];
        self.0.finalize_xof().fill(&mut out);
        out
    }
}

macro_rules! address_type {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; ADDRESS_LEN]);

        impl $name {
            /// Returns the raw 20-byte address.
            pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
                &self.0
            }

            /// Encodes the address as a lowercase 40-character hex string.
            /// This is the form backends persist.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Decodes an address from its bare-hex form.
            pub fn from_hex(text: &str) -> Result<Self, AddressParseError> {
                let bytes = hex::decode(text)?;
                let found = bytes.len();
                let raw: [u8; ADDRESS_LEN] = bytes
                    .try_into()
                    .map_err(|_| AddressParseError::WrongLength {
                        expected: ADDRESS_LEN,
                        found,
                    })?;
                Ok($name(raw))
            }

            /// Reports whether this is the zero value of the type.
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; ADDRESS_LEN]
            }
        }

        impl From<[u8; ADDRESS_LEN]> for $name {
            fn from(raw: [u8; ADDRESS_LEN]) -> Self {
                $name(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "({})"), self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                $name::from_hex(&text).map_err(D::Error::custom)
            }
        }
    };
}

address_type!(
    /// Content address of a single node, computed over the node's type
    /// identity and exported field contents.
    ///
    /// A `NodeHash` identifies the same node across different graphs and is
    /// independent of any graph engine: it is computed over the node's
    /// content, never assigned by storage. Engine metadata (timestamps,
    /// trace ids) must never participate in this hash. Changing the content
    /// of a node is equivalent to removing it and adding a new node with a
    /// new hash.
    NodeHash,
    "node"
);

address_type!(
    /// Content address over the root-subgraph of an assembly; references a
    /// complete component uniquely.
    ///
    /// A component graph may change over time yet remain the same
    /// "component" as long as those changes do not modify its roots: its
    /// `ComponentId` is stable across edge and non-root node edits while
    /// its [`ComponentHash`] changes.
    ComponentId,
    "component"
);

address_type!(
    /// Content address over an entire assembly. Two assemblies with the same
    /// `ComponentHash` are equal.
    ///
    /// The hash changes when the assembly's roots, nodes, or edges change:
    /// same nodes with different edges hash differently, and same nodes and
    /// edges with different roots hash differently.
    ComponentHash,
    "assembly"
);

address_type!(
    /// Content address over a forest of disjoint components, computed
    /// order-independently from their `(ComponentId, ComponentHash)` pairs.
    ///
    /// Although a component is itself a graph, it is hashed by a
    /// [`ComponentHash`] rather than a `ForestHash`; likewise its
    /// root-subgraph is hashed by a [`ComponentId`].
    ForestHash,
    "graph"
);

impl ComponentId {
    /// Computes the identity of an assembly from its root hashes.
    ///
    /// Roots are sorted lexicographically before hashing, so the result is
    /// independent of input order. The identity of a singleton assembly
    /// rooted at node `n` is therefore `of_roots(&[n])`, which the change
    /// engine exploits when deriving dirty roots from tainted nodes.
    pub fn of_roots(roots: &[NodeHash]) -> ComponentId {
        let mut sorted: Vec<NodeHash> = roots.to_vec();
        sorted.sort();
        let mut d = Digest::new();
        for root in &sorted {
            d.update(root.as_bytes());
        }
        ComponentId(d.finalize())
    }
}

/// Digests the given components into a [`ForestHash`].
///
/// The result is order-independent: pairs are sorted by `ComponentId`
/// (lexicographic raw-byte order) and the corresponding `ComponentHash`es
/// hashed in that order. An empty input hashes to the digest of the empty
/// string.
pub fn hash_components<'a, I>(components: I) -> ForestHash
where
    I: IntoIterator<Item = (&'a ComponentId, &'a ComponentHash)>,
{
    let mut refs: Vec<(&ComponentId, &ComponentHash)> = components.into_iter().collect();
    refs.sort_by(|a, b| a.0.cmp(b.0));

    let mut d = Digest::new();
    for (_, hash) in refs {
        d.update(hash.as_bytes());
    }
    ForestHash(d.finalize())
}
