//! Payload types and their content addressing.
//!
//! An [`ElementType`] is the atomic unit of information in an assembly
//! graph. Each payload type enumerates its own identity and fields through
//! this trait: a stable type path and name (the "type preamble" of its
//! content address), a hashing method, and a property-map codec. A blanket
//! implementation provides the dyn-safe [`Element`] object trait used by
//! assemblies, writers, and the registry.
//!
//! # Content addresses
//!
//! [`content_address`] digests a payload into a [`NodeHash`]. Two payloads
//! with the same label and the same property map must have the same
//! address; the address is tightly coupled to the node's stored value.
//!
//! An address changes if the type is renamed, moves between modules, or
//! adds, removes, or renames a field. It does **not** change if fields are
//! emitted in a different order ([`NodeHasher`] sorts emitted fields by
//! name before digesting), nor if a field's declared width changes while
//! the value stays representable (platform-width integers encode as
//! variable-length values).
//!
//! Since nodes are stored permanently, keep a type's hashing stable as the
//! software evolves.

use std::any::Any;
use std::fmt;

use crate::error::{CodecError, HashError};
use crate::hash::{Digest, NodeHash};
use crate::property::PropertyMap;

/// Implemented by every payload type stored as a graph node.
///
/// In terms of Rust types, a single type implementing `ElementType`
/// correlates to a single node type with its own unique label.
///
/// # Example
///
/// ```
/// use doppel_core::{ElementType, NodeHasher, PropertyMap, HashError, CodecError};
///
/// #[derive(Debug, Clone)]
/// struct Person {
///     name: String,
///     age: i64,
/// }
///
/// impl ElementType for Person {
///     const PATH: &'static str = module_path!();
///     const NAME: &'static str = "Person";
///
///     fn hash_fields(&self, h: &mut NodeHasher) -> Result<(), HashError> {
///         h.str_field("Name", &self.name);
///         h.int_field("Age", self.age);
///         Ok(())
///     }
///
///     fn to_properties(&self) -> Result<PropertyMap, CodecError> {
///         let mut props = PropertyMap::new();
///         props.insert("Name", self.name.clone());
///         props.insert("Age", self.age);
///         Ok(props)
///     }
///
///     fn from_properties(props: &PropertyMap) -> Result<Self, CodecError> {
///         Ok(Person {
///             name: props.text("Name")?.to_string(),
///             age: props.int("Age")?,
///         })
///     }
/// }
/// ```
pub trait ElementType: fmt::Debug + Send + Sync + Sized + 'static {
    /// Stable package path of the type, written as the first part of the
    /// type preamble. Use `module_path!()`.
    ///
    /// Together with [`NAME`](Self::NAME), this guarantees that two payload
    /// types with identical fields never collide.
    const PATH: &'static str;

    /// The type's local name, written as the second part of the type
    /// preamble. Also the default label under which the type registers.
    const NAME: &'static str;

    /// Emits the payload's fields into the hasher.
    ///
    /// Emission order never affects the resulting address. Encode absent
    /// optional values as the zero value of their type so that `None` and
    /// the zero value hash identically.
    fn hash_fields(&self, h: &mut NodeHasher) -> Result<(), HashError>;

    /// Extracts the payload's properties for storage.
    fn to_properties(&self) -> Result<PropertyMap, CodecError>;

    /// Reconstructs a payload from its stored properties.
    ///
    /// Implementations may assume the map is complete; a missing or
    /// mistyped key should surface through the typed accessors of
    /// [`PropertyMap`].
    fn from_properties(props: &PropertyMap) -> Result<Self, CodecError>;
}

/// The dyn-safe payload object stored in assemblies and passed to graph
/// writers.
///
/// Do not implement this directly; implement [`ElementType`] and the
/// blanket implementation provides `Element`.
pub trait Element: fmt::Debug + Send + Sync {
    /// Stable package path of the concrete type.
    fn type_path(&self) -> &'static str;

    /// Local name of the concrete type.
    fn type_name(&self) -> &'static str;

    /// Emits the payload's fields into the hasher.
    fn hash_into(&self, h: &mut NodeHasher) -> Result<(), HashError>;

    /// Extracts the payload's properties for storage.
    fn format(&self) -> Result<PropertyMap, CodecError>;

    /// Upcast for downcasting to the concrete payload type.
    fn as_any(&self) -> &dyn Any;
}

impl<T: ElementType> Element for T {
    fn type_path(&self) -> &'static str {
        T::PATH
    }

    fn type_name(&self) -> &'static str {
        T::NAME
    }

    fn hash_into(&self, h: &mut NodeHasher) -> Result<(), HashError> {
        self.hash_fields(h)
    }

    fn format(&self) -> Result<PropertyMap, CodecError> {
        self.to_properties()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Returns the [`NodeHash`] for the given payload.
///
/// The digest starts with the type preamble (path, then name) and continues
/// with the payload's fields as emitted by
/// [`hash_fields`](ElementType::hash_fields).
pub fn content_address(node: &dyn Element) -> Result<NodeHash, HashError> {
    let mut h = NodeHasher::with_preamble(node.type_path(), node.type_name());
    node.hash_into(&mut h)?;
    Ok(h.finalize())
}

/// Like [`content_address`] but panics on failure.
///
/// Use when the payload type is developer-controlled and a hashing failure
/// is therefore a bug.
pub fn must_content_address(node: &dyn Element) -> NodeHash {
    match content_address(node) {
        Ok(h) => h,
        Err(err) => panic!(
            "un-hashable node (type {}): {err}",
            node.type_name()
        ),
    }
}

/// Accumulates a payload's fields for content addressing.
///
/// Fields are buffered as `(name, encoded bytes)` pairs and sorted by name
/// at finalization, so the order in which a payload emits its fields never
/// affects the hash. The field name itself participates in the digest, so
/// renaming a field changes the address.
///
/// # Encodings
///
/// - strings: UTF-8 bytes
/// - platform-width integers: variable-length zig-zag / unsigned encodings,
///   identical across architectures and integer widths
/// - floats: big-endian IEEE-754 bytes
/// - booleans: a single byte
/// - sequences: element encodings streamed in order
///
/// Sequences of complex values are not supported; return
/// [`HashError::UnhashableField`] for them.
pub struct NodeHasher {
    preamble: Option<Digest>,
    fields: Vec<(String, Vec<u8>)>,
}

impl NodeHasher {
    /// Starts a hasher seeded with the type preamble.
    pub(crate) fn with_preamble(path: &str, name: &str) -> Self {
        let mut d = Digest::new();
        d.update(path.as_bytes());
        d.update(name.as_bytes());
        NodeHasher {
            preamble: Some(d),
            fields: Vec::new(),
        }
    }

    /// Starts a hasher for a nested payload field, without a type preamble.
    fn nested() -> Self {
        NodeHasher {
            preamble: None,
            fields: Vec::new(),
        }
    }

    /// Emits a string field as UTF-8 bytes.
    pub fn str_field(&mut self, name: &str, value: &str) {
        self.push(name, value.as_bytes().to_vec());
    }

    /// Emits a raw byte-string field.
    pub fn bytes_field(&mut self, name: &str, value: &[u8]) {
        self.push(name, value.to_vec());
    }

    /// Emits a signed integer field as a zig-zag variable-length encoding.
    ///
    /// The encoding is width-independent: an `i32` widened to `i64` keeps
    /// its address as long as the value is unchanged.
    pub fn int_field(&mut self, name: &str, value: i64) {
        let mut buf = Vec::with_capacity(10);
        put_varint(&mut buf, value);
        self.push(name, buf);
    }

    /// Emits an unsigned integer field as a variable-length encoding.
    pub fn uint_field(&mut self, name: &str, value: u64) {
        let mut buf = Vec::with_capacity(10);
        put_uvarint(&mut buf, value);
        self.push(name, buf);
    }

    /// Emits a 64-bit float field as big-endian bytes.
    pub fn float_field(&mut self, name: &str, value: f64) {
        self.push(name, value.to_be_bytes().to_vec());
    }

    /// Emits a 32-bit float field as big-endian bytes.
    pub fn float32_field(&mut self, name: &str, value: f32) {
        self.push(name, value.to_be_bytes().to_vec());
    }

    /// Emits a boolean field as a single byte.
    pub fn bool_field(&mut self, name: &str, value: bool) {
        self.push(name, vec![u8::from(value)]);
    }

    /// Emits a sequence of strings, streaming each element's bytes in order.
    pub fn strs_field<'a>(&mut self, name: &str, values: impl IntoIterator<Item = &'a str>) {
        let mut buf = Vec::new();
        for v in values {
            buf.extend_from_slice(v.as_bytes());
        }
        self.push(name, buf);
    }

    /// Emits a sequence of signed integers, streaming each encoding in
    /// order.
    pub fn ints_field(&mut self, name: &str, values: impl IntoIterator<Item = i64>) {
        let mut buf = Vec::new();
        for v in values {
            put_varint(&mut buf, v);
        }
        self.push(name, buf);
    }

    /// Emits a sequence of unsigned integers, streaming each encoding in
    /// order.
    pub fn uints_field(&mut self, name: &str, values: impl IntoIterator<Item = u64>) {
        let mut buf = Vec::new();
        for v in values {
            put_uvarint(&mut buf, v);
        }
        self.push(name, buf);
    }

    /// Emits a sequence of floats as big-endian bytes in order.
    pub fn floats_field(&mut self, name: &str, values: impl IntoIterator<Item = f64>) {
        let mut buf = Vec::new();
        for v in values {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        self.push(name, buf);
    }

    /// Emits a nested payload field by delegating to its own hashing.
    ///
    /// The nested payload's fields are digested without a nested type
    /// preamble: two payloads that differ only in the concrete type behind
    /// an abstract field hash equally when their fields agree. Changing
    /// this would change every persisted address and must be gated by a
    /// migration.
    pub fn nested_field(&mut self, name: &str, value: &dyn Element) -> Result<(), HashError> {
        let mut sub = NodeHasher::nested();
        value.hash_into(&mut sub)?;
        let bytes = sub.into_field_bytes();
        self.push(name, bytes);
        Ok(())
    }

    fn push(&mut self, name: &str, bytes: Vec<u8>) {
        self.fields.push((name.to_string(), bytes));
    }

    /// Sorted concatenation of the buffered fields, for nested scopes.
    fn into_field_bytes(mut self) -> Vec<u8> {
        self.fields.sort_by(|a, b| a.0.cmp(&b.0));
        let mut out = Vec::new();
        for (name, bytes) in self.fields {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&bytes);
        }
        out
    }

    pub(crate) fn finalize(mut self) -> NodeHash {
        let mut d = self
            .preamble
            .take()
            .unwrap_or_else(Digest::new);
        self.fields.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, bytes) in &self.fields {
            d.update(name.as_bytes());
            d.update(bytes);
        }
        NodeHash::from(d.finalize())
    }
}

/// Unsigned LEB128.
fn put_uvarint(buf: &mut Vec<u8>, mut x: u64) {
    while x >= 0x80 {
        buf.push(x as u8 | 0x80);
        x >>= 7;
    }
    buf.push(x as u8);
}

/// Zig-zag then unsigned LEB128, so small negative values stay small.
fn put_varint(buf: &mut Vec<u8>, x: i64) {
    let ux = ((x << 1) ^ (x >> 63)) as u64;
    put_uvarint(buf, ux);
}
