//! Typed property maps for node storage.
//!
//! A [`PropertyMap`] carries the business attributes of a node as stored by
//! a backend. Values are restricted to the shapes every supported backend
//! can represent ([`PropertyValue`]); complex values are stored as JSON by
//! the backends, so everything here is serde-serializable.
//!
//! # Conventions
//!
//! - Payload types with named fields use one entry per field.
//! - Payload types wrapping a single primitive use the single key `"value"`.
//! - Payload types wrapping a sequence use the single key `"values"`.
//! - Keys beginning with an underscore are reserved for engine metadata and
//!   never appear in a `PropertyMap`; they live in
//!   [`RawNode::metadata`](crate::registry::RawNode) instead.

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// A single property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// The name of this value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::Text(_) => "text",
            PropertyValue::Bytes(_) => "bytes",
            PropertyValue::List(_) => "list",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::List(l) => Some(l),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        PropertyValue::Bytes(v)
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(v: Vec<PropertyValue>) -> Self {
        PropertyValue::List(v)
    }
}

/// The property map of a node, keyed by field name.
///
/// Iteration order is the key order (BTreeMap), so formatting a map is
/// deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap(BTreeMap<String, PropertyValue>);

impl PropertyMap {
    pub fn new() -> Self {
        PropertyMap::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, PropertyValue> {
        self.0.iter()
    }

    // Typed accessors. These protect parsers against properties whose
    // runtime type differs from the expected one, which usually indicates a
    // storage query was changed without updating dependent code.

    /// Returns the text value at `key`, or a typed error.
    pub fn text(&self, key: &str) -> Result<&str, CodecError> {
        let v = self.require(key)?;
        v.as_text().ok_or(CodecError::UnexpectedPropertyType {
            key: key.to_string(),
            found: v.kind(),
        })
    }

    /// Returns the integer value at `key`, or a typed error.
    pub fn int(&self, key: &str) -> Result<i64, CodecError> {
        let v = self.require(key)?;
        v.as_int().ok_or(CodecError::UnexpectedPropertyType {
            key: key.to_string(),
            found: v.kind(),
        })
    }

    /// Returns the float value at `key`, or a typed error.
    pub fn float(&self, key: &str) -> Result<f64, CodecError> {
        let v = self.require(key)?;
        v.as_float().ok_or(CodecError::UnexpectedPropertyType {
            key: key.to_string(),
            found: v.kind(),
        })
    }

    /// Returns the boolean value at `key`, or a typed error.
    pub fn boolean(&self, key: &str) -> Result<bool, CodecError> {
        let v = self.require(key)?;
        v.as_bool().ok_or(CodecError::UnexpectedPropertyType {
            key: key.to_string(),
            found: v.kind(),
        })
    }

    /// Returns the list value at `key`, or a typed error.
    pub fn list(&self, key: &str) -> Result<&[PropertyValue], CodecError> {
        let v = self.require(key)?;
        v.as_list().ok_or(CodecError::UnexpectedPropertyType {
            key: key.to_string(),
            found: v.kind(),
        })
    }

    fn require(&self, key: &str) -> Result<&PropertyValue, CodecError> {
        self.0
            .get(key)
            .ok_or_else(|| CodecError::PropertyMissing(key.to_string()))
    }
}

impl FromIterator<(String, PropertyValue)> for PropertyMap {
    fn from_iter<T: IntoIterator<Item = (String, PropertyValue)>>(iter: T) -> Self {
        PropertyMap(iter.into_iter().collect())
    }
}

impl IntoIterator for PropertyMap {
    type Item = (String, PropertyValue);
    type IntoIter = btree_map::IntoIter<String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PropertyMap {
    type Item = (&'a String, &'a PropertyValue);
    type IntoIter = btree_map::Iter<'a, String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
