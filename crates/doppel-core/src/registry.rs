//! The process-wide node registry and codec.
//!
//! The type system put forth by this crate asserts that any payload type
//! maps to exactly one backend label; registering that mapping is what makes
//! a type readable and writable in a graph. [`register`] uses the type's
//! local name as the label; [`register_label`] is the explicit form that
//! overcomes name conflicts between types from different modules.
//!
//! [`RawNode`] is the engine-side description of a payload: its label, its
//! content address, its business properties, and the engine metadata the
//! backend keeps alongside them. [`format_node`] and [`parse_node`] convert
//! between payload values and raw nodes through the registry.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::element::{content_address, Element, ElementType};
use crate::error::CodecError;
use crate::hash::NodeHash;
use crate::property::{PropertyMap, PropertyValue};

/// The metadata key under which a node's content address is stored.
pub const CONTENT_ADDRESS_KEY: &str = "_contentAddress";

/// Describes a payload as stored by a graph backend.
///
/// Conventions:
///
/// - A stored node has exactly one label, which identifies its payload type
///   as set by [`register`] or [`register_label`].
/// - All values are stored as properties of the node. Properties starting
///   with an underscore (`_`) are metadata for internal engine use; the
///   rest carry business value and populate [`RawNode::props`].
/// - The content address is stored under [`CONTENT_ADDRESS_KEY`] as a bare
///   40-hex string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    /// The label of the node, indicating its payload type.
    pub label: String,
    /// Uniquely identifies the node within the graph; computed from the
    /// node's attributes. Users rarely construct raw nodes manually.
    pub content_address: NodeHash,
    /// The properties bearing business value.
    pub props: PropertyMap,
    /// The properties used by the graph engine, usually for manual
    /// debugging purposes.
    pub metadata: PropertyMap,
}

impl RawNode {
    /// Reconstructs a `RawNode` from a stored row: the node's single label
    /// and its full property map, metadata included.
    ///
    /// Fails when [`CONTENT_ADDRESS_KEY`] is absent or not a string. We do
    /// not panic here in case the stored shape drifts without us knowing;
    /// the change engine escalates these errors where that policy applies.
    pub fn from_stored(label: impl Into<String>, stored: &PropertyMap) -> Result<RawNode, CodecError> {
        let mut props = PropertyMap::new();
        let mut metadata = PropertyMap::new();
        for (key, value) in stored {
            if key.starts_with('_') {
                metadata.insert(key.clone(), value.clone());
            } else {
                props.insert(key.clone(), value.clone());
            }
        }

        let text = stored.text(CONTENT_ADDRESS_KEY)?;
        let content_address = NodeHash::from_hex(text)?;

        Ok(RawNode {
            label: label.into(),
            content_address,
            props,
            metadata,
        })
    }

    /// Flattens the node back into a single stored property map, with the
    /// content address under [`CONTENT_ADDRESS_KEY`].
    pub fn stored_properties(&self) -> PropertyMap {
        let mut stored = PropertyMap::new();
        for (key, value) in &self.props {
            stored.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.metadata {
            stored.insert(key.clone(), value.clone());
        }
        stored.insert(
            CONTENT_ADDRESS_KEY,
            PropertyValue::Text(self.content_address.to_hex()),
        );
        stored
    }
}

type Decoder = fn(&PropertyMap) -> Result<Box<dyn Element>, CodecError>;

struct LabelEntry {
    type_id: TypeId,
    type_name: &'static str,
    decode: Decoder,
}

#[derive(Default)]
struct Inner {
    by_label: HashMap<String, LabelEntry>,
    by_type: HashMap<TypeId, String>,
}

/// Global for the entire process: any payload type maps to exactly one
/// label.
static REGISTRY: LazyLock<Mutex<Inner>> = LazyLock::new(|| Mutex::new(Inner::default()));

fn decode_into_box<T: ElementType>(props: &PropertyMap) -> Result<Box<dyn Element>, CodecError> {
    Ok(Box::new(T::from_properties(props)?))
}

/// Registers `T` under its local type name.
///
/// May panic when used from different modules on types with the same name;
/// prefer [`register_label`] in that case. Registering the same type under
/// the same label twice is a no-op.
pub fn register<T: ElementType>() {
    register_label::<T>(T::NAME);
}

/// Registers `T` under an explicit label.
///
/// # Panics
///
/// Panics when the label is already registered for a different type, or
/// when the type is already registered under a different label. Both are
/// fatal developer errors: the label table is the contract between code and
/// persisted data.
pub fn register_label<T: ElementType>(label: &str) {
    let violation = {
        let mut inner = REGISTRY.lock().expect("node registry lock poisoned");

        match inner.by_label.get(label) {
            Some(entry) if entry.type_id != TypeId::of::<T>() => Some(format!(
                "registering duplicate types for {label:?}: {} != {}",
                entry.type_name,
                T::NAME
            )),
            Some(_) => None, // identical registration, keep it
            None => {
                match inner.by_type.get(&TypeId::of::<T>()) {
                    Some(existing) if existing != label => Some(format!(
                        "registering duplicate labels for {}: {existing:?} != {label:?}",
                        T::NAME
                    )),
                    _ => {
                        inner.by_label.insert(
                            label.to_string(),
                            LabelEntry {
                                type_id: TypeId::of::<T>(),
                                type_name: T::NAME,
                                decode: decode_into_box::<T>,
                            },
                        );
                        inner
                            .by_type
                            .insert(TypeId::of::<T>(), label.to_string());
                        None
                    }
                }
            }
        }
    };

    // Raised outside the lock so a developer error never poisons the
    // registry for the rest of the process.
    if let Some(reason) = violation {
        panic!("node registry: {reason}");
    }
}

/// Returns all labels registered so far (i.e. all labels that can identify
/// a node). Backends declare their uniqueness constraints over these.
pub fn known_labels() -> Vec<String> {
    let inner = REGISTRY.lock().expect("node registry lock poisoned");
    let mut labels: Vec<String> = inner.by_label.keys().cloned().collect();
    labels.sort();
    labels
}

/// Returns the label pre-registered for `T`.
pub fn label_of<T: ElementType>() -> Option<String> {
    let inner = REGISTRY.lock().expect("node registry lock poisoned");
    inner.by_type.get(&TypeId::of::<T>()).cloned()
}

/// Returns the label pre-registered for the given payload's concrete type.
pub fn label_of_element(node: &dyn Element) -> Option<String> {
    let inner = REGISTRY.lock().expect("node registry lock poisoned");
    inner.by_type.get(&node.as_any().type_id()).cloned()
}

/// Constructs a payload from the given raw node, decoding according to the
/// pre-registered labels.
///
/// After decoding, the payload's content address is recomputed and compared
/// against the stored one. A mismatch is reported, not panicked: although
/// likely a bug, the developer does not control the input: the divergence
/// may stem from a hand-modified storage row.
pub fn parse_node(raw: &RawNode) -> Result<Box<dyn Element>, CodecError> {
    let decode = {
        let inner = REGISTRY.lock().expect("node registry lock poisoned");
        inner
            .by_label
            .get(&raw.label)
            .map(|entry| entry.decode)
            .ok_or_else(|| CodecError::UnregisteredLabel(raw.label.clone()))?
    };

    let node = decode(&raw.props)?;

    let computed = content_address(node.as_ref())?;
    if computed != raw.content_address {
        return Err(CodecError::AddressMismatch {
            stored: raw.content_address.to_hex(),
            computed: computed.to_hex(),
        });
    }

    Ok(node)
}

/// Deconstructs the given payload into a raw node, encoding according to
/// the pre-registered labels.
pub fn format_node(node: &dyn Element) -> Result<RawNode, CodecError> {
    let label = label_of_element(node)
        .ok_or_else(|| CodecError::UnregisteredType(node.type_name().to_string()))?;

    let content_address =
        content_address(node).map_err(CodecError::Hash)?;
    let props = node.format()?;

    Ok(RawNode {
        label,
        content_address,
        props,
        metadata: PropertyMap::new(),
    })
}

/// A shared payload handle with a serde representation.
///
/// Serializes through [`RawNode`]; deserializing goes through the registry,
/// so the payload's type must be registered in the receiving process. Used
/// by recorded compilation steps and assembly wire forms.
#[derive(Clone)]
pub struct NodeRef(Arc<dyn Element>);

impl NodeRef {
    pub fn new(node: impl ElementType) -> Self {
        NodeRef(Arc::new(node))
    }

    pub fn from_arc(node: Arc<dyn Element>) -> Self {
        NodeRef(node)
    }

    pub fn element(&self) -> &dyn Element {
        self.0.as_ref()
    }

    pub fn into_arc(self) -> Arc<dyn Element> {
        self.0
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({:?})", self.0)
    }
}

impl Serialize for NodeRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = format_node(self.0.as_ref()).map_err(serde::ser::Error::custom)?;
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NodeRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawNode::deserialize(deserializer)?;
        let node = parse_node(&raw).map_err(serde::de::Error::custom)?;
        Ok(NodeRef(Arc::from(node)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::NodeHasher;
    use crate::error::HashError;

    #[derive(Debug, Clone, PartialEq)]
    struct Imei {
        number: String,
    }

    impl ElementType for Imei {
        const PATH: &'static str = module_path!();
        const NAME: &'static str = "RegistryTestImei";

        fn hash_fields(&self, h: &mut NodeHasher) -> Result<(), HashError> {
            h.str_field("Number", &self.number);
            Ok(())
        }

        fn to_properties(&self) -> Result<PropertyMap, CodecError> {
            let mut m = PropertyMap::new();
            m.insert("Number", self.number.clone());
            Ok(m)
        }

        fn from_properties(props: &PropertyMap) -> Result<Self, CodecError> {
            Ok(Imei {
                number: props.text("Number")?.to_string(),
            })
        }
    }

    #[derive(Debug, Clone)]
    struct Imsi {
        number: String,
    }

    impl ElementType for Imsi {
        const PATH: &'static str = module_path!();
        const NAME: &'static str = "RegistryTestImsi";

        fn hash_fields(&self, h: &mut NodeHasher) -> Result<(), HashError> {
            h.str_field("Number", &self.number);
            Ok(())
        }

        fn to_properties(&self) -> Result<PropertyMap, CodecError> {
            let mut m = PropertyMap::new();
            m.insert("Number", self.number.clone());
            Ok(m)
        }

        fn from_properties(props: &PropertyMap) -> Result<Self, CodecError> {
            Ok(Imsi {
                number: props.text("Number")?.to_string(),
            })
        }
    }

    #[test]
    fn format_parse_roundtrip() {
        register::<Imei>();

        let value = Imei {
            number: "356938035643809".into(),
        };
        let raw = format_node(&value).unwrap();
        assert_eq!(raw.label, "RegistryTestImei");
        assert_eq!(raw.content_address, content_address(&value).unwrap());

        let back = parse_node(&raw).unwrap();
        let back = back.as_any().downcast_ref::<Imei>().unwrap();
        assert_eq!(back, &value);
    }

    #[test]
    fn format_unregistered_type_fails() {
        #[derive(Debug, Clone)]
        struct Unregistered;

        impl ElementType for Unregistered {
            const PATH: &'static str = module_path!();
            const NAME: &'static str = "RegistryTestUnregistered";

            fn hash_fields(&self, _h: &mut NodeHasher) -> Result<(), HashError> {
                Ok(())
            }

            fn to_properties(&self) -> Result<PropertyMap, CodecError> {
                Ok(PropertyMap::new())
            }

            fn from_properties(_props: &PropertyMap) -> Result<Self, CodecError> {
                Ok(Unregistered)
            }
        }

        assert!(matches!(
            format_node(&Unregistered),
            Err(CodecError::UnregisteredType(_))
        ));
    }

    #[test]
    fn parse_unknown_label_fails() {
        let raw = RawNode {
            label: "RegistryTestNeverRegistered".into(),
            content_address: NodeHash::default(),
            props: PropertyMap::new(),
            metadata: PropertyMap::new(),
        };
        assert!(matches!(
            parse_node(&raw),
            Err(CodecError::UnregisteredLabel(_))
        ));
    }

    #[test]
    fn parse_detects_address_mismatch() {
        register::<Imei>();

        let value = Imei {
            number: "356938035643809".into(),
        };
        let mut raw = format_node(&value).unwrap();
        // Simulate a hand-modified storage row: the properties changed but
        // the stored address did not.
        raw.props.insert("Number", "000000000000000");

        assert!(matches!(
            parse_node(&raw),
            Err(CodecError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn duplicate_label_for_different_type_panics() {
        #[derive(Debug, Clone)]
        struct DupLeft;

        #[derive(Debug, Clone)]
        struct DupRight;

        impl ElementType for DupLeft {
            const PATH: &'static str = module_path!();
            const NAME: &'static str = "RegistryTestDupLeft";

            fn hash_fields(&self, _h: &mut NodeHasher) -> Result<(), HashError> {
                Ok(())
            }

            fn to_properties(&self) -> Result<PropertyMap, CodecError> {
                Ok(PropertyMap::new())
            }

            fn from_properties(_props: &PropertyMap) -> Result<Self, CodecError> {
                Ok(DupLeft)
            }
        }

        impl ElementType for DupRight {
            const PATH: &'static str = module_path!();
            const NAME: &'static str = "RegistryTestDupRight";

            fn hash_fields(&self, _h: &mut NodeHasher) -> Result<(), HashError> {
                Ok(())
            }

            fn to_properties(&self) -> Result<PropertyMap, CodecError> {
                Ok(PropertyMap::new())
            }

            fn from_properties(_props: &PropertyMap) -> Result<Self, CodecError> {
                Ok(DupRight)
            }
        }

        register_label::<DupLeft>("RegistryTestShared");
        let result =
            std::panic::catch_unwind(|| register_label::<DupRight>("RegistryTestShared"));
        assert!(result.is_err());

        // The registry survives the developer error: the original mapping
        // is intact and usable.
        assert!(label_of_element(&DupLeft).is_some());
        assert!(label_of::<DupRight>().is_none());
    }

    #[test]
    fn reregistering_the_same_pair_is_idempotent() {
        register::<Imsi>();
        register::<Imsi>();
        assert_eq!(label_of::<Imsi>().as_deref(), Some("RegistryTestImsi"));
    }

    #[test]
    fn raw_node_from_stored_splits_metadata() {
        register::<Imei>();
        let value = Imei {
            number: "356938035643809".into(),
        };
        let mut raw = format_node(&value).unwrap();
        raw.metadata.insert("_created_at", "2024-01-01T00:00:00Z");

        let stored = raw.stored_properties();
        let back = RawNode::from_stored(raw.label.clone(), &stored).unwrap();
        assert_eq!(back.content_address, raw.content_address);
        assert_eq!(back.props, raw.props);
        assert!(back.metadata.contains_key(CONTENT_ADDRESS_KEY));
        assert!(back.metadata.contains_key("_created_at"));
    }

    #[test]
    fn raw_node_from_stored_requires_content_address() {
        let mut stored = PropertyMap::new();
        stored.insert("Number", "123");
        assert!(matches!(
            RawNode::from_stored("RegistryTestImei", &stored),
            Err(CodecError::PropertyMissing(_))
        ));
    }

    #[test]
    fn primitive_wrapper_uses_the_value_convention() {
        // A payload wrapping a single primitive stores it under the
        // conventional "value" key.
        #[derive(Debug, Clone, PartialEq)]
        struct Celsius(i64);

        impl ElementType for Celsius {
            const PATH: &'static str = module_path!();
            const NAME: &'static str = "RegistryTestCelsius";

            fn hash_fields(&self, h: &mut NodeHasher) -> Result<(), HashError> {
                h.int_field("value", self.0);
                Ok(())
            }

            fn to_properties(&self) -> Result<PropertyMap, CodecError> {
                let mut m = PropertyMap::new();
                m.insert("value", self.0);
                Ok(m)
            }

            fn from_properties(props: &PropertyMap) -> Result<Self, CodecError> {
                Ok(Celsius(props.int("value")?))
            }
        }

        register::<Celsius>();
        let raw = format_node(&Celsius(21)).unwrap();
        assert!(raw.props.contains_key("value"));

        let back = parse_node(&raw).unwrap();
        assert_eq!(back.as_any().downcast_ref::<Celsius>(), Some(&Celsius(21)));
    }

    #[test]
    fn node_ref_serde_roundtrip() {
        register::<Imei>();
        let node = NodeRef::new(Imei {
            number: "356938035643809".into(),
        });
        let json = serde_json::to_string(&node).unwrap();
        let back: NodeRef = serde_json::from_str(&json).unwrap();
        assert_eq!(
            must(back.element()),
            must(node.element()),
        );

        fn must(e: &dyn Element) -> NodeHash {
            crate::element::must_content_address(e)
        }
    }
}
