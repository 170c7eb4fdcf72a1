//! Per-assembly attribute views derived from change streams.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::assembly::{Assembly, AssemblyRef};
use crate::changes::GraphChanged;
use crate::hash::ComponentId;

/// Correlates assemblies of a digital-twin graph with a derived attribute
/// value, maintained from [`GraphChanged`] notifications.
///
/// The attribute function defines the tracked attribute: given an assembly
/// it returns the attribute's value, or `None` when the attribute is not
/// valid for that assembly. It usually walks the assembly to extract an
/// appropriate value, but any value of type `V` is appropriate.
///
/// An `AttributeMap` is safe for concurrent use.
pub struct AttributeMap<V> {
    m: Mutex<HashMap<ComponentId, V>>,
    attribute_of: Box<dyn Fn(&Assembly) -> Option<V> + Send + Sync>,
}

impl<V: Clone> AttributeMap<V> {
    /// Returns a map tracking the attribute defined by `attr`.
    pub fn new(attr: impl Fn(&Assembly) -> Option<V> + Send + Sync + 'static) -> Self {
        AttributeMap {
            m: Mutex::new(HashMap::new()),
            attribute_of: Box::new(attr),
        }
    }

    /// Looks up the last known attribute value of the given component.
    pub fn find(&self, id: ComponentId) -> Option<V> {
        let m = self.m.lock().expect("attribute map lock poisoned");
        m.get(&id).cloned()
    }

    /// Determines the effective attribute value for the given assembly.
    ///
    /// An invalid attribute expunges the assembly from the map: we cannot
    /// keep a previous value once the attribute function deems the current
    /// assembly invalid for it.
    pub fn update(&self, assembly: &Assembly) {
        let mut m = self.m.lock().expect("attribute map lock poisoned");
        match (self.attribute_of)(assembly) {
            Some(v) => {
                m.insert(assembly.assembly_id(), v);
            }
            None => {
                m.remove(&assembly.assembly_id());
            }
        }
    }

    /// Feeds one change notification into the map: created and updated
    /// assemblies are re-evaluated, removed assemblies are expunged.
    pub fn apply(&self, changes: &GraphChanged) {
        for created in &changes.created {
            self.update(&created.assembly);
        }
        for updated in &changes.updated {
            self.update(&updated.assembly);
        }
        let mut m = self.m.lock().expect("attribute map lock poisoned");
        for removed in &changes.removed {
            m.remove(&removed.id);
        }
    }

    /// Applies `f` to each tracked component and its attribute value until
    /// `f` returns `false` or all components have been visited.
    pub fn for_each(&self, mut f: impl FnMut(ComponentId, &V) -> bool) {
        let m = self.m.lock().expect("attribute map lock poisoned");
        for (id, v) in m.iter() {
            if !f(*id, v) {
                break;
            }
        }
    }
}
