//! Accessors and Value Storage
//!
//! An [`AccessorTable`] maps property names to their definitions. Each
//! compiled schema owns one (the shared, schema-level table) and each
//! instance owns another for expando properties added at runtime.
//!
//! A [`ValueStore`] holds one instance's slots: raw values for data
//! properties and computed handles for computed ones. Slots are created on
//! first access, so an instance that never touches a property never pays for
//! it.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::trace;

use super::definition::Definition;
use super::map::{MapInner, ObservableMap};
use crate::error::Result;
use crate::reactive::ComputedHandle;
use crate::value::Value;

/// Property name → definition.
#[derive(Default)]
pub(crate) struct AccessorTable {
    entries: RefCell<IndexMap<Rc<str>, Rc<Definition>>>,
}

impl AccessorTable {
    /// Install `definition` under `name`. Returns `false` when the very same
    /// definition is already installed.
    pub fn install(&self, name: &str, definition: Rc<Definition>) -> bool {
        let mut entries = self.entries.borrow_mut();
        if let Some(existing) = entries.get(name) {
            if Rc::ptr_eq(existing, &definition) {
                return false;
            }
        }
        entries.insert(name.into(), definition);
        true
    }

    pub fn get(&self, name: &str) -> Option<Rc<Definition>> {
        self.entries.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries.borrow_mut().shift_remove(name).is_some()
    }

    pub fn names(&self) -> Vec<Rc<str>> {
        self.entries.borrow().keys().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

/// One stored property.
#[derive(Clone)]
pub(crate) enum Slot {
    Data(Value),
    Computed(Rc<ComputedHandle>),
}

/// Per-instance slots.
#[derive(Default)]
pub(crate) struct ValueStore {
    slots: RefCell<IndexMap<Rc<str>, Slot>>,
}

impl ValueStore {
    pub fn data(&self, key: &str) -> Option<Value> {
        match self.slots.borrow().get(key) {
            Some(Slot::Data(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn handle(&self, key: &str) -> Option<Rc<ComputedHandle>> {
        match self.slots.borrow().get(key) {
            Some(Slot::Computed(handle)) => Some(Rc::clone(handle)),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.borrow().contains_key(key)
    }

    /// Store `slot` unless one exists already; returns the stored slot.
    pub fn insert_if_absent(&self, key: &str, slot: Slot) -> Slot {
        self.slots
            .borrow_mut()
            .entry(key.into())
            .or_insert(slot)
            .clone()
    }

    /// Write a data value. Returns the previous value, or `None` when the
    /// slot didn't exist.
    pub fn write(&self, key: &str, value: Value) -> Option<Value> {
        match self.slots.borrow_mut().insert(key.into(), Slot::Data(value)) {
            Some(Slot::Data(old)) => Some(old),
            Some(Slot::Computed(_)) => Some(Value::Undefined),
            None => None,
        }
    }

    pub fn remove(&self, key: &str) -> Option<Slot> {
        self.slots.borrow_mut().shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }
}

enum SetTarget {
    Data(Weak<MapInner>),
    LastSet(Weak<ComputedHandle>),
}

/// Passed to [`Setter::Resolving`](super::Setter::Resolving) hooks. Calling
/// [`resolve`](Self::resolve) stores a value, immediately or later.
#[derive(Clone)]
pub struct SetResolver {
    key: Rc<str>,
    target: Rc<SetTarget>,
}

impl SetResolver {
    pub(crate) fn data(map: &ObservableMap, key: &str) -> Self {
        Self {
            key: key.into(),
            target: Rc::new(SetTarget::Data(map.downgrade())),
        }
    }

    pub(crate) fn last_set(handle: &Rc<ComputedHandle>, key: &str) -> Self {
        Self {
            key: key.into(),
            target: Rc::new(SetTarget::LastSet(Rc::downgrade(handle))),
        }
    }

    /// Store `value`. Data properties emit their usual change event;
    /// computed properties re-evaluate with the new last-set value.
    pub fn resolve(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        match &*self.target {
            SetTarget::Data(map) => match map.upgrade() {
                Some(inner) => ObservableMap::from_inner(inner).store_resolved(&self.key, value),
                None => {
                    trace!(key = %self.key, "set resolver outlived its map");
                    Ok(())
                }
            },
            SetTarget::LastSet(handle) => {
                if let Some(handle) = handle.upgrade() {
                    let _batch = handle.runtime().batch_scope();
                    handle.set_last_set(value);
                }
                Ok(())
            }
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for SetResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetResolver").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent_for_the_same_definition() {
        let table = AccessorTable::default();
        let def = Rc::new(Definition::passthrough("a"));

        assert!(table.install("a", Rc::clone(&def)));
        assert!(!table.install("a", Rc::clone(&def)));
        assert_eq!(table.len(), 1);

        // A different definition replaces the old one.
        assert!(table.install("a", Rc::new(Definition::passthrough("a"))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn store_reports_previous_values() {
        let store = ValueStore::default();
        assert_eq!(store.write("a", Value::from(1)), None);
        assert_eq!(store.write("a", Value::from(2)), Some(Value::from(1)));
        assert_eq!(store.data("a"), Some(Value::from(2)));

        let kept = store.insert_if_absent("a", Slot::Data(Value::from(9)));
        assert!(matches!(kept, Slot::Data(v) if v == Value::from(2)));
        assert!(store.remove("a").is_some());
        assert!(!store.contains("a"));
    }
}
