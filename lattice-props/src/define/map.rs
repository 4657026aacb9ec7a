//! Observable Maps
//!
//! An [`ObservableMap`] is an object whose properties follow a
//! [`MapSchema`]. Reading a property inside a computed evaluation records a
//! dependency; writing one coerces the value, runs the setter hook and, if
//! the value actually changed, queues a change record through the runtime's
//! dispatcher.
//!
//! # Property Kinds
//!
//! - **Data** properties live in the instance's value store. Defaults are
//!   materialized on first read, once, without an event.
//! - **Computed** properties are backed by a
//!   [`ComputedHandle`](crate::reactive::ComputedHandle) created on first
//!   access. They turn hot while anything listens to them.
//! - **Expando** properties are keys the schema doesn't declare. Writing
//!   one installs an instance-level accessor from the wildcard definition
//!   and announces the new key on `"__keys"`.

use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use super::accessor::{AccessorTable, SetResolver, Slot, ValueStore};
use super::definition::{compile_map, CompiledMap, Definition};
use super::schema::{MapSchema, SerializeMode, Setter};
use crate::error::{Error, Result};
use crate::reactive::event::{self, Event, EventHub, EventKind, EventTarget, Listener, KEYS_EVENT};
use crate::reactive::{ComputedHandle, Listenable, ObjectId, Patch, Runtime, SubscriberId, Target};
use crate::value::{Object, Value};

pub(crate) struct MapInner {
    id: ObjectId,
    runtime: Runtime,
    schema: Rc<MapSchema>,
    compiled: Rc<CompiledMap>,
    expandos: AccessorTable,
    store: ValueStore,
    hub: EventHub,
    self_weak: Weak<MapInner>,
}

impl EventTarget for MapInner {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn hub(&self) -> &EventHub {
        &self.hub
    }

    fn listener_added(&self, key: &str) {
        let Some(inner) = self.self_weak.upgrade() else {
            return;
        };
        let map = ObservableMap::from_inner(inner);
        let Some(def) = map.definition(key) else {
            return;
        };
        if !def.is_computed() {
            return;
        }
        match map.handle(key, &def) {
            Ok(handle) => handle.add_listener(),
            Err(err) => warn!(key, error = %err, "could not create computed property"),
        }
    }

    fn listener_removed(&self, key: &str) {
        if let Some(handle) = self.store.handle(key) {
            handle.remove_listener();
        }
    }
}

/// A live object following a [`MapSchema`].
///
/// Cloning yields another handle to the same object.
#[derive(Clone)]
pub struct ObservableMap {
    inner: Rc<MapInner>,
}

impl ObservableMap {
    /// Create a map of `schema` populated from `props`, which may be a plain
    /// object, another map (copied shallowly), or nullish for an empty map.
    pub fn new(runtime: &Runtime, schema: &Rc<MapSchema>, props: impl Into<Value>) -> Result<Self> {
        let entries = entries_of(props.into())?;
        let compiled = compile_map(schema, runtime)?;
        let inner = Rc::new_cyclic(|self_weak| MapInner {
            id: ObjectId::new(),
            runtime: runtime.clone(),
            schema: Rc::clone(schema),
            compiled,
            expandos: AccessorTable::default(),
            store: ValueStore::default(),
            hub: EventHub::new(),
            self_weak: self_weak.clone(),
        });
        let map = Self { inner };
        runtime.batch(|| {
            entries
                .into_iter()
                .try_for_each(|(key, value)| map.set(&key, value))
        })?;
        trace!(id = map.inner.id.raw(), schema = schema.name(), "map created");
        Ok(map)
    }

    pub(crate) fn from_inner(inner: Rc<MapInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<MapInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn schema(&self) -> &Rc<MapSchema> {
        &self.inner.schema
    }

    /// Whether this map was built from exactly `schema`.
    pub fn is_instance_of(&self, schema: &Rc<MapSchema>) -> bool {
        Rc::ptr_eq(&self.inner.schema, schema)
    }

    pub fn ptr_eq(&self, other: &ObservableMap) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The definition governing `key`, declared or expando.
    pub fn definition(&self, key: &str) -> Option<Rc<Definition>> {
        self.inner
            .compiled
            .accessors
            .get(key)
            .or_else(|| self.inner.expandos.get(key))
    }

    /// Whether `key` was added at runtime rather than declared.
    pub fn is_expando(&self, key: &str) -> bool {
        self.inner.expandos.contains(key)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read a property, recording the read in any running computed
    /// evaluation. Unknown keys read as `Undefined`.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.observe(key);
        self.read(key)
    }

    /// Read a property without recording a dependency.
    pub fn get_untracked(&self, key: &str) -> Result<Value> {
        self.inner.runtime.untracked(|| self.read(key))
    }

    fn read(&self, key: &str) -> Result<Value> {
        match self.definition(key) {
            None => Ok(Value::Undefined),
            Some(def) if def.is_computed() => self.handle(key, &def)?.get(),
            Some(def) => self.current_data(key, &def),
        }
    }

    /// Declared and expando property names, in that order.
    pub fn keys(&self) -> Vec<String> {
        self.observe(KEYS_EVENT);
        self.key_names().iter().map(|k| k.to_string()).collect()
    }

    fn key_names(&self) -> Vec<Rc<str>> {
        let mut names = self.inner.compiled.accessors.names();
        names.extend(self.inner.expandos.names());
        names
    }

    /// Plain snapshot of every property, computed ones included. Nested
    /// maps and lists are converted recursively; `Undefined` values are
    /// left out.
    pub fn get_all(&self) -> Result<Value> {
        self.observe(KEYS_EVENT);
        let mut out = Object::new();
        for key in self.key_names() {
            let value = self.get(&key)?;
            if !value.is_undefined() {
                out.insert(key.to_string(), value.to_plain()?);
            }
        }
        Ok(Value::from(out))
    }

    /// JSON form honoring each property's `serialize` mode. Computed
    /// properties are left out unless their definition opts in.
    pub fn serialize(&self) -> Result<serde_json::Value> {
        self.observe(KEYS_EVENT);
        let mut out = serde_json::Map::new();
        for key in self.key_names() {
            let Some(def) = self.definition(&key) else {
                continue;
            };
            let json = match def.serialize_mode() {
                SerializeMode::Skip => continue,
                SerializeMode::Include => {
                    let value = self.get(&key)?;
                    if value.is_undefined() {
                        continue;
                    }
                    value.to_json()?
                }
                SerializeMode::With(f) => f(&self.get(&key)?)?,
            };
            out.insert(key.to_string(), json);
        }
        Ok(serde_json::Value::Object(out))
    }

    /// The last value written through a computed property's setter.
    pub(crate) fn last_set(&self, key: &str) -> Value {
        self.inner
            .store
            .handle(key)
            .map(|handle| handle.last_set())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write a property.
    ///
    /// Writes to computed properties without a setter are ignored with a
    /// warning; use [`try_set`](Self::try_set) to get the error instead.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        match self.write(key, value.into()) {
            Err(Error::WriteRejected { property }) => {
                warn!(property = %property, "ignoring write to computed property without a setter");
                Ok(())
            }
            other => other,
        }
    }

    /// Like [`set`](Self::set), but reports rejected writes.
    pub fn try_set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.write(key, value.into())
    }

    /// Set several properties in one transaction.
    pub fn assign(&self, props: impl Into<Value>) -> Result<()> {
        let entries = entries_of(props.into())?;
        let _batch = self.inner.runtime.batch_scope();
        entries
            .into_iter()
            .try_for_each(|(key, value)| self.set(&key, value))
    }

    /// Make the map match `props`: listed keys are set, expandos missing
    /// from `props` are deleted and declared data properties missing from
    /// it are cleared to `Undefined`. One transaction.
    pub fn update(&self, props: impl Into<Value>) -> Result<()> {
        let entries = entries_of(props.into())?;
        let _batch = self.inner.runtime.batch_scope();
        for key in self.key_names() {
            if entries.iter().any(|(k, _)| **k == *key) {
                continue;
            }
            if self.is_expando(&key) {
                self.delete_key(&key);
            } else if self.definition(&key).is_some_and(|def| !def.is_computed()) {
                self.set(&key, Value::Undefined)?;
            }
        }
        entries
            .into_iter()
            .try_for_each(|(key, value)| self.set(&key, value))
    }

    /// Remove an expando property. Declared properties can't be removed;
    /// returns `false` for them and for unknown keys.
    pub fn delete_key(&self, key: &str) -> bool {
        if !self.inner.expandos.contains(key) {
            return false;
        }
        let _batch = self.inner.runtime.batch_scope();
        self.inner.expandos.remove(key);
        let old = match self.inner.store.remove(key) {
            Some(Slot::Data(value)) => value,
            Some(Slot::Computed(handle)) => {
                let value = handle.cached();
                handle.dispose();
                value
            }
            None => Value::Undefined,
        };
        self.enqueue(Event::property(
            self.inner.id,
            key.into(),
            EventKind::Remove,
            Value::Undefined,
            old,
        ));
        self.enqueue_keys();
        true
    }

    fn write(&self, key: &str, value: Value) -> Result<()> {
        let Some(def) = self.definition(key) else {
            return self.add_expando(key, value);
        };
        if def.is_computed() {
            self.write_computed(key, &def, value)
        } else {
            let value = def.coerce(&self.inner.runtime, value)?;
            self.write_data(key, &def, value)
        }
    }

    /// Run the setter hook (if any) for an already coerced value and store
    /// the outcome.
    fn write_data(&self, key: &str, def: &Definition, value: Value) -> Result<()> {
        let Some(setter) = def.setter().cloned() else {
            return self.store_value(key, def, value);
        };
        let current = self.inner.runtime.untracked(|| self.current_data(key, def))?;
        let _batch = self.inner.runtime.batch_scope();
        match setter {
            Setter::Returning(f) => {
                let stored = f(self, value, &current)?;
                self.store_value(key, def, stored)
            }
            Setter::SideEffect(f) => {
                f(self, &value, &current)?;
                self.store_value(key, def, value)
            }
            Setter::Resolving(f) => f(self, value, SetResolver::data(self, key), &current),
        }
    }

    fn write_computed(&self, key: &str, def: &Definition, value: Value) -> Result<()> {
        let Some(setter) = def.setter().cloned() else {
            return Err(Error::WriteRejected {
                property: key.to_string(),
            });
        };
        let value = def.coerce(&self.inner.runtime, value)?;
        let handle = self.handle(key, def)?;
        let current = match self.inner.runtime.untracked(|| handle.get()) {
            Ok(current) => current,
            Err(err) => {
                trace!(key, error = %err, "current value unavailable for setter");
                Value::Undefined
            }
        };
        let _batch = self.inner.runtime.batch_scope();
        match setter {
            Setter::Returning(f) => {
                let stored = f(self, value, &current)?;
                handle.set_last_set(stored);
            }
            Setter::SideEffect(f) => {
                f(self, &value, &current)?;
                handle.set_last_set(value);
            }
            Setter::Resolving(f) => f(self, value, SetResolver::last_set(&handle, key), &current)?,
        }
        Ok(())
    }

    /// Store the value passed to a data property's [`SetResolver`].
    pub(crate) fn store_resolved(&self, key: &str, value: Value) -> Result<()> {
        match self.definition(key) {
            Some(def) if !def.is_computed() => {
                let _batch = self.inner.runtime.batch_scope();
                self.store_value(key, &def, value)
            }
            _ => Ok(()),
        }
    }

    /// Compare with the current value and, if different, write and queue a
    /// `set` (or `add`, for a slot that didn't exist) record.
    fn store_value(&self, key: &str, def: &Definition, value: Value) -> Result<()> {
        let current = if def.has_default() {
            self.current_data(key, def)?
        } else {
            self.inner.store.data(key).unwrap_or_default()
        };
        if current.same(&value) {
            return Ok(());
        }
        let kind = match self.inner.store.write(key, value.clone()) {
            Some(_) => EventKind::Set,
            None => EventKind::Add,
        };
        self.enqueue(Event::property(self.inner.id, key.into(), kind, value, current));
        Ok(())
    }

    fn add_expando(&self, key: &str, value: Value) -> Result<()> {
        let def = Rc::clone(&self.inner.compiled.wildcard);
        if def.is_computed() {
            let _batch = self.inner.runtime.batch_scope();
            self.inner.expandos.install(key, Rc::clone(&def));
            self.enqueue_keys();
            return self.write_computed(key, &def, value);
        }

        // Coerce before installing so a failure leaves no trace.
        let value = def.coerce(&self.inner.runtime, value)?;
        let _batch = self.inner.runtime.batch_scope();
        self.inner.expandos.install(key, Rc::clone(&def));
        self.write_data(key, &def, value)?;
        if !self.inner.store.contains(key) {
            // A new key is announced even when its value is `Undefined`.
            self.inner.store.write(key, Value::Undefined);
            self.enqueue(Event::property(
                self.inner.id,
                key.into(),
                EventKind::Add,
                Value::Undefined,
                Value::Undefined,
            ));
        }
        self.enqueue_keys();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Storage helpers
    // ------------------------------------------------------------------

    /// A data property's value, materializing its default on first use.
    fn current_data(&self, key: &str, def: &Definition) -> Result<Value> {
        if let Some(value) = self.inner.store.data(key) {
            return Ok(value);
        }
        if !def.has_default() {
            return Ok(Value::Undefined);
        }
        let value = self.produce_default(def)?;
        match self.inner.store.insert_if_absent(key, Slot::Data(value)) {
            Slot::Data(value) => Ok(value),
            Slot::Computed(_) => Ok(Value::Undefined),
        }
    }

    fn produce_default(&self, def: &Definition) -> Result<Value> {
        let runtime = &self.inner.runtime;
        let raw = runtime.untracked(|| def.produce_default(Some(self), runtime))?;
        def.coerce(runtime, raw)
    }

    /// The handle behind a computed property, created on first use with the
    /// property's default as its last-set value.
    pub(crate) fn handle(&self, key: &str, def: &Definition) -> Result<Rc<ComputedHandle>> {
        if let Some(handle) = self.inner.store.handle(key) {
            return Ok(handle);
        }
        let Some(getter) = def.getter() else {
            return Err(Error::getter(key, "not a computed property"));
        };
        let last_set = if def.has_default() {
            self.produce_default(def)?
        } else {
            Value::Undefined
        };
        let handle = ComputedHandle::new(
            self.inner.runtime.clone(),
            Rc::downgrade(&self.inner),
            key.into(),
            getter.clone(),
            last_set,
        );
        match self.inner.store.insert_if_absent(key, Slot::Computed(handle)) {
            Slot::Computed(handle) => Ok(handle),
            Slot::Data(_) => Err(Error::getter(key, "slot already holds a data value")),
        }
    }

    fn target_rc(&self) -> Rc<dyn EventTarget> {
        Rc::clone(&self.inner) as Rc<dyn EventTarget>
    }

    fn observe(&self, key: &str) {
        if self.inner.runtime.is_tracking() {
            self.inner.runtime.observe(self.target_rc(), key);
        }
    }

    fn enqueue(&self, event: Event) {
        self.inner.runtime.enqueue(self.target_rc(), event);
    }

    fn enqueue_keys(&self) {
        let keys = Value::array(self.key_names().iter().map(|k| Value::from(&**k)));
        self.enqueue(Event::property(
            self.inner.id,
            KEYS_EVENT.into(),
            EventKind::Keys,
            keys,
            Value::Undefined,
        ));
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Listen for changes of `key`. Listening to a computed property makes
    /// it hot.
    pub fn on(&self, key: &str, handler: impl Fn(&Event) + 'static) -> SubscriberId {
        event::bind(&*self.inner, key, Listener::User(Rc::new(handler)))
    }

    pub fn off(&self, key: &str, id: SubscriberId) -> bool {
        event::unbind(&*self.inner, key, id)
    }

    /// Receive the patches of each flushed transaction that touched this map.
    pub fn on_patches(&self, handler: impl Fn(&[Patch]) + 'static) -> SubscriberId {
        self.inner.hub.add_patches(Rc::new(handler))
    }

    pub fn off_patches(&self, id: SubscriberId) -> bool {
        self.inner.hub.remove_patches(id)
    }

    /// Listeners (user and derive) bound on `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        self.inner.hub.listener_count(key)
    }

    /// Listeners bound on any key, patch listeners included.
    pub fn total_listener_count(&self) -> usize {
        self.inner.hub.total_listeners()
    }
}

impl Listenable for ObservableMap {
    fn target(&self) -> Target {
        Target(self.target_rc())
    }
}

impl fmt::Debug for ObservableMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.inner.schema.name())
            .field("id", &self.inner.id.raw())
            .field("keys", &self.key_names())
            .field("stored", &self.inner.store.len())
            .finish()
    }
}

/// Key/value pairs of a plain object or (shallowly) of another map.
fn entries_of(props: Value) -> Result<Vec<(String, Value)>> {
    match props {
        Value::Undefined | Value::Null => Ok(Vec::new()),
        Value::Object(entries) => Ok(entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()),
        Value::Map(map) => {
            let mut entries = Vec::new();
            for key in map.key_names() {
                let value = map.get_untracked(&key)?;
                if !value.is_undefined() {
                    entries.push((key.to_string(), value));
                }
            }
            Ok(entries)
        }
        other => Err(Error::coercion(
            "map",
            format!("cannot build a map from {}", other.type_name()),
        )),
    }
}
