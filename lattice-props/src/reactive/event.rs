//! Events, Patches, and Listener Registries
//!
//! Every observable object (map, list, signal) owns an [`EventHub`]: a table
//! from event key to the listeners bound on that key. Two kinds of listener
//! live there:
//!
//! - **User** listeners, registered through `on(key, handler)`. They run
//!   when a transaction flushes.
//! - **Derive** listeners, registered by computed handles for every
//!   dependency they read. They never receive events; they are marked dirty
//!   the moment a change is enqueued so reads inside an open transaction are
//!   never stale.
//!
//! The dispatcher also aggregates the records of each flush round into
//! [`Patch`] lists for consumers that want structural diffs.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde::Serialize;
use smallvec::SmallVec;

use super::runtime::Reactive;
use super::subscriber::{ObjectId, SubscriberId};
use crate::value::Value;

/// Event name used by lists for item insertions.
pub const ADD_EVENT: &str = "add";
/// Event name used by lists for item removals.
pub const REMOVE_EVENT: &str = "remove";
/// Event name dispatched whenever a list's contents change.
pub const LENGTH_EVENT: &str = "length";
/// Event name dispatched when a map gains or loses an expando key.
pub const KEYS_EVENT: &str = "__keys";
/// Event name used by signals.
pub const VALUE_EVENT: &str = "value";

/// What kind of change an [`Event`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// An existing property changed value.
    Set,
    /// A property was written for the first time, or items were inserted.
    Add,
    /// A property was deleted, or items were removed.
    Remove,
    /// A list's length was recomputed.
    Length,
    /// A map's key set changed.
    Keys,
}

/// A change notification delivered to user listeners.
#[derive(Debug, Clone)]
pub struct Event {
    /// The object that changed.
    pub target: ObjectId,
    /// The key listeners were bound on.
    pub key: Rc<str>,
    pub kind: EventKind,
    pub new_value: Value,
    pub old_value: Value,
    /// Splice position for list `add`/`remove` events.
    pub index: Option<usize>,
}

impl Event {
    pub(crate) fn property(
        target: ObjectId,
        key: Rc<str>,
        kind: EventKind,
        new_value: Value,
        old_value: Value,
    ) -> Self {
        Self {
            target,
            key,
            kind,
            new_value,
            old_value,
            index: None,
        }
    }

    pub(crate) fn items_added(target: ObjectId, items: Vec<Value>, index: usize) -> Self {
        Self {
            target,
            key: ADD_EVENT.into(),
            kind: EventKind::Add,
            new_value: Value::from(items),
            old_value: Value::Undefined,
            index: Some(index),
        }
    }

    pub(crate) fn items_removed(target: ObjectId, items: Vec<Value>, index: usize) -> Self {
        Self {
            target,
            key: REMOVE_EVENT.into(),
            kind: EventKind::Remove,
            new_value: Value::Undefined,
            old_value: Value::from(items),
            index: Some(index),
        }
    }

    /// Items carried by a list `add` or `remove` event.
    pub fn items(&self) -> &[Value] {
        let carrier = match self.kind {
            EventKind::Remove => &self.old_value,
            _ => &self.new_value,
        };
        carrier.as_array().unwrap_or(&[])
    }

    /// Whether this is a structural list delta (never coalesced).
    pub fn is_list_delta(&self) -> bool {
        self.index.is_some()
    }

    /// The structural patch this event contributes, if any.
    pub fn to_patch(&self) -> Option<Patch> {
        match (self.kind, self.index) {
            (EventKind::Add, Some(index)) => Some(Patch::Splice {
                index,
                delete_count: 0,
                insert: self.items().to_vec(),
            }),
            (EventKind::Remove, Some(index)) => Some(Patch::Splice {
                index,
                delete_count: self.items().len(),
                insert: Vec::new(),
            }),
            (EventKind::Set, None) => Some(Patch::Set {
                key: self.key.to_string(),
                value: self.new_value.clone(),
            }),
            (EventKind::Add, None) => Some(Patch::Add {
                key: self.key.to_string(),
                value: self.new_value.clone(),
            }),
            (EventKind::Remove, None) => Some(Patch::Remove {
                key: self.key.to_string(),
            }),
            _ => None,
        }
    }
}

/// A structural change, as delivered to `on_patches` listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Patch {
    Set { key: String, value: Value },
    Add { key: String, value: Value },
    Remove { key: String },
    Splice {
        index: usize,
        #[serde(rename = "deleteCount")]
        delete_count: usize,
        insert: Vec<Value>,
    },
}

pub(crate) type Handler = Rc<dyn Fn(&Event)>;
pub(crate) type PatchHandler = Rc<dyn Fn(&[Patch])>;

/// A listener bound on one key of an [`EventHub`].
#[derive(Clone)]
pub(crate) enum Listener {
    User(Handler),
    Derive(Weak<dyn Reactive>),
}

type ListenerList = SmallVec<[(SubscriberId, Listener); 2]>;

/// Per-object listener registry.
#[derive(Default)]
pub struct EventHub {
    listeners: RefCell<IndexMap<Rc<str>, ListenerList>>,
    patch_listeners: RefCell<SmallVec<[(SubscriberId, PatchHandler); 1]>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, key: &str, listener: Listener) -> SubscriberId {
        let id = SubscriberId::new();
        let mut listeners = self.listeners.borrow_mut();
        match listeners.get_mut(key) {
            Some(list) => list.push((id, listener)),
            None => {
                let mut list = ListenerList::new();
                list.push((id, listener));
                listeners.insert(key.into(), list);
            }
        }
        id
    }

    pub(crate) fn remove(&self, key: &str, id: SubscriberId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let Some(list) = listeners.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.shift_remove(key);
        }
        removed
    }

    /// Number of listeners of either kind bound on `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners.borrow().get(key).map_or(0, |list| list.len())
    }

    /// Total number of listeners across all keys.
    pub fn total_listeners(&self) -> usize {
        self.listeners.borrow().values().map(|list| list.len()).sum::<usize>()
            + self.patch_listeners.borrow().len()
    }

    pub(crate) fn user_listeners(&self, key: &str) -> Vec<Handler> {
        self.listeners
            .borrow()
            .get(key)
            .map(|list| {
                list.iter()
                    .filter_map(|(_, l)| match l {
                        Listener::User(handler) => Some(Rc::clone(handler)),
                        Listener::Derive(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn derive_listeners(&self, key: &str) -> Vec<Rc<dyn Reactive>> {
        self.listeners
            .borrow()
            .get(key)
            .map(|list| {
                list.iter()
                    .filter_map(|(_, l)| match l {
                        Listener::Derive(weak) => weak.upgrade(),
                        Listener::User(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn add_patches(&self, handler: PatchHandler) -> SubscriberId {
        let id = SubscriberId::new();
        self.patch_listeners.borrow_mut().push((id, handler));
        id
    }

    pub(crate) fn remove_patches(&self, id: SubscriberId) -> bool {
        let mut listeners = self.patch_listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub(crate) fn patch_listeners(&self) -> Vec<PatchHandler> {
        self.patch_listeners
            .borrow()
            .iter()
            .map(|(_, h)| Rc::clone(h))
            .collect()
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.borrow();
        f.debug_struct("EventHub")
            .field("keys", &listeners.keys().collect::<Vec<_>>())
            .field("listener_count", &self.total_listeners())
            .finish()
    }
}

/// Something that owns an [`EventHub`] and can be depended on.
///
/// Implemented by the shared interiors of maps, lists and signals. The
/// `listener_added`/`listener_removed` hooks let maps turn computed
/// properties hot and cold as listeners come and go.
pub(crate) trait EventTarget {
    fn object_id(&self) -> ObjectId;

    fn hub(&self) -> &EventHub;

    fn listener_added(&self, _key: &str) {}

    fn listener_removed(&self, _key: &str) {}
}

/// Bind `listener` on `target`'s `key`, running the target's hooks.
pub(crate) fn bind(target: &dyn EventTarget, key: &str, listener: Listener) -> SubscriberId {
    let id = target.hub().add(key, listener);
    target.listener_added(key);
    id
}

/// Inverse of [`bind`]. Returns `false` for unknown ids.
pub(crate) fn unbind(target: &dyn EventTarget, key: &str, id: SubscriberId) -> bool {
    let removed = target.hub().remove(key, id);
    if removed {
        target.listener_removed(key);
    }
    removed
}

/// Opaque handle to an observable object, used by
/// [`ResolveScope::listen_to`](super::computed::ResolveScope::listen_to).
#[derive(Clone)]
pub struct Target(pub(crate) Rc<dyn EventTarget>);

impl Target {
    pub fn object_id(&self) -> ObjectId {
        self.0.object_id()
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Target").field(&self.0.object_id()).finish()
    }
}

/// Types that can be listened to.
pub trait Listenable {
    /// The observable object behind this handle.
    fn target(&self) -> Target;
}
