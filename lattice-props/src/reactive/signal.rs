//! Signal Implementation
//!
//! A Signal is a standalone observable cell. Maps use it as the external
//! source behind `"compute"` typed properties, and host code can read it
//! from inside getters to make computed properties depend on state that
//! lives outside any map.
//!
//! # How Signals Work
//!
//! 1. When a signal is read inside a computed evaluation, the read is
//!    recorded on its runtime's context stack under the `"value"` key.
//!
//! 2. When the value changes (by identity), a `set` record is queued through
//!    the runtime's dispatcher, so signal writes batch and coalesce exactly
//!    like map writes.
//!
//! 3. Dependent computed handles are marked dirty at once; user listeners run
//!    when the transaction flushes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::event::{self, Event, EventHub, EventKind, EventTarget, Listenable, Listener, Target};
use super::event::VALUE_EVENT;
use super::runtime::Runtime;
use super::subscriber::{ObjectId, SubscriberId};
use crate::value::Value;

struct SignalInner {
    /// Unique identifier for this signal.
    id: ObjectId,
    runtime: Runtime,
    value: RefCell<Value>,
    hub: EventHub,
}

impl EventTarget for SignalInner {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn hub(&self) -> &EventHub {
        &self.hub
    }
}

/// A reactive cell holding a [`Value`].
///
/// Cloning a signal yields another handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let runtime = Runtime::new();
/// let count = Signal::new(&runtime, 0);
///
/// count.set(5);
/// assert_eq!(count.get(), Value::from(5));
/// ```
#[derive(Clone)]
pub struct Signal {
    inner: Rc<SignalInner>,
}

impl Signal {
    /// Create a new signal with the given initial value.
    pub fn new(runtime: &Runtime, value: impl Into<Value>) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                id: ObjectId::new(),
                runtime: runtime.clone(),
                value: RefCell::new(value.into()),
                hub: EventHub::new(),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Get the current value.
    ///
    /// If called within a computed evaluation, this also registers the
    /// signal as a dependency.
    pub fn get(&self) -> Value {
        self.inner.runtime.observe(self.as_target(), VALUE_EVENT);
        self.get_untracked()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Set a new value. Identical values are ignored.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        let old = {
            let mut slot = self.inner.value.borrow_mut();
            if slot.same(&value) {
                return;
            }
            std::mem::replace(&mut *slot, value.clone())
        };
        let event = Event::property(self.inner.id, VALUE_EVENT.into(), EventKind::Set, value, old);
        self.inner.runtime.enqueue(self.as_target(), event);
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) {
        let next = f(&self.get_untracked());
        self.set(next);
    }

    /// Listen for value changes.
    pub fn on(&self, handler: impl Fn(&Event) + 'static) -> SubscriberId {
        event::bind(&*self.inner, VALUE_EVENT, Listener::User(Rc::new(handler)))
    }

    /// Remove a listener registered with [`on`](Self::on).
    pub fn off(&self, id: SubscriberId) -> bool {
        event::unbind(&*self.inner, VALUE_EVENT, id)
    }

    /// Number of listeners of either kind.
    pub fn listener_count(&self) -> usize {
        self.inner.hub.listener_count(VALUE_EVENT)
    }

    /// Whether both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Signal) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn as_target(&self) -> Rc<dyn EventTarget> {
        Rc::clone(&self.inner) as Rc<dyn EventTarget>
    }
}

impl Listenable for Signal {
    fn target(&self) -> Target {
        Target(self.as_target())
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn signal_get_and_set() {
        let runtime = Runtime::new();
        let signal = Signal::new(&runtime, 0);
        assert_eq!(signal.get(), Value::from(0));

        signal.set(42);
        assert_eq!(signal.get(), Value::from(42));
    }

    #[test]
    fn signal_update() {
        let runtime = Runtime::new();
        let signal = Signal::new(&runtime, 10);
        signal.update(|v| Value::from(v.to_number() + 5.0));
        assert_eq!(signal.get(), Value::from(15));
    }

    #[test]
    fn signal_notifies_listeners() {
        let runtime = Runtime::new();
        let signal = Signal::new(&runtime, 0);
        let call_count = Rc::new(Cell::new(0));
        let count = Rc::clone(&call_count);

        let id = signal.on(move |_| count.set(count.get() + 1));
        assert_eq!(call_count.get(), 0);

        signal.set(1);
        assert_eq!(call_count.get(), 1);

        // Same value, no event.
        signal.set(1);
        assert_eq!(call_count.get(), 1);

        assert!(signal.off(id));
        signal.set(2);
        assert_eq!(call_count.get(), 1);
    }

    #[test]
    fn signal_writes_coalesce_in_a_batch() {
        let runtime = Runtime::new();
        let signal = Signal::new(&runtime, 0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        signal.on(move |e| sink.borrow_mut().push((e.old_value.clone(), e.new_value.clone())));

        runtime.batch(|| {
            signal.set(1);
            signal.set(2);
            signal.set(3);
        });

        assert_eq!(*seen.borrow(), vec![(Value::from(0), Value::from(3))]);
    }

    #[test]
    fn signal_clone_shares_state() {
        let runtime = Runtime::new();
        let signal1 = Signal::new(&runtime, 0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), Value::from(42));
        assert!(signal1.ptr_eq(&signal2));
    }
}
