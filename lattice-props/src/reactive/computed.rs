//! Computed Handles
//!
//! A computed handle caches the value of one computed property on one map
//! instance. It re-evaluates its getter only when one of the reads recorded
//! during the last evaluation changes.
//!
//! # Lifecycle
//!
//! 1. **Cold** (no listeners): every read runs the getter in a throwaway
//!    frame. Nothing is subscribed, so a cold handle never keeps anything
//!    alive and nothing keeps it alive.
//!
//! 2. **Hot** (at least one listener, user or derive): the first listener
//!    triggers an evaluation that emits nothing and binds a derive listener
//!    on every recorded `(object, key)`. When a dependency changes the
//!    dispatcher marks the handle dirty; it recomputes on the next read or
//!    in the flush's derive phase, whichever comes first, and queues a `set`
//!    record on its own property if the value changed.
//!
//! 3. Dropping the last listener unbinds every dependency and `listen_to`
//!    subscription and bumps the activation counter, turning any resolver
//!    handed out earlier into a no-op.
//!
//! # Dirty States
//!
//! A direct dependency change marks the handle `Dirty`. The handle then
//! marks computed properties that depend on it `MaybeDirty`; either state
//! recomputes on the next read. Only a handle that was `Clean` forwards the
//! mark, so a diamond of dependencies is walked once.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::context::Observations;
use super::event::{self, Event, EventKind, EventTarget, Listenable, Listener};
use super::runtime::{MemoState, Reactive, Runtime};
use super::subscriber::{ObjectId, SubscriberId};
use crate::define::map::{MapInner, ObservableMap};
use crate::define::Getter;
use crate::error::{Error, Result};
use crate::value::Value;

/// One listener the handle registered on another object.
struct Binding {
    target: Weak<dyn EventTarget>,
    object: ObjectId,
    key: Rc<str>,
    id: SubscriberId,
}

impl Binding {
    fn release(self) {
        if let Some(target) = self.target.upgrade() {
            event::unbind(&*target, &self.key, self.id);
        }
    }
}

struct HandleState {
    value: Value,
    last_set: Value,
    listeners: usize,
    memo: MemoState,
    hot: bool,
    evaluating: bool,
    /// Waiting in the dispatcher's derive queue.
    queued: bool,
    /// Liveness flag for resolvers. Bumped on teardown and after cold
    /// evaluations.
    activation: u64,
    dependencies: SmallVec<[Binding; 4]>,
    subscriptions: SmallVec<[Binding; 2]>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// First evaluation after turning hot. Emits nothing.
    Activate,
    /// Re-evaluation of a hot handle.
    Update,
    /// One-off evaluation while cold.
    Cold,
}

/// The per-instance state behind a computed property.
pub(crate) struct ComputedHandle {
    self_weak: Weak<ComputedHandle>,
    runtime: Runtime,
    owner: Weak<MapInner>,
    key: Rc<str>,
    getter: Getter,
    subscriber_id: SubscriberId,
    state: RefCell<HandleState>,
}

impl ComputedHandle {
    pub fn new(
        runtime: Runtime,
        owner: Weak<MapInner>,
        key: Rc<str>,
        getter: Getter,
        last_set: Value,
    ) -> Rc<Self> {
        Rc::new_cyclic(|self_weak| Self {
            self_weak: self_weak.clone(),
            runtime,
            owner,
            key,
            getter,
            subscriber_id: SubscriberId::new(),
            state: RefCell::new(HandleState {
                value: Value::Undefined,
                last_set,
                listeners: 0,
                memo: MemoState::Dirty,
                hot: false,
                evaluating: false,
                queued: false,
                activation: 0,
                dependencies: SmallVec::new(),
                subscriptions: SmallVec::new(),
            }),
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn is_hot(&self) -> bool {
        self.state.borrow().hot
    }

    #[cfg(test)]
    pub fn memo_state(&self) -> MemoState {
        self.state.borrow().memo
    }

    #[cfg(test)]
    pub fn dependency_count(&self) -> usize {
        self.state.borrow().dependencies.len()
    }

    pub fn last_set(&self) -> Value {
        self.state.borrow().last_set.clone()
    }

    /// The cached value, without evaluating.
    pub fn cached(&self) -> Value {
        self.state.borrow().value.clone()
    }

    /// Release every binding of a handle whose property is going away.
    pub fn dispose(&self) {
        if self.is_hot() {
            self.teardown();
        }
    }

    /// Current value, evaluating if the cache can't be trusted.
    pub fn get(&self) -> Result<Value> {
        let (hot, memo, evaluating) = {
            let state = self.state.borrow();
            (state.hot, state.memo, state.evaluating)
        };
        if evaluating {
            return Err(Error::getter(
                self.key.as_ref(),
                "circular read while the getter is running",
            ));
        }
        if !hot {
            return self.evaluate(Pass::Cold);
        }
        if memo != MemoState::Clean {
            self.evaluate(Pass::Update)?;
        }
        Ok(self.state.borrow().value.clone())
    }

    /// Store a value written through the property's setter.
    pub fn set_last_set(&self, value: Value) {
        let hot = {
            let mut state = self.state.borrow_mut();
            if state.last_set.same(&value) {
                return;
            }
            state.last_set = value;
            state.hot
        };
        if hot {
            self.mark_dirty(MemoState::Dirty);
        }
    }

    pub fn add_listener(&self) {
        let activate = {
            let mut state = self.state.borrow_mut();
            state.listeners += 1;
            state.listeners == 1 && !state.hot
        };
        if activate {
            debug!(key = %self.key, "computed property activated");
            {
                let mut state = self.state.borrow_mut();
                state.hot = true;
                state.memo = MemoState::Dirty;
            }
            if let Err(err) = self.evaluate(Pass::Activate) {
                warn!(key = %self.key, error = %err, "computed getter failed on activation");
            }
        }
    }

    pub fn remove_listener(&self) {
        let deactivate = {
            let mut state = self.state.borrow_mut();
            state.listeners = state.listeners.saturating_sub(1);
            state.listeners == 0 && state.hot
        };
        if deactivate {
            self.teardown();
        }
    }

    fn teardown(&self) {
        debug!(key = %self.key, "computed property deactivated");
        let (dependencies, subscriptions) = {
            let mut state = self.state.borrow_mut();
            state.hot = false;
            state.memo = MemoState::Dirty;
            state.activation += 1;
            (
                std::mem::take(&mut state.dependencies),
                std::mem::take(&mut state.subscriptions),
            )
        };
        dependencies.into_iter().for_each(Binding::release);
        subscriptions.into_iter().for_each(Binding::release);
    }

    /// Run the getter for `pass`.
    ///
    /// On failure the previous dependency set is kept and the handle stays
    /// dirty so the next read or dependency change retries. A failed
    /// activation has no previous set and binds whatever was read before the
    /// error.
    fn evaluate(&self, pass: Pass) -> Result<Value> {
        let (Some(owner), Some(this)) = (self.owner.upgrade(), self.self_weak.upgrade()) else {
            return Ok(self.state.borrow().value.clone());
        };
        let map = ObservableMap::from_inner(owner);

        let (last_set, activation) = {
            let mut state = self.state.borrow_mut();
            state.memo = MemoState::Clean;
            state.evaluating = true;
            if pass == Pass::Cold {
                state.value = Value::Undefined;
            }
            (state.last_set.clone(), state.activation)
        };
        self.stop_listening();

        let frame = self.runtime.enter(self.subscriber_id);
        let outcome = match &self.getter {
            Getter::Derived(f) => f(&map).map(Some),
            Getter::WithLastSet(f) => f(&map, &last_set).map(Some),
            Getter::Resolving(f) => {
                let scope = ResolveScope {
                    handle: this,
                    last_set,
                    activation,
                    notify: pass == Pass::Update,
                };
                f(&map, &scope)
            }
        };
        let observed = frame.finish();
        self.state.borrow_mut().evaluating = false;

        let resolved = match outcome {
            Ok(resolved) => resolved,
            Err(err) => {
                if pass == Pass::Activate {
                    self.rebind(observed);
                }
                self.state.borrow_mut().memo = MemoState::Dirty;
                return Err(err);
            }
        };

        match pass {
            Pass::Activate | Pass::Update => self.rebind(observed),
            Pass::Cold => {}
        }
        if let Some(value) = resolved {
            self.resolve_value(value, pass == Pass::Update);
        }
        if pass == Pass::Cold {
            // Resolvers handed out by a cold evaluation have nothing to
            // update, and its listen_to bindings have no teardown to wait for.
            self.state.borrow_mut().activation += 1;
            self.stop_listening();
            self.state.borrow_mut().memo = MemoState::Dirty;
        }
        Ok(self.state.borrow().value.clone())
    }

    /// Diff the recorded reads against the current dependency set. New
    /// bindings are made before stale ones are released so a shared
    /// upstream computed property never bounces through cold.
    fn rebind(&self, observed: Observations) {
        let previous = std::mem::take(&mut self.state.borrow_mut().dependencies);
        let own_object = self.owner.upgrade().map(|owner| owner.object_id());

        let mut kept = vec![false; previous.len()];
        let mut next: SmallVec<[Binding; 4]> = SmallVec::new();
        let mut fresh = Vec::new();

        for observation in observed {
            let object = observation.target.object_id();
            if Some(object) == own_object && observation.key == self.key {
                continue;
            }
            match previous
                .iter()
                .position(|dep| dep.object == object && dep.key == observation.key)
            {
                Some(pos) => kept[pos] = true,
                None => fresh.push(observation),
            }
        }

        for observation in fresh {
            let id = event::bind(
                &*observation.target,
                &observation.key,
                Listener::Derive(self.reactive_weak()),
            );
            next.push(Binding {
                target: Rc::downgrade(&observation.target),
                object: observation.target.object_id(),
                key: observation.key,
                id,
            });
        }

        let mut stale = Vec::new();
        for (dep, keep) in previous.into_iter().zip(kept) {
            if keep {
                next.push(dep);
            } else {
                stale.push(dep);
            }
        }

        trace!(key = %self.key, dependencies = next.len(), "dependencies rebound");
        self.state.borrow_mut().dependencies = next;
        stale.into_iter().for_each(Binding::release);
    }

    /// Publish a candidate value. Identical values are dropped.
    fn resolve_value(&self, value: Value, notify: bool) {
        let old = {
            let mut state = self.state.borrow_mut();
            if state.value.same(&value) {
                return;
            }
            std::mem::replace(&mut state.value, value.clone())
        };
        if !notify {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            let event = Event::property(
                owner.object_id(),
                Rc::clone(&self.key),
                EventKind::Set,
                value,
                old,
            );
            self.runtime.enqueue(owner as Rc<dyn EventTarget>, event);
        }
    }

    fn listen_to(&self, target: Rc<dyn EventTarget>, key: &str, handler: Rc<dyn Fn(&Event)>) {
        let id = event::bind(&*target, key, Listener::User(handler));
        let binding = Binding {
            object: target.object_id(),
            target: Rc::downgrade(&target),
            key: key.into(),
            id,
        };
        self.state.borrow_mut().subscriptions.push(binding);
    }

    fn stop_listening(&self) {
        let subscriptions = std::mem::take(&mut self.state.borrow_mut().subscriptions);
        subscriptions.into_iter().for_each(Binding::release);
    }

    fn is_live(&self, activation: u64) -> bool {
        let state = self.state.borrow();
        state.hot && state.activation == activation
    }

    fn reactive_weak(&self) -> Weak<dyn Reactive> {
        self.self_weak.clone()
    }
}

impl Reactive for ComputedHandle {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_dirty(&self, next: MemoState) {
        let (forward, schedule) = {
            let mut state = self.state.borrow_mut();
            // A dependency refreshed while this getter is running was read
            // in its new state.
            if !state.hot || state.evaluating {
                return;
            }
            let was_clean = state.memo == MemoState::Clean;
            match (state.memo, next) {
                (MemoState::Clean, _) | (MemoState::MaybeDirty, MemoState::Dirty) => {
                    state.memo = next;
                }
                _ => {}
            }
            // A handle whose last evaluation failed is still dirty but no
            // longer queued.
            let schedule = !state.queued;
            state.queued = true;
            (was_clean || schedule, schedule)
        };
        if !forward {
            return;
        }
        trace!(key = %self.key, state = ?next, "computed property invalidated");
        if schedule {
            self.runtime.schedule(self.reactive_weak());
        }
        if let Some(owner) = self.owner.upgrade() {
            for dependent in owner.hub().derive_listeners(&self.key) {
                dependent.mark_dirty(MemoState::MaybeDirty);
            }
        }
    }

    fn refresh(&self) {
        let (hot, memo) = {
            let mut state = self.state.borrow_mut();
            state.queued = false;
            (state.hot, state.memo)
        };
        if !hot || memo == MemoState::Clean {
            return;
        }
        if let Err(err) = self.evaluate(Pass::Update) {
            warn!(key = %self.key, error = %err, "computed getter failed; keeping previous value");
        }
    }
}

impl fmt::Debug for ComputedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ComputedHandle")
            .field("key", &self.key)
            .field("hot", &state.hot)
            .field("memo", &state.memo)
            .field("listeners", &state.listeners)
            .field("dependencies", &state.dependencies.len())
            .finish()
    }
}

/// Handed to [`Getter::Resolving`] getters.
pub struct ResolveScope {
    handle: Rc<ComputedHandle>,
    last_set: Value,
    activation: u64,
    notify: bool,
}

impl ResolveScope {
    /// The last value written through the property's setter (or its default).
    pub fn last_set(&self) -> &Value {
        &self.last_set
    }

    /// Publish a value now. Returning `Ok(Some(v))` from the getter is
    /// equivalent.
    pub fn resolve(&self, value: impl Into<Value>) {
        if self.handle.state.borrow().activation != self.activation {
            trace!(key = %self.handle.key, "stale resolve ignored");
            return;
        }
        self.handle.resolve_value(value.into(), self.notify);
    }

    /// A handle for publishing values later, e.g. from a timer.
    pub fn resolver(&self) -> Resolver {
        Resolver {
            handle: Rc::downgrade(&self.handle),
            activation: self.activation,
        }
    }

    /// Listen to `event` on another observable for as long as this
    /// evaluation stays current. The binding is removed before the next
    /// evaluation and when the property goes cold.
    pub fn listen_to(
        &self,
        target: &impl Listenable,
        event: &str,
        handler: impl Fn(&Event) + 'static,
    ) {
        self.handle.listen_to(target.target().0, event, Rc::new(handler));
    }

    /// Drop every `listen_to` binding made so far.
    pub fn stop_listening(&self) {
        self.handle.stop_listening();
    }
}

/// Publishes values into a computed property after its getter returned.
///
/// A resolver is tied to the activation that created it: once the property
/// goes cold, calls are ignored.
#[derive(Clone)]
pub struct Resolver {
    handle: Weak<ComputedHandle>,
    activation: u64,
}

impl Resolver {
    pub fn resolve(&self, value: impl Into<Value>) {
        match self.handle.upgrade() {
            Some(handle) if handle.is_live(self.activation) => {
                handle.resolve_value(value.into(), true);
            }
            _ => trace!("stale resolve ignored"),
        }
    }

    /// Whether a call to [`resolve`](Self::resolve) would still land.
    pub fn is_live(&self) -> bool {
        self.handle
            .upgrade()
            .is_some_and(|handle| handle.is_live(self.activation))
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("activation", &self.activation)
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define::MapSchema;
    use std::cell::{Cell, RefCell};

    fn counter_map(runtime: &Runtime, evaluations: Rc<Cell<usize>>) -> ObservableMap {
        let schema = MapSchema::new()
            .prop("n", "number")
            .prop(
                "next",
                Getter::derived(move |m| {
                    evaluations.set(evaluations.get() + 1);
                    Ok(Value::from(m.get("n")?.to_number() + 1.0))
                }),
            )
            .build();
        ObservableMap::new(runtime, &schema, Value::object([("n", 1)])).unwrap()
    }

    fn handle(map: &ObservableMap, key: &str) -> Rc<ComputedHandle> {
        let def = map.definition(key).unwrap();
        map.handle(key, &def).unwrap()
    }

    fn guarded_map(runtime: &Runtime, n: i32) -> ObservableMap {
        let schema = MapSchema::new()
            .prop("n", "number")
            .prop(
                "next",
                Getter::derived(|m| {
                    let n = m.get("n")?.to_number();
                    if n < 0.0 {
                        return Err(Error::custom("n must not be negative"));
                    }
                    Ok(Value::from(n + 1.0))
                }),
            )
            .build();
        ObservableMap::new(runtime, &schema, Value::object([("n", n)])).unwrap()
    }

    fn collect(map: &ObservableMap, key: &str) -> Rc<RefCell<Vec<Value>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        map.on(key, move |e| sink.borrow_mut().push(e.new_value.clone()));
        seen
    }

    #[test]
    fn failed_refresh_retries_on_the_next_change() {
        let runtime = Runtime::new();
        let map = guarded_map(&runtime, 1);
        let seen = collect(&map, "next");
        let next = handle(&map, "next");

        map.set("n", -1).unwrap();
        assert!(seen.borrow().is_empty());
        assert_eq!(next.memo_state(), MemoState::Dirty);
        assert_eq!(next.dependency_count(), 1);

        map.set("n", 5).unwrap();
        map.set("n", 7).unwrap();
        assert_eq!(*seen.borrow(), vec![Value::from(6), Value::from(8)]);
        assert_eq!(next.memo_state(), MemoState::Clean);
    }

    #[test]
    fn failed_activation_still_binds_its_reads() {
        let runtime = Runtime::new();
        let map = guarded_map(&runtime, -1);
        let seen = collect(&map, "next");
        let next = handle(&map, "next");

        assert!(next.is_hot());
        assert_eq!(next.dependency_count(), 1);
        assert_eq!(map.listener_count("n"), 1);
        assert!(map.get("next").is_err());

        map.set("n", 5).unwrap();
        assert_eq!(*seen.borrow(), vec![Value::from(6)]);
        assert_eq!(map.get("next").unwrap(), Value::from(6));
    }

    #[test]
    fn activation_binds_and_teardown_releases() {
        let runtime = Runtime::new();
        let map = counter_map(&runtime, Rc::new(Cell::new(0)));
        let next = handle(&map, "next");
        assert!(!next.is_hot());

        let id = map.on("next", |_| {});
        assert!(next.is_hot());
        assert_eq!(next.memo_state(), MemoState::Clean);
        assert_eq!(next.dependency_count(), 1);

        map.off("next", id);
        assert!(!next.is_hot());
        assert_eq!(next.dependency_count(), 0);
        assert_eq!(map.listener_count("n"), 0);
    }

    #[test]
    fn writes_inside_a_transaction_dirty_the_handle() {
        let runtime = Runtime::new();
        let map = counter_map(&runtime, Rc::new(Cell::new(0)));
        let next = handle(&map, "next");
        map.on("next", |_| {});

        let _batch = runtime.batch_scope();
        map.set("n", 5).unwrap();
        assert_eq!(next.memo_state(), MemoState::Dirty);
        assert_eq!(map.get("next").unwrap(), Value::from(6));
        assert_eq!(next.memo_state(), MemoState::Clean);
    }

    #[test]
    fn hot_reads_are_cached_and_cold_reads_are_not() {
        let runtime = Runtime::new();
        let evaluations = Rc::new(Cell::new(0));
        let map = counter_map(&runtime, Rc::clone(&evaluations));

        map.get("next").unwrap();
        map.get("next").unwrap();
        assert_eq!(evaluations.get(), 2);

        map.on("next", |_| {});
        let before = evaluations.get();
        map.get("next").unwrap();
        map.get("next").unwrap();
        assert_eq!(evaluations.get(), before);
    }

    #[test]
    fn reading_itself_is_an_error() {
        let runtime = Runtime::new();
        let schema = MapSchema::new()
            .prop("loop", Getter::derived(|m| m.get("loop")))
            .build();
        let map = ObservableMap::new(&runtime, &schema, Value::Undefined).unwrap();
        assert!(matches!(map.get("loop"), Err(Error::Getter { .. })));
    }

    #[test]
    fn last_set_changes_reevaluate_hot_handles() {
        let runtime = Runtime::new();
        let schema = MapSchema::new()
            .prop(
                "echo",
                Getter::with_last_set(|_, last| Ok(Value::from(last.to_number() * 2.0))),
            )
            .build();
        let map = ObservableMap::new(&runtime, &schema, Value::Undefined).unwrap();
        let echo = handle(&map, "echo");
        map.on("echo", |_| {});

        echo.set_last_set(Value::from(4));
        assert_eq!(echo.memo_state(), MemoState::Dirty);
        assert_eq!(map.get("echo").unwrap(), Value::from(8));
    }
}
