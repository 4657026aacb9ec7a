//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects maps, lists,
//! signals and computed properties. It owns:
//!
//! - the type registry used to compile schemas,
//! - the batch dispatcher (transaction depth, pending change records, dirty
//!   computed handles),
//! - the evaluation-context stack used for dependency tracking,
//! - the configuration.
//!
//! # How It Works
//!
//! 1. When a property is read inside a computed evaluation, the read is
//!    recorded on the runtime's context stack.
//!
//! 2. When the evaluation finishes, the computed handle binds itself on
//!    every recorded `(object, key)` pair.
//!
//! 3. When a value changes, the runtime:
//!    a. Marks dependent computed handles dirty
//!    b. Queues the change record
//!    c. Flushes when the outermost transaction closes: dirty handles
//!       recompute first, then user listeners run
//!
//! # Ownership
//!
//! A `Runtime` is a cheap `Rc` handle. There is no global state; two
//! runtimes never share transactions or tracking. Objects that take part in
//! the same dependency graph must be created from the same runtime.

use std::fmt;
use std::rc::{Rc, Weak};

use super::batch::{BatchDispatcher, ChangeRecord};
use super::context::{ContextStack, ReactiveContext};
use super::event::{Event, EventTarget};
use super::subscriber::SubscriberId;
use crate::config::RuntimeConfig;
use crate::define::TypeRegistry;
use crate::error::Result;

/// Dirty state for a computed handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A computed dependency might have changed. Need to check.
    MaybeDirty,

    /// A direct dependency changed; the handle must recompute.
    Dirty,
}

/// A trait for computations that can be notified when dependencies change.
pub(crate) trait Reactive {
    /// Get the subscriber ID for this reactive value.
    fn subscriber_id(&self) -> SubscriberId;

    /// Mark this reactive value as needing an update.
    fn mark_dirty(&self, state: MemoState);

    /// Recompute if dirty (called by the dispatcher's derive phase).
    fn refresh(&self);
}

struct RuntimeInner {
    config: RuntimeConfig,
    registry: Rc<TypeRegistry>,
    dispatcher: BatchDispatcher,
    context: ContextStack,
}

/// Handle to a reactive runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// A runtime with the built-in type registry and default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Rc::new(TypeRegistry::with_builtins()), config)
    }

    /// A runtime sharing an existing registry.
    pub fn with_registry(registry: Rc<TypeRegistry>, config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                registry,
                dispatcher: BatchDispatcher::default(),
                context: ContextStack::default(),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Rc<TypeRegistry> {
        &self.inner.registry
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Open a transaction. Transactions nest.
    pub fn start(&self) {
        self.inner.dispatcher.start();
    }

    /// Close a transaction, delivering pending changes if it was the
    /// outermost one.
    pub fn stop(&self) -> Result<()> {
        if self.inner.dispatcher.stop()? {
            self.flush();
        }
        Ok(())
    }

    /// Run `f` inside a transaction.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = self.batch_scope();
        f()
    }

    /// Open a transaction that closes when the guard drops.
    pub fn batch_scope(&self) -> BatchGuard {
        self.start();
        BatchGuard {
            runtime: self.clone(),
        }
    }

    /// Current transaction depth.
    pub fn transaction_depth(&self) -> usize {
        self.inner.dispatcher.depth()
    }

    /// Number of change records waiting for delivery.
    pub fn pending_changes(&self) -> usize {
        self.inner.dispatcher.pending()
    }

    fn flush(&self) {
        self.inner.dispatcher.flush(self.inner.config.max_flush_rounds);
    }

    /// Queue a change. Outside a transaction this opens and closes one.
    pub(crate) fn enqueue(&self, target: Rc<dyn EventTarget>, event: Event) {
        self.start();
        self.inner.dispatcher.push(ChangeRecord::new(target, event));
        // Depth was raised just above, so this stop always balances.
        if let Ok(true) = self.inner.dispatcher.stop() {
            self.flush();
        }
    }

    pub(crate) fn schedule(&self, reactive: Weak<dyn Reactive>) {
        self.inner.dispatcher.schedule(reactive);
    }

    // ------------------------------------------------------------------
    // Dependency tracking
    // ------------------------------------------------------------------

    /// Check if a computed evaluation is recording reads.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.is_tracking()
    }

    /// Run `f` without recording any reads it performs.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = self.inner.context.enter_untracked();
        f()
    }

    pub(crate) fn enter(&self, subscriber_id: SubscriberId) -> ReactiveContext<'_> {
        self.inner.context.enter(subscriber_id)
    }

    /// Record a read of `key` on `target`.
    pub(crate) fn observe(&self, target: Rc<dyn EventTarget>, key: &str) {
        self.inner.context.track(target, key);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("depth", &self.transaction_depth())
            .field("pending", &self.pending_changes())
            .field("schema_policy", &self.inner.config.schema_policy)
            .finish()
    }
}

/// RAII transaction guard returned by [`Runtime::batch_scope`].
#[must_use = "the transaction closes when the guard is dropped"]
pub struct BatchGuard {
    runtime: Runtime,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        // Balanced by construction: the guard owns exactly one start().
        let _ = self.runtime.stop();
    }
}
