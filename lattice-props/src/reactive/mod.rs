//! Reactive Primitives
//!
//! This module implements the machinery behind live properties: the
//! runtime that owns transactions and dependency tracking, the event hubs
//! objects dispatch through, standalone signals, and the computed handles
//! that cache derived property values.
//!
//! # Concepts
//!
//! ## Runtime
//!
//! Every map, list and signal belongs to one [`Runtime`]. It owns the type
//! registry, the batch dispatcher and the stack of running computed
//! evaluations. Runtimes are independent: they share neither tracking nor
//! transactions.
//!
//! ## Transactions
//!
//! Writes update values immediately but queue their notifications. The
//! queue is delivered when the outermost transaction closes; writes outside
//! any transaction open and close one implicitly.
//!
//! ## Computed Handles
//!
//! A computed property's value is cached in a handle that records every
//! read made by its getter. While something listens to the property, the
//! handle stays subscribed to those reads and re-evaluates when one changes.
//!
//! # Implementation Notes
//!
//! Everything here is single-threaded (`Rc`/`RefCell`). No `RefCell` borrow
//! is held across a call into user code or into the dispatcher, so
//! listeners and getters may freely read and write other objects.

mod batch;
mod computed;
mod context;
pub(crate) mod event;
mod runtime;
mod signal;
mod subscriber;

pub(crate) use computed::ComputedHandle;
pub use computed::{ResolveScope, Resolver};
pub use event::{
    Event, EventHub, EventKind, Listenable, Patch, Target, ADD_EVENT, KEYS_EVENT, LENGTH_EVENT,
    REMOVE_EVENT, VALUE_EVENT,
};
pub use runtime::{BatchGuard, MemoState, Runtime};
pub use signal::Signal;
pub use subscriber::{ObjectId, SubscriberId};
