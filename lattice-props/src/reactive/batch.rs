//! Batch Dispatcher
//!
//! The dispatcher turns individual writes into transactions. Writes update
//! values immediately; their notifications are queued as change records and
//! delivered only when the outermost transaction closes.
//!
//! # Algorithm
//!
//! 1. `start()` bumps the depth counter, `stop()` lowers it. Reaching zero
//!    flushes.
//! 2. `enqueue()` first marks every hot computed handle bound on the changed
//!    key dirty (no user code runs), then queues the record. Property records
//!    coalesce per `(object, key)`: the first position and old value are kept,
//!    the new value is replaced. List item deltas never coalesce.
//! 3. A flush repeats rounds until nothing is pending:
//!    a. recompute every dirty computed handle (they may enqueue records of
//!       their own, which land in the next round's queue),
//!    b. drain the queue and deliver each record to user listeners,
//!    c. deliver one patch list per target.
//!    Records enqueued while delivering are never appended to the round being
//!    drained; they open the next round.
//!
//! Enqueueing outside any transaction opens and closes one implicitly.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{error, trace};

use super::event::{Event, EventKind, EventTarget, Patch};
use super::runtime::{MemoState, Reactive};
use super::subscriber::ObjectId;
use crate::error::{Error, Result};

/// A queued change.
pub(crate) struct ChangeRecord {
    pub target: Rc<dyn EventTarget>,
    pub event: Event,
}

impl ChangeRecord {
    pub fn new(target: Rc<dyn EventTarget>, event: Event) -> Self {
        Self { target, event }
    }

    fn queue_key(&self, sequence: u64) -> QueueKey {
        if self.event.is_list_delta() || self.event.kind == EventKind::Remove {
            QueueKey::Sequence(sequence)
        } else {
            QueueKey::Property(self.target.object_id(), Rc::clone(&self.event.key))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum QueueKey {
    Property(ObjectId, Rc<str>),
    Sequence(u64),
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    flushing: bool,
    sequence: u64,
    queue: IndexMap<QueueKey, ChangeRecord>,
    dirty: VecDeque<Weak<dyn Reactive>>,
}

/// Transaction state for one runtime.
#[derive(Default)]
pub(crate) struct BatchDispatcher {
    state: RefCell<BatchState>,
}

impl BatchDispatcher {
    pub fn start(&self) {
        let mut state = self.state.borrow_mut();
        state.depth += 1;
        trace!(depth = state.depth, "batch start");
    }

    /// Close a transaction. Returns `true` when this was the outermost one
    /// and the caller should flush.
    pub fn stop(&self) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        if state.depth == 0 {
            return Err(Error::TransactionImbalance);
        }
        state.depth -= 1;
        trace!(depth = state.depth, "batch stop");
        Ok(state.depth == 0)
    }

    pub fn depth(&self) -> usize {
        self.state.borrow().depth
    }

    #[cfg(test)]
    pub fn is_flushing(&self) -> bool {
        self.state.borrow().flushing
    }

    /// Number of records waiting for delivery.
    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Queue a record. Dependent computed handles are marked dirty first.
    pub fn push(&self, record: ChangeRecord) {
        for reactive in record.target.hub().derive_listeners(&record.event.key) {
            reactive.mark_dirty(MemoState::Dirty);
        }

        let mut state = self.state.borrow_mut();
        state.sequence += 1;
        let key = record.queue_key(state.sequence);
        match state.queue.get_mut(&key) {
            Some(existing) => {
                trace!(key = %record.event.key, "coalescing change record");
                existing.event.new_value = record.event.new_value;
            }
            None => {
                state.queue.insert(key, record);
            }
        }
    }

    /// Register a dirty computed handle for the next derive phase.
    pub fn schedule(&self, reactive: Weak<dyn Reactive>) {
        self.state.borrow_mut().dirty.push_back(reactive);
    }

    /// Drain all pending work. No-op while a transaction is open or a flush
    /// is already running further up the stack.
    pub fn flush(&self, max_rounds: usize) {
        {
            let mut state = self.state.borrow_mut();
            if state.flushing || state.depth > 0 {
                return;
            }
            state.flushing = true;
        }
        let _reset = FlushGuard(self);

        let mut rounds = 0usize;
        loop {
            self.derive_phase(max_rounds);

            let records = std::mem::take(&mut self.state.borrow_mut().queue);
            if records.is_empty() {
                break;
            }

            rounds += 1;
            if rounds > max_rounds {
                error!(
                    rounds,
                    dropped = records.len(),
                    "flush exceeded max rounds; dropping pending changes"
                );
                // Dirty handles stay queued for the next flush.
                self.state.borrow_mut().queue.clear();
                break;
            }

            trace!(round = rounds, records = records.len(), "delivering batch");
            deliver(records.into_values());
        }
    }

    /// Refresh dirty computed handles. Handles dirtied while refreshing are
    /// picked up by the next pass; a handle that keeps dirtying itself is
    /// left for the next flush once `max_passes` is reached.
    fn derive_phase(&self, max_passes: usize) {
        for _ in 0..max_passes.max(1) {
            let pass = std::mem::take(&mut self.state.borrow_mut().dirty);
            if pass.is_empty() {
                return;
            }
            for weak in pass {
                if let Some(reactive) = weak.upgrade() {
                    reactive.refresh();
                }
            }
        }
        let left = self.state.borrow().dirty.len();
        if left > 0 {
            error!(left, "computed handles kept invalidating each other; deferring");
        }
    }
}

struct FlushGuard<'a>(&'a BatchDispatcher);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.state.borrow_mut().flushing = false;
    }
}

fn deliver(records: impl Iterator<Item = ChangeRecord>) {
    let mut patches: IndexMap<ObjectId, (Rc<dyn EventTarget>, Vec<Patch>)> = IndexMap::new();

    for record in records {
        for handler in record.target.hub().user_listeners(&record.event.key) {
            handler(&record.event);
        }
        if let Some(patch) = record.event.to_patch() {
            patches
                .entry(record.target.object_id())
                .or_insert_with(|| (Rc::clone(&record.target), Vec::new()))
                .1
                .push(patch);
        }
    }

    for (target, list) in patches.into_values() {
        for handler in target.hub().patch_listeners() {
            handler(&list);
        }
    }
}
