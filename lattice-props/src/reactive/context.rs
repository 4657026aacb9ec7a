//! Evaluation Context
//!
//! The context stack tracks which computation is currently evaluating so
//! that reads can be recorded as dependencies.
//!
//! # Implementation
//!
//! Each [`Runtime`](super::Runtime) owns one stack; there is no thread-local
//! or global state, so independent runtimes never see each other's
//! evaluations. Entering a context pushes a frame and returns a guard; the
//! guard pops the frame when dropped, so the stack stays balanced even if a
//! getter returns early with an error or panics.
//!
//! Nested frames are independent: a computed property that reads another
//! computed property records only the outer property itself, while the inner
//! evaluation records its own sources in its own frame.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use smallvec::SmallVec;

use super::event::EventTarget;
use super::subscriber::{ObjectId, SubscriberId};

/// A read recorded during an evaluation.
#[derive(Clone)]
pub(crate) struct Observation {
    pub target: Rc<dyn EventTarget>,
    pub key: Rc<str>,
}

pub(crate) type Observations = SmallVec<[Observation; 4]>;

struct ContextEntry {
    /// `None` for untracked frames.
    subscriber_id: Option<SubscriberId>,
    observations: Observations,
    seen: HashSet<(ObjectId, Rc<str>)>,
}

/// The per-runtime evaluation stack.
#[derive(Default)]
pub(crate) struct ContextStack {
    frames: RefCell<Vec<ContextEntry>>,
}

impl ContextStack {
    /// Enter a tracking context for `subscriber_id`.
    pub fn enter(&self, subscriber_id: SubscriberId) -> ReactiveContext<'_> {
        self.push(Some(subscriber_id))
    }

    /// Enter a frame that swallows reads without recording them.
    pub fn enter_untracked(&self) -> ReactiveContext<'_> {
        self.push(None)
    }

    fn push(&self, subscriber_id: Option<SubscriberId>) -> ReactiveContext<'_> {
        self.frames.borrow_mut().push(ContextEntry {
            subscriber_id,
            observations: Observations::new(),
            seen: HashSet::new(),
        });
        let depth = self.frames.borrow().len();
        ReactiveContext {
            stack: self,
            depth,
            subscriber_id,
            finished: false,
        }
    }

    /// Whether a tracking frame is on top of the stack.
    pub fn is_tracking(&self) -> bool {
        self.frames
            .borrow()
            .last()
            .is_some_and(|frame| frame.subscriber_id.is_some())
    }

    #[cfg(test)]
    pub fn current_subscriber(&self) -> Option<SubscriberId> {
        self.frames.borrow().last().and_then(|frame| frame.subscriber_id)
    }

    /// Record a read in the innermost frame. Duplicate reads are collapsed.
    pub fn track(&self, target: Rc<dyn EventTarget>, key: &str) {
        let mut frames = self.frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            return;
        };
        if frame.subscriber_id.is_none() {
            return;
        }
        let key: Rc<str> = key.into();
        if frame.seen.insert((target.object_id(), Rc::clone(&key))) {
            frame.observations.push(Observation { target, key });
        }
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }
}

/// Guard for one frame of the [`ContextStack`].
pub(crate) struct ReactiveContext<'a> {
    stack: &'a ContextStack,
    depth: usize,
    subscriber_id: Option<SubscriberId>,
    finished: bool,
}

impl ReactiveContext<'_> {
    /// Pop the frame and return the reads it recorded.
    pub fn finish(mut self) -> Observations {
        self.finished = true;
        self.pop().map(|entry| entry.observations).unwrap_or_default()
    }

    fn pop(&self) -> Option<ContextEntry> {
        let mut frames = self.stack.frames.borrow_mut();
        debug_assert_eq!(
            frames.len(),
            self.depth,
            "ReactiveContext popped out of order"
        );
        let entry = frames.pop();
        if let Some(entry) = &entry {
            debug_assert_eq!(
                entry.subscriber_id, self.subscriber_id,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.subscriber_id, entry.subscriber_id
            );
        }
        entry
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}
