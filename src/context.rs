//! Coroutine contexts and their lifecycle status.
//!
//! A [`Context`] is a cheaply clonable handle to one stackful coroutine
//! participating in the relay. The coroutine itself, plus the two lifecycle
//! bits the host primitive does not expose reliably, live in the shared
//! [`ContextInner`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use corosensei::Coroutine;
use smallvec::SmallVec;

use crate::error::{RelayError, Unroutable};

/// Value batch handed across a resume or yield boundary.
pub type Values<T> = SmallVec<[T; 4]>;

/// What a coroutine body produces when it finishes.
pub type Outcome<T, G> = Result<Values<T>, RelayError<T, G>>;

/// How the engine wakes a suspended coroutine.
pub(crate) enum Wake<T, G> {
    /// Ordinary delivery of resume values.
    Deliver(Values<T>),
    /// Unwind a pending relay: the yield could not be routed.
    Abandon(Unroutable<G>),
}

/// A tagged yield in flight toward a matching ancestor.
pub(crate) struct Envelope<T, G> {
    pub tag: G,
    /// The innermost context that issued the yield, kept alive until the
    /// values are collected.
    pub yielder: Context<T, G>,
    pub values: Values<T>,
}

pub(crate) type Coro<T, G> = Coroutine<Wake<T, G>, Envelope<T, G>, Outcome<T, G>>;

pub(crate) struct ContextInner<T, G> {
    pub(crate) coro: RefCell<Coro<T, G>>,
    pub(crate) started: Cell<bool>,
    pub(crate) finished: Cell<bool>,
}

/// Handle to one coroutine participating in the relay.
///
/// Clones share the same underlying coroutine; equality is identity.
pub struct Context<T, G> {
    pub(crate) inner: Rc<ContextInner<T, G>>,
}

impl<T, G> Context<T, G> {
    pub(crate) fn from_inner(inner: Rc<ContextInner<T, G>>) -> Self {
        Context { inner }
    }

    /// Stable identity for this context, unique while it is alive.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn finished(&self) -> bool {
        self.inner.finished.get()
    }
}

impl<T, G> Clone for Context<T, G> {
    fn clone(&self) -> Self {
        Context {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, G> PartialEq for Context<T, G> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T, G> Eq for Context<T, G> {}

impl<T, G> fmt::Debug for Context<T, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id())
            .field("started", &self.inner.started.get())
            .field("finished", &self.inner.finished.get())
            .finish()
    }
}

/// Observable lifecycle state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Currently executing.
    Running,
    /// Suspended while a descendant runs on its behalf.
    Normal,
    /// Suspended mid-relay: its latest yield passed through on the way to
    /// an outer target and has not been collected yet.
    Stacked,
    /// Suspended and resumable (including never started).
    Suspended,
    /// Finished, either by returning or by faulting.
    Dead,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Normal => "normal",
            Status::Stacked => "stacked",
            Status::Suspended => "suspended",
            Status::Dead => "dead",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names() {
        assert_eq!(Status::Running.as_str(), "running");
        assert_eq!(Status::Normal.as_str(), "normal");
        assert_eq!(Status::Stacked.as_str(), "stacked");
        assert_eq!(Status::Suspended.as_str(), "suspended");
        assert_eq!(Status::Dead.to_string(), "dead");
    }
}
