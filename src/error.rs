//! Error types for the relay.
//!
//! The relay surfaces two families of failure: protocol errors raised before
//! a target ever runs (untagged, dead, stacked, ...) and faults carried out
//! of a running coroutine body (a raised error value, an unroutable yield, a
//! panic). Both live in [`RelayError`]; traceback composition has its own
//! small [`TracebackError`].

use std::error::Error as StdError;
use std::fmt;

use crate::context::Context;

/// Why a relayed yield could not be routed to a matching ancestor.
#[derive(Debug, Clone, PartialEq)]
pub enum Unroutable<G> {
    /// The envelope reached the root without meeting a resume boundary
    /// whose context carries the target tag.
    TagNotFound(G),
    /// The envelope reached a resume invocation that has no suspension
    /// capability (a `Relay`-level resume issued from inside a body).
    AcrossBoundary,
}

impl<G: fmt::Debug> fmt::Display for Unroutable<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unroutable::TagNotFound(tag) => write!(f, "tag {:?} not found", tag),
            Unroutable::AcrossBoundary => {
                write!(f, "attempt to yield across a non-yieldable boundary")
            }
        }
    }
}

/// What went wrong inside a coroutine body.
#[derive(Debug, PartialEq)]
pub enum FaultKind<T, G> {
    /// An error value raised by the body itself.
    Raised(T),
    /// A yield that could not be routed; observed by the yielding frame
    /// and unwound through every in-flight hop.
    Unroutable(Unroutable<G>),
    /// The body panicked; the payload is stringified and the context is
    /// dead afterwards.
    Panicked(String),
    /// A protocol error that crossed a coroutine boundary while
    /// propagating, flattened to its message.
    Message(String),
}

impl<T, G: fmt::Debug> fmt::Display for FaultKind<T, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Raised(_) => write!(f, "coroutine body raised an error value"),
            FaultKind::Unroutable(reason) => write!(f, "{}", reason),
            FaultKind::Panicked(msg) => write!(f, "coroutine body panicked: {}", msg),
            FaultKind::Message(msg) => write!(f, "{}", msg),
        }
    }
}

/// An error carried out of a coroutine, together with the context it
/// originated in (when known).
///
/// Under the call convention the source is always filled in, defaulting to
/// the resume target; under the resume convention it is recorded in the
/// target's metadata instead and queryable via `Relay::source`.
#[derive(Debug, PartialEq)]
pub struct Fault<T, G> {
    /// The context whose frame originally faulted, possibly several relay
    /// hops below the resume target.
    pub source: Option<Context<T, G>>,
    pub kind: FaultKind<T, G>,
}

impl<T, G> Fault<T, G> {
    pub(crate) fn new(kind: FaultKind<T, G>) -> Self {
        Fault { source: None, kind }
    }
}

impl<T, G: fmt::Debug> fmt::Display for Fault<T, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Errors surfaced by resume, call, and yield.
#[derive(Debug, PartialEq)]
pub enum RelayError<T, G> {
    /// The target carries no relay metadata and cannot participate.
    Untagged,
    /// The target already carries a tag (`adopt` called twice).
    AlreadyTagged,
    /// The target already finished and holds no pending frame.
    Dead,
    /// The target's latest suspension is mid-relay and cannot be
    /// re-entered concurrently.
    Stacked,
    /// The target is running or is an ancestor of the running context.
    NotSuspended,
    /// Too many values to hand across in one resume.
    TooManyValues { count: usize, limit: usize },
    /// A fault propagated out of a coroutine body.
    Fault(Fault<T, G>),
}

impl<T, G> RelayError<T, G> {
    /// Wrap an application error value, to be returned from a body.
    pub fn raised(value: T) -> Self {
        RelayError::Fault(Fault::new(FaultKind::Raised(value)))
    }

    pub(crate) fn unroutable(reason: Unroutable<G>) -> Self {
        RelayError::Fault(Fault::new(FaultKind::Unroutable(reason)))
    }

    pub(crate) fn message(msg: impl Into<String>) -> Self {
        RelayError::Fault(Fault::new(FaultKind::Message(msg.into())))
    }

    /// The fault carried by this error, if it is one.
    pub fn fault(&self) -> Option<&Fault<T, G>> {
        match self {
            RelayError::Fault(fault) => Some(fault),
            _ => None,
        }
    }

    /// True if this error is an unroutable-yield fault.
    pub fn is_unroutable(&self) -> bool {
        matches!(
            self,
            RelayError::Fault(Fault {
                kind: FaultKind::Unroutable(_),
                ..
            })
        )
    }
}

impl<T, G: fmt::Debug> RelayError<T, G> {
    /// Convert a body's error result into a fault, filling in the target
    /// as the source when the failing frame did not record one.
    pub(crate) fn into_fault(self, target: &Context<T, G>) -> Fault<T, G> {
        match self {
            RelayError::Fault(mut fault) => {
                if fault.source.is_none() {
                    fault.source = Some(target.clone());
                }
                fault
            }
            other => Fault {
                source: Some(target.clone()),
                kind: FaultKind::Message(other.to_string()),
            },
        }
    }
}

impl<T, G> From<Fault<T, G>> for RelayError<T, G> {
    fn from(fault: Fault<T, G>) -> Self {
        RelayError::Fault(fault)
    }
}

impl<T, G: fmt::Debug> fmt::Display for RelayError<T, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Untagged => write!(f, "attempt to resume untagged coroutine"),
            RelayError::AlreadyTagged => write!(f, "coroutine is already tagged"),
            RelayError::Dead => write!(f, "cannot resume dead coroutine"),
            RelayError::Stacked => write!(f, "cannot resume stacked coroutine"),
            RelayError::NotSuspended => write!(f, "cannot resume non-suspended coroutine"),
            RelayError::TooManyValues { count, limit } => {
                write!(f, "too many values to resume ({} > limit {})", count, limit)
            }
            RelayError::Fault(fault) => write!(f, "{}", fault),
        }
    }
}

impl<T: fmt::Debug, G: fmt::Debug> StdError for RelayError<T, G> {}

/// Errors raised synchronously by the traceback composer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracebackError {
    /// A hop on the parent chain carries no relay metadata.
    Untagged,
    /// A hop's parent link is missing or its context is gone.
    BrokenLink,
}

impl fmt::Display for TracebackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracebackError::Untagged => write!(f, "untagged coroutine in traceback"),
            TracebackError::BrokenLink => write!(f, "broken parent link in traceback"),
        }
    }
}

impl StdError for TracebackError {}
