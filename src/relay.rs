//! The relay engine.
//!
//! A [`Relay`] owns the registry of tagged contexts and drives their
//! coroutines. Every resume runs the same engine loop: wake the target,
//! inspect what comes back, and either deliver values, pass a tagged yield
//! along to the next boundary, or unwind an unroutable one.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe, Location};
use std::rc::{Rc, Weak};

use corosensei::{Coroutine, CoroutineResult, Yielder};
use tracing::trace;

use crate::context::{Context, ContextInner, Coro, Envelope, Outcome, Values, Wake};
use crate::error::{Fault, FaultKind, RelayError, Unroutable};
use crate::registry::{Parent, Registry};
use crate::scope::Scope;
use crate::traceback::TraceFrame;

/// Bounds a routing tag must satisfy.
pub trait Tag: Clone + PartialEq + fmt::Debug + 'static {}

impl<G: Clone + PartialEq + fmt::Debug + 'static> Tag for G {}

pub(crate) struct Config {
    pub max_values: usize,
    pub trace_head: usize,
    pub trace_tail: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_values: 1 << 20,
            trace_head: 10,
            trace_tail: 11,
        }
    }
}

/// Configures and builds a [`Relay`].
pub struct RelayBuilder<T, G> {
    config: Config,
    _marker: PhantomData<(T, G)>,
}

impl<T, G> RelayBuilder<T, G> {
    /// Cap on the number of values handed across one resume or yield.
    pub fn max_values(mut self, limit: usize) -> Self {
        self.config.max_values = limit;
        self
    }

    /// Frames printed from the top of each traceback hop before eliding.
    pub fn trace_head(mut self, head: usize) -> Self {
        self.config.trace_head = head;
        self
    }

    /// Frames printed from the bottom of each traceback hop.
    pub fn trace_tail(mut self, tail: usize) -> Self {
        self.config.trace_tail = tail;
        self
    }

    pub fn build(self) -> Relay<T, G> {
        Relay {
            core: Rc::new(Core {
                registry: Registry::new(),
                current: RefCell::new(Vec::new()),
                root_frames: RefCell::new(Vec::new()),
                config: self.config,
            }),
        }
    }
}

pub(crate) struct Core<T, G> {
    pub registry: Registry<T, G>,
    /// Resume chain from root to the running context.
    current: RefCell<Vec<Weak<ContextInner<T, G>>>>,
    pub root_frames: RefCell<Vec<TraceFrame>>,
    pub config: Config,
}

impl<T, G> Core<T, G> {
    pub fn running(&self) -> Option<Context<T, G>> {
        self.current
            .borrow()
            .last()
            .and_then(Weak::upgrade)
            .map(Context::from_inner)
    }

    pub fn running_id(&self) -> Option<usize> {
        self.current
            .borrow()
            .last()
            .map(|weak| weak.as_ptr() as usize)
    }

    /// True if `id` is anywhere on the active resume chain.
    pub fn on_chain(&self, id: usize) -> bool {
        self.current
            .borrow()
            .iter()
            .any(|weak| weak.as_ptr() as usize == id)
    }

    pub fn is_root(&self) -> bool {
        self.current.borrow().is_empty()
    }

    fn push_current(&self, ctx: &Context<T, G>) {
        self.current.borrow_mut().push(Rc::downgrade(&ctx.inner));
    }

    fn pop_current(&self) {
        self.current.borrow_mut().pop();
    }

    /// Record a call-site frame against the running context, or against the
    /// root log when called from outside any coroutine.
    pub fn push_frame(&self, frame: TraceFrame) {
        match self.running() {
            Some(ctx) => {
                self.registry.with_meta_mut(ctx.id(), |m| m.frames.push(frame));
            }
            None => self.root_frames.borrow_mut().push(frame),
        }
    }

    pub fn pop_frame(&self) {
        match self.running() {
            Some(ctx) => {
                self.registry.with_meta_mut(ctx.id(), |m| {
                    m.frames.pop();
                });
            }
            None => {
                self.root_frames.borrow_mut().pop();
            }
        }
    }
}

/// Handle to a relay engine. Clones share the same registry and state.
pub struct Relay<T, G> {
    core: Rc<Core<T, G>>,
}

impl<T, G> Clone for Relay<T, G> {
    fn clone(&self) -> Self {
        Relay {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T, G> Default for Relay<T, G> {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<T, G> Relay<T, G> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> RelayBuilder<T, G> {
        RelayBuilder {
            config: Config::default(),
            _marker: PhantomData,
        }
    }

    pub(crate) fn core(&self) -> &Core<T, G> {
        &self.core
    }

    pub(crate) fn from_core(core: Rc<Core<T, G>>) -> Self {
        Relay { core }
    }

    /// Drop registry entries for contexts that no longer exist.
    pub fn prune(&self) {
        self.core.registry.prune();
    }
}

/// Pops the context's innermost recorded frame on drop, panic included.
struct FrameGuard<'a, T, G> {
    core: &'a Core<T, G>,
    id: usize,
}

impl<T, G> Drop for FrameGuard<'_, T, G> {
    fn drop(&mut self) {
        self.core.registry.with_meta_mut(self.id, |m| {
            m.frames.pop();
        });
    }
}

impl<T: 'static, G: Tag> Relay<T, G> {
    /// Spawn a coroutine without a tag. It cannot be resumed until
    /// [`adopt`](Self::adopt) gives it one.
    #[track_caller]
    pub fn spawn<F>(&self, body: F) -> Context<T, G>
    where
        F: FnOnce(&Scope<'_, T, G>, Values<T>) -> Outcome<T, G> + 'static,
    {
        self.spawn_at(Location::caller(), body)
    }

    /// Spawn a coroutine and tag it in one step.
    #[track_caller]
    pub fn create<F>(&self, tag: G, body: F) -> Context<T, G>
    where
        F: FnOnce(&Scope<'_, T, G>, Values<T>) -> Outcome<T, G> + 'static,
    {
        let ctx = self.spawn_at(Location::caller(), body);
        // A freshly allocated context cannot clash with a live entry.
        let _ = self.core.registry.register(&ctx, tag);
        ctx
    }

    /// Tag a previously spawned context so it can participate in routing.
    pub fn adopt(&self, ctx: &Context<T, G>, tag: G) -> Result<(), RelayError<T, G>> {
        self.core.registry.register(ctx, tag)
    }

    /// Spawn a tagged coroutine and return a callable bound to it. Each
    /// invocation resumes the same context with the call convention, so
    /// faults carry their source inline instead of being recorded.
    #[track_caller]
    pub fn wrap<F>(
        &self,
        tag: G,
        body: F,
    ) -> impl FnMut(Values<T>) -> Result<Values<T>, RelayError<T, G>>
    where
        F: FnOnce(&Scope<'_, T, G>, Values<T>) -> Outcome<T, G> + 'static,
    {
        let ctx = self.create(tag, body);
        let relay = self.clone();
        move |values| relay.call(&ctx, values)
    }

    fn spawn_at<F>(&self, origin: &'static Location<'static>, body: F) -> Context<T, G>
    where
        F: FnOnce(&Scope<'_, T, G>, Values<T>) -> Outcome<T, G> + 'static,
    {
        let core = Rc::clone(&self.core);
        let inner = Rc::new_cyclic(|weak_self: &Weak<ContextInner<T, G>>| {
            let weak_self = Weak::clone(weak_self);
            let coro: Coro<T, G> = Coroutine::new(move |yielder, wake| {
                let values = match wake {
                    Wake::Deliver(values) => values,
                    Wake::Abandon(reason) => return Err(RelayError::unroutable(reason)),
                };
                let Some(inner) = weak_self.upgrade() else {
                    return Err(RelayError::message("context dropped before first entry"));
                };
                let context = Context::from_inner(inner);
                let id = context.id();
                core.registry.with_meta_mut(id, |m| {
                    m.frames.push(TraceFrame {
                        location: origin,
                        op: "coroutine body",
                    })
                });
                let guard = FrameGuard { core: &core, id };
                let scope = Scope::new(Rc::clone(&core), yielder, &context);
                // The body must not hold its own context strongly through a
                // suspension, or an abandoned coroutine could never drop.
                drop(context);
                let result = body(&scope, values);
                drop(guard);
                result
            });
            ContextInner {
                coro: RefCell::new(coro),
                started: std::cell::Cell::new(false),
                finished: std::cell::Cell::new(false),
            }
        });
        Context::from_inner(inner)
    }

    /// Resume `target` with `values`. Errors surface as `Err` and the
    /// faulting context is recorded in the target's metadata, queryable via
    /// [`source`](Self::source).
    #[track_caller]
    pub fn resume(
        &self,
        target: &Context<T, G>,
        values: impl IntoIterator<Item = T>,
    ) -> Result<Values<T>, RelayError<T, G>> {
        let frame = TraceFrame::here("resume");
        self.core.push_frame(frame);
        let out = drive(
            &self.core,
            target,
            values.into_iter().collect(),
            None,
            Convention::Resume,
        );
        self.core.pop_frame();
        out
    }

    /// Like [`resume`](Self::resume), but the returned fault always carries
    /// its originating context inline.
    #[track_caller]
    pub fn call(
        &self,
        target: &Context<T, G>,
        values: impl IntoIterator<Item = T>,
    ) -> Result<Values<T>, RelayError<T, G>> {
        let frame = TraceFrame::here("call");
        self.core.push_frame(frame);
        let out = drive(
            &self.core,
            target,
            values.into_iter().collect(),
            None,
            Convention::Call,
        );
        self.core.pop_frame();
        out
    }

    pub fn status(&self, ctx: &Context<T, G>) -> crate::context::Status {
        use crate::context::Status;
        if self.core.running_id() == Some(ctx.id()) {
            return Status::Running;
        }
        if self.core.on_chain(ctx.id()) {
            return Status::Normal;
        }
        if ctx.finished() {
            return Status::Dead;
        }
        let stacked = self
            .core
            .registry
            .with_meta(ctx.id(), |m| m.stacked)
            .unwrap_or(false);
        if stacked {
            Status::Stacked
        } else {
            Status::Suspended
        }
    }

    /// The tag of a context, if it has one.
    pub fn tag(&self, ctx: &Context<T, G>) -> Option<G> {
        self.core.registry.with_meta(ctx.id(), |m| m.tag.clone())
    }

    /// The context that most recently resumed `ctx`, when that resumer was
    /// itself a coroutine and is still alive.
    pub fn parent(&self, ctx: &Context<T, G>) -> Option<Context<T, G>> {
        self.core
            .registry
            .with_meta(ctx.id(), |m| m.parent.clone())
            .flatten()
            .and_then(|parent| match parent {
                Parent::Root => None,
                Parent::Context(weak) => weak.upgrade().map(Context::from_inner),
            })
    }

    /// The context the last resume-convention fault of `ctx` originated in.
    pub fn source(&self, ctx: &Context<T, G>) -> Option<Context<T, G>> {
        self.core
            .registry
            .with_meta(ctx.id(), |m| m.source.clone())
            .flatten()
            .and_then(|weak| weak.upgrade().map(Context::from_inner))
    }

    /// The currently running context, if any.
    pub fn running(&self) -> Option<Context<T, G>> {
        self.core.running()
    }

    /// Whether a yield of `tag` issued from `start` would find a matching
    /// boundary on the parent chain.
    pub fn is_yieldable(&self, start: &Context<T, G>, tag: &G) -> bool {
        is_yieldable_from(&self.core, start, tag)
    }

    /// A view of this relay fixed to one tag.
    pub fn for_tag(&self, tag: G) -> crate::tagged::Tagged<T, G> {
        crate::tagged::Tagged::new(self.clone(), tag)
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Convention {
    Resume,
    Call,
}

enum Step<T, G> {
    Deliver(Values<T>),
    Relay(Envelope<T, G>),
    Fail(Fault<T, G>),
}

/// Engine loop shared by every resume path.
///
/// `suspend` is the waker of the coroutine issuing the resume: present when
/// resuming from inside a body, absent at the root. An unmatched yield is
/// passed outward through `suspend` when it exists; without one the relay is
/// abandoned and the chain unwound.
pub(crate) fn drive<T: 'static, G: Tag>(
    core: &Rc<Core<T, G>>,
    target: &Context<T, G>,
    values: Values<T>,
    suspend: Option<&Yielder<Wake<T, G>, Envelope<T, G>>>,
    convention: Convention,
) -> Result<Values<T>, RelayError<T, G>> {
    if !core.registry.is_tagged(target.id()) {
        return Err(RelayError::Untagged);
    }
    if values.len() > core.config.max_values {
        return Err(RelayError::TooManyValues {
            count: values.len(),
            limit: core.config.max_values,
        });
    }
    if target.finished() {
        return Err(RelayError::Dead);
    }
    if core.on_chain(target.id()) {
        return Err(RelayError::NotSuspended);
    }
    let stacked = core
        .registry
        .with_meta(target.id(), |m| m.stacked)
        .unwrap_or(false);
    if stacked {
        return Err(RelayError::Stacked);
    }

    let parent = match core.running() {
        Some(ctx) => Parent::Context(Rc::downgrade(&ctx.inner)),
        None => Parent::Root,
    };
    core.registry.with_meta_mut(target.id(), |m| {
        m.parent = Some(parent);
        // Collect the pending yielder; its values arrive through the
        // cascade below.
        m.yielder = None;
    });

    let mut wake = Wake::Deliver(values);
    loop {
        core.registry
            .with_meta_mut(target.id(), |m| m.stacked = false);
        target.inner.started.set(true);
        core.push_current(target);
        trace!(target_id = target.id(), "entering coroutine");
        let outcome = {
            let mut coro = match target.inner.coro.try_borrow_mut() {
                Ok(coro) => coro,
                Err(_) => {
                    core.pop_current();
                    return Err(RelayError::NotSuspended);
                }
            };
            panic::catch_unwind(AssertUnwindSafe(|| coro.resume(wake)))
        };
        core.pop_current();

        let step = match outcome {
            Err(payload) => {
                target.inner.finished.set(true);
                Step::Fail(Fault {
                    source: Some(target.clone()),
                    kind: FaultKind::Panicked(panic_message(payload)),
                })
            }
            Ok(CoroutineResult::Return(Ok(values))) => {
                target.inner.finished.set(true);
                Step::Deliver(values)
            }
            Ok(CoroutineResult::Return(Err(err))) => {
                target.inner.finished.set(true);
                Step::Fail(err.into_fault(target))
            }
            Ok(CoroutineResult::Yield(envelope)) => {
                let matched = core
                    .registry
                    .with_meta(target.id(), |m| m.tag == envelope.tag)
                    .unwrap_or(false);
                if matched {
                    trace!(target_id = target.id(), tag = ?envelope.tag, "yield matched");
                    let Envelope {
                        yielder, values, ..
                    } = envelope;
                    core.registry
                        .with_meta_mut(target.id(), |m| m.yielder = Some(yielder));
                    Step::Deliver(values)
                } else {
                    Step::Relay(envelope)
                }
            }
        };

        match step {
            Step::Deliver(values) => return Ok(values),
            Step::Fail(fault) => return fail(core, target, fault, convention),
            Step::Relay(envelope) => {
                wake = match suspend {
                    Some(yielder) => {
                        trace!(target_id = target.id(), tag = ?envelope.tag, "passing yield outward");
                        core.registry
                            .with_meta_mut(target.id(), |m| m.stacked = true);
                        yielder.suspend(envelope)
                    }
                    None => {
                        let Envelope { tag, .. } = envelope;
                        let reason = if core.is_root() {
                            Unroutable::TagNotFound(tag)
                        } else {
                            Unroutable::AcrossBoundary
                        };
                        trace!(reason = %reason, "abandoning relay");
                        Wake::Abandon(reason)
                    }
                };
            }
        }
    }
}

fn fail<T: 'static, G: Tag>(
    core: &Rc<Core<T, G>>,
    target: &Context<T, G>,
    mut fault: Fault<T, G>,
    convention: Convention,
) -> Result<Values<T>, RelayError<T, G>> {
    match convention {
        Convention::Resume => {
            let weak = fault.source.as_ref().map(|ctx| Rc::downgrade(&ctx.inner));
            core.registry
                .with_meta_mut(target.id(), |m| m.source = weak);
        }
        Convention::Call => {
            if fault.source.is_none() {
                fault.source = Some(target.clone());
            }
        }
    }
    Err(RelayError::Fault(fault))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}

/// Walk the parent chain from `start` looking for a boundary tagged `tag`.
/// The starting context itself counts.
pub(crate) fn is_yieldable_from<T, G: Tag>(
    core: &Core<T, G>,
    start: &Context<T, G>,
    tag: &G,
) -> bool {
    let mut cur = start.clone();
    loop {
        let Some((own_tag, parent)) = core
            .registry
            .with_meta(cur.id(), |m| (m.tag.clone(), m.parent.clone()))
        else {
            return false;
        };
        if own_tag == *tag {
            return true;
        }
        match parent {
            None | Some(Parent::Root) => return false,
            Some(Parent::Context(weak)) => match weak.upgrade() {
                Some(inner) => cur = Context::from_inner(inner),
                None => return false,
            },
        }
    }
}
