//! In-body handle to the relay.
//!
//! A [`Scope`] is passed to every coroutine body. It is the only way to
//! yield, and it carries the suspension capability nested resumes need to
//! pass unmatched yields outward instead of abandoning them.

use std::rc::{Rc, Weak};

use corosensei::Yielder;

use crate::context::{Context, ContextInner, Envelope, Values, Wake};
use crate::error::RelayError;
use crate::relay::{drive, is_yieldable_from, Convention, Core, Relay, Tag};
use crate::traceback::TraceFrame;

pub struct Scope<'y, T, G> {
    core: Rc<Core<T, G>>,
    yielder: &'y Yielder<Wake<T, G>, Envelope<T, G>>,
    // Weak so a suspended coroutine's own stack never keeps it alive.
    context: Weak<ContextInner<T, G>>,
}

impl<'y, T: 'static, G: Tag> Scope<'y, T, G> {
    pub(crate) fn new(
        core: Rc<Core<T, G>>,
        yielder: &'y Yielder<Wake<T, G>, Envelope<T, G>>,
        context: &Context<T, G>,
    ) -> Self {
        Scope {
            core,
            yielder,
            context: Rc::downgrade(&context.inner),
        }
    }

    /// The context this body runs in.
    pub fn context(&self) -> Context<T, G> {
        match self.context.upgrade() {
            Some(inner) => Context::from_inner(inner),
            // A scope only exists while its coroutine runs, and a running
            // coroutine is held alive by its resumer.
            None => unreachable!("scope used outside its coroutine"),
        }
    }

    /// A relay handle sharing this scope's engine, usable to spawn or
    /// inspect contexts from inside a body.
    pub fn relay(&self) -> Relay<T, G> {
        Relay::from_core(Rc::clone(&self.core))
    }

    /// Suspend this coroutine, routing `values` to the nearest enclosing
    /// resume boundary whose context is tagged `tag`. This context's own
    /// tag counts when it matches.
    ///
    /// Returns the values of the next resume of the matched context, or an
    /// error when no boundary matches.
    #[track_caller]
    pub fn yield_to(
        &self,
        tag: G,
        values: impl IntoIterator<Item = T>,
    ) -> Result<Values<T>, RelayError<T, G>> {
        let frame = TraceFrame::here("yield");
        self.core.push_frame(frame);
        let envelope = Envelope {
            tag,
            yielder: self.context(),
            values: values.into_iter().collect(),
        };
        let wake = self.yielder.suspend(envelope);
        self.core.pop_frame();
        match wake {
            Wake::Deliver(values) => Ok(values),
            Wake::Abandon(reason) => Err(RelayError::unroutable(reason)),
        }
    }

    /// Resume `target` from inside this body. Unmatched yields out of
    /// `target` pass through this scope's own suspension toward outer
    /// boundaries.
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
            Some(self.yielder),
            Convention::Resume,
        );
        self.core.pop_frame();
        out
    }

    /// Call-convention variant of [`resume`](Self::resume).
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
            Some(self.yielder),
            Convention::Call,
        );
        self.core.pop_frame();
        out
    }

    /// Whether a yield of `tag` from here would find a matching boundary.
    pub fn is_yieldable(&self, tag: &G) -> bool {
        is_yieldable_from(&self.core, &self.context(), tag)
    }

    /// The currently running context.
    pub fn running(&self) -> Option<Context<T, G>> {
        self.core.running()
    }
}
