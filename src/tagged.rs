//! A relay view fixed to one tag.
//!
//! [`Tagged`] pairs a relay handle with a tag so call sites that always
//! route to the same boundary do not repeat it.

use crate::context::{Context, Outcome, Values};
use crate::error::RelayError;
use crate::relay::{Relay, Tag};
use crate::scope::Scope;

pub struct Tagged<T, G> {
    relay: Relay<T, G>,
    tag: G,
}

impl<T, G: Clone> Clone for Tagged<T, G> {
    fn clone(&self) -> Self {
        Tagged {
            relay: self.relay.clone(),
            tag: self.tag.clone(),
        }
    }
}

impl<T: 'static, G: Tag> Tagged<T, G> {
    pub(crate) fn new(relay: Relay<T, G>, tag: G) -> Self {
        Tagged { relay, tag }
    }

    pub fn tag(&self) -> &G {
        &self.tag
    }

    pub fn relay(&self) -> &Relay<T, G> {
        &self.relay
    }

    /// Spawn a coroutine carrying this view's tag.
    #[track_caller]
    pub fn create<F>(&self, body: F) -> Context<T, G>
    where
        F: FnOnce(&Scope<'_, T, G>, Values<T>) -> Outcome<T, G> + 'static,
    {
        self.relay.create(self.tag.clone(), body)
    }

    /// Spawn a coroutine carrying this view's tag and return a callable
    /// bound to it.
    #[track_caller]
    pub fn wrap<F>(&self, body: F) -> impl FnMut(Values<T>) -> Result<Values<T>, RelayError<T, G>>
    where
        F: FnOnce(&Scope<'_, T, G>, Values<T>) -> Outcome<T, G> + 'static,
    {
        self.relay.wrap(self.tag.clone(), body)
    }

    /// Yield from `scope` toward the nearest boundary carrying this tag.
    #[track_caller]
    pub fn yield_from(
        &self,
        scope: &Scope<'_, T, G>,
        values: impl IntoIterator<Item = T>,
    ) -> Result<Values<T>, RelayError<T, G>> {
        scope.yield_to(self.tag.clone(), values)
    }

    /// Whether a yield of this tag from `scope` would route.
    pub fn is_yieldable(&self, scope: &Scope<'_, T, G>) -> bool {
        scope.is_yieldable(&self.tag)
    }
}
