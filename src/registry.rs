//! Per-context relay metadata.
//!
//! The registry maps context identities to their tag, parent link, stacked
//! flag, pending yielder, recorded fault source, and call-site frame log.
//! Entries hold only weak references to their contexts so the registry never
//! keeps a coroutine alive on its own; dead entries are reclaimed lazily.

use std::cell::RefCell;
use std::rc::Weak;

use rustc_hash::FxHashMap;

use crate::context::{Context, ContextInner};
use crate::error::RelayError;
use crate::traceback::TraceFrame;

/// Who resumed a context most recently.
pub(crate) enum Parent<T, G> {
    /// Resumed from outside any coroutine.
    Root,
    Context(Weak<ContextInner<T, G>>),
}

impl<T, G> Clone for Parent<T, G> {
    fn clone(&self) -> Self {
        match self {
            Parent::Root => Parent::Root,
            Parent::Context(weak) => Parent::Context(Weak::clone(weak)),
        }
    }
}

pub(crate) struct Meta<T, G> {
    pub tag: G,
    /// Set while this context's latest yield is in flight past it; cleared
    /// at the next engine pass for this context.
    pub stacked: bool,
    /// None until the first resume.
    pub parent: Option<Parent<T, G>>,
    /// The innermost yielder whose envelope matched here; collected and
    /// cleared by the next resume of this context.
    pub yielder: Option<Context<T, G>>,
    /// Where the last resume-convention fault originated.
    pub source: Option<Weak<ContextInner<T, G>>>,
    /// Call-site log for traceback composition, outermost first.
    pub frames: Vec<TraceFrame>,
}

struct Entry<T, G> {
    ctx: Weak<ContextInner<T, G>>,
    meta: Meta<T, G>,
}

pub(crate) struct Registry<T, G> {
    entries: RefCell<FxHashMap<usize, Entry<T, G>>>,
}

impl<T, G> Registry<T, G> {
    pub fn new() -> Self {
        Registry {
            entries: RefCell::new(FxHashMap::default()),
        }
    }

    /// Attach relay metadata to a context. Fails if the context is already
    /// tagged; a stale entry left by a freed context at the same address is
    /// silently replaced.
    pub fn register(&self, ctx: &Context<T, G>, tag: G) -> Result<(), RelayError<T, G>> {
        let mut entries = self.entries.borrow_mut();
        if let Some(existing) = entries.get(&ctx.id()) {
            if existing.ctx.strong_count() > 0 {
                return Err(RelayError::AlreadyTagged);
            }
        }
        let stale = entries.insert(
            ctx.id(),
            Entry {
                ctx: std::rc::Rc::downgrade(&ctx.inner),
                meta: Meta {
                    tag,
                    stacked: false,
                    parent: None,
                    yielder: None,
                    source: None,
                    frames: Vec::new(),
                },
            },
        );
        // A replaced entry may hold the last reference to another context;
        // freeing one can reach back into the registry, so drop it outside
        // the map borrow.
        drop(entries);
        drop(stale);
        Ok(())
    }

    pub fn is_tagged(&self, id: usize) -> bool {
        self.entries
            .borrow()
            .get(&id)
            .is_some_and(|e| e.ctx.strong_count() > 0)
    }

    /// Run `f` against the metadata for `id`, if any. The borrow is scoped
    /// to the closure and must not re-enter the registry.
    pub fn with_meta<R>(&self, id: usize, f: impl FnOnce(&Meta<T, G>) -> R) -> Option<R> {
        let entries = self.entries.borrow();
        let entry = entries.get(&id)?;
        if entry.ctx.strong_count() == 0 {
            return None;
        }
        Some(f(&entry.meta))
    }

    pub fn with_meta_mut<R>(&self, id: usize, f: impl FnOnce(&mut Meta<T, G>) -> R) -> Option<R> {
        let mut entries = self.entries.borrow_mut();
        let entry = entries.get_mut(&id)?;
        if entry.ctx.strong_count() == 0 {
            return None;
        }
        Some(f(&mut entry.meta))
    }

    /// Drop entries whose contexts are gone. A dead entry may hold the
    /// last reference to another context through a pending yielder, so
    /// the scan repeats until no further entry dies. Removed entries are
    /// dropped outside the map borrow: freeing a context unwinds its
    /// stack, which can reach back into the registry.
    pub fn prune(&self) {
        loop {
            let dead: Vec<Entry<T, G>> = {
                let mut entries = self.entries.borrow_mut();
                let ids: Vec<usize> = entries
                    .iter()
                    .filter(|(_, e)| e.ctx.strong_count() == 0)
                    .map(|(id, _)| *id)
                    .collect();
                ids.into_iter().filter_map(|id| entries.remove(&id)).collect()
            };
            if dead.is_empty() {
                break;
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Outcome, Wake};
    use corosensei::Coroutine;
    use std::cell::Cell;
    use std::rc::Rc;

    fn dummy_context() -> Context<i32, &'static str> {
        let coro = Coroutine::new(|_, wake: Wake<i32, &'static str>| -> Outcome<i32, &'static str> {
            match wake {
                Wake::Deliver(values) => Ok(values),
                Wake::Abandon(reason) => Err(RelayError::unroutable(reason)),
            }
        });
        Context::from_inner(Rc::new(ContextInner {
            coro: RefCell::new(coro),
            started: Cell::new(false),
            finished: Cell::new(false),
        }))
    }

    #[test]
    fn register_then_lookup() {
        let registry: Registry<i32, &'static str> = Registry::new();
        let ctx = dummy_context();
        registry.register(&ctx, "worker").unwrap();
        assert!(registry.is_tagged(ctx.id()));
        let tag = registry.with_meta(ctx.id(), |m| m.tag).unwrap();
        assert_eq!(tag, "worker");
    }

    #[test]
    fn double_register_refused() {
        let registry: Registry<i32, &'static str> = Registry::new();
        let ctx = dummy_context();
        registry.register(&ctx, "a").unwrap();
        assert_eq!(registry.register(&ctx, "b"), Err(RelayError::AlreadyTagged));
    }

    #[test]
    fn dead_entries_are_invisible_and_prunable() {
        let registry: Registry<i32, &'static str> = Registry::new();
        let id = {
            let ctx = dummy_context();
            registry.register(&ctx, "gone").unwrap();
            ctx.id()
        };
        assert!(!registry.is_tagged(id));
        assert!(registry.with_meta(id, |m| m.tag).is_none());
        assert_eq!(registry.len(), 1);
        registry.prune();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn prune_cascades_through_pending_yielders() {
        let registry: Registry<i32, &'static str> = Registry::new();
        let outer = dummy_context();
        let inner = dummy_context();
        registry.register(&outer, "outer").unwrap();
        registry.register(&inner, "inner").unwrap();
        registry
            .with_meta_mut(outer.id(), |m| m.yielder = Some(inner.clone()))
            .unwrap();
        drop(outer);
        drop(inner);
        // The inner context stays alive through the outer entry's yielder,
        // so one scan is not enough.
        registry.prune();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn metadata_mutation_round_trips() {
        let registry: Registry<i32, &'static str> = Registry::new();
        let ctx = dummy_context();
        registry.register(&ctx, "t").unwrap();
        registry
            .with_meta_mut(ctx.id(), |m| m.stacked = true)
            .unwrap();
        assert_eq!(registry.with_meta(ctx.id(), |m| m.stacked), Some(true));
    }
}
