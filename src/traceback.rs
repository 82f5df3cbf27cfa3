//! Human-readable tracebacks across the parent chain.
//!
//! Each context keeps a small log of the call sites that entered it (body
//! entry, yields, nested resumes), captured with `#[track_caller]`. A
//! traceback walks from an inner context up its parent links to the root,
//! printing each hop's frames innermost first, with long logs elided in the
//! middle.

use std::fmt::Write as _;
use std::panic::Location;

use crate::context::Context;
use crate::error::TracebackError;
use crate::registry::Parent;
use crate::relay::{Relay, Tag};

/// One recorded call site inside a context's frame log.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TraceFrame {
    pub location: &'static Location<'static>,
    /// What the call site was doing: "coroutine body", "yield", "resume",
    /// "call".
    pub op: &'static str,
}

impl TraceFrame {
    #[track_caller]
    pub fn here(op: &'static str) -> Self {
        TraceFrame {
            location: Location::caller(),
            op,
        }
    }
}

enum Hop<T, G> {
    Root,
    Ctx(Context<T, G>),
}

/// Append one hop's frames, innermost first, eliding the middle when the
/// log exceeds `head + tail` lines.
fn emit_frames(out: &mut String, frames: &[TraceFrame], skip: usize, head: usize, tail: usize) {
    let mut lines: Vec<&TraceFrame> = frames.iter().rev().skip(skip).collect();
    if lines.len() > head + tail {
        let cut = lines.split_off(head);
        let kept_tail = &cut[cut.len() - tail..];
        for frame in &lines {
            let _ = write!(
                out,
                "\n\t{}:{}: in {}",
                frame.location.file(),
                frame.location.line(),
                frame.op
            );
        }
        out.push_str("\n\t...");
        for frame in kept_tail {
            let _ = write!(
                out,
                "\n\t{}:{}: in {}",
                frame.location.file(),
                frame.location.line(),
                frame.op
            );
        }
    } else {
        for frame in lines {
            let _ = write!(
                out,
                "\n\t{}:{}: in {}",
                frame.location.file(),
                frame.location.line(),
                frame.op
            );
        }
    }
}

impl<T: 'static, G: Tag> Relay<T, G> {
    /// Compose a traceback from `from` up the parent chain to `to`.
    ///
    /// `to` defaults to the running context (or the root when called from
    /// outside any coroutine); `from` defaults to `to`'s pending yielder if
    /// one is recorded, else `to` itself. `level` skips that many innermost
    /// frames of the first hop.
    pub fn traceback(
        &self,
        to: Option<&Context<T, G>>,
        from: Option<&Context<T, G>>,
        message: Option<&str>,
        level: usize,
    ) -> Result<String, TracebackError> {
        let core = self.core();
        let to_hop: Hop<T, G> = match to {
            Some(ctx) => Hop::Ctx(ctx.clone()),
            None => match core.running() {
                Some(ctx) => Hop::Ctx(ctx),
                None => Hop::Root,
            },
        };
        let start: Hop<T, G> = match from {
            Some(ctx) => Hop::Ctx(ctx.clone()),
            None => match &to_hop {
                Hop::Root => Hop::Root,
                Hop::Ctx(ctx) => {
                    let pending = core
                        .registry
                        .with_meta(ctx.id(), |m| m.yielder.clone())
                        .ok_or(TracebackError::Untagged)?;
                    match pending {
                        Some(yielder) => Hop::Ctx(yielder),
                        None => Hop::Ctx(ctx.clone()),
                    }
                }
            },
        };

        let mut out = String::new();
        if let Some(msg) = message {
            out.push_str(msg);
            out.push('\n');
        }
        out.push_str("stack traceback:");

        let head = core.config.trace_head;
        let tail = core.config.trace_tail;
        let mut hop = start;
        let mut first = true;
        loop {
            match hop {
                Hop::Root => {
                    out.push_str("\n\t[main]");
                    let frames = core.root_frames.borrow();
                    emit_frames(&mut out, &frames, if first { level } else { 0 }, head, tail);
                    return Ok(out);
                }
                Hop::Ctx(ctx) => {
                    let done = matches!(&to_hop, Hop::Ctx(t) if *t == ctx);
                    let (tag, parent, frames) = core
                        .registry
                        .with_meta(ctx.id(), |m| {
                            (m.tag.clone(), m.parent.clone(), m.frames.clone())
                        })
                        .ok_or(TracebackError::Untagged)?;
                    let _ = write!(out, "\n\t[context tagged {:?}]", tag);
                    emit_frames(&mut out, &frames, if first { level } else { 0 }, head, tail);
                    if done {
                        return Ok(out);
                    }
                    hop = match parent {
                        None => return Err(TracebackError::BrokenLink),
                        Some(Parent::Root) => {
                            // Reaching the root before `to` means the chain
                            // does not lead there.
                            if matches!(to_hop, Hop::Ctx(_)) {
                                return Err(TracebackError::BrokenLink);
                            }
                            Hop::Root
                        }
                        Some(Parent::Context(weak)) => match weak.upgrade() {
                            Some(inner) => Hop::Ctx(Context::from_inner(inner)),
                            None => return Err(TracebackError::BrokenLink),
                        },
                    };
                }
            }
            first = false;
        }
    }
}
