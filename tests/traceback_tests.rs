use std::cell::RefCell;
use std::rc::Rc;

use weft::{Context, Relay, TracebackError};

fn one(v: i32) -> weft::Values<i32> {
    [v].into_iter().collect()
}

#[test]
fn root_traceback_with_message() {
    let relay: Relay<i32, &str> = Relay::new();
    let out = relay
        .traceback(None, None, Some("something failed"), 0)
        .unwrap();
    assert_eq!(out, "something failed\nstack traceback:\n\t[main]");
}

#[test]
fn in_body_traceback_names_the_running_context() {
    let relay: Relay<i32, &str> = Relay::new();
    let ctx = relay.create("t", |scope, _start| {
        let out = scope.relay().traceback(None, None, None, 0).unwrap();
        assert!(out.starts_with("stack traceback:"));
        assert!(out.contains("[context tagged \"t\"]"));
        assert!(out.contains("in coroutine body"));
        Ok(one(0))
    });
    relay.resume(&ctx, [0]).unwrap();
}

#[test]
fn traceback_spans_the_relay_chain_innermost_first() {
    let relay: Relay<i32, &str> = Relay::new();
    let outer = relay.create("out", |scope, _start| {
        let mid = scope.relay().create("mid", |inner, _start| {
            let got = inner.yield_to("out", [1])?;
            Ok(got)
        });
        let out = scope.resume(&mid, [0])?;
        Ok(out)
    });

    relay.resume(&outer, [0]).unwrap();
    // outer's pending yielder is mid, so the default traceback starts there.
    let out = relay.traceback(Some(&outer), None, None, 0).unwrap();
    let mid_at = out.find("[context tagged \"mid\"]").unwrap();
    let outer_at = out.find("[context tagged \"out\"]").unwrap();
    assert!(mid_at < outer_at);
    assert!(out.contains("in yield"));
    assert!(out.contains("in resume"));
    assert_eq!(out.matches("in coroutine body").count(), 2);
}

#[test]
fn three_hop_traceback_lists_pass_through_contexts() {
    let relay: Relay<i32, &str> = Relay::new();
    let a = relay.create("a", |scope_a, _start| {
        let b = scope_a.relay().create("b", |scope_b, _start| {
            let c = scope_b.relay().create("c", |scope_c, _start| {
                let got = scope_c.yield_to("a", [10])?;
                Ok(one(got[0]))
            });
            let got = scope_b.resume(&c, [0])?;
            Ok(one(got[0] + 1))
        });
        let got = scope_a.resume(&b, [0])?;
        Ok(one(got[0] + 1))
    });

    assert_eq!(&relay.resume(&a, [10]).unwrap()[..], &[10]);

    // b is neither the yielder nor the target, just a hop in between.
    let out = relay.traceback(Some(&a), None, None, 0).unwrap();
    let c_at = out.find("[context tagged \"c\"]").unwrap();
    let b_at = out.find("[context tagged \"b\"]").unwrap();
    let a_at = out.find("[context tagged \"a\"]").unwrap();
    assert!(c_at < b_at && b_at < a_at);
    assert!(!out.contains("\n\t..."));

    assert_eq!(&relay.resume(&a, [5]).unwrap()[..], &[7]);
}

#[test]
fn panicked_body_leaves_no_stale_frames() {
    let relay: Relay<i32, &str> = Relay::new();
    let ctx = relay.create("t", |_scope, _start| -> weft::Outcome<i32, &str> {
        panic!("boom")
    });
    let _ = relay.resume(&ctx, [0]);

    let out = relay.traceback(Some(&ctx), Some(&ctx), None, 0).unwrap();
    assert!(out.contains("[context tagged \"t\"]"));
    assert!(!out.contains("in coroutine body"));
}

#[test]
fn level_skips_innermost_frames() {
    let relay: Relay<i32, &str> = Relay::new();
    let ctx = relay.create("t", |scope, _start| {
        let full = scope.relay().traceback(None, None, None, 0).unwrap();
        let skipped = scope.relay().traceback(None, None, None, 1).unwrap();
        assert!(full.len() > skipped.len());
        Ok(one(0))
    });
    relay.resume(&ctx, [0]).unwrap();
}

#[test]
fn untagged_context_is_rejected() {
    let relay: Relay<i32, &str> = Relay::new();
    let bare = relay.spawn(|_scope, start| Ok(start));
    let err = relay.traceback(Some(&bare), None, None, 0).unwrap_err();
    assert_eq!(err, TracebackError::Untagged);
}

#[test]
fn unrelated_contexts_break_the_chain() {
    let relay: Relay<i32, &str> = Relay::new();
    let a = relay.create("a", |_scope, start| Ok(start));
    let b = relay.create("b", |_scope, start| Ok(start));
    // b has never been resumed; it has no parent link toward a.
    let err = relay.traceback(Some(&a), Some(&b), None, 0).unwrap_err();
    assert_eq!(err, TracebackError::BrokenLink);
}

#[test]
fn dropped_parent_breaks_the_chain() {
    let relay: Relay<i32, &str> = Relay::new();
    let inner_cell: Rc<RefCell<Option<Context<i32, &str>>>> = Rc::new(RefCell::new(None));
    let cell = Rc::clone(&inner_cell);
    {
        let outer = relay.create("out", move |scope, _start| {
            let mid = scope.relay().create("mid", |inner, _start| {
                let got = inner.yield_to("out", [1])?;
                Ok(got)
            });
            *cell.borrow_mut() = Some(mid.clone());
            let out = scope.resume(&mid, [0])?;
            Ok(out)
        });
        relay.resume(&outer, [0]).unwrap();
    }
    // outer is gone; walking upward from mid cannot reach it.
    let mid = inner_cell.borrow().clone().unwrap();
    let anchor = relay.create("anchor", |_scope, start| Ok(start));
    let err = relay
        .traceback(Some(&anchor), Some(&mid), None, 0)
        .unwrap_err();
    assert_eq!(err, TracebackError::BrokenLink);
}
