use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use weft::{Context, Outcome, Relay, RelayError, Scope, Status, Unroutable, Values};

type Body = Box<dyn FnOnce(&Scope<'_, i64, u32>, Values<i64>) -> Outcome<i64, u32>>;

/// Build a resume chain of contexts tagged `level..=depth`. Every level
/// below `depth` spawns and resumes the next; the innermost yields `target`
/// and each level adds one to whatever cascades back out.
fn chain_body(
    level: u32,
    depth: u32,
    target: u32,
    seed: i64,
    seen: Rc<RefCell<Vec<Context<i64, u32>>>>,
) -> Body {
    Box::new(move |scope, _start| {
        seen.borrow_mut().push(scope.context());
        if level == depth {
            let got = scope.yield_to(target, [seed])?;
            Ok([got[0]].into_iter().collect())
        } else {
            let child = scope.relay().create(
                level + 1,
                chain_body(level + 1, depth, target, seed, Rc::clone(&seen)),
            );
            let got = scope.resume(&child, [0])?;
            Ok([got[0].wrapping_add(1)].into_iter().collect())
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn echo_round_trips_arbitrary_batches(vals in proptest::collection::vec(any::<i64>(), 0..8)) {
        let relay: Relay<i64, u32> = Relay::new();
        let ctx = relay.create(0, |scope, start| {
            let got = scope.yield_to(0, start)?;
            Ok(got)
        });
        let first = relay.resume(&ctx, vals.clone()).unwrap();
        prop_assert_eq!(&first[..], &vals[..]);
        let second = relay.resume(&ctx, vals.clone()).unwrap();
        prop_assert_eq!(&second[..], &vals[..]);
        prop_assert_eq!(relay.status(&ctx), Status::Dead);
    }

    #[test]
    fn deep_chains_route_to_the_top_and_cascade_back(
        depth in 2u32..6,
        seed in any::<i64>(),
        reply in any::<i64>(),
    ) {
        let relay: Relay<i64, u32> = Relay::new();
        let seen: Rc<RefCell<Vec<Context<i64, u32>>>> = Rc::new(RefCell::new(Vec::new()));
        let top = relay.create(1, chain_body(1, depth, 1, seed, Rc::clone(&seen)));

        let first = relay.resume(&top, [0]).unwrap();
        prop_assert_eq!(first[0], seed);

        {
            let seen = seen.borrow();
            prop_assert_eq!(seen.len(), depth as usize);
            prop_assert_eq!(relay.status(&seen[0]), Status::Suspended);
            for ctx in &seen[1..] {
                prop_assert_eq!(relay.status(ctx), Status::Stacked);
            }
        }

        let second = relay.resume(&top, [reply]).unwrap();
        prop_assert_eq!(second[0], reply.wrapping_add(i64::from(depth - 1)));
        for ctx in seen.borrow().iter() {
            prop_assert_eq!(relay.status(ctx), Status::Dead);
        }
    }

    #[test]
    fn missing_tags_always_surface_as_tag_not_found(
        depth in 1u32..4,
        tag in 100u32..1000,
    ) {
        let relay: Relay<i64, u32> = Relay::new();
        let seen: Rc<RefCell<Vec<Context<i64, u32>>>> = Rc::new(RefCell::new(Vec::new()));
        let top = relay.create(1, chain_body(1, depth, tag, 0, Rc::clone(&seen)));

        let err = relay.resume(&top, [0]).unwrap_err();
        match err {
            RelayError::Fault(fault) => prop_assert_eq!(
                fault.kind,
                weft::FaultKind::Unroutable(Unroutable::TagNotFound(tag))
            ),
            other => return Err(TestCaseError::fail(format!("expected fault, got {other:?}"))),
        }
        for ctx in seen.borrow().iter() {
            prop_assert_eq!(relay.status(ctx), Status::Dead);
        }
    }
}
