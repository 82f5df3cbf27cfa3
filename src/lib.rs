//! Tagged cooperative-coroutine relay.
//!
//! Coroutines built here yield *to a tag* rather than to whoever resumed
//! them. A yield travels outward through the chain of pending resumes until
//! it reaches a boundary whose context carries the target tag; contexts it
//! passes through are left `stacked` until that relay settles. Resuming the
//! matched context afterwards drives the whole chain again, cascading the
//! new values back down into the original yield.
//!
//! ```
//! use weft::Relay;
//!
//! let relay: Relay<i64, &str> = Relay::new();
//! let counter = relay.create("counter", |scope, start| {
//!     let mut total: i64 = start.iter().sum();
//!     loop {
//!         let got = scope.yield_to("counter", [total])?;
//!         if got.is_empty() {
//!             return Ok([total].into_iter().collect());
//!         }
//!         total += got.iter().sum::<i64>();
//!     }
//! });
//!
//! assert_eq!(&relay.resume(&counter, [1])?[..], &[1]);
//! assert_eq!(&relay.resume(&counter, [2])?[..], &[3]);
//! assert_eq!(&relay.resume(&counter, std::iter::empty())?[..], &[3]);
//! # Ok::<(), weft::RelayError<i64, &str>>(())
//! ```
//!
//! The single-threaded engine lives in [`Relay`]; bodies interact with it
//! through the [`Scope`] they receive. Tags are any `Clone + PartialEq +
//! Debug` type.

mod context;
mod error;
mod registry;
mod relay;
mod scope;
mod tagged;
mod traceback;

pub use context::{Context, Outcome, Status, Values};
pub use error::{Fault, FaultKind, RelayError, TracebackError, Unroutable};
pub use relay::{Relay, RelayBuilder, Tag};
pub use scope::Scope;
pub use tagged::Tagged;
