//! Single-assignment promises for thread-pool based code.
//!
//! A [`Promise`] settles exactly once: fulfilled with a value, rejected with
//! an [`Error`], or cancelled. The only ways to settle one are its
//! [`Deferred`] or its own `cancel`, and only the first attempt wins.
//!
//! On top of that sit
//! - operators deriving new promises (`map`, `flat_map`, `recover`, ...),
//! - timers and the worker pool on an [`Engine`] (`spawn`, `sleep`,
//!   `timeout`, `delay`, `retry`),
//! - fan-in [`combinator`]s ([`all`], [`all_aggregate`], [`any`], [`race`]),
//! - cooperative cancellation through [`CancellationSource`] and
//!   [`CancellationToken`].
//!
//! # Examples
//!
//! ```
//! use promise_engine::{all, Backoff, Engine, EngineConfig, Error, RetryPolicy};
//! use std::time::Duration;
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let doubled = engine.spawn(|| Ok(21)).map(|v| v * 2);
//! let slow = engine.sleep(Duration::from_millis(10)).map(|_| 1);
//! assert_eq!(all(vec![doubled, slow]).get().unwrap(), vec![42, 1]);
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(2)
//!     .backoff(Backoff::fixed(Duration::from_millis(1)))
//!     .build();
//! let flaky = engine.spawn_retry(policy, || Err::<u8, _>(Error::msg("down")));
//! assert_eq!(flaky.get().unwrap_err().to_string(), "down");
//! ```
mod backoff;
mod cancel;
mod cell;
pub mod combinator;
mod deferred;
mod engine;
mod error;
mod future;
mod ops;
mod outcome;
mod promise;
mod retry;

pub use backoff::Backoff;
pub use cancel::{CancellationSource, CancellationToken};
pub use combinator::{all, all_aggregate, any, race};
pub use deferred::Deferred;
pub use engine::{sleep, spawn, Engine, EngineConfig};
pub use error::{AggregateError, Error, ErrorKind};
pub use future::{PromiseFuture, Settled};
pub use outcome::{Outcome, State};
pub use promise::Promise;
pub use retry::{RetryPolicy, RetryPredicate};
