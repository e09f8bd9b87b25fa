//! Re-running a failed operation under a [`RetryPolicy`].
//!
//! Attempt 1 is the first execution. After each failure the policy decides
//! whether another attempt is allowed and how long to wait first; nothing is
//! waited before attempt 1.
use std::{fmt, sync::Arc, time::Duration};

use tracing::debug;
use typed_builder::TypedBuilder;

use crate::{ops::guard, Backoff, Engine, Error, ErrorKind, Outcome, Promise};

/// Decides whether a given error is worth another attempt.
#[derive(Clone, Default)]
pub enum RetryPredicate {
    #[default]
    Always,
    Kinds(Vec<ErrorKind>),
    Custom(Arc<dyn Fn(&Error) -> bool + Send + Sync + 'static>),
}

impl RetryPredicate {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn matches(&self, err: &Error) -> bool {
        match self {
            Self::Always => true,
            Self::Kinds(kinds) => kinds.contains(&err.kind()),
            Self::Custom(f) => f(err),
        }
    }
}

impl From<ErrorKind> for RetryPredicate {
    fn from(kind: ErrorKind) -> Self {
        Self::Kinds(vec![kind])
    }
}

impl From<Vec<ErrorKind>> for RetryPredicate {
    fn from(kinds: Vec<ErrorKind>) -> Self {
        Self::Kinds(kinds)
    }
}

impl fmt::Debug for RetryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// How many times to run an operation and how long to wait in between.
///
/// Built once and never modified afterwards.
///
/// ```
/// use promise_engine::{Backoff, ErrorKind, RetryPolicy};
/// use std::time::Duration;
/// let policy = RetryPolicy::builder()
///     .max_attempts(5)
///     .backoff(Backoff::exponential(Duration::from_millis(10), 2.0).with_jitter())
///     .retry_on(ErrorKind::Timeout)
///     .build();
/// assert_eq!(policy.max_attempts(), 5);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    #[builder(default = 3)]
    max_attempts: u32,
    #[builder(default)]
    backoff: Backoff,
    #[builder(default, setter(into))]
    retry_on: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn should_retry(&self, err: &Error) -> bool {
        self.retry_on.matches(err)
    }

    /// The wait before the next attempt, given that `attempt` just failed
    /// with `err`. `None` means give up and report `err`.
    pub fn next_delay(&self, attempt: u32, err: &Error) -> Option<Duration> {
        if attempt >= self.max_attempts() || !self.should_retry(err) {
            return None;
        }
        Some(self.backoff.delay(attempt))
    }
}

impl Engine {
    /// Runs the operation produced by `op` until it succeeds or `policy`
    /// gives up, in which case the last failure is reported.
    ///
    /// Cancelling the returned promise stops further attempts. A cancelled
    /// attempt is not retried; it cancels the result.
    pub fn retry<T, F>(&self, policy: RetryPolicy, mut op: F) -> Promise<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Promise<T> + Send + 'static,
    {
        let (driver, promise) = Promise::defer();
        let task = self.handle().spawn(async move {
            let mut attempt = 1;
            loop {
                if driver.is_completed() {
                    return;
                }
                let outcome = match guard(&mut op) {
                    Ok(current) => current.settled().await,
                    Err(err) => Outcome::Rejected(err),
                };
                let err = match outcome {
                    Outcome::Rejected(err) => err,
                    other => {
                        driver.complete(other);
                        return;
                    }
                };
                match policy.next_delay(attempt, &err) {
                    Some(wait) => {
                        debug!(attempt, ?wait, error = %err, "attempt failed, retrying");
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                    }
                    None => {
                        debug!(attempt, error = %err, "attempt failed, giving up");
                        driver.reject(err);
                        return;
                    }
                }
            }
        });
        promise.on_complete(move |_| task.abort());
        promise
    }

    /// Like [`Engine::retry`] for a blocking supplier, run on the worker pool
    /// once per attempt.
    pub fn spawn_retry<T, F>(&self, policy: RetryPolicy, supplier: F) -> Promise<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Result<T, Error> + Send + Sync + 'static,
    {
        let engine = self.clone();
        let supplier = Arc::new(supplier);
        self.retry(policy, move || {
            let supplier = supplier.clone();
            engine.spawn(move || (*supplier)())
        })
    }
}
