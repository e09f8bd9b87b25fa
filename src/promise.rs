//! The read side of a single-assignment computation.
//!
//! A [`Promise`] is a cheap, cloneable handle on a completion cell. All
//! clones observe the same outcome. Timers and worker-pool factories live on
//! [`crate::Engine`].
use std::{fmt, sync::Arc, time::Duration};

use crate::{cell::Cell, Deferred, Error, Outcome, State};

/// A value of type `T` that will eventually be fulfilled, rejected or
/// cancelled.
///
/// # Examples
///
/// ```
/// use promise_engine::{Error, Promise};
/// let p = Promise::value(20).map(|v| v + 1).filter(|v| *v > 10);
/// assert_eq!(p.get().unwrap(), 21);
///
/// let recovered = Promise::<i32>::error(Error::msg("boom")).recover(|_| 7);
/// assert_eq!(recovered.get().unwrap(), 7);
/// ```
pub struct Promise<T> {
    pub(crate) cell: Arc<Cell<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(outcome) => f.debug_tuple("Promise").field(outcome).finish(),
            None => f.write_str("Promise(<pending>)"),
        }
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    pub(crate) fn from_cell(cell: Arc<Cell<T>>) -> Self {
        Self { cell }
    }

    fn already(outcome: Outcome<T>) -> Self {
        Self::from_cell(Arc::new(Cell::settled_with(outcome)))
    }

    /// An already fulfilled promise.
    pub fn value(value: T) -> Self {
        Self::already(Outcome::Fulfilled(value))
    }

    /// An already rejected promise.
    pub fn error(err: Error) -> Self {
        Self::already(Outcome::Rejected(err))
    }

    /// An already cancelled promise.
    pub fn cancelled(reason: Option<String>) -> Self {
        Self::already(Outcome::Cancelled(reason))
    }

    /// A pending promise together with the only handle able to settle it.
    pub fn defer() -> (Deferred<T>, Self) {
        Deferred::new()
    }

    pub fn state(&self) -> State {
        self.cell.get().map_or(State::Pending, Outcome::state)
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    pub fn is_fulfilled(&self) -> bool {
        self.state() == State::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == State::Rejected
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == State::Cancelled
    }

    /// Cancels this promise. Work already running elsewhere is not
    /// interrupted; it only finds its result ignored.
    ///
    /// Returns whether this call changed the state.
    pub fn cancel(&self) -> bool {
        self.cell.complete(Outcome::Cancelled(None))
    }

    pub fn cancel_with(&self, reason: impl Into<String>) -> bool {
        self.cell.complete(Outcome::Cancelled(Some(reason.into())))
    }

    pub fn on_complete<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.cell.observe(Box::new(f));
        self
    }

    pub fn on_success<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_complete(move |outcome| {
            if let Outcome::Fulfilled(value) = outcome {
                f(value);
            }
        })
    }

    pub fn on_error<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        self.on_complete(move |outcome| {
            if let Outcome::Rejected(err) = outcome {
                f(err);
            }
        })
    }

    pub fn on_cancelled<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Option<&str>) + Send + 'static,
    {
        self.on_complete(move |outcome| {
            if let Outcome::Cancelled(reason) = outcome {
                f(reason.as_deref());
            }
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// The outcome, if already fixed. Never blocks.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.cell.get().cloned()
    }

    /// Blocks the calling thread until the promise settles.
    ///
    /// A rejection is returned as the original error; a cancellation as
    /// [`Error::Cancelled`].
    pub fn get(&self) -> Result<T, Error> {
        self.cell.wait().clone().into_result()
    }

    /// Like [`Promise::get`], but returns [`Error::Timeout`] if the promise is
    /// still pending after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, Error> {
        match self.cell.wait_timeout(timeout) {
            Some(outcome) => outcome.clone().into_result(),
            None => Err(Error::Timeout(timeout)),
        }
    }

    /// The value if the promise has already fulfilled, otherwise `T::default()`.
    pub fn get_or_default(&self) -> T
    where
        T: Default,
    {
        self.get_or_else(T::default)
    }

    /// The value if the promise has already fulfilled, otherwise `fallback()`.
    pub fn get_or_else<F>(&self, fallback: F) -> T
    where
        F: FnOnce() -> T,
    {
        match self.cell.get() {
            Some(Outcome::Fulfilled(value)) => value.clone(),
            _ => fallback(),
        }
    }
}
