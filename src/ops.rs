//! Operators deriving one promise from another.
//!
//! Each operator returns a fresh promise wired to observe its source. User
//! callables run on whichever thread settles the source; a panic inside one
//! becomes [`Error::Panicked`] on the derived promise.
use std::{
    error::Error as StdError,
    panic::{catch_unwind, AssertUnwindSafe},
};

use tracing::warn;

use crate::{cell::panic_message, Deferred, Error, ErrorKind, Outcome, Promise};

pub(crate) fn guard<R>(f: impl FnOnce() -> R) -> Result<R, Error> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| Error::Panicked(panic_message(payload.as_ref())))
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    fn derive<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&Outcome<T>, &Deferred<U>) + Send + 'static,
    {
        let (deferred, derived) = Promise::defer();
        self.on_complete(move |outcome| f(outcome, &deferred));
        derived
    }

    /// Transforms a successful value. Failure and cancellation pass through.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Like [`Promise::map`] for a callable that may fail.
    pub fn try_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        self.derive(move |outcome, deferred| match outcome.clone().forward() {
            Ok(other) => {
                deferred.complete(other);
            }
            Err(value) => {
                deferred.complete(guard(|| f(value)).and_then(|r| r).into());
            }
        })
    }

    /// Sequences dependent asynchronous work: the derived promise adopts the
    /// outcome of the promise `f` returns.
    pub fn flat_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.derive(move |outcome, deferred| match outcome.clone().forward() {
            Ok(other) => {
                deferred.complete(other);
            }
            Err(value) => match guard(|| f(value)) {
                Ok(next) => deferred.complete_with(&next),
                Err(err) => {
                    deferred.reject(err);
                }
            },
        })
    }

    /// Alias of [`Promise::flat_map`].
    pub fn then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.flat_map(f)
    }

    /// Runs `f` on success for its side effect only.
    pub fn tap<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.derive(move |outcome, deferred| {
            if let Outcome::Fulfilled(value) = outcome {
                if let Err(err) = guard(|| f(value)) {
                    warn!(error = %err, "tap callback failed, value passed through");
                }
            }
            deferred.complete(outcome.clone());
        })
    }

    /// Keeps a successful value only if `predicate` holds, otherwise rejects
    /// with [`Error::PredicateFailed`].
    pub fn filter<P>(&self, predicate: P) -> Promise<T>
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.filter_or(predicate, |_| Error::PredicateFailed)
    }

    /// Like [`Promise::filter`] with a custom rejection.
    pub fn filter_or<P, E>(&self, predicate: P, error: E) -> Promise<T>
    where
        P: FnOnce(&T) -> bool + Send + 'static,
        E: FnOnce(&T) -> Error + Send + 'static,
    {
        self.derive(move |outcome, deferred| {
            let Outcome::Fulfilled(value) = outcome else {
                deferred.complete(outcome.clone());
                return;
            };
            let verdict = guard(|| {
                if predicate(value) {
                    Ok(value.clone())
                } else {
                    Err(error(value))
                }
            });
            deferred.complete(verdict.and_then(|r| r).into());
        })
    }

    /// Replaces a rejection with a value computed from the error.
    /// Cancellation is not a rejection and passes through.
    pub fn recover<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        self.derive(move |outcome, deferred| match outcome {
            Outcome::Rejected(err) => {
                let err = err.clone();
                deferred.complete(guard(|| f(err)).into());
            }
            other => {
                deferred.complete(other.clone());
            }
        })
    }

    /// Replaces a rejection with the outcome of another promise.
    pub fn recover_with<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Promise<T> + Send + 'static,
    {
        self.derive(move |outcome, deferred| match outcome {
            Outcome::Rejected(err) => {
                let err = err.clone();
                match guard(|| f(err)) {
                    Ok(next) => deferred.complete_with(&next),
                    Err(err) => {
                        deferred.reject(err);
                    }
                }
            }
            other => {
                deferred.complete(other.clone());
            }
        })
    }

    /// Recovers only rejections of the given kind; anything else propagates.
    pub fn catch_error<F>(&self, kind: ErrorKind, handler: F) -> Promise<T>
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        self.derive(move |outcome, deferred| match outcome {
            Outcome::Rejected(err) if err.kind() == kind => {
                let err = err.clone();
                deferred.complete(guard(|| handler(err)).into());
            }
            other => {
                deferred.complete(other.clone());
            }
        })
    }

    /// Recovers only computation errors whose underlying type is `E`, as
    /// seen through [`Error::downcast_ref`].
    pub fn catch_error_as<E, F>(&self, handler: F) -> Promise<T>
    where
        E: StdError + 'static,
        F: FnOnce(&E) -> T + Send + 'static,
    {
        self.derive(move |outcome, deferred| {
            match outcome {
                Outcome::Rejected(err) => {
                    if let Some(cause) = err.downcast_ref::<E>() {
                        deferred.complete(guard(|| handler(cause)).into());
                        return;
                    }
                }
                Outcome::Fulfilled(_) | Outcome::Cancelled(_) => {}
            }
            deferred.complete(outcome.clone());
        })
    }

    /// Transforms the error of a rejection.
    pub fn map_error<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        self.derive(move |outcome, deferred| match outcome {
            Outcome::Rejected(err) => {
                let err = err.clone();
                deferred.reject(guard(|| f(err)).unwrap_or_else(|panicked| panicked));
            }
            other => {
                deferred.complete(other.clone());
            }
        })
    }

    /// Runs `action` once the source settles, whatever the outcome, then
    /// settles the derived promise identically.
    pub fn finally_do<F>(&self, action: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.derive(move |outcome, deferred| {
            if let Err(err) = guard(action) {
                warn!(error = %err, "finally action failed, outcome unchanged");
            }
            deferred.complete(outcome.clone());
        })
    }
}
