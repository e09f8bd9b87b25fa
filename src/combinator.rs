//! Fan-in combinators over a list of promises.
//!
//! Every combinator drives one shared [`Deferred`]. Its exactly-once
//! completion is the claim: only the first qualifying event settles the
//! result, and the winner then cancels every peer. Cancelling a peer that has
//! already settled does nothing.
//!
//! | combinator        | settles when                     | failure reported as          |
//! |-------------------|----------------------------------|------------------------------|
//! | [`all`]           | all succeed, or first failure    | that failure                 |
//! | [`all_aggregate`] | every input settled              | [`AggregateError`] of all    |
//! | [`any`]           | first success, or all failed     | [`AggregateError`] of all    |
//! | [`race`]          | first input settles              | that input's outcome         |
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, OnceLock, PoisonError, Weak,
};

use tracing::debug;

use crate::{cell::Cell, AggregateError, Deferred, Error, Outcome, Promise};

/// Weak links to every input. A pending input is kept alive by its own
/// deferred, so nothing here needs to own it.
type Peers<T> = Arc<[Weak<Cell<T>>]>;

fn downgrade_all<T>(inputs: &[Promise<T>]) -> Peers<T> {
    inputs.iter().map(|input| Arc::downgrade(&input.cell)).collect()
}

fn cancel_all<T: Send + Sync + 'static>(peers: &[Weak<Cell<T>>]) {
    for cell in peers.iter().filter_map(Weak::upgrade) {
        cell.complete(Outcome::Cancelled(None));
    }
}

/// Cancelling the combined promise cancels every input.
fn cancel_inputs_with<T, U>(result: &Promise<U>, peers: &Peers<T>)
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    let peers = peers.clone();
    result.on_cancelled(move |_| cancel_all(&peers));
}

fn aggregate(errors: Vec<Error>) -> Error {
    match AggregateError::new(errors) {
        Some(agg) => Error::Aggregate(agg),
        None => Error::EmptyInput,
    }
}

/// Every value in input order, or the first failure.
///
/// On the first rejection or cancellation the result rejects at once and the
/// remaining inputs are cancelled. A cancelled input is reported as
/// [`Error::Cancelled`].
pub fn all<T>(promises: Vec<Promise<T>>) -> Promise<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    match promises.len() {
        0 => return Promise::value(Vec::new()),
        1 => return promises[0].map(|value| vec![value]),
        _ => {}
    }
    let inputs = downgrade_all(&promises);
    let slots: Arc<[OnceLock<T>]> = promises.iter().map(|_| OnceLock::new()).collect();
    let remaining = Arc::new(AtomicUsize::new(promises.len()));
    let (deferred, result): (Deferred<Vec<T>>, _) = Promise::defer();

    for (index, input) in promises.iter().enumerate() {
        let slots = slots.clone();
        let remaining = remaining.clone();
        let peers = inputs.clone();
        let deferred = deferred.clone();
        input.on_complete(move |outcome| match outcome.clone().into_result() {
            Ok(value) => {
                let _ = slots[index].set(value);
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let values = slots.iter().filter_map(|slot| slot.get().cloned()).collect();
                    deferred.resolve(values);
                }
            }
            Err(err) => {
                if deferred.reject(err) {
                    debug!(index, "all: input failed, cancelling peers");
                    cancel_all(&peers);
                }
            }
        });
    }
    cancel_inputs_with(&result, &inputs);
    result
}

/// Every value in input order if all inputs succeed. Otherwise, once every
/// input has settled, an [`AggregateError`] of each failure and cancellation
/// in the order they were observed.
pub fn all_aggregate<T>(promises: Vec<Promise<T>>) -> Promise<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    if promises.is_empty() {
        return Promise::value(Vec::new());
    }
    let inputs = downgrade_all(&promises);
    let slots: Arc<[OnceLock<T>]> = promises.iter().map(|_| OnceLock::new()).collect();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let remaining = Arc::new(AtomicUsize::new(promises.len()));
    let (deferred, result): (Deferred<Vec<T>>, _) = Promise::defer();

    for (index, input) in promises.iter().enumerate() {
        let slots = slots.clone();
        let errors = errors.clone();
        let remaining = remaining.clone();
        let deferred = deferred.clone();
        input.on_complete(move |outcome| {
            match outcome.clone().into_result() {
                Ok(value) => {
                    let _ = slots[index].set(value);
                }
                Err(err) => errors.lock().unwrap_or_else(PoisonError::into_inner).push(err),
            }
            if remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
                return;
            }
            let errors = std::mem::take(&mut *errors.lock().unwrap_or_else(PoisonError::into_inner));
            if errors.is_empty() {
                let values = slots.iter().filter_map(|slot| slot.get().cloned()).collect();
                deferred.resolve(values);
            } else {
                debug!(failed = errors.len(), "all_aggregate: settled with failures");
                deferred.reject(aggregate(errors));
            }
        });
    }
    cancel_inputs_with(&result, &inputs);
    result
}

/// The first successful value. Rejects with an [`AggregateError`] only once
/// every input has failed or been cancelled.
///
/// A single input is returned as is.
pub fn any<T>(promises: Vec<Promise<T>>) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    match promises.len() {
        0 => return Promise::error(Error::EmptyInput),
        1 => return promises[0].clone(),
        _ => {}
    }
    let inputs = downgrade_all(&promises);
    let errors = Arc::new(Mutex::new(Vec::new()));
    let remaining = Arc::new(AtomicUsize::new(promises.len()));
    let (deferred, result) = Promise::defer();

    for (index, input) in promises.iter().enumerate() {
        let errors = errors.clone();
        let remaining = remaining.clone();
        let peers = inputs.clone();
        let deferred = deferred.clone();
        input.on_complete(move |outcome| match outcome.clone().into_result() {
            Ok(value) => {
                if deferred.resolve(value) {
                    debug!(index, "any: input succeeded, cancelling peers");
                    cancel_all(&peers);
                }
            }
            Err(err) => {
                errors.lock().unwrap_or_else(PoisonError::into_inner).push(err);
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let errs = std::mem::take(&mut *errors.lock().unwrap_or_else(PoisonError::into_inner));
                    debug!(failed = errs.len(), "any: every input failed");
                    deferred.reject(aggregate(errs));
                }
            }
        });
    }
    cancel_inputs_with(&result, &inputs);
    result
}

/// Settles exactly like whichever input settles first, success, failure or
/// cancellation, then cancels the rest.
///
/// A single input is returned as is.
pub fn race<T>(promises: Vec<Promise<T>>) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    match promises.len() {
        0 => return Promise::error(Error::EmptyInput),
        1 => return promises[0].clone(),
        _ => {}
    }
    let inputs = downgrade_all(&promises);
    let (deferred, result) = Promise::defer();

    for (index, input) in promises.iter().enumerate() {
        let peers = inputs.clone();
        let deferred = deferred.clone();
        input.on_complete(move |outcome| {
            if deferred.complete(outcome.clone()) {
                debug!(index, state = %outcome.state(), "race: input won, cancelling peers");
                cancel_all(&peers);
            }
        });
    }
    cancel_inputs_with(&result, &inputs);
    result
}
