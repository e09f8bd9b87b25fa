//! Native `Future` views of a promise, for interop with async code.
//!
//! Combinators and operators never go through these; they exist so a
//! promise can be `.await`ed by code outside this crate.
use std::{
    future::{Future, IntoFuture},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use crate::{cell::Cell, Error, Outcome, Promise};

/// Resolves to the full [`Outcome`] of a promise.
///
/// # Examples
///
/// ```
/// use promise_engine::Promise;
/// use futures::executor::block_on;
/// use std::thread;
/// let (deferred, promise) = Promise::<String>::defer();
/// let task1 = thread::spawn(move || block_on(async {
///     println!("Received {:?}", promise.settled().await);
/// }));
/// deferred.resolve("Hi".into());
/// task1.join().expect("The task1 thread has panicked.");
/// ```
pub struct Settled<T> {
    cell: Arc<Cell<T>>,
}

/// Resolves to `Ok(value)` or the error a blocking `get` would return.
pub struct PromiseFuture<T> {
    settled: Settled<T>,
}

impl<T: Clone + Send + Sync + 'static> Future for Settled<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.cell.register_waker(cx.waker()) {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => Poll::Pending,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Future for PromiseFuture<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.settled).poll(cx).map(Outcome::into_result)
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// A future yielding this promise's outcome without collapsing
    /// cancellation into an error.
    pub fn settled(&self) -> Settled<T> {
        Settled {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for Promise<T> {
    type Output = Result<T, Error>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        PromiseFuture {
            settled: self.settled(),
        }
    }
}
