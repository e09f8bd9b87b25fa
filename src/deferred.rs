use std::{fmt, sync::Arc};

use tracing::debug;

use crate::{cell::Cell, Error, Outcome, Promise};

/// The write side of a [`Promise`].
///
/// Only the first of `resolve`, `reject`, `cancel` or `complete` takes
/// effect; later calls return `false` and change nothing. If the last clone
/// is dropped while the promise is still pending, the promise rejects with
/// [`Error::DeferredDropped`].
///
/// # Examples
///
/// ```
/// use promise_engine::Promise;
/// use std::thread;
/// let (deferred, promise) = Promise::<String>::defer();
/// let task = thread::spawn(move || deferred.resolve("🍓".into()));
/// assert_eq!(promise.get().unwrap(), "🍓");
/// assert!(task.join().expect("The task thread has panicked."));
/// ```
pub struct Deferred<T> {
    cell: Arc<Cell<T>>,
    writer: Arc<Writer>,
}

/// Shared by all clones of one deferred. Dropping the last one abandons the
/// promise.
struct Writer {
    abandon: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Drop for Writer {
    fn drop(&mut self) {
        if let Some(abandon) = self.abandon.take() {
            abandon();
        }
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            writer: self.writer.clone(),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("completed", &self.cell.get().is_some())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Deferred<T> {
    pub(crate) fn new() -> (Self, Promise<T>) {
        let cell = Arc::new(Cell::new());
        let abandoned = cell.clone();
        let writer = Writer {
            abandon: Some(Box::new(move || {
                if abandoned.complete(Outcome::Rejected(Error::DeferredDropped)) {
                    debug!("deferred dropped while its promise was pending");
                }
            })),
        };
        (
            Self {
                cell: cell.clone(),
                writer: Arc::new(writer),
            },
            Promise::from_cell(cell),
        )
    }

    pub fn resolve(&self, value: T) -> bool {
        self.cell.complete(Outcome::Fulfilled(value))
    }

    pub fn reject(&self, err: Error) -> bool {
        self.cell.complete(Outcome::Rejected(err))
    }

    pub fn cancel(&self) -> bool {
        self.cell.complete(Outcome::Cancelled(None))
    }

    pub fn cancel_with(&self, reason: impl Into<String>) -> bool {
        self.cell.complete(Outcome::Cancelled(Some(reason.into())))
    }

    pub fn complete(&self, outcome: Outcome<T>) -> bool {
        self.cell.complete(outcome)
    }

    pub fn is_completed(&self) -> bool {
        self.cell.get().is_some()
    }

    /// The promise this deferred completes.
    pub fn promise(&self) -> Promise<T> {
        Promise::from_cell(self.cell.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> Deferred<T> {
    /// Settles this deferred with whatever `other` settles with.
    pub fn complete_with(&self, other: &Promise<T>) {
        let this = self.clone();
        other.on_complete(move |outcome| {
            this.complete(outcome.clone());
        });
    }
}
