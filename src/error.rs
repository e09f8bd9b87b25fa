//! Rejection causes carried by a promise.
//!
//! Every way a promise can fail is a variant of [`Error`]. The fieldless
//! [`ErrorKind`] tag is what recovery and retry predicates match on.
use std::{error::Error as StdError, fmt, sync::Arc, time::Duration};

/// Why a promise was rejected, or why a blocking accessor gave up.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The user supplied computation failed. The original error is kept as is.
    #[error("{0}")]
    Failed(Arc<dyn StdError + Send + Sync + 'static>),
    /// A `timeout` deadline or a bounded `get` elapsed first.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The promise was cancelled, or a cancellation had to be reported as a failure.
    #[error("cancelled{}", reason_suffix(.reason))]
    Cancelled { reason: Option<String> },
    /// Several inputs of a combinator failed.
    #[error(transparent)]
    Aggregate(AggregateError),
    /// `filter` rejected the value and no error supplier was given.
    #[error("predicate failed")]
    PredicateFailed,
    /// A user callable panicked while the promise was being settled.
    #[error("callback panicked: {0}")]
    Panicked(String),
    /// `any` or `race` was handed no promises at all.
    #[error("no promises to settle")]
    EmptyInput,
    /// Every [`Deferred`](crate::Deferred) handle was dropped while the
    /// promise was still pending, e.g. when its engine shut down.
    #[error("deferred dropped before settling")]
    DeferredDropped,
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

/// The category of an [`Error`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Computation,
    Timeout,
    Cancelled,
    Aggregate,
    PredicateFailed,
    Panicked,
    EmptyInput,
    DeferredDropped,
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

impl Error {
    /// Wraps an arbitrary error raised by a computation.
    pub fn failed<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(err))
    }

    /// A computation error that is only a message.
    pub fn msg(text: impl Into<String>) -> Self {
        Self::Failed(Arc::new(Message(text.into())))
    }

    pub fn cancelled(reason: Option<String>) -> Self {
        Self::Cancelled { reason }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Failed(_) => ErrorKind::Computation,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Aggregate(_) => ErrorKind::Aggregate,
            Self::PredicateFailed => ErrorKind::PredicateFailed,
            Self::Panicked(_) => ErrorKind::Panicked,
            Self::EmptyInput => ErrorKind::EmptyInput,
            Self::DeferredDropped => ErrorKind::DeferredDropped,
        }
    }

    /// Looks through a computation error at its concrete type.
    ///
    /// Returns `None` for every other variant.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Failed(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl PartialEq for Error {
    /// Computation errors are equal when they share the same underlying error
    /// object; everything else compares by value.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Failed(a), Self::Failed(b)) => Arc::ptr_eq(a, b),
            (Self::Timeout(a), Self::Timeout(b)) => a == b,
            (Self::Cancelled { reason: a }, Self::Cancelled { reason: b }) => a == b,
            (Self::Aggregate(a), Self::Aggregate(b)) => a.errors == b.errors,
            (Self::Panicked(a), Self::Panicked(b)) => a == b,
            (Self::PredicateFailed, Self::PredicateFailed)
            | (Self::EmptyInput, Self::EmptyInput)
            | (Self::DeferredDropped, Self::DeferredDropped) => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::failed(err)
    }
}

/// A non-empty list of errors reported together by `any` or `all_aggregate`.
#[derive(Debug, Clone)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    const SHOWN: usize = 3;

    /// Returns `None` when `errors` is empty.
    pub fn new(errors: Vec<Error>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Never true for a constructed aggregate.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn first(&self) -> &Error {
        &self.errors[0]
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors: [", self.errors.len())?;
        for (i, err) in self.errors.iter().take(Self::SHOWN).enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        f.write_str("]")?;
        if self.errors.len() > Self::SHOWN {
            write!(f, " (and {} more)", self.errors.len() - Self::SHOWN)?;
        }
        Ok(())
    }
}

impl StdError for AggregateError {}
