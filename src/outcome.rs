use std::fmt;

use crate::Error;

/// The terminal value of a promise.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Fulfilled(T),
    Rejected(Error),
    Cancelled(Option<String>),
}

/// Where a promise is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn state(&self) -> State {
        match self {
            Self::Fulfilled(_) => State::Fulfilled,
            Self::Rejected(_) => State::Rejected,
            Self::Cancelled(_) => State::Cancelled,
        }
    }

    /// Collapses the outcome into a `Result`, turning cancellation into
    /// [`Error::Cancelled`].
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Self::Fulfilled(value) => Ok(value),
            Self::Rejected(err) => Err(err),
            Self::Cancelled(reason) => Err(Error::cancelled(reason)),
        }
    }

    /// The failure cause, if this outcome is not a success.
    pub fn error(&self) -> Option<Error> {
        match self {
            Self::Fulfilled(_) => None,
            Self::Rejected(err) => Some(err.clone()),
            Self::Cancelled(reason) => Some(Error::cancelled(reason.clone())),
        }
    }

    /// Rebuilds a non-success outcome for another value type.
    ///
    /// Returns the value back in `Err` when the outcome is a success.
    pub(crate) fn forward<U>(self) -> Result<Outcome<U>, T> {
        match self {
            Self::Fulfilled(value) => Err(value),
            Self::Rejected(err) => Ok(Outcome::Rejected(err)),
            Self::Cancelled(reason) => Ok(Outcome::Cancelled(reason)),
        }
    }
}

impl<T> From<Result<T, Error>> for Outcome<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => Self::Fulfilled(value),
            Err(err) => Self::Rejected(err),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Fulfilled => "fulfilled",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
