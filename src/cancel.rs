//! Cooperative cancellation.
//!
//! A [`CancellationSource`] owns the right to cancel; the
//! [`CancellationToken`]s handed out from it can only be inspected. A source
//! created with [`CancellationSource::linked`] is cancelled whenever its
//! parent is, never the other way round.
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak},
};

use tracing::trace;

use crate::Error;

type Listener = Box<dyn FnOnce(Option<&str>) + Send + 'static>;

struct Shared {
    // Set exactly once; the stored value is the reason.
    reason: OnceLock<Option<String>>,
    links: Mutex<Links>,
}

#[derive(Default)]
struct Links {
    children: Vec<Weak<Shared>>,
    listeners: Vec<Listener>,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            reason: OnceLock::new(),
            links: Mutex::new(Links::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Links> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel(&self, reason: Option<String>) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        let reason = self.reason.get().and_then(Option::as_deref);
        trace!(reason, "cancellation requested");

        let links = std::mem::take(&mut *self.lock());
        for child in links.children.iter().filter_map(Weak::upgrade) {
            child.cancel(reason.map(str::to_owned));
        }
        for listener in links.listeners {
            listener(reason);
        }
        true
    }
}

/// Read-only view of a cancellation flag.
#[derive(Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.shared.reason.get().is_some()
    }

    /// The reason given when the token was cancelled, if any.
    pub fn reason(&self) -> Option<String> {
        self.shared.reason.get().cloned().flatten()
    }

    /// `Err(Error::Cancelled)` once cancelled, for `?`-style checkpoints in
    /// long running computations.
    pub fn check(&self) -> Result<(), Error> {
        match self.shared.reason.get() {
            Some(reason) => Err(Error::cancelled(reason.clone())),
            None => Ok(()),
        }
    }

    /// Calls `f` once when the token is cancelled, or right away if it
    /// already is.
    pub fn on_cancel<F>(&self, f: F)
    where
        F: FnOnce(Option<&str>) + Send + 'static,
    {
        let mut links = self.shared.lock();
        match self.shared.reason.get() {
            Some(reason) => {
                drop(links);
                f(reason.as_deref());
            }
            None => links.listeners.push(Box::new(f)),
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

/// The owner of a [`CancellationToken`].
#[derive(Debug)]
pub struct CancellationSource {
    token: CancellationToken,
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            token: CancellationToken {
                shared: Shared::new(),
            },
        }
    }

    /// A source that is cancelled, with the parent's reason, when `parent` is.
    pub fn linked(parent: &CancellationToken) -> Self {
        let child = Self::new();
        let mut links = parent.shared.lock();
        match parent.shared.reason.get() {
            Some(reason) => {
                drop(links);
                child.token.shared.cancel(reason.clone());
            }
            None => {
                links.children.retain(|c| c.strong_count() > 0);
                links.children.push(Arc::downgrade(&child.token.shared));
            }
        }
        child
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels the token and every linked descendant. Only the first call
    /// has any effect; its return value is `true`.
    pub fn cancel(&self) -> bool {
        self.token.shared.cancel(None)
    }

    pub fn cancel_with(&self, reason: impl Into<String>) -> bool {
        self.token.shared.cancel(Some(reason.into()))
    }
}
