//! The worker pool and timer that asynchronous promises run on.
//!
//! An [`Engine`] wraps a tokio runtime, either one it owns or one supplied by
//! the host. Blocking computations go to the runtime's blocking pool; sleeps,
//! timeouts, delays and retry backoff are tokio timers, so no thread is parked
//! while waiting.
use std::{fmt, future::Future, io, sync::Arc, sync::OnceLock, time::Duration};

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::info;
use typed_builder::TypedBuilder;

use crate::{ops::guard, CancellationSource, CancellationToken, Deferred, Error, Outcome, Promise};

/// Settings for an engine that owns its runtime.
#[derive(Debug, Clone, TypedBuilder)]
pub struct EngineConfig {
    /// Async worker threads; defaults to one per core.
    #[builder(default, setter(strip_option))]
    pub worker_threads: Option<usize>,
    /// Upper bound on threads running blocking computations.
    #[builder(default, setter(strip_option))]
    pub max_blocking_threads: Option<usize>,
    #[builder(default = "promise-worker".to_string(), setter(into))]
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

// Dropping a runtime from inside one of its own workers panics, and the last
// engine handle may well be dropped there.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Runs computations and timers for promises. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    handle: Handle,
    owned: Option<Arc<OwnedRuntime>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("owns_runtime", &self.owned.is_some())
            .finish()
    }
}

impl Engine {
    /// Builds a multi-threaded runtime owned by this engine and its clones.
    pub fn new(config: EngineConfig) -> io::Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_time().thread_name(config.thread_name.clone());
        if let Some(threads) = config.worker_threads {
            builder.worker_threads(threads);
        }
        if let Some(threads) = config.max_blocking_threads {
            builder.max_blocking_threads(threads);
        }
        let runtime = builder.build()?;
        info!(?config, "promise engine started");
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// Uses a runtime owned by the host application. The runtime must have
    /// its time driver enabled.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            owned: None,
        }
    }

    /// The engine of the tokio runtime the caller is running on, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::from_handle)
    }

    /// A process wide engine for top level call sites. Nothing in this crate
    /// relies on it; pass an explicit [`Engine`] wherever one is at hand.
    ///
    /// # Panics
    ///
    /// If the default runtime cannot be built on first use.
    pub fn global() -> &'static Engine {
        static GLOBAL: OnceLock<Engine> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            Engine::new(EngineConfig::default()).expect("failed to start the default promise engine")
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Runs `supplier` on the worker pool. If the promise is cancelled before
    /// the computation starts it never runs.
    pub fn spawn<T, F>(&self, supplier: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T, Error> + Send + 'static,
    {
        let (deferred, promise) = Promise::defer();
        self.handle.spawn_blocking(move || {
            if deferred.is_completed() {
                return;
            }
            deferred.complete(guard(supplier).and_then(|r| r).into());
        });
        promise
    }

    /// Like [`Engine::spawn`], handing the computation a token that is
    /// cancelled when the promise is. The computation decides when to look.
    pub fn spawn_with_token<T, F>(&self, computation: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&CancellationToken) -> Result<T, Error> + Send + 'static,
    {
        let source = CancellationSource::new();
        let token = source.token();
        let promise = self.spawn(move || computation(&token));
        promise.on_cancelled(move |reason| {
            match reason {
                Some(reason) => source.cancel_with(reason),
                None => source.cancel(),
            };
        });
        promise
    }

    /// Drives `future` on the runtime. Cancelling the promise aborts the task
    /// at its next await point.
    pub fn from_future<T, F>(&self, future: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let (deferred, promise) = Promise::defer();
        let task = self.handle.spawn(async move {
            deferred.complete(future.await.into());
        });
        promise.on_cancelled(move |_| task.abort());
        promise
    }

    /// Fulfills with `()` once `duration` has elapsed.
    pub fn sleep(&self, duration: Duration) -> Promise<()> {
        self.from_future(async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }

    /// Settles `deferred` with `outcome` after `duration`, unless the
    /// deferred settles first.
    fn complete_after<T>(&self, duration: Duration, deferred: Deferred<T>, outcome: Outcome<T>)
    where
        T: Send + Sync + 'static,
    {
        let timer = deferred.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(duration).await;
            timer.complete(outcome);
        });
        deferred.promise().on_complete(move |_| task.abort());
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Rejects with [`Error::Timeout`] if this promise has not settled within
    /// `duration`. The source keeps running; only this consumer stops waiting.
    pub fn timeout(&self, engine: &Engine, duration: Duration) -> Promise<T> {
        let (deferred, derived) = Promise::defer();
        // The source may outlive the derived promise by far; it only keeps a
        // weak link.
        let target = Arc::downgrade(&derived.cell);
        self.on_complete(move |outcome| {
            if let Some(cell) = target.upgrade() {
                cell.complete(outcome.clone());
            }
        });
        if !deferred.is_completed() {
            engine.complete_after(duration, deferred, Outcome::Rejected(Error::Timeout(duration)));
        }
        derived
    }

    /// Holds back a successful value for `duration`. Failure and cancellation
    /// are forwarded at once.
    pub fn delay(&self, engine: &Engine, duration: Duration) -> Promise<T> {
        let (deferred, derived) = Promise::defer();
        let engine = engine.clone();
        self.on_complete(move |outcome| match outcome {
            Outcome::Fulfilled(value) => {
                engine.complete_after(duration, deferred, Outcome::Fulfilled(value.clone()));
            }
            other => {
                deferred.complete(other.clone());
            }
        });
        derived
    }
}

/// [`Engine::spawn`] on the [global](Engine::global) engine.
pub fn spawn<T, F>(supplier: F) -> Promise<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    Engine::global().spawn(supplier)
}

/// [`Engine::sleep`] on the [global](Engine::global) engine.
pub fn sleep(duration: Duration) -> Promise<()> {
    Engine::global().sleep(duration)
}
