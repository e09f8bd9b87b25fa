//! The completion cell shared by a promise, its deferred, and every observer.
//!
//! The outcome slot is claimed exactly once through `OnceLock::set`. The
//! mutex only guards the observer and waker lists, never the outcome, and is
//! never held while user code runs.
//!
//! Observers never run nested inside another observer. A thread that is
//! already running observers queues newly due ones and runs them after the
//! current one returns, so settling a chain of derived promises of any
//! length uses constant stack.
use std::{
    cell::RefCell,
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError},
    task::Waker,
    time::{Duration, Instant},
};

use tracing::{trace, warn};

use crate::Outcome;

pub(crate) type Observer<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

type Job = Box<dyn FnOnce()>;

thread_local! {
    // `Some` while this thread is draining observer jobs.
    static QUEUE: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

pub(crate) struct Cell<T> {
    outcome: OnceLock<Outcome<T>>,
    inner: Mutex<Inner<T>>,
    settled: Condvar,
}

struct Inner<T> {
    observers: Vec<Observer<T>>,
    // One entry per pending poll site; `will_wake` keeps re-polls from piling up.
    wakers: Vec<Waker>,
}

impl<T> Cell<T> {
    pub(crate) fn new() -> Self {
        Self {
            outcome: OnceLock::new(),
            inner: Mutex::new(Inner {
                observers: vec![],
                wakers: vec![],
            }),
            settled: Condvar::new(),
        }
    }

    pub(crate) fn settled_with(outcome: Outcome<T>) -> Self {
        let cell = Self::new();
        let _ = cell.outcome.set(outcome);
        cell
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self) -> Option<&Outcome<T>> {
        self.outcome.get()
    }

    /// Registers `waker` unless the outcome is already fixed, in which case
    /// the outcome is returned and nothing is stored.
    pub(crate) fn register_waker(&self, waker: &Waker) -> Option<&Outcome<T>> {
        let mut inner = self.lock();
        if let Some(outcome) = self.outcome.get() {
            return Some(outcome);
        }
        if !inner.wakers.iter().any(|w| w.will_wake(waker)) {
            inner.wakers.push(waker.clone());
        }
        None
    }

    /// Blocks the calling thread until the outcome is fixed.
    pub(crate) fn wait(&self) -> &Outcome<T> {
        run_queued_until(|| self.outcome.get().is_some());
        let mut inner = self.lock();
        loop {
            if let Some(outcome) = self.outcome.get() {
                return outcome;
            }
            inner = self
                .settled
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`Cell::wait`] but gives up after `timeout`.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<&Outcome<T>> {
        let deadline = Instant::now() + timeout;
        run_queued_until(|| self.outcome.get().is_some());
        let mut inner = self.lock();
        loop {
            if let Some(outcome) = self.outcome.get() {
                return Some(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            inner = self
                .settled
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn notify(&self, observers: Vec<Observer<T>>) {
        if let Some(outcome) = self.outcome.get() {
            for observer in observers {
                run_observer(observer, outcome);
            }
        }
    }
}

impl<T: Send + Sync + 'static> Cell<T> {
    /// Fixes the outcome if nobody has yet. Returns whether this call won.
    ///
    /// Blocked readers and wakers are released before this returns. Observers
    /// have run by then too, unless this thread is already running observers,
    /// in which case they run right after the current one.
    pub(crate) fn complete(self: &Arc<Self>, outcome: Outcome<T>) -> bool {
        let state = outcome.state();
        if self.outcome.set(outcome).is_err() {
            return false;
        }
        trace!(%state, "promise settled");

        let (observers, wakers) = {
            let mut inner = self.lock();
            (
                std::mem::take(&mut inner.observers),
                std::mem::take(&mut inner.wakers),
            )
        };
        self.settled.notify_all();
        for waker in wakers {
            waker.wake();
        }
        if !observers.is_empty() {
            let cell = self.clone();
            schedule(Box::new(move || cell.notify(observers)));
        }
        true
    }

    /// Runs `observer` once the outcome is fixed; right away if it already is.
    pub(crate) fn observe(self: &Arc<Self>, observer: Observer<T>) {
        let mut inner = self.lock();
        if self.outcome.get().is_none() {
            inner.observers.push(observer);
            return;
        }
        drop(inner);
        let cell = self.clone();
        schedule(Box::new(move || cell.notify(vec![observer])));
    }
}

/// Runs `job` now, or queues it behind the job this thread is running.
fn schedule(job: Job) {
    let mut job = Some(job);
    let draining = QUEUE
        .try_with(|queue| {
            let mut queue = queue.borrow_mut();
            match queue.as_mut() {
                Some(pending) => {
                    pending.extend(job.take());
                    false
                }
                None => {
                    *queue = Some(VecDeque::new());
                    true
                }
            }
        })
        .unwrap_or(false);
    let Some(job) = job else {
        return;
    };
    if !draining {
        // thread-local storage already torn down
        job();
        return;
    }
    let _drain = Drain;
    job();
    while let Some(next) = QUEUE
        .try_with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front))
        .ok()
        .flatten()
    {
        next();
    }
}

/// Lets a blocking wait inside an observer run the jobs queued behind it,
/// which may be the very ones that settle what it waits for.
fn run_queued_until(done: impl Fn() -> bool) {
    while !done() {
        let next = QUEUE
            .try_with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front))
            .ok()
            .flatten();
        match next {
            Some(job) => job(),
            None => return,
        }
    }
}

// Leaves draining mode even if a job unwinds.
struct Drain;

impl Drop for Drain {
    fn drop(&mut self) {
        let rest = QUEUE.try_with(|queue| queue.borrow_mut().take());
        drop(rest);
    }
}

fn run_observer<T>(observer: Observer<T>, outcome: &Outcome<T>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(outcome))) {
        warn!(panic = %panic_message(payload.as_ref()), "promise observer panicked");
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    use super::*;
    use crate::Error;

    #[test]
    fn only_first_completion_wins() {
        let cell = Arc::new(Cell::new());
        assert!(cell.complete(Outcome::Fulfilled(1)));
        assert!(!cell.complete(Outcome::Fulfilled(2)));
        assert!(!cell.complete(Outcome::Rejected(Error::msg("late"))));
        assert_eq!(cell.get(), Some(&Outcome::Fulfilled(1)));
    }

    #[test]
    fn concurrent_writers_agree_on_one_winner() {
        let cell = Arc::new(Cell::new());
        let wins = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let cell = cell.clone();
                let wins = wins.clone();
                thread::spawn(move || {
                    if cell.complete(Outcome::Fulfilled(i)) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.join().expect("writer thread panicked");
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observers_fire_once_before_and_after_completion() {
        let cell = Arc::new(Cell::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let early = fired.clone();
        cell.observe(Box::new(move |_: &Outcome<i32>| {
            early.fetch_add(1, Ordering::SeqCst);
        }));
        cell.complete(Outcome::Fulfilled(3));
        cell.complete(Outcome::Fulfilled(4));
        let late = fired.clone();
        cell.observe(Box::new(move |o: &Outcome<i32>| {
            assert_eq!(o, &Outcome::Fulfilled(3));
            late.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_observer_does_not_stop_the_others() {
        let cell = Arc::new(Cell::new());
        let fired = Arc::new(AtomicUsize::new(0));
        cell.observe(Box::new(|_: &Outcome<()>| panic!("observer bug")));
        let counter = fired.clone();
        cell.observe(Box::new(move |_: &Outcome<()>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(cell.complete(Outcome::Fulfilled(())));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_timeout_gives_up() {
        let cell: Cell<()> = Cell::new();
        assert!(cell.wait_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn wait_wakes_on_completion() {
        let cell = Arc::new(Cell::new());
        let writer = cell.clone();
        let task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.complete(Outcome::Fulfilled("done"));
        });
        assert_eq!(cell.wait(), &Outcome::Fulfilled("done"));
        task.join().expect("writer thread panicked");
    }

    #[test]
    fn nested_completions_run_after_the_current_observer() {
        let first = Arc::new(Cell::new());
        let second = Arc::new(Cell::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let (next, entries) = (second.clone(), log.clone());
        first.observe(Box::new(move |_: &Outcome<u8>| {
            assert!(next.complete(Outcome::Fulfilled(2)));
            entries.lock().unwrap().push("first observer done");
        }));
        let entries = log.clone();
        second.observe(Box::new(move |_: &Outcome<u8>| {
            entries.lock().unwrap().push("second observer");
        }));
        first.complete(Outcome::Fulfilled(1));
        assert_eq!(*log.lock().unwrap(), ["first observer done", "second observer"]);
    }

    #[test]
    fn long_observer_chain_settles_on_a_small_stack() {
        let task = thread::Builder::new()
            .stack_size(512 * 1024)
            .spawn(|| {
                let head = Arc::new(Cell::new());
                let mut tail = head.clone();
                for _ in 0..100_000 {
                    let next = Arc::new(Cell::new());
                    let target = next.clone();
                    tail.observe(Box::new(move |o: &Outcome<u32>| {
                        if let Outcome::Fulfilled(v) = o {
                            target.complete(Outcome::Fulfilled(v + 1));
                        }
                    }));
                    tail = next;
                }
                head.complete(Outcome::Fulfilled(0));
                tail.get().cloned()
            })
            .expect("spawn chain thread");
        let last = task.join().expect("chain thread overflowed or panicked");
        assert_eq!(last, Some(Outcome::Fulfilled(100_000)));
    }

    #[test]
    fn blocking_inside_an_observer_runs_queued_work() {
        let source = Arc::new(Cell::new());
        let middle = Arc::new(Cell::new());
        let last = Arc::new(Cell::new());
        let forward = last.clone();
        middle.observe(Box::new(move |o: &Outcome<u8>| {
            forward.complete(o.clone());
        }));
        let (settle, wait_on) = (middle.clone(), last.clone());
        let seen = Arc::new(Mutex::new(None));
        let result = seen.clone();
        source.observe(Box::new(move |_: &Outcome<u8>| {
            settle.complete(Outcome::Fulfilled(5));
            *result.lock().unwrap() = wait_on.wait_timeout(Duration::from_secs(1)).cloned();
        }));
        source.complete(Outcome::Fulfilled(0));
        assert_eq!(*seen.lock().unwrap(), Some(Outcome::Fulfilled(5)));
    }
}
