#[cfg(test)]
mod tests {
    use promise_engine::{
        all, all_aggregate, any, race, Backoff, CancellationSource, Engine, EngineConfig, Error,
        ErrorKind, Outcome, Promise, RetryPolicy, State,
    };
    use std::{
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    fn engine() -> Engine {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
        Engine::new(EngineConfig::builder().worker_threads(2).build()).expect("engine")
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_all_orders_by_input_not_completion() {
        let engine = engine();
        let first = engine.spawn(|| {
            thread::sleep(ms(90));
            Ok(1)
        });
        let second = engine.sleep(ms(40)).map(|_| 2);
        let third = engine.spawn(|| Ok(3));
        assert_eq!(all(vec![first, second, third]).get().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_all_is_fail_fast() {
        let engine = engine();
        let err = Error::msg("E");
        let slow = engine.sleep(Duration::from_secs(1)).map(|_| 2);
        let started = Instant::now();
        let combined = all(vec![Promise::value(1), Promise::error(err.clone()), slow.clone()]);
        assert_eq!(combined.get(), Err(err));
        assert!(started.elapsed() < ms(500));
        assert!(slow.is_cancelled());
    }

    #[test]
    fn test_all_aggregate_collects_every_failure() {
        let engine = engine();
        let (e1, e2) = (Error::msg("E1"), Error::msg("E2"));
        let (a, b) = (e1.clone(), e2.clone());
        let combined = all_aggregate(vec![
            engine.spawn(move || -> Result<i32, Error> { Err(a) }),
            engine.spawn(move || -> Result<i32, Error> { Err(b) }),
            engine.spawn(|| Ok(3)),
        ]);
        match combined.get() {
            Err(Error::Aggregate(agg)) => {
                assert_eq!(agg.len(), 2);
                assert!(agg.errors().contains(&e1));
                assert!(agg.errors().contains(&e2));
            }
            other => panic!("expected an aggregate error, got {other:?}"),
        }
    }

    #[test]
    fn test_any_resolves_on_first_success() {
        let engine = engine();
        let failing = engine.spawn(|| -> Result<i32, Error> { Err(Error::msg("E1")) });
        let succeeding = engine.sleep(ms(20)).map(|_| 42);
        assert_eq!(any(vec![failing, succeeding]).get().unwrap(), 42);
    }

    #[test]
    fn test_any_rejects_when_all_fail() {
        let combined = any(vec![
            Promise::<i32>::error(Error::msg("E1")),
            Promise::error(Error::msg("E2")),
        ]);
        let err = combined.get().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aggregate);
        assert!(err.to_string().starts_with("2 errors"));
    }

    #[test]
    fn test_race_settles_with_the_first_event() {
        let engine = engine();
        let err = Error::msg("fast failure");
        let slow = engine.sleep(Duration::from_secs(1)).map(|_| 1);
        let started = Instant::now();
        let combined = race(vec![slow.clone(), Promise::error(err.clone())]);
        assert_eq!(combined.get(), Err(err));
        assert!(started.elapsed() < ms(500));
        assert_eq!(slow.state(), State::Cancelled);
    }

    #[test]
    fn test_race_settles_with_the_first_success() {
        let engine = engine();
        let slow = engine.sleep(Duration::from_secs(1)).map(|_| "slow");
        let fast = engine.sleep(ms(20)).map(|_| "fast");
        let combined = race(vec![slow.clone(), fast]);
        assert_eq!(combined.get().unwrap(), "fast");
        assert_eq!(slow.state(), State::Cancelled);
    }

    #[test]
    fn test_race_settles_with_the_first_cancellation() {
        let engine = engine();
        let slow = engine.sleep(Duration::from_secs(1)).map(|_| 1);
        let (deferred, cancelled) = Promise::<i32>::defer();
        let combined = race(vec![slow.clone(), cancelled]);
        thread::spawn(move || {
            thread::sleep(ms(20));
            deferred.cancel_with("caller gave up");
        });
        assert_eq!(combined.get(), Err(Error::cancelled(Some("caller gave up".into()))));
        assert_eq!(combined.outcome(), Some(Outcome::Cancelled(Some("caller gave up".into()))));
        assert!(slow.is_cancelled());
    }

    #[test]
    fn test_dropped_engine_does_not_strand_waiters() {
        let engine = engine();
        let sleeping = engine.sleep(ms(20));
        drop(engine);
        assert_eq!(sleeping.get_timeout(ms(500)), Err(Error::DeferredDropped));
    }

    #[test]
    fn test_retry_attempts_exactly_max_times() {
        let engine = engine();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .backoff(Backoff::fixed(Duration::ZERO))
            .build();
        let result = engine.spawn_retry(policy, move || -> Result<(), Error> {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err(Error::msg(format!("attempt {n}")))
        });
        assert_eq!(result.get().unwrap_err().to_string(), "attempt 3");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_stops_on_success() {
        let engine = engine();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let policy = RetryPolicy::builder().max_attempts(5).build();
        let result = engine.spawn_retry(policy, move || {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(Error::msg("transient")),
                _ => Ok("ok"),
            }
        });
        assert_eq!(result.get().unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_respects_the_predicate() {
        let engine = engine();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .retry_on(ErrorKind::Timeout)
            .build();
        let result = engine.spawn_retry(policy, move || -> Result<(), Error> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::msg("not retryable"))
        });
        assert!(result.get().is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_waits_between_attempts_only() {
        let engine = engine();
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .backoff(Backoff::exponential(ms(20), 2.0))
            .build();
        let started = Instant::now();
        let result = engine.spawn_retry(policy, || -> Result<(), Error> { Err(Error::msg("down")) });
        assert!(result.get().is_err());
        // 20ms before attempt 2, 40ms before attempt 3
        assert!(started.elapsed() >= ms(60));
    }

    #[test]
    fn test_cancelled_retry_makes_no_more_attempts() {
        let engine = engine();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let policy = RetryPolicy::builder()
            .max_attempts(100)
            .backoff(Backoff::fixed(ms(50)))
            .build();
        let result = engine.spawn_retry(policy, move || -> Result<(), Error> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::msg("down"))
        });
        thread::sleep(ms(120));
        assert!(result.cancel());
        let seen = attempts.load(Ordering::SeqCst);
        thread::sleep(ms(200));
        assert!(attempts.load(Ordering::SeqCst) <= seen + 1);
        assert!(seen < 100);
    }

    #[test]
    fn test_timeout_fires_for_a_computation_that_never_completes() {
        let engine = engine();
        let never = engine.from_future(std::future::pending::<Result<u8, Error>>());
        let started = Instant::now();
        let result = never.timeout(&engine, ms(100)).get();
        let elapsed = started.elapsed();
        assert_eq!(result, Err(Error::Timeout(ms(100))));
        assert!(elapsed >= ms(100) && elapsed < Duration::from_secs(2), "took {elapsed:?}");
    }

    #[test]
    fn test_delay_only_holds_back_success() {
        let engine = engine();
        let (deferred, source) = Promise::<i32>::defer();
        let delayed = source.delay(&engine, Duration::from_secs(5));
        let err = Error::msg("not delayed");
        deferred.reject(err.clone());
        assert_eq!(delayed.get_timeout(ms(500)), Err(err));
    }

    #[test]
    fn test_cancellation_source_fan_out() {
        let parent = CancellationSource::new();
        let children: Vec<_> = (0..3).map(|_| CancellationSource::linked(&parent.token())).collect();
        children[0].cancel();
        assert!(!parent.is_cancelled());

        assert!(parent.cancel_with("shutdown"));
        assert!(!parent.cancel());
        assert_eq!(parent.token().reason().as_deref(), Some("shutdown"));
        for child in &children {
            assert!(child.token().is_cancelled());
        }
        assert_eq!(children[0].token().reason(), None);
        assert_eq!(children[1].token().reason().as_deref(), Some("shutdown"));
    }

    #[test]
    fn test_single_assignment_under_contention() {
        let (deferred, promise) = Promise::<usize>::defer();
        let writers: Vec<_> = (0..16)
            .map(|i| {
                let deferred = deferred.clone();
                thread::spawn(move || deferred.resolve(i))
            })
            .collect();
        let wins = writers
            .into_iter()
            .map(|w| w.join().expect("The writer thread has panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        let first = promise.get().unwrap();
        assert!(!deferred.cancel());
        assert_eq!(promise.get().unwrap(), first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_await_inside_a_host_runtime() {
        let engine = Engine::current().expect("inside a runtime");
        let value = engine
            .spawn(|| Ok(20))
            .flat_map({
                let engine = engine.clone();
                move |v| engine.sleep(Duration::from_millis(10)).map(move |_| v + 1)
            })
            .await
            .unwrap();
        assert_eq!(value, 21);
    }
}
