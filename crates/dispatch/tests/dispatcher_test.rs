//! Integration tests for Dispatcher
//!
//! Most tests run on a paused clock, so simulated latencies cost no wall
//! time and elapsed values are exact.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

use fanout_dispatch::{
    run_batch, ConcurrencyLimiter, DispatchError, Dispatcher, DispatcherConfig, Failure,
    FailureKind, Outcome, OutcomeStatus, PausePolicy, ProgressEvent, ProgressObserver,
    ProgressSnapshot, RateLimit, WorkUnit,
};

/// Tracks how many units are executing at once
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
    started: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

/// A unit that sleeps for `latency` and then returns its index or fails
fn timed_unit(
    gauge: &Arc<Gauge>,
    index: usize,
    latency: Duration,
    fail: bool,
) -> WorkUnit<usize> {
    let gauge = Arc::clone(gauge);
    WorkUnit::new(format!("unit-{index}"), move || async move {
        gauge.enter();
        sleep(latency).await;
        gauge.exit();
        if fail {
            Err(anyhow!("unit {index} failed"))
        } else {
            Ok(index)
        }
    })
}

fn uniform_batch(gauge: &Arc<Gauge>, n: usize, latency: Duration) -> Vec<WorkUnit<usize>> {
    (0..n).map(|i| timed_unit(gauge, i, latency, false)).collect()
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[tokio::test(start_paused = true)]
async fn test_outcomes_align_with_submission_order() {
    let gauge = Arc::new(Gauge::default());
    // Later units finish first
    let units: Vec<_> = (0..5)
        .map(|i| timed_unit(&gauge, i, ms(100 - 20 * i as u64), false))
        .collect();

    let order = Mutex::new(Vec::new());
    let dispatcher = Dispatcher::with_capacity(5).unwrap();
    let report = dispatcher
        .run_batch_with_progress(units, |event: &ProgressEvent<'_, usize, anyhow::Error>| {
            order.lock().unwrap().push(event.index);
        })
        .await
        .unwrap();

    let values: Vec<usize> = report
        .outcomes
        .iter()
        .map(|o| *o.success().unwrap())
        .collect();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
    assert_eq!(report.ids[3].as_str(), "unit-3");
    assert_eq!(*order.lock().unwrap(), vec![4, 3, 2, 1, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_never_exceeds_capacity() {
    let gauge = Arc::new(Gauge::default());
    let units: Vec<_> = (0..12)
        .map(|i| timed_unit(&gauge, i, ms(10 + (i as u64 % 4) * 15), false))
        .collect();

    let dispatcher = Dispatcher::with_capacity(3).unwrap();
    let report = dispatcher.run_batch(units).await.unwrap();

    assert_eq!(gauge.max(), 3);
    assert_eq!(report.peak_in_flight, 3);
    assert_eq!(report.success_count(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_scenario() {
    let gauge = Arc::new(Gauge::default());
    let units: Vec<_> = (0..5)
        .map(|i| timed_unit(&gauge, i, ms(50), i == 1 || i == 3))
        .collect();

    let events = Mutex::new(Vec::new());
    let dispatcher = Dispatcher::with_capacity(2).unwrap();
    let report = dispatcher
        .run_batch_with_progress(units, |event: &ProgressEvent<'_, usize, anyhow::Error>| {
            events.lock().unwrap().push(event.snapshot());
        })
        .await
        .unwrap();

    let failed = OutcomeStatus::Failure(FailureKind::Operation);
    assert_eq!(
        report.statuses(),
        vec![
            OutcomeStatus::Success,
            failed,
            OutcomeStatus::Success,
            failed,
            OutcomeStatus::Success,
        ]
    );
    assert_eq!(report.peak_in_flight, 2);
    assert_eq!(gauge.max(), 2);

    // Every unit reported before the batch returned, counts strictly increasing
    let events = events.into_inner().unwrap();
    let resolved: Vec<usize> = events.iter().map(|e| e.resolved).collect();
    assert_eq!(resolved, vec![1, 2, 3, 4, 5]);
    assert!(events.iter().all(|e| e.total == 5));

    let message = report.outcomes[3]
        .failure()
        .and_then(|f| f.operation_error())
        .map(|e| e.to_string());
    assert_eq!(message.as_deref(), Some("unit 3 failed"));
}

#[tokio::test(start_paused = true)]
async fn test_capacity_above_batch_size_runs_everything_at_once() {
    let gauge = Arc::new(Gauge::default());
    let units = uniform_batch(&gauge, 4, ms(80));

    let started = Instant::now();
    let report = run_batch(units, 16, None).await.unwrap();

    assert_eq!(report.peak_in_flight, 4);
    assert_eq!(gauge.max(), 4);
    assert!(started.elapsed() < ms(100));
}

#[tokio::test(start_paused = true)]
async fn test_bound_of_one_is_sequential() {
    let gauge = Arc::new(Gauge::default());
    let units = uniform_batch(&gauge, 4, ms(25));

    let report = run_batch(units, 1, None).await.unwrap();

    assert_eq!(gauge.max(), 1);
    assert!(report.elapsed >= ms(100));
}

#[tokio::test]
async fn test_zero_capacity_invokes_nothing() {
    let gauge = Arc::new(Gauge::default());
    let units = uniform_batch(&gauge, 3, ms(1));

    let err = run_batch(units, 0, None).await.unwrap_err();

    assert_eq!(err, DispatchError::InvalidCapacity(0));
    assert!(err.is_configuration());
    assert_eq!(gauge.started(), 0);
}

#[tokio::test]
async fn test_empty_batch_is_an_error() {
    let err = run_batch(Vec::<WorkUnit<usize>>::new(), 2, None)
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::EmptyBatch);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_only_fails_the_slow_unit() {
    let gauge = Arc::new(Gauge::default());
    let units = vec![
        timed_unit(&gauge, 0, ms(10), false),
        timed_unit(&gauge, 1, ms(5_000), false),
        timed_unit(&gauge, 2, ms(10), false),
    ];

    let config = DispatcherConfig::new(3).with_unit_timeout(ms(100));
    let report = Dispatcher::new(config).unwrap().run_batch(units).await.unwrap();

    assert!(report.outcomes[0].is_success());
    assert!(report.outcomes[2].is_success());
    assert!(matches!(
        report.outcomes[1],
        Outcome::Failure(Failure::Timeout { limit }) if limit == ms(100)
    ));
    assert!(report.elapsed < ms(200));
}

#[tokio::test]
async fn test_panic_does_not_poison_the_batch() {
    async fn malformed() -> anyhow::Result<usize> {
        panic!("unexpected field")
    }

    let gauge = Arc::new(Gauge::default());
    let mut units = uniform_batch(&gauge, 3, ms(1));
    units.insert(1, WorkUnit::new("malformed", malformed));

    let report = run_batch(units, 2, None).await.unwrap();

    assert_eq!(report.len(), 4);
    assert_eq!(report.success_count(), 3);
    assert_eq!(
        report.outcomes[1].status(),
        OutcomeStatus::Failure(FailureKind::Panicked)
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_lets_in_flight_units_finish() {
    let gauge = Arc::new(Gauge::default());
    let units = uniform_batch(&gauge, 6, ms(100));

    let dispatcher = Dispatcher::with_capacity(2).unwrap();
    let token = dispatcher.cancellation_token();
    tokio::spawn(async move {
        sleep(ms(150)).await;
        token.cancel();
    });

    let count = AtomicUsize::new(0);
    let report = dispatcher
        .run_batch_with_progress(units, |_: &ProgressEvent<'_, usize, anyhow::Error>| {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

    assert_eq!(
        report.statuses(),
        vec![
            OutcomeStatus::Success,
            OutcomeStatus::Success,
            OutcomeStatus::Success,
            OutcomeStatus::Success,
            OutcomeStatus::Cancelled,
            OutcomeStatus::Cancelled,
        ]
    );
    assert_eq!(gauge.started(), 4);
    assert_eq!(count.load(Ordering::SeqCst), 6);
    assert_eq!(report.durations[5], None);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_can_abort_in_flight_units() {
    let gauge = Arc::new(Gauge::default());
    let units = uniform_batch(&gauge, 6, ms(100));

    let config = DispatcherConfig::new(2).with_abort_in_flight_on_cancel(true);
    let dispatcher = Dispatcher::new(config).unwrap();
    let token = dispatcher.cancellation_token();
    tokio::spawn(async move {
        sleep(ms(150)).await;
        token.cancel();
    });

    let report = dispatcher.run_batch(units).await.unwrap();

    assert_eq!(report.success_count(), 2);
    assert_eq!(report.cancelled_count(), 4);
    assert!(report.outcomes[2].is_cancelled());
    assert!(report.outcomes[3].is_cancelled());
    assert!(report.elapsed < ms(200));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_runs_nothing() {
    let gauge = Arc::new(Gauge::default());
    let units = uniform_batch(&gauge, 3, ms(10));

    let dispatcher = Dispatcher::with_capacity(2).unwrap();
    dispatcher.cancel();
    let report = dispatcher.run_batch(units).await.unwrap();

    assert_eq!(report.cancelled_count(), 3);
    assert_eq!(gauge.started(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shared_limiter_bounds_concurrent_batches() {
    let gauge = Arc::new(Gauge::default());
    let limiter = ConcurrencyLimiter::new(2).unwrap();

    let first = Dispatcher::with_limiter(DispatcherConfig::default(), limiter.clone()).unwrap();
    let second = Dispatcher::with_limiter(DispatcherConfig::default(), limiter.clone()).unwrap();

    let (a, b) = tokio::join!(
        first.run_batch(uniform_batch(&gauge, 4, ms(30))),
        second.run_batch(uniform_batch(&gauge, 4, ms(30))),
    );

    assert!(a.unwrap().all_succeeded());
    assert!(b.unwrap().all_succeeded());
    assert_eq!(gauge.max(), 2);
    assert_eq!(limiter.available(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_pauses_between_chunks() {
    let gauge = Arc::new(Gauge::default());
    let units = uniform_batch(&gauge, 5, ms(10));

    let config = DispatcherConfig::new(2).with_rate_limit(RateLimit::new(ms(100)));
    let report = Dispatcher::new(config).unwrap().run_batch(units).await.unwrap();

    // 3 chunks of 10ms with two 100ms pauses, none after the last chunk
    assert_eq!(report.chunks, 3);
    assert!(report.elapsed >= ms(230));
    assert!(report.elapsed < ms(300));
    assert_eq!(gauge.max(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_skip_pause_after_failed_chunk() {
    let gauge = Arc::new(Gauge::default());
    let units: Vec<_> = (0..4)
        .map(|i| timed_unit(&gauge, i, ms(10), i == 0))
        .collect();

    let rate_limit = RateLimit::new(ms(100)).with_pause_policy(PausePolicy::SkipAfterFailure);
    let config = DispatcherConfig::new(2).with_rate_limit(rate_limit);
    let report = Dispatcher::new(config).unwrap().run_batch(units).await.unwrap();

    assert_eq!(report.chunks, 2);
    assert_eq!(report.failure_count(), 1);
    assert!(report.elapsed < ms(100));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_pause_cancels_remaining_chunks() {
    let gauge = Arc::new(Gauge::default());
    let units = uniform_batch(&gauge, 4, ms(10));

    let config = DispatcherConfig::new(2).with_rate_limit(RateLimit::new(ms(1_000)));
    let dispatcher = Dispatcher::new(config).unwrap();
    let token = dispatcher.cancellation_token();
    tokio::spawn(async move {
        sleep(ms(500)).await;
        token.cancel();
    });

    let report = dispatcher.run_batch(units).await.unwrap();

    assert_eq!(report.success_count(), 2);
    assert_eq!(report.cancelled_count(), 2);
    assert_eq!(gauge.started(), 2);
    assert!(report.elapsed < ms(600));
}

#[tokio::test(start_paused = true)]
async fn test_channel_observer_receives_snapshots() {
    let gauge = Arc::new(Gauge::default());
    let units = uniform_batch(&gauge, 3, ms(20));

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressSnapshot>();
    let observer: &dyn ProgressObserver<usize, anyhow::Error> = &tx;
    let report = Dispatcher::with_capacity(2)
        .unwrap()
        .run_batch_observed(units, Some(observer))
        .await
        .unwrap();
    drop(tx);

    let mut snapshots = Vec::new();
    while let Some(snapshot) = rx.recv().await {
        snapshots.push(snapshot);
    }

    assert_eq!(report.len(), 3);
    assert_eq!(snapshots.len(), 3);
    assert_eq!(snapshots.last().map(|s| s.resolved), Some(3));
    assert!(snapshots
        .iter()
        .all(|s| s.elapsed_ms.is_some_and(|ms| ms >= 20)));
}

#[tokio::test]
async fn test_summary_reports_latency() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("fanout_dispatch=debug")
        .with_test_writer()
        .try_init();

    let gauge = Arc::new(Gauge::default());
    let units = uniform_batch(&gauge, 4, ms(5));

    let report = run_batch(units, 2, None).await.unwrap();
    let summary = report.summary();

    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.latency.count, 4);
    assert!(summary.latency.min >= ms(5));
}
