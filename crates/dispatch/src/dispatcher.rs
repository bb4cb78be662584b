//! Bounded concurrent dispatcher
//!
//! Runs a [`Batch`] under a [`ConcurrencyLimiter`] and aggregates one
//! [`Outcome`] per unit.
//!
//! # Execution model
//!
//! ```text
//!   units (submission order)
//!     │
//!     ▼
//! ┌────────────────────────────┐   acquire (FIFO)   ┌───────────────────┐
//! │        coordinator         │ ─────────────────▶ │ ConcurrencyLimiter│
//! │  admit ─▶ FuturesUnordered │ ◀───────────────── │   (C permits)     │
//! │        ◀─ completions      │   permit dropped   └───────────────────┘
//! └────────────────────────────┘   when unit ends
//!     │ progress events (completion order)
//!     ▼
//!   outcomes[i] ⇔ units[i]
//! ```
//!
//! All units are polled by the coordinating task; nothing is spawned.
//! While waiting for a permit the coordinator keeps collecting finished
//! units, so progress is reported as soon as each unit resolves.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::limiter::{ConcurrencyLimiter, Permit};
use crate::outcome::{Failure, Outcome};
use crate::progress::{ProgressEvent, ProgressObserver};
use crate::report::BatchReport;
use crate::unit::{Batch, UnitId, WorkUnit};

/// Runs batches of work units with bounded concurrency
///
/// # Example
///
/// ```
/// use fanout_dispatch::{Dispatcher, DispatcherConfig, WorkUnit};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), fanout_dispatch::DispatchError> {
/// let dispatcher = Dispatcher::new(DispatcherConfig::new(2))?;
///
/// let units: Vec<WorkUnit<u32>> = (1..=4)
///     .map(|n| WorkUnit::new(format!("square-{n}"), move || async move { Ok(n * n) }))
///     .collect();
///
/// let report = dispatcher.run_batch(units).await?;
/// let values: Vec<u32> = report.successes().map(|(_, v)| *v).collect();
/// assert_eq!(values, vec![1, 4, 9, 16]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: DispatcherConfig,
    limiter: Option<ConcurrencyLimiter>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher that builds a fresh limiter for every batch
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            limiter: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Create a dispatcher with default settings and the given capacity
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::new(DispatcherConfig::new(capacity))
    }

    /// Create a dispatcher that draws permits from a shared limiter
    ///
    /// The limiter's capacity replaces `config.max_concurrency`. Every batch
    /// run through this dispatcher, and anything else holding a clone of
    /// the limiter, competes for the same permits.
    pub fn with_limiter(mut config: DispatcherConfig, limiter: ConcurrencyLimiter) -> Result<Self> {
        config.max_concurrency = limiter.capacity();
        config.validate()?;
        Ok(Self {
            config,
            limiter: Some(limiter),
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels batches run by this dispatcher
    ///
    /// Cancellation is permanent: once triggered, later batches resolve
    /// every unit as [`Outcome::Cancelled`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.limiter
            .as_ref()
            .map_or(self.config.max_concurrency, ConcurrencyLimiter::capacity)
    }

    /// Run a batch to completion
    pub async fn run_batch<T, E>(&self, batch: impl Into<Batch<T, E>>) -> Result<BatchReport<T, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        self.run_batch_observed(batch, None).await
    }

    /// Run a batch, calling `on_progress` each time a unit resolves
    pub async fn run_batch_with_progress<T, E, F>(
        &self,
        batch: impl Into<Batch<T, E>>,
        on_progress: F,
    ) -> Result<BatchReport<T, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(&ProgressEvent<'_, T, E>) + Send + Sync,
    {
        let observer: &dyn ProgressObserver<T, E> = &on_progress;
        self.run_batch_observed(batch, Some(observer)).await
    }

    /// Run a batch with an optional progress observer
    ///
    /// Returns only after every unit has resolved. `outcomes[i]` of the
    /// report belongs to the `i`-th unit of the batch.
    ///
    /// # Errors
    ///
    /// Fails before any unit is invoked if the batch is empty or the shared
    /// limiter is closed. Unit failures never fail the batch.
    #[instrument(skip_all, fields(batch_size = tracing::field::Empty, capacity = self.capacity()))]
    pub async fn run_batch_observed<T, E>(
        &self,
        batch: impl Into<Batch<T, E>>,
        observer: Option<&dyn ProgressObserver<T, E>>,
    ) -> Result<BatchReport<T, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let batch = batch.into();
        if batch.is_empty() {
            return Err(DispatchError::EmptyBatch);
        }

        let limiter = match &self.limiter {
            Some(shared) => shared.clone(),
            None => ConcurrencyLimiter::new(self.config.max_concurrency)?,
        };
        if limiter.is_closed() {
            return Err(DispatchError::LimiterClosed);
        }

        let total = batch.len();
        tracing::Span::current().record("batch_size", total);
        info!(
            batch_size = total,
            capacity = limiter.capacity(),
            rate_limited = self.config.rate_limit.is_some(),
            "Starting batch"
        );

        let started = Instant::now();
        let mut aggregator = Aggregator::new(batch.ids().cloned().collect(), observer);
        let mut units = batch.into_units().into_iter().enumerate().peekable();

        match self.config.rate_limit {
            None => {
                self.run_chunk(&limiter, &mut units, &mut aggregator).await;
                aggregator.chunks = 1;
            }
            Some(rate_limit) => {
                let chunk_size = limiter.capacity();
                while units.peek().is_some() && !aggregator.stopped {
                    let failures_before = aggregator.failures;
                    let mut chunk = units.by_ref().take(chunk_size);
                    self.run_chunk(&limiter, &mut chunk, &mut aggregator).await;
                    aggregator.chunks += 1;

                    if aggregator.stopped || units.peek().is_none() {
                        break;
                    }

                    let had_failure = aggregator.failures > failures_before;
                    if rate_limit.should_pause(had_failure) {
                        debug!(
                            delay_ms = rate_limit.delay.as_millis() as u64,
                            chunk = aggregator.chunks,
                            "Pausing before next chunk"
                        );
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => aggregator.stop("cancelled during pause"),
                            _ = tokio::time::sleep(rate_limit.delay) => {}
                        }
                    } else {
                        debug!(chunk = aggregator.chunks, "Skipping pause after failed chunk");
                    }
                }
            }
        }

        // Anything never admitted resolves as cancelled
        for (index, _unit) in units {
            aggregator.resolve(index, Outcome::Cancelled, None);
        }

        let report = aggregator.into_report(started.elapsed());
        info!(
            succeeded = report.success_count(),
            failed = report.failure_count(),
            cancelled = report.cancelled_count(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            peak_in_flight = report.peak_in_flight,
            "Batch complete"
        );
        Ok(report)
    }

    /// Admit units from `units` until it is exhausted or the batch stops,
    /// then wait for everything admitted to resolve.
    async fn run_chunk<T, E, I>(
        &self,
        limiter: &ConcurrencyLimiter,
        units: &mut I,
        aggregator: &mut Aggregator<'_, T, E>,
    ) where
        T: Send + 'static,
        E: Send + 'static,
        I: Iterator<Item = (usize, WorkUnit<T, E>)>,
    {
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Finished<T, E>>> =
            FuturesUnordered::new();

        'admit: while !aggregator.stopped {
            let Some((index, unit)) = units.next() else {
                break;
            };

            let acquire = limiter.acquire();
            tokio::pin!(acquire);

            // Keep the same acquire future across wake-ups so the unit
            // does not lose its place in the limiter's queue.
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        aggregator.stop("cancelled");
                        aggregator.resolve(index, Outcome::Cancelled, None);
                        break 'admit;
                    }
                    finished = in_flight.next(), if !in_flight.is_empty() => {
                        if let Some(finished) = finished {
                            aggregator.finish(finished);
                        }
                    }
                    acquired = &mut acquire => match acquired {
                        Ok(permit) => break permit,
                        Err(_) => {
                            aggregator.stop("limiter closed");
                            aggregator.resolve(index, Outcome::Cancelled, None);
                            break 'admit;
                        }
                    },
                }
            };

            debug!(index, unit_id = %unit.id(), "Unit admitted");
            aggregator.admitted();
            in_flight.push(self.execute(index, unit, permit));
        }

        if aggregator.stopped {
            for (index, _unit) in units.by_ref() {
                aggregator.resolve(index, Outcome::Cancelled, None);
            }
        }

        while let Some(finished) = in_flight.next().await {
            aggregator.finish(finished);
        }
    }

    /// Wrap one unit with its timeout, panic capture and permit release
    fn execute<T, E>(
        &self,
        index: usize,
        unit: WorkUnit<T, E>,
        permit: Permit,
    ) -> BoxFuture<'static, Finished<T, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let timeout = self.config.unit_timeout;
        let abort_on = self
            .config
            .abort_in_flight_on_cancel
            .then(|| self.cancel.clone());

        async move {
            let started = Instant::now();
            // The thunk is invoked inside the guarded future so a panic while
            // building the operation is captured like one while running it.
            let guarded = AssertUnwindSafe(async move {
                let (_id, operation) = unit.start();
                operation.await
            })
            .catch_unwind();

            let run = async move {
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, guarded).await {
                        Ok(result) => into_outcome(result),
                        Err(_) => Outcome::Failure(Failure::Timeout { limit }),
                    },
                    None => into_outcome(guarded.await),
                }
            };

            let outcome = match abort_on {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => Outcome::Cancelled,
                    outcome = run => outcome,
                },
                None => run.await,
            };

            permit.release();
            Finished {
                index,
                outcome,
                elapsed: started.elapsed(),
            }
        }
        .boxed()
    }
}

/// Run `units` with at most `capacity` in flight
///
/// Shorthand for a [`Dispatcher`] with default settings.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidCapacity`] for `capacity == 0` and
/// [`DispatchError::EmptyBatch`] for an empty batch, in both cases without
/// invoking any unit.
pub async fn run_batch<T, E>(
    units: impl Into<Batch<T, E>>,
    capacity: usize,
    on_progress: Option<&dyn ProgressObserver<T, E>>,
) -> Result<BatchReport<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    Dispatcher::with_capacity(capacity)?
        .run_batch_observed(units, on_progress)
        .await
}

/// A unit that has resolved inside the in-flight set
struct Finished<T, E> {
    index: usize,
    outcome: Outcome<T, E>,
    elapsed: Duration,
}

fn into_outcome<T, E>(result: std::thread::Result<std::result::Result<T, E>>) -> Outcome<T, E> {
    match result {
        Ok(result) => Outcome::from(result),
        Err(payload) => Outcome::Failure(Failure::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Collects outcomes into their slots and emits progress events
///
/// Owned by the coordinating task, so the counters need no atomics.
struct Aggregator<'o, T, E> {
    ids: Vec<UnitId>,
    outcomes: Vec<Option<Outcome<T, E>>>,
    durations: Vec<Option<Duration>>,
    observer: Option<&'o dyn ProgressObserver<T, E>>,
    resolved: usize,
    failures: usize,
    in_flight: usize,
    peak_in_flight: usize,
    chunks: usize,
    stopped: bool,
}

impl<'o, T, E> Aggregator<'o, T, E> {
    fn new(ids: Vec<UnitId>, observer: Option<&'o dyn ProgressObserver<T, E>>) -> Self {
        let total = ids.len();
        Self {
            ids,
            outcomes: std::iter::repeat_with(|| None).take(total).collect(),
            durations: vec![None; total],
            observer,
            resolved: 0,
            failures: 0,
            in_flight: 0,
            peak_in_flight: 0,
            chunks: 0,
            stopped: false,
        }
    }

    fn admitted(&mut self) {
        self.in_flight += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
    }

    fn finish(&mut self, finished: Finished<T, E>) {
        self.in_flight -= 1;
        self.resolve(finished.index, finished.outcome, Some(finished.elapsed));
    }

    fn stop(&mut self, reason: &str) {
        if !self.stopped {
            warn!(
                reason,
                resolved = self.resolved,
                total = self.ids.len(),
                "Stopping admission"
            );
            self.stopped = true;
        }
    }

    fn resolve(&mut self, index: usize, outcome: Outcome<T, E>, elapsed: Option<Duration>) {
        if self.outcomes[index].is_some() {
            return;
        }

        let unit_id = &self.ids[index];
        match &outcome {
            Outcome::Success(_) => {
                debug!(index, %unit_id, elapsed_ms = elapsed.map(|d| d.as_millis() as u64), "Unit succeeded");
            }
            Outcome::Failure(failure) => {
                self.failures += 1;
                warn!(index, %unit_id, kind = %failure.kind(), "Unit failed");
            }
            Outcome::Cancelled => {
                debug!(index, %unit_id, "Unit cancelled");
            }
        }

        self.resolved += 1;
        self.durations[index] = elapsed;
        let outcome = self.outcomes[index].insert(outcome);

        if let Some(observer) = self.observer {
            observer.on_progress(&ProgressEvent {
                index,
                unit_id,
                outcome,
                resolved: self.resolved,
                total: self.ids.len(),
                elapsed,
            });
        }
    }

    fn into_report(self, elapsed: Duration) -> BatchReport<T, E> {
        BatchReport {
            ids: self.ids,
            outcomes: self
                .outcomes
                .into_iter()
                .map(|slot| slot.unwrap_or(Outcome::Cancelled))
                .collect(),
            durations: self.durations,
            elapsed,
            peak_in_flight: self.peak_in_flight,
            chunks: self.chunks,
        }
    }
}
