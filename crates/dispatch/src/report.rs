//! Batch results
//!
//! A [`BatchReport`] holds one outcome per submitted unit, aligned by
//! index with the input: `outcomes[i]` always belongs to unit `i`, no
//! matter in which order the units finished.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_millis;
use crate::outcome::{Failure, Outcome, OutcomeStatus};
use crate::unit::UnitId;

/// Index-aligned results of one batch
#[derive(Debug)]
pub struct BatchReport<T, E = anyhow::Error> {
    /// Unit ids in submission order
    pub ids: Vec<UnitId>,
    /// One outcome per unit, in submission order
    pub outcomes: Vec<Outcome<T, E>>,
    /// Run time per unit; `None` for units that never started
    pub durations: Vec<Option<Duration>>,
    /// Wall-clock time of the whole batch
    pub elapsed: Duration,
    /// Most units of this batch observed executing at once
    pub peak_in_flight: usize,
    /// Number of rate-limited chunks the batch ran in (1 without rate limiting)
    pub chunks: usize,
}

impl<T, E> BatchReport<T, E> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_cancelled()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(Outcome::is_success)
    }

    pub fn statuses(&self) -> Vec<OutcomeStatus> {
        self.outcomes.iter().map(Outcome::status).collect()
    }

    /// Successful values with their batch index
    pub fn successes(&self) -> impl Iterator<Item = (usize, &T)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.success().map(|v| (i, v)))
    }

    /// Failures with their batch index
    pub fn failures(&self) -> impl Iterator<Item = (usize, &Failure<E>)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.failure().map(|f| (i, f)))
    }

    pub fn into_outcomes(self) -> Vec<Outcome<T, E>> {
        self.outcomes
    }

    /// Latency statistics over the units that actually ran
    pub fn latency_summary(&self) -> LatencySummary {
        LatencySummary::from_durations(self.durations.iter().flatten().copied())
    }

    /// Serializable counts and timings
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.len(),
            succeeded: self.success_count(),
            failed: self.failure_count(),
            cancelled: self.cancelled_count(),
            elapsed: self.elapsed,
            peak_in_flight: self.peak_in_flight,
            chunks: self.chunks,
            latency: self.latency_summary(),
        }
    }
}

/// Counts and timings of a finished batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    #[serde(rename = "elapsed_ms", with = "duration_millis")]
    pub elapsed: Duration,
    pub peak_in_flight: usize,
    pub chunks: usize,
    pub latency: LatencySummary,
}

/// Latency distribution of unit run times
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    #[serde(rename = "mean_ms", with = "duration_millis")]
    pub mean: Duration,
    #[serde(rename = "min_ms", with = "duration_millis")]
    pub min: Duration,
    #[serde(rename = "max_ms", with = "duration_millis")]
    pub max: Duration,
    #[serde(rename = "p50_ms", with = "duration_millis")]
    pub p50: Duration,
    #[serde(rename = "p95_ms", with = "duration_millis")]
    pub p95: Duration,
    #[serde(rename = "p99_ms", with = "duration_millis")]
    pub p99: Duration,
}

impl LatencySummary {
    pub fn from_durations(durations: impl IntoIterator<Item = Duration>) -> Self {
        let mut samples: Vec<Duration> = durations.into_iter().collect();
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort();

        let count = samples.len();
        let sum: Duration = samples.iter().sum();
        let percentile = |p: f64| {
            let idx = ((count as f64 * p) as usize).min(count - 1);
            samples[idx]
        };

        Self {
            count,
            mean: sum / count as u32,
            min: samples[0],
            max: samples[count - 1],
            p50: percentile(0.50),
            p95: percentile(0.95),
            p99: percentile(0.99),
        }
    }
}
