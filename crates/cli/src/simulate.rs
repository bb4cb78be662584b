// Simulated workloads
//
// Each unit sleeps for a latency drawn from a seeded RNG and then either
// answers or fails, standing in for a remote call such as a model request.
// The plan is drawn once, so the same seed replays the same workload.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::Args;
use fanout_dispatch::{Batch, WorkUnit};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Workload shape shared by `run` and `compare`
#[derive(Debug, Clone, Args)]
pub struct WorkloadArgs {
    /// Number of work units
    #[arg(long, short = 'n', default_value = "10")]
    pub units: usize,

    /// Minimum simulated latency per unit
    #[arg(long, default_value = "100")]
    pub min_latency_ms: u64,

    /// Maximum simulated latency per unit
    #[arg(long, default_value = "1000")]
    pub max_latency_ms: u64,

    /// Probability that a unit fails (0.0 to 1.0)
    #[arg(long, default_value = "0.0")]
    pub failure_rate: f64,

    /// RNG seed for latencies and failures
    #[arg(long, default_value = "42")]
    pub seed: u64,
}

impl WorkloadArgs {
    pub fn validate(&self) -> Result<()> {
        if self.min_latency_ms > self.max_latency_ms {
            bail!(
                "--min-latency-ms ({}) must not exceed --max-latency-ms ({})",
                self.min_latency_ms,
                self.max_latency_ms
            );
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            bail!("--failure-rate must be between 0.0 and 1.0, got {}", self.failure_rate);
        }
        Ok(())
    }

    /// Draw latencies and failures for every unit
    pub fn plan(&self) -> Result<Vec<PlannedUnit>> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        Ok((0..self.units)
            .map(|index| PlannedUnit {
                index,
                latency: Duration::from_millis(
                    rng.gen_range(self.min_latency_ms..=self.max_latency_ms),
                ),
                fails: rng.gen_bool(self.failure_rate),
            })
            .collect())
    }
}

/// One unit of a simulated workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedUnit {
    pub index: usize,
    pub latency: Duration,
    pub fails: bool,
}

impl PlannedUnit {
    pub fn id(&self) -> String {
        format!("unit-{:03}", self.index)
    }

    pub fn into_work_unit(self) -> WorkUnit<Response> {
        WorkUnit::new(self.id(), move || async move {
            tokio::time::sleep(self.latency).await;
            if self.fails {
                return Err(anyhow!("simulated failure in unit {}", self.index));
            }
            Ok(Response {
                text: format!("response {}", self.index),
                latency_ms: self.latency.as_millis() as u64,
            })
        })
    }
}

/// What a successful simulated unit returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub text: String,
    pub latency_ms: u64,
}

/// Build a fresh batch from a plan
pub fn batch(plan: &[PlannedUnit]) -> Batch<Response> {
    plan.iter().map(|unit| unit.into_work_unit()).collect()
}

/// Sum of all planned latencies: what a strictly sequential run costs
pub fn sequential_cost(plan: &[PlannedUnit]) -> Duration {
    plan.iter().map(|unit| unit.latency).sum()
}
