// Sequential vs bounded-concurrent comparison on the same workload

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use fanout_dispatch::{CancellationToken, Dispatcher, DispatcherConfig, ProgressEvent};
use serde::Serialize;
use tracing::info;

use super::run::progress_bar;
use super::{cancel_on_ctrl_c, DispatchArgs};
use crate::output::{format_ms, print_field, OutputFormat};
use crate::simulate::{self, PlannedUnit, Response, WorkloadArgs};

#[derive(Debug, Clone, Args)]
pub struct CompareArgs {
    #[command(flatten)]
    pub workload: WorkloadArgs,

    #[command(flatten)]
    pub dispatch: DispatchArgs,
}

/// Timing of one pass over the workload
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PassTiming {
    pub concurrency: usize,
    pub elapsed_ms: u64,
    pub per_unit_ms: f64,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
pub struct Comparison {
    pub units: usize,
    pub planned_latency_ms: u64,
    pub sequential: PassTiming,
    pub concurrent: PassTiming,
    pub speedup: f64,
}

impl Comparison {
    fn new(plan: &[PlannedUnit], sequential: PassTiming, concurrent: PassTiming) -> Self {
        Self {
            units: plan.len(),
            planned_latency_ms: simulate::sequential_cost(plan).as_millis() as u64,
            sequential,
            concurrent,
            speedup: speedup(sequential.elapsed_ms, concurrent.elapsed_ms),
        }
    }
}

pub(crate) fn speedup(sequential_ms: u64, concurrent_ms: u64) -> f64 {
    sequential_ms as f64 / concurrent_ms.max(1) as f64
}

pub async fn run(args: CompareArgs, output: OutputFormat, quiet: bool) -> Result<()> {
    let plan = args.workload.plan()?;
    let token = CancellationToken::new();
    let interrupt = cancel_on_ctrl_c(token.clone());
    let hidden = quiet || !output.is_text();

    let sequential_config = DispatcherConfig {
        max_concurrency: 1,
        ..args.dispatch.config()
    };
    let sequential = pass(&plan, sequential_config, &token, hidden)
        .await
        .context("sequential pass failed")?;
    let concurrent = pass(&plan, args.dispatch.config(), &token, hidden)
        .await
        .context("concurrent pass failed")?;
    interrupt.abort();

    let comparison = Comparison::new(&plan, sequential, concurrent);
    info!(speedup = comparison.speedup, "Comparison complete");

    if output.is_text() {
        print_field("Units", &comparison.units.to_string());
        print_field(
            "Planned",
            &format_ms(Duration::from_millis(comparison.planned_latency_ms)),
        );
        println!();
        print_pass("Sequential", &comparison.sequential);
        print_pass("Concurrent", &comparison.concurrent);
        println!();
        print_field("Speedup", &format!("{:.2}x", comparison.speedup));
    } else {
        output.print_value(&comparison)?;
    }

    Ok(())
}

async fn pass(
    plan: &[PlannedUnit],
    config: DispatcherConfig,
    token: &CancellationToken,
    hidden: bool,
) -> Result<PassTiming> {
    let dispatcher = Dispatcher::new(config)?.with_cancellation_token(token.clone());
    let pb = progress_bar(plan.len() as u64, hidden)?;
    pb.set_message(format!("concurrency {}", dispatcher.capacity()));

    let report = dispatcher
        .run_batch_with_progress(
            simulate::batch(plan),
            |_: &ProgressEvent<'_, Response, anyhow::Error>| pb.inc(1),
        )
        .await;
    pb.finish_and_clear();
    let report = report?;

    let elapsed_ms = report.elapsed.as_millis() as u64;
    Ok(PassTiming {
        concurrency: dispatcher.capacity(),
        elapsed_ms,
        per_unit_ms: elapsed_ms as f64 / report.len() as f64,
        succeeded: report.success_count(),
        failed: report.failure_count(),
    })
}

fn print_pass(label: &str, timing: &PassTiming) {
    print_field(
        label,
        &format!(
            "{} total, {:.1}ms per unit (concurrency {}, {} ok, {} failed)",
            format_ms(Duration::from_millis(timing.elapsed_ms)),
            timing.per_unit_ms,
            timing.concurrency,
            timing.succeeded,
            timing.failed
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speedup() {
        assert_eq!(speedup(1000, 250), 4.0);
        assert_eq!(speedup(100, 0), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_pass_is_faster() {
        let plan = WorkloadArgs {
            units: 8,
            min_latency_ms: 100,
            max_latency_ms: 100,
            failure_rate: 0.0,
            seed: 1,
        }
        .plan()
        .unwrap();
        let token = CancellationToken::new();

        let sequential = pass(&plan, DispatcherConfig::new(1), &token, true)
            .await
            .unwrap();
        let concurrent = pass(&plan, DispatcherConfig::new(4), &token, true)
            .await
            .unwrap();

        assert!(sequential.elapsed_ms >= 800);
        assert!(concurrent.elapsed_ms >= 200 && concurrent.elapsed_ms < 300);
        let comparison = Comparison::new(&plan, sequential, concurrent);
        assert_eq!(comparison.planned_latency_ms, 800);
        assert!(comparison.speedup > 3.0);
    }
}
