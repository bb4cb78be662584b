// Run a simulated batch through the dispatcher

use anyhow::{Context, Result};
use clap::Args;
use fanout_dispatch::{
    BatchReport, BatchSummary, Dispatcher, DispatcherConfig, OutcomeStatus, ProgressEvent, UnitId,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

use super::{cancel_on_ctrl_c, DispatchArgs};
use crate::output::{format_ms, print_field, print_table_header, print_table_row, OutputFormat};
use crate::simulate::{self, Response, WorkloadArgs};

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub workload: WorkloadArgs,

    #[command(flatten)]
    pub dispatch: DispatchArgs,
}

/// Per-unit line of a run
#[derive(Debug, Serialize)]
struct UnitRow<'a> {
    index: usize,
    id: &'a UnitId,
    status: OutcomeStatus,
    elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunOutput<'a> {
    config: &'a DispatcherConfig,
    summary: BatchSummary,
    units: Vec<UnitRow<'a>>,
}

pub async fn run(args: RunArgs, output: OutputFormat, quiet: bool) -> Result<()> {
    let plan = args.workload.plan()?;
    let config = args.dispatch.config();
    let dispatcher = Dispatcher::new(config).context("invalid dispatcher settings")?;

    info!(
        units = plan.len(),
        concurrency = dispatcher.capacity(),
        seed = args.workload.seed,
        "Running simulated batch"
    );

    let pb = progress_bar(plan.len() as u64, quiet || !output.is_text())?;
    let interrupt = cancel_on_ctrl_c(dispatcher.cancellation_token());

    let report = dispatcher
        .run_batch_with_progress(
            simulate::batch(&plan),
            |event: &ProgressEvent<'_, Response, anyhow::Error>| {
                pb.set_message(format!("{} {}", event.unit_id, event.outcome.status()));
                pb.inc(1);
            },
        )
        .await;

    interrupt.abort();
    pb.finish_and_clear();
    let report = report.context("batch did not run")?;

    if output.is_text() {
        print_report(&report, quiet);
    } else {
        output.print_value(&RunOutput {
            config: dispatcher.config(),
            summary: report.summary(),
            units: rows(&report),
        })?;
    }

    Ok(())
}

pub(crate) fn progress_bar(len: u64, hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn rows(report: &BatchReport<Response>) -> Vec<UnitRow<'_>> {
    report
        .outcomes
        .iter()
        .enumerate()
        .map(|(index, outcome)| UnitRow {
            index,
            id: &report.ids[index],
            status: outcome.status(),
            elapsed_ms: report.durations[index].map(|d| d.as_millis() as u64),
            response: outcome.success(),
            error: outcome.failure().map(|f| f.to_string()),
        })
        .collect()
}

fn print_report(report: &BatchReport<Response>, quiet: bool) {
    if !quiet {
        print_table_header(&[("#", 4), ("ID", 10), ("STATUS", 18), ("TIME", 10), ("DETAIL", 40)]);
        for row in rows(report) {
            let index = row.index.to_string();
            let status = row.status.to_string();
            let time = row
                .elapsed_ms
                .map(|ms| format!("{ms}ms"))
                .unwrap_or_else(|| "-".to_string());
            let detail = match (&row.response, &row.error) {
                (Some(response), _) => response.text.clone(),
                (None, Some(error)) => error.clone(),
                (None, None) => "-".to_string(),
            };
            print_table_row(&[
                (&index, 4),
                (row.id.as_str(), 10),
                (&status, 18),
                (&time, 10),
                (&detail, 40),
            ]);
        }
        println!();
    }

    let summary = report.summary();
    print_field("Units", &summary.total.to_string());
    print_field("Succeeded", &summary.succeeded.to_string());
    print_field("Failed", &summary.failed.to_string());
    if summary.cancelled > 0 {
        print_field("Cancelled", &summary.cancelled.to_string());
    }
    print_field("Elapsed", &format_ms(summary.elapsed));
    print_field("Peak", &summary.peak_in_flight.to_string());
    if summary.chunks > 1 {
        print_field("Chunks", &summary.chunks.to_string());
    }
    if summary.latency.count > 0 {
        print_field("Mean", &format_ms(summary.latency.mean));
        print_field(
            "p50/p95/p99",
            &format!(
                "{} / {} / {}",
                format_ms(summary.latency.p50),
                format_ms(summary.latency.p95),
                format_ms(summary.latency.p99)
            ),
        );
    }
}
