// Fanout CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json output formats for scripting.
// Design Decision: Drive the dispatcher with simulated units so runs are reproducible from a seed.

mod commands;
mod output;
mod simulate;
mod telemetry;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fanout")]
#[command(about = "Fanout CLI - Run batches of work units with bounded concurrency")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a simulated batch and report every unit's outcome
    Run(commands::run::RunArgs),

    /// Time the same workload sequentially and with bounded concurrency
    Compare(commands::compare::CompareArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry =
        telemetry::init_telemetry(telemetry::TelemetryConfig::from_env().with_console(!cli.quiet));
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Run(args) => commands::run::run(args, output_format, cli.quiet).await,
        Commands::Compare(args) => commands::compare::run(args, output_format, cli.quiet).await,
    }
}
