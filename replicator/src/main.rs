//! Extract-load binary.
//!
//! Without arguments it runs one incremental extract-load of the configured tables and exits
//! with status 0 on success and 1 otherwise. `pipeline` runs the extract-load, transform and
//! test stages in order.

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use config::load_pipeline_config;
use config::shared::PipelineConfig;
use etl::pipeline::RunOptions;
use telemetry::init_tracing;
use tracing::{error, info};

use crate::core::run_extract_load;
use crate::driver::{default_stages, run_stages};

mod core;
mod driver;

#[derive(Parser)]
#[command(name = "replicator", about = "Incremental extract-load into the raw schema")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Extract changed rows from the source and upsert them into the target (default)
    Run(RunArgs),
    /// Run the extract-load, transform and test stages, stopping at the first failure
    Pipeline,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Ignore stored watermarks and extract every row
    #[arg(long)]
    full_refresh: bool,

    /// Truncate each target table before reloading it
    #[arg(long, requires = "full_refresh")]
    truncate: bool,

    /// Comma-separated tables to process instead of the configured ones
    #[arg(long, value_delimiter = ',')]
    tables: Option<Vec<String>>,
}

impl From<RunArgs> for RunOptions {
    fn from(args: RunArgs) -> Self {
        RunOptions {
            full_refresh: args.full_refresh,
            truncate: args.truncate,
            tables: args.tables.map(|tables| {
                tables
                    .into_iter()
                    .map(|table| table.trim().to_string())
                    .collect()
            }),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_pipeline_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let _log_flusher = match init_tracing(env!("CARGO_BIN_NAME"), &config.log_level) {
        Ok(log_flusher) => log_flusher,
        Err(err) => {
            eprintln!("failed to initialize tracing: {err}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = ?err, "replicator failed");
            ExitCode::FAILURE
        }
    }
}

/// Runs `command` on a current-thread runtime and returns whether it succeeded.
fn run(command: Option<Command>, config: PipelineConfig) -> anyhow::Result<bool> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => runtime.block_on(run_extract_load(&config, args.into())),
        Command::Pipeline => {
            let stages = default_stages(std::env::current_exe()?);
            let outcome = runtime.block_on(run_stages(&stages));

            match outcome {
                Ok(()) => {
                    info!(stages = stages.len(), "pipeline completed");
                    Ok(true)
                }
                Err(err) => {
                    error!(error = %err, "pipeline failed");
                    Ok(false)
                }
            }
        }
    }
}
