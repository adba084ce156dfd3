mod cli;

use std::{env, process, sync::Arc};

use clap::{CommandFactory, Parser, error::ErrorKind};
use cli::Cli;
use tracing::info;
use tracing_subscriber::EnvFilter;
use workload::{ProcessIsolation, RunConfig, Supervisor, Worker, WorkloadError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = match cli.to_run_config() {
        Ok(config) => config,
        Err(error) => Cli::command().error(ErrorKind::ValueValidation, error).exit(),
    };

    match cli.worker_index {
        Some(index) => run_worker(index, config),
        None => supervise(config),
    }
}

fn supervise(config: RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let processes = ProcessIsolation::for_current_exe(env::args_os().skip(1));
    let summary = runtime.block_on(Supervisor::new(config, processes).run());
    info!(
        workers = summary.exits.len(),
        failed = summary.failed(),
        interrupted = summary.interrupted,
        "run finished"
    );

    // thread workers still running after an interrupt end with the process
    runtime.shutdown_background();
    Ok(())
}

/// Entry point of a re-executed worker process.
fn run_worker(index: usize, config: RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    match Worker::new(index, Arc::new(config)).run_blocking() {
        Ok(report) => {
            report.log();
            Ok(())
        }
        // already logged by the worker
        Err(WorkloadError::Connect { .. }) => process::exit(1),
        Err(error) => Err(error.into()),
    }
}
