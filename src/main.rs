// ABOUTME: Main entry point for rinspect, a pooled-SSH remote inspection CLI
//
// Binary: rinspect
// Usage: rinspect [--config PATH] [--format text|json] [--stats] <COMMAND>
// - stat: stat a path on many hosts
// - read: read the start of a file on many hosts
// - ls: list a directory on many hosts
// - exec: run a command on many hosts
// - hosts: list configured host aliases

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::{info, warn};

use rinspect::config::AppConfig;
use rinspect::inspect::Inspector;

mod cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = cli::Cli::parse();

    setup_logging();
    setup_panic_handler();

    let config = AppConfig::load(args.config.as_deref())?;

    if matches!(args.command, cli::Commands::Hosts) {
        cli::hosts::execute(&config, args.format)?;
        return Ok(ExitCode::SUCCESS);
    }

    let inspector = Inspector::new(&config)?;
    info!(
        max_pool_size = config.pool.max_pool_size,
        max_concurrent_requests = config.pool.max_concurrent_requests,
        "Inspector ready"
    );

    let result = match args.command {
        cli::Commands::Stat(stat_args) => cli::inspect::stat(&inspector, stat_args, args.format).await,
        cli::Commands::Read(read_args) => cli::inspect::read(&inspector, read_args, args.format).await,
        cli::Commands::Ls(ls_args) => cli::inspect::ls(&inspector, ls_args, args.format).await,
        cli::Commands::Exec(exec_args) => cli::inspect::exec(&inspector, exec_args, args.format).await,
        cli::Commands::Hosts => Ok(0),
    };

    if args.stats {
        cli::print_stats(&inspector.metrics(), args.format)?;
    }

    // Always close pooled sessions, even when the command failed
    if let Err(e) = inspector.shutdown().await {
        warn!(error = %e, "Session pool shutdown failed");
    }

    let failures = result?;
    if failures > 0 {
        info!(failures, "Some targets failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn setup_logging() {
    use std::fs::OpenOptions;
    use std::sync::Mutex;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::prelude::*;

    let log_dir = AppConfig::log_dir().unwrap_or_else(|_| ".rinspect/logs".into());
    let _ = std::fs::create_dir_all(&log_dir);

    // Create JSONL log file with timestamp
    let log_file = log_dir.join(format!(
        "rinspect-{}.jsonl",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));

    // Fall back to stderr if the file cannot be opened
    let writer = match OpenOptions::new().create(true).append(true).open(&log_file) {
        Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
        Err(e) => {
            eprintln!("rinspect: cannot open log file {}: {e}; logging to stderr", log_file.display());
            BoxMakeWriter::new(std::io::stderr)
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()             // Output in JSON Lines format
                .with_target(true)  // Include target module in JSON
                .with_writer(writer)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rinspect=info".into()),
        )
        .init();
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Please check the logs for more details.");
    }));
}
