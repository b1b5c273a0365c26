// ABOUTME: CLI argument parsing and command routing for rinspect
//
// Provides command-line interface for:
// - Inspecting remote paths (stat, read, ls) on many hosts at once
// - Running a command on many hosts (exec)
// - Listing configured host aliases (hosts)

pub mod hosts;
pub mod inspect;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use rinspect::pool::MetricsSnapshot;

/// Inspect remote hosts over pooled SSH sessions
#[derive(Parser)]
#[command(name = "rinspect")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ./.rinspect/config.toml, then ~/.rinspect/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Print session pool metrics to stderr before exiting
    #[arg(long, global = true)]
    pub stats: bool,
}

/// Output format for commands
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Stat a path on every target
    Stat(PathArgs),

    /// Read the start of a file on every target
    Read(ReadArgs),

    /// List a directory on every target
    Ls(PathArgs),

    /// Run a command on every target
    Exec(ExecArgs),

    /// List configured host aliases
    Hosts,
}

/// Arguments for commands taking one remote path
#[derive(clap::Args)]
pub struct PathArgs {
    /// Remote path
    pub path: String,

    /// Targets: alias or [user@]host[:port]
    #[arg(short = 'H', long = "host", required = true, num_args = 1..)]
    pub hosts: Vec<String>,
}

/// Arguments for the read command
#[derive(clap::Args)]
pub struct ReadArgs {
    /// Remote file
    pub path: String,

    /// Targets: alias or [user@]host[:port]
    #[arg(short = 'H', long = "host", required = true, num_args = 1..)]
    pub hosts: Vec<String>,

    /// Maximum bytes to read (default: ssh.max_read_bytes)
    #[arg(long)]
    pub max_bytes: Option<u64>,
}

/// Arguments for the exec command
#[derive(clap::Args)]
pub struct ExecArgs {
    /// Targets: alias or [user@]host[:port]
    #[arg(short = 'H', long = "host", required = true, num_args = 1..)]
    pub hosts: Vec<String>,

    /// Program and arguments, after `--`
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Print the pool metrics snapshot to stderr
pub fn print_stats(metrics: &MetricsSnapshot, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => eprintln!("{}", serde_json::to_string_pretty(metrics)?),
        OutputFormat::Text => {
            eprintln!(
                "pool: {} connects ({} failed, {} timed out), {} reuses, {} stale replaced",
                metrics.connects,
                metrics.connect_failures,
                metrics.connect_timeouts,
                metrics.reuses,
                metrics.stale_replaced
            );
            eprintln!(
                "pool: {} evicted, {} reaped, {} close failures, {} resident",
                metrics.evictions, metrics.reaped, metrics.close_failures, metrics.resident
            );
        }
    }
    Ok(())
}
