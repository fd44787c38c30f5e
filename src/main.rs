//! Tickboot CLI - run payloads under the tick scheduler in a simulated host.

// Allow print in the CLI binary
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Tickboot - budget-gated tick scheduler for sandboxed payloads
#[derive(Parser, Debug)]
#[command(name = "tickboot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Simulate a WASM payload under the scheduler
    Run {
        /// Payload module (.wasm or .wat)
        #[arg(required = true)]
        payload: PathBuf,

        /// Ticks to simulate
        #[arg(short, long, default_value = "100")]
        ticks: u32,

        /// Starting bucket
        #[arg(short, long)]
        bucket: Option<u32>,

        /// CPU granted per tick
        #[arg(long)]
        cpu_limit: Option<f64>,

        /// Scheduler config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Operator command before a tick, as TICK:COMMAND (repeatable)
        #[arg(long = "command", value_name = "TICK:COMMAND")]
        commands: Vec<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: cli::ReportFormat,
    },

    /// Run a scripted scenario file
    Sim {
        /// Scenario file (JSON)
        #[arg(required = true)]
        scenario: PathBuf,

        /// Override the number of ticks
        #[arg(short, long)]
        ticks: Option<u32>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: cli::ReportFormat,
    },

    /// Run many randomized sessions in parallel and check invariants
    Soak {
        /// Number of sessions
        #[arg(short, long, default_value = "1000")]
        sessions: u64,

        /// Ticks per session
        #[arg(short, long, default_value = "500")]
        ticks: u32,

        /// Base seed (increments for each session)
        #[arg(long)]
        seed: Option<u64>,

        /// Parallel threads (default: CPU count)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Probability that a tick faults
        #[arg(long, default_value = "0.01")]
        fault_rate: f64,

        /// Output format: text, json, or csv
        #[arg(short, long, default_value = "text")]
        format: cli::SoakFormat,

        /// Show progress bar
        #[arg(short, long)]
        progress: bool,
    },

    /// Check a WASM payload against the module ABI
    Validate {
        /// Payload module to validate
        #[arg(required = true)]
        payload: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tickboot=debug" } else { "tickboot=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let result = match args.command {
        Commands::Run {
            payload,
            ticks,
            bucket,
            cpu_limit,
            config,
            commands,
            format,
        } => cli::run::execute(&cli::run::RunOptions {
            payload,
            ticks,
            bucket,
            cpu_limit,
            config,
            commands,
            format,
        }),

        Commands::Sim {
            scenario,
            ticks,
            format,
        } => cli::sim::execute(&scenario, ticks, format),

        Commands::Soak {
            sessions,
            ticks,
            seed,
            threads,
            fault_rate,
            format,
            progress,
        } => cli::soak::execute(&cli::soak::SoakOptions {
            sessions,
            ticks,
            seed,
            threads,
            fault_rate,
            format,
            progress,
        }),

        Commands::Validate { payload } => cli::validate::execute(&payload),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
