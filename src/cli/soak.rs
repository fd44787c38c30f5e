//! Soak command implementation.

use super::output::{format_soak_csv, format_soak_text};
use super::{CliError, SoakFormat};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::time::Instant;
use tickboot::sim::{run_session, SoakConfig, SoakStats};

/// Options for the soak command.
#[derive(Debug)]
pub(crate) struct SoakOptions {
    pub(crate) sessions: u64,
    pub(crate) ticks: u32,
    pub(crate) seed: Option<u64>,
    pub(crate) threads: Option<usize>,
    pub(crate) fault_rate: f64,
    pub(crate) format: SoakFormat,
    pub(crate) progress: bool,
}

/// Execute the soak command.
///
/// # Errors
///
/// Returns an error if the options are invalid or any session violated a
/// scheduler invariant.
pub(crate) fn execute(options: &SoakOptions) -> Result<(), CliError> {
    if !(0.0..=1.0).contains(&options.fault_rate) {
        return Err(CliError::new("fault rate must be between 0 and 1"));
    }

    // Set thread pool size if specified
    if let Some(num_threads) = options.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .ok(); // Ignore error if already initialized
    }

    let seed = options.seed.unwrap_or_else(|| {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(42, |d| d.as_secs())
    });

    let config = SoakConfig {
        sessions: options.sessions,
        ticks: options.ticks,
        seed,
        fault_rate: options.fault_rate,
        ..SoakConfig::default()
    };

    let pb = if options.progress {
        let pb = ProgressBar::new(options.sessions);
        let style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} sessions ({per_sec})",
            )
            .map_err(|e| CliError::new(format!("bad progress template: {e}")))?
            .progress_chars("=>-");
        pb.set_style(style);
        Some(pb)
    } else {
        None
    };

    let start = Instant::now();

    // Same fold/reduce as run_soak, with the progress bar ticking per session
    let stats = (0..config.sessions)
        .into_par_iter()
        .fold(SoakStats::default, |mut local, index| {
            local.merge(&run_session(&config, index));
            if let Some(pb) = &pb {
                pb.inc(1);
            }
            local
        })
        .reduce(SoakStats::default, |mut a, b| {
            a.merge(&b);
            a
        });

    if let Some(pb) = pb {
        pb.finish_with_message("done");
    }

    let duration = start.elapsed();
    #[allow(clippy::cast_precision_loss)]
    let ticks_per_sec = if duration.as_secs_f64() > 0.0 {
        stats.ticks as f64 / duration.as_secs_f64()
    } else {
        0.0
    };

    match options.format {
        SoakFormat::Text => {
            println!();
            print!("{}", format_soak_text(&stats));
            println!();
            println!("Seed: {seed}");
            println!(
                "Duration: {:.2}s ({ticks_per_sec:.0} ticks/sec)",
                duration.as_secs_f64()
            );
        }
        SoakFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        SoakFormat::Csv => print!("{}", format_soak_csv(&stats)),
    }

    if stats.violation_count > 0 {
        return Err(CliError::new(format!(
            "{} invariant violations (seed {seed})",
            stats.violation_count
        )));
    }
    Ok(())
}
