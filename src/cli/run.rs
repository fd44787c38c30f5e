//! Run command implementation.

use super::output::format_session_text;
use super::{CliError, ReportFormat};
use std::path::PathBuf;
use tickboot::sim::{parse_scheduled, HostConfig, Session, SimHost};
use tickboot::wasm::{self, WasmLoader};
use tickboot::SchedulerConfig;

/// Options for the run command.
#[derive(Debug)]
pub(crate) struct RunOptions {
    pub(crate) payload: PathBuf,
    pub(crate) ticks: u32,
    pub(crate) bucket: Option<u32>,
    pub(crate) cpu_limit: Option<f64>,
    pub(crate) config: Option<PathBuf>,
    pub(crate) commands: Vec<String>,
    pub(crate) format: ReportFormat,
}

/// Execute the run command.
///
/// # Errors
///
/// Returns an error if the payload cannot be compiled or the options are
/// invalid. Payload faults during the run are part of the report, not errors.
pub(crate) fn execute(options: &RunOptions) -> Result<(), CliError> {
    let scheduler = match &options.config {
        Some(path) => SchedulerConfig::from_json_file(path)?,
        None => SchedulerConfig::default(),
    };

    let mut host = HostConfig::default();
    if let Some(bucket) = options.bucket {
        host.bucket = bucket;
    }
    if let Some(cpu_limit) = options.cpu_limit {
        host.cpu_limit = cpu_limit;
    }

    let commands = options
        .commands
        .iter()
        .map(|text| parse_scheduled(text))
        .collect::<Result<Vec<_>, _>>()?;

    // Compile once; every fresh environment instantiates the same module.
    let engine = wasm::create_engine()?;
    let bytes = std::fs::read(&options.payload).map_err(|e| {
        CliError::new(format!("Failed to read {}: {e}", options.payload.display()))
    })?;
    let module = wasm::compile(&engine, &bytes)?;
    wasm::inspect(&module)?;
    let linker = wasm::create_linker(&engine)?;

    let name = options
        .payload
        .file_name()
        .map_or_else(|| "payload".to_string(), |n| n.to_string_lossy().into_owned());
    let loader_name = name.clone();

    let mut session = Session::new(SimHost::new(host), scheduler, move || {
        WasmLoader::from_module(linker.clone(), loader_name.clone(), module.clone())
    })
    .with_commands(commands);
    let report = session.run(options.ticks);

    match options.format {
        ReportFormat::Text => print!("{}", format_session_text(&report, &name)),
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}
