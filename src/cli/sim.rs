//! Sim command implementation.

use super::output::format_session_text;
use super::{CliError, ReportFormat};
use std::path::Path;
use tickboot::sim::Scenario;

/// Execute the sim command.
///
/// # Errors
///
/// Returns an error if the scenario cannot be loaded.
pub(crate) fn execute(path: &Path, ticks: Option<u32>, format: ReportFormat) -> Result<(), CliError> {
    let mut scenario = Scenario::from_json_file(path)?;
    if let Some(ticks) = ticks {
        scenario.ticks = ticks;
        scenario.validate()?;
    }

    let report = scenario.run();

    match format {
        ReportFormat::Text => {
            let name = path.display().to_string();
            print!("{}", format_session_text(&report, &name));
        }
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}
