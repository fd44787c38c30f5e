//! JSON scenario files.

use super::{HostConfig, PayloadScript, ScriptedLoader, Session, SessionReport, SimHost};
use crate::config::{ConfigError, SchedulerConfig};
use crate::console::{CommandParseError, OperatorCommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// An operator command issued before a given tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCommand {
    /// Tick before which the command runs.
    pub tick: u32,
    /// The command.
    pub command: OperatorCommand,
}

/// Error loading a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The file could not be read.
    #[error("failed to read scenario {}: {source}", path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid scenario JSON.
    #[error("invalid scenario {}: {source}", path.display())]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The scenario is inconsistent.
    #[error("invalid scenario: {0}")]
    Invalid(String),
    /// A scheduled command did not parse.
    #[error(transparent)]
    Command(#[from] CommandParseError),
}

impl From<ConfigError> for ScenarioError {
    fn from(err: ConfigError) -> Self {
        Self::Invalid(err.to_string())
    }
}

/// A complete scripted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Ticks to simulate.
    pub ticks: u32,
    /// Host parameters.
    pub host: HostConfig,
    /// Scheduler parameters.
    pub scheduler: SchedulerConfig,
    /// Payload behaviour.
    pub payload: PayloadScript,
    /// Operator commands.
    pub commands: Vec<ScheduledCommand>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            ticks: 100,
            host: HostConfig::default(),
            scheduler: SchedulerConfig::default(),
            payload: PayloadScript::default(),
            commands: Vec::new(),
        }
    }
}

impl Scenario {
    /// Load a scenario from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the scenario
    /// is inconsistent.
    pub fn from_json_file(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let scenario: Self =
            serde_json::from_str(&text).map_err(|source| ScenarioError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Check the scenario for consistency.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler config is invalid, the run would
    /// overflow the tick counter, or a command is scheduled past the end of
    /// the run.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        self.scheduler.validate()?;
        if self.host.tick_limit <= 0.0 || self.host.cpu_limit < 0.0 {
            return Err(ScenarioError::Invalid(
                "host cpu limits must be positive".to_string(),
            ));
        }
        let Some(end) = self.host.start_time.checked_add(self.ticks) else {
            return Err(ScenarioError::Invalid(format!(
                "{} ticks from tick {} overflow the tick counter",
                self.ticks, self.host.start_time
            )));
        };
        if let Some(late) = self.commands.iter().find(|c| c.tick >= end) {
            return Err(ScenarioError::Invalid(format!(
                "command `{}` at tick {} is past the last tick {}",
                late.command,
                late.tick,
                end.saturating_sub(1)
            )));
        }
        Ok(())
    }

    /// Build a session for this scenario.
    #[must_use]
    pub fn session(&self) -> Session<ScriptedLoader, impl FnMut() -> ScriptedLoader + use<>> {
        let script = self.payload.clone();
        Session::new(SimHost::new(self.host), self.scheduler, move || script.loader())
            .with_commands(self.commands.clone())
    }

    /// Run the scenario to completion.
    #[must_use]
    pub fn run(&self) -> SessionReport {
        self.session().run(self.ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_commands_deserialize_from_console_text() {
        let json = r#"{
            "ticks": 10,
            "commands": [
                {"tick": 2, "command": "pause"},
                {"tick": 4, "command": "toggle_flag creepsay"}
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.commands[0].command, OperatorCommand::Pause);
        assert_eq!(
            scenario.commands[1].command,
            OperatorCommand::ToggleFlag("creepsay".to_string())
        );
        assert_eq!(scenario.host, HostConfig::default());
    }

    #[test]
    fn test_bad_command_rejected() {
        let json = r#"{"commands": [{"tick": 0, "command": "launch"}]}"#;
        assert!(serde_json::from_str::<Scenario>(json).is_err());
    }

    #[test]
    fn test_late_command_rejected() {
        let scenario = Scenario {
            ticks: 5,
            commands: vec![ScheduledCommand {
                tick: 5,
                command: OperatorCommand::Pause,
            }],
            ..Scenario::default()
        };
        assert!(matches!(scenario.validate(), Err(ScenarioError::Invalid(_))));
    }

    #[test]
    fn test_tick_counter_overflow_rejected() {
        let scenario = Scenario {
            ticks: 2,
            host: HostConfig {
                start_time: u32::MAX,
                ..HostConfig::default()
            },
            ..Scenario::default()
        };
        assert!(matches!(scenario.validate(), Err(ScenarioError::Invalid(_))));

        let scenario = Scenario {
            ticks: 10,
            host: HostConfig {
                start_time: u32::MAX - 10,
                ..HostConfig::default()
            },
            ..Scenario::default()
        };
        assert!(scenario.validate().is_ok());
        assert_eq!(scenario.run().ticks, 10);
    }

    #[test]
    fn test_from_file_and_run() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"ticks": 20, "host": {{"bucket": 600}}, "payload": {{"fault_ticks": [5]}}}}"#
        )
        .unwrap();
        let scenario = Scenario::from_json_file(file.path()).unwrap();
        let report = scenario.run();
        assert_eq!(report.ticks, 20);
        assert_eq!(report.faults, 1);
        assert_eq!(report.halts, 1);
    }
}
