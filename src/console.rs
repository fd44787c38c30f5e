//! Operator console.
//!
//! Commands arrive as plain text (`pause`, `wipe_memory yes`,
//! `toggle_flag creepsay`, ...), are parsed into an [`OperatorCommand`] and
//! applied to a scheduler with [`dispatch`], which always answers with a
//! human-readable reply.

use crate::host::HostRuntime;
use crate::payload::PayloadLoader;
use crate::scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Static help text.
pub const HELP: &str = "\
Available commands:
  - help: display this message
  - pause / resume / toggle_pause: pause or resume execution
  - wipe_memory [yes|no]: wipe all memory (asks for confirmation)
  - self_destruct [yes|no]: tear down everything the bot controls (asks for confirmation)
  - rescan_network: rescan the hauler network
  - toggle_flag <name>: toggle a debug flag (e.g. creepsay, intents_profiling)
  - request_reset: re-initialize the persisted store";

/// A parsed operator command.
///
/// Serializes as its console text, so scenario files can list commands the
/// way an operator would type them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OperatorCommand {
    /// List the commands.
    Help,
    /// Pause execution.
    Pause,
    /// Resume execution.
    Resume,
    /// Flip the pause flag.
    TogglePause,
    /// Two-phase memory wipe with an optional confirmation token.
    WipeMemory(Option<String>),
    /// Two-phase self-destruct with an optional confirmation token.
    SelfDestruct(Option<String>),
    /// Rescan the payload's logistics network.
    RescanNetwork,
    /// Toggle a named debug flag.
    ToggleFlag(String),
    /// Re-initialize the persisted store.
    RequestReset,
}

/// Error parsing an operator command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    /// Nothing to parse.
    #[error("empty command")]
    Empty,
    /// Unknown command name.
    #[error("unknown command `{0}`, try `help`")]
    Unknown(String),
    /// A required argument is missing.
    #[error("`{command}` needs an argument: {expected}")]
    MissingArgument {
        /// Command name.
        command: &'static str,
        /// What was expected.
        expected: &'static str,
    },
    /// The command got more arguments than it takes.
    #[error("`{0}` takes no further arguments")]
    TrailingArguments(&'static str),
}

impl FromStr for OperatorCommand {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let Some(head) = words.next() else {
            return Err(CommandParseError::Empty);
        };
        // Console habit: `pause_exec()` works as well as `pause_exec`.
        let name = head.strip_suffix("()").unwrap_or(head).to_ascii_lowercase();
        let arg = words.next().map(str::to_string);

        let (command, canonical) = match name.as_str() {
            "help" => (Self::Help, "help"),
            "pause" => (Self::Pause, "pause"),
            "resume" | "unpause" => (Self::Resume, "resume"),
            "toggle_pause" | "pause_exec" => (Self::TogglePause, "toggle_pause"),
            "wipe_memory" => return finish(Self::WipeMemory(arg), "wipe_memory", words),
            "self_destruct" | "red_button" => {
                return finish(Self::SelfDestruct(arg), "self_destruct", words);
            }
            "rescan_network" | "hauler_rescan" => (Self::RescanNetwork, "rescan_network"),
            "toggle_creepsay" => (Self::ToggleFlag("creepsay".to_string()), "toggle_creepsay"),
            "toggle_intents_profiling" => (
                Self::ToggleFlag("intents_profiling".to_string()),
                "toggle_intents_profiling",
            ),
            "toggle_flag" => {
                let Some(flag) = arg else {
                    return Err(CommandParseError::MissingArgument {
                        command: "toggle_flag",
                        expected: "flag name",
                    });
                };
                return finish(Self::ToggleFlag(flag), "toggle_flag", words);
            }
            "request_reset" | "reset" => (Self::RequestReset, "request_reset"),
            _ => return Err(CommandParseError::Unknown(name)),
        };

        if arg.is_some() {
            return Err(CommandParseError::TrailingArguments(canonical));
        }
        Ok(command)
    }
}

impl TryFrom<String> for OperatorCommand {
    type Error = CommandParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OperatorCommand> for String {
    fn from(command: OperatorCommand) -> Self {
        command.to_string()
    }
}

fn finish<'a>(
    command: OperatorCommand,
    name: &'static str,
    mut rest: impl Iterator<Item = &'a str>,
) -> Result<OperatorCommand, CommandParseError> {
    if rest.next().is_some() {
        return Err(CommandParseError::TrailingArguments(name));
    }
    Ok(command)
}

impl fmt::Display for OperatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Help => write!(f, "help"),
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::TogglePause => write!(f, "toggle_pause"),
            Self::WipeMemory(None) => write!(f, "wipe_memory"),
            Self::WipeMemory(Some(token)) => write!(f, "wipe_memory {token}"),
            Self::SelfDestruct(None) => write!(f, "self_destruct"),
            Self::SelfDestruct(Some(token)) => write!(f, "self_destruct {token}"),
            Self::RescanNetwork => write!(f, "rescan_network"),
            Self::ToggleFlag(name) => write!(f, "toggle_flag {name}"),
            Self::RequestReset => write!(f, "request_reset"),
        }
    }
}

/// Apply a command to the scheduler and return the operator-facing reply.
pub fn dispatch<L: PayloadLoader>(
    scheduler: &mut Scheduler<L>,
    host: &mut dyn HostRuntime,
    command: &OperatorCommand,
) -> String {
    match command {
        OperatorCommand::Help => HELP.to_string(),
        OperatorCommand::Pause => scheduler.pause(),
        OperatorCommand::Resume => scheduler.resume(),
        OperatorCommand::TogglePause => scheduler.toggle_pause(),
        OperatorCommand::WipeMemory(token) => scheduler.wipe_memory(host, token.as_deref()),
        OperatorCommand::SelfDestruct(token) => {
            scheduler.request_destructive_override(token.as_deref())
        }
        OperatorCommand::RescanNetwork => scheduler.rescan_network(host),
        OperatorCommand::ToggleFlag(name) => scheduler.toggle_debug_flag(host, name),
        OperatorCommand::RequestReset => scheduler.request_reset(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{PayloadScript, SimHost};

    #[test]
    fn test_parse_basic() {
        assert_eq!("help".parse::<OperatorCommand>(), Ok(OperatorCommand::Help));
        assert_eq!("  pause ".parse::<OperatorCommand>(), Ok(OperatorCommand::Pause));
        assert_eq!("RESUME".parse::<OperatorCommand>(), Ok(OperatorCommand::Resume));
        assert_eq!("request_reset".parse::<OperatorCommand>(), Ok(OperatorCommand::RequestReset));
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("pause_exec()".parse::<OperatorCommand>(), Ok(OperatorCommand::TogglePause));
        assert_eq!("hauler_rescan".parse::<OperatorCommand>(), Ok(OperatorCommand::RescanNetwork));
        assert_eq!("red_button".parse::<OperatorCommand>(), Ok(OperatorCommand::SelfDestruct(None)));
        assert_eq!(
            "toggle_creepsay".parse::<OperatorCommand>(),
            Ok(OperatorCommand::ToggleFlag("creepsay".to_string()))
        );
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(
            "wipe_memory yes".parse::<OperatorCommand>(),
            Ok(OperatorCommand::WipeMemory(Some("yes".to_string())))
        );
        assert_eq!(
            "self_destruct no".parse::<OperatorCommand>(),
            Ok(OperatorCommand::SelfDestruct(Some("no".to_string())))
        );
        assert_eq!(
            "toggle_flag".parse::<OperatorCommand>(),
            Err(CommandParseError::MissingArgument {
                command: "toggle_flag",
                expected: "flag name",
            })
        );
        assert_eq!(
            "pause now".parse::<OperatorCommand>(),
            Err(CommandParseError::TrailingArguments("pause"))
        );
        assert_eq!(
            "wipe_memory yes please".parse::<OperatorCommand>(),
            Err(CommandParseError::TrailingArguments("wipe_memory"))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<OperatorCommand>(), Err(CommandParseError::Empty));
        assert!(matches!(
            "launch_nukes".parse::<OperatorCommand>(),
            Err(CommandParseError::Unknown(name)) if name == "launch_nukes"
        ));
    }

    #[test]
    fn test_display_parses_back() {
        for command in [
            OperatorCommand::TogglePause,
            OperatorCommand::WipeMemory(Some("yes".to_string())),
            OperatorCommand::SelfDestruct(None),
            OperatorCommand::ToggleFlag("creepsay".to_string()),
        ] {
            assert_eq!(command.to_string().parse::<OperatorCommand>(), Ok(command));
        }
    }

    #[test]
    fn test_dispatch() {
        let mut scheduler = Scheduler::new(PayloadScript::default().loader());
        let mut host = SimHost::default();

        assert_eq!(
            dispatch(&mut scheduler, &mut host, &OperatorCommand::TogglePause),
            "Setting execution pause to: true"
        );
        assert_eq!(
            dispatch(&mut scheduler, &mut host, &OperatorCommand::TogglePause),
            "Setting execution pause to: false"
        );
        assert_eq!(
            dispatch(&mut scheduler, &mut host, &OperatorCommand::RescanNetwork),
            "Module not loaded."
        );
        assert!(dispatch(&mut scheduler, &mut host, &OperatorCommand::Help).contains("wipe_memory"));

        scheduler.on_tick(&mut host);
        assert_eq!(
            dispatch(&mut scheduler, &mut host, &OperatorCommand::RescanNetwork),
            "Rescanned network."
        );
    }
}
