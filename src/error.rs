//! Error types for payload loading and payload execution.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to acquire a payload module.
///
/// A load error never leaves the scheduler in the loaded state; it is treated
/// like any other payload fault and escalates to a halt.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The payload artifact could not be read.
    #[error("failed to read payload {}: {source}", path.display())]
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The payload failed to compile.
    #[error("payload compilation failed: {0}")]
    Compile(String),
    /// The payload compiled but could not be linked or instantiated.
    #[error("payload link failed: {0}")]
    Link(String),
    /// A required entry point is missing.
    #[error("payload is missing required export `{0}`")]
    MissingExport(&'static str),
    /// The loader refused to produce a payload.
    #[error("payload rejected: {0}")]
    Rejected(String),
}

/// A fault raised by a call into the payload.
#[derive(Debug, Error)]
pub enum PayloadFault {
    /// The payload trapped (runtime error inside the sandbox).
    #[error("payload trapped: {message}")]
    Trap {
        /// Trap message.
        message: String,
        /// Backtrace captured at the trap site, if any.
        backtrace: Option<String>,
    },
    /// The payload ran past its CPU allowance for the call.
    #[error("payload exhausted its cpu budget")]
    BudgetExhausted,
    /// A native payload panicked.
    #[error("payload panicked: {0}")]
    Panicked(String),
    /// The entry point returned a non-zero status.
    #[error("payload returned error code {0}")]
    ErrorCode(i32),
    /// The payload does not provide the requested entry point.
    #[error("payload does not support `{0}`")]
    Unsupported(&'static str),
    /// Host-side failure while servicing the call.
    #[error("host error during payload call: {0}")]
    Host(String),
}

impl PayloadFault {
    /// Build a fault from a caught panic payload.
    #[must_use]
    pub fn from_panic(panic: &(dyn std::any::Any + Send)) -> Self {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(message)
    }

    /// Trace information attached to the fault, if any.
    #[must_use]
    pub fn trace(&self) -> Option<&str> {
        match self {
            Self::Trap { backtrace, .. } => backtrace.as_deref(),
            _ => None,
        }
    }
}
