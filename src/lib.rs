// Allow unwrap and unreadable literals in tests (test code is not production)
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::unreadable_literal))]
//! Tickboot: a budget-gated, fault-contained tick scheduler for sandboxed
//! payload modules.
//!
//! A host runtime calls [`Scheduler::on_tick`] once per tick. The scheduler
//! loads a heavy payload module only when the CPU bucket can afford it, runs
//! it inside a fault boundary, and turns any payload fault into a deferred
//! environment halt so the next tick starts from a clean heap.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Host runtime  (HostRuntime, sim)  │
//! ├─────────────────────────────────────┤
//! │  Scheduler + operator console       │
//! ├─────────────────────────────────────┤
//! │  Payload  (native or wasmtime)      │
//! └─────────────────────────────────────┘
//! ```

pub mod config;
pub mod confirm;
pub mod console;
pub mod error;
pub mod host;
pub mod payload;
pub mod scheduler;
pub mod sim;
pub mod store;
pub mod wasm;

pub use config::{ConfigError, SchedulerConfig};
pub use console::{dispatch, CommandParseError, OperatorCommand};
pub use error::{LoadError, PayloadFault};
pub use host::{HostRuntime, SegmentId, TickBudget};
pub use payload::{FnLoader, Payload, PayloadHandle, PayloadLoader, PayloadResult, TickContext};
pub use scheduler::{FaultStage, LoadStatus, Phase, Scheduler, SchedulerState, TickOutcome};
pub use store::ScratchStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_debug() {
        let outcome = TickOutcome::LoadDeferred {
            bucket: 400,
            threshold: 500,
        };
        let debug = format!("{outcome:?}");
        assert!(debug.contains("LoadDeferred"));
        assert!(debug.contains("400"));
    }
}
