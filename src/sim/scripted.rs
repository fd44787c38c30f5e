//! Deterministic payload for simulations and tests.

use crate::error::{LoadError, PayloadFault};
use crate::payload::{Payload, PayloadHandle, PayloadLoader, PayloadResult, TickContext};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Behaviour of a [`ScriptedPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadScript {
    /// CPU spent by `initialize`.
    pub init_cpu: f64,
    /// CPU spent by each tick.
    pub tick_cpu: f64,
    /// Host ticks on which `tick` returns a trap.
    pub fault_ticks: BTreeSet<u32>,
    /// Host ticks on which `tick` panics.
    pub panic_ticks: BTreeSet<u32>,
    /// Whether `initialize` fails.
    pub fail_initialize: bool,
    /// Whether the loader refuses to produce the payload.
    pub fail_load: bool,
}

impl Default for PayloadScript {
    fn default() -> Self {
        Self {
            init_cpu: 250.0,
            tick_cpu: 12.0,
            fault_ticks: BTreeSet::new(),
            panic_ticks: BTreeSet::new(),
            fail_initialize: false,
            fail_load: false,
        }
    }
}

impl PayloadScript {
    /// Loader producing a fresh [`ScriptedPayload`] each time.
    #[must_use]
    pub fn loader(&self) -> ScriptedLoader {
        ScriptedLoader {
            script: self.clone(),
        }
    }
}

/// Loader for [`ScriptedPayload`]s.
#[derive(Debug, Clone)]
pub struct ScriptedLoader {
    script: PayloadScript,
}

impl PayloadLoader for ScriptedLoader {
    fn load(&mut self) -> Result<PayloadHandle, LoadError> {
        if self.script.fail_load {
            return Err(LoadError::Rejected("scripted load failure".to_string()));
        }
        let payload = ScriptedPayload::new(self.script.clone());
        Ok(PayloadHandle::new("scripted", Box::new(payload)))
    }
}

/// Progress record the scripted payload keeps in its persisted segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedProgress {
    /// Ticks completed across all environments.
    pub ticks: u64,
    /// Environments that initialized against this record.
    pub boots: u32,
    /// Network rescans requested.
    pub rescans: u32,
    /// Debug flags currently on.
    pub flags: BTreeSet<String>,
    /// Whether self-destruct has run.
    pub destroyed: bool,
}

impl ScriptedProgress {
    /// Decode a persisted record; garbage decodes as a fresh record.
    #[must_use]
    pub fn decode(data: Option<&[u8]>) -> Self {
        data.and_then(|bytes| serde_json::from_slice(bytes).ok())
            .unwrap_or_default()
    }

    fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// A payload whose behaviour is fixed by a [`PayloadScript`].
///
/// It mirrors its progress in heap state and flushes it to the persisted
/// segment explicitly at the end of every successful call.
#[derive(Debug)]
pub struct ScriptedPayload {
    script: PayloadScript,
    progress: ScriptedProgress,
    path_cache: BTreeMap<u32, u64>,
}

impl ScriptedPayload {
    /// Create an uninitialized payload.
    #[must_use]
    pub fn new(script: PayloadScript) -> Self {
        Self {
            script,
            progress: ScriptedProgress::default(),
            path_cache: BTreeMap::new(),
        }
    }

    fn flush(&self, ctx: &mut TickContext<'_>) {
        ctx.flush_segment(self.progress.encode());
    }
}

impl Payload for ScriptedPayload {
    fn initialize(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        ctx.consume_cpu(self.script.init_cpu);
        if self.script.fail_initialize {
            return Err(PayloadFault::Trap {
                message: "initialization aborted".to_string(),
                backtrace: None,
            });
        }
        self.progress = ScriptedProgress::decode(ctx.persisted());
        self.progress.boots += 1;
        info!(boots = self.progress.boots, "scripted payload initialized");
        self.flush(ctx);
        Ok(())
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        let time = ctx.time();
        ctx.consume_cpu(self.script.tick_cpu);

        // Heap cache the host's own machinery would also write through.
        ctx.scratch()
            .set(format!("path:{time}"), serde_json::json!(self.progress.ticks));
        self.path_cache.insert(time, self.progress.ticks);

        if self.script.panic_ticks.contains(&time) {
            panic!("scripted panic on tick {time}");
        }
        if self.script.fault_ticks.contains(&time) {
            return Err(PayloadFault::Trap {
                message: format!("scripted fault on tick {time}"),
                backtrace: Some(format!("0: scripted::tick at tick {time}")),
            });
        }

        self.progress.ticks += 1;
        self.flush(ctx);
        Ok(())
    }

    fn reset_state(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        self.progress = ScriptedProgress {
            boots: 1,
            ..ScriptedProgress::default()
        };
        self.path_cache.clear();
        self.flush(ctx);
        Ok(())
    }

    fn toggle_flag(&mut self, ctx: &mut TickContext<'_>, name: &str) -> PayloadResult {
        if !self.progress.flags.remove(name) {
            self.progress.flags.insert(name.to_string());
        }
        self.flush(ctx);
        Ok(())
    }

    fn wipe_memory(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        self.progress = ScriptedProgress::default();
        self.path_cache.clear();
        self.flush(ctx);
        Ok(())
    }

    fn rescan_network(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        self.progress.rescans += 1;
        self.flush(ctx);
        Ok(())
    }

    fn self_destruct(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        warn!("scripted payload tearing everything down");
        self.progress.destroyed = true;
        self.path_cache.clear();
        self.flush(ctx);
        Ok(())
    }
}
