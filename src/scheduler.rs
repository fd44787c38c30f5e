//! The tick scheduler.
//!
//! One long-lived [`Scheduler`] is constructed per execution environment and
//! driven by the host through [`Scheduler::on_tick`]. Each tick it:
//!
//! 1. returns immediately when paused,
//! 2. halts the environment when a previous fault armed `pending_halt`,
//! 3. loads the payload if the bucket allows it (otherwise skips the tick),
//! 4. runs the payload inside the fault boundary.
//!
//! Nothing escapes `on_tick`. A payload fault is logged, forwarded to the host
//! notification channel and turned into a deferred halt: the rest of the tick
//! is given up so the diagnostics are flushed, and the next tick destroys the
//! environment so the payload restarts from a clean heap.

use crate::config::SchedulerConfig;
use crate::confirm::{ConfirmStep, Confirmation};
use crate::error::PayloadFault;
use crate::host::HostRuntime;
use crate::payload::{Payload, PayloadHandle, PayloadLoader, PayloadResult, TickContext};
use crate::store::ScratchStore;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Mutable scheduler flags plus the payload handle.
///
/// `loaded` is derived from the presence of the handle, so a loaded scheduler
/// always owns an initialized payload.
#[derive(Debug, Default)]
pub struct SchedulerState {
    payload: Option<PayloadHandle>,
    paused: bool,
    pending_halt: bool,
    faulted: bool,
    load_blocked: bool,
    reset_requested: bool,
}

impl SchedulerState {
    /// Whether the payload is loaded and initialized.
    #[must_use]
    pub fn loaded(&self) -> bool {
        self.payload.is_some()
    }

    /// Whether the operator paused execution.
    #[must_use]
    pub fn paused(&self) -> bool {
        self.paused
    }

    /// Whether the next tick will halt the environment.
    #[must_use]
    pub fn pending_halt(&self) -> bool {
        self.pending_halt
    }

    /// Whether a payload fault was caught in this environment.
    #[must_use]
    pub fn faulted(&self) -> bool {
        self.faulted
    }

    /// Whether a store reset is waiting to be applied.
    #[must_use]
    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    /// Name of the loaded payload.
    #[must_use]
    pub fn payload_name(&self) -> Option<&str> {
        self.payload.as_ref().map(PayloadHandle::name)
    }
}

/// Coarse scheduler mode, derived from [`SchedulerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No payload, no load attempted yet.
    Unloaded,
    /// The last load attempt was declined for lack of bucket.
    LoadingBlocked,
    /// Payload loaded, ticking normally.
    LoadedRunning,
    /// Operator pause.
    Paused,
    /// A fault was caught; the next tick halts.
    FaultedPendingHalt,
}

/// Which payload call a fault came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStage {
    /// Acquiring the payload from the loader.
    Load,
    /// The payload's initialize entry point.
    Initialize,
    /// A regular tick.
    Tick,
    /// A requested store reset.
    Reset,
    /// A committed self-destruct.
    SelfDestruct,
    /// An operator command forwarded to the payload.
    Command(&'static str),
}

impl fmt::Display for FaultStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Initialize => write!(f, "initialize"),
            Self::Tick => write!(f, "tick"),
            Self::Reset => write!(f, "reset"),
            Self::SelfDestruct => write!(f, "self-destruct"),
            Self::Command(name) => write!(f, "command `{name}`"),
        }
    }
}

/// What a single [`Scheduler::on_tick`] did.
///
/// Informational only; the host may ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Skipped because execution is paused.
    Paused,
    /// The environment was halted.
    Halted,
    /// Not enough bucket to load; tick skipped.
    LoadDeferred {
        /// Bucket observed.
        bucket: u32,
        /// Bucket required.
        threshold: u32,
    },
    /// The payload was loaded this tick.
    Loaded {
        /// Whether it also ran a tick.
        ran: bool,
    },
    /// The payload ran a tick.
    Ran,
    /// A fault was caught; the environment halts next tick.
    Faulted(FaultStage),
}

/// Result of the load sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Nothing done; the payload was already loaded.
    AlreadyLoaded,
    /// Loaded and initialized by this call.
    Loaded,
    /// Declined: the bucket is below the threshold.
    Deferred {
        /// Bucket observed.
        bucket: u32,
        /// Bucket required.
        threshold: u32,
    },
    /// Loading or initialization faulted.
    Failed(FaultStage),
}

/// Budget-gated loader and fault-contained driver for a payload.
pub struct Scheduler<L> {
    config: SchedulerConfig,
    loader: L,
    state: SchedulerState,
    self_destruct: Confirmation,
    wipe: Confirmation,
}

impl<L> fmt::Debug for Scheduler<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("self_destruct", &self.self_destruct)
            .field("wipe", &self.wipe)
            .finish_non_exhaustive()
    }
}

/// Call into the payload, turning a panic into a fault.
fn guard(call: impl FnOnce() -> PayloadResult) -> PayloadResult {
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|panic| Err(PayloadFault::from_panic(&*panic)))
}

impl<L: PayloadLoader> Scheduler<L> {
    /// Create a scheduler with default configuration.
    pub fn new(loader: L) -> Self {
        Self::with_config(loader, SchedulerConfig::default())
    }

    /// Create a scheduler with explicit configuration.
    pub fn with_config(loader: L, config: SchedulerConfig) -> Self {
        Self {
            config,
            loader,
            state: SchedulerState::default(),
            self_destruct: Confirmation::default(),
            wipe: Confirmation::default(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current flags.
    #[must_use]
    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// The loader this scheduler acquires payloads from.
    #[must_use]
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Whether a self-destruct is committed and waiting for the next tick.
    #[must_use]
    pub fn self_destruct_committed(&self) -> bool {
        self.self_destruct.is_committed()
    }

    /// Derived mode.
    #[must_use]
    pub fn phase(&self) -> Phase {
        if self.state.paused {
            Phase::Paused
        } else if self.state.pending_halt {
            Phase::FaultedPendingHalt
        } else if self.state.loaded() {
            Phase::LoadedRunning
        } else if self.state.load_blocked {
            Phase::LoadingBlocked
        } else {
            Phase::Unloaded
        }
    }

    /// Run one tick. Called by the host exactly once per tick.
    pub fn on_tick(&mut self, host: &mut dyn HostRuntime) -> TickOutcome {
        let time = host.time();

        if self.state.paused {
            info!(tick = time, "skipping execution, paused");
            return TickOutcome::Paused;
        }

        if self.state.pending_halt {
            warn!(tick = time, "resetting environment after fault");
            host.halt();
            return TickOutcome::Halted;
        }

        // Shadow store for everything that runs this tick; dropped on return.
        let mut scratch = ScratchStore::new();

        let just_loaded = match self.load_sequence(host, &mut scratch) {
            LoadStatus::AlreadyLoaded => false,
            LoadStatus::Loaded => true,
            LoadStatus::Deferred { bucket, threshold } => {
                return TickOutcome::LoadDeferred { bucket, threshold };
            }
            LoadStatus::Failed(stage) => return TickOutcome::Faulted(stage),
        };

        if just_loaded {
            let bucket = host.budget().bucket;
            if !self.config.run_on_load || bucket < self.config.high_water {
                info!(bucket, "payload loaded, first tick runs next time");
                return TickOutcome::Loaded { ran: false };
            }
            info!(bucket, "bucket is high, running payload in the load tick");
        }

        if let Some(stage) = self.run_payload(host, &mut scratch) {
            return TickOutcome::Faulted(stage);
        }

        if just_loaded {
            info!("executed payload in the same tick it was loaded");
            TickOutcome::Loaded { ran: true }
        } else {
            TickOutcome::Ran
        }
    }

    /// Load the payload if it is not loaded yet and the bucket allows it.
    ///
    /// Idempotent: once loaded this returns [`LoadStatus::AlreadyLoaded`]
    /// without touching the loader or the payload.
    pub fn ensure_loaded(&mut self, host: &mut dyn HostRuntime) -> LoadStatus {
        let mut scratch = ScratchStore::new();
        self.load_sequence(host, &mut scratch)
    }

    fn load_sequence(
        &mut self,
        host: &mut dyn HostRuntime,
        scratch: &mut ScratchStore,
    ) -> LoadStatus {
        if self.state.loaded() {
            return LoadStatus::AlreadyLoaded;
        }

        let budget = host.budget();
        let threshold = self.config.load_threshold;
        if budget.bucket < threshold {
            warn!("{}/{} bucket to load payload", budget.bucket, threshold);
            self.state.load_blocked = true;
            return LoadStatus::Deferred {
                bucket: budget.bucket,
                threshold,
            };
        }

        info!(tick = host.time(), "payload not loaded, loading");
        let cpu_before = budget.used;

        let loader = &mut self.loader;
        let loaded = panic::catch_unwind(AssertUnwindSafe(|| loader.load()));
        let mut handle = match loaded {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                self.contain(FaultStage::Load, &err, None, host);
                return LoadStatus::Failed(FaultStage::Load);
            }
            Err(panic) => {
                let fault = PayloadFault::from_panic(&*panic);
                self.contain(FaultStage::Load, &fault, None, host);
                return LoadStatus::Failed(FaultStage::Load);
            }
        };

        let segment = self.config.segment;
        if self.state.reset_requested {
            self.state.reset_requested = false;
            info!(segment, "clearing persisted segment before initialize");
            host.clear_segment(segment);
        }

        let result = {
            let mut ctx = TickContext::new(&mut *host, &mut *scratch, segment);
            guard(|| handle.payload_mut().initialize(&mut ctx))
        };
        if let Err(fault) = result {
            self.contain(FaultStage::Initialize, &fault, fault.trace(), host);
            return LoadStatus::Failed(FaultStage::Initialize);
        }

        let cpu_after = host.budget().used;
        info!(
            payload = handle.name(),
            "{:.2} cpu used to initialize payload",
            cpu_after - cpu_before
        );
        self.state.payload = Some(handle);
        self.state.load_blocked = false;
        LoadStatus::Loaded
    }

    /// Pending reset, committed self-destruct, then the tick itself.
    fn run_payload(
        &mut self,
        host: &mut dyn HostRuntime,
        scratch: &mut ScratchStore,
    ) -> Option<FaultStage> {
        if self.state.reset_requested {
            self.state.reset_requested = false;
            info!("applying requested store reset");
            host.clear_segment(self.config.segment);
            if let Err(fault) = self.invoke(FaultStage::Reset, host, scratch, |p, ctx| {
                p.reset_state(ctx)
            }) && !matches!(fault, PayloadFault::Unsupported(_))
            {
                return Some(FaultStage::Reset);
            }
        }

        if self.self_destruct.take_committed() {
            warn!(tick = host.time(), "executing committed self-destruct");
            if let Err(fault) = self.invoke(FaultStage::SelfDestruct, host, scratch, |p, ctx| {
                p.self_destruct(ctx)
            }) && !matches!(fault, PayloadFault::Unsupported(_))
            {
                return Some(FaultStage::SelfDestruct);
            }
        }

        self.invoke(FaultStage::Tick, host, scratch, |p, ctx| p.tick(ctx))
            .err()
            .map(|_| FaultStage::Tick)
    }

    /// The fault boundary: exactly one call into the loaded payload.
    ///
    /// Faults other than [`PayloadFault::Unsupported`] are contained (logged,
    /// notified, `pending_halt` armed) before being returned to the caller.
    fn invoke<F>(
        &mut self,
        stage: FaultStage,
        host: &mut dyn HostRuntime,
        scratch: &mut ScratchStore,
        call: F,
    ) -> PayloadResult
    where
        F: FnOnce(&mut dyn Payload, &mut TickContext<'_>) -> PayloadResult,
    {
        let segment = self.config.segment;
        let Some(handle) = self.state.payload.as_mut() else {
            return Err(PayloadFault::Host("payload not loaded".to_string()));
        };

        let result = {
            let mut ctx = TickContext::new(&mut *host, &mut *scratch, segment);
            guard(|| call(handle.payload_mut(), &mut ctx))
        };

        match &result {
            Ok(()) => debug!(%stage, "payload call completed"),
            Err(PayloadFault::Unsupported(entry)) => {
                warn!(%stage, entry, "payload does not support this entry point");
            }
            Err(fault) => self.contain(stage, fault, fault.trace(), host),
        }
        result
    }

    /// Log a fault in full and arm the deferred halt.
    fn contain(
        &mut self,
        stage: FaultStage,
        fault: &dyn fmt::Display,
        trace: Option<&str>,
        host: &mut dyn HostRuntime,
    ) {
        let time = host.time();
        error!(tick = time, %stage, "payload fault: {fault}");
        if let Some(trace) = trace {
            error!("{trace}");
        }
        let message = format!("[{time}] {stage} fault: {fault}");
        host.notify(&message);
        error!("destroying environment on next tick");

        self.state.faulted = true;
        self.state.pending_halt = true;
    }

    /// Pause execution.
    pub fn pause(&mut self) -> String {
        self.state.paused = true;
        format!("Setting execution pause to: {}", self.state.paused)
    }

    /// Resume execution.
    pub fn resume(&mut self) -> String {
        self.state.paused = false;
        format!("Setting execution pause to: {}", self.state.paused)
    }

    /// Flip the pause flag.
    pub fn toggle_pause(&mut self) -> String {
        self.state.paused = !self.state.paused;
        format!("Setting execution pause to: {}", self.state.paused)
    }

    /// Ask for the persisted store to be re-initialized.
    ///
    /// Applied by the load sequence before `initialize` when the payload is not
    /// loaded yet, otherwise before the next tick through `reset_state`.
    pub fn request_reset(&mut self) -> String {
        self.state.reset_requested = true;
        if self.state.loaded() {
            "Store reset scheduled for next tick.".to_string()
        } else {
            "Store reset scheduled for next load.".to_string()
        }
    }

    /// Two-phase arm/commit for the payload's self-destruct entry point.
    pub fn request_destructive_override(&mut self, token: Option<&str>) -> String {
        match self.self_destruct.answer(token) {
            ConfirmStep::Armed | ConfirmStep::StillArmed => {
                "Self-destruct armed. This will destroy everything the bot controls. \
                 Confirm with `self_destruct yes` or cancel with `self_destruct no`."
                    .to_string()
            }
            ConfirmStep::Committed => {
                warn!("self-destruct committed");
                "Self-destruct committed; it runs on the next tick.".to_string()
            }
            ConfirmStep::Cancelled => "Self-destruct cancelled.".to_string(),
            ConfirmStep::AlreadyCommitted => {
                "Self-destruct already committed; cancel with `self_destruct no`.".to_string()
            }
        }
    }

    /// Two-phase wipe of the scratch and persisted stores (and the payload's
    /// own memory when loaded). A payload waiting for its halt is not called.
    pub fn wipe_memory(&mut self, host: &mut dyn HostRuntime, token: Option<&str>) -> String {
        match self.wipe.answer(token) {
            ConfirmStep::Armed | ConfirmStep::StillArmed => {
                return "Memory wipe armed. Confirm with `wipe_memory yes` or cancel with \
                        `wipe_memory no`."
                    .to_string();
            }
            ConfirmStep::Cancelled => return "Memory wipe cancelled.".to_string(),
            ConfirmStep::Committed | ConfirmStep::AlreadyCommitted => {}
        }
        self.wipe.take_committed();

        let mut scratch = ScratchStore::new();
        host.clear_segment(self.config.segment);
        warn!(segment = self.config.segment, "persisted memory wiped");

        if self.state.pending_halt {
            warn!("environment is resetting, payload memory left to the halt");
            return "Memory wiped; environment is resetting, payload not called.".to_string();
        }
        if self.state.loaded() {
            let stage = FaultStage::Command("wipe_memory");
            if let Err(fault) =
                self.invoke(stage, host, &mut scratch, |p, ctx| p.wipe_memory(ctx))
            {
                return format!("Memory wiped; payload wipe failed: {fault}");
            }
        }
        "Memory wiped".to_string()
    }

    /// Forward a network rescan request to the payload.
    pub fn rescan_network(&mut self, host: &mut dyn HostRuntime) -> String {
        self.forward(host, "rescan_network", "Rescanned network.", |p, ctx| {
            p.rescan_network(ctx)
        })
    }

    /// Forward a named debug-flag toggle to the payload.
    pub fn toggle_debug_flag(&mut self, host: &mut dyn HostRuntime, name: &str) -> String {
        let done = format!("Toggled {name}.");
        self.forward(host, "toggle_flag", &done, |p, ctx| p.toggle_flag(ctx, name))
    }

    fn forward<F>(
        &mut self,
        host: &mut dyn HostRuntime,
        command: &'static str,
        done: &str,
        call: F,
    ) -> String
    where
        F: FnOnce(&mut dyn Payload, &mut TickContext<'_>) -> PayloadResult,
    {
        if !self.state.loaded() {
            return "Module not loaded.".to_string();
        }
        if self.state.pending_halt {
            return "Environment is resetting; try again after the reset.".to_string();
        }
        let mut scratch = ScratchStore::new();
        match self.invoke(FaultStage::Command(command), host, &mut scratch, call) {
            Ok(()) => done.to_string(),
            Err(fault @ PayloadFault::Unsupported(_)) => format!("{fault}."),
            Err(fault) => format!("Command failed, environment will reset: {fault}"),
        }
    }
}
