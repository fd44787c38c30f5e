//! In-process simulation of the host runtime.
//!
//! [`SimHost`] models the CPU bucket the way the game server does: every tick
//! grants `cpu_limit` CPU, unused CPU accumulates in the bucket up to
//! `bucket_cap`, and a tick may spend up to `min(tick_limit, bucket + cpu_limit)`.
//! A [`Session`] drives a scheduler over many ticks and recreates it after
//! every halt, which is what the real host does to a destroyed environment.

mod rng;
mod scenario;
mod scripted;
mod soak;

pub use rng::Rng;
pub use scenario::{Scenario, ScenarioError, ScheduledCommand};
pub use scripted::{PayloadScript, ScriptedLoader, ScriptedPayload, ScriptedProgress};
pub use soak::{run_session, run_soak, SoakConfig, SoakStats};

use crate::config::SchedulerConfig;
use crate::console::{self, OperatorCommand};
use crate::host::{HostRuntime, SegmentId, TickBudget};
use crate::payload::PayloadLoader;
use crate::scheduler::{Scheduler, TickOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Host parameters for a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// CPU granted per tick.
    pub cpu_limit: f64,
    /// Absolute per-tick ceiling.
    pub tick_limit: f64,
    /// Bucket at the first tick.
    pub bucket: u32,
    /// Maximum bucket.
    pub bucket_cap: u32,
    /// Tick number of the first tick.
    pub start_time: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cpu_limit: 20.0,
            tick_limit: 500.0,
            bucket: 10_000,
            bucket_cap: 10_000,
            start_time: 0,
        }
    }
}

/// Simulated host runtime.
#[derive(Debug, Clone)]
pub struct SimHost {
    config: HostConfig,
    time: u32,
    bucket: f64,
    used: f64,
    halt_requested: bool,
    halts: u32,
    overruns: u32,
    segments: BTreeMap<SegmentId, Vec<u8>>,
    notifications: Vec<String>,
}

impl SimHost {
    /// Create a host at the configured start tick and bucket.
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            time: config.start_time,
            bucket: f64::from(config.bucket),
            used: 0.0,
            halt_requested: false,
            halts: 0,
            overruns: 0,
            segments: BTreeMap::new(),
            notifications: Vec::new(),
        }
    }

    /// Host parameters.
    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Close the current tick: settle the bucket and advance time.
    ///
    /// Returns `true` if the tick overran its limit.
    pub fn end_tick(&mut self) -> bool {
        let limit = self.tick_limit();
        let overran = self.used > limit;
        if overran {
            self.overruns += 1;
        }
        let settled = self.bucket + self.config.cpu_limit - self.used.min(limit);
        self.bucket = settled.clamp(0.0, f64::from(self.config.bucket_cap));
        self.used = 0.0;
        self.time = self.time.wrapping_add(1);
        overran
    }

    /// Consume a pending halt request.
    pub fn take_halt(&mut self) -> bool {
        std::mem::take(&mut self.halt_requested)
    }

    /// Total halts so far.
    #[must_use]
    pub fn halts(&self) -> u32 {
        self.halts
    }

    /// Ticks that ran past their limit.
    #[must_use]
    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    /// Messages sent to the notification channel.
    #[must_use]
    pub fn notifications(&self) -> &[String] {
        &self.notifications
    }

    /// Force the bucket, e.g. to stage a scenario.
    pub fn set_bucket(&mut self, bucket: u32) {
        self.bucket = f64::from(bucket.min(self.config.bucket_cap));
    }

    fn tick_limit(&self) -> f64 {
        self.config.tick_limit.min(self.bucket + self.config.cpu_limit)
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl HostRuntime for SimHost {
    fn time(&self) -> u32 {
        self.time
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn budget(&self) -> TickBudget {
        TickBudget {
            used: self.used,
            limit: self.tick_limit(),
            bucket: (self.bucket - self.used).max(0.0).floor() as u32,
        }
    }

    fn consume_cpu(&mut self, cpu: f64) {
        self.used += cpu.max(0.0);
    }

    fn halt(&mut self) {
        self.halt_requested = true;
        self.halts += 1;
    }

    fn segment(&self, id: SegmentId) -> Option<&[u8]> {
        self.segments.get(&id).map(Vec::as_slice)
    }

    fn set_segment(&mut self, id: SegmentId, data: Vec<u8>) {
        self.segments.insert(id, data);
    }

    fn clear_segment(&mut self, id: SegmentId) {
        self.segments.remove(&id);
    }

    fn notify(&mut self, message: &str) {
        self.notifications.push(message.to_string());
    }
}

/// One simulated tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickRecord {
    /// Tick number.
    pub time: u32,
    /// Environment generation (increments after every halt).
    pub generation: u32,
    /// What the scheduler did.
    pub outcome: String,
    /// CPU spent.
    pub cpu_used: f64,
    /// Bucket after settling.
    pub bucket: u32,
    /// Whether the tick overran its limit.
    pub overran: bool,
    /// Replies to operator commands issued before the tick.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub console: Vec<String>,
}

/// Totals for a session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    /// Ticks simulated.
    pub ticks: u32,
    /// Ticks where the payload ran.
    pub ran: u32,
    /// Successful loads.
    pub loads: u32,
    /// Ticks skipped waiting for bucket.
    pub deferred: u32,
    /// Ticks skipped while paused.
    pub paused: u32,
    /// Faults caught.
    pub faults: u32,
    /// Environment halts.
    pub halts: u32,
    /// Ticks that overran their limit.
    pub overruns: u32,
    /// Bucket at the end.
    pub final_bucket: u32,
    /// Per-tick log.
    pub records: Vec<TickRecord>,
}

impl SessionReport {
    fn record(&mut self, outcome: TickOutcome) {
        self.ticks += 1;
        match outcome {
            TickOutcome::Paused => self.paused += 1,
            TickOutcome::Halted => self.halts += 1,
            TickOutcome::LoadDeferred { .. } => self.deferred += 1,
            TickOutcome::Loaded { ran } => {
                self.loads += 1;
                if ran {
                    self.ran += 1;
                }
            }
            TickOutcome::Ran => self.ran += 1,
            TickOutcome::Faulted(_) => self.faults += 1,
        }
    }
}

/// Drives a scheduler through a simulated host, recreating the environment
/// after every halt.
pub struct Session<L, F> {
    host: SimHost,
    config: SchedulerConfig,
    make_loader: F,
    scheduler: Scheduler<L>,
    generation: u32,
    commands: Vec<ScheduledCommand>,
}

impl<L, F> std::fmt::Debug for Session<L, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl<L, F> Session<L, F>
where
    L: PayloadLoader,
    F: FnMut() -> L,
{
    /// Create a session. `make_loader` builds the loader for every fresh
    /// environment.
    pub fn new(host: SimHost, config: SchedulerConfig, mut make_loader: F) -> Self {
        let scheduler = Scheduler::with_config(make_loader(), config);
        Self {
            host,
            config,
            make_loader,
            scheduler,
            generation: 0,
            commands: Vec::new(),
        }
    }

    /// Queue operator commands to issue before specific ticks.
    #[must_use]
    pub fn with_commands(mut self, mut commands: Vec<ScheduledCommand>) -> Self {
        commands.sort_by_key(|c| c.tick);
        self.commands = commands;
        self
    }

    /// The simulated host.
    #[must_use]
    pub fn host(&self) -> &SimHost {
        &self.host
    }

    /// The current environment's scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler<L> {
        &self.scheduler
    }

    /// Mutable access to the current scheduler and the host, for issuing
    /// commands by hand.
    pub fn parts_mut(&mut self) -> (&mut Scheduler<L>, &mut SimHost) {
        (&mut self.scheduler, &mut self.host)
    }

    /// Environment generation.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Run one tick, returning its record.
    pub fn step(&mut self) -> (TickOutcome, TickRecord) {
        let time = self.host.time();
        let console = self.issue_commands(time);

        let outcome = self.scheduler.on_tick(&mut self.host);
        let cpu_used = self.host.budget().used;
        let overran = self.host.end_tick();
        debug!(tick = time, ?outcome, cpu_used, "tick settled");

        let record = TickRecord {
            time,
            generation: self.generation,
            outcome: format!("{outcome:?}"),
            cpu_used,
            bucket: self.host.budget().bucket,
            overran,
            console,
        };

        if self.host.take_halt() {
            self.generation += 1;
            info!(generation = self.generation, "environment recreated");
            self.scheduler = Scheduler::with_config((self.make_loader)(), self.config);
        }

        (outcome, record)
    }

    /// Run `ticks` ticks and summarize.
    pub fn run(&mut self, ticks: u32) -> SessionReport {
        let mut report = SessionReport::default();
        for _ in 0..ticks {
            let (outcome, record) = self.step();
            report.record(outcome);
            if record.overran {
                report.overruns += 1;
            }
            report.records.push(record);
        }
        report.final_bucket = self.host.budget().bucket;
        report
    }

    fn issue_commands(&mut self, time: u32) -> Vec<String> {
        let due = self.commands.iter().take_while(|c| c.tick <= time).count();
        self.commands
            .drain(..due)
            .map(|scheduled| {
                let reply = console::dispatch(
                    &mut self.scheduler,
                    &mut self.host,
                    &scheduled.command,
                );
                info!(tick = time, command = %scheduled.command, "{reply}");
                reply
            })
            .collect()
    }
}

/// Convenience for parsing a `TICK:COMMAND` pair.
///
/// # Errors
///
/// Returns an error if the tick or the command is malformed.
pub fn parse_scheduled(text: &str) -> Result<ScheduledCommand, ScenarioError> {
    let (tick, command) = text
        .split_once(':')
        .ok_or_else(|| ScenarioError::Invalid(format!("expected TICK:COMMAND, got `{text}`")))?;
    let tick = tick
        .trim()
        .parse()
        .map_err(|_| ScenarioError::Invalid(format!("bad tick in `{text}`")))?;
    let command: OperatorCommand = command.parse()?;
    Ok(ScheduledCommand { tick, command })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_accumulates_unused_cpu() {
        let mut host = SimHost::new(HostConfig {
            bucket: 100,
            ..HostConfig::default()
        });
        host.consume_cpu(5.0);
        assert!(!host.end_tick());
        assert_eq!(host.budget().bucket, 115);
        assert_eq!(host.time(), 1);
    }

    #[test]
    fn test_bucket_capped() {
        let mut host = SimHost::new(HostConfig::default());
        host.end_tick();
        assert_eq!(host.budget().bucket, 10_000);
    }

    #[test]
    fn test_overrun_detected() {
        let mut host = SimHost::new(HostConfig {
            bucket: 0,
            ..HostConfig::default()
        });
        host.consume_cpu(25.0);
        assert!(host.end_tick());
        assert_eq!(host.overruns(), 1);
        assert_eq!(host.budget().bucket, 0);
    }

    #[test]
    fn test_budget_reflects_spend() {
        let mut host = SimHost::new(HostConfig {
            bucket: 600,
            ..HostConfig::default()
        });
        host.consume_cpu(150.0);
        let budget = host.budget();
        assert_eq!(budget.bucket, 450);
        assert!((budget.limit - 500.0).abs() < f64::EPSILON);
        assert!((budget.headroom() - 350.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_time_wraps_at_counter_end() {
        let mut host = SimHost::new(HostConfig {
            start_time: u32::MAX,
            ..HostConfig::default()
        });
        host.end_tick();
        assert_eq!(host.time(), 0);
    }

    #[test]
    fn test_halt_latch() {
        let mut host = SimHost::default();
        host.halt();
        assert!(host.take_halt());
        assert!(!host.take_halt());
        assert_eq!(host.halts(), 1);
    }

    #[test]
    fn test_segments_persist() {
        let mut host = SimHost::default();
        host.set_segment(3, b"abc".to_vec());
        assert_eq!(host.segment(3), Some(&b"abc"[..]));
        host.clear_segment(3);
        assert_eq!(host.segment(3), None);
    }

    #[test]
    fn test_parse_scheduled() {
        let cmd = parse_scheduled("12:toggle_flag creepsay").unwrap();
        assert_eq!(cmd.tick, 12);
        assert_eq!(
            cmd.command,
            OperatorCommand::ToggleFlag("creepsay".to_string())
        );
        assert!(parse_scheduled("pause").is_err());
        assert!(parse_scheduled("x:pause").is_err());
    }
}
