//! Randomized soak runs.
//!
//! Many independent sessions with random fault ticks, random starting buckets
//! and random pause toggles run in parallel. Every tick is checked against
//! the scheduler's guarantees; anything that does not hold is reported as a
//! violation instead of aborting the run.

use super::{HostConfig, PayloadScript, Rng, ScheduledCommand, Session, SimHost};
use crate::config::SchedulerConfig;
use crate::console::OperatorCommand;
use crate::host::HostRuntime;
use crate::payload::PayloadLoader;
use crate::scheduler::TickOutcome;
use rayon::prelude::*;
use serde::Serialize;

/// Most violations kept per run; the count is always exact.
const MAX_VIOLATIONS: usize = 32;

/// Parameters for a soak run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoakConfig {
    /// Number of sessions.
    pub sessions: u64,
    /// Ticks per session.
    pub ticks: u32,
    /// Base seed; session `i` uses `seed + i`.
    pub seed: u64,
    /// Probability that a given tick faults.
    pub fault_rate: f64,
    /// Probability that a given tick panics.
    pub panic_rate: f64,
    /// Probability of a pause toggle before a given tick.
    pub pause_rate: f64,
    /// Host parameters; the starting bucket is randomized per session.
    pub host: HostConfig,
    /// Scheduler parameters.
    pub scheduler: SchedulerConfig,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            sessions: 100,
            ticks: 500,
            seed: 42,
            fault_rate: 0.01,
            panic_rate: 0.002,
            pause_rate: 0.005,
            host: HostConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Aggregated results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SoakStats {
    /// Sessions completed.
    pub sessions: u64,
    /// Ticks simulated.
    pub ticks: u64,
    /// Ticks where the payload ran.
    pub ran: u64,
    /// Successful loads.
    pub loads: u64,
    /// Ticks skipped waiting for bucket.
    pub deferred: u64,
    /// Ticks skipped while paused.
    pub paused: u64,
    /// Faults caught.
    pub faults: u64,
    /// Environment halts.
    pub halts: u64,
    /// Ticks that overran the host limit.
    pub overruns: u64,
    /// Invariant violations found.
    pub violation_count: u64,
    /// First violations, for the report.
    pub violations: Vec<String>,
}

impl SoakStats {
    /// Fold another set of stats into this one.
    pub fn merge(&mut self, other: &Self) {
        self.sessions += other.sessions;
        self.ticks += other.ticks;
        self.ran += other.ran;
        self.loads += other.loads;
        self.deferred += other.deferred;
        self.paused += other.paused;
        self.faults += other.faults;
        self.halts += other.halts;
        self.overruns += other.overruns;
        self.violation_count += other.violation_count;
        let room = MAX_VIOLATIONS.saturating_sub(self.violations.len());
        self.violations
            .extend(other.violations.iter().take(room).cloned());
    }

    /// Fraction of ticks the payload actually ran.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn run_ratio(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.ran as f64 / self.ticks as f64
        }
    }

    fn violation(&mut self, message: String) {
        self.violation_count += 1;
        if self.violations.len() < MAX_VIOLATIONS {
            self.violations.push(message);
        }
    }
}

/// Run one randomized session and check it tick by tick.
#[must_use]
pub fn run_session(config: &SoakConfig, index: u64) -> SoakStats {
    let seed = config.seed.wrapping_add(index);
    let mut rng = Rng::new(seed);

    let mut script = PayloadScript::default();
    let start = config.host.start_time;
    for tick in start..start.saturating_add(config.ticks) {
        if rng.chance(config.fault_rate) {
            script.fault_ticks.insert(tick);
        } else if rng.chance(config.panic_rate) {
            script.panic_ticks.insert(tick);
        }
    }

    let mut commands = Vec::new();
    for tick in start..start.saturating_add(config.ticks) {
        if rng.chance(config.pause_rate) {
            commands.push(ScheduledCommand {
                tick,
                command: OperatorCommand::TogglePause,
            });
        }
    }

    let host = HostConfig {
        bucket: rng.next_u32(config.host.bucket_cap.saturating_add(1)),
        ..config.host
    };
    let mut session = Session::new(SimHost::new(host), config.scheduler, move || {
        script.loader()
    })
    .with_commands(commands);

    let mut stats = SoakStats {
        sessions: 1,
        ..SoakStats::default()
    };
    let mut previous = None;
    for _ in 0..config.ticks {
        let bucket_before = session.host().budget().bucket;
        let generation = session.generation();
        let (outcome, record) = session.step();
        stats.ticks += 1;
        if record.overran {
            stats.overruns += 1;
        }
        check_tick(&mut stats, seed, &session, previous, outcome, bucket_before, generation);
        match outcome {
            TickOutcome::Paused => stats.paused += 1,
            TickOutcome::Halted => stats.halts += 1,
            TickOutcome::LoadDeferred { .. } => stats.deferred += 1,
            TickOutcome::Loaded { ran } => {
                stats.loads += 1;
                stats.ran += u64::from(ran);
            }
            TickOutcome::Ran => stats.ran += 1,
            TickOutcome::Faulted(_) => stats.faults += 1,
        }
        previous = Some(outcome);
    }
    stats
}

fn check_tick<L, F>(
    stats: &mut SoakStats,
    seed: u64,
    session: &Session<L, F>,
    previous: Option<TickOutcome>,
    outcome: TickOutcome,
    bucket_before: u32,
    generation: u32,
) where
    L: PayloadLoader,
    F: FnMut() -> L,
{
    let state = session.scheduler().state();
    let time = session.host().time().saturating_sub(1);
    let threshold = session.scheduler().config().load_threshold;
    let mut fail = |what: &str| {
        stats.violation(format!("seed {seed} tick {time}: {what} ({outcome:?})"));
    };

    match outcome {
        TickOutcome::Paused if !state.paused() => fail("paused outcome without pause flag"),
        TickOutcome::Halted if session.generation() != generation + 1 => {
            fail("halt did not recreate the environment");
        }
        TickOutcome::LoadDeferred { bucket, .. } if bucket >= threshold || state.loaded() => {
            fail("load deferred with enough bucket");
        }
        TickOutcome::Loaded { .. } | TickOutcome::Ran if !state.loaded() => {
            fail("payload ran without being loaded");
        }
        TickOutcome::Faulted(_) if !state.pending_halt() || !state.faulted() => {
            fail("fault did not arm the halt");
        }
        _ => {}
    }

    if matches!(outcome, TickOutcome::Loaded { .. }) && bucket_before < threshold {
        fail("load attempted below threshold");
    }

    // A faulted environment gets exactly one more (unpaused) tick: the halt.
    if matches!(previous, Some(TickOutcome::Faulted(_)))
        && !matches!(outcome, TickOutcome::Halted | TickOutcome::Paused)
    {
        fail("tick after a fault did not halt");
    }
}

/// Run all sessions in parallel with a fold/reduce, so each worker only
/// touches its own accumulator.
#[must_use]
pub fn run_soak(config: &SoakConfig) -> SoakStats {
    (0..config.sessions)
        .into_par_iter()
        .fold(SoakStats::default, |mut local, index| {
            local.merge(&run_session(config, index));
            local
        })
        .reduce(SoakStats::default, |mut a, b| {
            a.merge(&b);
            a
        })
}
