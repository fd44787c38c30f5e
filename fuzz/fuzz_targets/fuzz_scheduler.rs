#![no_main]

//! Scheduler fuzzer.
//!
//! Drives a simulated session with arbitrary starting buckets, fault ticks
//! and operator commands typed as raw console text. Checks that faults never
//! escape the scheduler and that every fault halts the environment on the
//! next unpaused tick.
//!
//! Panicking payloads are left to the unit tests: the fuzzer's panic hook
//! aborts before the scheduler can catch the unwind.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tickboot::sim::{HostConfig, PayloadScript, Session, SimHost};
use tickboot::{OperatorCommand, SchedulerConfig, TickOutcome, dispatch};

/// One step of the fuzzed session.
#[derive(Arbitrary, Debug)]
enum Step {
    /// Run a tick.
    Tick,
    /// Type a console command.
    Console(String),
    /// Force the bucket.
    SetBucket(u16),
}

#[derive(Arbitrary, Debug)]
struct SessionInput {
    bucket: u16,
    load_threshold: u16,
    fault_ticks: Vec<u8>,
    fail_initialize: bool,
    steps: Vec<Step>,
}

fuzz_target!(|input: SessionInput| {
    let load_threshold = u32::from(input.load_threshold % 2_000);
    let config = SchedulerConfig {
        load_threshold,
        high_water: load_threshold.max(1_000),
        ..SchedulerConfig::default()
    };
    let script = PayloadScript {
        fault_ticks: input.fault_ticks.iter().map(|&t| u32::from(t)).collect(),
        fail_initialize: input.fail_initialize,
        ..PayloadScript::default()
    };
    let host = SimHost::new(HostConfig {
        bucket: u32::from(input.bucket),
        ..HostConfig::default()
    });
    let mut session = Session::new(host, config, move || script.loader());

    let mut previous = None;
    for step in input.steps.into_iter().take(300) {
        match step {
            Step::Tick => {
                let paused = session.scheduler().state().paused();
                let (outcome, _) = session.step();
                if paused {
                    assert_eq!(outcome, TickOutcome::Paused);
                } else if matches!(previous, Some(TickOutcome::Faulted(_))) {
                    assert_eq!(outcome, TickOutcome::Halted);
                }
                if matches!(outcome, TickOutcome::Faulted(_)) {
                    assert!(session.scheduler().state().pending_halt());
                }
                if outcome != TickOutcome::Paused {
                    previous = Some(outcome);
                }
            }
            Step::Console(text) => {
                if let Ok(command) = text.parse::<OperatorCommand>() {
                    let (scheduler, host) = session.parts_mut();
                    let reply = dispatch(scheduler, host, &command);
                    assert!(!reply.is_empty());
                }
            }
            Step::SetBucket(bucket) => {
                let (_, host) = session.parts_mut();
                host.set_bucket(u32::from(bucket));
            }
        }
    }
});
