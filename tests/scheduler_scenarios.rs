//! End-to-end scheduler scenarios against the simulated host.
//!
//! Run with: cargo test scheduler_scenarios

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::cell::Cell;
use std::rc::Rc;
use tickboot::sim::{HostConfig, PayloadScript, ScriptedProgress, SimHost};
use tickboot::{
    dispatch, FaultStage, FnLoader, HostRuntime, LoadError, OperatorCommand, Payload,
    PayloadFault, PayloadResult, Phase, Scheduler, SchedulerConfig, TickContext, TickOutcome,
};

fn host_with_bucket(bucket: u32) -> SimHost {
    SimHost::new(HostConfig {
        bucket,
        ..HostConfig::default()
    })
}

/// Payload that counts its ticks and faults on demand.
struct Counter {
    ticks: Rc<Cell<u32>>,
    fail: Rc<Cell<bool>>,
}

impl Payload for Counter {
    fn initialize(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        ctx.consume_cpu(250.0);
        Ok(())
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        ctx.consume_cpu(10.0);
        self.ticks.set(self.ticks.get() + 1);
        if self.fail.get() {
            return Err(PayloadFault::ErrorCode(3));
        }
        Ok(())
    }
}

type BoxedFactory = Box<dyn FnMut() -> Result<Box<dyn Payload>, LoadError>>;

type Counted = (Scheduler<FnLoader<BoxedFactory>>, Rc<Cell<u32>>, Rc<Cell<bool>>);

fn counter() -> Counted {
    counter_with(SchedulerConfig::default())
}

fn counter_with(config: SchedulerConfig) -> Counted {
    let ticks = Rc::new(Cell::new(0));
    let fail = Rc::new(Cell::new(false));
    let (t, f) = (Rc::clone(&ticks), Rc::clone(&fail));
    let factory: BoxedFactory = Box::new(move || {
        Ok(Box::new(Counter {
            ticks: Rc::clone(&t),
            fail: Rc::clone(&f),
        }) as Box<dyn Payload>)
    });
    let loader = FnLoader::new("counter", factory);
    (Scheduler::with_config(loader, config), ticks, fail)
}

#[test]
fn test_low_bucket_defers_load() {
    let (mut scheduler, ticks, _) = counter();
    let mut host = host_with_bucket(400);

    let outcome = scheduler.on_tick(&mut host);
    assert_eq!(
        outcome,
        TickOutcome::LoadDeferred {
            bucket: 400,
            threshold: 500
        }
    );
    assert!(!scheduler.state().loaded());
    assert_eq!(ticks.get(), 0);
    assert!(host.budget().used.abs() < f64::EPSILON);
}

#[test]
fn test_threshold_is_inclusive() {
    for (bucket, loads) in [(499, false), (500, true)] {
        let (mut scheduler, _, _) = counter();
        let mut host = host_with_bucket(bucket);
        scheduler.on_tick(&mut host);
        assert_eq!(scheduler.state().loaded(), loads, "bucket {bucket}");
    }
}

#[test]
fn test_moderate_bucket_loads_but_waits() {
    let (mut scheduler, ticks, _) = counter();
    let mut host = host_with_bucket(600);

    assert_eq!(scheduler.on_tick(&mut host), TickOutcome::Loaded { ran: false });
    assert!(scheduler.state().loaded());
    assert_eq!(ticks.get(), 0);

    host.end_tick();
    assert_eq!(scheduler.on_tick(&mut host), TickOutcome::Ran);
    assert_eq!(ticks.get(), 1);
}

#[test]
fn test_high_bucket_runs_in_load_tick() {
    let (mut scheduler, ticks, _) = counter();
    // 1250 - 250 spent on initialize leaves exactly the high-water mark.
    let mut host = host_with_bucket(1250);
    assert_eq!(scheduler.on_tick(&mut host), TickOutcome::Loaded { ran: true });
    assert_eq!(ticks.get(), 1);

    let (mut scheduler, ticks, _) = counter();
    let mut host = host_with_bucket(1249);
    assert_eq!(scheduler.on_tick(&mut host), TickOutcome::Loaded { ran: false });
    assert_eq!(ticks.get(), 0);
}

#[test]
fn test_run_on_load_can_be_disabled() {
    let config = SchedulerConfig {
        run_on_load: false,
        ..SchedulerConfig::default()
    };
    let (mut scheduler, ticks, _) = counter_with(config);
    let mut host = host_with_bucket(10_000);
    assert_eq!(scheduler.on_tick(&mut host), TickOutcome::Loaded { ran: false });
    assert_eq!(ticks.get(), 0);
}

#[test]
fn test_fault_then_halt_consumes_one_tick() {
    let (mut scheduler, ticks, fail) = counter();
    let mut host = host_with_bucket(10_000);
    scheduler.on_tick(&mut host);
    host.end_tick();

    fail.set(true);
    assert_eq!(
        scheduler.on_tick(&mut host),
        TickOutcome::Faulted(FaultStage::Tick)
    );
    assert_eq!(scheduler.phase(), Phase::FaultedPendingHalt);
    assert_eq!(host.notifications().len(), 1);
    host.end_tick();

    let before = ticks.get();
    assert_eq!(scheduler.on_tick(&mut host), TickOutcome::Halted);
    assert_eq!(ticks.get(), before);
    assert!(host.take_halt());
}

#[test]
fn test_paused_scheduler_never_halts() {
    let (mut scheduler, _, fail) = counter();
    let mut host = host_with_bucket(10_000);
    scheduler.on_tick(&mut host);
    fail.set(true);
    scheduler.on_tick(&mut host);

    assert_eq!(
        dispatch(&mut scheduler, &mut host, &OperatorCommand::Pause),
        "Setting execution pause to: true"
    );
    for _ in 0..5 {
        assert_eq!(scheduler.on_tick(&mut host), TickOutcome::Paused);
    }
    assert_eq!(host.halts(), 0);

    dispatch(&mut scheduler, &mut host, &OperatorCommand::Resume);
    assert_eq!(scheduler.on_tick(&mut host), TickOutcome::Halted);
}

#[test]
fn test_initialize_fault_never_loads() {
    let script = PayloadScript {
        fail_initialize: true,
        ..PayloadScript::default()
    };
    let mut scheduler = Scheduler::new(script.loader());
    let mut host = host_with_bucket(10_000);

    assert_eq!(
        scheduler.on_tick(&mut host),
        TickOutcome::Faulted(FaultStage::Initialize)
    );
    assert!(!scheduler.state().loaded());
    assert!(scheduler.state().pending_halt());
    assert_eq!(scheduler.on_tick(&mut host), TickOutcome::Halted);
}

#[test]
fn test_loader_fault_never_loads() {
    let script = PayloadScript {
        fail_load: true,
        ..PayloadScript::default()
    };
    let mut scheduler = Scheduler::new(script.loader());
    let mut host = host_with_bucket(10_000);

    assert_eq!(
        scheduler.on_tick(&mut host),
        TickOutcome::Faulted(FaultStage::Load)
    );
    assert!(!scheduler.state().loaded());
    assert!(host.notifications()[0].contains("scripted load failure"));
}

#[test]
fn test_self_destruct_prompt_commit_and_cancel() {
    let mut scheduler = Scheduler::new(PayloadScript::default().loader());
    let mut host = host_with_bucket(10_000);
    scheduler.on_tick(&mut host);

    // "no" with nothing armed cancels; the next "yes" only arms.
    let cancel = dispatch(
        &mut scheduler,
        &mut host,
        &OperatorCommand::SelfDestruct(Some("no".to_string())),
    );
    assert!(cancel.contains("cancelled"));
    let prompt = dispatch(
        &mut scheduler,
        &mut host,
        &OperatorCommand::SelfDestruct(Some("yes".to_string())),
    );
    assert!(prompt.contains("armed"));
    assert!(!scheduler.self_destruct_committed());
    dispatch(
        &mut scheduler,
        &mut host,
        &OperatorCommand::SelfDestruct(Some("no".to_string())),
    );

    let prompt = dispatch(&mut scheduler, &mut host, &OperatorCommand::SelfDestruct(None));
    assert!(prompt.contains("armed"));
    assert!(!scheduler.self_destruct_committed());

    let cancel = dispatch(
        &mut scheduler,
        &mut host,
        &OperatorCommand::SelfDestruct(Some("no".to_string())),
    );
    assert!(cancel.contains("cancelled"));

    dispatch(&mut scheduler, &mut host, &OperatorCommand::SelfDestruct(None));
    dispatch(
        &mut scheduler,
        &mut host,
        &OperatorCommand::SelfDestruct(Some("yes".to_string())),
    );
    assert!(scheduler.self_destruct_committed());

    host.end_tick();
    assert_eq!(scheduler.on_tick(&mut host), TickOutcome::Ran);
    assert!(ScriptedProgress::decode(host.segment(0)).destroyed);
}

#[test]
fn test_wipe_memory_clears_progress() {
    let mut scheduler = Scheduler::new(PayloadScript::default().loader());
    let mut host = host_with_bucket(10_000);
    for _ in 0..3 {
        scheduler.on_tick(&mut host);
        host.end_tick();
    }
    assert_eq!(ScriptedProgress::decode(host.segment(0)).ticks, 3);

    dispatch(&mut scheduler, &mut host, &OperatorCommand::WipeMemory(None));
    assert_eq!(ScriptedProgress::decode(host.segment(0)).ticks, 3);
    let reply = dispatch(
        &mut scheduler,
        &mut host,
        &OperatorCommand::WipeMemory(Some("yes".to_string())),
    );
    assert_eq!(reply, "Memory wiped");
    assert_eq!(ScriptedProgress::decode(host.segment(0)).ticks, 0);
}

#[test]
fn test_request_reset_before_load() {
    let mut scheduler = Scheduler::new(PayloadScript::default().loader());
    let mut host = host_with_bucket(10_000);
    host.set_segment(0, br#"{"ticks": 41, "boots": 7}"#.to_vec());

    dispatch(&mut scheduler, &mut host, &OperatorCommand::RequestReset);
    scheduler.on_tick(&mut host);

    let progress = ScriptedProgress::decode(host.segment(0));
    assert_eq!(progress.boots, 1);
    assert_eq!(progress.ticks, 1);
}

#[test]
fn test_toggle_flag_forwarded() {
    let mut scheduler = Scheduler::new(PayloadScript::default().loader());
    let mut host = host_with_bucket(10_000);
    let command: OperatorCommand = "toggle_creepsay".parse().unwrap();

    assert_eq!(dispatch(&mut scheduler, &mut host, &command), "Module not loaded.");
    scheduler.on_tick(&mut host);
    assert_eq!(dispatch(&mut scheduler, &mut host, &command), "Toggled creepsay.");
    assert!(
        ScriptedProgress::decode(host.segment(0))
            .flags
            .contains("creepsay")
    );
}
