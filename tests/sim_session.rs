//! Multi-tick sessions through the simulated host.
//!
//! These tests verify that environments are recreated after halts, that
//! persisted progress survives them, and that scenario files drive sessions.
//! Run with: cargo test --release sim_session

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::io::Write;
use tickboot::sim::{
    parse_scheduled, run_soak, HostConfig, PayloadScript, Scenario, ScriptedProgress, Session,
    SimHost, SoakConfig,
};
use tickboot::{HostRuntime, SchedulerConfig, TickOutcome};

#[test]
fn test_progress_survives_fault_and_halt() {
    let script = PayloadScript {
        fault_ticks: [10].into_iter().collect(),
        ..PayloadScript::default()
    };
    let mut session = Session::new(SimHost::default(), SchedulerConfig::default(), move || {
        script.loader()
    });
    let report = session.run(30);

    assert_eq!(report.faults, 1);
    assert_eq!(report.halts, 1);
    assert_eq!(session.generation(), 1);
    assert_eq!(report.records[10].outcome, "Faulted(Tick)");
    assert_eq!(report.records[11].outcome, "Halted");

    // 30 ticks, minus the faulted one and the halt.
    let progress = ScriptedProgress::decode(session.host().segment(0));
    assert_eq!(progress.ticks, 28);
    assert_eq!(progress.boots, 2);
}

#[test]
fn test_bucket_recovers_before_reload() {
    let script = PayloadScript {
        init_cpu: 400.0,
        fault_ticks: [0].into_iter().collect(),
        ..PayloadScript::default()
    };
    let host = SimHost::new(HostConfig {
        bucket: 1_500,
        ..HostConfig::default()
    });
    let mut session = Session::new(host, SchedulerConfig::default(), move || script.loader());

    // Tick 0 loads, runs and faults; tick 1 halts.
    let (outcome, _) = session.step();
    assert_eq!(outcome, TickOutcome::Faulted(tickboot::FaultStage::Tick));
    let (outcome, _) = session.step();
    assert_eq!(outcome, TickOutcome::Halted);

    // Bucket: 1500 + 20 - 412, then + 20 for the halt tick = 1128. Enough to
    // load again, but 728 after initialize so no same-tick run.
    let (outcome, record) = session.step();
    assert_eq!(outcome, TickOutcome::Loaded { ran: false });
    assert_eq!(record.generation, 1);
}

#[test]
fn test_scheduled_commands_apply_in_order() {
    let commands = vec![
        parse_scheduled("3:pause").unwrap(),
        parse_scheduled("6:resume").unwrap(),
        parse_scheduled("8:hauler_rescan").unwrap(),
    ];
    let script = PayloadScript::default();
    let mut session = Session::new(SimHost::default(), SchedulerConfig::default(), move || {
        script.loader()
    })
    .with_commands(commands);
    let report = session.run(10);

    assert_eq!(report.paused, 3);
    assert_eq!(report.records[3].console, vec!["Setting execution pause to: true"]);
    assert_eq!(report.records[8].console, vec!["Rescanned network."]);
    let progress = ScriptedProgress::decode(session.host().segment(0));
    assert_eq!(progress.rescans, 1);
    assert_eq!(progress.ticks, 7);
}

#[test]
fn test_scenario_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "ticks": 50,
            "host": {{"bucket": 0, "cpu_limit": 50.0}},
            "scheduler": {{"load_threshold": 300}},
            "payload": {{"init_cpu": 100.0, "tick_cpu": 5.0, "panic_ticks": [20]}},
            "commands": [{{"tick": 30, "command": "toggle_flag creepsay"}}]
        }}"#
    )
    .unwrap();

    let scenario = Scenario::from_json_file(file.path()).unwrap();
    assert_eq!(scenario.scheduler.load_threshold, 300);
    assert_eq!(scenario.scheduler.high_water, 1000);

    let report = scenario.run();
    assert_eq!(report.ticks, 50);
    // Six ticks of 50 CPU each before the bucket reaches 300.
    assert_eq!(report.deferred, 6);
    assert_eq!(report.faults, 1);
    assert_eq!(report.halts, 1);
    assert_eq!(report.records[30].console, vec!["Toggled creepsay."]);
}

#[test]
fn test_scenario_rejects_bad_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"scheduler": {{"load_threshold": 2000, "high_water": 10}}}}"#).unwrap();
    assert!(Scenario::from_json_file(file.path()).is_err());
}

#[test]
fn test_soak_smoke() {
    let stats = run_soak(&SoakConfig {
        sessions: 20,
        ticks: 200,
        ..SoakConfig::default()
    });
    assert_eq!(stats.sessions, 20);
    assert_eq!(stats.ticks, 4_000);
    assert_eq!(stats.violation_count, 0, "{:#?}", stats.violations);
}
