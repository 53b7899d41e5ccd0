//! Supervisor and command surface over a running runtime.

use std::time::Duration;

use cl_common::hal::{DriveMode, EncoderKind};
use cl_common::tuning::{TuningError, TuningRequest};
use cl_control::CommandError;
use cl_control::config::ConfigCommand;
use cl_control::runtime::ClosedLoopRuntime;
use cl_control::sim::SimulatedStepper;
use cl_control::supervisor::{Supervisor, TickOutcome};

use super::{RecordingSink, engine_config, plant};

const TICK: Duration = Duration::from_millis(1);

fn start(sim: &SimulatedStepper) -> ClosedLoopRuntime {
    ClosedLoopRuntime::start(
        &engine_config(10.0),
        sim.hardware(),
        Box::new(RecordingSink::default()),
    )
    .unwrap()
}

fn run_ticks(supervisor: &Supervisor, sim: &SimulatedStepper, ticks: usize) -> TickOutcome {
    let mut last = TickOutcome::Disabled;
    for _ in 0..ticks {
        last = supervisor.tick();
        sim.advance(TICK);
    }
    last
}

#[test]
fn unverified_setup_defers_to_tuning() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, true));
    let runtime = start(&sim);
    let supervisor = runtime.supervisor();
    // Boot leaves every check unverified: no control until tuned.
    assert_eq!(supervisor.tick(), TickOutcome::TuningPending);
}

#[test]
fn tuned_loop_tracks_steps() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, true));
    let runtime = start(&sim);
    let report = runtime.tune(TuningRequest::BASIC).unwrap();
    assert!(report.errors.is_empty(), "{report}");

    let supervisor = runtime.supervisor();
    assert!(matches!(
        run_ticks(&supervisor, &sim, 20),
        TickOutcome::Controlled { .. }
    ));

    // 16 microsteps forward make one full step.
    let start = runtime.shared().target.get();
    let mut target = start;
    for _ in 0..16 {
        target = runtime.take_step(true);
        run_ticks(&supervisor, &sim, 5);
    }
    assert!((target - start - 1.0).abs() < 1e-4);
    run_ticks(&supervisor, &sim, 100);
    let state = runtime.snapshot();
    assert!((state.current_steps - target).abs() <= 0.2, "{state:?}");

    runtime.set_target(-2.0);
    run_ticks(&supervisor, &sim, 200);
    assert!((sim.position_steps() + 2.0).abs() <= 0.2);
}

#[test]
fn disabled_loop_does_nothing() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let runtime = start(&sim);
    let disable = ConfigCommand {
        enabled: Some(false),
        ..Default::default()
    };
    let reply = runtime.configure(&disable).unwrap();
    assert!(!reply.enabled);
    let supervisor = runtime.supervisor();
    runtime.set_target(3.0);
    assert_eq!(run_ticks(&supervisor, &sim, 10), TickOutcome::Disabled);
    assert_eq!(sim.coil_currents(), (0, 0));
}

#[test]
fn configuration_is_all_or_nothing() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let runtime = start(&sim);
    let reply = runtime.configure(&ConfigCommand::default()).unwrap();
    let before = reply;

    let bad = ConfigCommand {
        kp: Some(250.0),
        encoder_type: Some(7),
        ..Default::default()
    };
    assert_eq!(runtime.configure(&bad), Err(CommandError::InvalidEncoderType(7)));
    assert_eq!(runtime.configure(&ConfigCommand::default()).unwrap(), before);

    let gains = ConfigCommand {
        kp: Some(250.0),
        ki: Some(1.0),
        ..Default::default()
    };
    let reply = runtime.configure(&gains).unwrap();
    assert_eq!(reply.pid.kp, 250.0);
    assert_eq!(reply.pid.ki, 1.0);
    assert_eq!(reply.encoder, EncoderKind::RotaryQuadrature);
}

#[test]
fn encoder_change_invalidates_verification() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let runtime = start(&sim);
    runtime.tune(TuningRequest::BASIC).unwrap();

    let same = ConfigCommand {
        encoder_type: Some(EncoderKind::RotaryQuadrature as u8),
        counts_per_step: Some(10.0),
        ..Default::default()
    };
    let reply = runtime.configure(&same).unwrap();
    assert!(reply.tuning_errors.is_empty());

    let change = ConfigCommand {
        encoder_type: Some(EncoderKind::As5047 as u8),
        ..Default::default()
    };
    let reply = runtime.configure(&change).unwrap();
    assert_eq!(reply.encoder, EncoderKind::As5047);
    assert!(reply.tuning_errors.contains(TuningError::UNVERIFIED));
}

#[test]
fn enabling_needs_direct_mode_and_encoder() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let runtime = start(&sim);
    let disable = ConfigCommand {
        enabled: Some(false),
        ..Default::default()
    };
    runtime.configure(&disable).unwrap();

    sim.set_drive_mode(DriveMode::StealthChop);
    let enable = ConfigCommand {
        enabled: Some(true),
        ..Default::default()
    };
    assert_eq!(
        runtime.configure(&enable),
        Err(CommandError::NotDirectMode(DriveMode::StealthChop))
    );

    sim.set_drive_mode(DriveMode::Direct);
    let enable_without_encoder = ConfigCommand {
        enabled: Some(true),
        encoder_type: Some(0),
        ..Default::default()
    };
    assert_eq!(
        runtime.configure(&enable_without_encoder),
        Err(CommandError::NoEncoder)
    );
    assert!(runtime.configure(&enable).unwrap().enabled);
}

#[test]
fn report_and_shutdown() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let mut runtime = start(&sim);
    let report = runtime.report();
    assert!(report.contains("closed loop: enabled"));
    assert!(report.contains("polarity not detected"));
    runtime.shutdown();
    assert_eq!(
        runtime.configure(&ConfigCommand {
            kp: Some(1.0),
            ..Default::default()
        }),
        Err(CommandError::ShuttingDown)
    );
}
