//! Tuning maneuvers against the simulated stepper.

use std::time::Duration;

use cl_common::hal::DriveMode;
use cl_common::tuning::{TuningError, TuningRequest};
use cl_control::config::ConfigCommand;
use cl_control::runtime::ClosedLoopRuntime;
use cl_control::sim::SimulatedStepper;
use cl_control::tuning::{TuningOutcome, TuningReport};

use super::{RecordingSink, build_engine, engine_config, plant};

#[test]
fn basic_tuning_verifies_reversed_coil() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, true));
    let mut engine = build_engine(&engine_config(10.0), &sim);
    let before = engine.tuning_errors();
    assert_eq!(before, TuningError::UNVERIFIED);

    engine.request_tuning(TuningRequest::BASIC);
    engine.run_tuning();

    assert!(engine.tuning_request().is_empty());
    assert_eq!(engine.tuning_errors(), TuningError::empty());
    // Coil B reversed in the plant: A-, B+ tracks and has the lower index.
    assert!(!engine.pid().coil_a_polarity);
    assert!(engine.pid().coil_b_polarity);
    assert!(!sim.forced_enabled());

    let report = TuningReport::evaluate(before, engine.tuning_errors());
    assert_eq!(report.outcome, TuningOutcome::Success);
}

#[test]
fn polarity_tie_resolves_to_lowest_index() {
    // 8 counts per step makes every sweep point land on whole counts, so both
    // tracking combinations score exactly zero.
    let sim = SimulatedStepper::virtual_clock(&plant(8.0, false));
    let mut engine = build_engine(&engine_config(8.0), &sim);
    engine.request_tuning(TuningRequest::DETECT_POLARITY);
    engine.run_tuning();
    assert!(engine.pid().coil_a_polarity);
    assert!(engine.pid().coil_b_polarity);
    assert!(!engine.tuning_errors().contains(TuningError::NEEDS_POLARITY_DETECTION));

    let sim = SimulatedStepper::virtual_clock(&plant(8.0, true));
    let mut engine = build_engine(&engine_config(8.0), &sim);
    engine.request_tuning(TuningRequest::DETECT_POLARITY);
    engine.run_tuning();
    assert!(!engine.pid().coil_a_polarity);
    assert!(engine.pid().coil_b_polarity);
}

#[test]
fn zeroing_makes_position_and_target_zero() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let mut engine = build_engine(&engine_config(10.0), &sim);
    engine.request_tuning(TuningRequest::ZERO);
    engine.run_tuning();

    assert_eq!(engine.state().raw_position, 0);
    assert_eq!(engine.state().step_phase, 0);
    assert!(!engine.tuning_errors().contains(TuningError::NEEDS_ZEROING));
    assert!(engine.tuning_errors().contains(TuningError::NEEDS_POLARITY_CHECK));
}

#[test]
fn wrong_polarity_fails_check() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, true));
    // Configured polarity A+ B+ runs backwards on this plant.
    let mut engine = build_engine(&engine_config(10.0), &sim);
    engine.request_tuning(TuningRequest::ZERO | TuningRequest::CHECK_POLARITY);
    engine.run_tuning();

    let errors = engine.tuning_errors();
    assert!(errors.contains(TuningError::POLARITY_CHECK_FAILED));
    assert!(!errors.contains(TuningError::NEEDS_POLARITY_CHECK));
    assert!(engine.tuning_request().is_empty());
}

#[test]
fn encoder_scale_mismatch_fails_check() {
    let sim = SimulatedStepper::virtual_clock(&plant(20.0, false));
    let mut engine = build_engine(&engine_config(10.0), &sim);
    engine.request_tuning(TuningRequest::CHECK_ENCODER_STEPS);
    engine.run_tuning();
    let errors = engine.tuning_errors();
    assert!(errors.contains(TuningError::ENCODER_STEPS_CHECK_FAILED));
    assert!(!errors.contains(TuningError::NEEDS_ENCODER_STEPS_CHECK));

    // The matching scale clears the failure again.
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let mut engine = build_engine(&engine_config(10.0), &sim);
    engine.request_tuning(TuningRequest::CHECK_ENCODER_STEPS);
    engine.run_tuning();
    assert!(!engine.tuning_errors().contains(TuningError::ENCODER_STEPS_CHECK_FAILED));
}

#[test]
fn unresponsive_drive_aborts_whole_request() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let mut engine = build_engine(&engine_config(10.0), &sim);
    sim.set_unresponsive(true);
    engine.request_tuning(TuningRequest::BASIC);
    engine.run_tuning();

    assert!(engine.tuning_request().is_empty());
    let errors = engine.tuning_errors();
    assert!(errors.contains(TuningError::SYSTEM_ERROR));
    assert!(errors.contains(TuningError::UNVERIFIED));
    assert!(!sim.forced_enabled());

    // A later run with a working drive clears the system error.
    sim.set_unresponsive(false);
    engine.request_tuning(TuningRequest::CHECK_CONTROL);
    engine.run_tuning();
    assert!(!engine.tuning_errors().contains(TuningError::SYSTEM_ERROR));
}

#[test]
fn preflight_rejects_indirect_mode() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let mut engine = build_engine(&engine_config(10.0), &sim);
    sim.set_drive_mode(DriveMode::StealthChop);
    engine.request_tuning(TuningRequest::ZERO);
    engine.run_tuning();
    assert!(engine.tuning_request().is_empty());
    assert!(engine.tuning_errors().contains(TuningError::SYSTEM_ERROR));
    assert!(engine.tuning_errors().contains(TuningError::NEEDS_ZEROING));
}

#[test]
fn step_response_restores_target() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let mut config = engine_config(10.0);
    config.tuning.step_response_ticks = 50;
    let mut engine = build_engine(&config, &sim);
    let origin = engine.state().target_steps;
    engine.request_tuning(TuningRequest::STEP_RESPONSE);
    engine.run_tuning();
    assert!(engine.tuning_request().is_empty());
    assert_eq!(engine.state().target_steps, origin);
    assert!(!engine.tuning_errors().contains(TuningError::SYSTEM_ERROR));
    // The loop tracked back to the origin.
    assert!((sim.position_steps() - origin).abs() < 0.2);
}

#[test]
fn disable_during_tuning_keeps_errors_consistent() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, true));
    let sink = RecordingSink::default();
    let runtime =
        ClosedLoopRuntime::start(&engine_config(10.0), sim.hardware(), Box::new(sink)).unwrap();

    let report = std::thread::scope(|s| {
        let tuning = s.spawn(|| runtime.tune(TuningRequest::BASIC));
        std::thread::sleep(Duration::from_millis(1));
        let disable = ConfigCommand {
            enabled: Some(false),
            ..Default::default()
        };
        let reply = runtime.configure(&disable).unwrap();
        assert!(!reply.enabled);
        tuning.join().unwrap()
    })
    .unwrap();

    assert_eq!(report.outcome, TuningOutcome::Success);
    assert_eq!(report.errors, TuningError::empty());
    assert!(!runtime.shared().is_enabled());
    assert!(runtime.report().contains("tuning errors: 0x0000 (none)"));
}

#[test]
fn tune_requires_encoder_and_direct_mode() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let mut config = engine_config(10.0);
    config.enabled = false;
    config.encoder.kind = cl_common::hal::EncoderKind::None;
    let runtime =
        ClosedLoopRuntime::start(&config, sim.hardware(), Box::new(RecordingSink::default()))
            .unwrap();
    assert_eq!(
        runtime.tune(TuningRequest::ZERO),
        Err(cl_control::CommandError::NoEncoder)
    );

    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    sim.set_drive_mode(DriveMode::SpreadCycle);
    let runtime = ClosedLoopRuntime::start(
        &engine_config(10.0),
        sim.hardware(),
        Box::new(RecordingSink::default()),
    )
    .unwrap();
    assert_eq!(
        runtime.tune(TuningRequest::ZERO),
        Err(cl_control::CommandError::NotDirectMode(DriveMode::SpreadCycle))
    );
}
