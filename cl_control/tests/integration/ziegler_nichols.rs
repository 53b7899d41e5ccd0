//! Ultimate gain search on the simulated stepper.

use std::sync::Arc;

use cl_common::tuning::{TuningError, TuningRequest};
use cl_control::engine::ClosedLoop;
use cl_control::shared::SharedState;
use cl_control::sim::SimulatedStepper;

use super::{engine_config, plant};

#[test]
fn search_brackets_ultimate_gain_and_restores_gains() {
    let sim = SimulatedStepper::virtual_clock(&plant(400.0, false));
    let mut config = engine_config(400.0);
    config.pid.kp = 100.0;
    config.pid.ki = 0.0;
    let shared = Arc::new(SharedState::new());
    let mut engine = ClosedLoop::new(&config, sim.hardware(), Arc::clone(&shared)).unwrap();
    let pid_before = *engine.pid();
    let target_before = shared.target.get();

    engine.request_tuning(TuningRequest::ZIEGLER_NICHOLS);
    engine.run_tuning();
    assert!(engine.tuning_request().is_empty());
    assert!(!engine.tuning_errors().contains(TuningError::SYSTEM_ERROR));

    let result = *engine.zn_result().expect("search result");
    let resolution = engine.tuning_parameters().zn_kp_resolution;
    assert!(
        (450.0..=560.0).contains(&result.ultimate_gain),
        "Ku {}",
        result.ultimate_gain
    );
    assert_eq!(result.ultimate_gain, result.kp_upper);
    assert!(result.kp_upper - result.kp_lower < resolution);
    assert_eq!(result.trials, 9);
    let period = result.oscillation_period_ticks.expect("sustained trial");
    assert!((1.5..=2.5).contains(&period), "Tu {period}");

    // Gains and target come back untouched.
    assert_eq!(*engine.pid(), pid_before);
    assert_eq!(shared.target.get(), target_before);
}
