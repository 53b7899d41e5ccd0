//! Control loop root.
//!
//! One PID iteration turns an encoder reading and a target into a commanded
//! commutation phase and coil currents. The functions here are pure over
//! [`ControlState`]; the engine feeds them hardware readings and forwards the
//! resulting currents to the drive.

pub mod commutation;
pub mod pid;

use cl_common::config::PidParameters;
use cl_common::telemetry::SampleVariable;
use serde::Serialize;

use self::commutation::{coil_currents, desired_phase, magnitude, phase_shift, step_phase};
use self::pid::{PidGains, PidState, pid_compute};

/// Complete state of the control loop, published after every write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ControlState {
    /// Encoder reading [counts].
    pub raw_position: i32,
    /// Measured position [steps].
    pub current_steps: f32,
    /// Target position [steps].
    pub target_steps: f32,
    pub pid: PidState,
    pub p_term: f32,
    pub i_term: f32,
    pub d_term: f32,
    /// Clamped control signal, `±SIGNAL_MAX`.
    pub control_signal: i16,
    /// Commanded lead/lag, `±PHASE_SHIFT_MAX`.
    pub phase_shift: i16,
    /// Measured phase within the electrical cycle.
    pub step_phase: u16,
    /// Commanded phase within the electrical cycle.
    pub desired_phase: u16,
    pub coil_a: i16,
    pub coil_b: i16,
    /// `target_steps - current_steps` of the latest iteration [steps].
    pub current_error: f32,
}

impl ControlState {
    /// Record a new encoder reading.
    #[inline]
    pub fn set_position(&mut self, raw: i32, counts_per_step: f32) {
        self.raw_position = raw;
        self.current_steps = raw as f32 / counts_per_step;
        self.step_phase = step_phase(self.current_steps);
    }

    /// Command a phase directly, bypassing the PID terms (tuning maneuvers).
    ///
    /// Returns the coil currents to send to the drive.
    #[inline]
    pub fn command_phase(
        &mut self,
        phase: u16,
        magnitude: f32,
        polarity_a: bool,
        polarity_b: bool,
    ) -> (i16, i16) {
        self.desired_phase = phase;
        let (a, b) = coil_currents(phase, magnitude, polarity_a, polarity_b);
        self.coil_a = a;
        self.coil_b = b;
        (a, b)
    }

    /// Value of one sample variable.
    pub fn value(&self, var: SampleVariable) -> f32 {
        match var {
            SampleVariable::RawPosition => self.raw_position as f32,
            SampleVariable::CurrentSteps => self.current_steps,
            SampleVariable::TargetSteps => self.target_steps,
            SampleVariable::StepPhase => f32::from(self.step_phase),
            SampleVariable::ControlSignal => f32::from(self.control_signal),
            SampleVariable::PTerm => self.p_term,
            SampleVariable::ITerm => self.i_term,
            SampleVariable::DTerm => self.d_term,
            SampleVariable::PhaseShift => f32::from(self.phase_shift),
            SampleVariable::DesiredPhase => f32::from(self.desired_phase),
            SampleVariable::CoilA => f32::from(self.coil_a),
            SampleVariable::CoilB => f32::from(self.coil_b),
            SampleVariable::CurrentError => self.current_error,
        }
    }
}

/// Inputs of one control iteration.
#[derive(Debug, Clone, Copy)]
pub struct ControlInput {
    pub raw_position: i32,
    pub counts_per_step: f32,
    pub target_steps: f32,
    /// A data collection is running; suppresses the zero-error shortcut.
    pub collecting: bool,
}

/// Run one PID iteration.
///
/// Returns the coil currents to send, or `None` in steady state (zero error,
/// nothing being recorded).
pub fn control_iteration(
    state: &mut ControlState,
    params: &PidParameters,
    input: &ControlInput,
) -> Option<(i16, i16)> {
    state.set_position(input.raw_position, input.counts_per_step);
    state.target_steps = input.target_steps;

    let error = input.target_steps - state.current_steps;
    state.current_error = error;
    if error == 0.0 && !input.collecting {
        return None;
    }

    let terms = pid_compute(&mut state.pid, &PidGains::from(params), error);
    state.p_term = terms.p;
    state.i_term = terms.i;
    state.d_term = terms.d;
    state.control_signal = terms.signal;

    state.phase_shift = phase_shift(terms.signal);
    let phase = desired_phase(state.step_phase, state.phase_shift);
    let mag = magnitude(terms.signal, params.hold_current);

    Some(state.command_phase(
        phase,
        mag,
        params.coil_a_polarity,
        params.coil_b_polarity,
    ))
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cl_common::consts::{PHASE_SHIFT_MAX, SIGNAL_MAX};

    fn p_only(kp: f32) -> PidParameters {
        PidParameters {
            kp,
            ki: 0.0,
            kd: 0.0,
            ..Default::default()
        }
    }

    fn input(raw: i32, target: f32) -> ControlInput {
        ControlInput {
            raw_position: raw,
            counts_per_step: 1.0,
            target_steps: target,
            collecting: false,
        }
    }

    #[test]
    fn large_error_saturates_signal_and_shift() {
        let mut s = ControlState::default();
        let out = control_iteration(&mut s, &p_only(100.0), &input(0, 100.0));
        assert!(out.is_some());
        assert_eq!(s.current_error, 100.0);
        assert_eq!(f32::from(s.control_signal), SIGNAL_MAX);
        assert_eq!(s.phase_shift, PHASE_SHIFT_MAX);
        assert_eq!(s.desired_phase, 1024);
        // Full magnitude at phase 1024: all current in coil B.
        assert_eq!(out, Some((0, 255)));
        assert_eq!(s.pid.last_error, 100.0);
    }

    #[test]
    fn zero_error_is_a_no_op() {
        let mut s = ControlState::default();
        s.coil_a = 42;
        assert_eq!(control_iteration(&mut s, &p_only(100.0), &input(8, 8.0)), None);
        assert_eq!(s.coil_a, 42);
        assert_eq!(s.raw_position, 8);
        assert_eq!(s.current_error, 0.0);
    }

    #[test]
    fn zero_error_still_commands_while_collecting() {
        let mut s = ControlState::default();
        let mut i = input(0, 0.0);
        i.collecting = true;
        let out = control_iteration(&mut s, &p_only(100.0), &i);
        // Hold current at phase 0.
        assert_eq!(out, Some((64, 0)));
    }

    #[test]
    fn negative_error_shifts_backwards() {
        let mut s = ControlState::default();
        let out = control_iteration(&mut s, &p_only(100.0), &input(0, -100.0));
        assert!(out.is_some());
        assert_eq!(s.phase_shift, -PHASE_SHIFT_MAX);
        assert_eq!(s.desired_phase, 3072);
    }

    #[test]
    fn counts_per_step_scales_position() {
        let mut s = ControlState::default();
        let mut i = input(250, 2.5);
        i.counts_per_step = 100.0;
        assert_eq!(control_iteration(&mut s, &p_only(10.0), &i), None);
        assert_eq!(s.current_steps, 2.5);
        assert_eq!(s.step_phase, 2560);
    }

    #[test]
    fn sample_values_match_fields() {
        let mut s = ControlState::default();
        control_iteration(&mut s, &p_only(50.0), &input(3, 4.0));
        assert_eq!(s.value(SampleVariable::RawPosition), 3.0);
        assert_eq!(s.value(SampleVariable::TargetSteps), 4.0);
        assert_eq!(s.value(SampleVariable::PTerm), 50.0);
        assert_eq!(s.value(SampleVariable::ControlSignal), 50.0);
        assert_eq!(s.value(SampleVariable::CurrentError), 1.0);
        assert_eq!(s.value(SampleVariable::CoilB), f32::from(s.coil_b));
    }
}
