//! Commutation: control signal → electrical phase → coil currents.
//!
//! Phase is measured in units of `PHASE_PERIOD` per electrical cycle; one
//! electrical cycle spans `STEPS_PER_PHASE_PERIOD` full steps.

use std::f32::consts::TAU;

use cl_common::consts::{
    CURRENT_SCALE, PHASE_PERIOD, PHASE_SHIFT_MAX, SIGNAL_MAX, STEPS_PER_PHASE_PERIOD,
};

const PERIOD: i32 = PHASE_PERIOD as i32;

/// Phase units per full step.
pub const PHASE_PER_STEP: f32 = PHASE_PERIOD as f32 / STEPS_PER_PHASE_PERIOD;

/// Position within the current electrical cycle, in `[0, PHASE_PERIOD)`.
///
/// Negative positions wrap into the positive residue.
#[inline]
pub fn step_phase(current_steps: f32) -> u16 {
    let cycle_fraction = (current_steps / STEPS_PER_PHASE_PERIOD).rem_euclid(1.0);
    // `rem_euclid` can round up to exactly 1.0 for tiny negative inputs.
    ((cycle_fraction * PHASE_PERIOD as f32) as u32 % u32::from(PHASE_PERIOD)) as u16
}

/// Linear map of the control signal onto `±PHASE_SHIFT_MAX`.
#[inline]
pub fn phase_shift(signal: i16) -> i16 {
    (f32::from(signal) / SIGNAL_MAX * f32::from(PHASE_SHIFT_MAX)).round() as i16
}

/// `(step_phase + shift) mod PHASE_PERIOD`, in `[0, PHASE_PERIOD)`.
#[inline]
pub fn desired_phase(step_phase: u16, shift: i16) -> u16 {
    let mut sum = i32::from(step_phase) + i32::from(shift);
    if sum < 0 {
        sum += PERIOD;
    }
    sum.rem_euclid(PERIOD) as u16
}

/// Current magnitude in `[hold_current, 1]`.
#[inline]
pub fn magnitude(signal: i16, hold_current: f32) -> f32 {
    (f32::from(signal).abs() / SIGNAL_MAX).max(hold_current).min(1.0)
}

/// Coil currents for a commanded phase.
///
/// `coil_a ∝ cos(phase)`, `coil_b ∝ sin(phase)`; a `false` polarity flips
/// the sign of that coil.
#[inline]
pub fn coil_currents(phase: u16, magnitude: f32, polarity_a: bool, polarity_b: bool) -> (i16, i16) {
    let angle = f32::from(phase) / PHASE_PERIOD as f32 * TAU;
    let (sin, cos) = angle.sin_cos();
    let sign = |positive: bool| if positive { 1.0 } else { -1.0 };
    let a = CURRENT_SCALE * magnitude * sign(polarity_a) * cos;
    let b = CURRENT_SCALE * magnitude * sign(polarity_b) * sin;
    (a.round() as i16, b.round() as i16)
}

/// Shorter of the direct and wrap-around distance between two phases.
#[inline]
pub fn circular_distance(a: u16, b: u16) -> u16 {
    let d = (i32::from(a) - i32::from(b)).rem_euclid(PERIOD);
    d.min(PERIOD - d) as u16
}

/// Relative motion in counts expressed as phase, in `[0, PHASE_PERIOD)`.
#[inline]
pub fn counts_to_phase(counts: i32, counts_per_step: f32) -> u16 {
    step_phase(counts as f32 / counts_per_step)
}
