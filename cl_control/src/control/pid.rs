//! PID controller with conditional-integration anti-windup.
//!
//! The integral update is dropped whenever it would take the accumulator to
//! or beyond `INTEGRAL_CEILING`, so the accumulator itself is always bounded.
//! Zero Ki disables integral; zero Kd disables derivative.

use cl_common::config::PidParameters;
use cl_common::consts::{INTEGRAL_CEILING, SIGNAL_MAX};
use serde::Serialize;

/// Internal state of the PID controller.
///
/// Must be reset (via [`PidState::reset`]) when the encoder is re-zeroed or
/// gains are swapped for a tuning search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PidState {
    /// Integral accumulator, `|integral| < INTEGRAL_CEILING`.
    pub integral: f32,
    /// Error of the previous iteration [steps].
    pub last_error: f32,
}

impl PidState {
    /// Reset all internal state to zero.
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// PID gains, extracted from `PidParameters`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl From<&PidParameters> for PidGains {
    fn from(p: &PidParameters) -> Self {
        Self {
            kp: p.kp,
            ki: p.ki,
            kd: p.kd,
        }
    }
}

/// Terms of one PID iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidTerms {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    /// Clamped, quantized control signal.
    pub signal: i16,
}

/// Compute one PID iteration.
///
/// `error` is `target - current` in steps. The derivative acts on
/// `last_error - error`, so a shrinking error produces a positive D term.
#[inline]
pub fn pid_compute(state: &mut PidState, gains: &PidGains, error: f32) -> PidTerms {
    // ── P term ──────────────────────────────────────────────
    let p = gains.kp * error;

    // ── I term (conditional integration) ────────────────────
    let candidate = state.integral + gains.ki * error;
    if candidate.abs() < INTEGRAL_CEILING {
        state.integral = candidate;
    }
    let i = state.integral;

    // ── D term ──────────────────────────────────────────────
    let d = gains.kd * (state.last_error - error);

    state.last_error = error;

    PidTerms {
        p,
        i,
        d,
        signal: quantize_signal(p + i + d),
    }
}

/// Clamp to `±SIGNAL_MAX` and round into the drive's integer signal domain.
#[inline]
pub fn quantize_signal(sum: f32) -> i16 {
    if sum.is_nan() {
        return 0;
    }
    sum.clamp(-SIGNAL_MAX, SIGNAL_MAX).round() as i16
}

// ─── Tests ──────────────────────────────────────────────────────────
