//! Tuning state machine.
//!
//! A tuning run executes every pending [`TuningRequest`] bit in
//! [`TuningRequest::PRIORITY`] order while holding the engine, so normal
//! control is suppressed for its whole duration. Each maneuver takes over
//! the coil currents through the same commutation primitive the PID loop
//! uses and suspends only through the engine's `Delay` capability.
//!
//! A maneuver that completes (pass or fail) clears its own request bit. A
//! [`ManeuverFault`] aborts the whole pending request and raises
//! `TuningError::SYSTEM_ERROR`.

pub mod checks;
pub mod maneuvers;
pub mod polarity;
pub mod zeroing;
pub mod ziegler_nichols;

use std::fmt;
use std::sync::atomic::Ordering;

use cl_common::tuning::{TuningError, TuningRequest};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::ClosedLoop;
use crate::error::ManeuverFault;

/// Current magnitude commanded by phase maneuvers (full scale).
pub(crate) const MANEUVER_CURRENT: f32 = 1.0;

// ─── Report ─────────────────────────────────────────────────────────

/// Overall result of a tuning command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TuningOutcome {
    /// No tuning error left.
    Success,
    /// Errors remain but none were introduced by this run.
    Warning,
    /// This run introduced new errors.
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TuningReport {
    pub outcome: TuningOutcome,
    /// Tuning errors after the run.
    pub errors: TuningError,
    /// Errors raised by this run.
    pub new_errors: TuningError,
}

impl TuningReport {
    pub fn evaluate(before: TuningError, after: TuningError) -> Self {
        let new_errors = after.difference(before);
        let outcome = if after.is_empty() {
            TuningOutcome::Success
        } else if new_errors.is_empty() {
            TuningOutcome::Warning
        } else {
            TuningOutcome::Failure
        };
        Self {
            outcome,
            errors: after,
            new_errors,
        }
    }
}

impl fmt::Display for TuningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            TuningOutcome::Success => f.write_str("tuning complete"),
            TuningOutcome::Warning => write!(f, "tuning complete, unmet checks: {}", self.errors),
            TuningOutcome::Failure => write!(
                f,
                "tuning failed: {} (all unmet checks: {})",
                self.new_errors, self.errors
            ),
        }
    }
}

// ─── Run ────────────────────────────────────────────────────────────

impl ClosedLoop {
    /// Queue maneuvers for the next tuning run.
    #[inline]
    pub fn request_tuning(&mut self, request: TuningRequest) {
        self.request |= request;
    }

    /// Execute every pending maneuver.
    pub fn run_tuning(&mut self) {
        if self.request.is_empty() {
            return;
        }
        self.shared.tuning_active.store(true, Ordering::Release);
        info!("Tuning started: {:#04x}", self.request.bits());

        match self.check_hardware() {
            Err(fault) => self.abort_tuning(fault),
            Ok(()) => {
                self.errors.remove(TuningError::SYSTEM_ERROR);
                self.drive.force_enabled(true);
                for maneuver in TuningRequest::PRIORITY {
                    if !self.request.contains(maneuver) {
                        continue;
                    }
                    debug!("Running {}", maneuver.name());
                    match self.run_maneuver(maneuver) {
                        Ok(()) => self.request.remove(maneuver),
                        Err(fault) => {
                            self.abort_tuning(fault);
                            break;
                        }
                    }
                }
                self.drive.force_enabled(false);
            }
        }

        self.shared.tuning_active.store(false, Ordering::Release);
        info!("Tuning finished, errors: {}", self.errors);
    }

    fn run_maneuver(&mut self, maneuver: TuningRequest) -> Result<(), ManeuverFault> {
        match maneuver {
            TuningRequest::DETECT_POLARITY => self.detect_polarity(),
            TuningRequest::ZERO => self.zero(),
            TuningRequest::CHECK_POLARITY => self.check_polarity(),
            TuningRequest::CHECK_CONTROL => self.check_control(),
            TuningRequest::CHECK_ENCODER_STEPS => self.check_encoder_steps(),
            TuningRequest::CONTINUOUS_PHASE_SWEEP => self.phase_sweep(),
            TuningRequest::STEP_RESPONSE => self.step_response(),
            TuningRequest::ZIEGLER_NICHOLS => self.ziegler_nichols(),
            other => {
                // Only single maneuvers are dispatched; anything else runs nothing.
                warn!("Skipping maneuver set {:#04x}: not a single maneuver", other.bits());
                Ok(())
            }
        }
    }

    fn abort_tuning(&mut self, fault: ManeuverFault) {
        warn!(
            "Tuning aborted ({:#04x} pending): {fault}",
            self.request.bits()
        );
        self.request = TuningRequest::empty();
        self.errors |= TuningError::SYSTEM_ERROR;
    }

    /// Make the current position the target, with fresh PID state.
    pub(crate) fn hold_position(&mut self) -> Result<(), ManeuverFault> {
        self.read_position()?;
        self.shared.target.set(self.state.current_steps);
        self.reset_pid();
        self.publish();
        Ok(())
    }
}
