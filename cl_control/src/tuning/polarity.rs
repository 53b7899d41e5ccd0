//! Coil polarity detection and verification.
//!
//! Detection sweeps one electrical cycle with each of the four coil sign
//! combinations and keeps the one whose measured motion tracks the command
//! best. Index bit 0 set means coil A negative, bit 1 set means coil B
//! negative. Flipping both coils only shifts the field by half a cycle, so
//! combinations come in tracking pairs; the lower index wins a tie.

use cl_common::consts::PHASE_PERIOD;
use cl_common::tuning::TuningError;
use tracing::{debug, info, warn};

use super::MANEUVER_CURRENT;
use crate::control::commutation::{PHASE_PER_STEP, circular_distance, counts_to_phase};
use crate::engine::ClosedLoop;
use crate::error::ManeuverFault;

/// Coil polarities `(a, b)` for a combination index.
#[inline]
pub const fn polarity_combination(index: usize) -> (bool, bool) {
    (index & 0b01 == 0, index & 0b10 == 0)
}

/// Index of the strictly smallest total; ties keep the earliest.
pub fn best_combination(totals: &[u64]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (index, &total) in totals.iter().enumerate() {
        if best.is_none_or(|(_, t)| total < t) {
            best = Some((index, total));
        }
    }
    best.map(|(index, _)| index)
}

/// `k`-th of `n` evenly spaced phases around one electrical cycle.
#[inline]
fn sweep_phase(k: u16, n: u16) -> u16 {
    let period = u32::from(PHASE_PERIOD);
    ((u32::from(k) * period / u32::from(n)) % period) as u16
}

impl ClosedLoop {
    pub(crate) fn detect_polarity(&mut self) -> Result<(), ManeuverFault> {
        let mut totals = [0u64; 4];
        for (index, total) in totals.iter_mut().enumerate() {
            let (a, b) = polarity_combination(index);
            *total = self.polarity_sweep(a, b)?;
            debug!("Polarity A{} B{}: deviation {}", sign(a), sign(b), *total);
        }

        // Four entries, never empty.
        let best = best_combination(&totals).unwrap_or(0);
        let (a, b) = polarity_combination(best);
        self.pid.coil_a_polarity = a;
        self.pid.coil_b_polarity = b;
        self.errors.remove(TuningError::NEEDS_POLARITY_DETECTION);
        info!("Polarity detected: A{} B{}", sign(a), sign(b));
        self.hold_position()
    }

    /// Sweep one cycle with the given polarity, measuring relative to the
    /// position at phase 0. Returns the accumulated phase deviation.
    fn polarity_sweep(&mut self, polarity_a: bool, polarity_b: bool) -> Result<u64, ManeuverFault> {
        let n = self.tuning.polarity_sweep_increments;
        self.command_phase_with(0, MANEUVER_CURRENT, polarity_a, polarity_b);
        self.settle()?;
        let reference = self.measure()?;

        let mut total = 0u64;
        for k in 1..=n {
            let phase = sweep_phase(k, n);
            self.command_phase_with(phase, MANEUVER_CURRENT, polarity_a, polarity_b);
            self.settle()?;
            let raw = self.measure()?;
            let measured = counts_to_phase(raw.wrapping_sub(reference), self.counts_per_step);
            total += u64::from(circular_distance(phase, measured));
        }
        Ok(total)
    }

    /// Sweep one cycle with the configured polarity and count points whose
    /// measured step phase strays beyond the tolerance.
    pub(crate) fn check_polarity(&mut self) -> Result<(), ManeuverFault> {
        let n = self.tuning.polarity_sweep_increments;
        let tolerance =
            self.tuning.polarity_check_tolerance_counts / self.counts_per_step.abs() * PHASE_PER_STEP;

        let mut deviations = 0u32;
        for k in 0..n {
            let phase = sweep_phase(k, n);
            self.command_phase(phase, MANEUVER_CURRENT);
            self.settle()?;
            self.measure()?;
            let distance = f32::from(circular_distance(phase, self.state.step_phase));
            if distance > tolerance {
                deviations += 1;
            }
        }

        if deviations > self.tuning.polarity_check_max_deviations {
            self.errors.insert(TuningError::POLARITY_CHECK_FAILED);
            warn!("Polarity check failed: {deviations} of {n} points deviate");
        } else {
            self.errors.remove(TuningError::POLARITY_CHECK_FAILED);
            info!("Polarity check passed ({deviations} of {n} points deviate)");
        }
        self.errors.remove(TuningError::NEEDS_POLARITY_CHECK);
        self.hold_position()
    }
}

#[inline]
fn sign(positive: bool) -> char {
    if positive { '+' } else { '-' }
}
