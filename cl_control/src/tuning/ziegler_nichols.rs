//! Ziegler–Nichols ultimate gain search.
//!
//! With integral and derivative gains zeroed, `Kp` is bisected over
//! `[zn_kp_min, zn_kp_max]`. Each trial steps the target and runs the
//! control loop tick by tick while an [`OscillationDetector`] classifies
//! the error response as decaying (raise the lower bound) or sustained
//! (lower the upper bound). The search ends once the bracket is narrower
//! than `zn_kp_resolution`; the upper bound is the ultimate gain.

use std::fmt;

use cl_common::config::{PidParameters, TuningParameters};
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::ClosedLoop;
use crate::error::ManeuverFault;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZieglerNicholsResult {
    /// Smallest proportional gain found to sustain oscillation.
    pub ultimate_gain: f32,
    /// Oscillation period at the ultimate gain [ticks], if any trial sustained.
    pub oscillation_period_ticks: Option<f32>,
    pub kp_lower: f32,
    pub kp_upper: f32,
    pub trials: u32,
}

impl fmt::Display for ZieglerNicholsResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ku {:.2} ", self.ultimate_gain)?;
        match self.oscillation_period_ticks {
            Some(period) => write!(f, "Tu {period:.2} ticks")?,
            None => f.write_str("Tu n/a")?,
        }
        write!(
            f,
            " (bracket [{:.2}, {:.2}], {} trials)",
            self.kp_lower, self.kp_upper, self.trials
        )
    }
}

// ─── Oscillation detector ───────────────────────────────────────────

/// Classification of one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Decaying,
    Sustained { period_ticks: f32 },
}

/// Tracks error peaks between zero crossings.
///
/// Each half-cycle ends at a sign change of the error. The ratio of a
/// half-cycle's peak magnitude to the previous one, and twice the
/// half-cycle length, feed exponentially weighted averages.
#[derive(Debug, Clone)]
pub struct OscillationDetector {
    alpha: f32,
    min_half_cycles: u32,
    sustained_half_cycles: u32,
    decay_threshold: f32,

    ticks: u32,
    last_sign: f32,
    peak: f32,
    last_peak: Option<f32>,
    last_crossing: Option<u32>,
    half_cycles: u32,
    ratio_avg: Option<f32>,
    period_avg: Option<f32>,
}

#[inline]
fn blend(avg: Option<f32>, sample: f32, alpha: f32) -> f32 {
    match avg {
        Some(a) => a + alpha * (sample - a),
        None => sample,
    }
}

impl OscillationDetector {
    pub fn new(params: &TuningParameters) -> Self {
        Self {
            alpha: params.zn_ratio_alpha,
            min_half_cycles: params.zn_min_half_cycles,
            sustained_half_cycles: params.zn_sustained_half_cycles,
            decay_threshold: params.zn_decay_threshold,
            ticks: 0,
            last_sign: 0.0,
            peak: 0.0,
            last_peak: None,
            last_crossing: None,
            half_cycles: 0,
            ratio_avg: None,
            period_avg: None,
        }
    }

    #[inline]
    pub fn half_cycles(&self) -> u32 {
        self.half_cycles
    }

    #[inline]
    pub fn ratio_average(&self) -> Option<f32> {
        self.ratio_avg
    }

    #[inline]
    pub fn period_average(&self) -> Option<f32> {
        self.period_avg
    }

    /// Feed one error sample; returns a verdict once one is reached.
    pub fn update(&mut self, error: f32) -> Option<Verdict> {
        self.ticks += 1;
        let sign = if error > 0.0 {
            1.0
        } else if error < 0.0 {
            -1.0
        } else {
            0.0
        };

        let mut verdict = None;
        if sign != 0.0 && self.last_sign != 0.0 && sign != self.last_sign {
            verdict = self.close_half_cycle();
        }
        if sign != 0.0 {
            self.last_sign = sign;
        }
        self.peak = self.peak.max(error.abs());
        verdict
    }

    fn close_half_cycle(&mut self) -> Option<Verdict> {
        if let Some(previous) = self.last_peak.filter(|p| *p > 0.0) {
            self.ratio_avg = Some(blend(self.ratio_avg, self.peak / previous, self.alpha));
        }
        if let Some(crossing) = self.last_crossing {
            let period = 2.0 * (self.ticks - crossing) as f32;
            self.period_avg = Some(blend(self.period_avg, period, self.alpha));
        }
        self.last_peak = Some(self.peak);
        self.last_crossing = Some(self.ticks);
        self.peak = 0.0;
        self.half_cycles += 1;

        let ratio = self.ratio_avg?;
        if self.half_cycles >= self.sustained_half_cycles && ratio >= self.decay_threshold {
            let period_ticks = self.period_avg.unwrap_or(2.0);
            return Some(Verdict::Sustained { period_ticks });
        }
        if self.half_cycles >= self.min_half_cycles && ratio < self.decay_threshold {
            return Some(Verdict::Decaying);
        }
        None
    }
}

// ─── Search ─────────────────────────────────────────────────────────

/// Bisect `[zn_kp_min, zn_kp_max]`, classifying each midpoint with `trial`.
///
/// Ends once the bracket is narrower than `zn_kp_resolution`, or once the
/// midpoint rounds onto a bound because the bounds are adjacent floats.
pub fn bisect_ultimate_gain<E>(
    params: &TuningParameters,
    mut trial: impl FnMut(f32) -> Result<Verdict, E>,
) -> Result<ZieglerNicholsResult, E> {
    let mut lower = params.zn_kp_min;
    let mut upper = params.zn_kp_max;
    let mut period = None;
    let mut trials = 0u32;

    while upper - lower >= params.zn_kp_resolution {
        let kp = 0.5 * (lower + upper);
        if kp <= lower || kp >= upper {
            debug!("ZN bracket [{lower}, {upper}] at float precision");
            break;
        }
        let verdict = trial(kp)?;
        trials += 1;

        match verdict {
            Verdict::Sustained { period_ticks } => {
                upper = kp;
                period = Some(period_ticks);
            }
            Verdict::Decaying => lower = kp,
        }
        debug!("ZN trial {trials}: kp {kp:.2} -> {verdict:?}, bracket [{lower:.2}, {upper:.2}]");
    }

    Ok(ZieglerNicholsResult {
        ultimate_gain: upper,
        oscillation_period_ticks: period,
        kp_lower: lower,
        kp_upper: upper,
        trials,
    })
}

impl ClosedLoop {
    /// Run the search; gains, target and PID state are restored afterwards
    /// whatever the outcome.
    pub(crate) fn ziegler_nichols(&mut self) -> Result<(), ManeuverFault> {
        let saved_pid = self.pid;
        let saved_target = self.shared.target.get();

        let result = self.zn_search(&saved_pid);

        self.pid = saved_pid;
        self.shared.target.set(saved_target);
        self.reset_pid();

        let result = result?;
        info!("Ziegler-Nichols search complete: {result}");
        self.zn_result = Some(result);
        Ok(())
    }

    fn zn_search(&mut self, saved: &PidParameters) -> Result<ZieglerNicholsResult, ManeuverFault> {
        let params = self.tuning;
        let mut direction = 1.0f32;
        bisect_ultimate_gain(&params, |kp| {
            self.pid = *saved;
            self.zn_rest()?;

            self.pid.kp = kp;
            self.pid.ki = 0.0;
            self.pid.kd = 0.0;
            let verdict = self.zn_trial(direction * params.zn_step_offset)?;
            direction = -direction;
            Ok(verdict)
        })
    }

    /// Run the current gains until the error vanishes or `zn_settle_ticks` elapse.
    fn zn_rest(&mut self) -> Result<(), ManeuverFault> {
        self.reset_pid();
        for _ in 0..self.tuning.zn_settle_ticks {
            let error = self.control_step().ok_or(ManeuverFault::NoEncoder)?;
            self.wait_tick()?;
            if error == 0.0 {
                break;
            }
        }
        Ok(())
    }

    /// Step the target by `offset` from the current position and classify
    /// the response.
    fn zn_trial(&mut self, offset: f32) -> Result<Verdict, ManeuverFault> {
        self.reset_pid();
        self.read_position()?;
        self.shared.target.set(self.state.current_steps + offset);

        let mut detector = OscillationDetector::new(&self.tuning);
        for _ in 0..self.tuning.zn_max_ticks {
            let error = self.control_step().ok_or(ManeuverFault::NoEncoder)?;
            self.wait_tick()?;
            if let Some(verdict) = detector.update(error) {
                return Ok(verdict);
            }
        }
        Ok(Verdict::Decaying)
    }
}
