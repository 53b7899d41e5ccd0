//! Per-tick supervisor.
//!
//! Called once per control tick by the tick runner. It never blocks: the
//! engine is taken with `try_lock`, and a held lock means the tuning task is
//! running a maneuver, which suppresses normal control for that tick.

use std::sync::Arc;

use cl_common::config::{MonitorConfig, PidParameters};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::ClosedLoop;
use crate::sampling::acquisition::SampleClock;
use crate::shared::SharedState;

// ─── Error monitor ──────────────────────────────────────────────────

/// Severity of the latest position error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorLevel {
    Normal,
    PreStall,
    Stall,
}

/// Peak and decayed position error with rate-limited stall warnings.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ErrorMonitor {
    /// Largest |error| since the last reset [steps].
    pub peak_error: f32,
    /// Exponentially decayed |error| [steps].
    pub decayed_error: f32,
    decay: f32,
    warn_interval: u32,
    ticks_since_warn: u32,
}

impl ErrorMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            peak_error: 0.0,
            decayed_error: 0.0,
            decay: config.error_decay,
            warn_interval: config.warn_interval_ticks,
            ticks_since_warn: config.warn_interval_ticks,
        }
    }

    pub fn reset(&mut self) {
        self.peak_error = 0.0;
        self.decayed_error = 0.0;
        self.ticks_since_warn = self.warn_interval;
    }

    /// Account one control iteration's error.
    pub fn update(&mut self, error: f32, pid: &PidParameters) -> ErrorLevel {
        let magnitude = error.abs();
        self.peak_error = self.peak_error.max(magnitude);
        self.decayed_error = self.decay * self.decayed_error + (1.0 - self.decay) * magnitude;
        self.ticks_since_warn = self.ticks_since_warn.saturating_add(1);

        if magnitude > pid.stall_threshold() {
            if self.ticks_since_warn >= self.warn_interval {
                self.ticks_since_warn = 0;
                warn!(
                    "Position error {error:.3} steps above stall threshold {} (decayed {:.3})",
                    pid.stall_threshold(),
                    self.decayed_error
                );
            }
            ErrorLevel::Stall
        } else if magnitude > pid.pre_stall_threshold() {
            debug!("Position error {error:.3} steps above pre-stall threshold");
            ErrorLevel::PreStall
        } else {
            ErrorLevel::Normal
        }
    }
}

// ─── Supervisor ─────────────────────────────────────────────────────

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Closed loop disabled.
    Disabled,
    /// Engine held by the tuning task.
    Busy,
    /// Tuning errors outstanding or maneuvers pending; tuning task woken.
    TuningPending,
    /// One PID iteration ran.
    Controlled { error: f32, level: ErrorLevel },
    /// No encoder to control from.
    NoEncoder,
}

/// Cloneable handle driving the engine once per tick.
#[derive(Debug, Clone)]
pub struct Supervisor {
    engine: Arc<Mutex<ClosedLoop>>,
    shared: Arc<SharedState>,
}

impl Supervisor {
    pub fn new(engine: Arc<Mutex<ClosedLoop>>, shared: Arc<SharedState>) -> Self {
        Self { engine, shared }
    }

    pub fn tick(&self) -> TickOutcome {
        // Rate-0 collections sample the last published state; tuning
        // maneuvers record their own points.
        if self.shared.sampler.is_collecting() && !self.shared.is_tuning() {
            let state = self.shared.snapshot();
            self.shared.record_sample(&state, SampleClock::ControlTick);
        }

        if !self.shared.is_enabled() {
            return TickOutcome::Disabled;
        }
        let Some(mut engine) = self.engine.try_lock() else {
            return TickOutcome::Busy;
        };

        if !engine.errors.is_empty() || !engine.request.is_empty() {
            drop(engine);
            self.shared.tuning_wake.give();
            return TickOutcome::TuningPending;
        }

        match engine.control_step() {
            Some(error) => {
                let pid = engine.pid;
                let level = engine.monitor.update(error, &pid);
                TickOutcome::Controlled { error, level }
            }
            None => TickOutcome::NoEncoder,
        }
    }
}
