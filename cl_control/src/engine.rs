//! Closed-loop engine context.
//!
//! [`ClosedLoop`] owns the encoder, the drive, the delay capability and all
//! mutable loop state. It lives behind one mutex: the supervisor takes it
//! with `try_lock` for a single control iteration, the tuning task holds it
//! for a whole tuning run.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use cl_common::config::{ClosedLoopConfig, PidParameters, TuningParameters};
use cl_common::hal::{Delay, Drive, DriveMode, EncoderFactory, EncoderKind, HardwareError};
use cl_common::tuning::{TuningError, TuningRequest};
use tracing::info;

use crate::control::pid::PidState;
use crate::control::{ControlInput, ControlState, control_iteration};
use crate::encoder::EncoderSlot;
use crate::error::{CommandError, ManeuverFault};
use crate::sampling::acquisition::SampleClock;
use crate::shared::SharedState;
use crate::supervisor::ErrorMonitor;
use crate::tuning::ziegler_nichols::ZieglerNicholsResult;

/// Hardware capabilities handed to the engine.
pub struct Hardware {
    pub drive: Box<dyn Drive>,
    pub encoders: Box<dyn EncoderFactory>,
    pub delay: Box<dyn Delay>,
}

pub struct ClosedLoop {
    pub(crate) encoder: EncoderSlot,
    pub(crate) drive: Box<dyn Drive>,
    pub(crate) delay: Box<dyn Delay>,
    pub(crate) counts_per_step: f32,
    pub(crate) pid: PidParameters,
    pub(crate) tuning: TuningParameters,
    pub(crate) tick_period: Duration,
    pub(crate) state: ControlState,
    pub(crate) request: TuningRequest,
    pub(crate) errors: TuningError,
    pub(crate) zn_result: Option<ZieglerNicholsResult>,
    pub(crate) monitor: ErrorMonitor,
    pub(crate) shared: Arc<SharedState>,
}

impl ClosedLoop {
    /// Build the engine from a validated configuration.
    ///
    /// Nothing has been verified at start-up, so every "never verified"
    /// tuning error bit is raised.
    pub fn new(
        config: &ClosedLoopConfig,
        hardware: Hardware,
        shared: Arc<SharedState>,
    ) -> Result<Self, HardwareError> {
        let mut encoder = EncoderSlot::new(hardware.encoders);
        encoder.replace(config.encoder.kind)?;
        shared.set_encoder_kind(encoder.kind());

        let mut engine = Self {
            encoder,
            drive: hardware.drive,
            delay: hardware.delay,
            counts_per_step: config.encoder.counts_per_step,
            pid: config.pid,
            tuning: config.tuning,
            tick_period: config.tick_period(),
            state: ControlState::default(),
            request: TuningRequest::empty(),
            errors: TuningError::UNVERIFIED,
            zn_result: None,
            monitor: ErrorMonitor::new(&config.monitor),
            shared,
        };
        if config.enabled && engine.encoder.is_present() {
            engine.activate();
        }
        Ok(engine)
    }

    // ─── Accessors ──────────────────────────────────────────────────

    #[inline]
    pub fn pid(&self) -> &PidParameters {
        &self.pid
    }

    #[inline]
    pub fn tuning_parameters(&self) -> &TuningParameters {
        &self.tuning
    }

    #[inline]
    pub fn counts_per_step(&self) -> f32 {
        self.counts_per_step
    }

    #[inline]
    pub fn encoder_kind(&self) -> EncoderKind {
        self.encoder.kind()
    }

    #[inline]
    pub fn state(&self) -> &ControlState {
        &self.state
    }

    #[inline]
    pub fn tuning_request(&self) -> TuningRequest {
        self.request
    }

    #[inline]
    pub fn tuning_errors(&self) -> TuningError {
        self.errors
    }

    #[inline]
    pub fn zn_result(&self) -> Option<&ZieglerNicholsResult> {
        self.zn_result.as_ref()
    }

    #[inline]
    pub fn monitor(&self) -> &ErrorMonitor {
        &self.monitor
    }

    #[inline]
    pub fn drive_mode(&self) -> DriveMode {
        self.drive.drive_mode()
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    // ─── Enable ─────────────────────────────────────────────────────

    /// Enable or disable closed-loop mode.
    ///
    /// A fresh enable requires an encoder and invalidates every previous
    /// verification. Disabling never touches the tuning errors.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), CommandError> {
        if enabled {
            if !self.encoder.is_present() {
                return Err(CommandError::NoEncoder);
            }
            if !self.is_enabled() {
                self.activate();
            }
        } else if self.shared.enabled.swap(false, Ordering::AcqRel) {
            info!("Closed loop disabled");
        }
        Ok(())
    }

    /// Enter closed-loop mode holding the current position.
    fn activate(&mut self) {
        self.errors |= TuningError::UNVERIFIED;
        self.shared.target.set_microstepping(self.drive.microstepping());
        if let Some(raw) = self.encoder.read() {
            self.state.set_position(raw, self.counts_per_step);
        }
        self.shared.target.set(self.state.current_steps);
        self.state.target_steps = self.state.current_steps;
        self.state.pid.reset();
        self.monitor.reset();
        self.shared.publish(&self.state);
        self.shared.enabled.store(true, Ordering::Release);
        info!(
            "Closed loop enabled at {:.3} steps (microstep {})",
            self.state.current_steps,
            self.shared.target.microstep()
        );
    }

    // ─── Control ────────────────────────────────────────────────────

    /// Run one PID iteration against the shared target.
    ///
    /// Returns the position error, or `None` without an encoder.
    pub fn control_step(&mut self) -> Option<f32> {
        let raw = self.encoder.read()?;
        let input = ControlInput {
            raw_position: raw,
            counts_per_step: self.counts_per_step,
            target_steps: self.shared.target.get(),
            collecting: self.shared.sampler.is_collecting(),
        };
        if let Some((a, b)) = control_iteration(&mut self.state, &self.pid, &input) {
            self.drive.set_phase_currents(a, b);
        }
        self.publish();
        Some(self.state.current_error)
    }

    #[inline]
    pub(crate) fn reset_pid(&mut self) {
        self.state.pid = PidState::default();
    }

    // ─── Maneuver primitives ────────────────────────────────────────

    /// Encoder present and drive in direct mode.
    pub(crate) fn check_hardware(&mut self) -> Result<(), ManeuverFault> {
        if !self.encoder.is_present() {
            return Err(ManeuverFault::NoEncoder);
        }
        match self.drive.drive_mode() {
            DriveMode::Direct => Ok(()),
            mode => Err(ManeuverFault::NotDirectMode(mode)),
        }
    }

    /// Read the encoder into the state.
    pub(crate) fn read_position(&mut self) -> Result<i32, ManeuverFault> {
        let raw = self.encoder.read().ok_or(ManeuverFault::NoEncoder)?;
        self.state.set_position(raw, self.counts_per_step);
        Ok(raw)
    }

    /// Read the encoder and publish the state for sampling.
    pub(crate) fn measure(&mut self) -> Result<i32, ManeuverFault> {
        let raw = self.read_position()?;
        self.publish();
        Ok(raw)
    }

    /// Command a phase with the configured coil polarity.
    #[inline]
    pub(crate) fn command_phase(&mut self, phase: u16, magnitude: f32) {
        let (a, b) = (self.pid.coil_a_polarity, self.pid.coil_b_polarity);
        self.command_phase_with(phase, magnitude, a, b);
    }

    /// Command a phase with an explicit coil polarity.
    pub(crate) fn command_phase_with(
        &mut self,
        phase: u16,
        magnitude: f32,
        polarity_a: bool,
        polarity_b: bool,
    ) {
        let (a, b) = self
            .state
            .command_phase(phase, magnitude, polarity_a, polarity_b);
        self.drive.set_phase_currents(a, b);
    }

    /// Wait until the drive accepted the last currents.
    pub(crate) fn wait_update(&mut self) -> Result<(), ManeuverFault> {
        self.check_hardware()?;
        let limit = self.tuning.max_update_polls;
        let interval = self.tuning.update_poll_interval();
        for _ in 0..limit {
            if !self.drive.update_pending() {
                return Ok(());
            }
            self.delay.delay(interval);
        }
        Err(ManeuverFault::DriveUnresponsive { polls: limit })
    }

    /// Wait for the drive, then let the rotor settle.
    pub(crate) fn settle(&mut self) -> Result<(), ManeuverFault> {
        self.wait_update()?;
        let settle = self.tuning.settle_time();
        self.delay.delay(settle);
        Ok(())
    }

    /// Wait for the drive, then one control tick.
    pub(crate) fn wait_tick(&mut self) -> Result<(), ManeuverFault> {
        self.wait_update()?;
        let tick = self.tick_period;
        self.delay.delay(tick);
        Ok(())
    }

    /// Publish the state; while tuning also offer it to a rate-0 collection.
    pub(crate) fn publish(&mut self) {
        self.state.target_steps = self.shared.target.get();
        self.shared.publish(&self.state);
        if self.shared.is_tuning() {
            self.shared.record_sample(&self.state, SampleClock::ControlTick);
        }
    }

    // ─── Diagnostics ────────────────────────────────────────────────

    /// Human-readable diagnostic report.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let s = &self.state;
        let p = &self.pid;
        let status = self.shared.sampler.status();
        let _ = writeln!(
            out,
            "closed loop: {}",
            if self.is_enabled() { "enabled" } else { "disabled" }
        );
        let _ = writeln!(
            out,
            "encoder: {}, {} counts/step, raw {}, {:.4} steps, target {:.4} steps",
            self.encoder.kind(),
            self.counts_per_step,
            s.raw_position,
            s.current_steps,
            self.shared.target.get()
        );
        let _ = writeln!(
            out,
            "pid: kp {} ki {} kd {}, hold current {}, polarity A{} B{}",
            p.kp,
            p.ki,
            p.kd,
            p.hold_current,
            if p.coil_a_polarity { '+' } else { '-' },
            if p.coil_b_polarity { '+' } else { '-' }
        );
        let _ = writeln!(
            out,
            "error thresholds: pre-stall {} stall {} steps",
            p.pre_stall_threshold(),
            p.stall_threshold()
        );
        let _ = writeln!(
            out,
            "tuning request: {:#04x}, tuning errors: {:#06x} ({})",
            self.request.bits(),
            self.errors.bits(),
            self.errors
        );
        match &self.zn_result {
            Some(zn) => {
                let _ = writeln!(out, "ziegler-nichols: {zn}");
            }
            None => {
                let _ = writeln!(out, "ziegler-nichols: not run");
            }
        }
        let _ = writeln!(
            out,
            "position error: current {:.4} peak {:.4} decayed {:.4} steps",
            s.current_error, self.monitor.peak_error, self.monitor.decayed_error
        );
        let _ = write!(
            out,
            "collection: {}, {}/{} samples taken, {} sent, {} Hz",
            if status.collecting { "running" } else { "idle" },
            status.samples_taken,
            status.samples_requested,
            status.samples_sent,
            status.rate_hz
        );
        out
    }
}

impl std::fmt::Debug for ClosedLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosedLoop")
            .field("encoder", &self.encoder)
            .field("counts_per_step", &self.counts_per_step)
            .field("pid", &self.pid)
            .field("request", &self.request)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}
