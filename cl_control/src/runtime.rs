//! Runtime: owns the engine and runs the tuning, acquisition and
//! transmission tasks.
//!
//! The command surface lives here. Commands that need the engine take its
//! lock with a bounded wait and fail with [`CommandError::Busy`] while a
//! tuning run holds it; a plain disable never waits.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cl_common::config::{ClosedLoopConfig, TelemetryConfig};
use cl_common::hal::{DriveMode, EncoderKind};
use cl_common::tuning::TuningRequest;
use parking_lot::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::config::{ConfigCommand, ConfigReply};
use crate::control::ControlState;
use crate::engine::{ClosedLoop, Hardware};
use crate::error::{CommandError, RuntimeError};
use crate::sampling::acquisition::{CollectionRequest, acquisition_task};
use crate::sampling::transmission::{TelemetrySink, transmission_task};
use crate::shared::SharedState;
use crate::supervisor::Supervisor;
use crate::tuning::TuningReport;

/// Longest a command waits for the engine lock.
const COMMAND_LOCK_TIMEOUT: Duration = Duration::from_millis(50);
/// Tuning task wake-up period without a wake.
const TUNING_POLL: Duration = Duration::from_millis(500);
/// `tune` re-checks the pending request at least this often.
const TUNE_POLL: Duration = Duration::from_millis(100);

pub struct ClosedLoopRuntime {
    engine: Arc<Mutex<ClosedLoop>>,
    shared: Arc<SharedState>,
    telemetry: TelemetryConfig,
    last_reply: Mutex<ConfigReply>,
    threads: Vec<JoinHandle<()>>,
}

impl ClosedLoopRuntime {
    /// Build the engine and spawn its tasks.
    pub fn start(
        config: &ClosedLoopConfig,
        hardware: Hardware,
        sink: Box<dyn TelemetrySink>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let shared = Arc::new(SharedState::new());
        let engine = ClosedLoop::new(config, hardware, Arc::clone(&shared))?;
        let last_reply = engine.config_reply();
        let engine = Arc::new(Mutex::new(engine));

        let mut runtime = Self {
            engine,
            shared,
            telemetry: config.telemetry,
            last_reply: Mutex::new(last_reply),
            threads: Vec::with_capacity(3),
        };

        let (engine, shared) = (Arc::clone(&runtime.engine), Arc::clone(&runtime.shared));
        runtime.spawn("cl-tune", move || tuning_task(engine, shared))?;

        let shared = Arc::clone(&runtime.shared);
        runtime.spawn("cl-acquire", move || acquisition_task(shared))?;

        let shared = Arc::clone(&runtime.shared);
        let telemetry = runtime.telemetry;
        runtime.spawn("cl-transmit", move || transmission_task(shared, sink, telemetry))?;

        info!(
            "Closed loop runtime started: encoder {}, {}",
            config.encoder.kind,
            if config.enabled { "enabled" } else { "disabled" }
        );
        Ok(runtime)
    }

    fn spawn<F>(&mut self, task: &'static str, body: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(task.to_string())
            .spawn(body)
            .map_err(|source| RuntimeError::Spawn { task, source });
        match handle {
            Ok(handle) => {
                self.threads.push(handle);
                Ok(())
            }
            Err(e) => {
                self.shutdown();
                Err(e)
            }
        }
    }

    /// Per-tick entry point for the tick runner.
    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(Arc::clone(&self.engine), Arc::clone(&self.shared))
    }

    #[inline]
    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Latest published engine state.
    #[inline]
    pub fn snapshot(&self) -> ControlState {
        self.shared.snapshot()
    }

    fn lock_engine(&self) -> Result<MutexGuard<'_, ClosedLoop>, CommandError> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(CommandError::ShuttingDown);
        }
        self.engine
            .try_lock_for(COMMAND_LOCK_TIMEOUT)
            .ok_or(CommandError::Busy)
    }

    // ─── Commands ───────────────────────────────────────────────────

    /// Apply a configuration command.
    ///
    /// A command that only disables closed-loop mode takes effect on the
    /// next tick even while tuning holds the engine; its reply then carries
    /// the settings of the last completed command.
    pub fn configure(&self, cmd: &ConfigCommand) -> Result<ConfigReply, CommandError> {
        if cmd.is_disable_only() {
            if let Some(mut engine) = self.engine.try_lock() {
                let reply = engine.configure(cmd)?;
                *self.last_reply.lock() = reply;
                return Ok(reply);
            }
            if self.shared.enabled.swap(false, Ordering::AcqRel) {
                info!("Closed loop disabled while tuning");
            }
            let mut reply = self.last_reply.lock();
            reply.enabled = false;
            return Ok(*reply);
        }

        let mut engine = self.lock_engine()?;
        let reply = engine.configure(cmd)?;
        *self.last_reply.lock() = reply;
        Ok(reply)
    }

    /// Run the requested maneuvers and block until all of them drained.
    pub fn tune(&self, request: TuningRequest) -> Result<TuningReport, CommandError> {
        if self.shared.sampler.is_collecting() {
            return Err(CommandError::AlreadyCollecting);
        }
        let before = {
            let mut engine = self.lock_engine()?;
            check_tunable(&engine)?;
            engine.request_tuning(request);
            engine.errors
        };
        info!("Tuning requested: {:#04x}", request.bits());

        self.shared.tuning_done.clear();
        self.shared.tuning_wake.give();
        loop {
            self.shared.tuning_done.take(Some(TUNE_POLL));
            if !self.shared.running.load(Ordering::Acquire) {
                return Err(CommandError::ShuttingDown);
            }
            if let Some(engine) = self.engine.try_lock_for(COMMAND_LOCK_TIMEOUT) {
                if engine.request.is_empty() {
                    let report = TuningReport::evaluate(before, engine.errors);
                    *self.last_reply.lock() = engine.config_reply();
                    info!("{report}");
                    return Ok(report);
                }
            }
            self.shared.tuning_wake.give();
        }
    }

    /// Arm a data collection, optionally driven by one tuning maneuver.
    pub fn start_collection(&self, request: &CollectionRequest) -> Result<(), CommandError> {
        let maneuver = request.validate(self.telemetry.max_rate_hz)?;
        if self.shared.encoder_kind() == EncoderKind::None {
            return Err(CommandError::NoEncoder);
        }

        match maneuver {
            Some(maneuver) => {
                let mut engine = self.lock_engine()?;
                check_tunable(&engine)?;
                self.shared.sampler.start(request, self.shared.target.get())?;
                engine.request_tuning(maneuver);
                drop(engine);
                self.shared.tuning_wake.give();
            }
            None => self.shared.sampler.start(request, self.shared.target.get())?,
        }
        if request.rate_hz > 0 {
            self.shared.acquire_wake.give();
        }
        Ok(())
    }

    /// Move the target one microstep; returns the new target [steps].
    #[inline]
    pub fn take_step(&self, forward: bool) -> f32 {
        self.shared.target.take_step(forward)
    }

    #[inline]
    pub fn set_target(&self, steps: f32) {
        self.shared.target.set(steps);
    }

    /// Diagnostic report, or a short notice while tuning holds the engine.
    pub fn report(&self) -> String {
        match self.engine.try_lock_for(COMMAND_LOCK_TIMEOUT) {
            Some(engine) => engine.report(),
            None => String::from("closed loop busy: tuning in progress"),
        }
    }

    /// Stop and join all tasks.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.stop();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("task").to_string();
            if handle.join().is_err() {
                warn!("{name} task panicked");
            }
        }
        info!("Closed loop runtime stopped");
    }
}

impl Drop for ClosedLoopRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ClosedLoopRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosedLoopRuntime")
            .field("shared", &self.shared)
            .field("threads", &self.threads.len())
            .finish_non_exhaustive()
    }
}

/// Maneuvers need an encoder and direct coil-current mode.
fn check_tunable(engine: &ClosedLoop) -> Result<(), CommandError> {
    if engine.encoder_kind() == EncoderKind::None {
        return Err(CommandError::NoEncoder);
    }
    match engine.drive_mode() {
        DriveMode::Direct => Ok(()),
        mode => Err(CommandError::NotDirectMode(mode)),
    }
}

/// Tuning task body: runs pending maneuvers whenever woken.
fn tuning_task(engine: Arc<Mutex<ClosedLoop>>, shared: Arc<SharedState>) {
    info!("Tuning task started");
    while shared.running.load(Ordering::Acquire) {
        shared.tuning_wake.take(Some(TUNING_POLL));
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        let mut guard = engine.lock();
        if guard.request.is_empty() {
            continue;
        }
        guard.run_tuning();
        drop(guard);
        shared.tuning_done.give();
    }
    info!("Tuning task stopped");
}
