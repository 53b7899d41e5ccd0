//! Simulated stepper: drive, encoder and delay over one synthetic plant.
//!
//! The rotor follows the magnetic field set by the two coil currents. The
//! field angle is `atan2(sb·ib, sa·ia)` where `sa`/`sb` model reversed coil
//! wiring; one field revolution is one electrical cycle (four full steps).
//! The rotor approaches the field along the shorter way with a first-order
//! lag of time constant `tau`; `tau = 0` snaps it to the field on the next
//! time advance.
//!
//! Two clocks are available:
//! - virtual: only `Delay::delay` and [`SimulatedStepper::advance`] move
//!   time, so tests run at full speed and deterministically;
//! - wall: plant time follows `Instant::now()` and `delay` sleeps.

use std::f32::consts::{PI, TAU};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cl_common::config::SimulationConfig;
use cl_common::consts::STEPS_PER_PHASE_PERIOD;
use cl_common::hal::{
    Delay, Drive, DriveMode, Encoder, EncoderFactory, EncoderKind, HardwareError,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimClock {
    Virtual,
    Wall,
}

#[derive(Debug)]
struct PlantState {
    /// Rotor position [steps].
    position: f32,
    coil_a: i16,
    coil_b: i16,
    counts_per_step: f32,
    sign_a: f32,
    sign_b: f32,
    tau_s: f32,
    microstepping: u16,
    mode: DriveMode,
    update_pending: bool,
    unresponsive: bool,
    forced_enabled: bool,
    encoder_offset: i32,
    clock: SimClock,
    last_wall: Instant,
    /// Virtual time [s].
    elapsed_s: f64,
}

/// Wrap an angle into `(-π, π]`.
#[inline]
fn wrap_pi(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

impl PlantState {
    fn step(&mut self, dt: f32) {
        if dt <= 0.0 || (self.coil_a == 0 && self.coil_b == 0) {
            return;
        }
        let field = (self.sign_b * f32::from(self.coil_b)).atan2(self.sign_a * f32::from(self.coil_a));
        let rotor = self.position / STEPS_PER_PHASE_PERIOD * TAU;
        let gap = wrap_pi(field - rotor);
        let fraction = if self.tau_s > 0.0 {
            1.0 - (-dt / self.tau_s).exp()
        } else {
            1.0
        };
        self.position += gap * fraction / TAU * STEPS_PER_PHASE_PERIOD;
    }

    fn advance(&mut self, dt: Duration) {
        self.elapsed_s += dt.as_secs_f64();
        self.step(dt.as_secs_f32());
    }

    /// Catch up with wall-clock time.
    fn sync(&mut self) {
        if self.clock == SimClock::Wall {
            let now = Instant::now();
            let dt = now.duration_since(self.last_wall);
            self.last_wall = now;
            self.advance(dt);
        }
    }

    fn count(&self) -> i32 {
        (self.position * self.counts_per_step).round() as i32 - self.encoder_offset
    }
}

/// Handle onto one simulated motor. Clones share the plant.
#[derive(Debug, Clone)]
pub struct SimulatedStepper {
    plant: Arc<Mutex<PlantState>>,
}

impl SimulatedStepper {
    pub fn new(config: &SimulationConfig, clock: SimClock) -> Self {
        let sign = |reversed: bool| if reversed { -1.0 } else { 1.0 };
        let plant = PlantState {
            position: config.initial_position_steps,
            coil_a: 0,
            coil_b: 0,
            counts_per_step: config.counts_per_step,
            sign_a: sign(config.coil_a_reversed),
            sign_b: sign(config.coil_b_reversed),
            tau_s: config.time_constant_ms / 1000.0,
            microstepping: config.microstepping,
            mode: DriveMode::Direct,
            update_pending: false,
            unresponsive: false,
            forced_enabled: false,
            encoder_offset: config.encoder_offset,
            clock,
            last_wall: Instant::now(),
            elapsed_s: 0.0,
        };
        Self {
            plant: Arc::new(Mutex::new(plant)),
        }
    }

    /// Virtual-clock plant for tests.
    pub fn virtual_clock(config: &SimulationConfig) -> Self {
        Self::new(config, SimClock::Virtual)
    }

    /// Move plant time forward (virtual clock).
    pub fn advance(&self, dt: Duration) {
        self.plant.lock().advance(dt);
    }

    /// Rotor position [steps].
    pub fn position_steps(&self) -> f32 {
        let mut plant = self.plant.lock();
        plant.sync();
        plant.position
    }

    /// Virtual time elapsed [s].
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.plant.lock().elapsed_s)
    }

    pub fn coil_currents(&self) -> (i16, i16) {
        let plant = self.plant.lock();
        (plant.coil_a, plant.coil_b)
    }

    pub fn set_drive_mode(&self, mode: DriveMode) {
        self.plant.lock().mode = mode;
    }

    /// Make the drive never acknowledge a current update.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.plant.lock().unresponsive = unresponsive;
    }

    pub fn forced_enabled(&self) -> bool {
        self.plant.lock().forced_enabled
    }

    /// Boxed capabilities for the engine.
    pub fn hardware(&self) -> crate::engine::Hardware {
        crate::engine::Hardware {
            drive: Box::new(self.clone()),
            encoders: Box::new(self.clone()),
            delay: Box::new(self.clone()),
        }
    }
}

impl Drive for SimulatedStepper {
    fn set_phase_currents(&mut self, coil_a: i16, coil_b: i16) {
        let mut plant = self.plant.lock();
        plant.sync();
        plant.coil_a = coil_a;
        plant.coil_b = coil_b;
        plant.update_pending = true;
    }

    fn update_pending(&mut self) -> bool {
        let mut plant = self.plant.lock();
        if plant.unresponsive {
            return true;
        }
        std::mem::replace(&mut plant.update_pending, false)
    }

    fn microstepping(&self) -> u16 {
        self.plant.lock().microstepping
    }

    fn drive_mode(&self) -> DriveMode {
        self.plant.lock().mode
    }

    fn force_enabled(&mut self, enabled: bool) {
        self.plant.lock().forced_enabled = enabled;
    }
}

impl Delay for SimulatedStepper {
    fn delay(&mut self, duration: Duration) {
        let clock = self.plant.lock().clock;
        match clock {
            SimClock::Virtual => self.advance(duration),
            SimClock::Wall => std::thread::sleep(duration),
        }
    }
}

/// Encoder reading the simulated rotor.
#[derive(Debug)]
pub struct SimEncoder {
    kind: EncoderKind,
    plant: Arc<Mutex<PlantState>>,
}

impl Encoder for SimEncoder {
    fn kind(&self) -> EncoderKind {
        self.kind
    }

    fn enable(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn read(&mut self) -> i32 {
        let mut plant = self.plant.lock();
        plant.sync();
        plant.count()
    }

    fn set_zero_offset(&mut self, count: i32) {
        self.plant.lock().encoder_offset += count;
    }
}

impl EncoderFactory for SimulatedStepper {
    fn create(&mut self, kind: EncoderKind) -> Result<Box<dyn Encoder>, HardwareError> {
        match kind {
            EncoderKind::None => Err(HardwareError::UnsupportedEncoder(kind)),
            _ => Ok(Box::new(SimEncoder {
                kind,
                plant: Arc::clone(&self.plant),
            })),
        }
    }
}
