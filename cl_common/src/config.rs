//! Configuration loading traits and types.
//!
//! All closed-loop settings live in one TOML file deserialized into
//! [`ClosedLoopConfig`]. Every section is optional and falls back to the
//! defaults below; numeric parameters have explicit bounds checked by
//! `validate()`.
//!
//! # TOML Example
//!
//! ```toml
//! log_level = "debug"
//! tick_period_us = 1000
//! enabled = true
//!
//! [encoder]
//! kind = "rotary-quadrature"
//! counts_per_step = 10.0
//!
//! [pid]
//! kp = 100.0
//! kd = 10.0
//! hold_current = 0.25
//!
//! [tuning]
//! zn_kp_max = 1500.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::consts::{DEFAULT_TICK_PERIOD_US, TICK_PERIOD_US_MAX, TICK_PERIOD_US_MIN};
use crate::hal::EncoderKind;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Trait for loading configuration from TOML files.
///
/// Blanket-implemented for every `serde::de::DeserializeOwned` type.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Top-Level Config ───────────────────────────────────────────────

/// Complete closed-loop engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedLoopConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Control tick period in microseconds (default: 1000 = 1 kHz).
    #[serde(default = "default_tick_period_us")]
    pub tick_period_us: u32,

    /// Enable closed-loop mode at startup.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub pid: PidParameters,

    #[serde(default)]
    pub tuning: TuningParameters,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_tick_period_us() -> u32 {
    DEFAULT_TICK_PERIOD_US
}

impl Default for ClosedLoopConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            tick_period_us: DEFAULT_TICK_PERIOD_US,
            enabled: false,
            encoder: EncoderConfig::default(),
            pid: PidParameters::default(),
            tuning: TuningParameters::default(),
            telemetry: TelemetryConfig::default(),
            monitor: MonitorConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl ClosedLoopConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period_us < TICK_PERIOD_US_MIN || self.tick_period_us > TICK_PERIOD_US_MAX {
            return Err(ConfigError::ValidationError(format!(
                "tick_period_us {} out of range [{}, {}]",
                self.tick_period_us, TICK_PERIOD_US_MIN, TICK_PERIOD_US_MAX
            )));
        }
        if self.enabled && self.encoder.kind == EncoderKind::None {
            return Err(ConfigError::ValidationError(
                "closed loop enabled without an encoder".to_string(),
            ));
        }
        self.encoder.validate()?;
        self.pid.validate()?;
        self.tuning.validate()?;
        self.telemetry.validate()?;
        self.monitor.validate()?;
        self.simulation.validate()
    }

    /// Tick period as a `Duration`.
    #[inline]
    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_micros(u64::from(self.tick_period_us))
    }
}

// ─── Encoder ────────────────────────────────────────────────────────

/// Encoder selection and scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default)]
    pub kind: EncoderKind,

    /// Encoder counts per full motor step (finite, non-zero, may be negative).
    #[serde(default = "default_counts_per_step")]
    pub counts_per_step: f32,
}

fn default_counts_per_step() -> f32 {
    1.0
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            kind: EncoderKind::None,
            counts_per_step: default_counts_per_step(),
        }
    }
}

impl EncoderConfig {
    #[inline]
    pub fn counts_per_step_valid(value: f32) -> bool {
        value.is_finite() && value != 0.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !Self::counts_per_step_valid(self.counts_per_step) {
            return Err(ConfigError::ValidationError(format!(
                "encoder.counts_per_step {} must be finite and non-zero",
                self.counts_per_step
            )));
        }
        Ok(())
    }
}

// ─── PID ────────────────────────────────────────────────────────────

/// PID gains, holding current, coil polarity and error thresholds.
///
/// Mutated only by validated configuration commands and by polarity
/// detection; never by the control loop itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidParameters {
    /// Proportional gain [signal / step].
    #[serde(default = "default_kp")]
    pub kp: f32,
    /// Integral gain (0 = disabled).
    #[serde(default)]
    pub ki: f32,
    /// Derivative gain (0 = disabled).
    #[serde(default = "default_kd")]
    pub kd: f32,
    /// Minimum current magnitude as a fraction of full scale.
    #[serde(default = "default_hold_current")]
    pub hold_current: f32,
    /// Coil A current sign (`true` = positive).
    #[serde(default = "default_true")]
    pub coil_a_polarity: bool,
    /// Coil B current sign (`true` = positive).
    #[serde(default = "default_true")]
    pub coil_b_polarity: bool,
    /// `[pre_stall, stall]` position error thresholds [steps].
    #[serde(default = "default_error_thresholds")]
    pub error_thresholds: [f32; 2],
}

fn default_kp() -> f32 {
    100.0
}
fn default_kd() -> f32 {
    10.0
}
fn default_hold_current() -> f32 {
    0.25
}
fn default_true() -> bool {
    true
}
fn default_error_thresholds() -> [f32; 2] {
    [1.0, 2.0]
}

impl Default for PidParameters {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: 0.0,
            kd: default_kd(),
            hold_current: default_hold_current(),
            coil_a_polarity: true,
            coil_b_polarity: true,
            error_thresholds: default_error_thresholds(),
        }
    }
}

impl PidParameters {
    /// Gains and thresholds must be finite and non-negative.
    #[inline]
    pub fn gain_valid(value: f32) -> bool {
        value.is_finite() && value >= 0.0
    }

    #[inline]
    pub fn hold_current_valid(value: f32) -> bool {
        value.is_finite() && (0.0..=1.0).contains(&value)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !Self::gain_valid(value) {
                return Err(ConfigError::ValidationError(format!(
                    "pid.{name} {value} must be finite and >= 0"
                )));
            }
        }
        if !Self::hold_current_valid(self.hold_current) {
            return Err(ConfigError::ValidationError(format!(
                "pid.hold_current {} out of range [0, 1]",
                self.hold_current
            )));
        }
        if !self.error_thresholds.iter().all(|t| Self::gain_valid(*t)) {
            return Err(ConfigError::ValidationError(format!(
                "pid.error_thresholds {:?} must be finite and >= 0",
                self.error_thresholds
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn pre_stall_threshold(&self) -> f32 {
        self.error_thresholds[0]
    }

    #[inline]
    pub fn stall_threshold(&self) -> f32 {
        self.error_thresholds[1]
    }
}

// ─── Tuning ─────────────────────────────────────────────────────────

/// Tuning maneuver parameters.
///
/// Every threshold of the Ziegler–Nichols search is a named field so a
/// machine integrator can override it from TOML.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningParameters {
    /// Wait after the drive accepted new currents [ms].
    pub settle_time_ms: u32,
    /// Interval between "update pending" polls [µs].
    pub update_poll_interval_us: u32,
    /// Maximum "update pending" polls before the drive is declared unresponsive.
    pub max_update_polls: u32,

    /// Phase commands per electrical cycle during polarity detection.
    pub polarity_sweep_increments: u16,
    /// Allowed measured-vs-commanded deviation during the polarity check [counts].
    pub polarity_check_tolerance_counts: f32,
    /// Deviating points tolerated before the polarity check fails.
    pub polarity_check_max_deviations: u32,
    /// Allowed relative deviation of measured counts per step.
    pub encoder_steps_tolerance: f32,

    /// Phase advance per tick of the continuous sweep [phase units].
    pub sweep_increment: u16,
    /// Electrical cycles covered by the continuous sweep.
    pub sweep_cycles: u16,
    /// Target offset of the step response [steps].
    pub step_response_offset: f32,
    /// Control ticks recorded after the step.
    pub step_response_ticks: u32,

    /// Lower bound of the ultimate gain search.
    pub zn_kp_min: f32,
    /// Upper bound of the ultimate gain search.
    pub zn_kp_max: f32,
    /// Search stops once the bracket is narrower than this.
    pub zn_kp_resolution: f32,
    /// Target offset of each trial [steps].
    pub zn_step_offset: f32,
    /// Half-cycles (error sign changes) required for a "decaying" verdict.
    pub zn_min_half_cycles: u32,
    /// Half-cycles (error sign changes) required for a "sustained" verdict.
    pub zn_sustained_half_cycles: u32,
    /// Average peak ratio separating decaying from sustained oscillation.
    pub zn_decay_threshold: f32,
    /// Weight of the newest ratio in the running average.
    pub zn_ratio_alpha: f32,
    /// Trial length limit [ticks]; no verdict by then counts as decaying.
    pub zn_max_ticks: u32,
    /// Ticks under the saved gains before each trial, to return to rest.
    pub zn_settle_ticks: u32,
}

impl Default for TuningParameters {
    fn default() -> Self {
        Self {
            settle_time_ms: 20,
            update_poll_interval_us: 100,
            max_update_polls: 1000,
            polarity_sweep_increments: 32,
            polarity_check_tolerance_counts: 2.0,
            polarity_check_max_deviations: 10,
            encoder_steps_tolerance: 0.1,
            sweep_increment: 16,
            sweep_cycles: 2,
            step_response_offset: 1.0,
            step_response_ticks: 200,
            zn_kp_min: 0.0,
            zn_kp_max: 2000.0,
            zn_kp_resolution: 5.0,
            zn_step_offset: 0.25,
            zn_min_half_cycles: 5,
            zn_sustained_half_cycles: 10,
            zn_decay_threshold: 0.98,
            zn_ratio_alpha: 0.5,
            zn_max_ticks: 16384,
            zn_settle_ticks: 500,
        }
    }
}

impl TuningParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.max_update_polls == 0 {
            return fail("tuning.max_update_polls must be > 0".to_string());
        }
        if self.polarity_sweep_increments < 4 {
            return fail(format!(
                "tuning.polarity_sweep_increments {} must be >= 4",
                self.polarity_sweep_increments
            ));
        }
        if !(self.polarity_check_tolerance_counts.is_finite()
            && self.polarity_check_tolerance_counts >= 0.0)
        {
            return fail("tuning.polarity_check_tolerance_counts must be >= 0".to_string());
        }
        if !(self.encoder_steps_tolerance.is_finite() && self.encoder_steps_tolerance > 0.0) {
            return fail("tuning.encoder_steps_tolerance must be > 0".to_string());
        }
        if self.sweep_increment == 0 || self.sweep_cycles == 0 {
            return fail("tuning.sweep_increment and tuning.sweep_cycles must be > 0".to_string());
        }
        if !self.step_response_offset.is_finite() {
            return fail("tuning.step_response_offset must be finite".to_string());
        }
        if !(self.zn_kp_min.is_finite() && self.zn_kp_min >= 0.0)
            || !(self.zn_kp_max.is_finite() && self.zn_kp_max > self.zn_kp_min)
        {
            return fail(format!(
                "tuning.zn_kp range [{}, {}] invalid",
                self.zn_kp_min, self.zn_kp_max
            ));
        }
        if !(self.zn_kp_resolution.is_finite() && self.zn_kp_resolution > 0.0) {
            return fail("tuning.zn_kp_resolution must be > 0".to_string());
        }
        // Below one f32 step at the upper bound the bracket cannot narrow further.
        if self.zn_kp_resolution < f32::EPSILON * self.zn_kp_max.abs() {
            return fail(format!(
                "tuning.zn_kp_resolution {} below f32 precision at zn_kp_max {}",
                self.zn_kp_resolution, self.zn_kp_max
            ));
        }
        if !(self.zn_step_offset.is_finite() && self.zn_step_offset != 0.0) {
            return fail("tuning.zn_step_offset must be finite and non-zero".to_string());
        }
        if self.zn_min_half_cycles < 2 || self.zn_sustained_half_cycles < self.zn_min_half_cycles
        {
            return fail(format!(
                "tuning.zn half-cycle counts {}/{} invalid",
                self.zn_min_half_cycles, self.zn_sustained_half_cycles
            ));
        }
        if !(self.zn_decay_threshold.is_finite() && self.zn_decay_threshold > 0.0) {
            return fail("tuning.zn_decay_threshold must be > 0".to_string());
        }
        if !(self.zn_ratio_alpha > 0.0 && self.zn_ratio_alpha <= 1.0) {
            return fail("tuning.zn_ratio_alpha out of range (0, 1]".to_string());
        }
        if self.zn_max_ticks == 0 {
            return fail("tuning.zn_max_ticks must be > 0".to_string());
        }
        if self.zn_settle_ticks == 0 {
            return fail("tuning.zn_settle_ticks must be > 0".to_string());
        }
        Ok(())
    }

    #[inline]
    pub fn settle_time(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.settle_time_ms))
    }

    #[inline]
    pub fn update_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_micros(u64::from(self.update_poll_interval_us))
    }
}

// ─── Telemetry ──────────────────────────────────────────────────────

/// Data collection and transmission settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Highest accepted sample rate [Hz].
    pub max_rate_hz: u32,
    /// Transmission poll period while a collection is running [ms].
    pub collecting_poll_ms: u32,
    /// Transmission poll period while idle [ms].
    pub idle_poll_ms: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_rate_hz: 10_000,
            collecting_poll_ms: 10,
            idle_poll_ms: 500,
        }
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rate_hz == 0 {
            return Err(ConfigError::ValidationError(
                "telemetry.max_rate_hz must be > 0".to_string(),
            ));
        }
        if self.collecting_poll_ms == 0 || self.idle_poll_ms == 0 {
            return Err(ConfigError::ValidationError(
                "telemetry poll periods must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Error Monitor ──────────────────────────────────────────────────

/// Runtime position-error monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Weight kept from the previous decayed error each tick (0..1).
    pub error_decay: f32,
    /// Minimum ticks between two stall warnings.
    pub warn_interval_ticks: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            error_decay: 0.99,
            warn_interval_ticks: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.error_decay >= 0.0 && self.error_decay < 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "monitor.error_decay {} out of range [0, 1)",
                self.error_decay
            )));
        }
        Ok(())
    }
}

// ─── Simulation ─────────────────────────────────────────────────────

/// Parameters of the simulated stepper used by the binary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Physical counts per step of the simulated encoder.
    pub counts_per_step: f32,
    /// Coil A wired reversed.
    pub coil_a_reversed: bool,
    /// Coil B wired reversed.
    pub coil_b_reversed: bool,
    /// Rotor time constant [ms] (0 = rotor follows the field instantly).
    pub time_constant_ms: f32,
    /// Microstepping reported by the simulated drive.
    pub microstepping: u16,
    /// Rotor position at power-up [steps].
    pub initial_position_steps: f32,
    /// Raw count reported before any zeroing.
    pub encoder_offset: i32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            counts_per_step: 10.0,
            coil_a_reversed: false,
            coil_b_reversed: true,
            time_constant_ms: 1.0,
            microstepping: 16,
            initial_position_steps: 0.3,
            encoder_offset: 0,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !EncoderConfig::counts_per_step_valid(self.counts_per_step) {
            return Err(ConfigError::ValidationError(
                "simulation.counts_per_step must be finite and non-zero".to_string(),
            ));
        }
        if !(self.time_constant_ms.is_finite() && self.time_constant_ms >= 0.0) {
            return Err(ConfigError::ValidationError(
                "simulation.time_constant_ms must be >= 0".to_string(),
            ));
        }
        if self.microstepping == 0 {
            return Err(ConfigError::ValidationError(
                "simulation.microstepping must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
