//! Prelude module for common re-exports.
//!
//! ```rust
//! use cl_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ClosedLoopConfig, ConfigError, ConfigLoader, EncoderConfig, LogLevel, MonitorConfig,
    PidParameters, SimulationConfig, TelemetryConfig, TuningParameters,
};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{
    CURRENT_SCALE, INTEGRAL_CEILING, MAX_PACKET_FLOATS, PHASE_PERIOD, PHASE_SHIFT_MAX,
    SAMPLE_BUFFER_CAPACITY, SIGNAL_MAX, STEPS_PER_PHASE_PERIOD,
};

// ─── Hardware Capabilities ──────────────────────────────────────────
pub use crate::hal::{
    Delay, Drive, DriveMode, Encoder, EncoderFactory, EncoderKind, HardwareError, ThreadDelay,
};

// ─── Tuning / Telemetry ─────────────────────────────────────────────
pub use crate::telemetry::{RecordingMode, SampleFilter, SamplePacket, SampleVariable};
pub use crate::tuning::{TuningError, TuningRequest};
