//! System-wide constants for the closed-loop engine.
//!
//! Single source of truth for the fixed numeric domain of the commutation
//! loop, the telemetry buffer and the packet payload. Imported by all crates.

use static_assertions::const_assert;

/// One electrical cycle of the motor in phase units.
pub const PHASE_PERIOD: u16 = 4096;

/// Full steps covered by one electrical cycle (two-phase hybrid stepper).
pub const STEPS_PER_PHASE_PERIOD: f32 = 4.0;

/// Maximum commanded phase lead/lag, a quarter of one electrical cycle.
pub const PHASE_SHIFT_MAX: i16 = (PHASE_PERIOD / 4) as i16;

/// Symmetric limit of the PID control signal.
pub const SIGNAL_MAX: f32 = 255.0;

/// Anti-windup ceiling on the integral accumulator.
pub const INTEGRAL_CEILING: f32 = 255.0;

/// Full-scale coil current in drive register units (9-bit signed register).
pub const CURRENT_SCALE: f32 = 255.0;

/// Number of named variables a sample can carry.
pub const SAMPLE_VARIABLE_COUNT: usize = 13;

/// Sample buffer capacity in floats (50 samples of 12 variables).
pub const SAMPLE_BUFFER_CAPACITY: usize = 50 * 12;

/// Usable telemetry payload per packet [bytes].
pub const MAX_PACKET_PAYLOAD_BYTES: usize = 56;

/// Floats that fit into one telemetry packet.
pub const MAX_PACKET_FLOATS: usize = MAX_PACKET_PAYLOAD_BYTES / core::mem::size_of::<f32>();

/// Default control tick period in microseconds (1 kHz).
pub const DEFAULT_TICK_PERIOD_US: u32 = 1000;

/// Allowed tick period range [µs].
pub const TICK_PERIOD_US_MIN: u32 = 50;
pub const TICK_PERIOD_US_MAX: u32 = 100_000;

/// Number of distinct tuning maneuvers (request bit count).
pub const MANEUVER_COUNT: u8 = 8;

const_assert!(SAMPLE_VARIABLE_COUNT <= 16);
const_assert!(MAX_PACKET_FLOATS >= SAMPLE_VARIABLE_COUNT);
const_assert!(SAMPLE_BUFFER_CAPACITY <= u16::MAX as usize);
const_assert!(PHASE_PERIOD.is_power_of_two());
