//! Hardware capability traits consumed by the closed-loop engine.
//!
//! The engine never talks to a sensor or driver chip directly. Position
//! sensors, the motor driver and the blocking delay used by tuning
//! maneuvers are injected as trait objects:
//!
//! - [`Encoder`] - position source
//! - [`EncoderFactory`] - constructs the encoder for a given [`EncoderKind`]
//! - [`Drive`] - coil current sink
//! - [`Delay`] - bounded suspension used between phase commands

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Encoder ────────────────────────────────────────────────────────

/// Encoder variant attached to the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum EncoderKind {
    /// No encoder fitted.
    #[default]
    None = 0,
    /// Linear quadrature encoder.
    LinearQuadrature = 1,
    /// Rotary quadrature encoder.
    RotaryQuadrature = 2,
    /// AS5047 absolute SPI encoder.
    As5047 = 3,
    /// TLI5012 absolute SPI encoder.
    Tli5012 = 4,
}

impl EncoderKind {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::LinearQuadrature),
            2 => Some(Self::RotaryQuadrature),
            3 => Some(Self::As5047),
            4 => Some(Self::Tli5012),
            _ => None,
        }
    }

    /// Human-readable name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LinearQuadrature => "linear quadrature",
            Self::RotaryQuadrature => "rotary quadrature",
            Self::As5047 => "AS5047",
            Self::Tli5012 => "TLI5012",
        }
    }

    /// Absolute encoders keep their reading across power cycles.
    #[inline]
    pub const fn is_absolute(&self) -> bool {
        matches!(self, Self::As5047 | Self::Tli5012)
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a hardware capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    /// Encoder could not be enabled.
    #[error("encoder enable failed: {0}")]
    EncoderEnable(String),

    /// No driver exists for the requested encoder variant.
    #[error("no driver for encoder type {0}")]
    UnsupportedEncoder(EncoderKind),
}

/// Position sensor.
pub trait Encoder: Send {
    /// Variant of this encoder.
    fn kind(&self) -> EncoderKind;

    /// Power up / start the sensor.
    fn enable(&mut self) -> Result<(), HardwareError>;

    /// Current reading in encoder counts, relative to the zero offset.
    fn read(&mut self) -> i32;

    /// Define the position that currently reads `count` as the new zero:
    /// subsequent readings are shifted by `-count`.
    fn set_zero_offset(&mut self, count: i32);
}

/// Constructs encoder instances. Owned by the engine so that an encoder
/// change can drop the old instance and build the new one in place.
pub trait EncoderFactory: Send {
    /// Build the encoder for `kind` (never called with [`EncoderKind::None`]).
    fn create(&mut self, kind: EncoderKind) -> Result<Box<dyn Encoder>, HardwareError>;
}

// ─── Drive ──────────────────────────────────────────────────────────

/// Chopper / drive mode reported by the motor driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum DriveMode {
    /// Coil currents written directly by the controller (closed loop).
    #[default]
    Direct = 0,
    /// Driver-internal stealthChop / voltage mode.
    StealthChop = 1,
    /// Driver-internal spreadCycle / current mode.
    SpreadCycle = 2,
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::StealthChop => "stealthChop",
            Self::SpreadCycle => "spreadCycle",
        })
    }
}

/// Motor driver in direct coil-current mode.
pub trait Drive: Send {
    /// Write both coil currents (register units, ±[`crate::consts::CURRENT_SCALE`]).
    fn set_phase_currents(&mut self, coil_a: i16, coil_b: i16);

    /// True while the last written currents have not reached the chip.
    fn update_pending(&mut self) -> bool;

    /// Configured microstepping (microsteps per full step).
    fn microstepping(&self) -> u16;

    /// Current drive mode.
    fn drive_mode(&self) -> DriveMode;

    /// Force the drive enabled regardless of the motion layer's enable state.
    fn force_enabled(&mut self, enabled: bool);
}

// ─── Delay ──────────────────────────────────────────────────────────

/// Bounded blocking delay, the only suspension point of a tuning maneuver.
pub trait Delay: Send {
    fn delay(&mut self, duration: Duration);
}

/// [`Delay`] backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    #[inline]
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
