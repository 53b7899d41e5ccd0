//! Tuning request and tuning error bitflags.
//!
//! `TuningRequest` is the transient "still to do" set of maneuvers.
//! `TuningError` is the persistent record of checks that were never
//! verified or were verified and failed. Bits of the latter are cleared
//! one by one, only when the corresponding maneuver completes successfully.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::consts::MANEUVER_COUNT;

bitflags! {
    /// Pending tuning maneuvers.
    ///
    /// Bit position is the maneuver index used by the data-collection command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TuningRequest: u8 {
        /// Drive to electrical phase 0 and define it as encoder zero.
        const ZERO                   = 0x01;
        /// Find the coil polarity combination that tracks the commanded phase.
        const DETECT_POLARITY        = 0x02;
        /// Verify the configured polarity over one electrical cycle.
        const CHECK_POLARITY         = 0x04;
        /// Verify closed-loop control behaviour.
        const CHECK_CONTROL          = 0x08;
        /// Verify the configured encoder counts per step.
        const CHECK_ENCODER_STEPS    = 0x10;
        /// Rotate the commanded phase continuously (data collection).
        const CONTINUOUS_PHASE_SWEEP = 0x20;
        /// Step the target and let the loop respond (data collection).
        const STEP_RESPONSE          = 0x40;
        /// Ziegler–Nichols ultimate gain search.
        const ZIEGLER_NICHOLS        = 0x80;
    }
}

impl TuningRequest {
    /// Execution order when several maneuvers are pending.
    pub const PRIORITY: [Self; MANEUVER_COUNT as usize] = [
        Self::DETECT_POLARITY,
        Self::ZERO,
        Self::CHECK_POLARITY,
        Self::CHECK_CONTROL,
        Self::CHECK_ENCODER_STEPS,
        Self::CONTINUOUS_PHASE_SWEEP,
        Self::STEP_RESPONSE,
        Self::ZIEGLER_NICHOLS,
    ];

    /// Maneuvers that establish a verified closed-loop setup.
    pub const BASIC: Self = Self::from_bits_truncate(
        Self::DETECT_POLARITY.bits()
            | Self::ZERO.bits()
            | Self::CHECK_POLARITY.bits()
            | Self::CHECK_CONTROL.bits()
            | Self::CHECK_ENCODER_STEPS.bits(),
    );

    /// Single maneuver for a data-collection maneuver index (0..=7).
    #[inline]
    pub const fn from_index(index: u8) -> Option<Self> {
        if index < MANEUVER_COUNT {
            Some(Self::from_bits_truncate(1 << index))
        } else {
            None
        }
    }

    /// Short name of a single maneuver flag.
    pub fn name(self) -> &'static str {
        match self {
            Self::ZERO => "zeroing",
            Self::DETECT_POLARITY => "polarity detection",
            Self::CHECK_POLARITY => "polarity check",
            Self::CHECK_CONTROL => "control check",
            Self::CHECK_ENCODER_STEPS => "encoder steps check",
            Self::CONTINUOUS_PHASE_SWEEP => "continuous phase sweep",
            Self::STEP_RESPONSE => "step response",
            Self::ZIEGLER_NICHOLS => "Ziegler-Nichols search",
            _ => "combined maneuvers",
        }
    }
}

impl Default for TuningRequest {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Unverified or failed tuning checks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TuningError: u16 {
        /// Polarity detection has not run since the last reset.
        const NEEDS_POLARITY_DETECTION   = 0x0001;
        /// Encoder has not been zeroed since the last reset.
        const NEEDS_ZEROING              = 0x0002;
        /// Polarity has not been checked.
        const NEEDS_POLARITY_CHECK       = 0x0004;
        /// Control has not been checked.
        const NEEDS_CONTROL_CHECK        = 0x0008;
        /// Encoder counts per step have not been checked.
        const NEEDS_ENCODER_STEPS_CHECK  = 0x0010;
        /// Polarity check ran and failed.
        const POLARITY_CHECK_FAILED      = 0x0020;
        /// Control check ran and failed.
        const CONTROL_CHECK_FAILED       = 0x0040;
        /// Encoder steps check ran and failed.
        const ENCODER_STEPS_CHECK_FAILED = 0x0080;
        /// A maneuver aborted on a system-level fault.
        const SYSTEM_ERROR               = 0x0100;
    }
}

impl TuningError {
    /// "Never verified" bits set on fresh enable or encoder change.
    pub const UNVERIFIED: Self = Self::from_bits_truncate(
        Self::NEEDS_POLARITY_DETECTION.bits()
            | Self::NEEDS_ZEROING.bits()
            | Self::NEEDS_POLARITY_CHECK.bits()
            | Self::NEEDS_CONTROL_CHECK.bits()
            | Self::NEEDS_ENCODER_STEPS_CHECK.bits(),
    );

    /// "Verified and failed" bits.
    pub const FAILED: Self = Self::from_bits_truncate(
        Self::POLARITY_CHECK_FAILED.bits()
            | Self::CONTROL_CHECK_FAILED.bits()
            | Self::ENCODER_STEPS_CHECK_FAILED.bits(),
    );

    /// Description of a single error flag.
    pub fn describe(self) -> &'static str {
        match self {
            Self::NEEDS_POLARITY_DETECTION => "polarity not detected",
            Self::NEEDS_ZEROING => "encoder not zeroed",
            Self::NEEDS_POLARITY_CHECK => "polarity not checked",
            Self::NEEDS_CONTROL_CHECK => "control not checked",
            Self::NEEDS_ENCODER_STEPS_CHECK => "encoder steps not checked",
            Self::POLARITY_CHECK_FAILED => "polarity check failed",
            Self::CONTROL_CHECK_FAILED => "control check failed",
            Self::ENCODER_STEPS_CHECK_FAILED => "encoder steps check failed",
            Self::SYSTEM_ERROR => "system error during tuning",
            _ => "multiple tuning errors",
        }
    }
}

impl Default for TuningError {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for TuningError {
    /// Comma-separated enumeration of the unmet checks.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (i, flag) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(flag.describe())?;
        }
        Ok(())
    }
}
