//! Error types of the closed-loop engine.
//!
//! - [`CommandError`] - synchronous rejection at the command boundary, no state mutated
//! - [`ManeuverFault`] - system-level fault inside a tuning maneuver, aborts the
//!   whole pending request and raises `TuningError::SYSTEM_ERROR`
//! - [`RuntimeError`] - failure to bring up the runtime tasks

use cl_common::config::ConfigError;
use cl_common::hal::{DriveMode, HardwareError};
use thiserror::Error;

/// Rejected configuration, tuning or data-collection command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// Parameter value out of range.
    #[error("invalid value {value} for {name}")]
    InvalidParameter { name: &'static str, value: String },

    /// Encoder type code does not name a known encoder.
    #[error("encoder type {0} out of range")]
    InvalidEncoderType(u8),

    /// Closed-loop operation requested without an encoder.
    #[error("no encoder configured for closed loop mode")]
    NoEncoder,

    /// Drive is not in direct coil-current mode.
    #[error("drive is in {0} mode, closed loop requires direct mode")]
    NotDirectMode(DriveMode),

    /// A data collection is running or its samples have not been sent yet.
    #[error("drive is already collecting data")]
    AlreadyCollecting,

    /// Requested samples do not fit into the sample buffer.
    #[error("{samples} samples of {variables} variables exceed buffer capacity of {capacity} values")]
    CapacityExceeded {
        samples: u16,
        variables: usize,
        capacity: usize,
    },

    /// Maneuver index outside the known maneuvers.
    #[error("maneuver index {0} out of range")]
    InvalidManeuver(u8),

    /// The engine is held by a running tuning maneuver.
    #[error("closed loop engine busy")]
    Busy,

    /// Encoder construction or enable failed.
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// Runtime tasks are stopping.
    #[error("closed loop runtime is shutting down")]
    ShuttingDown,
}

impl CommandError {
    pub(crate) fn invalid(name: &'static str, value: impl ToString) -> Self {
        Self::InvalidParameter {
            name,
            value: value.to_string(),
        }
    }
}

/// System-level fault detected while a maneuver runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ManeuverFault {
    /// No encoder attached.
    #[error("no encoder attached")]
    NoEncoder,

    /// Drive left direct mode.
    #[error("drive switched to {0} mode")]
    NotDirectMode(DriveMode),

    /// The drive never accepted the commanded currents.
    #[error("drive update still pending after {polls} polls")]
    DriveUnresponsive { polls: u32 },
}

/// Runtime start-up failure.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error("failed to spawn {task} task: {source}")]
    Spawn {
        task: &'static str,
        source: std::io::Error,
    },
}
