//! # Closed-Loop Stepper Control Engine
//!
//! Turns encoder readings into phase-accurate coil currents so that a
//! stepper motor tracks its target like a servo, and carries the on-line
//! self-tuning and telemetry facility around that loop.
//!
//! ## Units of Execution
//!
//! 1. **Supervisor** - one call per control tick from the [`cycle::TickRunner`];
//!    runs a PID iteration or wakes the tuning task, never blocks
//! 2. **Tuning task** - holds the engine for a whole tuning run
//! 3. **Acquisition task** - paced sampling at a fixed rate
//! 4. **Transmission task** - packs the sample buffer into packets
//!
//! The engine ([`engine::ClosedLoop`]) lives behind one mutex. Everything
//! the other units need without that lock is in [`shared::SharedState`].
//!
//! ## Hardware
//!
//! Encoders, the motor driver and the blocking delay are capability traits
//! from `cl_common::hal`. [`sim::SimulatedStepper`] implements all of them
//! over a synthetic plant.

pub mod config;
pub mod control;
pub mod cycle;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod motion;
pub mod runtime;
pub mod sampling;
pub mod shared;
pub mod signal;
pub mod sim;
pub mod supervisor;
pub mod tuning;

pub use engine::{ClosedLoop, Hardware};
pub use error::{CommandError, ManeuverFault, RuntimeError};
pub use runtime::ClosedLoopRuntime;
