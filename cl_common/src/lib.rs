//! Closed-Loop Common Library
//!
//! Shared constants, configuration loading and capability traits for the
//! closed-loop stepper engine.
//!
//! # Module Structure
//!
//! - [`consts`] - Fixed numeric domain (phase period, signal range, buffer sizes)
//! - [`config`] - TOML configuration types and the `ConfigLoader` trait
//! - [`hal`] - Encoder, drive and delay capability traits
//! - [`tuning`] - Tuning request and tuning error bitflags
//! - [`telemetry`] - Sample variables, filter mask and packet format
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use cl_common::prelude::*;
//!
//! let filter = SampleFilter::RAW_POSITION | SampleFilter::COIL_A;
//! assert_eq!(filter.variable_count(), 2);
//! ```

pub mod config;
pub mod consts;
pub mod hal;
pub mod prelude;
pub mod telemetry;
pub mod tuning;
