//! Configuration loading and the runtime configuration command.
//!
//! Start-up configuration comes from one TOML file. At runtime a
//! [`ConfigCommand`] changes any subset of the encoder, gain and enable
//! settings: every field is validated before anything is applied, so a
//! rejected command leaves the engine untouched.

use std::fmt;
use std::path::Path;

use cl_common::config::{ClosedLoopConfig, ConfigError, ConfigLoader, EncoderConfig, PidParameters};
use cl_common::hal::{DriveMode, EncoderKind};
use cl_common::tuning::TuningError;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::ClosedLoop;
use crate::error::CommandError;

// ─── Loading ────────────────────────────────────────────────────────

/// Load and validate the engine configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ClosedLoopConfig, ConfigError> {
    let config = ClosedLoopConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the engine configuration from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<ClosedLoopConfig, ConfigError> {
    let config: ClosedLoopConfig =
        toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

// ─── Command ────────────────────────────────────────────────────────

/// Runtime configuration change. Absent fields are left as they are; a
/// command with no field set only reports the current settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigCommand {
    pub enabled: Option<bool>,
    /// Raw encoder type code, see [`EncoderKind::from_u8`].
    pub encoder_type: Option<u8>,
    pub counts_per_step: Option<f32>,
    pub kp: Option<f32>,
    pub ki: Option<f32>,
    pub kd: Option<f32>,
    pub hold_current: Option<f32>,
    pub coil_a_polarity: Option<bool>,
    pub coil_b_polarity: Option<bool>,
    /// `[pre_stall, stall]` [steps].
    pub error_thresholds: Option<[f32; 2]>,
}

impl ConfigCommand {
    /// Only a disable, nothing else.
    pub fn is_disable_only(&self) -> bool {
        *self
            == Self {
                enabled: Some(false),
                ..Self::default()
            }
    }

    /// Field-level checks that need no engine state.
    fn validate_fields(&self) -> Result<Option<EncoderKind>, CommandError> {
        let kind = self
            .encoder_type
            .map(|raw| EncoderKind::from_u8(raw).ok_or(CommandError::InvalidEncoderType(raw)))
            .transpose()?;
        if let Some(cps) = self.counts_per_step {
            if !EncoderConfig::counts_per_step_valid(cps) {
                return Err(CommandError::invalid("counts_per_step", cps));
            }
        }
        for (name, value) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if let Some(v) = value {
                if !PidParameters::gain_valid(v) {
                    return Err(CommandError::invalid(name, v));
                }
            }
        }
        if let Some(hold) = self.hold_current {
            if !PidParameters::hold_current_valid(hold) {
                return Err(CommandError::invalid("hold_current", hold));
            }
        }
        if let Some(thresholds) = self.error_thresholds {
            if !thresholds.iter().all(|t| PidParameters::gain_valid(*t)) {
                return Err(CommandError::invalid(
                    "error_thresholds",
                    format!("{thresholds:?}"),
                ));
            }
        }
        Ok(kind)
    }
}

/// Settings after a configuration command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfigReply {
    pub enabled: bool,
    pub encoder: EncoderKind,
    pub counts_per_step: f32,
    pub pid: PidParameters,
    pub tuning_errors: TuningError,
}

impl fmt::Display for ConfigReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "closed loop {}, encoder {} ({} counts/step), kp {} ki {} kd {}, hold current {}, tuning errors: {}",
            if self.enabled { "enabled" } else { "disabled" },
            self.encoder,
            self.counts_per_step,
            self.pid.kp,
            self.pid.ki,
            self.pid.kd,
            self.pid.hold_current,
            self.tuning_errors
        )
    }
}

impl ClosedLoop {
    /// Current settings.
    pub fn config_reply(&self) -> ConfigReply {
        ConfigReply {
            enabled: self.is_enabled(),
            encoder: self.encoder.kind(),
            counts_per_step: self.counts_per_step,
            pid: self.pid,
            tuning_errors: self.errors,
        }
    }

    /// Validate and apply a configuration command.
    ///
    /// Changing the encoder type or scale invalidates every previous
    /// verification. A replacement encoder is built and enabled before
    /// anything else changes, so its failure also rejects the command.
    pub fn configure(&mut self, cmd: &ConfigCommand) -> Result<ConfigReply, CommandError> {
        // ── Validate ────────────────────────────────────────────
        let kind = cmd.validate_fields()?;
        let kind_after = kind.unwrap_or(self.encoder.kind());
        let enabled_after = cmd.enabled.unwrap_or(self.is_enabled());
        if enabled_after && kind_after == EncoderKind::None {
            return Err(CommandError::NoEncoder);
        }
        if cmd.enabled == Some(true) && !self.is_enabled() {
            let mode = self.drive.drive_mode();
            if mode != DriveMode::Direct {
                return Err(CommandError::NotDirectMode(mode));
            }
        }
        let replacement = match kind {
            Some(k) if k != self.encoder.kind() => Some(self.encoder.prepare(k)?),
            _ => None,
        };

        // ── Apply ───────────────────────────────────────────────
        let mut invalidate = false;
        if let Some(encoder) = replacement {
            self.encoder.install(encoder);
            self.shared.set_encoder_kind(self.encoder.kind());
            invalidate = true;
        }
        if let Some(cps) = cmd.counts_per_step {
            if cps != self.counts_per_step {
                info!("Encoder counts per step: {} -> {cps}", self.counts_per_step);
                self.counts_per_step = cps;
                invalidate = true;
            }
        }
        if let Some(kp) = cmd.kp {
            self.pid.kp = kp;
        }
        if let Some(ki) = cmd.ki {
            self.pid.ki = ki;
        }
        if let Some(kd) = cmd.kd {
            self.pid.kd = kd;
        }
        if let Some(hold) = cmd.hold_current {
            self.pid.hold_current = hold;
        }
        if let Some(a) = cmd.coil_a_polarity {
            self.pid.coil_a_polarity = a;
        }
        if let Some(b) = cmd.coil_b_polarity {
            self.pid.coil_b_polarity = b;
        }
        if let Some(thresholds) = cmd.error_thresholds {
            self.pid.error_thresholds = thresholds;
        }
        if invalidate {
            self.errors |= TuningError::UNVERIFIED;
            self.reset_pid();
        }
        if let Some(enabled) = cmd.enabled {
            self.set_enabled(enabled)?;
        }
        Ok(self.config_reply())
    }
}
