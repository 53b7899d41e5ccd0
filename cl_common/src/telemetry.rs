//! Telemetry sample description and packet format.
//!
//! A sample is one float per variable selected by a [`SampleFilter`], laid
//! out in the canonical order of [`SampleVariable::ALL`]. Packets carry as
//! many complete samples as fit into [`MAX_PACKET_FLOATS`].

use std::fmt;

use bitflags::bitflags;
use heapless::Vec as HVec;
use serde::{Deserialize, Serialize};

use crate::consts::{MAX_PACKET_FLOATS, SAMPLE_VARIABLE_COUNT};

// ─── Variables ──────────────────────────────────────────────────────

/// Variable that can be captured into a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SampleVariable {
    RawPosition = 0,
    CurrentSteps = 1,
    TargetSteps = 2,
    StepPhase = 3,
    ControlSignal = 4,
    PTerm = 5,
    ITerm = 6,
    DTerm = 7,
    PhaseShift = 8,
    DesiredPhase = 9,
    CoilA = 10,
    CoilB = 11,
    CurrentError = 12,
}

impl SampleVariable {
    /// Canonical sample layout order.
    pub const ALL: [Self; SAMPLE_VARIABLE_COUNT] = [
        Self::RawPosition,
        Self::CurrentSteps,
        Self::TargetSteps,
        Self::StepPhase,
        Self::ControlSignal,
        Self::PTerm,
        Self::ITerm,
        Self::DTerm,
        Self::PhaseShift,
        Self::DesiredPhase,
        Self::CoilA,
        Self::CoilB,
        Self::CurrentError,
    ];

    /// Filter bit selecting this variable.
    #[inline]
    pub const fn flag(self) -> SampleFilter {
        SampleFilter::from_bits_truncate(1 << self as u16)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RawPosition => "raw_position",
            Self::CurrentSteps => "current_steps",
            Self::TargetSteps => "target_steps",
            Self::StepPhase => "step_phase",
            Self::ControlSignal => "control_signal",
            Self::PTerm => "p_term",
            Self::ITerm => "i_term",
            Self::DTerm => "d_term",
            Self::PhaseShift => "phase_shift",
            Self::DesiredPhase => "desired_phase",
            Self::CoilA => "coil_a",
            Self::CoilB => "coil_b",
            Self::CurrentError => "current_error",
        }
    }
}

impl fmt::Display for SampleVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Ordered set of variables captured into each sample.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SampleFilter: u16 {
        const RAW_POSITION   = 1 << 0;
        const CURRENT_STEPS  = 1 << 1;
        const TARGET_STEPS   = 1 << 2;
        const STEP_PHASE     = 1 << 3;
        const CONTROL_SIGNAL = 1 << 4;
        const P_TERM         = 1 << 5;
        const I_TERM         = 1 << 6;
        const D_TERM         = 1 << 7;
        const PHASE_SHIFT    = 1 << 8;
        const DESIRED_PHASE  = 1 << 9;
        const COIL_A         = 1 << 10;
        const COIL_B         = 1 << 11;
        const CURRENT_ERROR  = 1 << 12;
    }
}

impl SampleFilter {
    /// Selected variables in canonical order.
    pub fn variables(self) -> impl Iterator<Item = SampleVariable> {
        SampleVariable::ALL
            .into_iter()
            .filter(move |v| self.contains(v.flag()))
    }

    /// Floats per sample.
    #[inline]
    pub const fn variable_count(self) -> usize {
        self.bits().count_ones() as usize
    }
}

impl Default for SampleFilter {
    fn default() -> Self {
        Self::empty()
    }
}

/// When a collection starts producing samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum RecordingMode {
    /// Start sampling straight away.
    #[default]
    Immediate = 0,
    /// Wait until the target position changes.
    OnNextMove = 1,
}

impl RecordingMode {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Immediate),
            1 => Some(Self::OnNextMove),
            _ => None,
        }
    }
}

// ─── Packet ─────────────────────────────────────────────────────────

/// One outbound telemetry packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePacket {
    /// Index of the first sample carried, counted from the start of the batch.
    pub first_sample_index: u16,
    /// Complete samples carried.
    pub sample_count: u8,
    pub filter: SampleFilter,
    /// Final packet of the batch.
    pub last_packet: bool,
    pub data: HVec<f32, MAX_PACKET_FLOATS>,
}

impl SamplePacket {
    /// Samples that fit into one packet for `filter` (0 for an empty filter).
    #[inline]
    pub const fn samples_per_packet(filter: SampleFilter) -> usize {
        let n = filter.variable_count();
        if n == 0 { 0 } else { MAX_PACKET_FLOATS / n }
    }

    /// Payload size in bytes.
    #[inline]
    pub fn payload_bytes(&self) -> usize {
        self.data.len() * core::mem::size_of::<f32>()
    }
}
