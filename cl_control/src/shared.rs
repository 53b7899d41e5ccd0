//! State shared between the supervisor, the runtime tasks and the command
//! surface without taking the engine lock.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use cl_common::hal::EncoderKind;
use parking_lot::Mutex;

use crate::control::ControlState;
use crate::motion::MotionTarget;
use crate::sampling::Sampler;
use crate::sampling::acquisition::{RecordOutcome, SampleClock};
use crate::signal::Signal;

#[derive(Debug)]
pub struct SharedState {
    /// Closed-loop mode enabled.
    pub enabled: AtomicBool,
    /// Runtime tasks keep running while set.
    pub running: AtomicBool,
    /// The tuning task holds the engine for a run.
    pub tuning_active: AtomicBool,
    encoder_kind: AtomicU8,
    pub target: MotionTarget,
    pub sampler: Sampler,
    snapshot: Mutex<ControlState>,
    pub tuning_wake: Signal,
    pub tuning_done: Signal,
    pub acquire_wake: Signal,
    pub transmit_wake: Signal,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            running: AtomicBool::new(true),
            tuning_active: AtomicBool::new(false),
            encoder_kind: AtomicU8::new(EncoderKind::None as u8),
            target: MotionTarget::new(),
            sampler: Sampler::new(),
            snapshot: Mutex::new(ControlState::default()),
            tuning_wake: Signal::new(),
            tuning_done: Signal::new(),
            acquire_wake: Signal::new(),
            transmit_wake: Signal::new(),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_tuning(&self) -> bool {
        self.tuning_active.load(Ordering::Acquire)
    }

    #[inline]
    pub fn encoder_kind(&self) -> EncoderKind {
        EncoderKind::from_u8(self.encoder_kind.load(Ordering::Acquire)).unwrap_or_default()
    }

    #[inline]
    pub(crate) fn set_encoder_kind(&self, kind: EncoderKind) {
        self.encoder_kind.store(kind as u8, Ordering::Release);
    }

    /// Publish a copy of the engine state.
    #[inline]
    pub fn publish(&self, state: &ControlState) {
        *self.snapshot.lock() = *state;
    }

    /// Latest published engine state.
    #[inline]
    pub fn snapshot(&self) -> ControlState {
        *self.snapshot.lock()
    }

    /// Offer `state` to a running collection; wakes transmission when the
    /// batch completes.
    pub fn record_sample(&self, state: &ControlState, clock: SampleClock) -> RecordOutcome {
        if !self.sampler.is_collecting() {
            return RecordOutcome::Skipped;
        }
        let outcome = self.sampler.record(state, self.target.get(), clock);
        if outcome == RecordOutcome::Completed {
            self.transmit_wake.give();
        }
        outcome
    }

    /// Stop all runtime tasks.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.tuning_wake.give();
        self.acquire_wake.give();
        self.transmit_wake.give();
    }
}
