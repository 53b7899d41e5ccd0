//! Sample acquisition and telemetry transmission.
//!
//! The [`Sampler`] is shared by the supervisor (rate-0 samples), the tuning
//! task (samples at each maneuver step), the acquisition task (paced
//! samples) and the transmission task (draining). The `collecting` flag is
//! an atomic so the supervisor can skip the lock on the common idle path;
//! everything else sits behind one short-held mutex.

pub mod acquisition;
pub mod buffer;
pub mod transmission;

use std::sync::atomic::{AtomicBool, Ordering};

use cl_common::telemetry::{RecordingMode, SampleFilter, SamplePacket};
use heapless::Vec as HVec;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use self::acquisition::{Acquisition, CollectionRequest, RecordOutcome, SampleClock};
use crate::control::ControlState;
use crate::error::CommandError;

/// Snapshot of the collection state for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CollectionStatus {
    pub collecting: bool,
    pub filter: SampleFilter,
    pub samples_requested: u16,
    pub samples_taken: u16,
    pub samples_sent: u16,
    pub rate_hz: u32,
    pub mode: RecordingMode,
}

#[derive(Debug, Default)]
pub struct Sampler {
    collecting: AtomicBool,
    inner: Mutex<Acquisition>,
}

impl Sampler {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::Acquire)
    }

    /// Sample rate of the running collection if it is paced by the acquisition task.
    pub fn paced_rate_hz(&self) -> Option<u32> {
        if !self.is_collecting() {
            return None;
        }
        let inner = self.inner.lock();
        (inner.rate_hz > 0).then_some(inner.rate_hz)
    }

    /// The running collection has seen its trigger.
    pub fn is_triggered(&self) -> bool {
        self.inner.lock().triggered
    }

    /// Arm a new collection.
    ///
    /// Fails while a collection runs or while samples of the previous batch
    /// are still waiting to be sent.
    pub fn start(&self, request: &CollectionRequest, target: f32) -> Result<(), CommandError> {
        let mut inner = self.inner.lock();
        if self.is_collecting() || !inner.buffer.is_empty() {
            return Err(CommandError::AlreadyCollecting);
        }
        inner.arm(request, target);
        self.collecting.store(true, Ordering::Release);
        info!(
            "Collection started: {} samples of {:#06x} at {} Hz ({:?})",
            request.samples,
            request.filter.bits(),
            request.rate_hz,
            request.mode
        );
        Ok(())
    }

    /// Offer one sample from `clock`.
    ///
    /// On [`RecordOutcome::Completed`] collection has stopped and the caller
    /// wakes transmission.
    pub fn record(&self, state: &ControlState, target: f32, clock: SampleClock) -> RecordOutcome {
        if !self.is_collecting() {
            return RecordOutcome::Skipped;
        }
        let mut inner = self.inner.lock();
        // Re-check under the lock: a concurrent recorder may have completed the batch.
        if !self.is_collecting() {
            return RecordOutcome::Skipped;
        }
        let outcome = inner.record(state, target, clock);
        if outcome == RecordOutcome::Completed {
            self.collecting.store(false, Ordering::Release);
            debug!("Collection complete: {} samples", inner.samples_taken);
        }
        outcome
    }

    /// Next packet ready for transmission.
    ///
    /// While collecting only full packets are released; afterwards the
    /// remainder is flushed and the final packet carries `last_packet`.
    pub fn next_packet(&self) -> Option<SamplePacket> {
        let mut inner = self.inner.lock();
        let collecting = self.is_collecting();
        let per_packet = SamplePacket::samples_per_packet(inner.filter);
        let available = usize::from(inner.samples_taken - inner.samples_sent);
        if per_packet == 0 || available == 0 || (collecting && available < per_packet) {
            return None;
        }

        let count = available.min(per_packet);
        let width = inner.filter.variable_count();
        let mut data = HVec::new();
        inner.buffer.drain_into(count * width, &mut data);

        let first_sample_index = inner.samples_sent;
        // `count` is bounded by samples_per_packet, at most MAX_PACKET_FLOATS.
        inner.samples_sent += count as u16;
        let last_packet = !collecting && inner.samples_sent == inner.samples_taken;
        Some(SamplePacket {
            first_sample_index,
            sample_count: count as u8,
            filter: inner.filter,
            last_packet,
            data,
        })
    }

    /// Release the buffer once the last packet has been handed off.
    pub fn finish_batch(&self) {
        let mut inner = self.inner.lock();
        inner.buffer.reset();
        info!("Collection sent: {} samples", inner.samples_sent);
    }

    /// Drop the running collection and any unsent samples.
    pub fn abandon(&self) {
        let mut inner = self.inner.lock();
        self.collecting.store(false, Ordering::Release);
        inner.buffer.reset();
        inner.samples_sent = inner.samples_taken;
    }

    pub fn status(&self) -> CollectionStatus {
        let inner = self.inner.lock();
        CollectionStatus {
            collecting: self.is_collecting(),
            filter: inner.filter,
            samples_requested: inner.samples_requested,
            samples_taken: inner.samples_taken,
            samples_sent: inner.samples_sent,
            rate_hz: inner.rate_hz,
            mode: inner.mode,
        }
    }

    /// Read and write cursors of the sample buffer.
    pub fn cursors(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.buffer.read_cursor(), inner.buffer.write_cursor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(filter: SampleFilter, samples: u16) -> CollectionRequest {
        CollectionRequest {
            filter,
            samples,
            rate_hz: 0,
            mode: RecordingMode::Immediate,
            maneuver: None,
        }
    }

    fn state(raw: i32) -> ControlState {
        ControlState {
            raw_position: raw,
            current_steps: raw as f32 / 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn only_full_packets_while_collecting() {
        let sampler = Sampler::new();
        // 2 variables -> 7 samples per packet.
        let filter = SampleFilter::RAW_POSITION | SampleFilter::CURRENT_STEPS;
        sampler.start(&request(filter, 10), 0.0).unwrap();

        for raw in 0..6 {
            sampler.record(&state(raw), 0.0, SampleClock::ControlTick);
        }
        assert!(sampler.next_packet().is_none());

        sampler.record(&state(6), 0.0, SampleClock::ControlTick);
        let first = sampler.next_packet().unwrap();
        assert_eq!(first.first_sample_index, 0);
        assert_eq!(first.sample_count, 7);
        assert!(!first.last_packet);
        assert_eq!(&first.data[..4], &[0.0, 0.0, 1.0, 0.5]);

        for raw in 7..10 {
            sampler.record(&state(raw), 0.0, SampleClock::ControlTick);
        }
        assert!(!sampler.is_collecting());
        let last = sampler.next_packet().unwrap();
        assert_eq!(last.first_sample_index, 7);
        assert_eq!(last.sample_count, 3);
        assert!(last.last_packet);
        assert!(sampler.next_packet().is_none());
    }

    #[test]
    fn cursors_reset_only_after_finish() {
        let sampler = Sampler::new();
        sampler.start(&request(SampleFilter::RAW_POSITION, 3), 0.0).unwrap();
        for raw in 0..3 {
            sampler.record(&state(raw), 0.0, SampleClock::ControlTick);
        }
        assert_eq!(sampler.cursors(), (0, 3));

        // Samples not yet sent block a new collection.
        assert_eq!(
            sampler.start(&request(SampleFilter::RAW_POSITION, 3), 0.0),
            Err(CommandError::AlreadyCollecting)
        );

        let packet = sampler.next_packet().unwrap();
        assert!(packet.last_packet);
        assert_eq!(sampler.cursors(), (3, 3));
        sampler.finish_batch();
        assert_eq!(sampler.cursors(), (0, 0));
        assert!(sampler.start(&request(SampleFilter::RAW_POSITION, 3), 0.0).is_ok());
    }

    #[test]
    fn abandon_discards_batch() {
        let sampler = Sampler::new();
        sampler.start(&request(SampleFilter::RAW_POSITION, 30), 0.0).unwrap();
        sampler.record(&state(1), 0.0, SampleClock::ControlTick);
        sampler.abandon();
        assert!(!sampler.is_collecting());
        assert!(sampler.next_packet().is_none());
        assert_eq!(sampler.cursors(), (0, 0));
    }

    #[test]
    fn not_collecting_records_nothing() {
        let sampler = Sampler::new();
        assert_eq!(
            sampler.record(&state(1), 0.0, SampleClock::ControlTick),
            RecordOutcome::Skipped
        );
        let status = sampler.status();
        assert!(!status.collecting);
        assert_eq!(status.samples_taken, 0);
    }
}
