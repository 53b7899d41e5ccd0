//! Sample acquisition: collection requests, per-sample recording and the
//! paced acquisition task.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use cl_common::consts::{MANEUVER_COUNT, SAMPLE_BUFFER_CAPACITY, SAMPLE_VARIABLE_COUNT};
use cl_common::telemetry::{RecordingMode, SampleFilter};
use cl_common::tuning::TuningRequest;
use heapless::Vec as HVec;
use tracing::{debug, info};

use super::buffer::SampleBuffer;
use crate::control::ControlState;
use crate::error::CommandError;
use crate::shared::SharedState;

/// Poll period of a paced collection still waiting for the first move.
const ARMED_POLL: Duration = Duration::from_millis(10);

/// Parameters of one data collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectionRequest {
    pub filter: SampleFilter,
    pub samples: u16,
    /// Sample rate [Hz], 0 = once per control tick.
    pub rate_hz: u32,
    pub mode: RecordingMode,
    /// Tuning maneuver (request bit index) to run while recording.
    pub maneuver: Option<u8>,
}

impl CollectionRequest {
    /// Check the request on its own, independent of engine state.
    ///
    /// Returns the maneuver request bit to raise, if any.
    pub fn validate(&self, max_rate_hz: u32) -> Result<Option<TuningRequest>, CommandError> {
        if self.filter.is_empty() {
            return Err(CommandError::invalid("filter", self.filter.bits()));
        }
        if self.samples == 0 {
            return Err(CommandError::invalid("samples", self.samples));
        }
        check_capacity(self.filter, self.samples)?;
        if self.rate_hz > max_rate_hz {
            return Err(CommandError::invalid("rate_hz", self.rate_hz));
        }
        match self.maneuver {
            None => Ok(None),
            Some(index) if index < MANEUVER_COUNT => Ok(TuningRequest::from_index(index)),
            Some(index) => Err(CommandError::InvalidManeuver(index)),
        }
    }
}

/// `samples × variables` must fit into the sample buffer.
pub fn check_capacity(filter: SampleFilter, samples: u16) -> Result<(), CommandError> {
    let variables = filter.variable_count();
    if usize::from(samples) * variables > SAMPLE_BUFFER_CAPACITY {
        return Err(CommandError::CapacityExceeded {
            samples,
            variables,
            capacity: SAMPLE_BUFFER_CAPACITY,
        });
    }
    Ok(())
}

/// Which execution context offers a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleClock {
    /// Supervisor tick or tuning maneuver step (rate 0 collections).
    ControlTick,
    /// Acquisition task timer (paced collections).
    Timer,
}

/// Result of offering one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Not collecting, wrong clock, or still waiting for the first move.
    Skipped,
    Recorded,
    /// This sample completed the batch.
    Completed,
}

/// Collection parameters and progress, guarded by the sampler lock.
#[derive(Debug, Default)]
pub(crate) struct Acquisition {
    pub buffer: SampleBuffer,
    pub filter: SampleFilter,
    pub samples_requested: u16,
    pub samples_taken: u16,
    /// Samples already handed to the sink.
    pub samples_sent: u16,
    pub mode: RecordingMode,
    pub rate_hz: u32,
    pub armed_target: f32,
    pub triggered: bool,
}

impl Acquisition {
    pub fn arm(&mut self, request: &CollectionRequest, target: f32) {
        self.buffer.reset();
        self.filter = request.filter;
        self.samples_requested = request.samples;
        self.samples_taken = 0;
        self.samples_sent = 0;
        self.mode = request.mode;
        self.rate_hz = request.rate_hz;
        self.armed_target = target;
        self.triggered = request.mode == RecordingMode::Immediate;
    }

    pub fn record(&mut self, state: &ControlState, target: f32, clock: SampleClock) -> RecordOutcome {
        let paced = self.rate_hz > 0;
        if paced != (clock == SampleClock::Timer) {
            return RecordOutcome::Skipped;
        }
        if !self.triggered {
            if target == self.armed_target {
                return RecordOutcome::Skipped;
            }
            debug!("Collection triggered by target move to {target}");
            self.triggered = true;
        }
        if self.samples_taken >= self.samples_requested {
            return RecordOutcome::Skipped;
        }

        // The target is sampled live, the snapshot may predate the last move.
        let state = ControlState {
            target_steps: target,
            ..*state
        };
        let mut sample: HVec<f32, SAMPLE_VARIABLE_COUNT> = HVec::new();
        for var in self.filter.variables() {
            // At most SAMPLE_VARIABLE_COUNT variables exist.
            let _ = sample.push(state.value(var));
        }
        if !self.buffer.push(&sample) {
            return RecordOutcome::Skipped;
        }
        self.samples_taken += 1;
        if self.samples_taken == self.samples_requested {
            RecordOutcome::Completed
        } else {
            RecordOutcome::Recorded
        }
    }
}

/// Acquisition task body: records paced collections at their sample rate.
///
/// Sleeps on `acquire_wake` while no paced collection runs.
pub(crate) fn acquisition_task(shared: Arc<SharedState>) {
    info!("Acquisition task started");
    while shared.running.load(Ordering::Acquire) {
        let rate_hz = shared.sampler.paced_rate_hz();
        let Some(rate_hz) = rate_hz else {
            shared.acquire_wake.take(Some(Duration::from_millis(100)));
            continue;
        };

        let period = Duration::from_secs_f64(1.0 / f64::from(rate_hz));
        let mut deadline = Instant::now();
        loop {
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            let state = shared.snapshot();
            match shared.record_sample(&state, SampleClock::Timer) {
                RecordOutcome::Completed => break,
                RecordOutcome::Skipped if !shared.sampler.is_collecting() => break,
                RecordOutcome::Skipped if !shared.sampler.is_triggered() => {
                    deadline = Instant::now() + ARMED_POLL;
                }
                _ => deadline += period,
            }
            let now = Instant::now();
            if deadline > now {
                // An early wake only happens on shutdown or a new collection.
                shared.acquire_wake.take(Some(deadline - now));
            } else {
                deadline = now;
            }
        }
    }
    info!("Acquisition task stopped");
}
