//! Telemetry transmission: drains finished samples into packets and hands
//! them to a [`TelemetrySink`].

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use cl_common::config::TelemetryConfig;
use cl_common::telemetry::SamplePacket;
use thiserror::Error;
use tracing::{info, trace, warn};

use super::Sampler;
use crate::shared::SharedState;

/// Transport failure while sending a packet.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("telemetry transport closed")]
    Closed,

    #[error("telemetry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("telemetry encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound packet transport.
pub trait TelemetrySink: Send {
    fn send(&mut self, packet: &SamplePacket) -> Result<(), SinkError>;
}

/// Writes each packet as one JSON line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesSink<W> {
    fn send(&mut self, packet: &SamplePacket) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, packet)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Send every packet that is ready.
///
/// Returns the number of packets sent. A sink failure abandons the batch.
pub fn transmit_pending(sampler: &Sampler, sink: &mut dyn TelemetrySink) -> Result<usize, SinkError> {
    let mut sent = 0;
    while let Some(packet) = sampler.next_packet() {
        if let Err(e) = sink.send(&packet) {
            sampler.abandon();
            return Err(e);
        }
        trace!(
            "Packet sent: first={} count={} last={}",
            packet.first_sample_index, packet.sample_count, packet.last_packet
        );
        sent += 1;
        if packet.last_packet {
            sampler.finish_batch();
            break;
        }
    }
    Ok(sent)
}

/// Transmission task body.
///
/// Polls quickly while a collection runs and slowly otherwise; completion of
/// a collection wakes it through `transmit_wake`.
pub(crate) fn transmission_task(
    shared: Arc<SharedState>,
    mut sink: Box<dyn TelemetrySink>,
    config: TelemetryConfig,
) {
    info!("Transmission task started");
    let collecting_poll = Duration::from_millis(u64::from(config.collecting_poll_ms));
    let idle_poll = Duration::from_millis(u64::from(config.idle_poll_ms));

    while shared.running.load(Ordering::Acquire) {
        let poll = if shared.sampler.is_collecting() {
            collecting_poll
        } else {
            idle_poll
        };
        shared.transmit_wake.take(Some(poll));
        if let Err(e) = transmit_pending(&shared.sampler, sink.as_mut()) {
            warn!("Telemetry batch abandoned: {e}");
        }
    }
    // Flush whatever a finished collection left behind.
    if let Err(e) = transmit_pending(&shared.sampler, sink.as_mut()) {
        warn!("Telemetry batch abandoned: {e}");
    }
    info!("Transmission task stopped");
}
