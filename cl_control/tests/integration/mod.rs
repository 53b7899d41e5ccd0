//! Shared fixtures for the integration tests.

mod closed_loop;
mod telemetry_cycle;
mod tuning_sequence;
mod ziegler_nichols;

use std::sync::Arc;
use std::time::{Duration, Instant};

use cl_common::config::{ClosedLoopConfig, SimulationConfig};
use cl_common::hal::EncoderKind;
use cl_common::telemetry::SamplePacket;
use cl_control::engine::ClosedLoop;
use cl_control::sampling::transmission::{SinkError, TelemetrySink};
use cl_control::shared::SharedState;
use cl_control::sim::SimulatedStepper;
use parking_lot::Mutex;

/// Instant rotor, encoder scale `counts_per_step`, optionally with coil B
/// wired reversed.
pub fn plant(counts_per_step: f32, coil_b_reversed: bool) -> SimulationConfig {
    SimulationConfig {
        counts_per_step,
        coil_a_reversed: false,
        coil_b_reversed,
        time_constant_ms: 0.0,
        microstepping: 16,
        initial_position_steps: 0.3,
        encoder_offset: 0,
    }
}

/// Enabled engine configuration matching `plant`.
pub fn engine_config(counts_per_step: f32) -> ClosedLoopConfig {
    let mut config = ClosedLoopConfig {
        enabled: true,
        ..Default::default()
    };
    config.encoder.kind = EncoderKind::RotaryQuadrature;
    config.encoder.counts_per_step = counts_per_step;
    config.pid.kd = 0.0;
    config.tuning.settle_time_ms = 2;
    config
}

pub fn build_engine(config: &ClosedLoopConfig, sim: &SimulatedStepper) -> ClosedLoop {
    ClosedLoop::new(config, sim.hardware(), Arc::new(SharedState::new())).unwrap()
}

/// Sink keeping every packet it was handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub packets: Arc<Mutex<Vec<SamplePacket>>>,
}

impl TelemetrySink for RecordingSink {
    fn send(&mut self, packet: &SamplePacket) -> Result<(), SinkError> {
        self.packets.lock().push(packet.clone());
        Ok(())
    }
}

impl RecordingSink {
    /// Wait until a packet marked last arrived.
    pub fn wait_last(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.packets.lock().iter().any(|p| p.last_packet) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Payload of every packet, in arrival order.
    pub fn concatenated(&self) -> Vec<f32> {
        self.packets
            .lock()
            .iter()
            .flat_map(|p| p.data.iter().copied())
            .collect()
    }
}
