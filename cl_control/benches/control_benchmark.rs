//! Control path micro-benchmarks.
//!
//! - PID compute alone
//! - Commutation: phase to coil currents
//! - Full `control_iteration()` from raw encoder counts
//! - One complete data collection: record, packetize, release

use criterion::{Criterion, criterion_group, criterion_main};

use cl_common::config::PidParameters;
use cl_common::telemetry::{RecordingMode, SampleFilter};
use cl_control::control::commutation::coil_currents;
use cl_control::control::pid::{PidGains, PidState, pid_compute};
use cl_control::control::{ControlInput, ControlState, control_iteration};
use cl_control::sampling::Sampler;
use cl_control::sampling::acquisition::{CollectionRequest, SampleClock};

const COUNTS_PER_STEP: f32 = 40.0;

fn reference_params() -> PidParameters {
    PidParameters {
        kp: 150.0,
        ki: 2.0,
        kd: 10.0,
        ..Default::default()
    }
}

fn bench_pid_only(c: &mut Criterion) {
    let gains = PidGains::from(&reference_params());
    let mut state = PidState::default();
    let mut cycle = 0u32;

    c.bench_function("pid_compute", |b| {
        b.iter(|| {
            cycle = cycle.wrapping_add(1);
            let error = 0.5 * (cycle as f32 * 0.01).sin();
            pid_compute(&mut state, &gains, error)
        });
    });
}

fn bench_commutation(c: &mut Criterion) {
    let mut phase = 0u16;

    c.bench_function("coil_currents", |b| {
        b.iter(|| {
            phase = (phase + 37) % 4096;
            coil_currents(phase, 0.8, true, false)
        });
    });
}

fn bench_control_iteration(c: &mut Criterion) {
    let params = reference_params();
    let mut state = ControlState::default();
    let mut raw = 0i32;

    c.bench_function("control_iteration", |b| {
        b.iter(|| {
            raw = (raw + 3) % 4000;
            let input = ControlInput {
                raw_position: raw,
                counts_per_step: COUNTS_PER_STEP,
                target_steps: 50.0,
                collecting: false,
            };
            control_iteration(&mut state, &params, &input)
        });
    });
}

fn bench_collection(c: &mut Criterion) {
    let sampler = Sampler::new();
    let filter = SampleFilter::all();
    let request = CollectionRequest {
        filter,
        samples: 46,
        rate_hz: 0,
        mode: RecordingMode::Immediate,
        maneuver: None,
    };
    let state = ControlState {
        current_steps: 1.25,
        target_steps: 2.0,
        ..Default::default()
    };

    c.bench_function("collection_cycle", |b| {
        b.iter(|| {
            if sampler.start(&request, state.target_steps).is_err() {
                sampler.abandon();
                return 0;
            }
            for _ in 0..request.samples {
                sampler.record(&state, state.target_steps, SampleClock::ControlTick);
            }
            let mut packets = 0;
            while sampler.next_packet().is_some() {
                packets += 1;
            }
            sampler.finish_batch();
            packets
        });
    });
}

criterion_group!(
    benches,
    bench_pid_only,
    bench_commutation,
    bench_control_iteration,
    bench_collection
);
criterion_main!(benches);
