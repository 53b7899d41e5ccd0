//! Collection followed by transmission, from the sampler up to the sink.

use std::time::{Duration, Instant};

use cl_common::consts::PHASE_PERIOD;
use cl_common::telemetry::{RecordingMode, SampleFilter, SampleVariable};
use cl_common::tuning::TuningRequest;
use cl_control::CommandError;
use cl_control::control::ControlState;
use cl_control::runtime::ClosedLoopRuntime;
use cl_control::sampling::Sampler;
use cl_control::sampling::acquisition::{CollectionRequest, SampleClock};
use cl_control::sampling::transmission::transmit_pending;
use cl_control::sim::SimulatedStepper;

use super::{RecordingSink, engine_config, plant};

const WAIT: Duration = Duration::from_secs(5);

fn six_variables() -> SampleFilter {
    SampleFilter::RAW_POSITION
        | SampleFilter::CURRENT_STEPS
        | SampleFilter::TARGET_STEPS
        | SampleFilter::STEP_PHASE
        | SampleFilter::CONTROL_SIGNAL
        | SampleFilter::P_TERM
}

fn request(filter: SampleFilter, samples: u16) -> CollectionRequest {
    CollectionRequest {
        filter,
        samples,
        rate_hz: 0,
        mode: RecordingMode::Immediate,
        maneuver: None,
    }
}

fn start(sink: &RecordingSink, sim: &SimulatedStepper) -> ClosedLoopRuntime {
    ClosedLoopRuntime::start(&engine_config(10.0), sim.hardware(), Box::new(sink.clone()))
        .unwrap()
}

#[test]
fn full_buffer_round_trip_through_sink() {
    let sampler = Sampler::new();
    let filter = six_variables();
    sampler.start(&request(filter, 100), 0.0).unwrap();

    let mut expected = Vec::new();
    for k in 0..100 {
        let state = ControlState {
            raw_position: k,
            current_steps: k as f32 * 0.1,
            target_steps: 5.0,
            step_phase: (k * 7) as u16,
            control_signal: -(k as i16),
            p_term: k as f32 * 2.0,
            ..Default::default()
        };
        expected.extend(filter.variables().map(|v| state.value(v)));
        sampler.record(&state, 5.0, SampleClock::ControlTick);
    }
    assert!(!sampler.is_collecting());
    assert_eq!(sampler.cursors(), (0, 600));

    let mut sink = RecordingSink::default();
    let sent = transmit_pending(&sampler, &mut sink).unwrap();
    // 14 floats per packet hold two samples of six variables.
    assert_eq!(sent, 50);
    assert_eq!(sink.concatenated(), expected);
    assert_eq!(sampler.cursors(), (0, 0));

    let packets = sink.packets.lock();
    assert!(packets.iter().all(|p| p.sample_count == 2));
    assert_eq!(packets.iter().filter(|p| p.last_packet).count(), 1);
    assert!(packets.last().unwrap().last_packet);
    for (i, p) in packets.iter().enumerate() {
        assert_eq!(usize::from(p.first_sample_index), 2 * i);
    }
}

#[test]
fn capacity_is_checked_up_front() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let sink = RecordingSink::default();
    let runtime = start(&sink, &sim);

    assert_eq!(
        runtime.start_collection(&request(six_variables(), 101)),
        Err(CommandError::CapacityExceeded {
            samples: 101,
            variables: 6,
            capacity: 600
        })
    );
    let seven = six_variables() | SampleFilter::I_TERM;
    assert!(matches!(
        runtime.start_collection(&request(seven, 100)),
        Err(CommandError::CapacityExceeded { .. })
    ));
    let bad_maneuver = CollectionRequest {
        maneuver: Some(8),
        ..request(SampleFilter::RAW_POSITION, 10)
    };
    assert_eq!(
        runtime.start_collection(&bad_maneuver),
        Err(CommandError::InvalidManeuver(8))
    );
    assert!(!runtime.shared().sampler.is_collecting());
}

#[test]
fn tick_sampled_collection_reaches_sink() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let sink = RecordingSink::default();
    let runtime = start(&sink, &sim);
    let filter = SampleFilter::RAW_POSITION | SampleFilter::TARGET_STEPS;

    runtime.start_collection(&request(filter, 30)).unwrap();
    assert_eq!(
        runtime.start_collection(&request(filter, 30)),
        Err(CommandError::AlreadyCollecting)
    );
    assert_eq!(
        runtime.tune(TuningRequest::CHECK_CONTROL),
        Err(CommandError::AlreadyCollecting)
    );

    let supervisor = runtime.supervisor();
    for _ in 0..40 {
        supervisor.tick();
    }
    assert!(sink.wait_last(WAIT));

    let data = sink.concatenated();
    assert_eq!(data.len(), 60);
    // Position 0.3 steps at 10 counts per step.
    assert!(data.chunks(2).all(|s| s == [3.0, 0.3]));
    let status = runtime.shared().sampler.status();
    assert_eq!(status.samples_taken, 30);
    assert_eq!(status.samples_sent, 30);
    // The transmission task releases the buffer right after the last send.
    let deadline = Instant::now() + WAIT;
    while runtime.shared().sampler.cursors() != (0, 0) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(runtime.shared().sampler.cursors(), (0, 0));

    // The buffer is free again.
    runtime.start_collection(&request(filter, 2)).unwrap();
}

#[test]
fn on_next_move_waits_for_target_change() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let sink = RecordingSink::default();
    let runtime = start(&sink, &sim);
    let armed = CollectionRequest {
        mode: RecordingMode::OnNextMove,
        ..request(SampleFilter::TARGET_STEPS, 4)
    };
    runtime.start_collection(&armed).unwrap();

    let supervisor = runtime.supervisor();
    for _ in 0..10 {
        supervisor.tick();
    }
    assert_eq!(runtime.shared().sampler.status().samples_taken, 0);

    let target = runtime.take_step(true);
    for _ in 0..10 {
        supervisor.tick();
    }
    assert!(sink.wait_last(WAIT));
    assert_eq!(sink.concatenated(), vec![target; 4]);
}

#[test]
fn paced_collection_uses_acquisition_task() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let sink = RecordingSink::default();
    let runtime = start(&sink, &sim);
    let paced = CollectionRequest {
        rate_hz: 1000,
        ..request(SampleFilter::RAW_POSITION | SampleFilter::COIL_A, 20)
    };
    runtime.start_collection(&paced).unwrap();
    assert_eq!(runtime.shared().sampler.paced_rate_hz(), Some(1000));

    // No supervisor ticks: only the acquisition task records.
    assert!(sink.wait_last(WAIT));
    assert_eq!(sink.concatenated().len(), 40);
}

#[test]
fn maneuver_collection_records_phase_sweep() {
    let sim = SimulatedStepper::virtual_clock(&plant(10.0, false));
    let sink = RecordingSink::default();
    let runtime = start(&sink, &sim);
    let sweep = CollectionRequest {
        maneuver: Some(5),
        ..request(SampleVariable::DesiredPhase.flag(), 100)
    };
    runtime.start_collection(&sweep).unwrap();
    assert!(sink.wait_last(WAIT));

    let phases = sink.concatenated();
    assert_eq!(phases.len(), 100);
    let period = f32::from(PHASE_PERIOD);
    for pair in phases.windows(2) {
        assert_eq!((pair[1] - pair[0]).rem_euclid(period), 16.0);
    }
}
