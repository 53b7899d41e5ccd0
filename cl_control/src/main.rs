//! # Closed-Loop Stepper Simulator
//!
//! Runs the closed-loop engine against the simulated stepper in real time.
//! Optionally tunes the motor and arms a data collection before entering
//! the tick loop. Telemetry packets are written to stdout as JSON lines,
//! logs go to stderr.

use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, ValueEnum};
use cl_common::config::LogLevel;
use cl_common::telemetry::{RecordingMode, SampleFilter};
use cl_common::tuning::TuningRequest;
use cl_control::config::load_config;
use cl_control::cycle::{TickRunner, rt_setup};
use cl_control::runtime::ClosedLoopRuntime;
use cl_control::sampling::acquisition::CollectionRequest;
use cl_control::sampling::transmission::JsonLinesSink;
use cl_control::sim::{SimClock, SimulatedStepper};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Tuning maneuver selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Maneuver {
    /// Polarity detection, zeroing and every check.
    Basic,
    Zero,
    DetectPolarity,
    CheckPolarity,
    CheckControl,
    CheckEncoderSteps,
    PhaseSweep,
    StepResponse,
    ZieglerNichols,
}

impl Maneuver {
    fn request(self) -> TuningRequest {
        match self {
            Self::Basic => TuningRequest::BASIC,
            Self::Zero => TuningRequest::ZERO,
            Self::DetectPolarity => TuningRequest::DETECT_POLARITY,
            Self::CheckPolarity => TuningRequest::CHECK_POLARITY,
            Self::CheckControl => TuningRequest::CHECK_CONTROL,
            Self::CheckEncoderSteps => TuningRequest::CHECK_ENCODER_STEPS,
            Self::PhaseSweep => TuningRequest::CONTINUOUS_PHASE_SWEEP,
            Self::StepResponse => TuningRequest::STEP_RESPONSE,
            Self::ZieglerNichols => TuningRequest::ZIEGLER_NICHOLS,
        }
    }
}

/// Closed-loop stepper engine on a simulated motor
#[derive(Parser, Debug)]
#[command(name = "cl_control")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Closed-loop stepper control engine with self-tuning and telemetry")]
struct Args {
    /// Path to the engine configuration TOML.
    #[arg(default_value = "config/closed_loop.toml")]
    config: PathBuf,

    /// CPU core to pin the tick thread to (rt feature only).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (rt feature only).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Stop after this many ticks (default: run until Ctrl-C).
    #[arg(long)]
    ticks: Option<u64>,

    /// Maneuvers to run before the tick loop, comma separated.
    #[arg(long, value_enum, value_delimiter = ',')]
    tune: Vec<Maneuver>,

    /// Arm a data collection with this variable mask (e.g. 0x1fff).
    #[arg(long, value_name = "MASK", value_parser = parse_filter)]
    collect: Option<SampleFilter>,

    /// Samples to collect.
    #[arg(long, default_value_t = 40)]
    samples: u16,

    /// Sample rate [Hz], 0 samples every control tick.
    #[arg(long, default_value_t = 0)]
    rate: u32,

    /// Start sampling only once the target moves.
    #[arg(long)]
    on_next_move: bool,

    /// Maneuver index (0..=7) driving the collection.
    #[arg(long)]
    maneuver: Option<u8>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn parse_filter(s: &str) -> Result<SampleFilter, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    let bits = u16::from_str_radix(digits, 16).map_err(|e| e.to_string())?;
    match SampleFilter::from_bits(bits) {
        Some(filter) if !filter.is_empty() => Ok(filter),
        _ => Err(format!("no valid variable mask: {s}")),
    }
}

fn main() {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e}");
            process::exit(1);
        }
    };
    setup_tracing(&args, config.log_level);

    info!("Closed loop v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args, &config) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Closed loop shutdown complete");
}

fn run(
    args: &Args,
    config: &cl_common::config::ClosedLoopConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Config OK: tick={}µs, encoder={}, {} counts/step",
        config.tick_period_us, config.encoder.kind, config.encoder.counts_per_step
    );

    rt_setup(args.cpu_core, args.rt_priority)?;

    let sim = SimulatedStepper::new(&config.simulation, SimClock::Wall);
    let sink = Box::new(JsonLinesSink::new(io::stdout()));
    let mut runtime = ClosedLoopRuntime::start(config, sim.hardware(), sink)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    if !args.tune.is_empty() {
        let request = args
            .tune
            .iter()
            .fold(TuningRequest::empty(), |acc, m| acc | m.request());
        match runtime.tune(request) {
            Ok(report) => info!("Tuning result: {report}"),
            Err(e) => warn!("Tuning rejected: {e}"),
        }
    }

    if let Some(filter) = args.collect {
        let request = CollectionRequest {
            filter,
            samples: args.samples,
            rate_hz: args.rate,
            mode: if args.on_next_move {
                RecordingMode::OnNextMove
            } else {
                RecordingMode::Immediate
            },
            maneuver: args.maneuver,
        };
        if let Err(e) = runtime.start_collection(&request) {
            warn!("Collection rejected: {e}");
        }
    }

    let mut runner = TickRunner::new(runtime.supervisor(), config.tick_period(), running)
        .with_max_ticks(args.ticks);
    info!("Tick runner initialized, entering control loop");
    let result = runner.run();

    for line in runtime.report().lines() {
        info!("{line}");
    }
    runtime.shutdown();
    result?;
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .compact()
            .init();
    }
}
