//! Fixed-rate tick runner driving the supervisor.
//!
//! ## RT Setup Sequence
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` - lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity` - pin to the configured CPU core.
//! 4. `sched_setscheduler(SCHED_FIFO, prio)` - RT priority.
//!
//! All four steps are no-ops without the `rt` feature.
//!
//! ## Tick Loop
//! With `rt`, absolute-time sleep on `CLOCK_MONOTONIC` for drift-free
//! pacing; otherwise `std::thread::sleep` for the remainder of the tick.
//! An overrun is counted and logged (rate-limited), never fatal: a late
//! tick only delays one PID iteration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::supervisor::{Supervisor, TickOutcome};

/// Minimum ticks between two overrun warnings.
const OVERRUN_WARN_INTERVAL: u64 = 1000;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-tick timing statistics.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total ticks executed.
    pub cycle_count: u64,
    /// Minimum tick duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum tick duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Ticks that exceeded the period.
    pub overruns: u64,
    /// Ticks that ran a PID iteration.
    pub controlled: u64,
    /// Ticks skipped because the tuning task held the engine.
    pub busy: u64,
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
            controlled: 0,
            busy: 0,
        }
    }

    /// Record one tick. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, outcome: TickOutcome) {
        self.cycle_count += 1;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns += duration_ns;
        match outcome {
            TickOutcome::Controlled { .. } => self.controlled += 1,
            TickOutcome::Busy => self.busy += 1,
            _ => {}
        }
    }

    /// Average tick time [ns] (0 if no ticks).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CycleError {
    /// RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),

    /// Reading the monotonic clock failed.
    #[error("clock error: {0}")]
    Clock(String),
}

/// Lock all current and future memory pages.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), CycleError> {
    Ok(())
}

/// Touch 256 KiB of stack so the tick thread never faults on it.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into `buf`.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), CycleError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| CycleError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| CycleError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), CycleError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` is a valid sched_param for the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), CycleError> {
    Ok(())
}

/// Full RT setup for the calling (tick) thread.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), CycleError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Tick Runner ────────────────────────────────────────────────────

pub struct TickRunner {
    supervisor: Supervisor,
    tick_ns: i64,
    running: Arc<AtomicBool>,
    max_ticks: Option<u64>,
    pub stats: CycleStats,
}

impl TickRunner {
    pub fn new(supervisor: Supervisor, tick_period: Duration, running: Arc<AtomicBool>) -> Self {
        Self {
            supervisor,
            tick_ns: tick_period.as_nanos() as i64,
            running,
            max_ticks: None,
            stats: CycleStats::new(),
        }
    }

    /// Stop after `ticks` ticks.
    pub fn with_max_ticks(mut self, ticks: Option<u64>) -> Self {
        self.max_ticks = ticks;
        self
    }

    #[inline]
    fn should_continue(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.max_ticks.is_none_or(|max| self.stats.cycle_count < max)
    }

    fn note_overrun(&mut self, duration_ns: i64) {
        self.stats.overruns += 1;
        if self.stats.overruns == 1 || self.stats.cycle_count % OVERRUN_WARN_INTERVAL == 0 {
            warn!(
                "Tick overrun: {duration_ns}ns > {}ns budget ({} total)",
                self.tick_ns, self.stats.overruns
            );
        }
    }

    /// Run until the running flag clears or the tick limit is reached.
    pub fn run(&mut self) -> Result<(), CycleError> {
        info!("Tick runner started ({} ns period)", self.tick_ns);

        #[cfg(feature = "rt")]
        let result = self.run_rt_loop();

        #[cfg(not(feature = "rt"))]
        let result = self.run_sim_loop();

        info!(
            "Tick runner stopped: {} ticks ({} controlled, {} busy), avg {} ns, max {} ns, {} overruns",
            self.stats.cycle_count,
            self.stats.controlled,
            self.stats.busy,
            self.stats.avg_cycle_ns(),
            self.stats.max_cycle_ns,
            self.stats.overruns
        );
        result
    }

    #[cfg(feature = "rt")]
    fn run_rt_loop(&mut self) -> Result<(), CycleError> {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        let clock = ClockId::CLOCK_MONOTONIC;
        let now = || clock_gettime(clock).map_err(|e| CycleError::Clock(e.to_string()));
        let mut next_wake = now()?;

        while self.should_continue() {
            next_wake = timespec_add_ns(next_wake, self.tick_ns);
            let start = now()?;

            let outcome = self.supervisor.tick();

            let end = now()?;
            let duration_ns = timespec_diff_ns(&end, &start);
            self.stats.record(duration_ns, outcome);
            if duration_ns > self.tick_ns {
                self.note_overrun(duration_ns);
            }

            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
        }
        Ok(())
    }

    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(&mut self) -> Result<(), CycleError> {
        use std::time::Instant;

        let period = Duration::from_nanos(self.tick_ns as u64);
        while self.should_continue() {
            let start = Instant::now();

            let outcome = self.supervisor.tick();

            let elapsed = start.elapsed();
            let duration_ns = elapsed.as_nanos() as i64;
            self.stats.record(duration_ns, outcome);
            if duration_ns > self.tick_ns {
                self.note_overrun(duration_ns);
            }
            if let Some(remaining) = period.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }
        Ok(())
    }
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}

#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

// ─── Tests ──────────────────────────────────────────────────────────
