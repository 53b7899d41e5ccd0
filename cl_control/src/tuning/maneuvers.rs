//! Data-collection maneuvers: continuous phase sweep and step response.
//!
//! Neither produces a verdict; they exist to be recorded by a data
//! collection started with the matching maneuver index.

use cl_common::consts::PHASE_PERIOD;
use tracing::debug;

use super::MANEUVER_CURRENT;
use crate::engine::ClosedLoop;
use crate::error::ManeuverFault;

impl ClosedLoop {
    /// Advance the commanded phase by `sweep_increment` every tick for
    /// `sweep_cycles` electrical cycles, starting at the measured phase.
    pub(crate) fn phase_sweep(&mut self) -> Result<(), ManeuverFault> {
        self.read_position()?;
        let increment = self.tuning.sweep_increment;
        let ticks = u32::from(self.tuning.sweep_cycles) * u32::from(PHASE_PERIOD)
            / u32::from(increment);
        debug!("Phase sweep: {ticks} ticks of {increment}");

        let mut phase = self.state.step_phase;
        for _ in 0..ticks {
            phase = ((u32::from(phase) + u32::from(increment)) % u32::from(PHASE_PERIOD)) as u16;
            self.command_phase(phase, MANEUVER_CURRENT);
            self.wait_tick()?;
            self.measure()?;
        }
        self.hold_position()
    }

    /// Step the target out by `step_response_offset`, let the loop respond
    /// for `step_response_ticks`, then step back for as long.
    ///
    /// The target is restored even when a fault interrupts the response.
    pub(crate) fn step_response(&mut self) -> Result<(), ManeuverFault> {
        let origin = self.shared.target.get();
        let offset = self.tuning.step_response_offset;
        self.reset_pid();
        let result = self
            .track_target(origin + offset)
            .and_then(|()| self.track_target(origin));
        self.shared.target.set(origin);
        result
    }

    /// Set the target and run the control loop for `step_response_ticks`.
    fn track_target(&mut self, target: f32) -> Result<(), ManeuverFault> {
        self.shared.target.set(target);
        for _ in 0..self.tuning.step_response_ticks {
            self.control_step().ok_or(ManeuverFault::NoEncoder)?;
            self.wait_tick()?;
        }
        Ok(())
    }
}
