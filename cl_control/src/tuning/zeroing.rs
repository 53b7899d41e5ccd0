//! Zeroing: walk the rotor to electrical phase 0 and define it as encoder zero.

use cl_common::tuning::TuningError;
use tracing::info;

use super::MANEUVER_CURRENT;
use crate::engine::ClosedLoop;
use crate::error::ManeuverFault;

impl ClosedLoop {
    /// Command the measured step phase, then halve it down to 0, settling
    /// and measuring at each point. The final position becomes encoder zero
    /// and the target.
    pub(crate) fn zero(&mut self) -> Result<(), ManeuverFault> {
        self.read_position()?;
        let mut phase = self.state.step_phase;
        loop {
            self.command_phase(phase, MANEUVER_CURRENT);
            self.settle()?;
            self.measure()?;
            if phase == 0 {
                break;
            }
            phase /= 2;
        }

        let raw = self.read_position()?;
        self.encoder.set_zero_offset(raw);
        self.shared.target.set(0.0);
        self.reset_pid();
        self.measure()?;
        self.errors.remove(TuningError::NEEDS_ZEROING);
        info!("Encoder zeroed at {raw} counts");
        Ok(())
    }
}
