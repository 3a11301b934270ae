//! Stall detection and end-of-travel calibration, ticked every 1 ms.

use crate::bridge::{Bridge, Clock};
use crate::constants::{
    ENDPOINT_CALIBRATION_PERIOD, HALL_SENSOR_GRACE_PERIOD, HALL_SENSOR_TIMEOUT,
    HALL_SENSOR_TIMEOUT_WHILE_STOPPING,
};
use crate::controller::Controller;
use crate::types::{MotorDirection, MotorStatus};

impl Controller {
    /// Accumulates Hall-1 idle time while moving and, past the grace
    /// period, declares a stall once idle time exceeds the timeout
    /// (relaxed further while `Stopping`, to tolerate premature stalls
    /// during braking). While `CalibratingEndPoint`, instead watches the
    /// settle timer and finalizes calibration once it elapses.
    pub fn stall_tick(&mut self, bridge: &mut impl Bridge, clock: &impl Clock) {
        match self.motion.status {
            MotorStatus::Moving | MotorStatus::Stopping => {
                self.decoder.hall_sensor_1_idle_time += 1;

                if clock.now_ms() - self.motion.movement_started_timestamp <= HALL_SENSOR_GRACE_PERIOD
                {
                    return;
                }

                if self.decoder.hall_sensor_1_idle_time > HALL_SENSOR_TIMEOUT {
                    let stopping_grace = self.motion.status == MotorStatus::Stopping
                        && self.decoder.hall_sensor_1_idle_time < HALL_SENSOR_TIMEOUT_WHILE_STOPPING;
                    if !stopping_grace {
                        self.motor_stopped(bridge, clock);
                        self.decoder.hall_sensor_1_idle_time = 0;
                    }
                }
            }
            MotorStatus::CalibratingEndPoint => {
                if clock.now_ms() - self.decoder.endpoint_calibration_started_timestamp
                    > ENDPOINT_CALIBRATION_PERIOD
                {
                    self.motion.status = MotorStatus::Stopped;
                    self.motion.calibrating = false;
                    self.motion.location = 0;
                }
            }
            _ => {}
        }
    }

    /// Reacts to a detected stall: de-energizes, then decides what the
    /// stall means given the direction that was in progress. An upward
    /// stall is the expected way to find the top hard-stop and starts
    /// endpoint calibration; a downward stall is unexpected and is an
    /// error condition; a stall while already `Stopping` is just the
    /// motor settling and is not an error.
    pub fn motor_stopped(&mut self, bridge: &mut impl Bridge, clock: &impl Clock) {
        if self.motion.status == MotorStatus::Stopped {
            return;
        }

        let current_status = self.motion.status;
        let current_direction = self.motion.direction;

        self.motor_stop(bridge);

        match current_status {
            MotorStatus::Moving => match current_direction {
                MotorDirection::Up => {
                    self.motion.status = MotorStatus::CalibratingEndPoint;
                    self.decoder.sensor_ticks_while_calibrating_endpoint = 0;
                    self.decoder.endpoint_calibration_started_timestamp = clock.now_ms();
                    #[cfg(not(test))]
                    defmt::println!("stall while moving up: starting endpoint calibration");
                }
                _ => {
                    self.motion.status = MotorStatus::Error;
                    #[cfg(not(test))]
                    defmt::warn!("stall while moving down: motor error");
                }
            },
            MotorStatus::Stopping => {
                self.motion.status = MotorStatus::Stopped;
                #[cfg(not(test))]
                defmt::println!("stall while stopping: settled to stopped");
            }
            _ => {}
        }
    }
}
