//! Hall-sensor quadrature decoder. Converts interrupt pairs into signed
//! location deltas and infers direction, including passive (unpowered)
//! movement.

use crate::bridge::Bridge;
use crate::controller::Controller;
use crate::types::MotorDirection;

/// A Hall sensor edge event: which sensor, and the level it transitioned
/// to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HallSensor {
    Hall1,
    Hall2,
}

impl Controller {
    /// Handle one Hall-sensor edge. `level` is the level the pin just
    /// transitioned to (0 or 1).
    ///
    /// Hall sequence for upward motion: HALL1 HIGH, HALL2 HIGH, HALL1 LOW,
    /// HALL2 LOW (phase cycles 0,1,2,3,...). Downward motion cycles the
    /// same phases in reverse. A direction change "skips" a phase, which is
    /// how `diff` ends up outside `{1, 3}`.
    pub fn on_hall_edge(&mut self, sensor: HallSensor, level: u8, bridge: &mut impl Bridge) {
        // NB: the phase formula is 0-indexed per sensor (Hall1 -> 0,
        // Hall2 -> 1), confirmed against `original_source/motor.c`'s
        // `HALL_1_SENSOR`/`HALL_2_SENSOR` constants — this is what produces
        // the documented cyclic ordering 0,1,2,3 for upward rotation.
        let sensor_id: i8 = match sensor {
            HallSensor::Hall1 => 0,
            HallSensor::Hall2 => 1,
        };
        let new_rotor_position = sensor_id + (1 - level as i8) * 2;

        match sensor {
            HallSensor::Hall1 => {
                self.decoder.hall_sensor_1_ticks += 1;
                if self.decoder.hall_sensor_1_ticks > 1 {
                    // At least two ticks are needed to have a valid interval.
                    self.motion.hall_sensor_1_interval = self.decoder.hall_sensor_1_idle_time;
                }
                self.decoder.hall_sensor_1_idle_time = 0;
            }
            HallSensor::Hall2 => {
                self.decoder.hall_sensor_2_ticks += 1;
            }
        }

        use crate::types::MotorStatus;
        match self.motion.status {
            MotorStatus::Stopped => self.decoder.sensor_ticks_while_stopped += 1,
            MotorStatus::CalibratingEndPoint => {
                self.decoder.sensor_ticks_while_calibrating_endpoint += 1
            }
            _ => {}
        }

        if self.decoder.rotor_position != -1 {
            let diff = (4 + new_rotor_position as i32 - self.decoder.rotor_position as i32) & 0x3;
            match diff {
                1 => {
                    // Sensor direction is up.
                    if self.motion.direction != MotorDirection::Down {
                        self.process_location(MotorDirection::Up, bridge);
                    } else {
                        self.decoder.dir_error += 1;
                        Self::log_dir_error(self.decoder.dir_error);
                    }
                }
                3 => {
                    // Sensor direction is down.
                    if self.motion.direction != MotorDirection::Up {
                        self.process_location(MotorDirection::Down, bridge);
                    } else {
                        self.decoder.dir_error += 1;
                        Self::log_dir_error(self.decoder.dir_error);
                    }
                }
                _ => {
                    // Direction change: the phase sequence skipped one step.
                    // Not attributable to either direction; ignored for
                    // location purposes.
                }
            }
        }

        self.decoder.rotor_position = new_rotor_position;
    }

    /// Direction-mismatch events can arrive back-to-back with a stuck
    /// sensor; logging every one would flood the RTT channel, so only every
    /// 16th is reported, carrying the running total.
    #[allow(unused_variables)]
    fn log_dir_error(total: u32) {
        #[cfg(not(test))]
        if total & 0xf == 0 {
            defmt::warn!("hall direction mismatch, total={}", total);
        }
    }
}
