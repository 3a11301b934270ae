//! Closed-loop speed regulator, ticked every 10 ms.

use crate::bridge::{Bridge, PwmChannel};
use crate::controller::Controller;
use crate::types::{MotorDirection, MotorStatus};

impl Controller {
    /// Nudges `curr_pwm` toward the `target_speed` RPM setpoint. Braking
    /// (speed too high) steps down faster than acceleration steps up, per
    /// the original's asymmetric `curr_pwm--`/`curr_pwm -= 2`/`-= 3` ladder.
    /// No-op outside `Moving`/`Stopping`.
    pub fn adjust_rpm(&mut self, bridge: &mut impl Bridge) {
        if !matches!(self.motion.status, MotorStatus::Moving | MotorStatus::Stopping) {
            return;
        }

        let speed = self.rpm();
        let target = self.motion.target_speed as u32;

        if speed < target && self.motion.curr_pwm < 254 {
            self.motion.curr_pwm += 1;
            if target - speed > 2 {
                self.motion.curr_pwm += 1;
            }
        } else if speed > target && self.motion.curr_pwm > 1 {
            self.motion.curr_pwm -= 1;
            if speed - target > 2 {
                self.motion.curr_pwm -= 1;
            }
            if speed - target > 4 {
                self.motion.curr_pwm -= 1;
            }
        } else {
            return;
        }

        let channel = match self.motion.direction {
            MotorDirection::Up => PwmChannel::Low2,
            _ => PwmChannel::Low1,
        };
        bridge.pwm_set(channel, self.motion.curr_pwm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::MockBridge;

    #[test]
    fn noop_when_stopped() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.motion.curr_pwm = 50;
        c.adjust_rpm(&mut bridge);
        assert_eq!(c.motion.curr_pwm, 50);
    }

    #[test]
    fn accelerates_when_below_target_writing_low2_while_moving_up() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.motion.status = MotorStatus::Moving;
        c.motion.direction = MotorDirection::Up;
        c.motion.curr_pwm = 60;
        c.motion.target_speed = 30;
        c.motion.hall_sensor_1_interval = 0; // rpm() == 0, well below target

        c.adjust_rpm(&mut bridge);

        // speed(0) < target(30), diff > 2 -> +2
        assert_eq!(c.motion.curr_pwm, 62);
        assert_eq!(bridge.low2_duty, 62);
    }

    #[test]
    fn decelerates_hard_when_far_above_target_writing_low1_while_down() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.motion.status = MotorStatus::Stopping;
        c.motion.direction = MotorDirection::Down;
        c.motion.curr_pwm = 60;
        c.motion.target_speed = 1;
        // Force a high rpm() via a very short interval.
        c.motion.hall_sensor_1_interval = 1;

        c.adjust_rpm(&mut bridge);

        assert!(c.motion.curr_pwm < 60);
        assert_eq!(bridge.low1_duty, c.motion.curr_pwm);
    }

    #[test]
    fn does_not_overshoot_below_floor_of_one() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.motion.status = MotorStatus::Moving;
        c.motion.curr_pwm = 1;
        c.motion.target_speed = 0;
        c.motion.hall_sensor_1_interval = 1; // rpm() large, way above target(0)
        c.adjust_rpm(&mut bridge);
        assert_eq!(c.motion.curr_pwm, 1);
    }
}
